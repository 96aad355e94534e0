use crate::query::error::QueryError;
use thiserror::Error;

/// Error raised by a user-authored predicate.
///
/// Predicates are application code; they report failure with a plain message
/// and the gate propagates it unchanged inside [`GateError::Evaluation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuleError {
    pub message: String,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateErrorCode {
    ContextMissing,
    UnregisteredRule,
    AlreadyRegistered,
    Evaluation,
    IdentityUnknown,
    UnknownColumn,
    Validation,
    InvalidConfig,
    UnsupportedRuntime,
    Query,
}

impl GateErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GateErrorCode::ContextMissing => "context_missing",
            GateErrorCode::UnregisteredRule => "unregistered_rule",
            GateErrorCode::AlreadyRegistered => "already_registered",
            GateErrorCode::Evaluation => "evaluation_failure",
            GateErrorCode::IdentityUnknown => "identity_unknown",
            GateErrorCode::UnknownColumn => "unknown_column",
            GateErrorCode::Validation => "validation",
            GateErrorCode::InvalidConfig => "invalid_config",
            GateErrorCode::UnsupportedRuntime => "unsupported_runtime",
            GateErrorCode::Query => "query",
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("no active {store} context")]
    ContextMissing { store: &'static str },
    #[error("no authorization rule registered for table '{table}'")]
    UnregisteredRule { table: String },
    #[error("authorization rule for table '{table}' already registered")]
    AlreadyRegistered { table: String },
    #[error("predicate evaluation failed on '{table}': {source}")]
    Evaluation {
        table: String,
        #[source]
        source: RuleError,
    },
    #[error("caller identity was not propagated to this task")]
    IdentityUnknown,
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("blocking call needs a multi-thread runtime, found {flavor}")]
    UnsupportedRuntime { flavor: String },
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

impl GateError {
    pub fn code(&self) -> GateErrorCode {
        match self {
            GateError::ContextMissing { .. } => GateErrorCode::ContextMissing,
            GateError::UnregisteredRule { .. } => GateErrorCode::UnregisteredRule,
            GateError::AlreadyRegistered { .. } => GateErrorCode::AlreadyRegistered,
            GateError::Evaluation { .. } => GateErrorCode::Evaluation,
            GateError::IdentityUnknown => GateErrorCode::IdentityUnknown,
            GateError::UnknownColumn { .. } => GateErrorCode::UnknownColumn,
            GateError::Validation(_) => GateErrorCode::Validation,
            GateError::InvalidConfig { .. } => GateErrorCode::InvalidConfig,
            GateError::UnsupportedRuntime { .. } => GateErrorCode::UnsupportedRuntime,
            GateError::Query(_) => GateErrorCode::Query,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
