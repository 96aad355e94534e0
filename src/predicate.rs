//! Dual-form ("server-only") where predicates.
//!
//! A [`WherePredicate`] carries two forms of one rule: the wrapped form, which
//! a non-authoritative client may skip for server-only rules, and the raw
//! form, which always runs the user closure. The table the rule governs is
//! embedded at construction and never changes.

use crate::context::resolve_identity;
use crate::error::{GateError, RuleError};
use crate::permission::AuthData;
use crate::query::builder::WhereBuilder;
use crate::query::plan::Expr;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

/// What a predicate closure returns: a condition, or a plain boolean that
/// is normalized to a literal comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Where {
    Bool(bool),
    Cond(Expr),
}

impl Where {
    pub fn into_expr(self) -> Expr {
        match self {
            Where::Bool(true) => Expr::always_true(),
            Where::Bool(false) => Expr::always_false(),
            Where::Cond(expr) => expr,
        }
    }
}

impl From<bool> for Where {
    fn from(value: bool) -> Self {
        Where::Bool(value)
    }
}

impl From<Expr> for Where {
    fn from(value: Expr) -> Self {
        Where::Cond(value)
    }
}

pub type RawPredicate =
    Arc<dyn Fn(&WhereBuilder, Option<&AuthData>) -> Result<Where, RuleError> + Send + Sync>;

thread_local! {
    static EVALUATING_PERMISSION: Cell<bool> = const { Cell::new(false) };
}

/// True while a permission check is evaluating a rule on this thread.
///
/// Rule evaluation is synchronous, so the flag never spans an `.await`;
/// keeping it per thread stops concurrent checks on other worker threads
/// from seeing it.
pub fn is_evaluating_permission() -> bool {
    EVALUATING_PERMISSION.with(Cell::get)
}

/// Holds the evaluating-permission flag for its lifetime.
///
/// Dropping the guard restores the previous value, on early return, on error
/// and during unwinding alike.
#[must_use = "the flag is cleared as soon as the guard is dropped"]
pub struct PermissionEvalGuard {
    previous: bool,
}

impl PermissionEvalGuard {
    pub fn enter() -> Self {
        let previous = EVALUATING_PERMISSION.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for PermissionEvalGuard {
    fn drop(&mut self) {
        EVALUATING_PERMISSION.with(|flag| flag.set(self.previous));
    }
}

#[derive(Clone)]
pub struct WherePredicate {
    raw: RawPredicate,
    table: Option<Arc<str>>,
    server_only: bool,
}

impl fmt::Debug for WherePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WherePredicate")
            .field("table", &self.table)
            .field("server_only", &self.server_only)
            .finish_non_exhaustive()
    }
}

/// Wraps a predicate that governs exactly one table.
pub fn where_for_table<F>(table: &str, predicate: F, server_only: bool) -> WherePredicate
where
    F: Fn(&WhereBuilder, Option<&AuthData>) -> Result<Where, RuleError> + Send + Sync + 'static,
{
    WherePredicate {
        raw: Arc::new(predicate),
        table: Some(Arc::from(table)),
        server_only,
    }
}

/// Server-only rule for one table: trusted, not re-checked, on the client.
pub fn server_where<F>(table: &str, predicate: F) -> WherePredicate
where
    F: Fn(&WhereBuilder, Option<&AuthData>) -> Result<Where, RuleError> + Send + Sync + 'static,
{
    where_for_table(table, predicate, true)
}

/// Wraps a predicate for ad hoc composition; it has no table association.
pub fn where_ad_hoc<F>(predicate: F) -> WherePredicate
where
    F: Fn(&WhereBuilder, Option<&AuthData>) -> Result<Where, RuleError> + Send + Sync + 'static,
{
    WherePredicate {
        raw: Arc::new(predicate),
        table: None,
        server_only: false,
    }
}

impl WherePredicate {
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn is_server_only(&self) -> bool {
        self.server_only
    }

    pub fn raw(&self) -> RawPredicate {
        Arc::clone(&self.raw)
    }

    /// Evaluates the wrapped form with an explicit identity.
    ///
    /// On a client, a server-only rule yields an always-true condition
    /// without running the closure, unless a permission check is evaluating
    /// it.
    pub fn eval(&self, eb: &WhereBuilder, auth: Option<&AuthData>) -> Result<Expr, GateError> {
        if self.server_only && !eb.environment().is_authoritative() && !is_evaluating_permission()
        {
            tracing::trace!(table = eb.table(), "server-only predicate skipped on client");
            return Ok(Expr::always_true());
        }
        self.eval_raw(eb, auth)
    }

    /// Evaluates the wrapped form for the current caller.
    pub fn eval_current(&self, eb: &WhereBuilder) -> Result<Expr, GateError> {
        let auth = resolve_identity();
        self.eval(eb, auth.as_ref())
    }

    /// Evaluates the raw form; never short-circuits.
    pub fn eval_raw(&self, eb: &WhereBuilder, auth: Option<&AuthData>) -> Result<Expr, GateError> {
        let table = self.table_name().unwrap_or(eb.table());
        eval_raw_predicate(&self.raw, table, eb, auth)
    }
}

pub(crate) fn eval_raw_predicate(
    raw: &RawPredicate,
    table: &str,
    eb: &WhereBuilder,
    auth: Option<&AuthData>,
) -> Result<Expr, GateError> {
    let expr = raw(eb, auth)
        .map_err(|source| GateError::Evaluation {
            table: table.to_string(),
            source,
        })?
        .into_expr();
    expr.validate_depth(eb.max_depth())?;
    Ok(expr)
}

/// A predicate as handed around by callers: either a bare closure, or one
/// that went through [`where_for_table`] / [`where_ad_hoc`].
#[derive(Clone)]
pub enum Predicate {
    Raw(RawPredicate),
    Wrapped(WherePredicate),
}

impl Predicate {
    pub fn raw<F>(predicate: F) -> Self
    where
        F: Fn(&WhereBuilder, Option<&AuthData>) -> Result<Where, RuleError>
            + Send
            + Sync
            + 'static,
    {
        Predicate::Raw(Arc::new(predicate))
    }
}

impl From<WherePredicate> for Predicate {
    fn from(value: WherePredicate) -> Self {
        Predicate::Wrapped(value)
    }
}

/// Table a wrapped predicate was registered for; absent for bare closures and
/// ad hoc wrappers.
pub fn get_table_name(predicate: &Predicate) -> Option<&str> {
    match predicate {
        Predicate::Raw(_) => None,
        Predicate::Wrapped(wrapped) => wrapped.table_name(),
    }
}

/// Raw form of a wrapped predicate; absent for bare closures.
pub fn get_raw_predicate(predicate: &Predicate) -> Option<RawPredicate> {
    match predicate {
        Predicate::Raw(_) => None,
        Predicate::Wrapped(wrapped) => Some(wrapped.raw()),
    }
}
