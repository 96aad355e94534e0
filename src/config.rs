use crate::check::Strategy;
use crate::error::GateError;
use crate::query::plan::DEFAULT_MAX_EXPR_DEPTH;
use serde::{Deserialize, Serialize};

/// Which side of the client/server split this process evaluates rules on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    /// Trusted side. Every rule is enforced in full and its answer is final.
    Authoritative,
    /// Non-authoritative cache. Server-only rules are trusted, not re-checked.
    #[default]
    Client,
}

impl Environment {
    pub fn is_authoritative(self) -> bool {
        matches!(self, Environment::Authoritative)
    }
}

/// Runtime configuration for a [`crate::Gate`].
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub environment: Environment,
    /// Strategy used by `Gate::permission_check` when none is given.
    pub default_strategy: Strategy,
    /// Upper bound on the nesting depth of any condition a rule produces.
    pub max_condition_depth: usize,
    /// Upper bound on rows a single in-memory permission query may scan.
    pub max_scan_rows: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Client,
            default_strategy: Strategy::Optimistic,
            max_condition_depth: DEFAULT_MAX_EXPR_DEPTH,
            max_scan_rows: 100_000,
        }
    }
}

impl GateConfig {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self {
            environment: Environment::Authoritative,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.max_condition_depth == 0 {
            return Err(GateError::InvalidConfig {
                message: "max_condition_depth must be > 0".into(),
            });
        }
        if self.max_scan_rows == 0 {
            return Err(GateError::InvalidConfig {
                message: "max_scan_rows must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Environment, GateConfig};
    use crate::check::Strategy;

    #[test]
    fn profiles_pick_environment() {
        assert_eq!(GateConfig::client().environment, Environment::Client);
        assert!(GateConfig::server().environment.is_authoritative());
        assert_eq!(
            GateConfig::server()
                .with_strategy(Strategy::OptimisticDeny)
                .default_strategy,
            Strategy::OptimisticDeny
        );
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let config = GateConfig {
            max_condition_depth: 0,
            ..GateConfig::default()
        };
        let err = config.validate().expect_err("invalid");
        assert_eq!(err.code_str(), "invalid_config");
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn environment_serializes_kebab_case() {
        let encoded = serde_json::to_string(&Environment::Authoritative).expect("encode");
        assert_eq!(encoded, "\"authoritative\"");
    }
}
