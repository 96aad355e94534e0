pub mod catalog;
pub mod check;
pub mod config;
pub mod context;
pub mod error;
pub mod permission;
pub mod predicate;
pub mod query;
pub mod status;
pub mod sync_bridge;

use crate::catalog::RuleRegistry;
use crate::catalog::schema::TableSchema;
use crate::check::{PermissionCheck, Strategy, Target, build_permission_check};
use crate::config::GateConfig;
use crate::context::{
    MutationContext, QueryContext, run_with_mutation_context, run_with_query_context,
};
use crate::error::GateError;
use crate::permission::AuthData;
use crate::predicate::WherePredicate;
use crate::query::builder::WhereBuilder;
use crate::query::executor::{MemoryExecutor, QueryExecutor};
use crate::query::plan::Expr;
use crate::status::{LocalAuthority, PermissionWatch};
use std::future::Future;
use std::sync::Arc;

pub use crate::context::{
    resolve_identity, resolve_scoped_identity, run_with_auth_scope, spawn_detached,
};
pub use crate::predicate::{
    get_raw_predicate, get_table_name, server_where, where_ad_hoc, where_for_table,
};

/// Entry point tying configuration, the rule registry and the context
/// stores together for one side of the client/server split.
pub struct Gate {
    config: GateConfig,
    registry: Arc<RuleRegistry>,
}

impl Gate {
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        Self::with_registry(config, Arc::new(RuleRegistry::new()))
    }

    /// Shares an existing registry, e.g. the same rules on client and server.
    pub fn with_registry(config: GateConfig, registry: Arc<RuleRegistry>) -> Result<Self, GateError> {
        config.validate()?;
        tracing::info!(
            environment = ?config.environment,
            default_strategy = %config.default_strategy,
            "gate initialized"
        );
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn builder(&self, table: &str) -> WhereBuilder {
        WhereBuilder::new(table, self.config.environment)
            .with_max_depth(self.config.max_condition_depth)
    }

    pub fn register_rule(
        &self,
        schema: TableSchema,
        predicate: WherePredicate,
    ) -> Result<(), GateError> {
        self.registry.register(schema, predicate)
    }

    pub fn permission_check(&self, table: &str) -> PermissionCheck {
        self.permission_check_with(table, self.config.default_strategy)
    }

    pub fn permission_check_with(&self, table: &str, strategy: Strategy) -> PermissionCheck {
        build_permission_check(&self.registry, table, strategy)
    }

    /// Gate condition of `table`'s permission check for the current caller.
    pub fn can(&self, table: &str, target: Option<&Target>) -> Result<Expr, GateError> {
        self.permission_check(table)
            .condition(&self.builder(table), target)
    }

    /// Evaluates an arbitrary wrapped predicate for the current caller.
    pub fn evaluate(&self, table: &str, predicate: &WherePredicate) -> Result<Expr, GateError> {
        predicate.eval_current(&self.builder(table))
    }

    pub fn watch(&self, table: &str) -> PermissionWatch {
        PermissionWatch::new(self.permission_check(table))
            .with_max_condition_depth(self.config.max_condition_depth)
    }

    /// In-memory executor bounded by the configured scan limit.
    pub fn memory_executor(&self) -> MemoryExecutor {
        MemoryExecutor::new(self.config.max_scan_rows)
    }

    pub fn local_authority(&self, executor: Arc<dyn QueryExecutor>) -> LocalAuthority {
        LocalAuthority::new(Arc::clone(&self.registry), executor)
            .with_max_condition_depth(self.config.max_condition_depth)
    }

    /// Runs a mutation handler with `auth` as its caller.
    pub async fn run_mutation<F>(&self, auth: Option<AuthData>, handler: F) -> F::Output
    where
        F: Future,
    {
        let context = MutationContext::new(auth, self.config.environment);
        run_with_mutation_context(context, handler).await
    }

    /// Runs a query handler with `auth` as its caller.
    pub async fn run_query<F>(&self, auth: Option<AuthData>, handler: F) -> F::Output
    where
        F: Future,
    {
        run_with_query_context(QueryContext::new(auth), handler).await
    }
}
