//! Per-table permission checks with optimistic client evaluation.

use crate::catalog::schema::TableSchema;
use crate::catalog::types::Value;
use crate::catalog::{RegisteredRule, RuleRegistry};
use crate::config::Environment;
use crate::context::{
    IdentityCarrier, ScopedIdentity, mutation_store, query_store, resolve_identity,
    resolve_scoped_identity,
};
use crate::error::GateError;
use crate::permission::AuthData;
use crate::predicate::{PermissionEvalGuard, eval_raw_predicate};
use crate::query::builder::WhereBuilder;
use crate::query::plan::{Expr, Query};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How a client guesses a permission before the authoritative answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Evaluate the raw rule locally, server-only parts included.
    #[default]
    Optimistic,
    /// Show "denied" until the server says otherwise.
    OptimisticDeny,
    /// Show "allowed" until the server says otherwise; the rule is not run.
    OptimisticAllow,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Optimistic => "optimistic",
            Strategy::OptimisticDeny => "optimistic-deny",
            Strategy::OptimisticAllow => "optimistic-allow",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimistic" => Ok(Strategy::Optimistic),
            "optimistic-deny" => Ok(Strategy::OptimisticDeny),
            "optimistic-allow" => Ok(Strategy::OptimisticAllow),
            other => Err(GateError::Validation(format!(
                "unknown permission strategy '{other}'"
            ))),
        }
    }
}

/// Row a permission check is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Primary key value of a single-column key.
    Id(Value),
    /// Partial row holding at least every primary key column.
    Row(BTreeMap<String, Value>),
}

impl Target {
    pub fn id(value: impl Into<Value>) -> Self {
        Target::Id(value.into())
    }

    fn key_condition(&self, schema: &TableSchema) -> Result<Expr, GateError> {
        match self {
            Target::Id(value) => match schema.primary_key.as_slice() {
                [pk] => Ok(Expr::Eq(pk.clone(), value.clone())),
                _ => Err(GateError::Validation(format!(
                    "table '{}' has a composite primary key; target must be a row",
                    schema.table_name
                ))),
            },
            Target::Row(values) => {
                let mut key: Option<Expr> = None;
                for pk in &schema.primary_key {
                    let value = values.get(pk).ok_or_else(|| {
                        GateError::Validation(format!(
                            "target row for '{}' is missing primary key column '{pk}'",
                            schema.table_name
                        ))
                    })?;
                    let eq = Expr::Eq(pk.clone(), value.clone());
                    key = Some(match key {
                        Some(existing) => existing.and(eq),
                        None => eq,
                    });
                }
                key.ok_or_else(|| {
                    GateError::Validation(format!(
                        "table '{}' has no primary key",
                        schema.table_name
                    ))
                })
            }
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::Id(Value::from(value))
    }
}

impl From<i64> for Target {
    fn from(value: i64) -> Self {
        Target::Id(Value::Integer(value))
    }
}

/// Permission predicate for one table.
///
/// The rule is looked up on every call, so building a check for a table that
/// has no rule succeeds and only invoking it fails.
#[derive(Debug, Clone)]
pub struct PermissionCheck {
    registry: Arc<RuleRegistry>,
    table: String,
    strategy: Strategy,
}

pub fn build_permission_check(
    registry: &Arc<RuleRegistry>,
    table: &str,
    strategy: Strategy,
) -> PermissionCheck {
    PermissionCheck {
        registry: Arc::clone(registry),
        table: table.to_string(),
        strategy,
    }
}

impl PermissionCheck {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Gate condition for the current caller.
    ///
    /// Client builders use [`resolve_identity`]; authoritative builders use
    /// [`authoritative_identity`] and fail when identity was not propagated.
    pub fn condition(
        &self,
        eb: &WhereBuilder,
        target: Option<&Target>,
    ) -> Result<Expr, GateError> {
        let rule = self.registry.require(&self.table)?;
        let auth = caller_for(eb)?;
        self.condition_with(&rule, eb, auth.as_ref(), target)
    }

    /// Gate condition as the server computes it, whatever `eb`'s environment.
    pub fn authoritative_condition(
        &self,
        eb: &WhereBuilder,
        target: Option<&Target>,
    ) -> Result<Expr, GateError> {
        self.condition(&eb.in_environment(Environment::Authoritative), target)
    }

    /// Gate condition for an explicit identity.
    pub fn condition_for(
        &self,
        eb: &WhereBuilder,
        auth: Option<&AuthData>,
        target: Option<&Target>,
    ) -> Result<Expr, GateError> {
        let rule = self.registry.require(&self.table)?;
        self.condition_with(&rule, eb, auth, target)
    }

    /// Single-row existence query: the target's key AND the gate condition.
    pub fn query(&self, eb: &WhereBuilder, target: Option<&Target>) -> Result<Query, GateError> {
        let rule = self.registry.require(&self.table)?;
        let auth = caller_for(eb)?;
        self.query_with(&rule, eb, auth.as_ref(), target)
    }

    pub fn query_for(
        &self,
        eb: &WhereBuilder,
        auth: Option<&AuthData>,
        target: Option<&Target>,
    ) -> Result<Query, GateError> {
        let rule = self.registry.require(&self.table)?;
        self.query_with(&rule, eb, auth, target)
    }

    fn condition_with(
        &self,
        rule: &RegisteredRule,
        eb: &WhereBuilder,
        auth: Option<&AuthData>,
        target: Option<&Target>,
    ) -> Result<Expr, GateError> {
        if target.is_none() {
            return Ok(Expr::always_false());
        }
        self.gate(rule, eb, auth)
    }

    fn query_with(
        &self,
        rule: &RegisteredRule,
        eb: &WhereBuilder,
        auth: Option<&AuthData>,
        target: Option<&Target>,
    ) -> Result<Query, GateError> {
        let base = Query::select(&["*"]).from(&self.table).limit(1);
        let Some(target) = target else {
            return Ok(base.where_(Expr::always_false()));
        };
        let key = target.key_condition(&rule.schema)?;
        let gate = self.gate(rule, eb, auth)?;
        Ok(base.where_(key).and_where(gate))
    }

    fn gate(
        &self,
        rule: &RegisteredRule,
        eb: &WhereBuilder,
        auth: Option<&AuthData>,
    ) -> Result<Expr, GateError> {
        if eb.environment().is_authoritative() {
            return rule.predicate.eval(eb, auth);
        }
        match self.strategy {
            Strategy::Optimistic => {
                let _guard = PermissionEvalGuard::enter();
                let raw = rule.predicate.raw();
                eval_raw_predicate(&raw, rule.table_name(), eb, auth)
            }
            Strategy::OptimisticDeny => {
                tracing::trace!(table = %self.table, "optimistic-deny permission guess");
                Ok(Expr::always_false())
            }
            Strategy::OptimisticAllow => {
                tracing::trace!(table = %self.table, "optimistic-allow permission guess");
                Ok(Expr::always_true())
            }
        }
    }
}

fn caller_for(eb: &WhereBuilder) -> Result<Option<AuthData>, GateError> {
    if eb.environment().is_authoritative() {
        authoritative_identity()
    } else {
        Ok(resolve_identity())
    }
}

/// Caller identity for authoritative evaluation: mutation context, then
/// query context, then an auth-only scope.
///
/// Fails closed with [`GateError::IdentityUnknown`] when none reached this
/// task, instead of treating the caller as anonymous.
pub fn authoritative_identity() -> Result<Option<AuthData>, GateError> {
    if let Some(auth) = mutation_store().with(|ctx| ctx.auth().cloned()) {
        return Ok(auth);
    }
    if let Some(auth) = query_store().with(|ctx| ctx.auth().cloned()) {
        return Ok(auth);
    }
    match resolve_scoped_identity() {
        ScopedIdentity::Known(auth) => Ok(auth),
        ScopedIdentity::Unknown => {
            tracing::warn!("authoritative permission check without a propagated identity");
            Err(GateError::IdentityUnknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Strategy, Target, build_permission_check};
    use crate::catalog::RuleRegistry;
    use crate::catalog::schema::{ColumnDef, TableSchema};
    use crate::catalog::types::{ColumnType, Value};
    use crate::config::Environment;
    use crate::context::{MutationContext, run_with_mutation_context_sync};
    use crate::permission::AuthData;
    use crate::predicate::server_where;
    use crate::query::builder::WhereBuilder;
    use crate::query::plan::Expr;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn registry() -> Arc<RuleRegistry> {
        let registry = Arc::new(RuleRegistry::new());
        registry
            .register(
                TableSchema::new(
                    "member",
                    vec![
                        ColumnDef::new("org", ColumnType::Text),
                        ColumnDef::new("user", ColumnType::Text),
                    ],
                    &["org", "user"],
                )
                .expect("schema"),
                server_where("member", |eb, auth| Ok(eb.owned_by("user", auth).into())),
            )
            .expect("register");
        registry
    }

    #[test]
    fn strategy_parses_kebab_names() {
        for strategy in [
            Strategy::Optimistic,
            Strategy::OptimisticDeny,
            Strategy::OptimisticAllow,
        ] {
            assert_eq!(strategy.as_str().parse::<Strategy>().expect("parse"), strategy);
        }
        assert!("pessimistic".parse::<Strategy>().is_err());
    }

    #[test]
    fn composite_keys_need_row_targets() {
        let check = build_permission_check(&registry(), "member", Strategy::Optimistic);
        let eb = WhereBuilder::new("member", Environment::Client);
        let auth = AuthData::new("u1");
        let err = check
            .query_for(&eb, Some(&auth), Some(&Target::id("acme")))
            .expect_err("composite");
        assert_eq!(err.code_str(), "validation");

        let mut row = BTreeMap::new();
        row.insert("org".to_string(), Value::from("acme"));
        row.insert("user".to_string(), Value::from("u1"));
        let query = check
            .query_for(&eb, Some(&auth), Some(&Target::Row(row)))
            .expect("query");
        assert_eq!(
            query.predicate,
            Some(
                Expr::Eq("org".into(), Value::from("acme"))
                    .and(Expr::Eq("user".into(), Value::from("u1")))
                    .and(Expr::Eq("user".into(), Value::from("u1")))
            )
        );
        assert!(query.is_single_row());
    }

    #[test]
    fn caller_paths_report_unregistered_before_identity() {
        let check = build_permission_check(&registry(), "widget", Strategy::Optimistic);
        let eb = WhereBuilder::new("widget", Environment::Authoritative);
        let target = Target::id("w1");
        assert_eq!(
            check.condition(&eb, Some(&target)).expect_err("condition").code_str(),
            "unregistered_rule"
        );
        assert_eq!(
            check.query(&eb, Some(&target)).expect_err("query").code_str(),
            "unregistered_rule"
        );

        let check = build_permission_check(&registry(), "member", Strategy::Optimistic);
        let eb = WhereBuilder::new("member", Environment::Authoritative);
        assert_eq!(
            check.query(&eb, None).expect_err("no identity").code_str(),
            "identity_unknown"
        );
    }

    #[test]
    fn missing_target_query_matches_nothing() {
        let check = build_permission_check(&registry(), "member", Strategy::OptimisticAllow);
        let eb = WhereBuilder::new("member", Environment::Client);
        let query = check.query_for(&eb, None, None).expect("query");
        assert!(query.predicate.expect("predicate").is_always_false());
    }

    #[test]
    fn authoritative_condition_needs_a_propagated_identity() {
        let registry = registry();
        let eb = WhereBuilder::new("member", Environment::Client);
        let mut row = BTreeMap::new();
        row.insert("org".to_string(), Value::from("acme"));
        row.insert("user".to_string(), Value::from("u1"));
        let target = Target::Row(row);

        let unregistered = build_permission_check(&registry, "widget", Strategy::Optimistic);
        assert_eq!(
            unregistered
                .authoritative_condition(&eb, Some(&target))
                .expect_err("unregistered")
                .code_str(),
            "unregistered_rule"
        );

        let check = build_permission_check(&registry, "member", Strategy::OptimisticDeny);
        assert_eq!(
            check
                .authoritative_condition(&eb, Some(&target))
                .expect_err("no identity")
                .code_str(),
            "identity_unknown"
        );

        let context = MutationContext::new(Some(AuthData::new("u1")), Environment::Client);
        let cond = run_with_mutation_context_sync(context, || {
            check.authoritative_condition(&eb, Some(&target))
        })
        .expect("with identity");
        assert_eq!(cond, Expr::Eq("user".into(), Value::from("u1")));
    }
}
