pub mod schema;
pub mod types;

use crate::catalog::schema::TableSchema;
use crate::error::GateError;
use crate::predicate::WherePredicate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One table's authorization rule together with the schema it applies to.
#[derive(Debug, Clone)]
pub struct RegisteredRule {
    pub schema: TableSchema,
    pub predicate: WherePredicate,
}

impl RegisteredRule {
    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }
}

/// Table name → authorization rule.
///
/// Rules are created once at startup and live as long as the registry.
/// Lookups hand out `Arc`s so a check in flight keeps the rule it started
/// with even if the table's rule is replaced concurrently.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, Arc<RegisteredRule>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: TableSchema, predicate: WherePredicate) -> Result<(), GateError> {
        validate_rule_table(&schema, &predicate)?;
        let mut rules = self.rules.write();
        if rules.contains_key(&schema.table_name) {
            return Err(GateError::AlreadyRegistered {
                table: schema.table_name,
            });
        }
        tracing::info!(
            table = %schema.table_name,
            server_only = predicate.is_server_only(),
            "registered authorization rule"
        );
        rules.insert(
            schema.table_name.clone(),
            Arc::new(RegisteredRule { schema, predicate }),
        );
        Ok(())
    }

    /// Installs a rule, returning the one it replaced.
    pub fn replace(
        &self,
        schema: TableSchema,
        predicate: WherePredicate,
    ) -> Result<Option<Arc<RegisteredRule>>, GateError> {
        validate_rule_table(&schema, &predicate)?;
        let previous = self.rules.write().insert(
            schema.table_name.clone(),
            Arc::new(RegisteredRule { schema, predicate }),
        );
        if let Some(previous) = &previous {
            tracing::info!(table = previous.table_name(), "replaced authorization rule");
        }
        Ok(previous)
    }

    pub fn remove(&self, table: &str) -> bool {
        let removed = self.rules.write().remove(table).is_some();
        if removed {
            tracing::info!(table, "removed authorization rule");
        }
        removed
    }

    pub fn rule(&self, table: &str) -> Option<Arc<RegisteredRule>> {
        self.rules.read().get(table).cloned()
    }

    /// Like [`RuleRegistry::rule`], but a missing rule is an error.
    pub fn require(&self, table: &str) -> Result<Arc<RegisteredRule>, GateError> {
        self.rule(table).ok_or_else(|| GateError::UnregisteredRule {
            table: table.to_string(),
        })
    }

    pub fn contains(&self, table: &str) -> bool {
        self.rules.read().contains_key(table)
    }

    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.rules.read().keys().cloned().collect();
        tables.sort();
        tables
    }
}

fn validate_rule_table(schema: &TableSchema, predicate: &WherePredicate) -> Result<(), GateError> {
    match predicate.table_name() {
        Some(table) if table != schema.table_name => Err(GateError::Validation(format!(
            "rule for table '{table}' cannot govern table '{}'",
            schema.table_name
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::RuleRegistry;
    use crate::catalog::schema::{ColumnDef, TableSchema};
    use crate::catalog::types::ColumnType;
    use crate::predicate::{server_where, where_ad_hoc};

    fn schema(table: &str) -> TableSchema {
        TableSchema::new(table, vec![ColumnDef::new("id", ColumnType::Text)], &["id"])
            .expect("schema")
    }

    #[test]
    fn register_and_lookup() {
        let registry = RuleRegistry::new();
        registry
            .register(schema("issue"), server_where("issue", |_, _| Ok(true.into())))
            .expect("register");
        assert!(registry.contains("issue"));
        assert_eq!(registry.rule("issue").expect("rule").table_name(), "issue");
        assert_eq!(
            registry.require("widget").expect_err("missing").code_str(),
            "unregistered_rule"
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = RuleRegistry::new();
        registry
            .register(schema("issue"), where_ad_hoc(|_, _| Ok(true.into())))
            .expect("register");
        let err = registry
            .register(schema("issue"), where_ad_hoc(|_, _| Ok(false.into())))
            .expect_err("duplicate");
        assert_eq!(err.code_str(), "already_registered");
    }

    #[test]
    fn mismatched_table_tag_is_rejected() {
        let registry = RuleRegistry::new();
        let err = registry
            .register(schema("issue"), server_where("comment", |_, _| Ok(true.into())))
            .expect_err("mismatch");
        assert_eq!(err.code_str(), "validation");
        assert!(!registry.contains("issue"));
    }

    #[test]
    fn replace_and_remove() {
        let registry = RuleRegistry::new();
        let first = registry
            .replace(schema("issue"), where_ad_hoc(|_, _| Ok(true.into())))
            .expect("insert");
        assert!(first.is_none());
        let second = registry
            .replace(schema("issue"), where_ad_hoc(|_, _| Ok(false.into())))
            .expect("replace");
        assert!(second.is_some());
        assert_eq!(registry.tables(), vec!["issue".to_string()]);
        assert!(registry.remove("issue"));
        assert!(!registry.remove("issue"));
    }
}
