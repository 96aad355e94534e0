use crate::catalog::types::Value;
use crate::config::Environment;
use crate::permission::AuthData;
use crate::query::plan::{CmpOp, DEFAULT_MAX_EXPR_DEPTH, Expr};

/// Condition builder handed to predicates ("eb").
///
/// Carries the table the condition applies to and the environment it is
/// evaluated in, so wrapped predicates can decide whether to short-circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereBuilder {
    table: String,
    environment: Environment,
    max_depth: usize,
}

impl WhereBuilder {
    pub fn new(table: impl Into<String>, environment: Environment) -> Self {
        Self {
            table: table.into(),
            environment,
            max_depth: DEFAULT_MAX_EXPR_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Same table, evaluated on the other side of the client/server split.
    pub fn in_environment(&self, environment: Environment) -> Self {
        Self {
            environment,
            ..self.clone()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn cmp(&self, column: &str, value: impl Into<Value>) -> Expr {
        self.cmp_op(column, CmpOp::Eq, value)
    }

    pub fn cmp_op(&self, column: &str, op: CmpOp, value: impl Into<Value>) -> Expr {
        let column = column.to_string();
        let value = value.into();
        match op {
            CmpOp::Eq => Expr::Eq(column, value),
            CmpOp::Ne => Expr::Ne(column, value),
            CmpOp::Lt => Expr::Lt(column, value),
            CmpOp::Lte => Expr::Lte(column, value),
            CmpOp::Gt => Expr::Gt(column, value),
            CmpOp::Gte => Expr::Gte(column, value),
        }
    }

    pub fn cmp_lit(&self, lhs: impl Into<Value>, op: CmpOp, rhs: impl Into<Value>) -> Expr {
        Expr::Lit(lhs.into(), op, rhs.into())
    }

    /// Conjunction; an empty list is always true.
    pub fn and(&self, conditions: impl IntoIterator<Item = Expr>) -> Expr {
        conditions
            .into_iter()
            .reduce(Expr::and)
            .unwrap_or_else(Expr::always_true)
    }

    /// Disjunction; an empty list is always false.
    pub fn or(&self, conditions: impl IntoIterator<Item = Expr>) -> Expr {
        conditions
            .into_iter()
            .reduce(Expr::or)
            .unwrap_or_else(Expr::always_false)
    }

    pub fn not(&self, condition: Expr) -> Expr {
        condition.not()
    }

    pub fn is_null(&self, column: &str) -> Expr {
        Expr::IsNull(column.to_string())
    }

    pub fn is_not_null(&self, column: &str) -> Expr {
        Expr::IsNotNull(column.to_string())
    }

    pub fn in_list(&self, column: &str, values: impl IntoIterator<Item = Value>) -> Expr {
        Expr::In(column.to_string(), values.into_iter().collect())
    }

    pub fn like(&self, column: &str, pattern: &str) -> Expr {
        Expr::Like(column.to_string(), pattern.to_string())
    }

    /// `column = auth.id`, or never when nobody is logged in.
    pub fn owned_by(&self, column: &str, auth: Option<&AuthData>) -> Expr {
        match auth {
            Some(auth) => self.cmp(column, auth.id.as_str()),
            None => Expr::always_false(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WhereBuilder;
    use crate::catalog::types::Value;
    use crate::config::Environment;
    use crate::permission::AuthData;
    use crate::query::plan::{CmpOp, Expr};

    fn eb() -> WhereBuilder {
        WhereBuilder::new("issue", Environment::Client)
    }

    #[test]
    fn empty_conjunction_and_disjunction() {
        assert!(eb().and(Vec::<Expr>::new()).is_always_true());
        assert!(eb().or(Vec::<Expr>::new()).is_always_false());
    }

    #[test]
    fn cmp_op_maps_to_comparison_variants() {
        assert_eq!(
            eb().cmp_op("rank", CmpOp::Gte, 3i64),
            Expr::Gte("rank".into(), Value::Integer(3))
        );
        assert_eq!(eb().cmp("id", "7"), Expr::Eq("id".into(), Value::from("7")));
    }

    #[test]
    fn owned_by_fails_closed_without_identity() {
        assert!(eb().owned_by("owner", None).is_always_false());
        assert_eq!(
            eb().owned_by("owner", Some(&AuthData::new("u1"))),
            Expr::Eq("owner".into(), Value::from("u1"))
        );
    }

    #[test]
    fn in_environment_keeps_table() {
        let server = eb().in_environment(Environment::Authoritative);
        assert_eq!(server.table(), "issue");
        assert!(server.environment().is_authoritative());
    }
}
