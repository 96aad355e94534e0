use crate::catalog::types::Value;
use crate::error::GateError;
use serde::{Deserialize, Serialize};

/// Default maximum nesting depth for conditions produced by predicates.
pub const DEFAULT_MAX_EXPR_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering.is_eq(),
            CmpOp::Ne => !ordering.is_eq(),
            CmpOp::Lt => ordering.is_lt(),
            CmpOp::Lte => ordering.is_le(),
            CmpOp::Gt => ordering.is_gt(),
            CmpOp::Gte => ordering.is_ge(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    Between(String, Value, Value),
    IsNull(String),
    IsNotNull(String),
    Like(String, String),
    /// Comparison between two literals. The condition algebra has no boolean
    /// constant, so `1 = 1` and `1 = 0` stand in for true and false.
    Lit(Value, CmpOp, Value),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn always_true() -> Expr {
        Expr::Lit(Value::Integer(1), CmpOp::Eq, Value::Integer(1))
    }

    pub fn always_false() -> Expr {
        Expr::Lit(Value::Integer(1), CmpOp::Eq, Value::Integer(0))
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Folds the expression to a constant when it does not reference any
    /// column. Returns `None` when the outcome depends on row data.
    pub fn constant_value(&self) -> Option<bool> {
        match self {
            Expr::Lit(lhs, op, rhs) => Some(compare_literals(lhs, *op, rhs)),
            Expr::Not(inner) => inner.constant_value().map(|v| !v),
            Expr::And(lhs, rhs) => match (lhs.constant_value(), rhs.constant_value()) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Expr::Or(lhs, rhs) => match (lhs.constant_value(), rhs.constant_value()) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_always_true(&self) -> bool {
        self.constant_value() == Some(true)
    }

    pub fn is_always_false(&self) -> bool {
        self.constant_value() == Some(false)
    }

    /// Calculates the maximum nesting depth of this expression tree.
    pub fn depth(&self) -> usize {
        match self {
            Expr::Eq(_, _)
            | Expr::Ne(_, _)
            | Expr::Lt(_, _)
            | Expr::Lte(_, _)
            | Expr::Gt(_, _)
            | Expr::Gte(_, _)
            | Expr::In(_, _)
            | Expr::Between(_, _, _)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_)
            | Expr::Like(_, _)
            | Expr::Lit(_, _, _) => 1,
            Expr::Not(inner) => 1 + inner.depth(),
            Expr::And(left, right) | Expr::Or(left, right) => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn validate_depth(&self, max_depth: usize) -> Result<(), GateError> {
        let depth = self.depth();
        if depth > max_depth {
            return Err(GateError::Validation(format!(
                "expression depth {depth} exceeds maximum allowed depth of {max_depth}"
            )));
        }
        Ok(())
    }
}

pub(crate) fn compare_literals(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    crate::query::operators::compare_values(lhs, rhs).is_some_and(|o| op.holds(o))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<String>,
    pub table: String,
    pub predicate: Option<Expr>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn select(cols: &[&str]) -> Self {
        Self {
            select: cols.iter().map(|s| s.to_string()).collect(),
            table: String::new(),
            predicate: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn from(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.predicate = Some(expr);
        self
    }

    /// Adds `expr` to the existing predicate with AND.
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, col: &str, order: Order) -> Self {
        self.order_by.push((col.to_string(), order));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn is_single_row(&self) -> bool {
        self.limit == Some(1)
    }
}
