use crate::catalog::schema::TableSchema;
use crate::catalog::types::Row;
use crate::query::error::QueryError;
use crate::query::operators::{
    FilterOperator, LimitOperator, Operator, ScanOperator, compile_expr,
};
use crate::query::plan::{Expr, Order, Query};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_examined: usize,
}

pub type QueryFut<'a> = Pin<Box<dyn Future<Output = Result<QueryResult, QueryError>> + Send + 'a>>;
pub type ExistsFut<'a> = Pin<Box<dyn Future<Output = Result<bool, QueryError>> + Send + 'a>>;

/// Runs composed queries. Implemented by the local cache on a client and by
/// the database on the authoritative side.
pub trait QueryExecutor: Send + Sync {
    fn execute<'a>(&'a self, query: &'a Query) -> QueryFut<'a>;

    /// True when the query yields at least one row.
    fn exists<'a>(&'a self, query: &'a Query) -> ExistsFut<'a> {
        Box::pin(async move { Ok(!self.execute(query).await?.rows.is_empty()) })
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

/// In-memory tables evaluated with the compiled condition operators.
#[derive(Debug)]
pub struct MemoryExecutor {
    tables: RwLock<HashMap<String, MemoryTable>>,
    max_scan_rows: usize,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl MemoryExecutor {
    pub fn new(max_scan_rows: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            max_scan_rows,
        }
    }

    pub fn create_table(&self, schema: TableSchema) {
        self.tables.write().insert(
            schema.table_name.clone(),
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    pub fn insert(&self, table: &str, row: Row) -> Result<(), QueryError> {
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| QueryError::TableNotFound {
                table: table.to_string(),
            })?;
        if row.values.len() != entry.schema.columns.len() {
            return Err(QueryError::InvalidQuery {
                reason: format!(
                    "row has {} values but table '{table}' has {} columns",
                    row.values.len(),
                    entry.schema.columns.len()
                ),
            });
        }
        entry.rows.push(row);
        Ok(())
    }

    pub fn insert_named(
        &self,
        table: &str,
        values: &BTreeMap<String, crate::catalog::types::Value>,
    ) -> Result<(), QueryError> {
        let row = {
            let tables = self.tables.read();
            let entry = tables.get(table).ok_or_else(|| QueryError::TableNotFound {
                table: table.to_string(),
            })?;
            entry
                .schema
                .row_from_map(values)
                .map_err(|e| QueryError::InvalidQuery {
                    reason: e.to_string(),
                })?
        };
        self.insert(table, row)
    }

    pub fn clear(&self, table: &str) {
        if let Some(entry) = self.tables.write().get_mut(table) {
            entry.rows.clear();
        }
    }

    /// Synchronous execution; the async [`QueryExecutor`] impl delegates here.
    pub fn execute_now(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let (schema, rows) = {
            let tables = self.tables.read();
            let entry = tables
                .get(&query.table)
                .ok_or_else(|| QueryError::TableNotFound {
                    table: query.table.clone(),
                })?;
            (entry.schema.clone(), entry.rows.clone())
        };
        let columns = schema.column_names();
        let predicate = query.predicate.clone().unwrap_or_else(Expr::always_true);
        let compiled = compile_expr(&predicate, &columns, &query.table)?;

        let mut rows = rows;
        if !query.order_by.is_empty() {
            let mut order = Vec::with_capacity(query.order_by.len());
            for (column, direction) in &query.order_by {
                let idx = schema
                    .column_index(column)
                    .ok_or_else(|| QueryError::ColumnNotFound {
                        table: query.table.clone(),
                        column: column.clone(),
                    })?;
                order.push((idx, *direction));
            }
            rows.sort_by(|a, b| {
                for (idx, direction) in &order {
                    let cmp = a.values[*idx].cmp(&b.values[*idx]);
                    let cmp = match direction {
                        Order::Asc => cmp,
                        Order::Desc => cmp.reverse(),
                    };
                    if !cmp.is_eq() {
                        return cmp;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let scan: Box<dyn Operator + Send> = Box::new(ScanOperator::new(rows));
        let mut op: Box<dyn Operator + Send> = Box::new(FilterOperator::new(scan, compiled));
        if let Some(limit) = query.limit {
            op = Box::new(LimitOperator::new(op, limit));
        }

        let projection = projection_indexes(&schema, &query.select, &query.table)?;
        let mut out = Vec::new();
        loop {
            let next = op.next();
            if op.rows_examined() > self.max_scan_rows {
                return Err(QueryError::ScanBoundExceeded {
                    scanned_rows: op.rows_examined() as u64,
                    max_scan_rows: self.max_scan_rows as u64,
                });
            }
            let Some(row) = next else {
                break;
            };
            out.push(match &projection {
                Some(indexes) => Row::from_values(
                    indexes.iter().map(|idx| row.values[*idx].clone()).collect(),
                ),
                None => row,
            });
        }
        Ok(QueryResult {
            rows: out,
            rows_examined: op.rows_examined(),
        })
    }
}

fn projection_indexes(
    schema: &TableSchema,
    select: &[String],
    table: &str,
) -> Result<Option<Vec<usize>>, QueryError> {
    if select.is_empty() || select.iter().any(|c| c == "*") {
        return Ok(None);
    }
    select
        .iter()
        .map(|column| {
            schema
                .column_index(column)
                .ok_or_else(|| QueryError::ColumnNotFound {
                    table: table.to_string(),
                    column: column.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

impl QueryExecutor for MemoryExecutor {
    fn execute<'a>(&'a self, query: &'a Query) -> QueryFut<'a> {
        Box::pin(async move { self.execute_now(query) })
    }
}
