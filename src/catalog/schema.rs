use crate::catalog::types::{ColumnType, Row, Value};
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnDef>,
        primary_key: &[&str],
    ) -> Result<Self, GateError> {
        let schema = Self {
            table_name: table_name.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        };
        if schema.primary_key.is_empty() {
            return Err(GateError::Validation(format!(
                "table '{}' must declare a primary key",
                schema.table_name
            )));
        }
        for pk in &schema.primary_key {
            if schema.column_index(pk).is_none() {
                return Err(GateError::UnknownColumn {
                    table: schema.table_name.clone(),
                    column: pk.clone(),
                });
            }
        }
        Ok(schema)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    /// Builds a row from named values; missing columns become `Null`.
    pub fn row_from_map(&self, values: &BTreeMap<String, Value>) -> Result<Row, GateError> {
        for name in values.keys() {
            if self.column_index(name).is_none() {
                return Err(GateError::UnknownColumn {
                    table: self.table_name.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(Row::from_values(
            self.columns
                .iter()
                .map(|c| values.get(&c.name).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }
}
