use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    TableNotFound { table: String },
    ColumnNotFound { table: String, column: String },
    ScanBoundExceeded { scanned_rows: u64, max_scan_rows: u64 },
    InvalidQuery { reason: String },
    Unavailable { reason: String },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::TableNotFound { table } => write!(f, "table '{table}' not found"),
            QueryError::ColumnNotFound { table, column } => {
                write!(f, "column '{column}' not found in table '{table}'")
            }
            QueryError::ScanBoundExceeded {
                scanned_rows,
                max_scan_rows,
            } => write!(
                f,
                "scan bound exceeded: scanned_rows={scanned_rows}, max_scan_rows={max_scan_rows}"
            ),
            QueryError::InvalidQuery { reason } => write!(f, "invalid query: {reason}"),
            QueryError::Unavailable { reason } => write!(f, "query executor unavailable: {reason}"),
        }
    }
}

impl std::error::Error for QueryError {}
