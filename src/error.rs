// ABOUTME: Typed errors for the sync core
// ABOUTME: Separates chunk-level skips from fatal schema and encoding problems

use thiserror::Error;

/// Errors the sync core distinguishes so callers can pick fail-fast or skip.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source and sink rows (or schemas) cannot be aligned column by column.
    #[error("mismatch table definition {table}: {detail}")]
    ShapeMismatch { table: String, detail: String },

    /// A column type the literal encoder cannot format.
    #[error("unsupported SQL type {type_name} for column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },

    /// Every table handled by sqlmirror must have a primary key.
    #[error("table {0} must have a primary key, tables without one cannot be synced")]
    MissingPrimaryKey(String),

    /// A primary key value that is not an integer where one is required.
    #[error("primary key value {value:?} in table {table} is not an integer")]
    InvalidKey { table: String, value: String },

    /// The connection could not be (re)established.
    #[error("connection to {name} failed: {reason}")]
    Connection { name: String, reason: String },
}

impl SyncError {
    /// Chunk-level problems are skipped with a warning, everything else is fatal.
    pub fn is_skippable(&self) -> bool {
        matches!(self, SyncError::ShapeMismatch { .. } | SyncError::InvalidKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_is_skippable() {
        let err = SyncError::ShapeMismatch {
            table: "orders".to_string(),
            detail: "column total missing in sink".to_string(),
        };
        assert!(err.is_skippable());
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_unsupported_type_is_fatal() {
        let err = SyncError::UnsupportedType {
            table: "files".to_string(),
            column: "blob".to_string(),
            type_name: "bytea".to_string(),
        };
        assert!(!err.is_skippable());
        assert_eq!(
            err.to_string(),
            "unsupported SQL type bytea for column files.blob"
        );
    }
}
