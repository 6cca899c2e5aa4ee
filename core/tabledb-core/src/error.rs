//! Error types for the TableDB engine.
//!
//! All public APIs return `TdbResult<T>`; no panics in library code.

use thiserror::Error;

/// Unified error type for all TableDB operations.
#[derive(Debug, Error)]
pub enum TdbError {
    /// Table, database, file or commit absent
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Duplicate table, database or commit
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Statement could not be parsed or is not valid for the target
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// Column is not declared in the table schema
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Primary-key uniqueness violated
    #[error("duplicate primary key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    /// Acting user lacks the permission for this operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Clone/push by a user that is not a child of the owner, or bad credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Statement needs a database but none is selected
    #[error("no database selected")]
    NoDatabaseSelected,

    /// Database directory does not exist
    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    /// Stored document is malformed
    #[error("corrupt document {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Disk, lock or transport failure
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all TableDB operations.
pub type TdbResult<T> = Result<T, TdbError>;

impl From<serde_json::Error> for TdbError {
    fn from(err: serde_json::Error) -> Self {
        TdbError::Serialization(err.to_string())
    }
}

impl TdbError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        TdbError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        TdbError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        TdbError::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        TdbError::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn corrupt(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        TdbError::Corrupt {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable category, used in query results and wire bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TdbError::NotFound { .. } | TdbError::DatabaseNotFound(_) => "NotFound",
            TdbError::AlreadyExists { .. } => "AlreadyExists",
            TdbError::InvalidQuery { .. } | TdbError::NoDatabaseSelected => "InvalidQuery",
            TdbError::UnknownColumn { .. } => "UnknownColumn",
            TdbError::DuplicateKey { .. } => "DuplicateKey",
            TdbError::PermissionDenied(_) => "PermissionDenied",
            TdbError::Unauthorized(_) => "Unauthorized",
            TdbError::Corrupt { .. } => "Corrupt",
            TdbError::Io { .. } => "IOFailure",
            TdbError::Serialization(_) => "Corrupt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_found() {
        let err = TdbError::not_found("table", "users");
        assert_eq!(err.to_string(), "table 'users' not found");
    }

    #[test]
    fn error_display_unknown_column() {
        let err = TdbError::unknown_column("users", "age");
        assert_eq!(err.to_string(), "unknown column 'age' in table 'users'");
    }

    #[test]
    fn error_display_duplicate_key() {
        let err = TdbError::DuplicateKey {
            table: "users".to_string(),
            key: "(1)".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate primary key (1) in table 'users'");
    }

    #[test]
    fn io_error_converts() {
        let err: TdbError = std::io::Error::other("disk full").into();
        assert_eq!(err.code(), "IOFailure");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn serde_error_converts() {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: TdbError = parsed.unwrap_err().into();
        assert!(matches!(err, TdbError::Serialization(_)));
    }

    #[test]
    fn tdb_result_err() {
        let result: TdbResult<i32> = Err(TdbError::NoDatabaseSelected);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "InvalidQuery");
    }
}
