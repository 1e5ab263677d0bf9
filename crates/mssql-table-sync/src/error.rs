//! Error types for the replication library.

use crate::connection::PoolRole;
use thiserror::Error;

/// Exit code for configuration errors (invalid YAML, missing fields, etc.).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when a connection pool could not be established.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when the run finished but one or more tables failed.
pub const EXIT_PARTIAL_FAILURE: u8 = 3;
/// Exit code for any other database failure that aborted the run.
pub const EXIT_DATABASE_ERROR: u8 = 4;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code when the run was interrupted by a signal.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for replication operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection pool could not be established. Fatal for the whole run.
    #[error("Connection to {role} database failed: {message}")]
    Connection { role: PoolRole, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Query error reported by either database
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Column or row-count metadata could not be read for a table
    #[error("Schema lookup failed for table {table}: {message}")]
    SchemaLookup { table: String, message: String },

    /// A batch INSERT failed; the copy of this table was aborted
    #[error("Insert failed for table {table} after {rows_copied} rows: {message}")]
    InsertFailed {
        table: String,
        rows_copied: u64,
        message: String,
    },

    /// Fallback script could not be written
    #[error("Fallback script {path} could not be written: {message}")]
    Script { path: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid table exclusion pattern
    #[error("Invalid exclusion pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SchemaLookup error
    pub fn schema_lookup(table: impl Into<String>, message: impl ToString) -> Self {
        SyncError::SchemaLookup {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create an InsertFailed error
    pub fn insert_failed(table: impl Into<String>, rows_copied: u64, message: impl ToString) -> Self {
        SyncError::InsertFailed {
            table: table.into(),
            rows_copied,
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run instead of skipping one table.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_)
            | SyncError::Yaml(_)
            | SyncError::Json(_)
            | SyncError::Regex(_) => EXIT_CONFIG_ERROR,
            SyncError::Connection { .. } | SyncError::Pool { .. } => EXIT_CONNECTION_ERROR,
            SyncError::Io(_) | SyncError::Script { .. } => EXIT_IO_ERROR,
            SyncError::Database(_)
            | SyncError::SchemaLookup { .. }
            | SyncError::InsertFailed { .. } => EXIT_DATABASE_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, SyncError>;
