//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use sysinfo::System;
use tracing::{debug, info};

/// Default number of rows per INSERT batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// SQL Server rejects a table value constructor with more than 1000 rows.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Default source row count above which a table is deferred to a fallback script.
pub const DEFAULT_FALLBACK_THRESHOLD: i64 = 100_000;

/// System resource information, logged at startup and between tables.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_bytes = sys.total_memory();
        let total_memory_gb = total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_bytes,
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }

    /// Resident memory of this process in bytes, if the platform reports it.
    pub fn process_memory_bytes() -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut sys = System::new();
        sys.refresh_process(pid);
        sys.process(pid).map(|p| p.memory())
    }

    /// Log the current process memory after a table has been released.
    pub fn log_process_memory(table: &str) {
        if let Some(bytes) = Self::process_memory_bytes() {
            debug!(
                "{}: buffers released, process memory {:.1} MB",
                table,
                bytes as f64 / (1024.0 * 1024.0)
            );
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the rows are read from.
    pub source: DatabaseConfig,

    /// Database the rows are written to.
    pub target: DatabaseConfig,

    /// Replication behavior.
    pub replication: ReplicationConfig,
}

/// Connection settings for one SQL Server database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema holding the replicated tables (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust server certificate (default: true).
    #[serde(default = "default_true")]
    pub trust_server_cert: bool,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// How existing target rows are cleared before an inline copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    /// TRUNCATE when the table has no foreign keys or triggers, DELETE otherwise.
    #[default]
    Auto,

    /// Always use a row-scoped DELETE.
    Delete,

    /// Always TRUNCATE.
    Truncate,
}

/// How batch rows are sent to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Multi-row INSERT with bound parameters.
    #[default]
    Parameterized,

    /// One multi-row INSERT per batch with values encoded as SQL literals.
    Literal,
}

/// Replication behavior configuration.
///
/// Tuning fields use `Option<T>` to distinguish "not set" from "explicitly set";
/// the `get_*` accessors apply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Company prefixes whose tables are replicated, in processing order.
    pub companies: Vec<String>,

    /// Application GUID embedded in every table name.
    pub app_guid: String,

    /// Also replicate `$ext` extension tables (default: true).
    #[serde(default = "default_true")]
    pub include_extension_tables: bool,

    /// Logical table names never replicated (case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Regular expressions matched against logical table names.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Logical names starting with this prefix are always skipped (default: "_").
    #[serde(default = "default_reserved_prefix")]
    pub reserved_prefix: String,

    /// Rows per INSERT batch (default: 1000, max: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Source row count above which a fallback script is written (default: 100000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_threshold: Option<i64>,

    /// Directory receiving fallback scripts (default: "fallback_scripts").
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,

    /// Disable non-clustered indexes during the load (default: true).
    #[serde(default = "default_true")]
    pub suspend_indexes: bool,

    /// How target rows are cleared (default: auto).
    #[serde(default)]
    pub clear_mode: ClearMode,

    /// How batches are sent (default: parameterized).
    #[serde(default)]
    pub insert_mode: InsertMode,

    /// Maximum source connections (default: 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<u32>,

    /// Maximum target connections (default: 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<u32>,
}

impl ReplicationConfig {
    /// Create a configuration with defaults for the given companies and app GUID.
    pub fn new(companies: Vec<String>, app_guid: impl Into<String>) -> Self {
        Self {
            companies,
            app_guid: app_guid.into(),
            include_extension_tables: true,
            exclude_tables: Vec::new(),
            exclude_patterns: Vec::new(),
            reserved_prefix: default_reserved_prefix(),
            batch_size: None,
            fallback_threshold: None,
            fallback_dir: default_fallback_dir(),
            suspend_indexes: true,
            clear_mode: ClearMode::default(),
            insert_mode: InsertMode::default(),
            max_source_connections: None,
            max_target_connections: None,
        }
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn get_fallback_threshold(&self) -> i64 {
        self.fallback_threshold.unwrap_or(DEFAULT_FALLBACK_THRESHOLD)
    }

    pub fn get_max_source_connections(&self) -> u32 {
        self.max_source_connections.unwrap_or(2)
    }

    pub fn get_max_target_connections(&self) -> u32 {
        self.max_target_connections.unwrap_or(2)
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_reserved_prefix() -> String {
    "_".to_string()
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("fallback_scripts")
}

fn default_true() -> bool {
    true
}
