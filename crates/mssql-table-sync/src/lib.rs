//! # mssql-table-sync
//!
//! Replicates table contents between two SQL Server databases whose schemas
//! may have drifted apart.
//!
//! This library provides:
//!
//! - **Schema reconciliation** of source and target columns per table
//! - **Batched, backpressured copies** with identity insert and index suspension
//! - **Fallback scripts** (transactional `INSERT ... SELECT`) for large tables
//! - **Table discovery** by company prefix and application GUID
//! - **Resume** from a named table
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_table_sync::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let summary = orchestrator.run(None, None).await?;
//!     println!("Copied {} rows", summary.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;

// Re-exports for convenient access
pub use config::{ClearMode, Config, DatabaseConfig, InsertMode, ReplicationConfig};
pub use connection::PoolRole;
pub use core::{ColumnDescriptor, ReconciledColumns, Row, RowBatch, SqlNullType, SqlValue};
pub use error::{Result, SyncError};
pub use orchestrator::{CompanyTables, HealthCheckResult, Orchestrator, ResumeCursor, RunSummary};
pub use source::{MssqlSource, RowStream, SourcePool, TableName};
pub use target::{MssqlTarget, TableDependencies, TargetPool, TargetSession};
pub use transfer::{
    CopyEngine, CopyMode, CopyPhase, CopyResult, CopySettings, FallbackScript, FallbackScriptWriter,
    IndexController,
};
