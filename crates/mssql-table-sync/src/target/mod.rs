//! Target database operations.
//!
//! Every statement of one table copy runs on a single [`TargetSession`]:
//! `SET IDENTITY_INSERT` is session-scoped, so the toggles and the inserts
//! they cover must share a connection.

mod mssql;

pub use crate::config::{ClearMode, InsertMode};
pub use mssql::{build_literal_insert, build_parameterized_insert, MssqlTarget, MAX_PARAMS_PER_STATEMENT};

use crate::core::{ColumnDescriptor, RowBatch};
use crate::error::Result;
use async_trait::async_trait;

/// Constraints on a target table that rule out `TRUNCATE TABLE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableDependencies {
    /// The table references, or is referenced by, a foreign key.
    pub has_foreign_keys: bool,
    /// The table has at least one enabled trigger.
    pub has_enabled_triggers: bool,
}

impl TableDependencies {
    /// Whether the table can be cleared with TRUNCATE.
    pub fn allows_truncate(&self) -> bool {
        !self.has_foreign_keys && !self.has_enabled_triggers
    }
}

/// Pool of target connections.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Acquire a dedicated session for one table copy.
    async fn session(&self) -> Result<Box<dyn TargetSession>>;

    /// Round trip to the server, returning its version string.
    async fn test_connection(&self) -> Result<String>;

    /// Database name, used by fallback scripts.
    fn database_name(&self) -> &str;

    /// Schema holding the replicated tables.
    fn schema(&self) -> &str;

    /// Release the pool.
    async fn close(&self);
}

/// One target connection, held for the duration of a table copy.
#[async_trait]
pub trait TargetSession: Send {
    /// Columns of a table in ordinal order; empty if the table does not exist.
    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Names of identity columns of a table.
    async fn identity_columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Foreign key and trigger involvement of a table.
    async fn dependencies(&mut self, table: &str) -> Result<TableDependencies>;

    /// `TRUNCATE TABLE`.
    async fn truncate(&mut self, table: &str) -> Result<()>;

    /// `DELETE FROM`, returning the number of rows removed.
    async fn delete_all(&mut self, table: &str) -> Result<u64>;

    /// `SET IDENTITY_INSERT ... ON|OFF`.
    async fn set_identity_insert(&mut self, table: &str, enabled: bool) -> Result<()>;

    /// Enabled non-clustered indexes that are not primary keys.
    async fn suspendable_indexes(&mut self, table: &str) -> Result<Vec<String>>;

    /// Every currently disabled index.
    async fn disabled_indexes(&mut self, table: &str) -> Result<Vec<String>>;

    /// `ALTER INDEX ... DISABLE`.
    async fn disable_index(&mut self, table: &str, index: &str) -> Result<()>;

    /// `ALTER INDEX ... REBUILD`.
    async fn rebuild_index(&mut self, table: &str, index: &str) -> Result<()>;

    /// Insert one batch, returning the number of rows written.
    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch: &RowBatch,
        mode: InsertMode,
    ) -> Result<u64>;
}
