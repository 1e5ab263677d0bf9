//! Non-clustered index suspension around a bulk load.

use crate::error::Result;
use crate::target::TargetSession;
use tracing::{debug, info};

/// Disables and rebuilds target indexes.
///
/// `restore` works from a fresh metadata query rather than from what `suspend`
/// disabled, so it is idempotent and also repairs indexes left disabled by an
/// earlier interrupted run.
pub struct IndexController;

impl IndexController {
    /// Disable every enabled non-clustered, non-primary-key index on the table.
    pub async fn suspend(session: &mut dyn TargetSession, table: &str) -> Result<usize> {
        let indexes = session.suspendable_indexes(table).await?;
        for index in &indexes {
            debug!("{}: disabling index {}", table, index);
            session.disable_index(table, index).await?;
        }
        if !indexes.is_empty() {
            info!("{}: disabled {} indexes", table, indexes.len());
        }
        Ok(indexes.len())
    }

    /// Rebuild every currently disabled index on the table.
    pub async fn restore(session: &mut dyn TargetSession, table: &str) -> Result<usize> {
        let indexes = session.disabled_indexes(table).await?;
        for index in &indexes {
            debug!("{}: rebuilding index {}", table, index);
            session.rebuild_index(table, index).await?;
        }
        if !indexes.is_empty() {
            info!("{}: rebuilt {} indexes", table, indexes.len());
        }
        Ok(indexes.len())
    }
}
