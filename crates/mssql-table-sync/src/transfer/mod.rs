//! Per-table copy engine.
//!
//! A table copy moves through `Reconciling -> Counting -> InlineCopy | FallbackScript -> Done`.
//! The inline path reads the source in batches and inserts each batch before the
//! next one is requested, so at most one batch is held in memory per table.

pub mod fallback;
pub mod index;

pub use fallback::{FallbackScript, FallbackScriptWriter};
pub use index::IndexController;

use crate::config::{ClearMode, InsertMode, ReplicationConfig};
use crate::core::{reconcile, ReconciledColumns};
use crate::error::{Result, SyncError};
use crate::source::{SourcePool, TableName};
use crate::target::{TargetPool, TargetSession};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stage of a table copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPhase {
    Reconciling,
    Counting,
    InlineCopy,
    FallbackScript,
    Done,
}

impl fmt::Display for CopyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyPhase::Reconciling => "reconciling",
            CopyPhase::Counting => "counting",
            CopyPhase::InlineCopy => "inline copy",
            CopyPhase::FallbackScript => "fallback script",
            CopyPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How a table's rows reached (or will reach) the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    Inline,
    FallbackScript,
}

/// Outcome of one table copy.
#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    /// Physical table name.
    pub table_name: String,
    /// Rows inserted into the target; zero for fallback tables.
    pub rows_copied: u64,
    pub duration_seconds: f64,
    pub mode: CopyMode,
    /// Number of reconciled columns.
    pub columns_copied: usize,
    /// Script written instead of an inline copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<FallbackScript>,
}

/// Copy settings taken from the replication config.
#[derive(Debug, Clone)]
pub struct CopySettings {
    pub batch_size: usize,
    pub fallback_threshold: i64,
    pub suspend_indexes: bool,
    pub clear_mode: ClearMode,
    pub insert_mode: InsertMode,
}

impl CopySettings {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            batch_size: config.get_batch_size(),
            fallback_threshold: config.get_fallback_threshold(),
            suspend_indexes: config.suspend_indexes,
            clear_mode: config.clear_mode,
            insert_mode: config.insert_mode,
        }
    }
}

/// Copies one table at a time from source to target.
pub struct CopyEngine {
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    settings: CopySettings,
}

impl CopyEngine {
    pub fn new(source: Arc<dyn SourcePool>, target: Arc<dyn TargetPool>, settings: CopySettings) -> Self {
        Self {
            source,
            target,
            settings,
        }
    }

    /// Replicate one table, or write its fallback script when it is too large.
    pub async fn copy_table(
        &self,
        table: &TableName,
        scripts: &mut FallbackScriptWriter,
    ) -> Result<CopyResult> {
        let start = Instant::now();
        let name = table.physical.as_str();
        let mut phase = CopyPhase::Reconciling;
        debug!("{}: {}", table, phase);

        // One session for metadata and every statement of the inline copy.
        let mut session = self.target.session().await?;

        let source_columns = self.source.columns(name).await?;
        let target_columns = session.columns(name).await?;
        let columns = reconcile(&source_columns, &target_columns);
        for (column, reason) in columns.dropped() {
            debug!("{}: skipping column {} ({})", table, column, reason);
        }

        if columns.is_empty() {
            info!("{}: no common columns, nothing to copy", table);
            return Ok(self.result(table, &columns, 0, CopyMode::Inline, None, start));
        }

        let identity_columns = session.identity_columns(name).await?;
        let identity_insert = columns.requires_identity_insert(&identity_columns);

        phase = CopyPhase::Counting;
        debug!("{}: {}", table, phase);
        let source_rows = self.source.row_count(name).await?;

        if source_rows > self.settings.fallback_threshold {
            phase = CopyPhase::FallbackScript;
            debug!("{}: {}", table, phase);
            let script = scripts.generate(table, &columns, identity_insert, source_rows)?;
            return Ok(self.result(
                table,
                &columns,
                0,
                CopyMode::FallbackScript,
                Some(script),
                start,
            ));
        }

        phase = CopyPhase::InlineCopy;
        debug!("{}: {} ({} source rows)", table, phase, source_rows);

        // From here on, any exit restores whatever indexes are disabled.
        let suspended = self.settings.suspend_indexes;
        if suspended {
            if let Err(e) = IndexController::suspend(session.as_mut(), name).await {
                self.cleanup(session.as_mut(), name, false, true).await;
                return Err(e);
            }
        }

        let mut rows_copied = 0u64;
        let mut identity_enabled = false;
        let loaded = self
            .load(
                session.as_mut(),
                name,
                &columns,
                identity_insert,
                &mut identity_enabled,
                &mut rows_copied,
            )
            .await;

        if let Err(e) = loaded {
            self.cleanup(session.as_mut(), name, identity_enabled, suspended)
                .await;
            return Err(e);
        }

        let identity_off = if identity_enabled {
            session.set_identity_insert(name, false).await
        } else {
            Ok(())
        };
        let restored = if suspended {
            IndexController::restore(session.as_mut(), name).await.map(|_| ())
        } else {
            Ok(())
        };
        identity_off?;
        restored?;

        phase = CopyPhase::Done;
        let result = self.result(table, &columns, rows_copied, CopyMode::Inline, None, start);
        info!(
            "{}: {}, {} rows in {:.2}s",
            table, phase, result.rows_copied, result.duration_seconds
        );
        Ok(result)
    }

    /// Clear the target, then stream and insert every source batch.
    async fn load(
        &self,
        session: &mut dyn TargetSession,
        table: &str,
        columns: &ReconciledColumns,
        identity_insert: bool,
        identity_enabled: &mut bool,
        rows_copied: &mut u64,
    ) -> Result<()> {
        self.clear(session, table).await?;

        if identity_insert {
            session.set_identity_insert(table, true).await?;
            *identity_enabled = true;
        }

        let mut stream = self
            .source
            .stream_rows(table, columns.columns(), self.settings.batch_size)
            .await?;

        loop {
            let batch = match stream.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    stream.cancel();
                    return Err(e);
                }
            };

            match session
                .insert_batch(table, columns.columns(), &batch, self.settings.insert_mode)
                .await
            {
                Ok(inserted) => {
                    *rows_copied += inserted;
                    debug!("{}: inserted {} rows ({} total)", table, inserted, rows_copied);
                }
                Err(e) => {
                    stream.cancel();
                    return Err(SyncError::insert_failed(table, *rows_copied, e));
                }
            }
        }

        Ok(())
    }

    async fn clear(&self, session: &mut dyn TargetSession, table: &str) -> Result<()> {
        let truncate = match self.settings.clear_mode {
            ClearMode::Truncate => true,
            ClearMode::Delete => false,
            ClearMode::Auto => match session.dependencies(table).await {
                Ok(deps) => deps.allows_truncate(),
                Err(e) => {
                    warn!("{}: dependency lookup failed, using DELETE: {}", table, e);
                    false
                }
            },
        };

        if truncate {
            session.truncate(table).await?;
            debug!("{}: truncated", table);
        } else {
            let deleted = session.delete_all(table).await?;
            debug!("{}: deleted {} rows", table, deleted);
        }
        Ok(())
    }

    /// Best-effort reset after a failed suspend or load; errors are logged, not returned.
    async fn cleanup(
        &self,
        session: &mut dyn TargetSession,
        table: &str,
        identity_enabled: bool,
        suspended: bool,
    ) {
        if identity_enabled {
            if let Err(e) = session.set_identity_insert(table, false).await {
                warn!("{}: failed to disable IDENTITY_INSERT: {}", table, e);
            }
        }
        if suspended {
            if let Err(e) = IndexController::restore(session, table).await {
                warn!("{}: failed to rebuild indexes: {}", table, e);
            }
        }
    }

    fn result(
        &self,
        table: &TableName,
        columns: &ReconciledColumns,
        rows_copied: u64,
        mode: CopyMode,
        script: Option<FallbackScript>,
        start: Instant,
    ) -> CopyResult {
        CopyResult {
            table_name: table.physical.clone(),
            rows_copied,
            duration_seconds: start.elapsed().as_secs_f64(),
            mode,
            columns_copied: columns.len(),
            script,
        }
    }
}
