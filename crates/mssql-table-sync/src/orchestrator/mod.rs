//! Replication orchestrator - main workflow coordinator.
//!
//! Tables are copied strictly one after another. A failing table is logged and
//! skipped; only fatal errors (lost connections, cancellation) end the run early.
//! Both pools are released exactly once, when the orchestrator is consumed.

use crate::config::{Config, SystemResources};
use crate::error::{Result, SyncError, EXIT_CANCELLED, EXIT_PARTIAL_FAILURE};
use crate::source::{discover_tables, MssqlSource, SourcePool, TableFilter, TableName};
use crate::target::{MssqlTarget, TargetPool};
use crate::transfer::{CopyEngine, CopyMode, CopyResult, CopySettings, FallbackScriptWriter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Replication orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
}

/// A table whose copy failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTable {
    pub table: String,
    pub error: String,
}

/// Result of a replication run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: `completed`, `partial` or `cancelled`.
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Tables whose copy was attempted.
    pub tables_total: usize,

    /// Tables copied inline.
    pub tables_inline: usize,

    /// Tables deferred to fallback scripts.
    pub tables_fallback: usize,

    /// Tables skipped before the resume point.
    pub tables_skipped: usize,

    pub tables_failed: usize,

    /// Total rows inserted inline.
    pub rows_copied: u64,

    pub failed_tables: Vec<FailedTable>,

    /// Per-table results in processing order.
    pub tables: Vec<CopyResult>,
}

impl RunSummary {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: "running".to_string(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables_total: 0,
            tables_inline: 0,
            tables_fallback: 0,
            tables_skipped: 0,
            tables_failed: 0,
            rows_copied: 0,
            failed_tables: Vec::new(),
            tables: Vec::new(),
        }
    }

    fn record(&mut self, result: CopyResult) {
        self.tables_total += 1;
        match result.mode {
            CopyMode::Inline => self.tables_inline += 1,
            CopyMode::FallbackScript => self.tables_fallback += 1,
        }
        self.rows_copied += result.rows_copied;
        self.tables.push(result);
    }

    fn record_failure(&mut self, table: &TableName, error: &SyncError) {
        self.tables_total += 1;
        self.tables_failed += 1;
        self.failed_tables.push(FailedTable {
            table: table.physical.clone(),
            error: error.to_string(),
        });
    }

    fn finish(&mut self, cancelled: bool, start: Instant) {
        self.completed_at = Utc::now();
        self.duration_seconds = start.elapsed().as_secs_f64();
        self.status = if cancelled {
            "cancelled"
        } else if self.tables_failed > 0 {
            "partial"
        } else {
            "completed"
        }
        .to_string();
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        match self.status.as_str() {
            "cancelled" => EXIT_CANCELLED,
            _ if self.tables_failed > 0 => EXIT_PARTIAL_FAILURE,
            _ => 0,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connection test result for both databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Tables discovered for one company.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyTables {
    pub company: String,
    pub tables: Vec<TableName>,
}

/// Skips tables until the first one matching the resume point.
#[derive(Debug)]
pub struct ResumeCursor {
    resume_from: Option<String>,
    reached: bool,
}

impl ResumeCursor {
    /// An empty resume point means "start from the beginning".
    pub fn new(resume_from: Option<&str>) -> Self {
        let resume_from = resume_from
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Self {
            reached: resume_from.is_none(),
            resume_from,
        }
    }

    /// Whether `table` lies before the resume point.
    pub fn should_skip(&mut self, table: &TableName) -> bool {
        if self.reached {
            return false;
        }
        match &self.resume_from {
            Some(name) if table.matches(name) => {
                info!("Resuming from {}", table);
                self.reached = true;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// The resume point, if one was given and has not been seen yet.
    pub fn pending(&self) -> Option<&str> {
        if self.reached {
            None
        } else {
            self.resume_from.as_deref()
        }
    }
}

impl Orchestrator {
    /// Connect both pools.
    pub async fn new(config: Config) -> Result<Self> {
        let source = MssqlSource::connect(
            &config.source,
            config.replication.get_max_source_connections(),
        )
        .await?;

        let target = match MssqlTarget::connect(
            &config.target,
            config.replication.get_max_target_connections(),
        )
        .await
        {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };

        Ok(Self::with_pools(config, Arc::new(source), Arc::new(target)))
    }

    /// Build an orchestrator over existing pools.
    pub fn with_pools(config: Config, source: Arc<dyn SourcePool>, target: Arc<dyn TargetPool>) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    /// Run the replication, optionally resuming from a table name.
    ///
    /// Cancellation is honored between tables; the table in flight completes.
    pub async fn run(
        self,
        resume_from: Option<&str>,
        cancel: Option<CancellationToken>,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::new();
        info!("Starting replication run: {}", summary.run_id);
        SystemResources::detect().log();

        let cancel = cancel.unwrap_or_default();
        let outcome = self
            .replicate(resume_from, &cancel, &mut summary)
            .await;

        self.close().await;

        let cancelled = outcome?;
        summary.finish(cancelled, start);

        info!(
            "Replication {}: {} tables ({} inline, {} fallback, {} failed, {} skipped), {} rows in {:.1}s",
            summary.status,
            summary.tables_total,
            summary.tables_inline,
            summary.tables_fallback,
            summary.tables_failed,
            summary.tables_skipped,
            summary.rows_copied,
            summary.duration_seconds
        );

        Ok(summary)
    }

    /// Copy every discovered table. Returns whether the run was cancelled.
    async fn replicate(
        &self,
        resume_from: Option<&str>,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let replication = &self.config.replication;
        let filter = TableFilter::from_config(replication)?;
        let engine = CopyEngine::new(
            self.source.clone(),
            self.target.clone(),
            CopySettings::from_config(replication),
        );
        let mut scripts = FallbackScriptWriter::new(
            &replication.fallback_dir,
            self.source.database_name(),
            self.source.schema(),
            self.target.database_name(),
            self.target.schema(),
        );
        let mut cursor = ResumeCursor::new(resume_from);

        for company in &replication.companies {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping before company {}", company);
                return Ok(true);
            }

            let tables = discover_tables(
                self.source.as_ref(),
                company,
                &replication.app_guid,
                &filter,
            )
            .await?;

            for table in &tables {
                if cursor.should_skip(table) {
                    info!("{}: before resume point, skipped", table);
                    summary.tables_skipped += 1;
                    continue;
                }

                if cancel.is_cancelled() {
                    info!("Cancellation requested, stopping before {}", table);
                    return Ok(true);
                }

                match engine.copy_table(table, &mut scripts).await {
                    Ok(result) => summary.record(result),
                    Err(e) if e.is_fatal() => {
                        error!("{}: {}", table, e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("{}: copy failed, continuing with next table: {}", table, e);
                        summary.record_failure(table, &e);
                    }
                }

                SystemResources::log_process_memory(&table.physical);
            }
        }

        if let Some(name) = cursor.pending() {
            warn!("Resume point {:?} was not found; no tables were copied", name);
        }

        Ok(false)
    }

    /// Discover the tables of every configured company, then release the pools.
    pub async fn list_tables(self) -> Result<Vec<CompanyTables>> {
        let outcome = self.discover_all().await;
        self.close().await;
        outcome
    }

    async fn discover_all(&self) -> Result<Vec<CompanyTables>> {
        let replication = &self.config.replication;
        let filter = TableFilter::from_config(replication)?;
        let mut companies = Vec::with_capacity(replication.companies.len());
        for company in &replication.companies {
            let tables = discover_tables(
                self.source.as_ref(),
                company,
                &replication.app_guid,
                &filter,
            )
            .await?;
            companies.push(CompanyTables {
                company: company.clone(),
                tables,
            });
        }
        Ok(companies)
    }

    /// Round trip to both databases, then release the pools.
    pub async fn health_check(self) -> Result<HealthCheckResult> {
        let source_start = Instant::now();
        let source = self.source.test_connection().await;
        let source_latency_ms = source_start.elapsed().as_millis() as u64;

        let target_start = Instant::now();
        let target = self.target.test_connection().await;
        let target_latency_ms = target_start.elapsed().as_millis() as u64;

        self.close().await;

        let (source_version, source_error) = split_outcome(source);
        let (target_version, target_error) = split_outcome(target);

        Ok(HealthCheckResult {
            source_connected: source_error.is_none(),
            source_latency_ms,
            target_connected: target_error.is_none(),
            target_latency_ms,
            healthy: source_error.is_none() && target_error.is_none(),
            source_version,
            source_error,
            target_version,
            target_error,
        })
    }

    async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

fn split_outcome(outcome: Result<String>) -> (Option<String>, Option<String>) {
    match outcome {
        Ok(version) => (Some(version), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "437dbf0e-84ff-417a-965d-ed2bb9650972";

    fn tables(names: &[&str]) -> Vec<TableName> {
        names
            .iter()
            .map(|n| TableName::parse(&format!("FCL1${}${}", n, GUID), "FCL1", GUID).unwrap())
            .collect()
    }

    fn remaining(cursor: &mut ResumeCursor, tables: &[TableName]) -> Vec<String> {
        tables
            .iter()
            .filter(|t| !cursor.should_skip(t))
            .map(|t| t.logical.clone())
            .collect()
    }

    #[test]
    fn test_resume_skips_tables_before_match() {
        let list = tables(&["A", "B", "C", "D"]);
        let mut cursor = ResumeCursor::new(Some("C"));
        assert_eq!(remaining(&mut cursor, &list), vec!["C", "D"]);
        assert!(cursor.pending().is_none());
    }

    #[test]
    fn test_resume_matches_physical_name() {
        let list = tables(&["A", "B", "C"]);
        let physical = list[1].physical.clone();
        let mut cursor = ResumeCursor::new(Some(&physical));
        assert_eq!(remaining(&mut cursor, &list), vec!["B", "C"]);
    }

    #[test]
    fn test_no_resume_point_copies_everything() {
        let list = tables(&["A", "B"]);
        let mut cursor = ResumeCursor::new(None);
        assert_eq!(remaining(&mut cursor, &list), vec!["A", "B"]);

        let mut blank = ResumeCursor::new(Some("  "));
        assert_eq!(remaining(&mut blank, &list), vec!["A", "B"]);
    }

    #[test]
    fn test_resume_point_never_found() {
        let list = tables(&["A", "B"]);
        let mut cursor = ResumeCursor::new(Some("Z"));
        assert!(remaining(&mut cursor, &list).is_empty());
        assert_eq!(cursor.pending(), Some("Z"));
    }

    #[test]
    fn test_summary_status_and_exit_code() {
        let start = Instant::now();
        let mut summary = RunSummary::new();
        summary.finish(false, start);
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.exit_code(), 0);

        let mut failed = RunSummary::new();
        failed.record_failure(&tables(&["A"])[0], &SyncError::Config("boom".into()));
        failed.finish(false, start);
        assert_eq!(failed.status, "partial");
        assert_eq!(failed.exit_code(), EXIT_PARTIAL_FAILURE);
        assert_eq!(failed.failed_tables[0].error, "Configuration error: boom");

        let mut cancelled = RunSummary::new();
        cancelled.finish(true, start);
        assert_eq!(cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_summary_to_json() {
        let mut summary = RunSummary::new();
        summary.finish(false, Instant::now());
        let json = summary.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["tables_total"], 0);
    }
}
