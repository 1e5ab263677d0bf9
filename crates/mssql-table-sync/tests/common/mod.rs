//! In-memory source and target pools for engine and orchestrator tests.
//!
//! The target records every state-changing statement as a short event string
//! (`truncate T`, `identity_on T`, `insert T 10`, `insert literal T 10`, ...)
//! so tests can assert on statement order.

#![allow(dead_code)]

use async_trait::async_trait;
use mssql_table_sync::config::{Config, DatabaseConfig, ReplicationConfig};
use mssql_table_sync::target::TableDependencies;
use mssql_table_sync::{
    ColumnDescriptor, InsertMode, PoolRole, Result, Row, RowBatch, RowStream, SourcePool, SqlValue,
    SyncError, TargetPool, TargetSession,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const GUID: &str = "437dbf0e-84ff-417a-965d-ed2bb9650972";

/// Physical name of a base table of company `FCL1`.
pub fn physical(logical: &str) -> String {
    format!("FCL1${}${}", logical, GUID)
}

pub fn cols(specs: &[(&str, &str)]) -> Vec<ColumnDescriptor> {
    specs
        .iter()
        .map(|(name, ty)| ColumnDescriptor::new(*name, *ty))
        .collect()
}

pub fn database(name: &str) -> DatabaseConfig {
    DatabaseConfig {
        host: "localhost".to_string(),
        port: 1433,
        database: name.to_string(),
        user: "sa".to_string(),
        password: "secret".to_string(),
        schema: "dbo".to_string(),
        encrypt: false,
        trust_server_cert: true,
    }
}

pub fn config(replication: ReplicationConfig) -> Config {
    Config {
        source: database("BC_PROD"),
        target: database("BC_TEST"),
        replication,
    }
}

pub fn replication() -> ReplicationConfig {
    ReplicationConfig::new(vec!["FCL1".to_string()], GUID)
}

// =============================================================================
// Source
// =============================================================================

#[derive(Debug, Clone)]
struct SourceTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
}

#[derive(Default)]
pub struct MockSource {
    tables: Mutex<BTreeMap<String, SourceTable>>,
    broken_tables: Mutex<HashSet<String>>,
    /// Table -> batches delivered before the stream reports a read error.
    stream_failures: Mutex<HashMap<String, usize>>,
    pub closes: AtomicUsize,
    pub streams_opened: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; each row holds one value per column.
    pub fn add_table(&self, name: &str, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) {
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), SourceTable { columns, rows });
    }

    /// Add a table with `count` rows of `(Id, Name)`.
    pub fn add_numbered_table(&self, name: &str, count: usize) {
        let rows = (0..count)
            .map(|i| vec![SqlValue::I32(i as i32), SqlValue::Text(format!("row {}", i))])
            .collect();
        self.add_table(name, cols(&[("Id", "int"), ("Name", "nvarchar")]), rows);
    }

    /// Make column lookups for a table fail.
    pub fn break_table(&self, name: &str) {
        self.broken_tables.lock().unwrap().insert(name.to_string());
    }

    /// Make the row stream of a table fail after `batches` good batches.
    pub fn fail_stream_after(&self, name: &str, batches: usize) {
        self.stream_failures
            .lock()
            .unwrap()
            .insert(name.to_string(), batches);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn failing_stream(rows: Vec<Row>, batch_size: usize, good_batches: usize) -> RowStream {
    RowStream::spawn(batch_size, move |mut producer| async move {
        let mut rows = rows.into_iter();
        let mut sent = 0;
        loop {
            if !producer.wait_for_demand().await {
                return;
            }
            if sent == good_batches {
                let _ = producer
                    .send(Err(SyncError::pool("simulated read failure", "stream")))
                    .await;
                return;
            }
            let batch: Vec<Row> = rows.by_ref().take(producer.batch_size()).collect();
            if batch.is_empty() || !producer.send(Ok(RowBatch::new(batch))).await {
                return;
            }
            sent += 1;
        }
    })
}

#[async_trait]
impl SourcePool for MockSource {
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        if self.broken_tables.lock().unwrap().contains(table) {
            return Err(SyncError::schema_lookup(table, "simulated metadata failure"));
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.len() as i64)
            .unwrap_or(0))
    }

    async fn stream_rows(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> Result<RowStream> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let source = self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .ok_or_else(|| SyncError::schema_lookup(table, "no such table"))?;

        // Project the requested columns, in the requested order.
        let positions: Vec<usize> = columns
            .iter()
            .filter_map(|c| source.columns.iter().position(|s| s.name == c.name))
            .collect();
        let rows = source
            .rows
            .iter()
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect();

        if let Some(&good) = self.stream_failures.lock().unwrap().get(table) {
            return Ok(failing_stream(rows, batch_size, good));
        }
        Ok(RowStream::from_rows(rows, batch_size))
    }

    async fn table_names(&self, company: &str, _app_guid: &str) -> Result<Vec<String>> {
        let prefix = format!("{}$", company);
        Ok(self
            .tables
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn test_connection(&self) -> Result<String> {
        Ok("Mock SQL Server (source)".to_string())
    }

    fn database_name(&self) -> &str {
        "BC_PROD"
    }

    fn schema(&self) -> &str {
        "dbo"
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Target
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct TargetTable {
    pub columns: Vec<ColumnDescriptor>,
    pub identity: Vec<String>,
    pub dependencies: TableDependencies,
    /// Rows keyed by column name; absent columns are NULL.
    pub rows: Vec<HashMap<String, SqlValue>>,
    /// Index name -> disabled.
    pub indexes: BTreeMap<String, bool>,
}

#[derive(Debug, Default)]
pub struct TargetState {
    pub tables: HashMap<String, TargetTable>,
    pub events: Vec<String>,
    pub insert_calls: usize,
    /// Fail the n-th insert call (1-based).
    pub fail_insert_on: Option<usize>,
    pub fail_dependencies: bool,
    /// Fail TRUNCATE and DELETE.
    pub fail_clear: bool,
    /// Fail `SET IDENTITY_INSERT ... OFF`.
    pub fail_identity_off: bool,
    /// Fail disabling this index.
    pub fail_disable: Option<String>,
    /// Fail session acquisition with a connection error.
    pub connection_lost: bool,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct MockTarget {
    pub state: Arc<Mutex<TargetState>>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: &str, table: TargetTable) {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), table);
    }

    /// Add a table with the given columns and no rows, identity or indexes.
    pub fn add_plain_table(&self, name: &str, columns: Vec<ColumnDescriptor>) {
        self.add_table(
            name,
            TargetTable {
                columns,
                ..TargetTable::default()
            },
        );
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn table(&self, name: &str) -> TargetTable {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut TargetState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl TargetPool for MockTarget {
    async fn session(&self) -> Result<Box<dyn TargetSession>> {
        if self.state.lock().unwrap().connection_lost {
            return Err(SyncError::Connection {
                role: PoolRole::Target,
                message: "simulated connection loss".to_string(),
            });
        }
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            identity_insert: None,
        }))
    }

    async fn test_connection(&self) -> Result<String> {
        Ok("Mock SQL Server (target)".to_string())
    }

    fn database_name(&self) -> &str {
        "BC_TEST"
    }

    fn schema(&self) -> &str {
        "dbo"
    }

    async fn close(&self) {
        self.state.lock().unwrap().closes += 1;
    }
}

pub struct MockSession {
    state: Arc<Mutex<TargetState>>,
    /// Table with IDENTITY_INSERT ON in this session.
    identity_insert: Option<String>,
}

impl MockSession {
    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TargetTable, &mut Vec<String>) -> R,
    ) -> Result<R> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::schema_lookup(table, "no such target table"))?;
        Ok(f(t, &mut state.events))
    }
}

#[async_trait]
impl TargetSession for MockSession {
    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn identity_columns(&mut self, table: &str) -> Result<Vec<String>> {
        self.with_table(table, |t, _| t.identity.clone())
    }

    async fn dependencies(&mut self, table: &str) -> Result<TableDependencies> {
        if self.state.lock().unwrap().fail_dependencies {
            return Err(SyncError::schema_lookup(table, "simulated catalog failure"));
        }
        self.with_table(table, |t, _| t.dependencies)
    }

    async fn truncate(&mut self, table: &str) -> Result<()> {
        if self.state.lock().unwrap().fail_clear {
            return Err(SyncError::pool("simulated truncate failure", "truncate"));
        }
        self.with_table(table, |t, events| {
            t.rows.clear();
            events.push(format!("truncate {}", table));
        })
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        if self.state.lock().unwrap().fail_clear {
            return Err(SyncError::pool("simulated delete failure", "delete"));
        }
        self.with_table(table, |t, events| {
            let n = t.rows.len() as u64;
            t.rows.clear();
            events.push(format!("delete {}", table));
            n
        })
    }

    async fn set_identity_insert(&mut self, table: &str, enabled: bool) -> Result<()> {
        if !enabled && self.state.lock().unwrap().fail_identity_off {
            return Err(SyncError::pool("simulated identity off failure", "identity insert"));
        }
        self.identity_insert = if enabled { Some(table.to_string()) } else { None };
        let event = if enabled { "identity_on" } else { "identity_off" };
        self.with_table(table, |_, events| events.push(format!("{} {}", event, table)))
    }

    async fn suspendable_indexes(&mut self, table: &str) -> Result<Vec<String>> {
        self.with_table(table, |t, _| {
            t.indexes
                .iter()
                .filter(|(_, disabled)| !**disabled)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    async fn disabled_indexes(&mut self, table: &str) -> Result<Vec<String>> {
        self.with_table(table, |t, _| {
            t.indexes
                .iter()
                .filter(|(_, disabled)| **disabled)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    async fn disable_index(&mut self, table: &str, index: &str) -> Result<()> {
        if self.state.lock().unwrap().fail_disable.as_deref() == Some(index) {
            return Err(SyncError::pool("simulated disable failure", "disable index"));
        }
        self.with_table(table, |t, events| {
            t.indexes.insert(index.to_string(), true);
            events.push(format!("disable {}.{}", table, index));
        })
    }

    async fn rebuild_index(&mut self, table: &str, index: &str) -> Result<()> {
        self.with_table(table, |t, events| {
            t.indexes.insert(index.to_string(), false);
            events.push(format!("rebuild {}.{}", table, index));
        })
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch: &RowBatch,
        mode: InsertMode,
    ) -> Result<u64> {
        let identity_on = self.identity_insert.as_deref() == Some(table);
        let mut state = self.state.lock().unwrap();
        state.insert_calls += 1;
        if state.fail_insert_on == Some(state.insert_calls) {
            return Err(SyncError::pool("simulated constraint violation", "insert"));
        }

        let state = &mut *state;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::schema_lookup(table, "no such target table"))?;

        if !identity_on && columns.iter().any(|c| t.identity.contains(&c.name)) {
            return Err(SyncError::pool(
                "cannot insert explicit value for identity column when IDENTITY_INSERT is OFF",
                "insert",
            ));
        }

        for row in &batch.rows {
            let record = columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect();
            t.rows.push(record);
        }
        let event = match mode {
            InsertMode::Parameterized => format!("insert {} {}", table, batch.rows.len()),
            InsertMode::Literal => format!("insert literal {} {}", table, batch.rows.len()),
        };
        state.events.push(event);
        Ok(batch.rows.len() as u64)
    }
}
