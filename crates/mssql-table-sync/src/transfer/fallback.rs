//! Transactional DELETE + INSERT ... SELECT scripts for tables too large to copy inline.
//!
//! Scripts are written, never executed. They read the source table through a
//! three-part name, so they must run on a server that can reach both databases.

use crate::core::identifier::{qualify_cross_db, qualify_mssql, quote_column_list, quote_mssql};
use crate::core::ReconciledColumns;
use crate::error::{Result, SyncError};
use crate::source::TableName;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A generated script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackScript {
    /// Path of the written file.
    pub path: PathBuf,
    /// Physical table name.
    pub table_name: String,
    /// Position in this run's script sequence.
    pub sequence_number: u32,
}

/// Writes numbered fallback scripts into one directory.
///
/// Sequence numbers increase by one per script. When the directory already
/// holds scripts from an earlier run, numbering continues after the highest one
/// so no file is ever overwritten.
#[derive(Debug)]
pub struct FallbackScriptWriter {
    dir: PathBuf,
    next_sequence: u32,
    source_database: String,
    source_schema: String,
    target_database: String,
    target_schema: String,
}

impl FallbackScriptWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        source_database: impl Into<String>,
        source_schema: impl Into<String>,
        target_database: impl Into<String>,
        target_schema: impl Into<String>,
    ) -> Self {
        let dir = dir.into();
        let next_sequence = highest_existing_sequence(&dir) + 1;
        Self {
            dir,
            next_sequence,
            source_database: source_database.into(),
            source_schema: source_schema.into(),
            target_database: target_database.into(),
            target_schema: target_schema.into(),
        }
    }

    /// Sequence number the next script will get.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Write the script for one table.
    pub fn generate(
        &mut self,
        table: &TableName,
        columns: &ReconciledColumns,
        identity_insert: bool,
        source_rows: i64,
    ) -> Result<FallbackScript> {
        let sequence_number = self.next_sequence;
        let mut normalized = table.normalized();
        if normalized.is_empty() {
            normalized.push_str("TABLE");
        }
        let path = self
            .dir
            .join(format!("SQL{:04}_{}.sql", sequence_number, normalized));

        let script_error = |message: String| SyncError::Script {
            path: path.display().to_string(),
            message,
        };

        let content = self.render(table, columns, identity_insert, source_rows)?;

        fs::create_dir_all(&self.dir).map_err(|e| script_error(e.to_string()))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| script_error(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| script_error(e.to_string()))?;

        self.next_sequence += 1;

        info!(
            "{}: {} rows exceed the inline threshold, wrote {}",
            table,
            source_rows,
            path.display()
        );

        Ok(FallbackScript {
            path,
            table_name: table.physical.clone(),
            sequence_number,
        })
    }

    /// Script text for one table.
    pub fn render(
        &self,
        table: &TableName,
        columns: &ReconciledColumns,
        identity_insert: bool,
        source_rows: i64,
    ) -> Result<String> {
        let target = qualify_mssql(&self.target_schema, &table.physical)?;
        let source = qualify_cross_db(&self.source_database, &self.source_schema, &table.physical)?;
        let col_list = quote_column_list(columns.names())?;

        let mut sql = String::new();
        sql.push_str(&format!("-- Fallback copy for {}\n", table.physical));
        sql.push_str(&format!("-- Source rows: {}\n", source_rows));
        sql.push_str(&format!("-- Generated: {}\n\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
        sql.push_str(&format!("USE {};\n\n", quote_mssql(&self.target_database)?));
        sql.push_str("SET XACT_ABORT ON;\n");
        sql.push_str("BEGIN TRANSACTION;\n\n");
        sql.push_str(&format!("DELETE FROM {};\n\n", target));
        if identity_insert {
            sql.push_str(&format!("SET IDENTITY_INSERT {} ON;\n\n", target));
        }
        sql.push_str(&format!("INSERT INTO {} ({})\n", target, col_list));
        sql.push_str(&format!("SELECT {}\nFROM {};\n\n", col_list, source));
        if identity_insert {
            sql.push_str(&format!("SET IDENTITY_INSERT {} OFF;\n\n", target));
        }
        sql.push_str("COMMIT TRANSACTION;\n");

        debug!("{}: rendered fallback script ({} bytes)", table, sql.len());
        Ok(sql)
    }
}

/// Highest `SQLnnnn_` sequence number already present in `dir`, or 0.
fn highest_existing_sequence(dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let digits = name.strip_prefix("SQL")?.split('_').next()?.to_string();
            digits.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
}
