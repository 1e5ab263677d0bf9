//! MSSQL target: pooled sessions, clearing, identity insert, index control and batch inserts.

use super::{InsertMode, TableDependencies, TargetPool, TargetSession};
use crate::codec::{encode_literal, encode_param};
use crate::config::DatabaseConfig;
use crate::connection::{build_pool, PoolRole, TiberiusConnectionManager};
use crate::core::identifier::{qualify_mssql, quote_column_list, quote_mssql};
use crate::core::{ColumnDescriptor, Row, RowBatch, SqlNullType, SqlValue};
use crate::error::{Result, SyncError};
use crate::source::server_version;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::ToSql;
use tracing::{debug, info};
use uuid::Uuid;

/// SQL Server accepts at most 2100 parameters per request; stay below it.
pub const MAX_PARAMS_PER_STATEMENT: usize = 2000;

/// MSSQL target pool implementation.
pub struct MssqlTarget {
    pool: Pool<TiberiusConnectionManager>,
    config: DatabaseConfig,
}

impl MssqlTarget {
    /// Connect to the target database.
    pub async fn connect(config: &DatabaseConfig, max_size: u32) -> Result<Self> {
        let pool = build_pool(PoolRole::Target, config, max_size).await?;
        Ok(Self {
            pool,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl TargetPool for MssqlTarget {
    async fn session(&self) -> Result<Box<dyn TargetSession>> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| SyncError::pool(e, "getting target session"))?;
        Ok(Box::new(MssqlSession {
            conn,
            schema: self.config.schema.clone(),
        }))
    }

    async fn test_connection(&self) -> Result<String> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting target connection"))?;
        server_version(&mut conn).await
    }

    fn database_name(&self) -> &str {
        &self.config.database
    }

    fn schema(&self) -> &str {
        &self.config.schema
    }

    async fn close(&self) {
        // bb8 closes the connections when the last pool handle is dropped
        info!(
            "Releasing target pool {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );
    }
}

/// A pooled target connection owned by one table copy.
struct MssqlSession {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    schema: String,
}

impl MssqlSession {
    fn qualified(&self, table: &str) -> Result<String> {
        qualify_mssql(&self.schema, table)
    }

    /// Run a statement as a plain SQL batch so session settings stick.
    async fn run_batch(&mut self, sql: String) -> Result<()> {
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn index_names(&mut self, table: &str, filter: &str) -> Result<Vec<String>> {
        let query = format!(
            r#"SELECT i.name
               FROM sys.indexes i
               JOIN sys.tables t ON i.object_id = t.object_id
               JOIN sys.schemas s ON t.schema_id = s.schema_id
               WHERE s.name = @P1 AND t.name = @P2 AND i.name IS NOT NULL AND {}
               ORDER BY i.index_id"#,
            filter
        );

        let rows = self
            .conn
            .query(query, &[&self.schema, &table])
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect())
    }

    async fn insert_parameterized(
        &mut self,
        qualified_table: &str,
        columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<u64> {
        let col_str = quote_column_list(columns.iter().map(|c| c.name.as_str()))?;
        let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / columns.len().max(1)).max(1);

        let mut total_inserted = 0u64;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = build_parameterized_insert(qualified_table, &col_str, columns.len(), chunk.len());

            let params: Vec<Box<dyn ToSql>> = chunk
                .iter()
                .flat_map(|row| {
                    row.iter()
                        .zip(columns)
                        .map(|(value, col)| to_sql_param(&encode_param(value, &col.sql_type)))
                })
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            self.conn.execute(sql, &param_refs).await?;
            total_inserted += chunk.len() as u64;
        }

        debug!(
            "{}: inserted {} rows (up to {} rows per statement)",
            qualified_table, total_inserted, rows_per_statement
        );
        Ok(total_inserted)
    }
}

#[async_trait]
impl TargetSession for MssqlSession {
    async fn columns(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let query = r#"
            SELECT COLUMN_NAME, DATA_TYPE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = self
            .conn
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?;

        Ok(rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn identity_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1
              AND TABLE_NAME = @P2
              AND COLUMNPROPERTY(
                    OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)),
                    COLUMN_NAME,
                    'IsIdentity'
                  ) = 1
        "#;

        let rows = self
            .conn
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect())
    }

    async fn dependencies(&mut self, table: &str) -> Result<TableDependencies> {
        let query = r#"
            SELECT
                (SELECT COUNT(*) FROM sys.foreign_keys
                  WHERE parent_object_id = OBJECT_ID(@P1)
                     OR referenced_object_id = OBJECT_ID(@P1)),
                (SELECT COUNT(*) FROM sys.triggers
                  WHERE parent_id = OBJECT_ID(@P1) AND is_disabled = 0)
        "#;
        let qualified = self.qualified(table)?;

        let row = self
            .conn
            .query(query, &[&qualified])
            .await?
            .into_row()
            .await?;

        let (fks, triggers) = row
            .map(|r| (r.get::<i32, _>(0).unwrap_or(0), r.get::<i32, _>(1).unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(TableDependencies {
            has_foreign_keys: fks > 0,
            has_enabled_triggers: triggers > 0,
        })
    }

    async fn truncate(&mut self, table: &str) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", self.qualified(table)?);
        self.run_batch(sql).await
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {}", self.qualified(table)?);
        let result = self.conn.execute(sql, &[]).await?;
        Ok(result.total())
    }

    async fn set_identity_insert(&mut self, table: &str, enabled: bool) -> Result<()> {
        let sql = format!(
            "SET IDENTITY_INSERT {} {}",
            self.qualified(table)?,
            if enabled { "ON" } else { "OFF" }
        );
        self.run_batch(sql).await
    }

    async fn suspendable_indexes(&mut self, table: &str) -> Result<Vec<String>> {
        self.index_names(
            table,
            "i.type = 2 AND i.is_primary_key = 0 AND i.is_disabled = 0",
        )
        .await
    }

    async fn disabled_indexes(&mut self, table: &str) -> Result<Vec<String>> {
        self.index_names(table, "i.is_disabled = 1").await
    }

    async fn disable_index(&mut self, table: &str, index: &str) -> Result<()> {
        let sql = format!(
            "ALTER INDEX {} ON {} DISABLE",
            quote_mssql(index)?,
            self.qualified(table)?
        );
        self.run_batch(sql).await
    }

    async fn rebuild_index(&mut self, table: &str, index: &str) -> Result<()> {
        let sql = format!(
            "ALTER INDEX {} ON {} REBUILD",
            quote_mssql(index)?,
            self.qualified(table)?
        );
        self.run_batch(sql).await
    }

    async fn insert_batch(
        &mut self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch: &RowBatch,
        mode: InsertMode,
    ) -> Result<u64> {
        if batch.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let qualified = self.qualified(table)?;

        match mode {
            InsertMode::Parameterized => {
                self.insert_parameterized(&qualified, columns, &batch.rows)
                    .await
            }
            InsertMode::Literal => {
                let sql = build_literal_insert(&qualified, columns, &batch.rows)?;
                self.run_batch(sql).await?;
                Ok(batch.len() as u64)
            }
        }
    }
}

/// `INSERT INTO t (cols) VALUES (@P1, @P2), (@P3, @P4), ...`
pub fn build_parameterized_insert(
    qualified_table: &str,
    col_str: &str,
    cols_per_row: usize,
    row_count: usize,
) -> String {
    let mut param_idx = 1;
    let value_groups: Vec<String> = (0..row_count)
        .map(|_| {
            let placeholders: Vec<String> = (0..cols_per_row)
                .map(|_| {
                    let p = format!("@P{}", param_idx);
                    param_idx += 1;
                    p
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        col_str,
        value_groups.join(", ")
    )
}

/// One multi-row INSERT with every value encoded as a literal.
pub fn build_literal_insert(
    qualified_table: &str,
    columns: &[ColumnDescriptor],
    rows: &[Row],
) -> Result<String> {
    let col_str = quote_column_list(columns.iter().map(|c| c.name.as_str()))?;
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row
                .iter()
                .zip(columns)
                .map(|(value, col)| encode_literal(value, &col.sql_type))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_table,
        col_str,
        tuples.join(", ")
    ))
}

/// Convert a bound value to a boxed ToSql trait object.
fn to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => typed_null(*null_type),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) if f.is_finite() => Box::new(*f),
        SqlValue::F64(f) if f.is_finite() => Box::new(*f),
        SqlValue::F32(_) => Box::new(Option::<f32>::None),
        SqlValue::F64(_) => Box::new(Option::<f64>::None),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        // Bound as datetime at midnight for compatibility with datetime columns
        SqlValue::Date(d) => Box::new(d.and_time(NaiveTime::MIN)),
        SqlValue::Time(t) => Box::new(*t),
    }
}

fn typed_null(null_type: SqlNullType) -> Box<dyn ToSql> {
    match null_type {
        SqlNullType::Bool => Box::new(Option::<bool>::None),
        SqlNullType::I16 => Box::new(Option::<i16>::None),
        SqlNullType::I32 => Box::new(Option::<i32>::None),
        SqlNullType::I64 => Box::new(Option::<i64>::None),
        SqlNullType::F32 => Box::new(Option::<f32>::None),
        SqlNullType::F64 => Box::new(Option::<f64>::None),
        SqlNullType::String => Box::new(Option::<String>::None),
        SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
        SqlNullType::Uuid => Box::new(Option::<Uuid>::None),
        SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
        SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
        SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
        SqlNullType::Date => Box::new(Option::<NaiveDate>::None),
        SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
    }
}
