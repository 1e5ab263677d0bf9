//! Source database: metadata, row counts, discovery and streamed reads.

pub mod discovery;
pub mod stream;

pub use discovery::{discover_tables, TableFilter, TableName};
pub use stream::{BatchProducer, RowStream};

use crate::config::DatabaseConfig;
use crate::connection::{build_pool, PoolRole, TiberiusConnectionManager};
use crate::core::identifier::{qualify_mssql, quote_column_list};
use crate::core::{ColumnDescriptor, RowBatch, SqlNullType, SqlValue};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bb8::Pool;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSql, QueryItem, Row};
use tracing::{debug, info};

/// Read access to the source database.
#[async_trait]
pub trait SourcePool: Send + Sync {
    /// Columns of a table in ordinal order; empty if the table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Exact row count of a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Stream the given columns of a table in batches of `batch_size` rows.
    async fn stream_rows(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> Result<RowStream>;

    /// Physical names of candidate base tables for a company, in name order.
    async fn table_names(&self, company: &str, app_guid: &str) -> Result<Vec<String>>;

    /// Round trip to the server, returning its version string.
    async fn test_connection(&self) -> Result<String>;

    /// Database name, used for cross-database references in fallback scripts.
    fn database_name(&self) -> &str;

    /// Schema holding the replicated tables.
    fn schema(&self) -> &str;

    /// Release the pool.
    async fn close(&self);
}

/// MSSQL source pool implementation with connection pooling.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
    config: DatabaseConfig,
}

impl MssqlSource {
    /// Connect to the source database.
    pub async fn connect(config: &DatabaseConfig, max_size: u32) -> Result<Self> {
        let pool = build_pool(PoolRole::Source, config, max_size).await?;
        Ok(Self {
            pool,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl SourcePool for MssqlSource {
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting source connection for column lookup"))?;

        let query = r#"
            SELECT COLUMN_NAME, DATA_TYPE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = conn
            .query(query, &[&self.config.schema, &table])
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?;

        let columns: Vec<ColumnDescriptor> = rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    row.get::<&str, _>(0).unwrap_or_default(),
                    row.get::<&str, _>(1).unwrap_or_default(),
                )
            })
            .collect();

        debug!("{}: {} source columns", table, columns.len());
        Ok(columns)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting source connection for row count"))?;

        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {}",
            qualify_mssql(&self.config.schema, table)?
        );

        let row = conn
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?
            .into_row()
            .await
            .map_err(|e| SyncError::schema_lookup(table, e))?;

        Ok(row.and_then(|r| r.get::<i64, _>(0)).unwrap_or(0))
    }

    async fn stream_rows(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch_size: usize,
    ) -> Result<RowStream> {
        let sql = format!(
            "SELECT {} FROM {}",
            quote_column_list(columns.iter().map(|c| c.name.as_str()))?,
            qualify_mssql(&self.config.schema, table)?
        );

        // The connection is owned by the reading task for the lifetime of the stream.
        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| SyncError::pool(e, "getting source connection for row stream"))?;

        let table = table.to_string();
        Ok(RowStream::spawn(batch_size, move |mut producer| async move {
            if !producer.wait_for_demand().await {
                return;
            }

            let mut stream = match conn.simple_query(sql).await {
                Ok(stream) => stream,
                Err(e) => {
                    producer.send(Err(SyncError::Database(e))).await;
                    return;
                }
            };

            let batch_size = producer.batch_size();
            let mut batch = RowBatch::with_capacity(batch_size);
            loop {
                match stream.try_next().await {
                    Ok(Some(QueryItem::Row(row))) => {
                        batch.push(convert_row(row));
                        if batch.len() < batch_size {
                            continue;
                        }
                        let full = std::mem::replace(&mut batch, RowBatch::with_capacity(batch_size));
                        if !producer.send(Ok(full)).await || !producer.wait_for_demand().await {
                            return;
                        }
                    }
                    Ok(Some(QueryItem::Metadata(_))) => {}
                    Ok(None) => {
                        if !batch.is_empty() {
                            producer.send(Ok(batch)).await;
                        }
                        debug!("{}: source stream exhausted", table);
                        return;
                    }
                    Err(e) => {
                        producer.send(Err(SyncError::Database(e))).await;
                        return;
                    }
                }
            }
        }))
    }

    async fn table_names(&self, company: &str, app_guid: &str) -> Result<Vec<String>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting source connection for discovery"))?;

        let query = r#"
            SELECT TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE'
              AND TABLE_SCHEMA = @P1
              AND TABLE_NAME LIKE @P2
            ORDER BY TABLE_NAME
        "#;
        let pattern = format!("{}$%${}%", escape_like(company), escape_like(app_guid));

        let rows = conn
            .query(query, &[&self.config.schema, &pattern])
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get::<&str, _>(0).map(str::to_string))
            .collect())
    }

    async fn test_connection(&self) -> Result<String> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting source connection"))?;
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
            "Releasing source pool {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );
    }
}

/// `SELECT @@VERSION`, first line only.
pub(crate) async fn server_version(conn: &mut crate::connection::MssqlClient) -> Result<String> {
    let row = conn.simple_query("SELECT @@VERSION").await?.into_row().await?;
    Ok(row
        .and_then(|r| r.get::<&str, _>(0).map(|v| v.lines().next().unwrap_or_default().to_string()))
        .unwrap_or_default())
}

/// Escape `LIKE` wildcards in a literal.
fn escape_like(value: &str) -> String {
    value
        .replace('[', "[[]")
        .replace('%', "[%]")
        .replace('_', "[_]")
}

/// Convert a tiberius row into owned values, positionally.
fn convert_row(row: Row) -> Vec<SqlValue> {
    row.into_iter().map(convert_column_data).collect()
}

/// Convert one cell from the driver's column data.
fn convert_column_data(data: ColumnData<'static>) -> SqlValue {
    match data {
        ColumnData::U8(v) => v
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I16(v) => v.map(SqlValue::I16).unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I32(v) => v.map(SqlValue::I32).unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnData::I64(v) => v.map(SqlValue::I64).unwrap_or(SqlValue::Null(SqlNullType::I64)),
        ColumnData::F32(v) => v.map(SqlValue::F32).unwrap_or(SqlValue::Null(SqlNullType::F32)),
        ColumnData::F64(v) => v.map(SqlValue::F64).unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        ColumnData::String(v) => v
            .map(|s| SqlValue::Text(s.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid).unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Bytes(b.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::Text(x.into_owned().into_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ColumnData::Numeric(None) => SqlValue::Null(SqlNullType::Decimal),
        ColumnData::Numeric(Some(n)) => {
            Decimal::try_from_i128_with_scale(n.value(), n.scale() as u32)
                .map(SqlValue::Decimal)
                .unwrap_or_else(|_| SqlValue::Text(n.to_string()))
        }
        ColumnData::Date(_) => from_sql::<NaiveDate>(&data)
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        ColumnData::Time(_) => from_sql::<NaiveTime>(&data)
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        ColumnData::DateTimeOffset(_) => from_sql::<DateTime<FixedOffset>>(&data)
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            from_sql::<NaiveDateTime>(&data)
                .map(SqlValue::DateTime)
                .unwrap_or(SqlValue::Null(SqlNullType::DateTime))
        }
    }
}

fn from_sql<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>) -> Option<T> {
    T::from_sql(data).ok().flatten()
}
