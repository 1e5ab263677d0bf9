//! SQL Server connection pools for the source and target databases.

use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bb8::Pool;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::info;

/// A tiberius client over a tokio TCP stream.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Which side of the replication a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    Source,
    Target,
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolRole::Source => write!(f, "source"),
            PoolRole::Target => write!(f, "target"),
        }
    }
}

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.trust_server_cert {
            config.trust_cert();
        }
        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a pool for one database and verify it with a round trip.
///
/// Any failure is reported as [`SyncError::Connection`], which aborts the run.
pub async fn build_pool(
    role: PoolRole,
    config: &DatabaseConfig,
    max_size: u32,
) -> Result<Pool<TiberiusConnectionManager>> {
    let connection_error = |message: String| SyncError::Connection { role, message };

    let manager = TiberiusConnectionManager::new(config.clone());
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(30))
        .build(manager)
        .await
        .map_err(|e| connection_error(format!("failed to create pool: {}", e)))?;

    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| connection_error(format!("failed to get connection: {}", e)))?;

        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| connection_error(e.to_string()))?
            .into_row()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
    }

    info!(
        "Connected to {} MSSQL: {}:{}/{} (pool_size={})",
        role, config.host, config.port, config.database, max_size
    );

    Ok(pool)
}
