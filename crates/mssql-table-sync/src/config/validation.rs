//! Configuration validation.

use super::{Config, DatabaseConfig, MAX_BATCH_SIZE};
use crate::error::{Result, SyncError};
use regex::Regex;
use uuid::Uuid;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("target", &config.target)?;

    // Replicating a database onto itself would clear every table before reading it
    if config.source.host.eq_ignore_ascii_case(&config.target.host)
        && config.source.port == config.target.port
        && config.source.database.eq_ignore_ascii_case(&config.target.database)
    {
        return Err(SyncError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let replication = &config.replication;

    if replication.companies.is_empty() {
        return Err(SyncError::Config(
            "replication.companies must list at least one company".into(),
        ));
    }
    if let Some(company) = replication
        .companies
        .iter()
        .find(|c| c.trim().is_empty() || c.contains('$'))
    {
        return Err(SyncError::Config(format!(
            "replication.companies contains an invalid company name: {:?}",
            company
        )));
    }

    if Uuid::parse_str(&replication.app_guid).is_err() {
        return Err(SyncError::Config(format!(
            "replication.app_guid is not a valid GUID: {:?}",
            replication.app_guid
        )));
    }

    match replication.batch_size {
        Some(0) => {
            return Err(SyncError::Config(
                "replication.batch_size must be at least 1".into(),
            ))
        }
        Some(n) if n > MAX_BATCH_SIZE => {
            return Err(SyncError::Config(format!(
                "replication.batch_size must be at most {}, got {}",
                MAX_BATCH_SIZE, n
            )))
        }
        _ => {}
    }

    if let Some(threshold) = replication.fallback_threshold {
        if threshold < 0 {
            return Err(SyncError::Config(
                "replication.fallback_threshold cannot be negative".into(),
            ));
        }
    }

    if let Some(0) = replication.max_source_connections {
        return Err(SyncError::Config(
            "replication.max_source_connections must be at least 1".into(),
        ));
    }
    if let Some(0) = replication.max_target_connections {
        return Err(SyncError::Config(
            "replication.max_target_connections must be at least 1".into(),
        ));
    }

    for pattern in &replication.exclude_patterns {
        Regex::new(pattern)?;
    }

    Ok(())
}

fn validate_database(role: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(SyncError::Config(format!("{}.host is required", role)));
    }
    if db.database.is_empty() {
        return Err(SyncError::Config(format!("{}.database is required", role)));
    }
    if db.user.is_empty() {
        return Err(SyncError::Config(format!("{}.user is required", role)));
    }
    if db.schema.is_empty() {
        return Err(SyncError::Config(format!("{}.schema cannot be empty", role)));
    }
    Ok(())
}
