//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{Result, SyncError};
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    ///
    /// Connection settings come from `SRC_DB_*` and `TGT_DB_*`
    /// (`USER`, `PASSWORD`, `SERVER`, `NAME`, optional `PORT`). Replication
    /// settings come from `SYNC_COMPANIES` (comma separated), `SYNC_APP_GUID`
    /// and the optional `SYNC_EXCLUDE_TABLES`, `SYNC_BATCH_SIZE`,
    /// `SYNC_FALLBACK_THRESHOLD`, `SYNC_FALLBACK_DIR`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SyncError::Config(format!("environment variable {} is not set", key)))
        };
        let optional = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database = |prefix: &str| -> Result<DatabaseConfig> {
            let port = match optional(&format!("{}_PORT", prefix)) {
                Some(p) => p.parse::<u16>().map_err(|_| {
                    SyncError::Config(format!("{}_PORT is not a valid port: {}", prefix, p))
                })?,
                None => 1433,
            };
            Ok(DatabaseConfig {
                host: required(&format!("{}_SERVER", prefix))?,
                port,
                database: required(&format!("{}_NAME", prefix))?,
                user: required(&format!("{}_USER", prefix))?,
                password: required(&format!("{}_PASSWORD", prefix))?,
                schema: "dbo".to_string(),
                encrypt: false,
                trust_server_cert: true,
            })
        };

        let source = database("SRC_DB")?;
        let target = database("TGT_DB")?;

        let mut replication =
            ReplicationConfig::new(split_list(&required("SYNC_COMPANIES")?), required("SYNC_APP_GUID")?);

        if let Some(tables) = optional("SYNC_EXCLUDE_TABLES") {
            replication.exclude_tables = split_list(&tables);
        }
        if let Some(size) = optional("SYNC_BATCH_SIZE") {
            replication.batch_size = Some(size.parse().map_err(|_| {
                SyncError::Config(format!("SYNC_BATCH_SIZE is not a number: {}", size))
            })?);
        }
        if let Some(threshold) = optional("SYNC_FALLBACK_THRESHOLD") {
            replication.fallback_threshold = Some(threshold.parse().map_err(|_| {
                SyncError::Config(format!("SYNC_FALLBACK_THRESHOLD is not a number: {}", threshold))
            })?);
        }
        if let Some(dir) = optional("SYNC_FALLBACK_DIR") {
            replication.fallback_dir = PathBuf::from(dir);
        }

        let config = Config {
            source,
            target,
            replication,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
source:
  host: src.local
  database: BC_PROD
  user: sa
  password: secret
target:
  host: tgt.local
  database: BC_TEST
  user: sa
  password: secret
replication:
  companies: [FCL1, RMK]
  app_guid: 437dbf0e-84ff-417a-965d-ed2bb9650972
  exclude_tables: [Change Log Entry]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.target.schema, "dbo");
        assert!(!config.source.encrypt);
        assert!(config.source.trust_server_cert);

        let r = &config.replication;
        assert_eq!(r.companies, vec!["FCL1", "RMK"]);
        assert_eq!(r.get_batch_size(), 1000);
        assert_eq!(r.get_fallback_threshold(), 100_000);
        assert_eq!(r.fallback_dir, PathBuf::from("fallback_scripts"));
        assert_eq!(r.reserved_prefix, "_");
        assert!(r.suspend_indexes);
        assert!(r.include_extension_tables);
        assert_eq!(r.clear_mode, ClearMode::Auto);
        assert_eq!(r.insert_mode, InsertMode::Parameterized);
    }

    #[test]
    fn test_from_yaml_parses_modes() {
        let yaml = format!(
            "{}  clear_mode: truncate\n  insert_mode: literal\n  suspend_indexes: false\n",
            YAML
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.replication.clear_mode, ClearMode::Truncate);
        assert_eq!(config.replication.insert_mode, InsertMode::Literal);
        assert!(!config.replication.suspend_indexes);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_mode() {
        let yaml = format!("{}  clear_mode: drop\n", YAML);
        assert!(matches!(Config::from_yaml(&yaml), Err(SyncError::Yaml(_))));
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("SRC_DB_USER", "reader"),
            ("SRC_DB_PASSWORD", "pw1"),
            ("SRC_DB_SERVER", "src.local"),
            ("SRC_DB_NAME", "BC_PROD"),
            ("TGT_DB_USER", "writer"),
            ("TGT_DB_PASSWORD", "pw2"),
            ("TGT_DB_SERVER", "tgt.local"),
            ("TGT_DB_NAME", "BC_TEST"),
            ("TGT_DB_PORT", "14330"),
            ("SYNC_COMPANIES", "FCL1, RMK ,FLM1"),
            ("SYNC_APP_GUID", "437dbf0e-84ff-417a-965d-ed2bb9650972"),
        ])
    }

    #[test]
    fn test_from_lookup_reads_connection_variables() {
        let vars = base_env();
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.source.user, "reader");
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.target.port, 14330);
        assert_eq!(config.target.database, "BC_TEST");
        assert_eq!(config.replication.companies, vec!["FCL1", "RMK", "FLM1"]);
    }

    #[test]
    fn test_from_lookup_optional_settings() {
        let mut vars = base_env();
        vars.insert("SYNC_BATCH_SIZE".into(), "500".into());
        vars.insert("SYNC_FALLBACK_DIR".into(), "/tmp/scripts".into());
        vars.insert("SYNC_EXCLUDE_TABLES".into(), "Item Ledger Entry,G_L Entry".into());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.replication.get_batch_size(), 500);
        assert_eq!(config.replication.fallback_dir, PathBuf::from("/tmp/scripts"));
        assert_eq!(config.replication.exclude_tables.len(), 2);
    }

    #[test]
    fn test_from_lookup_missing_variable() {
        let mut vars = base_env();
        vars.remove("TGT_DB_SERVER");
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("TGT_DB_SERVER"));
    }

    #[test]
    fn test_from_lookup_requires_password() {
        let mut vars = base_env();
        vars.remove("SRC_DB_PASSWORD");
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("SRC_DB_PASSWORD"));

        let mut vars = base_env();
        vars.insert("TGT_DB_PASSWORD".into(), String::new());
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("TGT_DB_PASSWORD"));
    }

    #[test]
    fn test_from_lookup_bad_port() {
        let mut vars = base_env();
        vars.insert("SRC_DB_PORT".into(), "not-a-port".into());
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());
    }
}
