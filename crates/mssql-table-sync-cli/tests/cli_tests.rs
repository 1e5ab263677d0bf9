//! CLI integration tests for mssql-table-sync.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that occur before any connection.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the mssql-table-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("mssql-table-sync").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

const VALID_CONNECTIONS: &str = r#"
source:
  host: localhost
  database: BC_PROD
  user: sa
  password: secret
target:
  host: localhost
  database: BC_TEST
  user: sa
  password: secret
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list-tables"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RESUME_FROM"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql-table-sync"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_from_env_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--from-env"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_replication_section_exits_with_code_1() {
    let file = config_file(VALID_CONNECTIONS);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "list-tables"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("replication"));
}

#[test]
fn test_invalid_batch_size_exits_with_code_1() {
    let yaml = format!(
        "{}replication:\n  companies: [FCL1]\n  app_guid: 437dbf0e-84ff-417a-965d-ed2bb9650972\n  batch_size: 5000\n",
        VALID_CONNECTIONS
    );
    let file = config_file(&yaml);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_invalid_exclusion_pattern_exits_with_code_1() {
    let yaml = format!(
        "{}replication:\n  companies: [FCL1]\n  app_guid: 437dbf0e-84ff-417a-965d-ed2bb9650972\n  exclude_patterns: [\"(unclosed\"]\n",
        VALID_CONNECTIONS
    );
    let file = config_file(&yaml);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1);
}

#[test]
fn test_from_env_without_variables_exits_with_code_1() {
    cmd()
        .env_clear()
        .args(["--from-env", "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("environment variable"));
}

#[test]
fn test_unknown_verbosity_exits_with_code_1() {
    cmd()
        .args(["--verbosity", "loud", "health-check"])
        .assert()
        .code(1);
}

// =============================================================================
// Subcommand Existence Tests
// =============================================================================

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test database connections"));
}

#[test]
fn test_list_tables_command_exists() {
    cmd()
        .args(["list-tables", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("List the tables"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
