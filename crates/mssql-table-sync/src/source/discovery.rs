//! Table discovery: the `{company}${name}${app_guid}` naming convention and
//! the exclusion rules applied to logical table names.

use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::source::SourcePool;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// Suffix marking a table extension companion table.
const EXTENSION_SUFFIX: &str = "$ext";

/// A discovered table: its physical name and the parts encoded in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableName {
    /// Company prefix.
    pub company: String,
    /// Logical table name, e.g. `Customer`.
    pub logical: String,
    /// Full physical name, e.g. `CRONUS$Customer$437dbf0e-...`.
    pub physical: String,
    /// Whether this is a `$ext` extension table.
    pub extension: bool,
}

impl TableName {
    /// Parse a physical table name against the naming convention.
    ///
    /// Returns `None` when the name does not belong to the company/app GUID pair.
    pub fn parse(physical: &str, company: &str, app_guid: &str) -> Option<Self> {
        let rest = strip_prefix_ci(physical, &format!("{}$", company))?;
        let guid_suffix = format!("${}", app_guid);

        let (logical, extension) = match strip_suffix_ci(rest, &guid_suffix) {
            Some(logical) => (logical, false),
            None => {
                let ext_suffix = format!("{}{}", guid_suffix, EXTENSION_SUFFIX);
                (strip_suffix_ci(rest, &ext_suffix)?, true)
            }
        };

        if logical.is_empty() {
            return None;
        }

        Some(Self {
            company: company.to_string(),
            logical: logical.to_string(),
            physical: physical.to_string(),
            extension,
        })
    }

    /// Upper-case ASCII alphanumeric rendering used in script file names.
    pub fn normalized(&self) -> String {
        let mut name: String = self
            .logical
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if self.extension {
            name.push_str("EXT");
        }
        name
    }

    /// Whether `name` refers to this table, by physical or logical name.
    pub fn matches(&self, name: &str) -> bool {
        self.physical.eq_ignore_ascii_case(name) || self.logical.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.physical)
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let idx = s.len().checked_sub(suffix.len())?;
    let tail = s.get(idx..)?;
    if tail.eq_ignore_ascii_case(suffix) {
        s.get(..idx)
    } else {
        None
    }
}

/// Exclusion rules for discovered tables.
#[derive(Debug, Clone)]
pub struct TableFilter {
    exclude_tables: HashSet<String>,
    exclude_patterns: Vec<Regex>,
    reserved_prefix: String,
    include_extension_tables: bool,
}

impl TableFilter {
    /// Build the filter, compiling the exclusion patterns.
    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            exclude_tables: config
                .exclude_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            exclude_patterns,
            reserved_prefix: config.reserved_prefix.clone(),
            include_extension_tables: config.include_extension_tables,
        })
    }

    /// Reason a table is excluded, or `None` if it should be replicated.
    pub fn exclusion(&self, table: &TableName) -> Option<String> {
        if table.extension && !self.include_extension_tables {
            return Some("extension tables disabled".to_string());
        }
        if !self.reserved_prefix.is_empty() && table.logical.starts_with(&self.reserved_prefix) {
            return Some(format!("reserved prefix {:?}", self.reserved_prefix));
        }
        if self.exclude_tables.contains(&table.logical.to_lowercase()) {
            return Some("exclusion list".to_string());
        }
        self.exclude_patterns
            .iter()
            .find(|re| re.is_match(&table.logical))
            .map(|re| format!("pattern {:?}", re.as_str()))
    }
}

/// List the tables of one company that should be replicated, in name order.
pub async fn discover_tables(
    source: &dyn SourcePool,
    company: &str,
    app_guid: &str,
    filter: &TableFilter,
) -> Result<Vec<TableName>> {
    let candidates = source.table_names(company, app_guid).await?;
    let total = candidates.len();

    let mut tables = Vec::with_capacity(total);
    for physical in candidates {
        let Some(table) = TableName::parse(&physical, company, app_guid) else {
            debug!("{}: does not match the naming convention, ignored", physical);
            continue;
        };
        if let Some(reason) = filter.exclusion(&table) {
            debug!("{}: excluded ({})", table, reason);
            continue;
        }
        tables.push(table);
    }

    info!(
        "Company {}: {} tables to replicate ({} candidates)",
        company,
        tables.len(),
        total
    );
    Ok(tables)
}
