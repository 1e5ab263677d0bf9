//! Column metadata and source/target schema reconciliation.

use crate::core::identifier::is_safe_identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A column as reported by `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared data type (`DATA_TYPE`), e.g. `nvarchar`, `datetime`.
    pub sql_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Why a column was left out of the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Present in the target only.
    MissingInSource,
    /// Present in the source only.
    MissingInTarget,
    /// A `timestamp` rowversion column, which cannot be written.
    Timestamp,
    /// Name contains characters outside the safe identifier set.
    UnsafeName,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::MissingInSource => "missing in source",
            DropReason::MissingInTarget => "missing in target",
            DropReason::Timestamp => "timestamp column",
            DropReason::UnsafeName => "unsafe name",
        };
        f.write_str(s)
    }
}

/// The columns copied for one table, in target column order.
///
/// Every column here exists in both schemas, is not named `timestamp`
/// and passes [`is_safe_identifier`].
#[derive(Debug, Clone, Default)]
pub struct ReconciledColumns {
    columns: Vec<ColumnDescriptor>,
    dropped: Vec<(String, DropReason)>,
}

impl ReconciledColumns {
    /// Columns to copy, carrying the target's declared types.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Column names in copy order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns left out, with the reason.
    pub fn dropped(&self) -> &[(String, DropReason)] {
        &self.dropped
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether any reconciled column is an identity column.
    ///
    /// Identity insert only has to be enabled when an identity value is
    /// actually supplied by the INSERT column list.
    pub fn requires_identity_insert(&self, identity_columns: &[String]) -> bool {
        self.columns
            .iter()
            .any(|c| identity_columns.iter().any(|id| id == &c.name))
    }
}

/// Compute the ordered set of columns safe to copy.
///
/// Names are matched exactly. The result follows the target's column order so
/// the INSERT column list and every value tuple line up. An empty schema on
/// either side yields an empty set.
pub fn reconcile(source: &[ColumnDescriptor], target: &[ColumnDescriptor]) -> ReconciledColumns {
    let source_names: HashSet<&str> = source.iter().map(|c| c.name.as_str()).collect();
    let target_names: HashSet<&str> = target.iter().map(|c| c.name.as_str()).collect();

    let mut result = ReconciledColumns::default();

    for col in target {
        let reason = if col.name.eq_ignore_ascii_case("timestamp") {
            Some(DropReason::Timestamp)
        } else if !source_names.contains(col.name.as_str()) {
            Some(DropReason::MissingInSource)
        } else if !is_safe_identifier(&col.name) {
            Some(DropReason::UnsafeName)
        } else {
            None
        };

        match reason {
            Some(reason) => result.dropped.push((col.name.clone(), reason)),
            None => result.columns.push(col.clone()),
        }
    }

    for col in source {
        if !target_names.contains(col.name.as_str()) {
            result
                .dropped
                .push((col.name.clone(), DropReason::MissingInTarget));
        }
    }

    result
}
