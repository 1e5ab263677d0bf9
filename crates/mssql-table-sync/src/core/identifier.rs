//! Identifier validation and bracket quoting for dynamically built T-SQL.
//!
//! Table and column names cannot be bound as parameters, so every statement
//! that names them goes through [`quote_mssql`] or one of the qualifiers here.
//! Names are validated first (no null bytes, at most 128 characters) and then
//! bracket-quoted with embedded `]` doubled.

use crate::error::{Result, SyncError};

/// SQL Server identifier length limit.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than 128 characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Whether a column name may be copied at all.
///
/// Only word characters, whitespace, `-`, `$`, `(` and `)` are accepted.
/// Columns failing this check are dropped from the copy rather than quoted.
pub fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_IDENTIFIER_LENGTH
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || c == '_'
                || c.is_whitespace()
                || matches!(c, '-' | '$' | '(' | ')')
        })
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema: `[schema].[table]`.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Three-part name `[database].[schema].[table]` for cross-database reads.
pub fn qualify_cross_db(database: &str, schema: &str, table: &str) -> Result<String> {
    Ok(format!(
        "{}.{}",
        quote_mssql(database)?,
        qualify_mssql(schema, table)?
    ))
}

/// Comma-separated bracket-quoted column list.
pub fn quote_column_list<'a, I>(names: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let quoted = names
        .into_iter()
        .map(quote_mssql)
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}
