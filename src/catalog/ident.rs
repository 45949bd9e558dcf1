//! Identifier normalization and quoting.

use once_cell::sync::Lazy;
use regex::Regex;

static SIMPLE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").unwrap());

/// Words that must be quoted even when they are otherwise plain identifiers.
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both", "case",
    "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false", "fetch",
    "for", "foreign", "from", "grant", "group", "having", "in", "initially", "intersect", "into",
    "lateral", "leading", "limit", "localtime", "localtimestamp", "not", "null", "offset", "on",
    "only", "or", "order", "placing", "primary", "references", "returning", "select",
    "session_user", "some", "symmetric", "table", "then", "to", "trailing", "true", "union",
    "unique", "user", "using", "variadic", "when", "where", "window", "with",
];

/// Trims and validates an identifier.
pub(crate) fn normalize(name: &str, what: &str) -> Result<String, String> {
    let name = name.trim_end();
    if name.is_empty() {
        return Err(format!("{} name must not be empty", what));
    }
    if !name.is_ascii() {
        return Err(format!("{} name {:?} must be ASCII", what, name));
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err(format!("{} name {:?} contains control characters", what, name));
    }
    if name.starts_with(char::is_whitespace) {
        return Err(format!("{} name {:?} has leading whitespace", what, name));
    }
    Ok(name.to_string())
}

/// Renders an identifier for SQL, quoting it only when Postgres would
/// otherwise fold or reject it.
///
/// Catalog names are the names Postgres stores, so they are compared
/// exactly; folding of unquoted names happens only when SQL text is read.
pub fn quote(name: &str) -> String {
    if SIMPLE_IDENT.is_match(name) && !RESERVED.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// `<table>_pkey`, the Postgres default primary key constraint name.
pub fn primary_key_constraint(table: &str) -> String {
    format!("{}_pkey", table)
}

/// `<table>_<column>_fkey`, the Postgres default foreign key constraint name.
pub fn foreign_key_constraint(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}

/// `<table>_<column>_seq`, the sequence Postgres creates for a serial column.
pub fn sequence_name(table: &str, column: &str) -> String {
    format!("{}_{}_seq", table, column)
}
