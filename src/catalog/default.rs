//! Column default expressions.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ident;
use super::types::SqlType;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap());
static NEXTVAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^nextval\(.*\)$").unwrap());

/// A normalized column default.
///
/// Literals and a small whitelist of value functions are understood;
/// everything else is kept verbatim and compared byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DefaultExpr {
    Null,
    Bool(bool),
    /// Numeric literal as written, without a leading `+`.
    Number(String),
    /// Unescaped contents of a single-quoted string literal.
    String(String),
    Function(ValueFunction),
    Opaque(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueFunction {
    /// `now()`, `current_timestamp`, `transaction_timestamp()`.
    Now,
    CurrentDate,
    CurrentTime,
    LocalTimestamp,
    LocalTime,
    CurrentUser,
    SessionUser,
    GenRandomUuid,
}

impl ValueFunction {
    fn lookup(expr: &str) -> Option<Self> {
        let key = expr.to_ascii_lowercase();
        let key = key.strip_suffix("()").unwrap_or(&key);
        Some(match key {
            "now" | "current_timestamp" | "transaction_timestamp" => ValueFunction::Now,
            "current_date" => ValueFunction::CurrentDate,
            "current_time" => ValueFunction::CurrentTime,
            "localtimestamp" => ValueFunction::LocalTimestamp,
            "localtime" => ValueFunction::LocalTime,
            "current_user" | "user" => ValueFunction::CurrentUser,
            "session_user" => ValueFunction::SessionUser,
            "gen_random_uuid" => ValueFunction::GenRandomUuid,
            _ => return None,
        })
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            ValueFunction::Now => "now()",
            ValueFunction::CurrentDate => "current_date",
            ValueFunction::CurrentTime => "current_time",
            ValueFunction::LocalTimestamp => "localtimestamp",
            ValueFunction::LocalTime => "localtime",
            ValueFunction::CurrentUser => "current_user",
            ValueFunction::SessionUser => "session_user",
            ValueFunction::GenRandomUuid => "gen_random_uuid()",
        }
    }
}

impl DefaultExpr {
    /// Normalizes a default expression. Never fails: anything unrecognized
    /// becomes [`DefaultExpr::Opaque`].
    pub fn parse(input: &str) -> Self {
        let expr = strip_casts(input.trim());
        let expr = strip_wrapping_parens(expr);

        if let Some(literal) = unquote_literal(expr) {
            return DefaultExpr::String(literal);
        }
        if NUMBER.is_match(expr) {
            return DefaultExpr::Number(expr.trim_start_matches('+').to_string());
        }
        match expr.to_ascii_lowercase().as_str() {
            "null" => return DefaultExpr::Null,
            "true" => return DefaultExpr::Bool(true),
            "false" => return DefaultExpr::Bool(false),
            _ => {}
        }
        if let Some(function) = ValueFunction::lookup(expr) {
            return DefaultExpr::Function(function);
        }
        DefaultExpr::Opaque(expr.to_string())
    }

    /// Normalizes a default read back from the database, where Postgres adds
    /// casts to literals (`'-1'::integer`, `'x'::text`).
    pub fn from_catalog(input: &str, column_type: &SqlType) -> Self {
        DefaultExpr::parse(input).coerce_to(column_type)
    }

    /// The literal kind Postgres stores for this default on a column of
    /// type `ty`. A number on a character column is kept as a string, a
    /// numeric string on a number column as a number, and `'t'`/`'false'`
    /// on a boolean column as a boolean.
    #[must_use]
    pub fn coerce_to(self, ty: &SqlType) -> Self {
        match self {
            DefaultExpr::Number(n) if is_character_type(ty) => DefaultExpr::String(n),
            DefaultExpr::String(s) if is_numeric_type(ty) && NUMBER.is_match(&s) => {
                DefaultExpr::Number(s.trim_start_matches('+').to_string())
            }
            DefaultExpr::String(s) if *ty == SqlType::Boolean => match s.to_ascii_lowercase().as_str() {
                "true" | "t" => DefaultExpr::Bool(true),
                "false" | "f" => DefaultExpr::Bool(false),
                _ => DefaultExpr::String(s),
            },
            other => other,
        }
    }

    /// True for `nextval(...)`, the default Postgres attaches to serial columns.
    pub fn is_sequence(input: &str) -> bool {
        NEXTVAL.is_match(input.trim())
    }

    /// `nextval('<sequence>')`.
    pub fn next_value(sequence: &str) -> Self {
        DefaultExpr::Opaque(format!("nextval('{}')", ident::quote(sequence).replace('\'', "''")))
    }

    /// Sequence named by a `nextval(...)` default.
    pub fn sequence(&self) -> Option<String> {
        let DefaultExpr::Opaque(raw) = self else { return None };
        if !DefaultExpr::is_sequence(raw) {
            return None;
        }
        let open = raw.find('(')?;
        let argument = strip_casts(raw[open + 1..].strip_suffix(')')?.trim());
        let DefaultExpr::String(name) = DefaultExpr::parse(argument) else { return None };
        match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
            Some(quoted) => Some(quoted.replace("\"\"", "\"")),
            None => Some(name.to_ascii_lowercase()),
        }
    }

    /// SQL text for this default.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultExpr::Null => "null".to_string(),
            DefaultExpr::Bool(b) => b.to_string(),
            DefaultExpr::Number(n) => n.clone(),
            DefaultExpr::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultExpr::Function(f) => f.as_sql().to_string(),
            DefaultExpr::Opaque(raw) => raw.clone(),
        }
    }
}

fn is_character_type(ty: &SqlType) -> bool {
    matches!(ty, SqlType::Text | SqlType::Varchar(_) | SqlType::Char(_))
}

fn is_numeric_type(ty: &SqlType) -> bool {
    matches!(
        ty.storage_type(),
        SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::DoublePrecision
            | SqlType::Numeric(_)
    )
}

/// Returns the unescaped body of `'...'` when the whole input is one literal.
fn unquote_literal(expr: &str) -> Option<String> {
    let body = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            // Inside a literal a quote must be doubled.
            if chars.next() != Some('\'') {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}

/// Removes trailing `::type` casts that sit outside string literals.
fn strip_casts(expr: &str) -> &str {
    let mut end = expr.len();
    loop {
        match last_cast_position(&expr[..end]) {
            Some(pos) => end = pos,
            None => return expr[..end].trim_end(),
        }
    }
}

fn last_cast_position(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut in_quote = false;
    let mut depth = 0i32;
    let mut last = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            b':' if !in_quote && depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                last = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    // A cast must be the tail of the expression: `a::int + 1` is not stripped.
    let pos = last?;
    let target = &expr[pos + 2..];
    let is_type_name = !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '[' | ']' | '"'));
    if is_type_name {
        Some(pos)
    } else {
        None
    }
}

fn strip_wrapping_parens(mut expr: &str) -> &str {
    while expr.starts_with('(') && expr.ends_with(')') && encloses_all(expr) {
        expr = expr[1..expr.len() - 1].trim();
    }
    expr
}

fn encloses_all(expr: &str) -> bool {
    let mut depth = 0i32;
    let mut in_quote = false;
    for (i, c) in expr.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 && i != expr.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

impl fmt::Display for DefaultExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

impl Serialize for DefaultExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_sql())
    }
}

impl<'de> Deserialize<'de> for DefaultExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DefaultExpr::parse(&raw))
    }
}
