//! Canonical column types.
//!
//! Every type string accepted by the catalog is folded into [`SqlType`]:
//! aliases such as `INT4` or `character varying(255)` map onto a single
//! canonical spelling, and unrecognized names are carried as lowercased
//! opaque names.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static TYPE_WITH_MODIFIERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z][a-z0-9_ ]*?)\s*\(\s*([^)]*)\)\s*(.*)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    SmallInt,
    Integer,
    BigInt,
    SmallSerial,
    Serial,
    BigSerial,
    Real,
    DoublePrecision,
    /// `numeric` with optional `(precision, scale)`; `decimal` folds here.
    Numeric(Option<(u32, u32)>),
    Text,
    Varchar(Option<u32>),
    /// `char(n)`; bare `char` is `char(1)`.
    Char(Option<u32>),
    Bytea,
    Boolean,
    Json,
    Jsonb,
    /// Temporal types carry their fractional-second precision, if declared.
    Timestamp(Option<u32>),
    TimestampTz(Option<u32>),
    Time(Option<u32>),
    TimeTz(Option<u32>),
    Date,
    Uuid,
    /// Any other type name, lowercased.
    Other(String),
}

/// How a column type change affects existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    /// Same storage, different spelling or a representation-only change.
    Equivalent,
    /// Every old value fits the new type.
    Widening,
    /// Some old values may be truncated or rejected.
    Narrowing,
    /// Different type family; conversion may fail or lose data.
    Incompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Integer(u8),
    Float(u8),
    Numeric,
    Character,
    Temporal,
    TimeOfDay,
    Other,
}

/// Postgres keeps at most six fractional-second digits.
const MAX_SECONDS_PRECISION: u32 = 6;

impl SqlType {
    /// Parses a type name, accepting the usual Postgres aliases.
    pub fn parse(input: &str) -> Result<Self, String> {
        let lowered = input.trim().to_ascii_lowercase();
        let squeezed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
        if squeezed.is_empty() {
            return Err("type name must not be empty".to_string());
        }

        if let Some(caps) = TYPE_WITH_MODIFIERS.captures(&squeezed) {
            let base = caps[1].trim();
            let modifiers = parse_modifiers(&caps[2])
                .map_err(|e| format!("invalid type {:?}: {}", input.trim(), e))?;
            let suffix = caps[3].trim();
            return Self::with_modifiers(base, &modifiers, suffix)
                .ok_or_else(|| format!("invalid type modifiers in {:?}", input.trim()));
        }

        Ok(match squeezed.as_str() {
            "smallint" | "int2" => SqlType::SmallInt,
            "integer" | "int" | "int4" => SqlType::Integer,
            "bigint" | "int8" => SqlType::BigInt,
            "smallserial" | "serial2" => SqlType::SmallSerial,
            "serial" | "serial4" => SqlType::Serial,
            "bigserial" | "serial8" => SqlType::BigSerial,
            "real" | "float4" => SqlType::Real,
            "double precision" | "float8" | "float" => SqlType::DoublePrecision,
            "numeric" | "decimal" => SqlType::Numeric(None),
            "text" => SqlType::Text,
            "varchar" | "character varying" => SqlType::Varchar(None),
            "char" | "character" | "bpchar" => SqlType::Char(Some(1)),
            "bytea" => SqlType::Bytea,
            "boolean" | "bool" => SqlType::Boolean,
            "json" => SqlType::Json,
            "jsonb" => SqlType::Jsonb,
            "timestamp" | "timestamp without time zone" => SqlType::Timestamp(None),
            "timestamptz" | "timestamp with time zone" => SqlType::TimestampTz(None),
            "time" | "time without time zone" => SqlType::Time(None),
            "timetz" | "time with time zone" => SqlType::TimeTz(None),
            "date" => SqlType::Date,
            "uuid" => SqlType::Uuid,
            other => SqlType::Other(other.to_string()),
        })
    }

    fn with_modifiers(base: &str, modifiers: &[u32], suffix: &str) -> Option<Self> {
        let ty = match (base, modifiers) {
            ("numeric" | "decimal", [p]) => SqlType::Numeric(Some((*p, 0))),
            ("numeric" | "decimal", [p, s]) if s <= p => SqlType::Numeric(Some((*p, *s))),
            ("varchar" | "character varying", [n]) if *n > 0 => SqlType::Varchar(Some(*n)),
            ("char" | "character" | "bpchar", [n]) if *n > 0 => SqlType::Char(Some(*n)),
            ("timestamp", [p]) if *p <= MAX_SECONDS_PRECISION => match suffix {
                "" | "without time zone" => return Some(SqlType::Timestamp(Some(*p))),
                "with time zone" => return Some(SqlType::TimestampTz(Some(*p))),
                _ => return None,
            },
            ("timestamptz", [p]) if *p <= MAX_SECONDS_PRECISION => SqlType::TimestampTz(Some(*p)),
            ("time", [p]) if *p <= MAX_SECONDS_PRECISION => match suffix {
                "" | "without time zone" => return Some(SqlType::Time(Some(*p))),
                "with time zone" => return Some(SqlType::TimeTz(Some(*p))),
                _ => return None,
            },
            ("timetz", [p]) if *p <= MAX_SECONDS_PRECISION => SqlType::TimeTz(Some(*p)),
            ("numeric" | "decimal" | "varchar" | "character varying" | "char" | "character"
            | "bpchar" | "timestamp" | "timestamptz" | "time" | "timetz", _) => return None,
            (other, mods) => {
                let rendered: Vec<String> = mods.iter().map(u32::to_string).collect();
                SqlType::Other(format!("{}({})", other, rendered.join(",")))
            }
        };
        if suffix.is_empty() {
            Some(ty)
        } else {
            None
        }
    }

    /// Spelling the catalog stores: bare `char` becomes `char(1)`.
    pub(crate) fn normalized(self) -> SqlType {
        match self {
            SqlType::Char(None) => SqlType::Char(Some(1)),
            other => other,
        }
    }

    /// Fractional-second digits a time or timestamp keeps.
    fn seconds_precision(&self) -> Option<u32> {
        match self {
            SqlType::Timestamp(p) | SqlType::TimestampTz(p) | SqlType::Time(p) | SqlType::TimeTz(p) => {
                Some(p.unwrap_or(MAX_SECONDS_PRECISION))
            }
            _ => None,
        }
    }

    /// Serial types carry an implicit sequence default.
    pub fn is_serial(&self) -> bool {
        matches!(self, SqlType::SmallSerial | SqlType::Serial | SqlType::BigSerial)
    }

    /// The integer type a serial column is stored as.
    pub fn storage_type(&self) -> SqlType {
        match self {
            SqlType::SmallSerial => SqlType::SmallInt,
            SqlType::Serial => SqlType::Integer,
            SqlType::BigSerial => SqlType::BigInt,
            other => other.clone(),
        }
    }

    /// Serial spelling for an integer column backed by a sequence.
    pub fn serial_for(storage: &SqlType) -> Option<SqlType> {
        match storage {
            SqlType::SmallInt => Some(SqlType::SmallSerial),
            SqlType::Integer => Some(SqlType::Serial),
            SqlType::BigInt => Some(SqlType::BigSerial),
            _ => None,
        }
    }

    fn family(&self) -> Family {
        match self.storage_type() {
            SqlType::SmallInt => Family::Integer(2),
            SqlType::Integer => Family::Integer(4),
            SqlType::BigInt => Family::Integer(8),
            SqlType::Real => Family::Float(4),
            SqlType::DoublePrecision => Family::Float(8),
            SqlType::Numeric(_) => Family::Numeric,
            SqlType::Text | SqlType::Varchar(_) | SqlType::Char(_) => Family::Character,
            SqlType::Date | SqlType::Timestamp(_) | SqlType::TimestampTz(_) => Family::Temporal,
            SqlType::Time(_) | SqlType::TimeTz(_) => Family::TimeOfDay,
            _ => Family::Other,
        }
    }

    /// Classifies converting a column from `self` to `to`.
    pub fn change_to(&self, to: &SqlType) -> TypeChange {
        if self == to || self.storage_type() == to.storage_type() {
            return TypeChange::Equivalent;
        }
        match (self.family(), to.family()) {
            (Family::Integer(a), Family::Integer(b)) | (Family::Float(a), Family::Float(b)) => {
                if b >= a {
                    TypeChange::Widening
                } else {
                    TypeChange::Narrowing
                }
            }
            (Family::Integer(_), Family::Numeric) => match to {
                SqlType::Numeric(None) => TypeChange::Widening,
                _ => TypeChange::Narrowing,
            },
            (Family::Integer(_), Family::Float(_)) => TypeChange::Widening,
            (Family::Float(_) | Family::Numeric, Family::Integer(_)) => TypeChange::Narrowing,
            (Family::Numeric, Family::Float(_)) => TypeChange::Narrowing,
            (Family::Numeric, Family::Numeric) => numeric_change(self, to),
            (Family::Character, Family::Character) => character_change(self, to),
            // Dates gain a midnight time component; timestamps lose theirs.
            (Family::Temporal, Family::Temporal) => match (self, to) {
                (SqlType::Date, _) => TypeChange::Widening,
                (_, SqlType::Date) => TypeChange::Narrowing,
                _ => precision_change(self, to),
            },
            (Family::TimeOfDay, Family::TimeOfDay) => precision_change(self, to),
            (_, Family::Character) if matches!(to, SqlType::Text) => TypeChange::Widening,
            _ => TypeChange::Incompatible,
        }
    }
}

fn numeric_change(from: &SqlType, to: &SqlType) -> TypeChange {
    match (from, to) {
        (_, SqlType::Numeric(None)) => TypeChange::Widening,
        (SqlType::Numeric(None), SqlType::Numeric(Some(_))) => TypeChange::Narrowing,
        (SqlType::Numeric(Some((p1, s1))), SqlType::Numeric(Some((p2, s2)))) => {
            // Integer digits are precision minus scale.
            match (p1.checked_sub(*s1), p2.checked_sub(*s2)) {
                (Some(old), Some(new)) if s2 >= s1 && new >= old => TypeChange::Widening,
                _ => TypeChange::Narrowing,
            }
        }
        _ => TypeChange::Incompatible,
    }
}

fn character_change(from: &SqlType, to: &SqlType) -> TypeChange {
    let limit = |t: &SqlType| match t {
        SqlType::Varchar(n) => *n,
        SqlType::Char(n) => Some(n.unwrap_or(1)),
        _ => None,
    };
    match (limit(from), limit(to)) {
        (_, None) => TypeChange::Widening,
        (None, Some(_)) => TypeChange::Narrowing,
        (Some(old), Some(new)) => narrowing_if(new, old),
    }
}

/// Time and timestamp changes round values when they lose fractional digits.
fn precision_change(from: &SqlType, to: &SqlType) -> TypeChange {
    match (from.seconds_precision(), to.seconds_precision()) {
        (Some(old), Some(new)) if new == old => TypeChange::Equivalent,
        (Some(old), Some(new)) => narrowing_if(new, old),
        _ => TypeChange::Incompatible,
    }
}

fn narrowing_if(new: u32, old: u32) -> TypeChange {
    if new < old {
        TypeChange::Narrowing
    } else {
        TypeChange::Widening
    }
}

fn parse_modifiers(raw: &str) -> Result<Vec<u32>, String> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u32>()
                .map_err(|_| format!("modifier {:?} is not a non-negative integer", part))
        })
        .collect()
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::SmallInt => f.write_str("smallint"),
            SqlType::Integer => f.write_str("integer"),
            SqlType::BigInt => f.write_str("bigint"),
            SqlType::SmallSerial => f.write_str("smallserial"),
            SqlType::Serial => f.write_str("serial"),
            SqlType::BigSerial => f.write_str("bigserial"),
            SqlType::Real => f.write_str("real"),
            SqlType::DoublePrecision => f.write_str("double precision"),
            SqlType::Numeric(None) => f.write_str("numeric"),
            SqlType::Numeric(Some((p, s))) => write!(f, "numeric({},{})", p, s),
            SqlType::Text => f.write_str("text"),
            SqlType::Varchar(None) => f.write_str("varchar"),
            SqlType::Varchar(Some(n)) => write!(f, "varchar({})", n),
            SqlType::Char(n) => write!(f, "char({})", n.unwrap_or(1)),
            SqlType::Bytea => f.write_str("bytea"),
            SqlType::Boolean => f.write_str("boolean"),
            SqlType::Json => f.write_str("json"),
            SqlType::Jsonb => f.write_str("jsonb"),
            SqlType::Timestamp(p) => write!(f, "timestamp{}", Precision(*p)),
            SqlType::TimestampTz(p) => write!(f, "timestamp{} with time zone", Precision(*p)),
            SqlType::Time(p) => write!(f, "time{}", Precision(*p)),
            SqlType::TimeTz(p) => write!(f, "time{} with time zone", Precision(*p)),
            SqlType::Date => f.write_str("date"),
            SqlType::Uuid => f.write_str("uuid"),
            SqlType::Other(name) => f.write_str(name),
        }
    }
}

/// Renders `(p)` when a precision was declared.
struct Precision(Option<u32>);

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(p) => write!(f, "({})", p),
            None => Ok(()),
        }
    }
}

impl FromStr for SqlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SqlType::parse(s)
    }
}

impl Serialize for SqlType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SqlType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SqlType::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> SqlType {
        SqlType::parse(s).unwrap()
    }

    #[test]
    fn aliases_fold_to_canonical_names() {
        assert_eq!(ty("INT4"), SqlType::Integer);
        assert_eq!(ty("INTEGER"), SqlType::Integer);
        assert_eq!(ty("int8"), SqlType::BigInt);
        assert_eq!(ty("float8"), SqlType::DoublePrecision);
        assert_eq!(ty("Double   Precision"), SqlType::DoublePrecision);
        assert_eq!(ty("bool"), SqlType::Boolean);
        assert_eq!(ty("timestamptz"), SqlType::TimestampTz(None));
        assert_eq!(ty("timestamp without time zone"), SqlType::Timestamp(None));
        assert_eq!(ty("character varying(255)"), SqlType::Varchar(Some(255)));
        assert_eq!(ty("decimal(10, 2)"), SqlType::Numeric(Some((10, 2))));
        assert_eq!(ty("char"), SqlType::Char(Some(1)));
        assert_eq!(ty("bpchar"), ty("character(1)"));
    }

    #[test]
    fn temporal_precision_is_kept() {
        assert_eq!(ty("timestamp(3) with time zone"), SqlType::TimestampTz(Some(3)));
        assert_eq!(ty("timestamptz(3)"), SqlType::TimestampTz(Some(3)));
        assert_eq!(ty("time(0)"), SqlType::Time(Some(0)));
        assert_eq!(ty("timestamp(3) with time zone").to_string(), "timestamp(3) with time zone");
        assert_ne!(ty("timestamp(3)"), ty("timestamp"));
        assert!(SqlType::parse("timestamp(7)").is_err());
        assert_eq!(SqlType::Char(None).normalized(), SqlType::Char(Some(1)));
    }

    #[test]
    fn serial_types_stay_distinct() {
        assert_eq!(ty("serial"), SqlType::Serial);
        assert_eq!(ty("serial8"), SqlType::BigSerial);
        assert_ne!(ty("serial"), ty("integer"));
        assert!(ty("bigserial").is_serial());
    }

    #[test]
    fn display_is_canonical_and_reparses() {
        for name in [
            "numeric(10,2)",
            "varchar(64)",
            "char(1)",
            "timestamp with time zone",
            "time(3) with time zone",
            "double precision",
        ] {
            assert_eq!(ty(name).to_string(), name);
            assert_eq!(ty(&ty(name).to_string()), ty(name));
        }
    }

    #[test]
    fn unknown_types_are_kept_lowercased() {
        assert_eq!(ty("INET"), SqlType::Other("inet".to_string()));
        assert_eq!(ty("geometry(4326)").to_string(), "geometry(4326)");
    }

    #[test]
    fn malformed_modifiers_are_rejected() {
        assert!(SqlType::parse("varchar(abc)").is_err());
        assert!(SqlType::parse("numeric(2,5)").is_err());
        assert!(SqlType::parse("").is_err());
    }

    #[test]
    fn classifies_type_changes() {
        assert_eq!(ty("integer").change_to(&ty("bigint")), TypeChange::Widening);
        assert_eq!(ty("bigint").change_to(&ty("integer")), TypeChange::Narrowing);
        assert_eq!(ty("varchar(255)").change_to(&ty("varchar(64)")), TypeChange::Narrowing);
        assert_eq!(ty("varchar(64)").change_to(&ty("text")), TypeChange::Widening);
        assert_eq!(ty("text").change_to(&ty("varchar(10)")), TypeChange::Narrowing);
        assert_eq!(ty("char(10)").change_to(&ty("char(4)")), TypeChange::Narrowing);
        assert_eq!(ty("numeric(10,2)").change_to(&ty("numeric(12,2)")), TypeChange::Widening);
        assert_eq!(ty("numeric(10,2)").change_to(&ty("numeric(10,0)")), TypeChange::Narrowing);
        assert_eq!(ty("text").change_to(&ty("integer")), TypeChange::Incompatible);
        assert_eq!(ty("serial").change_to(&ty("integer")), TypeChange::Equivalent);
        assert_eq!(ty("integer").change_to(&ty("text")), TypeChange::Widening);
        assert_eq!(ty("date").change_to(&ty("timestamp")), TypeChange::Widening);
        assert_eq!(ty("timestamptz").change_to(&ty("date")), TypeChange::Narrowing);
        assert_eq!(ty("timestamp").change_to(&ty("timestamptz")), TypeChange::Equivalent);
        assert_eq!(ty("timestamp").change_to(&ty("timestamp(3)")), TypeChange::Narrowing);
        assert_eq!(ty("timestamp(0)").change_to(&ty("timestamptz(3)")), TypeChange::Widening);
        assert_eq!(ty("time(6)").change_to(&ty("time")), TypeChange::Equivalent);
        assert_eq!(ty("date").change_to(&ty("time")), TypeChange::Incompatible);
        assert_eq!(ty("char").change_to(&ty("char(4)")), TypeChange::Widening);
        assert_eq!(ty("varchar(10)").change_to(&ty("char")), TypeChange::Narrowing);
    }

    #[test]
    fn scale_above_precision_counts_as_narrowing() {
        let bad = SqlType::Numeric(Some((2, 5)));
        assert_eq!(bad.change_to(&ty("numeric(10,2)")), TypeChange::Narrowing);
        assert_eq!(ty("numeric(10,2)").change_to(&bad), TypeChange::Narrowing);
    }
}
