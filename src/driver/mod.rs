//! Database drivers
//!
//! The executor talks to databases only through [`SchemaDriver`]. Two
//! implementations ship with the crate:
//!
//! - [`postgres::PostgresDriver`] over a `may_postgres` client
//! - [`memory::MemoryDriver`], an in-process catalog that executes the
//!   crate's own DDL with Postgres semantics
//!
//! A driver value is one database session: transactions, statement timeouts
//! and advisory locks belong to the session that took them.

pub mod introspect;
pub mod memory;
pub mod postgres;

use std::fmt;
use std::time::Duration;

use may_postgres::Error as PostgresError;

use crate::catalog::Catalog;

/// Driver error type
#[derive(Debug)]
pub enum DriverError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// Statement cancelled by the statement timeout
    Timeout(String),
    /// Statement rejected by the database
    Statement(String),
    /// Capability the engine does not provide
    Unsupported(String),
    Other(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            DriverError::Timeout(s) => write!(f, "statement timeout: {s}"),
            DriverError::Statement(s) => write!(f, "statement failed: {s}"),
            DriverError::Unsupported(s) => write!(f, "unsupported: {s}"),
            DriverError::Other(s) => write!(f, "driver error: {s}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Postgres(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for DriverError {
    fn from(err: PostgresError) -> Self {
        if is_timeout_message(&err.to_string()) {
            DriverError::Timeout(err.to_string())
        } else {
            DriverError::Postgres(err)
        }
    }
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }
}

/// Postgres reports `statement_timeout` cancellations as
/// "canceling statement due to statement timeout".
pub(crate) fn is_timeout_message(message: &str) -> bool {
    message.contains("canceling statement") || message.contains("statement timeout")
}

/// Capability set the executor needs from a database session.
pub trait SchemaDriver {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Reads the current schema. Inside a transaction this sees the
    /// transaction's uncommitted DDL.
    fn introspect(&self) -> Result<Catalog, DriverError>;

    fn begin(&self) -> Result<(), DriverError>;

    fn commit(&self) -> Result<(), DriverError>;

    fn rollback(&self) -> Result<(), DriverError>;

    /// Executes one DDL statement.
    fn exec(&self, sql: &str) -> Result<(), DriverError>;

    /// Takes the session-level advisory lock `key` without waiting.
    fn try_advisory_lock(&self, key: i64) -> Result<bool, DriverError>;

    fn advisory_unlock(&self, key: i64) -> Result<(), DriverError>;

    /// Limits statements run by the current transaction. Engines without
    /// statement timeouts ignore it and the executor falls back to
    /// measuring elapsed time.
    fn set_statement_timeout(&self, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    /// Drops every object in the schema so it can be rebuilt from scratch.
    fn reset_schema(&self) -> Result<(), DriverError>;
}

impl<D: SchemaDriver + ?Sized> SchemaDriver for &D {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn introspect(&self) -> Result<Catalog, DriverError> {
        (**self).introspect()
    }

    fn begin(&self) -> Result<(), DriverError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), DriverError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), DriverError> {
        (**self).rollback()
    }

    fn exec(&self, sql: &str) -> Result<(), DriverError> {
        (**self).exec(sql)
    }

    fn try_advisory_lock(&self, key: i64) -> Result<bool, DriverError> {
        (**self).try_advisory_lock(key)
    }

    fn advisory_unlock(&self, key: i64) -> Result<(), DriverError> {
        (**self).advisory_unlock(key)
    }

    fn set_statement_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        (**self).set_statement_timeout(timeout)
    }

    fn reset_schema(&self) -> Result<(), DriverError> {
        (**self).reset_schema()
    }
}

impl<D: SchemaDriver + ?Sized> SchemaDriver for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn introspect(&self) -> Result<Catalog, DriverError> {
        (**self).introspect()
    }

    fn begin(&self) -> Result<(), DriverError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), DriverError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), DriverError> {
        (**self).rollback()
    }

    fn exec(&self, sql: &str) -> Result<(), DriverError> {
        (**self).exec(sql)
    }

    fn try_advisory_lock(&self, key: i64) -> Result<bool, DriverError> {
        (**self).try_advisory_lock(key)
    }

    fn advisory_unlock(&self, key: i64) -> Result<(), DriverError> {
        (**self).advisory_unlock(key)
    }

    fn set_statement_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        (**self).set_statement_timeout(timeout)
    }

    fn reset_schema(&self) -> Result<(), DriverError> {
        (**self).reset_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        assert!(DriverError::Timeout("3s".into()).to_string().contains("statement timeout"));
        assert!(DriverError::Statement("syntax".into()).to_string().contains("statement failed"));
        assert!(DriverError::Unsupported("sqlite".into()).to_string().contains("unsupported"));
        assert!(DriverError::Other("x".into()).to_string().contains("driver error"));
    }

    #[test]
    fn recognizes_postgres_timeout_messages() {
        assert!(is_timeout_message("ERROR: canceling statement due to statement timeout"));
        assert!(!is_timeout_message("relation \"users\" does not exist"));
        assert!(DriverError::Timeout(String::new()).is_timeout());
    }
}
