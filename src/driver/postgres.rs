//! Postgres driver over a `may_postgres` client.

use std::time::{Duration, Instant};

use may_postgres::{Client, Row};

use crate::catalog::{ident, Catalog};
use crate::connection::{self, ConnectionError};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

use super::introspect::{
    self, CatalogRows, ColumnRow, ForeignKeyRow, IndexRow, PrimaryKeyRow, COLUMNS_QUERY,
    FOREIGN_KEYS_QUERY, INDEXES_QUERY, PRIMARY_KEYS_QUERY,
};
use super::{DriverError, SchemaDriver};

/// One Postgres session.
///
/// The client must not be shared with other work while an apply runs:
/// transactions and advisory locks are scoped to its connection.
pub struct PostgresDriver {
    client: Client,
}

impl PostgresDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects to `connection_string`; see [`connection::connect`].
    pub fn connect(connection_string: &str) -> Result<Self, ConnectionError> {
        connection::connect(connection_string).map(Self::new)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let start = Instant::now();
        let rows = self.client.query(sql, &[])?;
        log::trace!("catalog query returned {} rows in {:?}", rows.len(), start.elapsed());
        Ok(rows)
    }

    fn read_rows(&self) -> Result<CatalogRows, DriverError> {
        let mut rows = CatalogRows::default();
        for row in self.query(COLUMNS_QUERY)? {
            rows.columns.push(ColumnRow {
                table: row.try_get(0)?,
                column: row.try_get(1)?,
                data_type: row.try_get(2)?,
                not_null: row.try_get(3)?,
                default: row.try_get(4)?,
            });
        }
        for row in self.query(PRIMARY_KEYS_QUERY)? {
            rows.primary_keys.push(PrimaryKeyRow {
                table: row.try_get(0)?,
                column: row.try_get(1)?,
            });
        }
        for row in self.query(FOREIGN_KEYS_QUERY)? {
            rows.foreign_keys.push(ForeignKeyRow {
                constraint: row.try_get(0)?,
                table: row.try_get(1)?,
                column: row.try_get(2)?,
                referenced_table: row.try_get(3)?,
                referenced_column: row.try_get(4)?,
            });
        }
        for row in self.query(INDEXES_QUERY)? {
            rows.indexes.push(IndexRow {
                table: row.try_get(0)?,
                index: row.try_get(1)?,
                unique: row.try_get(2)?,
                column: row.try_get(3)?,
            });
        }
        Ok(rows)
    }

    fn simple(&self, sql: &str) -> Result<(), DriverError> {
        self.client.execute(sql, &[])?;
        Ok(())
    }
}

impl SchemaDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn introspect(&self) -> Result<Catalog, DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::introspect_span(self.name()).entered();

        introspect::build_catalog(self.read_rows()?)
    }

    fn begin(&self) -> Result<(), DriverError> {
        self.simple("BEGIN")
    }

    fn commit(&self) -> Result<(), DriverError> {
        self.simple("COMMIT")
    }

    fn rollback(&self) -> Result<(), DriverError> {
        self.simple("ROLLBACK")
    }

    fn exec(&self, sql: &str) -> Result<(), DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(sql).entered();

        self.simple(sql)
    }

    fn try_advisory_lock(&self, key: i64) -> Result<bool, DriverError> {
        let row = self.client.query_one("SELECT pg_try_advisory_lock($1)", &[&key])?;
        Ok(row.try_get(0)?)
    }

    fn advisory_unlock(&self, key: i64) -> Result<(), DriverError> {
        let row = self.client.query_one("SELECT pg_advisory_unlock($1)", &[&key])?;
        let released: bool = row.try_get(0)?;
        if !released {
            log::warn!("advisory lock {key} was not held by this session");
        }
        Ok(())
    }

    fn set_statement_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        // SET does not take bind parameters.
        self.simple(&format!("SET LOCAL statement_timeout = '{}ms'", timeout.as_millis()))
    }

    fn reset_schema(&self) -> Result<(), DriverError> {
        let row = self.client.query_one("SELECT current_schema()::text", &[])?;
        let schema: Option<String> = row.try_get(0)?;
        let schema = schema.ok_or_else(|| DriverError::Other("no current schema on the search path".into()))?;
        let quoted = ident::quote(&schema);
        log::info!("resetting schema {} on shadow database", schema);
        self.simple(&format!("DROP SCHEMA {quoted} CASCADE"))?;
        self.simple(&format!("CREATE SCHEMA {quoted}"))
    }
}
