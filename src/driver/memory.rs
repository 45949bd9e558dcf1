//! In-memory schema driver
//!
//! Holds a schema in process and executes the DDL this crate renders, with
//! the Postgres behavior plans rely on: transactional DDL, `CASCADE` on
//! `DROP TABLE`, dependent index removal on `DROP COLUMN`, sequences owned
//! by serial columns, session-scoped advisory locks and statement timeouts. There are no rows, so statements
//! that would fail only on existing data always succeed here.
//!
//! Several [`MemoryDriver`] sessions can share one database through
//! [`MemoryDriver::session`]. Statements can be made to fail or run slowly
//! with [`MemoryDriver::fail_on`] and [`MemoryDriver::slow_on`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::catalog::{ident, Catalog, Column, DefaultExpr, ForeignKeyRef, SqlType, Table};
use crate::plan::ddl::{parse_statement, DdlStatement};

use super::{DriverError, SchemaDriver};

const ABORTED: &str = "current transaction is aborted, commands ignored until end of transaction block";

/// Tables plus the sequences the catalog model does not show.
#[derive(Debug, Clone, Default)]
struct Schema {
    tables: Vec<Table>,
    /// sequence -> owning `(table, column)`
    sequences: BTreeMap<String, (String, String)>,
}

impl Schema {
    fn from_catalog(catalog: Catalog) -> Self {
        let mut schema = Schema {
            tables: catalog.into_tables(),
            sequences: BTreeMap::new(),
        };
        let serials: Vec<(String, String)> = schema
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.data_type.is_serial())
                    .map(move |c| (t.name.clone(), c.name.clone()))
            })
            .collect();
        for (table, column) in serials {
            schema.own_sequence(table, column);
        }
        schema
    }

    /// Registers the implicit sequence of a serial column.
    fn own_sequence(&mut self, table: String, column: String) {
        self.sequences.insert(ident::sequence_name(&table, &column), (table, column));
    }

    fn relation_exists(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
            || self
                .tables
                .iter()
                .any(|t| t.name == name || t.indexes.iter().any(|i| i.name == name))
    }

    /// Sequences die with the column that owns them.
    fn drop_owned_sequences(&mut self, table: &str, column: Option<&str>) {
        self.sequences
            .retain(|_, (t, c)| !(t == table && column.map_or(true, |column| c == column)));
    }
}

#[derive(Default)]
struct Database {
    schema: Schema,
    sessions: HashMap<u64, Session>,
    next_session: u64,
    /// key -> (owning session, hold count)
    locks: HashMap<i64, (u64, usize)>,
    failures: Vec<String>,
    delays: Vec<(String, Duration)>,
    executed: Vec<String>,
}

#[derive(Default)]
struct Session {
    transaction: Option<Transaction>,
    statement_timeout: Option<Duration>,
}

struct Transaction {
    schema: Schema,
    aborted: bool,
}

/// One session on a shared in-memory database.
pub struct MemoryDriver {
    db: Arc<Mutex<Database>>,
    session: u64,
}

impl MemoryDriver {
    /// Empty database.
    pub fn new() -> Self {
        Self::with_catalog(Catalog::empty())
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        let db = Database {
            schema: Schema::from_catalog(catalog),
            ..Database::default()
        };
        Self::attach(Arc::new(Mutex::new(db)))
    }

    fn attach(db: Arc<Mutex<Database>>) -> Self {
        let session = {
            let mut guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            guard.next_session += 1;
            let id = guard.next_session;
            guard.sessions.insert(id, Session::default());
            id
        };
        Self { db, session }
    }

    /// New session on the same database.
    pub fn session(&self) -> MemoryDriver {
        Self::attach(Arc::clone(&self.db))
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the committed schema, as another client would.
    pub fn set_catalog(&self, catalog: Catalog) {
        self.lock().schema = Schema::from_catalog(catalog);
    }

    /// Makes every statement containing `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.lock().failures.push(pattern.into());
    }

    /// Makes every statement containing `pattern` take `delay`.
    pub fn slow_on(&self, pattern: impl Into<String>, delay: Duration) {
        self.lock().delays.push((pattern.into(), delay));
    }

    /// Statements that succeeded on this database, in any session.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.lock()
            .sessions
            .get(&self.session)
            .is_some_and(|s| s.transaction.is_some())
    }

    /// Session holding advisory lock `key`.
    pub fn lock_holder(&self, key: i64) -> Option<u64> {
        self.lock().locks.get(&key).map(|(session, _)| *session)
    }

    pub fn session_id(&self) -> u64 {
        self.session
    }

    fn mark_aborted(&self) {
        if let Some(tx) = self
            .lock()
            .sessions
            .get_mut(&self.session)
            .and_then(|s| s.transaction.as_mut())
        {
            tx.aborted = true;
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryDriver {
    fn drop(&mut self) {
        let session = self.session;
        let mut db = self.lock();
        db.sessions.remove(&session);
        db.locks.retain(|_, (owner, _)| *owner != session);
    }
}

impl Database {
    fn session_mut(&mut self, id: u64) -> Result<&mut Session, DriverError> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| DriverError::Other(format!("session {id} is closed")))
    }

    fn execute(&mut self, session: u64, sql: &str) -> Result<(), DriverError> {
        let failure = self.failures.iter().any(|p| sql.contains(p.as_str()));
        let state = self.sessions.get_mut(&session).ok_or_else(|| DriverError::Other(format!("session {session} is closed")))?;
        let target = match state.transaction.as_mut() {
            Some(tx) if tx.aborted => return Err(DriverError::Statement(ABORTED.to_string())),
            Some(tx) => Some(tx),
            None => None,
        };

        let outcome = if failure {
            Err(format!("injected failure: {sql}"))
        } else {
            parse_statement(sql).map_err(|e| e.to_string()).and_then(|statement| {
                let current = match &target {
                    Some(tx) => &tx.schema,
                    None => &self.schema,
                };
                let mut next = current.clone();
                apply_statement(&mut next, statement).map(|()| next)
            })
        };

        match (outcome, target) {
            (Ok(next), Some(tx)) => tx.schema = next,
            (Ok(next), None) => self.schema = next,
            (Err(message), Some(tx)) => {
                tx.aborted = true;
                return Err(DriverError::Statement(message));
            }
            (Err(message), None) => return Err(DriverError::Statement(message)),
        }
        self.executed.push(sql.to_string());
        Ok(())
    }
}

impl SchemaDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn introspect(&self) -> Result<Catalog, DriverError> {
        let db = self.lock();
        let tables = match db.sessions.get(&self.session).and_then(|s| s.transaction.as_ref()) {
            Some(tx) => tx.schema.tables.clone(),
            None => db.schema.tables.clone(),
        };
        drop(db);
        Catalog::new(tables).map_err(|e| DriverError::Other(e.to_string()))
    }

    fn begin(&self) -> Result<(), DriverError> {
        let mut db = self.lock();
        let schema = db.schema.clone();
        let session = db.session_mut(self.session)?;
        if session.transaction.is_some() {
            return Err(DriverError::Statement("there is already a transaction in progress".into()));
        }
        session.transaction = Some(Transaction { schema, aborted: false });
        Ok(())
    }

    fn commit(&self) -> Result<(), DriverError> {
        let mut db = self.lock();
        let session = db.session_mut(self.session)?;
        session.statement_timeout = None;
        match session.transaction.take() {
            Some(tx) if tx.aborted => Err(DriverError::Statement(format!("{ABORTED}; rolled back"))),
            Some(tx) => {
                db.schema = tx.schema;
                Ok(())
            }
            None => Err(DriverError::Statement("there is no transaction in progress".into())),
        }
    }

    fn rollback(&self) -> Result<(), DriverError> {
        let mut db = self.lock();
        let session = db.session_mut(self.session)?;
        session.statement_timeout = None;
        session.transaction = None;
        Ok(())
    }

    fn exec(&self, sql: &str) -> Result<(), DriverError> {
        let (delay, timeout) = {
            let mut db = self.lock();
            let delay = db
                .delays
                .iter()
                .filter(|(p, _)| sql.contains(p.as_str()))
                .map(|(_, d)| *d)
                .max();
            let timeout = db.session_mut(self.session)?.statement_timeout;
            (delay, timeout)
        };
        if let Some(delay) = delay {
            match timeout {
                Some(limit) if delay > limit => {
                    std::thread::sleep(limit);
                    self.mark_aborted();
                    return Err(DriverError::Timeout(
                        "canceling statement due to statement timeout".to_string(),
                    ));
                }
                _ => std::thread::sleep(delay),
            }
        }
        self.lock().execute(self.session, sql)
    }

    fn try_advisory_lock(&self, key: i64) -> Result<bool, DriverError> {
        let session = self.session;
        let mut db = self.lock();
        let entry = db.locks.entry(key).or_insert((session, 0));
        if entry.0 != session {
            return Ok(false);
        }
        entry.1 += 1;
        Ok(true)
    }

    fn advisory_unlock(&self, key: i64) -> Result<(), DriverError> {
        let mut db = self.lock();
        match db.locks.get_mut(&key) {
            Some((owner, count)) if *owner == self.session => {
                *count -= 1;
                if *count == 0 {
                    db.locks.remove(&key);
                }
                Ok(())
            }
            _ => {
                log::warn!("advisory lock {key} is not held by session {}", self.session);
                Ok(())
            }
        }
    }

    fn set_statement_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        let mut db = self.lock();
        let session = db.session_mut(self.session)?;
        if session.transaction.is_none() {
            log::warn!("statement timeout set outside a transaction has no effect");
            return Ok(());
        }
        session.statement_timeout = Some(timeout);
        Ok(())
    }

    fn reset_schema(&self) -> Result<(), DriverError> {
        let mut db = self.lock();
        let session = self.session;
        match db.session_mut(session)?.transaction.as_mut() {
            Some(tx) => tx.schema = Schema::default(),
            None => db.schema = Schema::default(),
        }
        Ok(())
    }
}

fn not_found(what: &str, name: &str) -> String {
    format!("{what} \"{name}\" does not exist")
}

fn find_table<'a>(tables: &'a [Table], name: &str) -> Option<&'a Table> {
    tables.iter().find(|t| t.name == name)
}

fn table_mut<'a>(tables: &'a mut [Table], name: &str) -> Result<&'a mut Table, String> {
    tables
        .iter_mut()
        .find(|t| t.name == name)
        .ok_or_else(|| not_found("relation", name))
}

fn column_mut<'a>(table: &'a mut Table, name: &str) -> Result<&'a mut Column, String> {
    let table_name = table.name.clone();
    table
        .columns
        .iter_mut()
        .find(|c| c.name == name)
        .ok_or_else(|| format!("column \"{name}\" of relation \"{table_name}\" does not exist"))
}

/// Checks a foreign key target; `pending` is a table being created that may
/// reference itself.
fn check_reference(tables: &[Table], reference: &ForeignKeyRef, pending: Option<&Table>) -> Result<(), String> {
    let target = pending
        .filter(|t| t.name == reference.table)
        .or_else(|| find_table(tables, &reference.table))
        .ok_or_else(|| not_found("relation", &reference.table))?;
    for column in &reference.columns {
        if target.find_column(column).is_none() {
            return Err(format!(
                "column \"{}\" referenced in foreign key constraint does not exist",
                column
            ));
        }
    }
    Ok(())
}

fn references_column(reference: &ForeignKeyRef, table: &str, column: &str) -> bool {
    reference.table == table && reference.columns.iter().any(|c| c == column)
}

/// Column storage after `SET DEFAULT`: a `nextval` default on an integer
/// column reads back as the matching serial type.
fn set_default(column: &mut Column, default: DefaultExpr) {
    let storage = column.data_type.storage_type();
    match SqlType::serial_for(&storage).filter(|_| default.sequence().is_some()) {
        Some(serial) => {
            column.data_type = serial;
            column.default = None;
        }
        None => {
            column.data_type = storage;
            column.default = Some(default);
        }
    }
}

fn apply_statement(schema: &mut Schema, statement: DdlStatement) -> Result<(), String> {
    match statement {
        DdlStatement::CreateSequence { name, table, column, .. } => {
            if schema.relation_exists(&name) {
                return Err(format!("relation \"{}\" already exists", name));
            }
            let owner = schema
                .tables
                .iter()
                .find(|t| t.name == table)
                .ok_or_else(|| not_found("relation", &table))?;
            if owner.find_column(&column).is_none() {
                return Err(format!("column \"{column}\" of relation \"{table}\" does not exist"));
            }
            schema.sequences.insert(name, (table, column));
        }
        DdlStatement::DropSequence { name } => {
            if !schema.sequences.contains_key(&name) {
                return Err(not_found("sequence", &name));
            }
            let in_use = schema.tables.iter().any(|t| {
                t.columns.iter().any(|c| {
                    let implied = c.data_type.is_serial() && ident::sequence_name(&t.name, &c.name) == name;
                    implied || c.default.as_ref().and_then(DefaultExpr::sequence).as_deref() == Some(name.as_str())
                })
            });
            if in_use {
                return Err(format!("cannot drop sequence {} because other objects depend on it", name));
            }
            schema.sequences.remove(&name);
        }
        DdlStatement::SetDefault { table, column, default } => {
            if let Some(sequence) = default.sequence() {
                if !schema.sequences.contains_key(&sequence) {
                    return Err(not_found("relation", &sequence));
                }
            }
            set_default(column_mut(table_mut(&mut schema.tables, &table)?, &column)?, default);
        }
        DdlStatement::DropDefault { table, column } => {
            let target = column_mut(table_mut(&mut schema.tables, &table)?, &column)?;
            target.data_type = target.data_type.storage_type();
            target.default = None;
        }
        DdlStatement::CreateTable { table } => {
            if schema.relation_exists(&table.name) {
                return Err(format!("relation \"{}\" already exists", table.name));
            }
            for column in table.columns.iter().filter(|c| c.data_type.is_serial()) {
                if schema.relation_exists(&ident::sequence_name(&table.name, &column.name)) {
                    return Err(format!(
                        "relation \"{}\" already exists",
                        ident::sequence_name(&table.name, &column.name)
                    ));
                }
            }
            apply_table_statement(&mut schema.tables, DdlStatement::CreateTable { table: table.clone() })?;
            for column in table.columns.iter().filter(|c| c.data_type.is_serial()) {
                schema.own_sequence(table.name.clone(), column.name.clone());
            }
        }
        DdlStatement::AddColumn { table, column } => {
            let sequence = ident::sequence_name(&table, &column.name);
            if column.data_type.is_serial() && schema.relation_exists(&sequence) {
                return Err(format!("relation \"{}\" already exists", sequence));
            }
            let serial = column.data_type.is_serial().then(|| (table.clone(), column.name.clone()));
            apply_table_statement(&mut schema.tables, DdlStatement::AddColumn { table, column })?;
            if let Some((table, column)) = serial {
                schema.own_sequence(table, column);
            }
        }
        DdlStatement::DropTable { name, cascade } => {
            apply_table_statement(&mut schema.tables, DdlStatement::DropTable { name: name.clone(), cascade })?;
            schema.drop_owned_sequences(&name, None);
        }
        DdlStatement::DropColumn { table, column } => {
            apply_table_statement(
                &mut schema.tables,
                DdlStatement::DropColumn { table: table.clone(), column: column.clone() },
            )?;
            schema.drop_owned_sequences(&table, Some(&column));
        }
        DdlStatement::CreateIndex { table, index } => {
            if schema.relation_exists(&index.name) {
                return Err(format!("relation \"{}\" already exists", index.name));
            }
            apply_table_statement(&mut schema.tables, DdlStatement::CreateIndex { table, index })?;
        }
        other => apply_table_statement(&mut schema.tables, other)?,
    }
    Ok(())
}

/// Statements that touch only tables.
fn apply_table_statement(tables: &mut Vec<Table>, statement: DdlStatement) -> Result<(), String> {
    match statement {
        DdlStatement::CreateTable { table } => {
            if find_table(tables, &table.name).is_some() {
                return Err(format!("relation \"{}\" already exists", table.name));
            }
            if table.columns.iter().filter(|c| c.is_primary_key).count() > 1 {
                return Err(format!("multiple primary keys for table \"{}\" are not allowed", table.name));
            }
            for reference in table.columns.iter().filter_map(|c| c.references.as_ref()) {
                check_reference(tables, reference, Some(&table))?;
            }
            tables.push(table);
        }
        DdlStatement::DropTable { name, cascade } => {
            let position = tables
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(|| not_found("table", &name))?;
            for other in tables.iter_mut().filter(|t| t.name != name) {
                for column in &mut other.columns {
                    if column.references.as_ref().is_some_and(|r| r.table == name) {
                        if !cascade {
                            return Err(format!(
                                "cannot drop table {} because other objects depend on it",
                                name
                            ));
                        }
                        column.references = None;
                    }
                }
            }
            tables.remove(position);
        }
        DdlStatement::AddColumn { table, column } => {
            if let Some(reference) = &column.references {
                check_reference(tables, reference, None)?;
            }
            let target = table_mut(tables, &table)?;
            if target.find_column(&column.name).is_some() {
                return Err(format!(
                    "column \"{}\" of relation \"{}\" already exists",
                    column.name, target.name
                ));
            }
            if column.is_primary_key && target.primary_key().is_some() {
                return Err(format!("multiple primary keys for table \"{}\" are not allowed", target.name));
            }
            target.columns.push(column);
        }
        DdlStatement::DropColumn { table, column } => {
            let dependent = tables.iter().any(|t| {
                t.columns.iter().any(|c| {
                    let same = t.name == table && c.name == column;
                    !same && c.references.as_ref().is_some_and(|r| references_column(r, &table, &column))
                })
            });
            if dependent {
                return Err(format!(
                    "cannot drop column {} of table {} because other objects depend on it",
                    column, table
                ));
            }
            let target = table_mut(tables, &table)?;
            column_mut(target, &column)?;
            target.columns.retain(|c| c.name != column);
            target.indexes.retain(|i| !i.columns.contains(&column));
        }
        DdlStatement::AlterColumnType { table, column, data_type } => {
            // Serial types exist only in CREATE TABLE and ADD COLUMN.
            if data_type.is_serial() {
                return Err(format!("type \"{}\" does not exist", data_type));
            }
            let target = column_mut(table_mut(tables, &table)?, &column)?;
            // A column that keeps its sequence default stays serial.
            target.data_type = if target.data_type.is_serial() {
                SqlType::serial_for(&data_type).unwrap_or(data_type)
            } else {
                data_type
            };
        }
        DdlStatement::SetNotNull { table, column } => {
            column_mut(table_mut(tables, &table)?, &column)?.nullable = false;
        }
        DdlStatement::DropNotNull { table, column } => {
            let target = column_mut(table_mut(tables, &table)?, &column)?;
            if target.is_primary_key {
                return Err(format!("column \"{}\" is in a primary key", target.name));
            }
            target.nullable = true;
        }
        DdlStatement::AddPrimaryKey { table, column, .. } => {
            let target = table_mut(tables, &table)?;
            if target.primary_key().is_some() {
                return Err(format!("multiple primary keys for table \"{}\" are not allowed", target.name));
            }
            let column = column_mut(target, &column)?;
            column.is_primary_key = true;
            column.nullable = false;
        }
        DdlStatement::AddForeignKey { table, column, references, .. } => {
            check_reference(tables, &references, None)?;
            let target = column_mut(table_mut(tables, &table)?, &column)?;
            if target.references.is_some() {
                return Err(format!("column \"{}\" already has a foreign key", target.name));
            }
            target.references = Some(references);
        }
        DdlStatement::DropConstraint { table, constraint } => {
            let target = table_mut(tables, &table)?;
            if constraint == ident::primary_key_constraint(&target.name) {
                let pk = target
                    .columns
                    .iter_mut()
                    .find(|c| c.is_primary_key)
                    .ok_or_else(|| not_found("constraint", &constraint))?;
                // NOT NULL outlives the primary key.
                pk.is_primary_key = false;
            } else {
                let table_name = target.name.clone();
                let column = target
                    .columns
                    .iter_mut()
                    .find(|c| {
                        c.references.is_some()
                            && ident::foreign_key_constraint(&table_name, &c.name) == constraint
                    })
                    .ok_or_else(|| not_found("constraint", &constraint))?;
                column.references = None;
            }
        }
        DdlStatement::CreateIndex { table, index } => {
            let target = table_mut(tables, &table)?;
            for column in &index.columns {
                if target.find_column(column).is_none() {
                    return Err(not_found("column", column));
                }
            }
            target.indexes.push(index);
        }
        DdlStatement::DropIndex { name } => {
            let owner = tables
                .iter_mut()
                .find(|t| t.indexes.iter().any(|i| i.name == name))
                .ok_or_else(|| not_found("index", &name))?;
            owner.indexes.retain(|i| i.name != name);
        }
        DdlStatement::SetDefault { .. }
        | DdlStatement::DropDefault { .. }
        | DdlStatement::CreateSequence { .. }
        | DdlStatement::DropSequence { .. } => {
            return Err("sequence statements need the whole schema".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Index, SqlType};

    fn users() -> Catalog {
        Catalog::new(vec![Table::new("users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text))
            .index(Index::new("users_email_idx", ["email"]))])
        .unwrap()
    }

    #[test]
    fn statements_outside_a_transaction_autocommit() {
        let db = MemoryDriver::with_catalog(users());
        db.exec("ALTER TABLE users ADD COLUMN name text").unwrap();
        assert!(db.session().introspect().unwrap().table("users").unwrap().find_column("name").is_some());
        assert_eq!(db.executed(), ["ALTER TABLE users ADD COLUMN name text"]);
    }

    #[test]
    fn rollback_discards_transaction_ddl() {
        let db = MemoryDriver::with_catalog(users());
        let other = db.session();
        db.begin().unwrap();
        db.exec("DROP TABLE users CASCADE").unwrap();
        assert!(db.introspect().unwrap().is_empty());
        assert!(!other.introspect().unwrap().is_empty());
        db.rollback().unwrap();
        assert_eq!(db.introspect().unwrap(), users());
    }

    #[test]
    fn failed_statement_aborts_the_transaction() {
        let db = MemoryDriver::with_catalog(users());
        db.begin().unwrap();
        let err = db.exec("ALTER TABLE missing ADD COLUMN x text").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        let err = db.exec("ALTER TABLE users ADD COLUMN x text").unwrap_err();
        assert!(err.to_string().contains("transaction is aborted"));
        assert!(db.commit().is_err());
        assert_eq!(db.introspect().unwrap(), users());
    }

    #[test]
    fn drop_column_removes_dependent_indexes() {
        let db = MemoryDriver::with_catalog(users());
        db.exec("ALTER TABLE users DROP COLUMN email").unwrap();
        assert!(db.introspect().unwrap().table("users").unwrap().indexes.is_empty());
    }

    #[test]
    fn drop_table_cascade_clears_foreign_keys() {
        let db = MemoryDriver::with_catalog(users());
        db.exec("CREATE TABLE posts (id integer NOT NULL PRIMARY KEY, user_id integer CONSTRAINT posts_user_id_fkey REFERENCES users (id))")
            .unwrap();
        assert!(db.exec("DROP TABLE users").is_err());
        db.exec("DROP TABLE users CASCADE").unwrap();
        let catalog = db.introspect().unwrap();
        assert!(catalog.table("posts").unwrap().find_column("user_id").unwrap().references.is_none());
    }

    #[test]
    fn primary_key_constraints() {
        let db = MemoryDriver::with_catalog(users());
        assert!(db.exec("ALTER TABLE users ALTER COLUMN id DROP NOT NULL").is_err());
        assert!(db.exec("ALTER TABLE users ADD CONSTRAINT users_pkey PRIMARY KEY (email)").is_err());
        db.exec("ALTER TABLE users DROP CONSTRAINT users_pkey").unwrap();
        let id = db.introspect().unwrap().table("users").unwrap().find_column("id").cloned().unwrap();
        assert!(!id.is_primary_key);
        assert!(!id.nullable);
    }

    #[test]
    fn index_names_are_unique_across_the_schema() {
        let db = MemoryDriver::with_catalog(users());
        assert!(db.exec("CREATE INDEX users_email_idx ON users (id)").is_err());
        assert!(db.exec("CREATE INDEX users ON users (id)").is_err());
        db.exec("DROP INDEX users_email_idx").unwrap();
        assert!(db.exec("DROP INDEX users_email_idx").is_err());
    }

    #[test]
    fn advisory_locks_belong_to_sessions() {
        let db = MemoryDriver::new();
        let other = db.session();
        assert!(db.try_advisory_lock(7).unwrap());
        assert!(db.try_advisory_lock(7).unwrap());
        assert!(!other.try_advisory_lock(7).unwrap());
        db.advisory_unlock(7).unwrap();
        assert!(!other.try_advisory_lock(7).unwrap());
        db.advisory_unlock(7).unwrap();
        assert!(other.try_advisory_lock(7).unwrap());
        drop(other);
        assert!(db.try_advisory_lock(7).unwrap());
    }

    #[test]
    fn slow_statements_hit_the_statement_timeout() {
        let db = MemoryDriver::with_catalog(users());
        db.slow_on("ADD COLUMN", Duration::from_millis(200));
        db.begin().unwrap();
        db.set_statement_timeout(Duration::from_millis(10)).unwrap();
        let err = db.exec("ALTER TABLE users ADD COLUMN x text").unwrap_err();
        assert!(err.is_timeout());
        db.rollback().unwrap();
    }

    #[test]
    fn injected_failures() {
        let db = MemoryDriver::with_catalog(users());
        db.fail_on("DROP COLUMN");
        let err = db.exec("ALTER TABLE users DROP COLUMN email").unwrap_err();
        assert!(matches!(err, DriverError::Statement(_)));
        assert!(db.executed().is_empty());
    }

    #[test]
    fn serial_is_not_a_column_type_for_alter() {
        let db = MemoryDriver::with_catalog(users());
        let err = db.exec("ALTER TABLE users ALTER COLUMN id TYPE bigserial").unwrap_err();
        assert!(err.to_string().contains("type \"bigserial\" does not exist"));
        db.exec("ALTER TABLE users ALTER COLUMN id TYPE bigint").unwrap();
    }

    #[test]
    fn identifiers_match_exactly() {
        let db = MemoryDriver::with_catalog(users());
        db.exec("CREATE TABLE \"Users\" (id integer)").unwrap();
        db.exec("DROP TABLE \"Users\"").unwrap();
        assert_eq!(db.introspect().unwrap(), users());
    }

    #[test]
    fn nextval_default_turns_an_integer_column_serial() {
        let db = MemoryDriver::with_catalog(users());
        let err = db.exec("ALTER TABLE users ALTER COLUMN id SET DEFAULT nextval('users_id_seq')").unwrap_err();
        assert!(err.to_string().contains("relation \"users_id_seq\" does not exist"));

        db.exec("CREATE SEQUENCE users_id_seq AS integer OWNED BY users.id").unwrap();
        db.exec("ALTER TABLE users ALTER COLUMN id SET DEFAULT nextval('users_id_seq')").unwrap();
        let id = db.introspect().unwrap().table("users").unwrap().find_column("id").cloned().unwrap();
        assert_eq!(id.data_type, SqlType::Serial);
        assert_eq!(id.default, None);

        let err = db.exec("DROP SEQUENCE users_id_seq").unwrap_err();
        assert!(err.to_string().contains("other objects depend on it"));
        db.exec("ALTER TABLE users ALTER COLUMN id DROP DEFAULT").unwrap();
        db.exec("DROP SEQUENCE users_id_seq").unwrap();
        assert_eq!(db.introspect().unwrap(), users());
    }

    #[test]
    fn serial_columns_own_their_sequence() {
        let db = MemoryDriver::new();
        db.exec("CREATE TABLE t (id serial NOT NULL PRIMARY KEY)").unwrap();
        assert!(db.exec("CREATE SEQUENCE t_id_seq AS integer OWNED BY t.id").is_err());
        assert!(db.exec("CREATE INDEX t_id_seq ON t (id)").is_err());
        db.exec("ALTER TABLE t ALTER COLUMN id TYPE bigint").unwrap();
        let id = db.introspect().unwrap().table("t").unwrap().columns[0].clone();
        assert_eq!(id.data_type, SqlType::BigSerial);

        db.exec("DROP TABLE t CASCADE").unwrap();
        assert!(db.exec("DROP SEQUENCE t_id_seq").is_err());
        assert!(db.exec("CREATE SEQUENCE t_id_seq AS integer OWNED BY t.id").is_err());
    }

    #[test]
    fn reset_schema_empties_the_database() {
        let db = MemoryDriver::with_catalog(users());
        db.reset_schema().unwrap();
        assert!(db.introspect().unwrap().is_empty());
    }
}
