//! Structural diff between two catalogs.
//!
//! Tables, columns and indexes are matched by exact name. Column order is
//! not a change. An index whose definition changes appears as removed plus
//! added under the same name.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::catalog::{self, Catalog, Column, DefaultExpr, ForeignKeyRef, Index, SqlType, Table};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added_tables: Vec<Table>,
    pub removed_tables: Vec<Table>,
    pub modified_tables: Vec<TableDiff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDiff {
    pub table_name: String,
    pub added_columns: Vec<Column>,
    pub removed_columns: Vec<Column>,
    pub modified_columns: Vec<ColumnDiff>,
    pub added_indexes: Vec<Index>,
    pub removed_indexes: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDiff {
    pub column_name: String,
    pub old: Column,
    pub new: Column,
    pub changes: Vec<ColumnChange>,
}

/// One attribute of a column that differs, with both values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnChange {
    Type { from: SqlType, to: SqlType },
    Nullable { from: bool, to: bool },
    Default { from: Option<DefaultExpr>, to: Option<DefaultExpr> },
    PrimaryKey { from: bool, to: bool },
    References { from: Option<ForeignKeyRef>, to: Option<ForeignKeyRef> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnChangeKind {
    Type,
    Nullable,
    Default,
    PrimaryKey,
    References,
}

impl ColumnChange {
    pub fn kind(&self) -> ColumnChangeKind {
        match self {
            ColumnChange::Type { .. } => ColumnChangeKind::Type,
            ColumnChange::Nullable { .. } => ColumnChangeKind::Nullable,
            ColumnChange::Default { .. } => ColumnChangeKind::Default,
            ColumnChange::PrimaryKey { .. } => ColumnChangeKind::PrimaryKey,
            ColumnChange::References { .. } => ColumnChangeKind::References,
        }
    }
}

impl ColumnDiff {
    pub fn kinds(&self) -> BTreeSet<ColumnChangeKind> {
        self.changes.iter().map(ColumnChange::kind).collect()
    }

    pub fn change(&self, kind: ColumnChangeKind) -> Option<&ColumnChange> {
        self.changes.iter().find(|c| c.kind() == kind)
    }
}

impl TableDiff {
    fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            added_columns: Vec::new(),
            removed_columns: Vec::new(),
            modified_columns: Vec::new(),
            added_indexes: Vec::new(),
            removed_indexes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
    }
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty() && self.removed_tables.is_empty() && self.modified_tables.is_empty()
    }

    pub fn table_diff(&self, table: &str) -> Option<&TableDiff> {
        self.modified_tables.iter().find(|t| t.table_name == table)
    }

    /// Column diff for `table.column`, if that column was modified.
    pub fn column_diff(&self, table: &str, column: &str) -> Option<&ColumnDiff> {
        self.table_diff(table)?
            .modified_columns
            .iter()
            .find(|c| c.column_name == column)
    }
}

/// Computes the changes that turn `before` into `after`.
///
/// Total over valid catalogs; `diff(c, c)` is empty.
pub fn diff(before: &Catalog, after: &Catalog) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for table in after.tables() {
        match before.table(&table.name) {
            None => changes.added_tables.push(table.clone()),
            Some(old) => {
                let table_diff = diff_table(old, table);
                if !table_diff.is_empty() {
                    changes.modified_tables.push(table_diff);
                }
            }
        }
    }
    for table in before.tables() {
        if after.table(&table.name).is_none() {
            changes.removed_tables.push(table.clone());
        }
    }

    changes
}

fn diff_table(old: &Table, new: &Table) -> TableDiff {
    let mut result = TableDiff::new(&new.name);

    for column in &new.columns {
        match old.find_column(&column.name) {
            None => result.added_columns.push(column.clone()),
            Some(previous) => {
                let changes = diff_column(previous, column);
                if !changes.is_empty() {
                    result.modified_columns.push(ColumnDiff {
                        column_name: column.name.clone(),
                        old: previous.clone(),
                        new: column.clone(),
                        changes,
                    });
                }
            }
        }
    }
    for column in &old.columns {
        if new.find_column(&column.name).is_none() {
            result.removed_columns.push(column.clone());
        }
    }

    for index in &new.indexes {
        match old.find_index(&index.name) {
            None => result.added_indexes.push(index.clone()),
            Some(previous) if !previous.same_definition(index) => {
                result.removed_indexes.push(previous.clone());
                result.added_indexes.push(index.clone());
            }
            Some(_) => {}
        }
    }
    for index in &old.indexes {
        if new.find_index(&index.name).is_none() {
            result.removed_indexes.push(index.clone());
        }
    }
    result.removed_indexes.sort_by(|a, b| a.name.cmp(&b.name));

    result
}

fn diff_column(old: &Column, new: &Column) -> Vec<ColumnChange> {
    let mut changes = Vec::new();
    if old.data_type != new.data_type {
        changes.push(ColumnChange::Type {
            from: old.data_type.clone(),
            to: new.data_type.clone(),
        });
    }
    if old.nullable != new.nullable {
        changes.push(ColumnChange::Nullable {
            from: old.nullable,
            to: new.nullable,
        });
    }
    if old.default != new.default {
        changes.push(ColumnChange::Default {
            from: old.default.clone(),
            to: new.default.clone(),
        });
    }
    if old.is_primary_key != new.is_primary_key {
        changes.push(ColumnChange::PrimaryKey {
            from: old.is_primary_key,
            to: new.is_primary_key,
        });
    }
    if !catalog::same_reference(&old.references, &new.references) {
        changes.push(ColumnChange::References {
            from: old.references.clone(),
            to: new.references.clone(),
        });
    }
    changes
}
