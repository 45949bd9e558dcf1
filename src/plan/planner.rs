//! Operation planning.
//!
//! A [`ChangeSet`] is turned into a list of [`Operation`]s in a fixed bucket
//! order:
//!
//! 1. create tables (dependency order)
//! 2. add columns
//! 3. alter columns: constraint drops first, then type, nullability,
//!    default, primary key and foreign key changes
//! 4. create indexes
//! 5. drop indexes
//! 6. drop columns
//! 7. drop tables (reverse dependency order)
//!
//! followed by foreign keys that could not be created inline. Operations
//! keep the values they replace, so each one can be inverted; the reverse
//! plan is the inverses in LIFO order.

use std::collections::{HashMap, HashSet};

use crate::catalog::{ident, Catalog, Column, DefaultExpr, ForeignKeyRef, Index, SqlType, Table};
use crate::diff::{ChangeSet, ColumnChange, TableDiff};
use crate::error::{LockplaneError, Result};
use crate::safety;

use super::ddl::DdlStatement;
use super::ordering::{creation_order, TableInfo};
use super::PlanOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Operation {
    CreateTable { table: Table },
    DropTable { table: Table },
    AddColumn { table: String, column: Column },
    DropColumn { table: String, column: Column },
    AlterType { table: String, column: String, from: SqlType, to: SqlType },
    SetNotNull { table: String, column: String },
    DropNotNull { table: String, column: String },
    SetDefault { table: String, column: String, from: Option<DefaultExpr>, to: DefaultExpr },
    DropDefault { table: String, column: String, from: DefaultExpr },
    AddPrimaryKey { table: String, column: String },
    DropPrimaryKey { table: String, column: String },
    AddForeignKey { table: String, column: String, target: ForeignKeyRef },
    DropForeignKey { table: String, column: String, target: ForeignKeyRef },
    CreateIndex { table: String, index: Index },
    DropIndex { table: String, index: Index },
    /// Sequence named `<table>_<column>_seq` owned by the column.
    CreateSequence { table: String, column: String, data_type: SqlType },
    DropSequence { table: String, column: String, data_type: SqlType },
}

impl Operation {
    pub(crate) fn description(&self) -> String {
        match self {
            Operation::CreateTable { table } => format!("create table {}", table.name),
            Operation::DropTable { table } => format!("drop table {}", table.name),
            Operation::AddColumn { table, column } => format!("add column {}.{}", table, column.name),
            Operation::DropColumn { table, column } => format!("drop column {}.{}", table, column.name),
            Operation::AlterType { table, column, to, .. } => {
                format!("alter column {}.{} type {}", table, column, to)
            }
            Operation::SetNotNull { table, column } => format!("alter column {}.{} set not null", table, column),
            Operation::DropNotNull { table, column } => format!("alter column {}.{} drop not null", table, column),
            Operation::SetDefault { table, column, to, .. } => {
                format!("alter column {}.{} set default {}", table, column, to)
            }
            Operation::DropDefault { table, column, .. } => format!("alter column {}.{} drop default", table, column),
            Operation::AddPrimaryKey { table, column } => format!("add primary key {}.{}", table, column),
            Operation::DropPrimaryKey { table, column } => format!("drop primary key {}.{}", table, column),
            Operation::AddForeignKey { table, column, .. } => format!("add foreign key {}.{}", table, column),
            Operation::DropForeignKey { table, column, .. } => format!("drop foreign key {}.{}", table, column),
            Operation::CreateIndex { index, .. } => format!("create index {}", index.name),
            Operation::DropIndex { index, .. } => format!("drop index {}", index.name),
            Operation::CreateSequence { table, column, .. } => {
                format!("create sequence {}", ident::sequence_name(table, column))
            }
            Operation::DropSequence { table, column, .. } => {
                format!("drop sequence {}", ident::sequence_name(table, column))
            }
        }
    }

    pub(crate) fn statement(&self) -> DdlStatement {
        match self {
            Operation::CreateTable { table } => DdlStatement::CreateTable { table: table.clone() },
            Operation::DropTable { table } => DdlStatement::DropTable { name: table.name.clone(), cascade: true },
            Operation::AddColumn { table, column } => DdlStatement::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::DropColumn { table, column } => DdlStatement::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            },
            Operation::AlterType { table, column, to, .. } => DdlStatement::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                data_type: to.clone(),
            },
            Operation::SetNotNull { table, column } => DdlStatement::SetNotNull {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::DropNotNull { table, column } => DdlStatement::DropNotNull {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::SetDefault { table, column, to, .. } => DdlStatement::SetDefault {
                table: table.clone(),
                column: column.clone(),
                default: to.clone(),
            },
            Operation::DropDefault { table, column, .. } => DdlStatement::DropDefault {
                table: table.clone(),
                column: column.clone(),
            },
            Operation::AddPrimaryKey { table, column } => DdlStatement::AddPrimaryKey {
                table: table.clone(),
                constraint: ident::primary_key_constraint(table),
                column: column.clone(),
            },
            Operation::DropPrimaryKey { table, .. } => DdlStatement::DropConstraint {
                table: table.clone(),
                constraint: ident::primary_key_constraint(table),
            },
            Operation::AddForeignKey { table, column, target } => DdlStatement::AddForeignKey {
                table: table.clone(),
                constraint: ident::foreign_key_constraint(table, column),
                column: column.clone(),
                references: target.clone(),
            },
            Operation::DropForeignKey { table, column, .. } => DdlStatement::DropConstraint {
                table: table.clone(),
                constraint: ident::foreign_key_constraint(table, column),
            },
            Operation::CreateIndex { table, index } => DdlStatement::CreateIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Operation::DropIndex { index, .. } => DdlStatement::DropIndex { name: index.name.clone() },
            Operation::CreateSequence { table, column, data_type } => DdlStatement::CreateSequence {
                name: ident::sequence_name(table, column),
                data_type: data_type.clone(),
                table: table.clone(),
                column: column.clone(),
            },
            Operation::DropSequence { table, column, .. } => DdlStatement::DropSequence {
                name: ident::sequence_name(table, column),
            },
        }
    }

    /// Operations that undo this one, in execution order.
    pub(crate) fn invert(&self) -> Vec<Operation> {
        match self.clone() {
            Operation::CreateTable { table } => vec![Operation::DropTable { table }],
            Operation::DropTable { table } => {
                let mut ops = Vec::with_capacity(1 + table.indexes.len());
                let name = table.name.clone();
                let indexes = table.indexes.clone();
                ops.push(Operation::CreateTable { table });
                ops.extend(indexes.into_iter().map(|index| Operation::CreateIndex { table: name.clone(), index }));
                ops
            }
            Operation::AddColumn { table, column } => vec![Operation::DropColumn { table, column }],
            Operation::DropColumn { table, column } => vec![Operation::AddColumn { table, column }],
            Operation::AlterType { table, column, from, to } => {
                vec![Operation::AlterType { table, column, from: to, to: from }]
            }
            Operation::SetNotNull { table, column } => vec![Operation::DropNotNull { table, column }],
            Operation::DropNotNull { table, column } => vec![Operation::SetNotNull { table, column }],
            Operation::SetDefault { table, column, from, to } => match from {
                Some(previous) => vec![Operation::SetDefault { table, column, from: Some(to), to: previous }],
                None => vec![Operation::DropDefault { table, column, from: to }],
            },
            Operation::DropDefault { table, column, from } => {
                vec![Operation::SetDefault { table, column, from: None, to: from }]
            }
            Operation::AddPrimaryKey { table, column } => vec![Operation::DropPrimaryKey { table, column }],
            Operation::DropPrimaryKey { table, column } => vec![Operation::AddPrimaryKey { table, column }],
            Operation::AddForeignKey { table, column, target } => {
                vec![Operation::DropForeignKey { table, column, target }]
            }
            Operation::DropForeignKey { table, column, target } => {
                vec![Operation::AddForeignKey { table, column, target }]
            }
            Operation::CreateIndex { table, index } => vec![Operation::DropIndex { table, index }],
            Operation::DropIndex { table, index } => vec![Operation::CreateIndex { table, index }],
            Operation::CreateSequence { table, column, data_type } => {
                vec![Operation::DropSequence { table, column, data_type }]
            }
            Operation::DropSequence { table, column, data_type } => {
                vec![Operation::CreateSequence { table, column, data_type }]
            }
        }
    }
}

/// Inverts a forward operation list into the reverse plan order.
pub(crate) fn reverse_operations(forward: &[Operation]) -> Vec<Operation> {
    forward.iter().rev().flat_map(Operation::invert).collect()
}

fn sort_key(table: &str, object: &str) -> (String, String) {
    (table.to_string(), object.to_string())
}

struct Planner<'a> {
    before: &'a Catalog,
    changes: &'a ChangeSet,
    options: &'a PlanOptions,
    ops: Vec<Operation>,
    deferred: Vec<Operation>,
}

/// Builds the forward operation list for `changes`, which must be the diff
/// of `before` against some valid catalog.
pub(crate) fn forward_operations(
    before: &Catalog,
    changes: &ChangeSet,
    options: &PlanOptions,
) -> Result<Vec<Operation>> {
    let mut planner = Planner {
        before,
        changes,
        options,
        ops: Vec::new(),
        deferred: Vec::new(),
    };
    let mut modified: Vec<&TableDiff> = changes.modified_tables.iter().collect();
    modified.sort_by(|a, b| a.table_name.cmp(&b.table_name));

    planner.create_tables();
    planner.add_columns(&modified)?;
    let stripped = planner.alter_columns(&modified)?;
    planner.index_changes(&modified);
    planner.drop_columns(&modified, &stripped);
    planner.drop_tables(&stripped);

    let Planner { mut ops, deferred, .. } = planner;
    ops.extend(deferred);
    Ok(ops)
}

/// `(table, column)` pairs whose foreign key is dropped explicitly before
/// the column or table that owns it goes away.
type StrippedKeys = HashSet<(String, String)>;

impl<'a> Planner<'a> {
    fn added_table_names(&self) -> HashSet<String> {
        self.changes.added_tables.iter().map(|t| t.name.clone()).collect()
    }

    fn existed_before(&self, reference: &ForeignKeyRef) -> bool {
        self.before
            .table(&reference.table)
            .is_some_and(|t| reference.columns.iter().all(|c| t.find_column(c).is_some()))
    }

    fn create_tables(&mut self) {
        let changes = self.changes;
        let added = self.added_table_names();
        let infos: Vec<TableInfo> = changes
            .added_tables
            .iter()
            .map(|t| TableInfo {
                name: t.name.clone(),
                dependencies: t.referenced_tables(),
            })
            .collect();
        let by_name: HashMap<String, &Table> =
            changes.added_tables.iter().map(|t| (t.name.clone(), t)).collect();

        let mut created: HashSet<String> = HashSet::new();
        for name in creation_order(&infos) {
            let Some(source) = by_name.get(&name) else { continue };
            let mut table = (*source).clone();
            for column in &mut table.columns {
                let Some(reference) = column.references.clone() else { continue };
                let target = reference.table.clone();
                let available = if target == name {
                    true
                } else if added.contains(&target) {
                    created.contains(&target)
                } else {
                    self.existed_before(&reference)
                };
                if !available {
                    column.references = None;
                    self.deferred.push(Operation::AddForeignKey {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        target: reference,
                    });
                }
            }
            created.insert(name);
            self.ops.push(Operation::CreateTable { table });
        }
    }

    fn add_columns(&mut self, modified: &[&TableDiff]) -> Result<()> {
        let added = self.added_table_names();
        for diff in modified {
            let mut columns: Vec<&Column> = diff.added_columns.iter().collect();
            columns.sort_by(|a, b| a.name.cmp(&b.name));
            for source in columns {
                if !source.nullable && !source.has_implicit_value() && !self.options.allow_unsafe {
                    let finding = safety::not_null_without_default(
                        self.ops.len(),
                        &diff.table_name,
                        &source.name,
                    );
                    return Err(LockplaneError::UnsafeOperation(Box::new(finding)));
                }
                let mut column = source.clone();
                if let Some(reference) = column.references.clone() {
                    let available = added.contains(&reference.table) || self.existed_before(&reference);
                    if !available {
                        column.references = None;
                        self.deferred.push(Operation::AddForeignKey {
                            table: diff.table_name.clone(),
                            column: column.name.clone(),
                            target: reference,
                        });
                    }
                }
                self.ops.push(Operation::AddColumn {
                    table: diff.table_name.clone(),
                    column,
                });
            }
        }
        Ok(())
    }

    /// Columns removed in this change set, keyed by `(table, column)`.
    fn removed_columns(&self, modified: &[&TableDiff]) -> HashSet<(String, String)> {
        modified
            .iter()
            .flat_map(|d| d.removed_columns.iter().map(move |c| sort_key(&d.table_name, &c.name)))
            .collect()
    }

    fn alter_columns(&mut self, modified: &[&TableDiff]) -> Result<StrippedKeys> {
        let changes = self.changes;
        let removed_columns = self.removed_columns(modified);
        let removed_tables: HashSet<String> =
            changes.removed_tables.iter().map(|t| t.name.clone()).collect();
        let targets_removed_column = |reference: &ForeignKeyRef| {
            !removed_tables.contains(&reference.table)
                && reference
                    .columns
                    .iter()
                    .any(|c| removed_columns.contains(&sort_key(&reference.table, c)))
        };

        // Phase A: drop constraints that later steps would trip over.
        let mut drops: Vec<((String, String), Operation)> = Vec::new();
        let mut stripped = StrippedKeys::new();
        for diff in modified {
            for column_diff in &diff.modified_columns {
                let key = sort_key(&diff.table_name, &column_diff.column_name);
                for change in &column_diff.changes {
                    match change {
                        ColumnChange::References { from: Some(target), .. } => drops.push((
                            key.clone(),
                            Operation::DropForeignKey {
                                table: diff.table_name.clone(),
                                column: column_diff.column_name.clone(),
                                target: target.clone(),
                            },
                        )),
                        ColumnChange::PrimaryKey { from: true, to: false } => drops.push((
                            key.clone(),
                            Operation::DropPrimaryKey {
                                table: diff.table_name.clone(),
                                column: column_diff.column_name.clone(),
                            },
                        )),
                        _ => {}
                    }
                }
            }
            for column in &diff.removed_columns {
                if let Some(target) = column.references.as_ref().filter(|r| targets_removed_column(*r)) {
                    let key = sort_key(&diff.table_name, &column.name);
                    stripped.insert(key.clone());
                    drops.push((
                        key,
                        Operation::DropForeignKey {
                            table: diff.table_name.clone(),
                            column: column.name.clone(),
                            target: target.clone(),
                        },
                    ));
                }
            }
        }

        // Foreign keys between removed tables that point forward in creation
        // order, or at removed columns, are dropped explicitly so the reverse
        // plan can recreate the tables before restoring them.
        let order = self.removed_creation_order();
        let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        for table in &changes.removed_tables {
            for column in &table.columns {
                let Some(target) = &column.references else { continue };
                let points_forward = match (position.get(table.name.as_str()), position.get(target.table.as_str())) {
                    (Some(a), Some(b)) => b > a,
                    _ => false,
                };
                if points_forward || targets_removed_column(target) {
                    let key = sort_key(&table.name, &column.name);
                    stripped.insert(key.clone());
                    drops.push((
                        key,
                        Operation::DropForeignKey {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            target: target.clone(),
                        },
                    ));
                }
            }
        }
        drops.sort_by(|a, b| a.0.cmp(&b.0));
        self.ops.extend(drops.into_iter().map(|(_, op)| op));

        // Phase B: one step per attribute change.
        for diff in modified {
            let mut columns: Vec<_> = diff.modified_columns.iter().collect();
            columns.sort_by(|a, b| a.column_name.cmp(&b.column_name));
            for column_diff in columns {
                let table = diff.table_name.clone();
                let column = column_diff.column_name.clone();
                let serial_changed = column_diff
                    .changes
                    .iter()
                    .any(|c| matches!(c, ColumnChange::Type { from, to } if from.is_serial() != to.is_serial()));
                for change in &column_diff.changes {
                    let op = match change {
                        ColumnChange::Type { from, to } => {
                            let ops = self.alter_type(&table, &column, from, to, &column_diff.changes);
                            self.ops.extend(ops);
                            continue;
                        }
                        // The sequence steps of a serial conversion own the default.
                        ColumnChange::Default { .. } if serial_changed => continue,
                        ColumnChange::Nullable { to: false, .. } => Operation::SetNotNull {
                            table: table.clone(),
                            column: column.clone(),
                        },
                        ColumnChange::Nullable { to: true, .. } => Operation::DropNotNull {
                            table: table.clone(),
                            column: column.clone(),
                        },
                        ColumnChange::Default { from, to: Some(to) } => Operation::SetDefault {
                            table: table.clone(),
                            column: column.clone(),
                            from: from.clone(),
                            to: to.clone(),
                        },
                        ColumnChange::Default { from: Some(from), to: None } => Operation::DropDefault {
                            table: table.clone(),
                            column: column.clone(),
                            from: from.clone(),
                        },
                        ColumnChange::PrimaryKey { to: true, .. } => Operation::AddPrimaryKey {
                            table: table.clone(),
                            column: column.clone(),
                        },
                        ColumnChange::References { to: Some(target), .. } => Operation::AddForeignKey {
                            table: table.clone(),
                            column: column.clone(),
                            target: target.clone(),
                        },
                        ColumnChange::Default { from: None, to: None } => {
                            return Err(LockplaneError::DiffInternal(format!(
                                "default change on {}.{} with no default on either side",
                                table, column
                            )))
                        }
                        // Drops were emitted in phase A.
                        ColumnChange::PrimaryKey { to: false, .. } | ColumnChange::References { to: None, .. } => {
                            continue
                        }
                    };
                    self.ops.push(op);
                }
            }
        }
        Ok(stripped)
    }

    /// Type change steps. Serial types are integer storage plus an owned
    /// sequence, so converting to or from one plans the sequence and its
    /// `nextval` default around an `ALTER TYPE` on the storage types.
    fn alter_type(
        &self,
        table: &str,
        column: &str,
        from: &SqlType,
        to: &SqlType,
        changes: &[ColumnChange],
    ) -> Vec<Operation> {
        let storage_change = |from: &SqlType, to: &SqlType| {
            (from != to).then(|| Operation::AlterType {
                table: table.to_string(),
                column: column.to_string(),
                from: from.clone(),
                to: to.clone(),
            })
        };
        let old_default = self
            .before
            .table(table)
            .and_then(|t| t.find_column(column))
            .and_then(|c| c.default.clone());
        let next_value = DefaultExpr::next_value(&ident::sequence_name(table, column));

        let mut ops = Vec::new();
        match (from.is_serial(), to.is_serial()) {
            (false, true) => {
                let storage = to.storage_type();
                ops.extend(storage_change(from, &storage));
                ops.push(Operation::CreateSequence {
                    table: table.to_string(),
                    column: column.to_string(),
                    data_type: storage,
                });
                ops.push(Operation::SetDefault {
                    table: table.to_string(),
                    column: column.to_string(),
                    from: old_default,
                    to: next_value,
                });
            }
            (true, false) => {
                let new_default = changes
                    .iter()
                    .find_map(|c| match c {
                        ColumnChange::Default { to, .. } => Some(to.clone()),
                        _ => None,
                    })
                    .unwrap_or(old_default);
                ops.push(match new_default {
                    Some(default) => Operation::SetDefault {
                        table: table.to_string(),
                        column: column.to_string(),
                        from: Some(next_value),
                        to: default,
                    },
                    None => Operation::DropDefault {
                        table: table.to_string(),
                        column: column.to_string(),
                        from: next_value,
                    },
                });
                let storage = from.storage_type();
                ops.push(Operation::DropSequence {
                    table: table.to_string(),
                    column: column.to_string(),
                    data_type: storage.clone(),
                });
                ops.extend(storage_change(&storage, to));
            }
            _ => ops.extend(storage_change(from, to)),
        }
        ops
    }

    fn removed_creation_order(&self) -> Vec<String> {
        let infos: Vec<TableInfo> = self
            .changes
            .removed_tables
            .iter()
            .map(|t| TableInfo {
                name: t.name.clone(),
                dependencies: t.referenced_tables(),
            })
            .collect();
        creation_order(&infos)
    }

    fn index_changes(&mut self, modified: &[&TableDiff]) {
        let mut creates: Vec<(String, Index)> = Vec::new();
        for table in &self.changes.added_tables {
            creates.extend(table.indexes.iter().map(|i| (table.name.clone(), i.clone())));
        }
        let mut replaced: HashMap<(String, String), Index> = HashMap::new();
        let mut drops: Vec<(String, Index)> = Vec::new();
        for diff in modified {
            creates.extend(diff.added_indexes.iter().map(|i| (diff.table_name.clone(), i.clone())));
            for index in &diff.removed_indexes {
                let is_replaced = diff
                    .added_indexes
                    .iter()
                    .any(|a| a.name == index.name);
                if is_replaced {
                    replaced.insert(sort_key(&diff.table_name, &index.name), index.clone());
                } else {
                    drops.push((diff.table_name.clone(), index.clone()));
                }
            }
        }

        creates.sort_by(|a, b| sort_key(&a.0, &a.1.name).cmp(&sort_key(&b.0, &b.1.name)));
        for (table, index) in creates {
            // A redefined index keeps its name, so the old one goes first.
            if let Some(old) = replaced.remove(&sort_key(&table, &index.name)) {
                self.ops.push(Operation::DropIndex {
                    table: table.clone(),
                    index: old,
                });
            }
            self.ops.push(Operation::CreateIndex { table, index });
        }

        drops.sort_by(|a, b| sort_key(&a.0, &a.1.name).cmp(&sort_key(&b.0, &b.1.name)));
        self.ops
            .extend(drops.into_iter().map(|(table, index)| Operation::DropIndex { table, index }));
    }

    fn drop_columns(&mut self, modified: &[&TableDiff], stripped: &StrippedKeys) {
        for diff in modified {
            let mut columns: Vec<&Column> = diff.removed_columns.iter().collect();
            columns.sort_by(|a, b| a.name.cmp(&b.name));
            for source in columns {
                let mut column = source.clone();
                if stripped.contains(&sort_key(&diff.table_name, &column.name)) {
                    column.references = None;
                }
                self.ops.push(Operation::DropColumn {
                    table: diff.table_name.clone(),
                    column,
                });
            }
        }
    }

    fn drop_tables(&mut self, stripped: &StrippedKeys) {
        let changes = self.changes;
        let by_name: HashMap<String, &Table> =
            changes.removed_tables.iter().map(|t| (t.name.clone(), t)).collect();
        for name in self.removed_creation_order().into_iter().rev() {
            let Some(source) = by_name.get(&name) else { continue };
            let mut table = (*source).clone();
            for column in &mut table.columns {
                if stripped.contains(&sort_key(&table.name, &column.name)) {
                    column.references = None;
                }
            }
            self.ops.push(Operation::DropTable { table });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_default_inverts_to_previous_value() {
        let op = Operation::SetDefault {
            table: "t".into(),
            column: "c".into(),
            from: Some(DefaultExpr::parse("1")),
            to: DefaultExpr::parse("2"),
        };
        assert_eq!(
            op.invert(),
            vec![Operation::SetDefault {
                table: "t".into(),
                column: "c".into(),
                from: Some(DefaultExpr::parse("2")),
                to: DefaultExpr::parse("1"),
            }]
        );

        let fresh = Operation::SetDefault {
            table: "t".into(),
            column: "c".into(),
            from: None,
            to: DefaultExpr::parse("2"),
        };
        assert_eq!(fresh.invert()[0].statement().to_string(), "ALTER TABLE t ALTER COLUMN c DROP DEFAULT");
    }

    #[test]
    fn dropped_table_is_recreated_with_its_indexes() {
        let table = Table::new("t")
            .column(Column::new("a", SqlType::Integer))
            .index(Index::new("t_a_idx", ["a"]));
        let ops = Operation::DropTable { table }.invert();
        let descriptions: Vec<_> = ops.iter().map(Operation::description).collect();
        assert_eq!(descriptions, ["create table t", "create index t_a_idx"]);
    }

    #[test]
    fn constraint_steps_use_default_names() {
        let op = Operation::DropPrimaryKey { table: "users".into(), column: "id".into() };
        assert_eq!(op.statement().to_string(), "ALTER TABLE users DROP CONSTRAINT users_pkey");
        let op = Operation::AddForeignKey {
            table: "posts".into(),
            column: "user_id".into(),
            target: ForeignKeyRef { table: "users".into(), columns: vec!["id".into()] },
        };
        assert_eq!(
            op.statement().to_string(),
            "ALTER TABLE posts ADD CONSTRAINT posts_user_id_fkey FOREIGN KEY (user_id) REFERENCES users (id)"
        );
    }

    #[test]
    fn reverse_is_lifo() {
        let forward = vec![
            Operation::CreateTable { table: Table::new("a").column(Column::new("id", SqlType::Integer)) },
            Operation::CreateIndex { table: "a".into(), index: Index::new("a_idx", ["id"]) },
        ];
        let descriptions: Vec<_> = reverse_operations(&forward).iter().map(Operation::description).collect();
        assert_eq!(descriptions, ["drop index a_idx", "drop table a"]);
    }
}
