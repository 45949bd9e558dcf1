//! Safety analysis
//!
//! Classifies what a forward/reverse plan pair does to existing data and
//! clients. Every finding points at a step of one of the two plans.

pub mod locks;

use std::collections::HashSet;

use serde::Serialize;

use crate::catalog::TypeChange;
use crate::diff::{ChangeSet, ColumnChange, ColumnChangeKind};
use crate::plan::ddl::{parse_statement, DdlStatement};
use crate::plan::Plan;

pub use locks::{LockImpact, LockMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DataLoss,
    NullabilityTightening,
    Reversibility,
    BreakingChange,
}

/// Which plan a finding's `operation_index` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSide {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    pub plan: PlanSide,
    pub operation_index: usize,
    pub message: String,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    pub findings: Vec<Finding>,
    pub lock_impacts: Vec<LockImpact>,
}

impl SafetyReport {
    /// No danger findings.
    pub fn is_safe(&self) -> bool {
        self.findings.iter().all(|f| f.severity < Severity::Danger)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    pub fn dangers(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Danger)
    }
}

fn alternatives(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Finding for `ADD COLUMN ... NOT NULL` with nothing to fill existing rows.
pub fn not_null_without_default(operation_index: usize, table: &str, column: &str) -> Finding {
    Finding {
        severity: Severity::Danger,
        category: Category::NullabilityTightening,
        plan: PlanSide::Forward,
        operation_index,
        message: format!(
            "adding NOT NULL column {}.{} without a default fails on a non-empty table",
            table, column
        ),
        alternatives: alternatives(&[
            "add the column as nullable, backfill it, then set NOT NULL",
            "give the column a default value",
        ]),
    }
}

/// Analyzes a plan pair produced from `changes`.
pub fn analyze(forward: &Plan, reverse: &Plan, changes: &ChangeSet) -> SafetyReport {
    let mut report = SafetyReport::default();
    let mut dropped_tables = HashSet::new();
    let mut dropped_columns = HashSet::new();

    for (index, step) in forward.steps.iter().enumerate() {
        let statement = match parse_statement(&step.sql) {
            Ok(statement) => statement,
            Err(err) => {
                report.findings.push(unrecognized(PlanSide::Forward, index, &err.to_string()));
                continue;
            }
        };
        report.lock_impacts.push(locks::impact(index, &step.description, &statement));

        match &statement {
            DdlStatement::DropTable { name, .. } => {
                dropped_tables.insert(name.clone());
                report.findings.push(Finding {
                    severity: Severity::Danger,
                    category: Category::DataLoss,
                    plan: PlanSide::Forward,
                    operation_index: index,
                    message: format!("dropping table {} permanently deletes all of its rows", name),
                    alternatives: alternatives(&[
                        "rename the table and drop it in a later release",
                        "export the data before dropping",
                    ]),
                });
                report.findings.push(breaking(index, format!("queries that reference table {} will fail", name)));
            }
            DdlStatement::DropColumn { table, column } => {
                dropped_columns.insert((table.clone(), column.clone()));
                report.findings.push(Finding {
                    severity: Severity::Danger,
                    category: Category::DataLoss,
                    plan: PlanSide::Forward,
                    operation_index: index,
                    message: format!("dropping column {}.{} permanently deletes its data", table, column),
                    alternatives: alternatives(&[
                        "expand/contract: stop reading and writing the column, deploy, then drop it",
                        "copy the data to another column or table first",
                    ]),
                });
                report.findings.push(breaking(
                    index,
                    format!("clients that read or write {}.{} will fail", table, column),
                ));
            }
            DdlStatement::AlterColumnType { table, column, data_type } => {
                let from = changes
                    .column_diff(table, column)
                    .and_then(|d| d.change(ColumnChangeKind::Type))
                    .and_then(|c| match c {
                        ColumnChange::Type { from, .. } => Some(from.clone()),
                        _ => None,
                    });
                let change = from.as_ref().map_or(TypeChange::Incompatible, |f| f.change_to(data_type));
                match change {
                    TypeChange::Narrowing | TypeChange::Incompatible => {
                        report.findings.push(Finding {
                            severity: Severity::Danger,
                            category: Category::DataLoss,
                            plan: PlanSide::Forward,
                            operation_index: index,
                            message: format!(
                                "changing {}.{}{} to {} may truncate or reject existing values",
                                table,
                                column,
                                from.as_ref().map(|f| format!(" from {}", f)).unwrap_or_default(),
                                data_type
                            ),
                            alternatives: alternatives(&[
                                "expand/contract: add a new column, backfill, switch readers, drop the old column",
                                "verify that existing values fit the new type before applying",
                            ]),
                        });
                        report.findings.push(breaking(
                            index,
                            format!("clients that depend on the type of {}.{} may break", table, column),
                        ));
                    }
                    TypeChange::Widening | TypeChange::Equivalent => report.findings.push(Finding {
                        severity: Severity::Info,
                        category: Category::BreakingChange,
                        plan: PlanSide::Forward,
                        operation_index: index,
                        message: format!("{}.{} is widened to {}", table, column, data_type),
                        alternatives: Vec::new(),
                    }),
                }
            }
            DdlStatement::SetNotNull { table, column } => {
                let has_default = changes
                    .column_diff(table, column)
                    .is_some_and(|d| d.new.default.is_some());
                report.findings.push(Finding {
                    severity: if has_default { Severity::Info } else { Severity::Warning },
                    category: Category::NullabilityTightening,
                    plan: PlanSide::Forward,
                    operation_index: index,
                    message: format!(
                        "setting {}.{} NOT NULL fails if any existing row holds NULL",
                        table, column
                    ),
                    alternatives: alternatives(&[
                        "backfill NULL values before applying",
                        "add a CHECK (column IS NOT NULL) NOT VALID constraint, validate it, then set NOT NULL",
                    ]),
                });
            }
            DdlStatement::AddColumn { table, column } if !column.nullable && !column.has_implicit_value() => {
                report.findings.push(not_null_without_default(index, table, &column.name));
            }
            DdlStatement::CreateSequence { name, table, column, .. } => {
                report.findings.push(Finding {
                    severity: Severity::Warning,
                    category: Category::BreakingChange,
                    plan: PlanSide::Forward,
                    operation_index: index,
                    message: sequence_restart_message(name, table, column),
                    alternatives: alternatives(&[
                        "call setval() on the sequence with the column's current maximum after applying",
                    ]),
                });
            }
            _ => {}
        }
    }

    for (index, step) in reverse.steps.iter().enumerate() {
        let statement = match parse_statement(&step.sql) {
            Ok(statement) => statement,
            Err(err) => {
                report.findings.push(unrecognized(PlanSide::Reverse, index, &err.to_string()));
                continue;
            }
        };
        if let Some(finding) = reverse_finding(index, &statement, changes, &dropped_tables, &dropped_columns) {
            report.findings.push(finding);
        }
    }

    report
}

fn reverse_finding(
    index: usize,
    statement: &DdlStatement,
    changes: &ChangeSet,
    dropped_tables: &HashSet<String>,
    dropped_columns: &HashSet<(String, String)>,
) -> Option<Finding> {
    let message = match statement {
        DdlStatement::CreateTable { table } if dropped_tables.contains(&table.name) => format!(
            "rolling back recreates table {} empty; its rows cannot be restored",
            table.name
        ),
        DdlStatement::AddColumn { table, column }
            if dropped_columns.contains(&(table.clone(), column.name.clone())) =>
        {
            format!(
                "rolling back re-adds column {}.{} without its data",
                table, column.name
            )
        }
        DdlStatement::AlterColumnType { table, column, data_type } => {
            let narrows = changes
                .column_diff(table, column)
                .is_some_and(|d| !matches!(d.new.data_type.change_to(data_type), TypeChange::Widening | TypeChange::Equivalent));
            if !narrows {
                return None;
            }
            format!(
                "rolling back changes {}.{} back to {}, which may reject values written after the migration",
                table, column, data_type
            )
        }
        DdlStatement::CreateSequence { name, table, column, .. } => {
            format!("rolling back {}", sequence_restart_message(name, table, column))
        }
        DdlStatement::SetNotNull { table, column } => format!(
            "rolling back restores NOT NULL on {}.{}, which fails if NULLs were written after the migration",
            table, column
        ),
        _ => return None,
    };
    Some(Finding {
        severity: Severity::Warning,
        category: Category::Reversibility,
        plan: PlanSide::Reverse,
        operation_index: index,
        message,
        alternatives: alternatives(&[
            "take a backup or snapshot before applying the forward plan",
        ]),
    })
}

fn sequence_restart_message(name: &str, table: &str, column: &str) -> String {
    format!(
        "creates sequence {} starting at 1; values it generates may collide with existing rows of {}.{}",
        name, table, column
    )
}

fn breaking(index: usize, message: String) -> Finding {
    Finding {
        severity: Severity::Warning,
        category: Category::BreakingChange,
        plan: PlanSide::Forward,
        operation_index: index,
        message,
        alternatives: alternatives(&["deploy client changes that stop using the object first"]),
    }
}

fn unrecognized(plan: PlanSide, index: usize, error: &str) -> Finding {
    Finding {
        severity: Severity::Warning,
        category: Category::BreakingChange,
        plan,
        operation_index: index,
        message: format!("statement could not be analyzed: {}", error),
        alternatives: alternatives(&["review this step manually"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Column, SqlType, Table};
    use crate::plan::{plan, plan_with_options, PlanOptions};

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text).not_null())
    }

    fn report(before: Vec<Table>, after: Vec<Table>) -> SafetyReport {
        let pair = plan(&Catalog::new(before).unwrap(), &Catalog::new(after).unwrap()).unwrap();
        analyze(&pair.forward, &pair.reverse, &pair.changes)
    }

    #[test]
    fn adding_a_nullable_column_is_safe() {
        let report = report(
            vec![users()],
            vec![users().column(Column::new("created_at", SqlType::Timestamp(None)).default_sql("now()"))],
        );
        assert!(report.is_safe());
        assert!(report.findings.iter().all(|f| f.severity == Severity::Info));
        assert_eq!(report.lock_impacts.len(), 1);
    }

    #[test]
    fn dropping_a_column_is_dangerous_and_not_reversible() {
        let report = report(
            vec![users().column(Column::new("legacy", SqlType::Text))],
            vec![users()],
        );
        let data_loss: Vec<_> = report.by_category(Category::DataLoss).collect();
        assert_eq!(data_loss.len(), 1);
        assert_eq!(data_loss[0].severity, Severity::Danger);
        assert_eq!(data_loss[0].operation_index, 0);
        assert!(!data_loss[0].alternatives.is_empty());

        let reversibility: Vec<_> = report.by_category(Category::Reversibility).collect();
        assert_eq!(reversibility.len(), 1);
        assert_eq!(reversibility[0].plan, PlanSide::Reverse);
        assert_eq!(report.max_severity(), Some(Severity::Danger));
    }

    #[test]
    fn narrowing_is_data_loss_and_widening_warns_on_rollback() {
        let narrow = report(
            vec![users().column(Column::new("name", SqlType::Varchar(Some(255))))],
            vec![users().column(Column::new("name", SqlType::Varchar(Some(64))))],
        );
        assert_eq!(narrow.dangers().count(), 1);

        let widen = report(
            vec![users().column(Column::new("n", SqlType::Integer))],
            vec![users().column(Column::new("n", SqlType::BigInt))],
        );
        assert!(widen.is_safe());
        let rollback: Vec<_> = widen.by_category(Category::Reversibility).collect();
        assert_eq!(rollback.len(), 1);
        assert_eq!(rollback[0].severity, Severity::Warning);
    }

    #[test]
    fn tightening_nullability_warns() {
        let report = report(
            vec![users().column(Column::new("bio", SqlType::Text))],
            vec![users().column(Column::new("bio", SqlType::Text).not_null())],
        );
        let findings: Vec<_> = report.by_category(Category::NullabilityTightening).collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn forced_not_null_add_is_flagged() {
        let before = Catalog::new(vec![users()]).unwrap();
        let after = Catalog::new(vec![users().column(Column::new("age", SqlType::Integer).not_null())]).unwrap();
        let pair = plan_with_options(&before, &after, &PlanOptions { allow_unsafe: true }).unwrap();
        let report = analyze(&pair.forward, &pair.reverse, &pair.changes);
        assert!(!report.is_safe());
        assert_eq!(report.dangers().next().map(|f| f.category), Some(Category::NullabilityTightening));
    }

    #[test]
    fn converting_to_serial_warns_about_sequence_collisions() {
        let report = report(
            vec![users()],
            vec![Table::new("users")
                .column(Column::new("id", SqlType::Serial).primary_key())
                .column(Column::new("email", SqlType::Text).not_null())],
        );
        assert!(report.is_safe());
        let warnings: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.message.contains("creates sequence users_id_seq starting at 1"))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].plan, PlanSide::Forward);
        assert_eq!(warnings[0].severity, Severity::Warning);
        assert!(report.lock_impacts.iter().all(|l| !l.description.contains("serial")));
    }

    #[test]
    fn dropping_a_table_reports_locks() {
        let report = report(vec![users()], vec![]);
        assert_eq!(report.lock_impacts[0].lock, LockMode::AccessExclusive);
        assert!(report.lock_impacts[0].blocks_reads);
        assert_eq!(report.by_category(Category::DataLoss).count(), 1);
    }
}
