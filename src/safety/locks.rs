//! Postgres lock modes taken by plan steps.

use std::fmt;

use serde::Serialize;

use crate::plan::ddl::DdlStatement;

/// Table-level lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    pub fn blocks_reads(self) -> bool {
        self == LockMode::AccessExclusive
    }

    pub fn blocks_writes(self) -> bool {
        self >= LockMode::Share
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::AccessShare => "ACCESS SHARE",
            LockMode::RowShare => "ROW SHARE",
            LockMode::RowExclusive => "ROW EXCLUSIVE",
            LockMode::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockMode::Share => "SHARE",
            LockMode::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::AccessExclusive => "ACCESS EXCLUSIVE",
        })
    }
}

/// Lock taken by one forward step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockImpact {
    pub operation_index: usize,
    pub description: String,
    pub table: Option<String>,
    pub lock: LockMode,
    pub blocks_reads: bool,
    pub blocks_writes: bool,
    pub explanation: String,
}

/// Lock mode and explanation for a statement.
pub fn lock_for(statement: &DdlStatement) -> (LockMode, &'static str) {
    match statement {
        DdlStatement::CreateTable { .. } => (
            LockMode::AccessExclusive,
            "CREATE TABLE locks only the new table; existing traffic is unaffected",
        ),
        DdlStatement::DropTable { .. } => (
            LockMode::AccessExclusive,
            "DROP TABLE requires exclusive access to remove the table",
        ),
        DdlStatement::AddColumn { column, .. } if column.default.is_some() => (
            LockMode::AccessExclusive,
            "ALTER TABLE ADD COLUMN with DEFAULT may rewrite the entire table",
        ),
        DdlStatement::AddColumn { .. } => (
            LockMode::AccessExclusive,
            "ALTER TABLE requires exclusive access to modify table structure",
        ),
        DdlStatement::DropColumn { .. } => (
            LockMode::AccessExclusive,
            "DROP COLUMN requires exclusive access to modify table structure",
        ),
        DdlStatement::AlterColumnType { .. } => (
            LockMode::AccessExclusive,
            "changing a column type may rewrite the entire table",
        ),
        DdlStatement::SetNotNull { .. } => (
            LockMode::AccessExclusive,
            "SET NOT NULL scans every row while holding an exclusive lock",
        ),
        DdlStatement::DropNotNull { .. } | DdlStatement::SetDefault { .. } | DdlStatement::DropDefault { .. } => (
            LockMode::AccessExclusive,
            "catalog-only change; the exclusive lock is held briefly",
        ),
        DdlStatement::AddPrimaryKey { .. } => (
            LockMode::AccessExclusive,
            "ADD CONSTRAINT builds a unique index and scans all existing rows",
        ),
        DdlStatement::AddForeignKey { .. } => (
            LockMode::ShareRowExclusive,
            "ADD CONSTRAINT scans all existing rows to validate the constraint",
        ),
        DdlStatement::DropConstraint { .. } => (
            LockMode::AccessExclusive,
            "ALTER TABLE operation requires exclusive access",
        ),
        DdlStatement::CreateIndex { .. } => (
            LockMode::Share,
            "CREATE INDEX requires SHARE lock, blocking writes during index build",
        ),
        DdlStatement::DropIndex { .. } => (
            LockMode::AccessExclusive,
            "DROP INDEX locks the owning table exclusively",
        ),
        DdlStatement::CreateSequence { .. } => (
            LockMode::AccessShare,
            "CREATE SEQUENCE only reads the owning table's definition",
        ),
        DdlStatement::DropSequence { .. } => (
            LockMode::AccessExclusive,
            "DROP SEQUENCE locks only the sequence",
        ),
    }
}

pub(crate) fn impact(operation_index: usize, description: &str, statement: &DdlStatement) -> LockImpact {
    let (lock, explanation) = lock_for(statement);
    LockImpact {
        operation_index,
        description: description.to_string(),
        table: statement.table().map(str::to_string),
        lock,
        blocks_reads: lock.blocks_reads(),
        blocks_writes: lock.blocks_writes(),
        explanation: explanation.to_string(),
    }
}
