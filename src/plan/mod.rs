//! Plans
//!
//! A [`Plan`] is an ordered list of DDL [`Step`]s plus the hash of the schema
//! it expects to run against (`source_hash`) and the hash of the schema it
//! produces (`predicted_hash`). [`plan`] computes a forward plan and the
//! reverse plan that undoes it.

pub mod ddl;
pub mod ordering;
pub(crate) mod planner;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::diff::{self, ChangeSet};
use crate::driver::memory::MemoryDriver;
use crate::driver::SchemaDriver;
use crate::error::{LockplaneError, Result};
use crate::hash::hash_catalog;

use planner::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub description: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_hash: Option<String>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Parses a plan document.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| {
            LockplaneError::parse(format!("line {} column {}", e.line(), e.column()), e.to_string())
        })
    }

    /// Pretty-printed plan document.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    fn from_operations(operations: &[Operation], source_hash: String, predicted_hash: String) -> Self {
        Self {
            source_hash: Some(source_hash),
            predicted_hash: Some(predicted_hash),
            steps: operations
                .iter()
                .map(|op| Step {
                    description: op.description(),
                    sql: op.statement().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Emit `ADD COLUMN ... NOT NULL` without a default instead of refusing.
    pub allow_unsafe: bool,
}

/// Forward plan, the reverse plan that undoes it, and the changes both
/// were built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPair {
    pub forward: Plan,
    pub reverse: Plan,
    pub changes: ChangeSet,
}

/// Plans the migration from `before` to `after` with default options.
pub fn plan(before: &Catalog, after: &Catalog) -> Result<PlanPair> {
    plan_with_options(before, after, &PlanOptions::default())
}

/// Plans the migration from `before` to `after`.
///
/// Fails with `UnsafeOperation` when a NOT NULL column without a default
/// would be added and `allow_unsafe` is off.
pub fn plan_with_options(before: &Catalog, after: &Catalog, options: &PlanOptions) -> Result<PlanPair> {
    let changes = diff::diff(before, after);
    let forward_ops = planner::forward_operations(before, &changes, options)?;
    let reverse_ops = planner::reverse_operations(&forward_ops);

    let before_hash = hash_catalog(before);
    let after_hash = hash_catalog(after);
    log::debug!(
        "planned {} forward and {} reverse steps ({} -> {})",
        forward_ops.len(),
        reverse_ops.len(),
        before_hash,
        after_hash
    );

    Ok(PlanPair {
        forward: Plan::from_operations(&forward_ops, before_hash.clone(), after_hash.clone()),
        reverse: Plan::from_operations(&reverse_ops, after_hash, before_hash),
        changes,
    })
}

/// Applies a plan's DDL to a copy of `catalog` without touching a database.
pub fn simulate(plan: &Plan, catalog: &Catalog) -> Result<Catalog> {
    let driver = MemoryDriver::with_catalog(catalog.clone());
    for (index, step) in plan.steps.iter().enumerate() {
        driver.exec(&step.sql).map_err(|error| LockplaneError::ApplyFailed {
            step_index: index,
            description: step.description.clone(),
            steps_applied: 0,
            error,
        })?;
    }
    Ok(driver.introspect()?)
}
