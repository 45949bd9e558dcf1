//! # Lockplane
//!
//! Schema-evolution control plane for PostgreSQL: diff a desired catalog
//! against the live one, plan forward and reverse DDL, classify the risk,
//! and apply the plan transactionally behind an advisory lock and a
//! source-hash gate.
//!
//! ```no_run
//! use lockplane::{apply, plan, ApplyOptions, Catalog, MemoryDriver};
//!
//! # fn main() -> lockplane::Result<()> {
//! let desired = Catalog::from_json(r#"{"tables":[{"name":"users","columns":[{"name":"id","type":"integer","is_primary_key":true}]}]}"#)?;
//! let target = MemoryDriver::new();
//! let pair = plan(&lockplane::SchemaDriver::introspect(&target)?, &desired)?;
//! let report = lockplane::analyze(&pair.forward, &pair.reverse, &pair.changes);
//! assert!(report.is_safe());
//! apply(&pair.forward, &target, None, ApplyOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod diff;
pub mod driver;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod plan;
pub mod safety;

pub use apply::{apply, Applier, ApplyOptions, ApplyResult, CancellationToken, StepReceipt};
pub use catalog::{Catalog, Column, ForeignKeyRef, Index, SqlType, Table};
pub use config::LockplaneSettings;
pub use connection::{connect_driver, ConnectionError, DriverKind};
pub use diff::{diff, ChangeSet, ColumnChangeKind};
pub use driver::memory::MemoryDriver;
pub use driver::postgres::PostgresDriver;
pub use driver::{DriverError, SchemaDriver};
pub use error::{ErrorKind, LockplaneError, Result};
pub use hash::hash_catalog;
pub use plan::{plan, plan_with_options, Plan, PlanOptions, PlanPair, Step};
pub use safety::{analyze, Finding, SafetyReport, Severity};
