//! Plan executor
//!
//! Applies a [`Plan`] to a target database:
//!
//! 1. take the advisory lock ([`ADVISORY_LOCK_KEY`]) on the target
//! 2. introspect the target and require its hash to equal the plan's
//!    `source_hash`
//! 3. when a shadow database is given, rebuild the live schema on it, run
//!    the plan in a transaction, compare the result with the plan's
//!    `predicted_hash` and roll the shadow back
//! 4. run the plan on the target in one transaction and commit
//!
//! Any failure before commit rolls back the open transaction and releases
//! the lock. Nothing is retried.

pub mod cancel;
pub mod lock;
pub mod receipt;

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::driver::{DriverError, SchemaDriver};
use crate::error::{LockplaneError, Result};
use crate::hash::{hash_catalog, verify_source_hash};
use crate::plan::{self, Plan, PlanOptions, Step};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub use cancel::CancellationToken;
pub use lock::{AdvisoryLockGuard, ADVISORY_LOCK_KEY};
pub use receipt::{ApplyPhase, StepReceipt, StepStatus};

use receipt::ReceiptLog;

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Limit for each DDL statement.
    pub step_timeout: Duration,
    /// How long to wait for another apply to release the advisory lock.
    pub lock_timeout: Duration,
    /// Accept plans without a `source_hash`.
    pub unchecked: bool,
    pub lock_key: i64,
    pub cancellation: CancellationToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(60),
            unchecked: false,
            lock_key: ADVISORY_LOCK_KEY,
            cancellation: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyResult {
    pub apply_id: Uuid,
    pub success: bool,
    pub steps_applied: usize,
    /// Hash of the target schema read back after commit. When that read
    /// fails this is the plan's predicted hash and `hash_verified` is false.
    pub resulting_hash: String,
    pub hash_verified: bool,
    /// Shadow receipts first, then target receipts.
    pub receipts: Vec<StepReceipt>,
}

enum StepFailure {
    Timeout,
    Failed(DriverError),
}

/// Executes plans against a target and, optionally, a shadow database.
pub struct Applier<'a> {
    target: &'a dyn SchemaDriver,
    shadow: Option<&'a dyn SchemaDriver>,
    options: ApplyOptions,
}

impl<'a> Applier<'a> {
    pub fn new(target: &'a dyn SchemaDriver) -> Self {
        Self {
            target,
            shadow: None,
            options: ApplyOptions::default(),
        }
    }

    #[must_use]
    pub fn with_shadow(mut self, shadow: &'a dyn SchemaDriver) -> Self {
        self.shadow = Some(shadow);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Applies `plan`.
    ///
    /// # Errors
    ///
    /// `MissingSourceHash`, `LockUnavailable`, `SourceHashMismatch`,
    /// `ShadowValidationFailed`, `PredictedHashMismatch`, `ApplyFailed`,
    /// `StepTimeout` and `Cancelled` as described in the module docs; driver
    /// failures outside a step surface as `DriverError`.
    pub fn apply(&self, plan: &Plan) -> Result<ApplyResult> {
        let apply_id = Uuid::new_v4();
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::apply_span(&apply_id.to_string(), plan.len()).entered();
        #[cfg(feature = "metrics")]
        METRICS.record_apply();

        log::info!(
            "apply {} started: {} steps against {}{}",
            apply_id,
            plan.len(),
            self.target.name(),
            if self.shadow.is_some() { " with shadow" } else { "" }
        );
        let result = self.run(plan, apply_id);
        match &result {
            Ok(outcome) => log::info!(
                "apply {} committed {} steps; schema is now {}",
                apply_id,
                outcome.steps_applied,
                outcome.resulting_hash
            ),
            Err(e) => {
                log::warn!("apply {} failed ({}): {}", apply_id, e.kind(), e);
                #[cfg(feature = "metrics")]
                METRICS.record_apply_failure(e.kind().as_str());
            }
        }
        result
    }

    fn run(&self, plan: &Plan, apply_id: Uuid) -> Result<ApplyResult> {
        if plan.source_hash.is_none() && !self.options.unchecked {
            return Err(LockplaneError::MissingSourceHash);
        }
        self.check_cancelled()?;

        let guard = AdvisoryLockGuard::acquire(self.target, self.options.lock_key, self.options.lock_timeout)?;
        #[cfg(feature = "metrics")]
        METRICS.record_lock_wait(guard.waited());

        let live = self.target.introspect()?;
        let live_hash = hash_catalog(&live);
        match &plan.source_hash {
            Some(expected) => verify_source_hash(expected, &live_hash)?,
            None => log::warn!("applying plan without a source hash; target is at {}", live_hash),
        }
        log::info!("source hash verified: {}", live_hash);

        let mut receipts = ReceiptLog::new(apply_id);
        if let Some(shadow) = self.shadow {
            self.validate_on_shadow(plan, shadow, &live, &live_hash, &mut receipts)?;
        }
        let (resulting_hash, hash_verified) = self.apply_to_target(plan, &mut receipts)?;
        drop(guard);

        Ok(ApplyResult {
            apply_id,
            success: true,
            steps_applied: plan.len(),
            resulting_hash,
            hash_verified,
            receipts: receipts.into_receipts(),
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.options.cancellation.is_cancelled() {
            Err(LockplaneError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn rollback(driver: &dyn SchemaDriver, phase: ApplyPhase) {
        if let Err(e) = driver.rollback() {
            log::warn!("rollback on {} failed: {e}", phase);
        }
    }

    /// Runs one step inside the open transaction.
    fn run_step(
        &self,
        driver: &dyn SchemaDriver,
        phase: ApplyPhase,
        index: usize,
        step: &Step,
        receipts: &mut ReceiptLog,
    ) -> std::result::Result<(), StepFailure> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::step_span(phase.as_str(), index, &step.description).entered();
        log::debug!("{} step {}: {}", phase, index + 1, step.sql);

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = driver
            .set_statement_timeout(self.options.step_timeout)
            .and_then(|()| driver.exec(&step.sql));
        let elapsed = start.elapsed();
        #[cfg(feature = "metrics")]
        METRICS.record_step(phase.as_str(), elapsed);

        let (status, failure) = match outcome {
            Err(e) if e.is_timeout() => (StepStatus::TimedOut, Some(StepFailure::Timeout)),
            Err(e) => (StepStatus::Failed, Some(StepFailure::Failed(e))),
            Ok(()) if elapsed > self.options.step_timeout => (StepStatus::TimedOut, Some(StepFailure::Timeout)),
            Ok(()) => (StepStatus::Succeeded, None),
        };
        let error = match &failure {
            Some(StepFailure::Timeout) => Some(format!("exceeded {:?}", self.options.step_timeout)),
            Some(StepFailure::Failed(e)) => Some(e.to_string()),
            None => None,
        };
        receipts.record(phase, index, &step.description, started_at, elapsed, status, error);
        failure.map_or(Ok(()), Err)
    }

    fn validate_on_shadow(
        &self,
        plan: &Plan,
        shadow: &dyn SchemaDriver,
        live: &Catalog,
        live_hash: &str,
        receipts: &mut ReceiptLog,
    ) -> Result<()> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::phase_span(ApplyPhase::Shadow.as_str()).entered();

        prepare_shadow(shadow, live, live_hash)?;
        shadow.begin().map_err(preparation_failed)?;

        for (index, step) in plan.steps.iter().enumerate() {
            if let Err(e) = self.check_cancelled() {
                Self::rollback(shadow, ApplyPhase::Shadow);
                return Err(e);
            }
            match self.run_step(shadow, ApplyPhase::Shadow, index, step, receipts) {
                Ok(()) => {}
                Err(failure) => {
                    Self::rollback(shadow, ApplyPhase::Shadow);
                    return Err(match failure {
                        StepFailure::Timeout => LockplaneError::StepTimeout {
                            step_index: index,
                            description: step.description.clone(),
                        },
                        StepFailure::Failed(error) => LockplaneError::ShadowValidationFailed {
                            step_index: Some(index),
                            description: Some(step.description.clone()),
                            steps_attempted: index + 1,
                            error,
                        },
                    });
                }
            }
        }

        let result = shadow.introspect();
        Self::rollback(shadow, ApplyPhase::Shadow);
        let shadow_hash = hash_catalog(&result?);
        if let Some(expected) = &plan.predicted_hash {
            if *expected != shadow_hash {
                return Err(LockplaneError::PredictedHashMismatch {
                    expected: expected.clone(),
                    actual: shadow_hash,
                });
            }
        }
        log::info!("shadow validation passed: {} steps, schema {}", plan.len(), shadow_hash);
        Ok(())
    }

    /// Returns the hash of the target schema after commit and whether it was
    /// read back from the target. The commit stands either way.
    fn apply_to_target(&self, plan: &Plan, receipts: &mut ReceiptLog) -> Result<(String, bool)> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::phase_span(ApplyPhase::Target.as_str()).entered();

        let target = self.target;
        target.begin()?;
        for (index, step) in plan.steps.iter().enumerate() {
            if let Err(e) = self.check_cancelled() {
                Self::rollback(target, ApplyPhase::Target);
                return Err(e);
            }
            if let Err(failure) = self.run_step(target, ApplyPhase::Target, index, step, receipts) {
                Self::rollback(target, ApplyPhase::Target);
                return Err(match failure {
                    StepFailure::Timeout => LockplaneError::StepTimeout {
                        step_index: index,
                        description: step.description.clone(),
                    },
                    StepFailure::Failed(error) => LockplaneError::ApplyFailed {
                        step_index: index,
                        description: step.description.clone(),
                        steps_applied: 0,
                        error,
                    },
                });
            }
        }

        if let Err(e) = self.check_cancelled() {
            Self::rollback(target, ApplyPhase::Target);
            return Err(e);
        }
        if let Err(e) = target.commit() {
            Self::rollback(target, ApplyPhase::Target);
            return Err(e.into());
        }
        log::info!("target transaction committed");

        let resulting_hash = match target.introspect() {
            Ok(catalog) => hash_catalog(&catalog),
            Err(e) => {
                log::warn!("plan committed but the target schema could not be read back: {e}");
                return Ok((plan.predicted_hash.clone().unwrap_or_default(), false));
            }
        };
        if let Some(predicted) = &plan.predicted_hash {
            if *predicted != resulting_hash {
                log::warn!(
                    "target schema {} differs from the predicted {} after commit",
                    resulting_hash,
                    predicted
                );
            }
        }
        Ok((resulting_hash, true))
    }
}

fn preparation_failed(error: DriverError) -> LockplaneError {
    LockplaneError::ShadowValidationFailed {
        step_index: None,
        description: None,
        steps_attempted: 0,
        error,
    }
}

/// Rebuilds `live` on an emptied shadow database and checks that the
/// result hashes like the target.
fn prepare_shadow(shadow: &dyn SchemaDriver, live: &Catalog, live_hash: &str) -> Result<()> {
    shadow.reset_schema().map_err(preparation_failed)?;
    let replay = plan::plan_with_options(&Catalog::empty(), live, &PlanOptions { allow_unsafe: true })?;
    for step in &replay.forward.steps {
        shadow.exec(&step.sql).map_err(preparation_failed)?;
    }
    let rebuilt = hash_catalog(&shadow.introspect().map_err(preparation_failed)?);
    if rebuilt != live_hash {
        return Err(preparation_failed(DriverError::Other(format!(
            "shadow schema {rebuilt} does not match target {live_hash} after rebuild"
        ))));
    }
    log::info!("shadow rebuilt from target schema ({} steps)", replay.forward.len());
    Ok(())
}

/// Applies `plan` to `target`, validating it on `shadow` first when given.
pub fn apply(
    plan: &Plan,
    target: &dyn SchemaDriver,
    shadow: Option<&dyn SchemaDriver>,
    options: ApplyOptions,
) -> Result<ApplyResult> {
    let mut applier = Applier::new(target).with_options(options);
    if let Some(shadow) = shadow {
        applier = applier.with_shadow(shadow);
    }
    applier.apply(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::catalog::{Column, SqlType, Table};
    use crate::driver::memory::MemoryDriver;
    use crate::error::ErrorKind;

    /// Target whose connection drops right after the commit.
    struct LostAfterCommit {
        inner: MemoryDriver,
        committed: Cell<bool>,
    }

    impl SchemaDriver for LostAfterCommit {
        fn name(&self) -> &'static str {
            "lost-after-commit"
        }

        fn introspect(&self) -> std::result::Result<Catalog, DriverError> {
            if self.committed.get() {
                return Err(DriverError::Other("connection reset".into()));
            }
            self.inner.introspect()
        }

        fn begin(&self) -> std::result::Result<(), DriverError> {
            self.inner.begin()
        }

        fn commit(&self) -> std::result::Result<(), DriverError> {
            self.inner.commit()?;
            self.committed.set(true);
            Ok(())
        }

        fn rollback(&self) -> std::result::Result<(), DriverError> {
            self.inner.rollback()
        }

        fn exec(&self, sql: &str) -> std::result::Result<(), DriverError> {
            self.inner.exec(sql)
        }

        fn try_advisory_lock(&self, key: i64) -> std::result::Result<bool, DriverError> {
            self.inner.try_advisory_lock(key)
        }

        fn advisory_unlock(&self, key: i64) -> std::result::Result<(), DriverError> {
            self.inner.advisory_unlock(key)
        }

        fn reset_schema(&self) -> std::result::Result<(), DriverError> {
            self.inner.reset_schema()
        }
    }

    fn users() -> Catalog {
        Catalog::new(vec![Table::new("users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text))])
        .unwrap()
    }

    fn with_name() -> Catalog {
        Catalog::new(vec![Table::new("users")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("email", SqlType::Text))
            .column(Column::new("name", SqlType::Text))])
        .unwrap()
    }

    #[test]
    fn applies_and_reports_receipts() {
        let target = MemoryDriver::with_catalog(users());
        let shadow = MemoryDriver::new();
        let pair = plan::plan(&users(), &with_name()).unwrap();

        let result = apply(&pair.forward, &target, Some(&shadow), ApplyOptions::default()).unwrap();
        assert!(result.success);
        assert_eq!(result.steps_applied, 1);
        assert_eq!(result.resulting_hash, hash_catalog(&with_name()));
        assert!(result.hash_verified);
        let phases: Vec<ApplyPhase> = result.receipts.iter().map(|r| r.phase).collect();
        assert_eq!(phases, [ApplyPhase::Shadow, ApplyPhase::Target]);
        assert!(result.receipts.iter().all(|r| r.apply_id == result.apply_id));

        assert_eq!(shadow.introspect().unwrap(), users());
        assert_eq!(target.lock_holder(ADVISORY_LOCK_KEY), None);
    }

    #[test]
    fn plans_without_source_hash_need_unchecked_mode() {
        let target = MemoryDriver::with_catalog(users());
        let mut forward = plan::plan(&users(), &with_name()).unwrap().forward;
        forward.source_hash = None;

        let err = apply(&forward, &target, None, ApplyOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingSourceHash);

        let options = ApplyOptions { unchecked: true, ..ApplyOptions::default() };
        apply(&forward, &target, None, options).unwrap();
        assert_eq!(target.introspect().unwrap(), with_name());
    }

    #[test]
    fn commit_stands_when_the_schema_cannot_be_read_back() {
        let target = LostAfterCommit {
            inner: MemoryDriver::with_catalog(users()),
            committed: Cell::new(false),
        };
        let pair = plan::plan(&users(), &with_name()).unwrap();

        let result = apply(&pair.forward, &target, None, ApplyOptions::default()).unwrap();
        assert!(result.success);
        assert!(!result.hash_verified);
        assert_eq!(result.steps_applied, 1);
        assert_eq!(Some(result.resulting_hash), pair.forward.predicted_hash);
        assert_eq!(target.inner.session().introspect().unwrap(), with_name());
        assert_eq!(target.inner.lock_holder(ADVISORY_LOCK_KEY), None);
    }

    #[test]
    fn cancellation_before_start() {
        let target = MemoryDriver::with_catalog(users());
        let options = ApplyOptions::default();
        options.cancellation.cancel();
        let pair = plan::plan(&users(), &with_name()).unwrap();
        let err = apply(&pair.forward, &target, None, options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(target.executed().is_empty());
    }
}
