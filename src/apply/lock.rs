//! Advisory-lock based mutual exclusion between applies.

use std::time::{Duration, Instant};

use crate::driver::SchemaDriver;
use crate::error::{LockplaneError, Result};

/// Advisory lock key shared by every lockplane process: the ASCII bytes of
/// "Lockplan" read as a big-endian `i64`.
pub const ADVISORY_LOCK_KEY: i64 = 0x4C6F_636B_706C_616E;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock guard that automatically releases the advisory lock when dropped.
pub struct AdvisoryLockGuard<'a> {
    driver: &'a dyn SchemaDriver,
    key: i64,
    waited: Duration,
}

impl<'a> AdvisoryLockGuard<'a> {
    /// Acquires advisory lock `key`, polling until `timeout` runs out.
    ///
    /// # Errors
    ///
    /// Returns `LockUnavailable` when another session still holds the lock
    /// after `timeout`, and `DriverError` when the lock query itself fails.
    pub fn acquire(driver: &'a dyn SchemaDriver, key: i64, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        loop {
            if driver.try_advisory_lock(key)? {
                let waited = start.elapsed();
                log::info!("acquired advisory lock {key} after {:?}", waited);
                return Ok(Self { driver, key, waited });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockplaneError::LockUnavailable { key, waited });
            }
            log::debug!("advisory lock {key} is held by another session; retrying");
            std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Time spent waiting for the lock.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for AdvisoryLockGuard<'_> {
    fn drop(&mut self) {
        match self.driver.advisory_unlock(self.key) {
            Ok(()) => log::info!("released advisory lock {}", self.key),
            Err(e) => log::warn!("failed to release advisory lock {}: {e}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use crate::error::ErrorKind;

    #[test]
    fn key_spells_lockplan() {
        assert_eq!(&ADVISORY_LOCK_KEY.to_be_bytes(), b"Lockplan");
    }

    #[test]
    fn guard_releases_on_drop() {
        let db = MemoryDriver::new();
        {
            let _guard = AdvisoryLockGuard::acquire(&db, 1, Duration::ZERO).unwrap();
            assert_eq!(db.lock_holder(1), Some(db.session_id()));
        }
        assert_eq!(db.lock_holder(1), None);
    }

    #[test]
    fn contended_lock_times_out() {
        let db = MemoryDriver::new();
        let other = db.session();
        let _held = AdvisoryLockGuard::acquire(&other, 1, Duration::ZERO).unwrap();

        let err = AdvisoryLockGuard::acquire(&db, 1, Duration::from_millis(150))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::LockUnavailable);
    }

    #[test]
    fn waits_for_the_holder_to_release() {
        let db = MemoryDriver::new();
        let other = db.session();
        assert!(other.try_advisory_lock(1).unwrap());

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            other.advisory_unlock(1).unwrap();
        });
        let guard = AdvisoryLockGuard::acquire(&db, 1, Duration::from_secs(5)).unwrap();
        assert!(guard.waited() >= Duration::from_millis(100));
        releaser.join().unwrap();
    }
}
