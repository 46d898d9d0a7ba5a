use serde::{Deserialize, Serialize};

use crate::clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Unlocked,
    Locking,
    Locked,
    Waiting,
}

/// Shared state of one distributed mutex.
///
/// This is a passive holder: any status may follow any other. The lock
/// protocol driving it decides which transitions are legal.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    name: String,
    status: LockStatus,
    last_transition: u64,
}

impl DistributedLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: LockStatus::Unlocked,
            last_transition: clock::stamp(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    /// Sets the status and stamps the transition time.
    pub fn set_status(&mut self, status: LockStatus) {
        self.status = status;
        self.last_transition = clock::stamp();
    }

    /// Stamp of the last `set_status` (or of construction).
    pub fn last_transition(&self) -> u64 {
        self.last_transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_unlocked() {
        let lock = DistributedLock::new("jobs");
        assert_eq!(lock.status(), LockStatus::Unlocked);
        assert_eq!(lock.name(), "jobs");
    }

    #[test]
    fn test_timestamp_strictly_increases() {
        let mut lock = DistributedLock::new("jobs");
        let created = lock.last_transition();

        lock.set_status(LockStatus::Locked);
        let locked = lock.last_transition();
        assert!(locked > created);

        lock.set_status(LockStatus::Unlocked);
        assert!(lock.last_transition() > locked);
    }

    #[test]
    fn test_any_transition_is_accepted() {
        let mut lock = DistributedLock::new("free-form");
        for status in [
            LockStatus::Waiting,
            LockStatus::Unlocked,
            LockStatus::Locked,
            LockStatus::Locking,
            LockStatus::Locked,
        ] {
            lock.set_status(status);
            assert_eq!(lock.status(), status);
        }
    }
}
