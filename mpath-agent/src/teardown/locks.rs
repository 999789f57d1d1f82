//! Process-wide locks guarding device teardown.
//!
//! Hierarchy, outermost first:
//!
//! 1. unmount execution: serializes every unmount/kill/retry sequence
//! 2. stale-device removal: holder killing and map flush/force-remove
//!
//! Mount discovery is a leaf lock; nothing else is acquired while it is held.
//! None of the locks are re-entrant. The stale-removal lock can only be taken
//! on its own or through an [`UnmountGuard`], which keeps the order fixed.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

#[derive(Default)]
pub struct TeardownLocks {
    mount_discovery: Mutex<()>,
    unmount_exec: Mutex<()>,
    stale_removal: Mutex<()>,
}

/// Held unmount-execution lock.
pub struct UnmountGuard<'a> {
    locks: &'a TeardownLocks,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> UnmountGuard<'a> {
    /// Take the stale-removal lock while holding the unmount lock.
    pub fn stale_removal(&self) -> MutexGuard<'a, ()> {
        lock(&self.locks.stale_removal)
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TeardownLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_discovery(&self) -> MutexGuard<'_, ()> {
        lock(&self.mount_discovery)
    }

    pub fn unmount_exec(&self) -> UnmountGuard<'_> {
        UnmountGuard {
            locks: self,
            _guard: lock(&self.unmount_exec),
        }
    }

    pub fn stale_removal(&self) -> MutexGuard<'_, ()> {
        lock(&self.stale_removal)
    }
}

/// Locks shared by every teardown in the process.
pub fn global() -> &'static TeardownLocks {
    static LOCKS: OnceLock<TeardownLocks> = OnceLock::new();
    LOCKS.get_or_init(TeardownLocks::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_nested_acquisition_in_hierarchy_order() {
        let locks = TeardownLocks::new();
        let unmount = locks.unmount_exec();
        {
            let _stale = unmount.stale_removal();
        }
        // discovery is independent of the other two
        let _discovery = locks.mount_discovery();
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let locks = Arc::new(TeardownLocks::new());
        let poisoner = Arc::clone(&locks);
        let _ = thread::spawn(move || {
            let _guard = poisoner.stale_removal();
            panic!("poison");
        })
        .join();
        let _guard = locks.stale_removal();
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(global(), global()));
    }
}
