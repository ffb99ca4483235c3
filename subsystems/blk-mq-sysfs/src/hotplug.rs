//! # CPU Hotplug Exclusion
//!
//! Software-context membership of each hardware queue is derived from the CPU
//! topology. Building or tearing down the export tree therefore runs inside a
//! section where the topology cannot change.
//!
//! The exclusion itself belongs to the hotplug machinery and is reached
//! through [`CpuHotplug`]. [`HotplugGuard`] holds the section for its
//! lifetime and leaves it on drop, on every exit path.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Topology-change exclusion provided by the hotplug machinery
pub trait CpuHotplug: Send + Sync {
    /// Enter the reconfiguration-exclusive section
    fn disable(&self);

    /// Leave the reconfiguration-exclusive section
    fn enable(&self);
}

/// Scoped hold on a [`CpuHotplug`] exclusive section
#[must_use = "the section ends when the guard is dropped"]
pub struct HotplugGuard<'a> {
    hotplug: &'a dyn CpuHotplug,
}

impl<'a> HotplugGuard<'a> {
    /// Enter the section
    pub fn acquire(hotplug: &'a dyn CpuHotplug) -> Self {
        hotplug.disable();
        Self { hotplug }
    }

    /// Whether this section was entered on `hotplug`
    pub fn holds(&self, hotplug: &dyn CpuHotplug) -> bool {
        core::ptr::eq(
            self.hotplug as *const _ as *const (),
            hotplug as *const _ as *const (),
        )
    }
}

impl Drop for HotplugGuard<'_> {
    fn drop(&mut self) {
        self.hotplug.enable();
    }
}

impl core::fmt::Debug for HotplugGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HotplugGuard").finish_non_exhaustive()
    }
}

/// Spinning hotplug exclusion
#[derive(Debug, Default)]
pub struct HotplugLock {
    held: AtomicBool,
    sections: AtomicU64,
}

impl HotplugLock {
    /// Create an unheld lock
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
            sections: AtomicU64::new(0),
        }
    }

    /// Whether a section is currently held
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Sections entered so far
    pub fn sections(&self) -> u64 {
        self.sections.load(Ordering::Relaxed)
    }
}

impl CpuHotplug for HotplugLock {
    fn disable(&self) {
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        self.sections.fetch_add(1, Ordering::Relaxed);
    }

    fn enable(&self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = HotplugLock::new();
        {
            let _guard = HotplugGuard::acquire(&lock);
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        assert_eq!(lock.sections(), 1);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn fails(lock: &HotplugLock) -> Result<(), ()> {
            let _guard = HotplugGuard::acquire(lock);
            Err(())
        }

        let lock = HotplugLock::new();
        assert!(fails(&lock).is_err());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_guard_holds_its_own_lock() {
        let lock = HotplugLock::new();
        let other = HotplugLock::new();
        let guard = HotplugGuard::acquire(&lock);
        assert!(guard.holds(&lock));
        assert!(!guard.holds(&other));
    }
}
