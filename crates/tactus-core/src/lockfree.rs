//! Lock-free cells shared between the control side and the tic.

use arc_swap::ArcSwap;
use atomic_float::AtomicF64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Cache-line aligned atomic bool.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    /// Set the flag, returning `false` if it was already set.
    #[inline]
    pub fn try_raise(&self) -> bool {
        self.value
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Cache-line aligned atomic f64.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDouble {
    value: AtomicF64,
}

impl AtomicDouble {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }

    /// Store `value` if it exceeds the current one.
    #[inline]
    pub fn fetch_max(&self, value: f64) -> f64 {
        let mut current = self.value.load(Ordering::Acquire);
        while value > current {
            match self.value.compare_exchange_weak(
                current,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return previous,
                Err(actual) => current = actual,
            }
        }
        current
    }
}

impl Default for AtomicDouble {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Versioned copy-on-write cell.
///
/// Writers publish a whole new value; readers load a consistent snapshot
/// without blocking and can compare versions to detect changes.
pub struct Versioned<T> {
    value: ArcSwap<T>,
    version: AtomicU64,
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: ArcSwap::from_pointee(value),
            version: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn load(&self) -> Arc<T> {
        self.value.load_full()
    }

    pub fn store(&self, value: T) -> u64 {
        self.value.store(Arc::new(value));
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Read-copy-update; `f` may run more than once under contention.
    pub fn update<F>(&self, mut f: F) -> u64
    where
        T: Clone,
        F: FnMut(&mut T),
    {
        self.value.rcu(|current| {
            let mut next = T::clone(current);
            f(&mut next);
            next
        });
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Versioned<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Versioned")
            .field("value", &self.value.load())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_flag_try_raise() {
        let flag = AtomicFlag::new(false);
        assert!(flag.try_raise());
        assert!(!flag.try_raise());
        flag.set(false);
        assert!(!flag.get());
    }

    #[test]
    fn test_atomic_double_fetch_max() {
        let value = AtomicDouble::new(0.25);
        value.fetch_max(0.5);
        value.fetch_max(0.1);
        assert_eq!(value.get(), 0.5);
    }

    #[test]
    fn test_versioned_update() {
        let cell = Versioned::new(vec![1.0, 2.0]);
        let before = cell.load();
        assert_eq!(cell.update(|v| v.push(3.0)), 1);
        assert_eq!(before.len(), 2);
        assert_eq!(cell.load().len(), 3);
        assert_eq!(cell.version(), 1);
    }
}
