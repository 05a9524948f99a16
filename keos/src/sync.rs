//! Synchronization primitives.
//!
//! The real kernel implements its own ticket spinlock because it cannot rely
//! on an OS to park a blocked thread. The core described here specifies its
//! invariants in terms of "a mutex protects X" without prescribing the
//! implementation, so [`SpinLock`] is a thin wrapper over [`std::sync::Mutex`]
//! that keeps the teacher's naming and guard-based API.

use std::sync::{Mutex, MutexGuard, TryLockError};

/// A mutual-exclusion primitive protecting a `T`.
///
/// Named `SpinLock` for continuity with the teacher's lock-rank vocabulary
/// (`vnode_rename_mutex`, `mobj_lock`, `pframe` lock — see §5 of the
/// specification); the actual blocking strategy is irrelevant to the
/// invariants it protects.
pub struct SpinLock<T: ?Sized> {
    inner: Mutex<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        SpinLock {
            inner: Mutex::new(value),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the lock, blocking until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        }
    }
}

/// Locks `a` and `b` in an order determined by `key`, avoiding the classic
/// AB-BA deadlock when two callers lock the same pair in opposite orders.
///
/// Mirrors `vlock_in_order` (§5): the lock guarding the object with the
/// smaller key is always acquired first.
pub fn lock_in_order<'a, T>(
    a: &'a SpinLock<T>,
    a_key: u64,
    b: &'a SpinLock<T>,
    b_key: u64,
) -> (MutexGuard<'a, T>, MutexGuard<'a, T>) {
    if a_key <= b_key {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb)
    }
}
