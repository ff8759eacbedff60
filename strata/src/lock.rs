use core::cell::Cell;

use lock_api::{GuardNoSend, RawMutex};

pub type SpinMutex = spin::Mutex<()>;

#[cfg(feature = "std")]
pub type StdMutex = parking_lot::RawMutex;

/// A raw lock that guards a pool.
///
/// `THREAD_SAFE` reflects whether a pool built on the lock may be shared
/// between threads.
pub trait PoolLock: RawMutex {
    const THREAD_SAFE: bool;
}

/// A lock that never blocks, for pools owned by a single thread.
///
/// The inner cell makes the lock `!Sync`, so a pool built on it cannot be
/// shared across threads. A nested acquisition is a bug and panics.
pub struct NoLock(Cell<bool>);

unsafe impl RawMutex for NoLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = NoLock(Cell::new(false));

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        assert!(!self.0.replace(true), "[lock]: re-entrant access on a local pool");
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.0.replace(true)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.0.set(false);
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.0.get()
    }
}

impl PoolLock for NoLock {
    const THREAD_SAFE: bool = false;
}

impl PoolLock for SpinMutex {
    const THREAD_SAFE: bool = true;
}

#[cfg(feature = "std")]
impl PoolLock for StdMutex {
    const THREAD_SAFE: bool = true;
}
