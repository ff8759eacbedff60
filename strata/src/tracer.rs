use alloc::{collections::BTreeMap, vec::Vec};
use core::ptr::NonNull;

/// Records the size of every live pointer handed out by a pool.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    live: BTreeMap<usize, usize>,
}

impl MemoryTracer {
    pub const fn new() -> Self {
        Self {
            live: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, ptr: NonNull<u8>, size: usize) {
        self.live.insert(ptr.as_ptr().addr(), size);
    }

    /// Returns the recorded size, or `None` if `ptr` is not live.
    pub fn forget(&mut self, ptr: NonNull<u8>) -> Option<usize> {
        self.live.remove(&ptr.as_ptr().addr())
    }

    #[inline]
    pub fn is_live(&self, ptr: NonNull<u8>) -> bool {
        self.live.contains_key(&ptr.as_ptr().addr())
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.live.len()
    }

    pub fn total(&self) -> usize {
        self.live.values().sum()
    }

    /// Live `(address, size)` pairs in address order.
    pub fn leaks(&self) -> Vec<(usize, usize)> {
        self.live.iter().map(|(&addr, &size)| (addr, size)).collect()
    }

    pub fn report(&self) {
        #[cfg(feature = "tracing")]
        for (addr, size) in self.live.iter() {
            tracing::warn!("[tracer]: leaked {} bytes at {:#x}", size, addr);
        }
    }
}
