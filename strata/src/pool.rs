use alloc::vec::Vec;
use core::{
    alloc::Layout,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;
use lock_api::Mutex;

use crate::{
    block::{Allocator, AllocatorType, BLOCK_ALIGN, BlockAlloc, BlockConfig, Placement, SizeInfo},
    lock::{NoLock, PoolLock},
    raw,
    tracer::MemoryTracer,
};

pub const DEFAULT_INITIAL_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrowPolicy {
    NoGrow,
    /// New allocators match the initial size, or the request if larger.
    #[default]
    UseInitialSize,
    UseRequestedSize,
    UseDoubledRequestedSize,
}

impl GrowPolicy {
    /// Size of the allocator appended for a request needing `required` bytes.
    pub const fn next_size(self, initial: usize, required: usize) -> Option<usize> {
        match self {
            Self::NoGrow => None,
            Self::UseInitialSize => Some(if initial > required { initial } else { required }),
            Self::UseRequestedSize => Some(required),
            Self::UseDoubledRequestedSize => required.checked_mul(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Raw(raw::Error),
    Exhausted {
        /// The requested size
        requested: usize,
        policy: GrowPolicy,
    },
    Oversized {
        requested: usize,
        /// The slot size of the pool
        limit: usize,
    },
    UnknownPointer,
    Refused,
    TooManyChunks,
}

impl From<raw::Error> for Error {
    fn from(e: raw::Error) -> Self {
        Self::Raw(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Raw(e) => write!(f, "Raw allocation failed: {}", e),
            Self::Exhausted { requested, policy } => write!(
                f,
                "Pool exhausted: requested size is {}, grow policy is {:?}",
                requested, policy
            ),
            Self::Oversized { requested, limit } => write!(
                f,
                "Allocation failed: requested size is {}, but slots hold {}",
                requested, limit
            ),
            Self::UnknownPointer => write!(f, "Pointer is not live in this pool"),
            Self::Refused => write!(f, "Free refused by the owning allocator"),
            Self::TooManyChunks => write!(f, "Bucket reached its chunk limit"),
        }
    }
}

impl core::error::Error for Error {}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub kind: AllocatorType,
    pub grow: GrowPolicy,
    pub initial_size: usize,
    /// Slot size of a [`AllocatorType::Pool`] pool.
    pub user_data: usize,
    pub align: usize,
    pub placement: Placement,
    /// Drop one idle allocator after this many frees.
    pub reclaim_after: Option<u32>,
    pub track: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(AllocatorType::FreeList)
    }
}

impl PoolConfig {
    pub const fn new(kind: AllocatorType) -> Self {
        Self {
            kind,
            grow: GrowPolicy::UseInitialSize,
            initial_size: DEFAULT_INITIAL_SIZE,
            user_data: 0,
            align: BLOCK_ALIGN,
            placement: Placement::FirstFit,
            reclaim_after: None,
            track: false,
        }
    }

    pub const fn with_grow(mut self, grow: GrowPolicy) -> Self {
        self.grow = grow;
        self
    }

    pub const fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    pub const fn with_user_data(mut self, user_data: usize) -> Self {
        self.user_data = user_data;
        self
    }

    pub const fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub const fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub const fn with_reclaim_after(mut self, frees: u32) -> Self {
        self.reclaim_after = Some(frees);
        self
    }

    pub const fn with_tracking(mut self, track: bool) -> Self {
        self.track = track;
        self
    }

    const fn block(&self) -> BlockConfig {
        BlockConfig {
            slot: self.user_data,
            align: self.align,
            placement: self.placement,
        }
    }
}

#[derive(Debug)]
struct PoolCore {
    allocators: Vec<Allocator>,
    frees: u32,
    tracer: Option<MemoryTracer>,
}

impl PoolCore {
    fn info(&self) -> SizeInfo {
        let mut info = SizeInfo::default();
        for a in self.allocators.iter() {
            info += a.info();
        }
        info
    }
}

/// A growable set of same-kind allocators behind a lock of type `L`.
///
/// Requests are served by the first allocator with room, in insertion order.
/// When none has room a new allocator is appended, sized by the
/// [`GrowPolicy`]. Allocators only ever leave the pool once idle, and only
/// when [`PoolConfig::reclaim_after`] is set.
pub struct AllocatorPool<L: PoolLock = NoLock> {
    core: Mutex<L, PoolCore>,
    conf: PoolConfig,
    grows: CachePadded<AtomicUsize>,
    allocations: CachePadded<AtomicUsize>,
}

impl<L: PoolLock> core::fmt::Debug for AllocatorPool<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllocatorPool")
            .field("conf", &self.conf)
            .field("thread_safe", &L::THREAD_SAFE)
            .field("grows", &self.grow_count())
            .field("allocations", &self.allocation_count())
            .finish()
    }
}

impl<L: PoolLock> AllocatorPool<L> {
    /// Creates the pool with its first allocator already in place.
    pub fn new(conf: PoolConfig) -> Result<Self, Error> {
        if !conf.align.is_power_of_two() {
            return Err(raw::Error::InvalidAlignment { align: conf.align }.into());
        }
        let first = Allocator::new(conf.kind, conf.initial_size, conf.block())?;
        let mut allocators = Vec::with_capacity(4);
        allocators.push(first);

        Ok(Self {
            core: Mutex::new(PoolCore {
                allocators,
                frees: 0,
                tracer: conf.track.then(MemoryTracer::new),
            }),
            conf,
            grows: CachePadded::new(AtomicUsize::new(0)),
            allocations: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    pub const fn config(&self) -> &PoolConfig {
        &self.conf
    }

    #[inline]
    pub const fn thread_safe(&self) -> bool {
        L::THREAD_SAFE
    }

    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
        let mut core = self.core.lock();
        let core = &mut *core;
        let found = core.allocators.iter_mut().find_map(|a| a.allocate(layout));
        let ptr = match found {
            Some(ptr) => ptr,
            None => self.grow(core, layout)?,
        };
        if let Some(tracer) = core.tracer.as_mut() {
            tracer.record(ptr, layout.size());
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(ptr)
    }

    /// Allocates `size` bytes at word alignment.
    pub fn allocate_bytes(&self, size: usize) -> Result<NonNull<u8>, Error> {
        let layout = Layout::from_size_align(size, align_of::<usize>())
            .map_err(|_| raw::Error::OutofBounds { requested: size })?;
        self.allocate(layout)
    }

    fn grow(&self, core: &mut PoolCore, layout: Layout) -> Result<NonNull<u8>, Error> {
        let conf = self.conf.block();
        let kind = self.conf.kind;
        let exhausted = Error::Exhausted {
            requested: layout.size(),
            policy: self.conf.grow,
        };

        let required = kind.capacity_for(layout, &conf).ok_or(exhausted)?;
        if kind == AllocatorType::Pool
            && (layout.size() > required || layout.align() > conf.align.max(BLOCK_ALIGN))
        {
            return Err(Error::Oversized {
                requested: layout.size(),
                limit: required,
            });
        }
        let size = self
            .conf
            .grow
            .next_size(self.conf.initial_size, required)
            .ok_or(exhausted)?;

        let mut alloc = Allocator::new(kind, size, conf)?;
        let ptr = alloc.allocate(layout).ok_or(exhausted)?;
        core.allocators.push(alloc);
        self.grows.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "[pool]: grew to {} allocators, new one holds {} bytes",
            core.allocators.len(),
            size
        );
        Ok(ptr)
    }

    /// Returns `ptr` to the allocator whose range contains it.
    ///
    /// With tracking on, a pointer that is not live is rejected before any
    /// allocator sees it.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`AllocatorPool::allocate`] on this pool and, when
    /// tracking is off, must not have been freed already.
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), Error> {
        let mut core = self.core.lock();
        let core = &mut *core;

        if let Some(tracer) = core.tracer.as_ref()
            && !tracer.is_live(ptr)
        {
            #[cfg(feature = "tracing")]
            tracing::warn!("[pool]: free of a pointer that is not live: {:p}", ptr);
            return Err(Error::UnknownPointer);
        }

        let Some(alloc) = core.allocators.iter_mut().find(|a| a.contains(ptr)) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("[pool]: free of a foreign pointer: {:p}", ptr);
            return Err(Error::UnknownPointer);
        };
        if !unsafe { alloc.free(ptr) } {
            #[cfg(feature = "tracing")]
            tracing::warn!("[pool]: {:?} allocator refused to free {:p}", alloc.kind(), ptr);
            return Err(Error::Refused);
        }

        if let Some(tracer) = core.tracer.as_mut() {
            tracer.forget(ptr);
        }
        self.reclaim(core);
        Ok(())
    }

    fn reclaim(&self, core: &mut PoolCore) {
        let Some(limit) = self.conf.reclaim_after else {
            return;
        };
        core.frees += 1;
        if core.frees < limit {
            return;
        }
        core.frees = 0;

        if let Some(idx) = core.allocators.iter().skip(1).position(|a| a.used() == 0) {
            let _idle = core.allocators.remove(idx + 1);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "[pool]: reclaimed idle allocator of {} bytes",
                _idle.block().size()
            );
        }
    }

    /// Discards every allocation in every allocator.
    ///
    /// # Safety
    ///
    /// No pointer handed out by this pool may be used afterwards.
    pub unsafe fn reset(&self) {
        let mut core = self.core.lock();
        for a in core.allocators.iter_mut() {
            a.reset();
        }
        if let Some(tracer) = core.tracer.as_mut() {
            *tracer = MemoryTracer::new();
        }
    }

    /// Totals across all owned allocators.
    pub fn size_info(&self) -> SizeInfo {
        self.core.lock().info()
    }

    pub fn allocator_infos(&self) -> Vec<SizeInfo> {
        self.core.lock().allocators.iter().map(|a| a.info()).collect()
    }

    pub fn allocator_count(&self) -> usize {
        self.core.lock().allocators.len()
    }

    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.core.lock().allocators.iter().any(|a| a.contains(ptr))
    }

    /// Live `(address, size)` pairs. Empty unless tracking is on.
    pub fn leaks(&self) -> Vec<(usize, usize)> {
        self.core
            .lock()
            .tracer
            .as_ref()
            .map(|t| t.leaks())
            .unwrap_or_default()
    }

    #[inline]
    pub fn grow_count(&self) -> usize {
        self.grows.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl<L: PoolLock> Drop for AllocatorPool<L> {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        let info = core.info();
        if info.used_size > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "[pool]: dropped with {} bytes still in use",
                info.used_size
            );
            if let Some(tracer) = core.tracer.as_ref() {
                tracer.report();
            }
        }
    }
}

unsafe impl<L: PoolLock> allocator_api2::alloc::Allocator for AllocatorPool<L> {
    fn allocate(
        &self,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, allocator_api2::alloc::AllocError> {
        if layout.size() == 0 {
            // Aligned, non-null and never dereferenced.
            let dangling = unsafe {
                NonNull::new_unchecked(core::ptr::without_provenance_mut::<u8>(layout.align()))
            };
            return Ok(NonNull::slice_from_raw_parts(dangling, 0));
        }
        let ptr = AllocatorPool::allocate(self, layout)
            .map_err(|_| allocator_api2::alloc::AllocError)?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // A refusal leaves the block in place until the next reset.
        let res = unsafe { AllocatorPool::free(self, ptr) };
        debug_assert!(
            !matches!(res, Err(Error::UnknownPointer)),
            "deallocate of a pointer this pool does not own"
        );
    }
}
