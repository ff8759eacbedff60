use core::{alloc::Layout, ptr::NonNull};

use crate::raw::{self, RawBlock};

mod free_list;
mod linear;
mod slab;
mod stack;

pub use free_list::{FreeListAlloc, Placement};
pub use linear::LinearAlloc;
pub use slab::SlabAlloc;
pub use stack::StackAlloc;

/// Alignment of every backing block.
pub const BLOCK_ALIGN: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeInfo {
    pub max_size: usize,
    pub used_size: usize,
    pub available_size: usize,
    pub peak_size: usize,
}

impl core::ops::AddAssign for SizeInfo {
    fn add_assign(&mut self, rhs: Self) {
        self.max_size += rhs.max_size;
        self.used_size += rhs.used_size;
        self.available_size += rhs.available_size;
        self.peak_size += rhs.peak_size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorType {
    /// Bump pointer, no individual free.
    Linear,
    /// Bump pointer with LIFO free.
    Stack,
    /// Fixed size slots.
    Pool,
    /// General purpose, address ordered free list.
    FreeList,
}

impl AllocatorType {
    /// Capacity a fresh allocator of this kind needs to serve `layout`.
    ///
    /// The slot size of `conf` only matters to pool allocators.
    pub fn capacity_for(self, layout: Layout, conf: &BlockConfig) -> Option<usize> {
        let align = layout.align().max(BLOCK_ALIGN);
        match self {
            Self::Linear => layout.size().checked_add(align),
            Self::Stack => layout.size().checked_add(align + stack::HEADER_SIZE),
            Self::Pool => Some(slab::chunk_size(conf.slot, conf.align.max(BLOCK_ALIGN))),
            Self::FreeList => layout
                .size()
                .checked_add(align + free_list::HEADER_SIZE + free_list::NODE_SIZE),
        }
    }
}

/// A single backing block carved up by one strategy.
pub trait BlockAlloc {
    /// Carves `layout` out of the block, or `None` if it does not fit.
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns `ptr` to the block. `false` means the free was refused.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`BlockAlloc::allocate`] on this allocator
    /// and must not have been freed since.
    unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool;

    /// Discards every allocation at once.
    fn reset(&mut self);

    fn block(&self) -> &RawBlock;

    fn used(&self) -> usize;

    fn peak(&self) -> usize;

    #[inline]
    fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block().contains(ptr)
    }

    fn info(&self) -> SizeInfo {
        let max_size = self.block().size();
        let used_size = self.used();
        SizeInfo {
            max_size,
            used_size,
            available_size: max_size - used_size,
            peak_size: self.peak(),
        }
    }
}

/// Options that shape a fresh allocator.
#[derive(Debug, Clone, Copy)]
pub struct BlockConfig {
    pub slot: usize,
    pub align: usize,
    pub placement: Placement,
}

#[derive(Debug)]
pub enum Allocator {
    Linear(LinearAlloc),
    Stack(StackAlloc),
    Pool(SlabAlloc),
    FreeList(FreeListAlloc),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            Allocator::Linear($a) => $body,
            Allocator::Stack($a) => $body,
            Allocator::Pool($a) => $body,
            Allocator::FreeList($a) => $body,
        }
    };
}

impl Allocator {
    pub fn new(kind: AllocatorType, size: usize, conf: BlockConfig) -> Result<Self, raw::Error> {
        let align = conf.align.max(BLOCK_ALIGN);
        let alloc = match kind {
            AllocatorType::Linear => Self::Linear(LinearAlloc::new(size, align)?),
            AllocatorType::Stack => Self::Stack(StackAlloc::new(size, align)?),
            AllocatorType::Pool => Self::Pool(SlabAlloc::new(size, conf.slot, align)?),
            AllocatorType::FreeList => {
                Self::FreeList(FreeListAlloc::new(size, align, conf.placement)?)
            }
        };
        #[cfg(feature = "tracing")]
        tracing::debug!("[block]: new {:?} allocator of {} bytes", kind, size);
        Ok(alloc)
    }

    pub const fn kind(&self) -> AllocatorType {
        match self {
            Self::Linear(_) => AllocatorType::Linear,
            Self::Stack(_) => AllocatorType::Stack,
            Self::Pool(_) => AllocatorType::Pool,
            Self::FreeList(_) => AllocatorType::FreeList,
        }
    }
}

impl BlockAlloc for Allocator {
    #[inline]
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        dispatch!(self, a => a.allocate(layout))
    }

    #[inline]
    unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool {
        dispatch!(self, a => unsafe { a.free(ptr) })
    }

    fn reset(&mut self) {
        dispatch!(self, a => a.reset())
    }

    #[inline]
    fn block(&self) -> &RawBlock {
        dispatch!(self, a => a.block())
    }

    #[inline]
    fn used(&self) -> usize {
        dispatch!(self, a => a.used())
    }

    #[inline]
    fn peak(&self) -> usize {
        dispatch!(self, a => a.peak())
    }
}
