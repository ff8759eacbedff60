use core::{alloc::Layout, ptr::NonNull};

use super::BlockAlloc;
use crate::raw::{self, RawBlock};

/// Size of a single slot holding `slot` bytes at `align`.
#[inline]
pub const fn chunk_size(slot: usize, align: usize) -> usize {
    let min = size_of::<FreeChunk>();
    let slot = if slot > min { slot } else { min };
    (slot + align - 1) & !(align - 1)
}

struct FreeChunk {
    next: Option<NonNull<FreeChunk>>,
}

/// Fixed size slot allocator with an intrusive free list.
#[derive(Debug)]
pub struct SlabAlloc {
    block: RawBlock,
    chunk: usize,
    align: usize,
    free_head: Option<NonNull<FreeChunk>>,
    used: usize,
    peak: usize,
}

unsafe impl Send for SlabAlloc {}

impl SlabAlloc {
    /// Holds at least one slot, even when `size` is smaller than a slot.
    pub fn new(size: usize, slot: usize, align: usize) -> Result<Self, raw::Error> {
        let chunk = chunk_size(slot, align);
        let count = (size / chunk).max(1);
        let total = count
            .checked_mul(chunk)
            .ok_or(raw::Error::OutofBounds { requested: size })?;

        let mut this = Self {
            block: RawBlock::new(total, align)?,
            chunk,
            align,
            free_head: None,
            used: 0,
            peak: 0,
        };
        this.reset();
        Ok(this)
    }

    #[inline]
    pub const fn chunk(&self) -> usize {
        self.chunk
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.block.size() / self.chunk
    }
}

impl BlockAlloc for SlabAlloc {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() > self.chunk || layout.align() > self.align {
            return None;
        }
        let head = self.free_head?;
        self.free_head = unsafe { head.read().next };
        self.used += self.chunk;
        self.peak = self.peak.max(self.used);
        Some(head.cast())
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool {
        // Slots need not be a power of two wide.
        let offset = self.block.offset_of(ptr);
        if offset >= self.block.size() || offset % self.chunk != 0 {
            return false;
        }
        let node = ptr.cast::<FreeChunk>();
        unsafe { node.write(FreeChunk { next: self.free_head }) };
        self.free_head = Some(node);
        self.used -= self.chunk;
        true
    }

    fn reset(&mut self) {
        // Link slots in address order, so the first allocation is the lowest.
        let base = self.block.as_ptr();
        let mut next = None;
        for i in (0..self.count()).rev() {
            let node = unsafe { base.add(i * self.chunk).cast::<FreeChunk>() };
            unsafe { node.write(FreeChunk { next }) };
            next = Some(node);
        }
        self.free_head = next;
        self.used = 0;
    }

    #[inline]
    fn block(&self) -> &RawBlock {
        &self.block
    }

    #[inline]
    fn used(&self) -> usize {
        self.used
    }

    #[inline]
    fn peak(&self) -> usize {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_reuse() {
        let mut a = SlabAlloc::new(4 * 32, 20, 16).unwrap();
        assert_eq!(a.chunk(), 32);
        assert_eq!(a.count(), 4);

        let layout = Layout::from_size_align(20, 4).unwrap();
        let slots: Vec<_> = (0..4).map(|_| a.allocate(layout).unwrap()).collect();
        assert!(a.allocate(layout).is_none());
        assert_eq!(a.info().available_size, 0);

        unsafe { assert!(a.free(slots[2])) };
        assert_eq!(a.allocate(layout), Some(slots[2]));
    }

    #[test]
    fn rejects_oversized() {
        let mut a = SlabAlloc::new(64, 16, 16).unwrap();
        assert!(a.allocate(Layout::from_size_align(17, 1).unwrap()).is_none());
        assert!(a.allocate(Layout::from_size_align(8, 32).unwrap()).is_none());
    }

    #[test]
    fn odd_width_slots() {
        let mut a = SlabAlloc::new(192, 48, 16).unwrap();
        assert_eq!(a.chunk(), 48);
        assert_eq!(a.count(), 4);

        let layout = Layout::from_size_align(48, 16).unwrap();
        let slots: Vec<_> = (0..4).map(|_| a.allocate(layout).unwrap()).collect();
        for (i, &slot) in slots.iter().enumerate() {
            assert_eq!(a.block().offset_of(slot), i * 48);
        }
        for &slot in slots.iter() {
            unsafe { assert!(a.free(slot)) };
        }
        assert_eq!(a.used(), 0);

        let inside = unsafe { slots[1].add(16) };
        unsafe { assert!(!a.free(inside)) };
    }

    #[test]
    fn keeps_one_slot() {
        let a = SlabAlloc::new(1, 100, 16).unwrap();
        assert_eq!(a.count(), 1);
        assert_eq!(a.block().size(), 112);
    }
}
