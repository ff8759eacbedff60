use core::{alloc::Layout, ptr::NonNull};

use super::BlockAlloc;
use crate::{
    numeric::Alignable,
    raw::{self, RawBlock},
};

/// Bump allocator. Individual frees only count down the live blocks; the
/// cursor rewinds once nothing is live or on [`BlockAlloc::reset`].
#[derive(Debug)]
pub struct LinearAlloc {
    block: RawBlock,
    offset: usize,
    live: usize,
    peak: usize,
}

impl LinearAlloc {
    pub fn new(size: usize, align: usize) -> Result<Self, raw::Error> {
        Ok(Self {
            block: RawBlock::new(size, align)?,
            offset: 0,
            live: 0,
            peak: 0,
        })
    }
}

impl BlockAlloc for LinearAlloc {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let start = self.block.start();
        let data = (start + self.offset).checked_align_up(layout.align())? - start;
        let end = data.checked_add(layout.size())?;
        // Zero sized blocks still need an address inside the block.
        if end > self.block.size() || data >= self.block.size() {
            return None;
        }

        self.offset = end;
        self.live += 1;
        self.peak = self.peak.max(end);
        Some(unsafe { self.block.as_ptr().add(data) })
    }

    unsafe fn free(&mut self, _ptr: NonNull<u8>) -> bool {
        self.live = self.live.saturating_sub(1);
        if self.live == 0 {
            self.offset = 0;
        }
        true
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.live = 0;
    }

    #[inline]
    fn block(&self) -> &RawBlock {
        &self.block
    }

    #[inline]
    fn used(&self) -> usize {
        self.offset
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
    fn bump_and_rewind() {
        let mut a = LinearAlloc::new(64, 16).unwrap();
        let x = a.allocate(Layout::from_size_align(10, 1).unwrap()).unwrap();
        let y = a.allocate(Layout::from_size_align(8, 8).unwrap()).unwrap();
        assert_eq!(a.block().offset_of(x), 0);
        assert_eq!(a.block().offset_of(y), 16);
        assert_eq!(a.used(), 24);
        assert!(a.allocate(Layout::from_size_align(64, 1).unwrap()).is_none());

        unsafe {
            assert!(a.free(x));
            assert_eq!(a.used(), 24);
            assert!(a.free(y));
        }
        assert_eq!(a.used(), 0);
        assert_eq!(a.peak(), 24);
    }

    #[test]
    fn zero_size_at_end() {
        let mut a = LinearAlloc::new(16, 16).unwrap();
        let x = a.allocate(Layout::from_size_align(16, 1).unwrap()).unwrap();
        assert!(a.allocate(Layout::from_size_align(0, 1).unwrap()).is_none());

        let mut b = LinearAlloc::new(32, 16).unwrap();
        let z = b.allocate(Layout::from_size_align(0, 1).unwrap()).unwrap();
        assert!(b.block().contains(z));
        unsafe { assert!(a.free(x)) };
        assert_eq!(a.used(), 0);
    }
}
