use core::{alloc::Layout, ptr::NonNull};

use super::BlockAlloc;
use crate::{
    numeric::Alignable,
    raw::{self, RawBlock},
};

pub const HEADER_SIZE: usize = size_of::<StackHeader>();
const NONE: usize = usize::MAX;

/// Written right before every block so a pop can restore the cursor.
#[repr(C)]
struct StackHeader {
    prev_offset: usize,
    prev_top: usize,
}

/// Bump allocator whose blocks are released in reverse order.
#[derive(Debug)]
pub struct StackAlloc {
    block: RawBlock,
    offset: usize,
    /// data offset of the most recent live block.
    top: usize,
    peak: usize,
}

impl StackAlloc {
    pub fn new(size: usize, align: usize) -> Result<Self, raw::Error> {
        Ok(Self {
            block: RawBlock::new(size, align)?,
            offset: 0,
            top: NONE,
            peak: 0,
        })
    }
}

impl BlockAlloc for StackAlloc {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let start = self.block.start();
        let align = layout.align().max(align_of::<StackHeader>());
        let data = (start + self.offset + HEADER_SIZE).checked_align_up(align)? - start;
        let end = data.checked_add(layout.size())?;
        // Zero sized blocks still need an address inside the block.
        if end > self.block.size() || data >= self.block.size() {
            return None;
        }

        unsafe {
            let ptr = self.block.as_ptr().add(data);
            ptr.sub(HEADER_SIZE).cast::<StackHeader>().write(StackHeader {
                prev_offset: self.offset,
                prev_top: self.top,
            });
            self.offset = end;
            self.top = data;
            self.peak = self.peak.max(end);
            Some(ptr)
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool {
        let data = self.block.offset_of(ptr);
        if data != self.top {
            #[cfg(feature = "tracing")]
            tracing::warn!("[stack]: free out of order at offset {}", data);
            return false;
        }

        let header = unsafe { ptr.sub(HEADER_SIZE).cast::<StackHeader>().read() };
        self.offset = header.prev_offset;
        self.top = header.prev_top;
        true
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.top = NONE;
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
