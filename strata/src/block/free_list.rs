//! General purpose allocator over an address ordered free list.
//!
//! Free ranges carry a [`FreeNode`] in their first bytes. An allocated range
//! carries a [`BlockHeader`] right before the returned pointer, recording the
//! range size and how far the header sits from the range start:
//!
//! ```text
//! range start         header       ptr
//! |---- pad ----------|-- size, pad --|-- data --|-- slack --|
//! ```
//!
//! Frees are inserted back in address order and merged with adjacent free
//! neighbours, so the list never holds two touching ranges.

use core::{alloc::Layout, ptr::NonNull};

use super::BlockAlloc;
use crate::{
    numeric::Alignable,
    raw::{self, RawBlock},
};

pub const NODE_SIZE: usize = size_of::<FreeNode>();
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
const UNIT: usize = align_of::<FreeNode>();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Placement {
    /// Take the first range large enough.
    #[default]
    FirstFit,
    /// Take the range leaving the least slack.
    BestFit,
}

#[repr(C)]
struct FreeNode {
    size: usize,
    next: Option<NonNull<FreeNode>>,
}

#[repr(C)]
struct BlockHeader {
    size: usize,
    pad: usize,
}

struct Fit {
    prev: Option<NonNull<FreeNode>>,
    node: NonNull<FreeNode>,
    padding: usize,
    required: usize,
}

#[derive(Debug)]
pub struct FreeListAlloc {
    block: RawBlock,
    head: Option<NonNull<FreeNode>>,
    placement: Placement,
    used: usize,
    peak: usize,
}

unsafe impl Send for FreeListAlloc {}

impl FreeListAlloc {
    pub fn new(size: usize, align: usize, placement: Placement) -> Result<Self, raw::Error> {
        let size = size.align_down(UNIT).max(NODE_SIZE);
        let mut this = Self {
            block: RawBlock::new(size, align)?,
            head: None,
            placement,
            used: 0,
            peak: 0,
        };
        this.reset();
        Ok(this)
    }

    #[inline]
    pub const fn placement(&self) -> Placement {
        self.placement
    }

    /// Number of disjoint free ranges.
    pub fn fragments(&self) -> usize {
        self.nodes().count()
    }

    fn nodes(&self) -> impl Iterator<Item = NonNull<FreeNode>> + '_ {
        core::iter::successors(self.head, |node| unsafe { node.as_ref().next })
    }

    #[inline]
    fn fit(node: NonNull<FreeNode>, layout: Layout) -> Option<(usize, usize)> {
        let start = node.as_ptr().addr();
        let align = layout.align().max(UNIT);
        let padding = (start + HEADER_SIZE).checked_align_up(align)? - start;
        let required = padding.checked_add(layout.size())?.checked_align_up(UNIT)?;
        let size = unsafe { node.as_ref().size };
        (required <= size).then_some((padding, required))
    }

    fn find(&self, layout: Layout) -> Option<Fit> {
        let mut best: Option<Fit> = None;
        let mut prev = None;
        for node in self.nodes() {
            if let Some((padding, required)) = Self::fit(node, layout) {
                let fit = Fit {
                    prev,
                    node,
                    padding,
                    required,
                };
                match self.placement {
                    Placement::FirstFit => return Some(fit),
                    Placement::BestFit => {
                        let slack = unsafe { node.as_ref().size } - required;
                        let better = best.as_ref().is_none_or(|b| {
                            slack < unsafe { b.node.as_ref().size } - b.required
                        });
                        if better {
                            if slack == 0 {
                                return Some(fit);
                            }
                            best = Some(fit);
                        }
                    }
                }
            }
            prev = Some(node);
        }
        best
    }

    #[inline]
    fn link(&mut self, prev: Option<NonNull<FreeNode>>, next: Option<NonNull<FreeNode>>) {
        match prev {
            Some(mut prev) => unsafe { prev.as_mut().next = next },
            None => self.head = next,
        }
    }

    /// Merges `node` with its successor when the two touch.
    unsafe fn merge_next(node: NonNull<FreeNode>) {
        unsafe {
            let this = &mut *node.as_ptr();
            if let Some(next) = this.next
                && node.byte_add(this.size) == next
            {
                let next = next.read();
                this.size += next.size;
                this.next = next.next;
            }
        }
    }
}

impl BlockAlloc for FreeListAlloc {
    fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let Fit {
            prev,
            node,
            padding,
            mut required,
        } = self.find(layout)?;

        unsafe {
            let FreeNode { size, next } = node.read();
            let rest = size - required;
            let replacement = if rest >= NODE_SIZE {
                let split = node.byte_add(required);
                split.write(FreeNode { size: rest, next });
                Some(split)
            } else {
                required = size;
                next
            };
            self.link(prev, replacement);

            let ptr = node.cast::<u8>().add(padding);
            ptr.sub(HEADER_SIZE).cast::<BlockHeader>().write(BlockHeader {
                size: required,
                pad: padding - HEADER_SIZE,
            });

            self.used += required;
            self.peak = self.peak.max(self.used);
            Some(ptr)
        }
    }

    unsafe fn free(&mut self, ptr: NonNull<u8>) -> bool {
        unsafe {
            let header = ptr.sub(HEADER_SIZE);
            let BlockHeader { size, pad } = header.cast::<BlockHeader>().read();
            let node = header.sub(pad).cast::<FreeNode>();

            let mut prev = None;
            let mut cur = self.head;
            while let Some(c) = cur
                && c < node
            {
                prev = Some(c);
                cur = c.as_ref().next;
            }

            node.write(FreeNode { size, next: cur });
            self.link(prev, Some(node));
            self.used -= size;

            Self::merge_next(node);
            if let Some(prev) = prev {
                Self::merge_next(prev);
            }
        }
        true
    }

    fn reset(&mut self) {
        let node = self.block.as_ptr().cast::<FreeNode>();
        unsafe {
            node.write(FreeNode {
                size: self.block.size(),
                next: None,
            })
        };
        self.head = Some(node);
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
