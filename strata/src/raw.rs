//! Aligned allocation on top of the platform allocator.
//!
//! Every block handed out is preceded by an [`AllocHeader`] holding the
//! address the platform returned and the requested size, so a block can be
//! released or measured from the aligned pointer alone:
//!
//! ```text
//! origin                      ptr (aligned)
//! |-- padding --|-- header --|-- size bytes --|-- slack --|
//! ```

use core::{alloc::Layout, ptr::NonNull};

use memory_addr::{AddrRange, VirtAddr};

use crate::numeric::{Alignable, pack};

/// Platform layout alignment of the underlying block.
const BLOCK_ALIGN: usize = align_of::<usize>();
/// Sizes at or below this are swapped through a stack buffer.
pub const SWAP_THRESHOLD: usize = 16;
pub const HEADER_SIZE: usize = size_of::<AllocHeader>();
pub const MAX_SIZE: usize = pack::VALUE_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidAlignment { align: usize },
    OutofBounds { requested: usize },
    OutofMemory { size: usize, align: usize },
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidAlignment { align } => {
                write!(f, "Alignment {} is not a power of two", align)
            }
            Self::OutofBounds { requested } => {
                write!(f, "Allocation failed: {} exceeds the addressable size", requested)
            }
            Self::OutofMemory { size, align } => write!(
                f,
                "Platform allocator refused {} bytes aligned to {}",
                size, align
            ),
        }
    }
}

impl core::error::Error for Error {}

#[repr(C)]
struct AllocHeader {
    origin: NonNull<u8>,
    /// requested size, with log2 of the effective alignment in the top bits.
    packed: usize,
}

impl AllocHeader {
    #[inline]
    unsafe fn of(ptr: NonNull<u8>) -> NonNull<AllocHeader> {
        unsafe { ptr.sub(HEADER_SIZE).cast() }
    }

    #[inline]
    fn size(&self) -> usize {
        pack::unpack(self.packed).0
    }

    #[inline]
    fn align(&self) -> usize {
        1 << pack::unpack(self.packed).1
    }

    #[inline]
    fn origin_layout(&self) -> Layout {
        // Validated when the block was created.
        unsafe { Layout::from_size_align_unchecked(total_size(self.size(), self.align()), BLOCK_ALIGN) }
    }
}

#[inline]
const fn total_size(size: usize, align: usize) -> usize {
    size + align + HEADER_SIZE
}

/// Alignment actually applied to a request of `size` bytes.
#[inline]
pub const fn effective_align(size: usize, align: usize) -> usize {
    let min = if size >= 16 { 16 } else { 8 };
    if align > min { align } else { min }
}

/// Allocates `size` bytes aligned to at least `align`.
///
/// The returned pointer stays valid until passed to [`free`] or
/// [`realloc`]. A zero size still yields a distinct, releasable block.
pub fn allocate(size: usize, align: usize) -> Result<NonNull<u8>, Error> {
    if !align.is_power_of_two() {
        return Err(Error::InvalidAlignment { align });
    }
    let align = effective_align(size, align);
    let packed = pack::pack(size, align.trailing_zeros())
        .ok_or(Error::OutofBounds { requested: size })?;
    let total = size
        .checked_add(align)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .ok_or(Error::OutofBounds { requested: size })?;
    let layout = Layout::from_size_align(total, BLOCK_ALIGN)
        .map_err(|_| Error::OutofBounds { requested: size })?;

    let origin = NonNull::new(unsafe { alloc::alloc::alloc(layout) })
        .ok_or(Error::OutofMemory { size, align })?;

    let start = origin.as_ptr().addr();
    let offset = (start + HEADER_SIZE).align_up(align) - start;
    unsafe {
        let ptr = origin.add(offset);
        AllocHeader::of(ptr).write(AllocHeader { origin, packed });
        #[cfg(feature = "tracing")]
        tracing::trace!("[raw]: allocate {} bytes aligned {} at {:p}", size, align, ptr);
        Ok(ptr)
    }
}

/// Releases a block from [`allocate`]. A null pointer is ignored.
///
/// # Safety
///
/// A non-null `ptr` must come from [`allocate`] or [`realloc`] and must not
/// have been freed already.
pub unsafe fn free(ptr: *mut u8) {
    let Some(ptr) = NonNull::new(ptr) else {
        return;
    };
    unsafe {
        let header = AllocHeader::of(ptr).read();
        #[cfg(feature = "tracing")]
        tracing::trace!("[raw]: free {} bytes at {:p}", header.size(), ptr);
        alloc::alloc::dealloc(header.origin.as_ptr(), header.origin_layout());
    }
}

/// The size originally requested for `ptr`.
///
/// # Safety
///
/// `ptr` must be a live block from [`allocate`] or [`realloc`].
pub unsafe fn alloc_size(ptr: NonNull<u8>) -> usize {
    unsafe { AllocHeader::of(ptr).as_ref().size() }
}

/// The alignment applied when `ptr` was created.
///
/// # Safety
///
/// `ptr` must be a live block from [`allocate`] or [`realloc`].
pub unsafe fn alloc_align(ptr: NonNull<u8>) -> usize {
    unsafe { AllocHeader::of(ptr).as_ref().align() }
}

/// Moves a block to a new allocation of `new_size` bytes.
///
/// A null `ptr` allocates. A zero `new_size` frees and returns `None`.
/// Otherwise the first `min(old, new)` bytes are copied and the old block
/// is released. On error the old block is left untouched.
///
/// # Safety
///
/// A non-null `ptr` must be a live block from this module.
pub unsafe fn realloc(
    ptr: *mut u8,
    new_size: usize,
    align: usize,
) -> Result<Option<NonNull<u8>>, Error> {
    let Some(old) = NonNull::new(ptr) else {
        return allocate(new_size, align).map(Some);
    };
    if new_size == 0 {
        unsafe { free(ptr) };
        return Ok(None);
    }

    let new = allocate(new_size, align)?;
    unsafe {
        let len = alloc_size(old).min(new_size);
        core::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), len);
        free(old.as_ptr());
    }
    Ok(Some(new))
}

/// Exchanges `size` bytes between two regions.
///
/// # Safety
///
/// Both regions must be valid for reads and writes of `size` bytes and must
/// not overlap.
pub unsafe fn memswap(a: *mut u8, b: *mut u8, size: usize) {
    unsafe {
        if size <= SWAP_THRESHOLD {
            let mut tmp = [0u8; SWAP_THRESHOLD];
            core::ptr::copy_nonoverlapping(a, tmp.as_mut_ptr(), size);
            core::ptr::copy_nonoverlapping(b, a, size);
            core::ptr::copy_nonoverlapping(tmp.as_ptr(), b, size);
            return;
        }

        const WORD: usize = size_of::<usize>();
        let words = size / WORD;
        for i in 0..words {
            let pa = a.add(i * WORD).cast::<usize>();
            let pb = b.add(i * WORD).cast::<usize>();
            let wa = pa.read_unaligned();
            pa.write_unaligned(pb.read_unaligned());
            pb.write_unaligned(wa);
        }
        for i in words * WORD..size {
            core::ptr::swap(a.add(i), b.add(i));
        }
    }
}

/// An owned block from [`allocate`], released on drop.
#[derive(Debug)]
pub struct RawBlock {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for RawBlock {}

impl RawBlock {
    pub fn new(size: usize, align: usize) -> Result<Self, Error> {
        let ptr = allocate(size, align)?;
        Ok(Self { ptr, size })
    }

    #[inline]
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    #[inline]
    pub fn range(&self) -> AddrRange<VirtAddr> {
        AddrRange::from_start_size(VirtAddr::from(self.start()), self.size)
    }

    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.range().contains(VirtAddr::from(ptr.as_ptr().addr()))
    }

    /// Offset of `ptr` from the start of the block.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr().addr() - self.start()
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe { free(self.ptr.as_ptr()) };
    }
}

/// [`allocator_api2`] adapter over this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlignedAlloc;

unsafe impl allocator_api2::alloc::Allocator for AlignedAlloc {
    fn allocate(
        &self,
        layout: Layout,
    ) -> Result<NonNull<[u8]>, allocator_api2::alloc::AllocError> {
        let ptr = allocate(layout.size(), layout.align())
            .map_err(|_| allocator_api2::alloc::AllocError)?;
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { free(ptr.as_ptr()) };
    }
}
