//! Chunked object storage with stable, generational handles.
//!
//! Values live in fixed chunks of `N` slots taken from a slot pool. Chunks are
//! only ever appended, so a value never moves while it is live. Each slot
//! carries a generation that is bumped on every allocation; a [`BucketId`]
//! remembers the generation it was issued with and stops resolving as soon as
//! its slot is freed.

use alloc::vec::Vec;
use core::{alloc::Layout, marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{
    block::{AllocatorType, BLOCK_ALIGN},
    lock::{NoLock, PoolLock},
    pool::{AllocatorPool, Error, GrowPolicy, PoolConfig},
    raw,
};

pub const MAX_CHUNKS: usize = u8::MAX as usize + 1;
const NONE: u32 = u32::MAX;

/// Location of a value in a [`Bucket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BucketId {
    /// Slot within the chunk.
    pub allocation_index: u16,
    /// Chunk within the bucket.
    pub bucket_index: u8,
    pub is_valid: u8,
    pub live: u32,
}

impl BucketId {
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.is_valid != 0
    }
}

struct Slot<T> {
    data: MaybeUninit<T>,
    next_free: u32,
    live: u32,
    occupied: bool,
}

impl<T> Slot<T> {
    const fn vacant() -> Self {
        Self {
            data: MaybeUninit::uninit(),
            next_free: NONE,
            live: 0,
            occupied: false,
        }
    }
}

/// A typed store of `N`-slot chunks.
///
/// Freed slots are reused last in, first out. The bucket does no locking of
/// its own; `L` only selects the lock of the backing pool.
pub struct Bucket<T, const N: usize, L: PoolLock = NoLock> {
    pool: AllocatorPool<L>,
    chunk: Layout,
    chunks: Vec<NonNull<Slot<T>>>,
    free_head: u32,
    /// Slots below this index have been handed out at least once.
    head: u32,
    active: usize,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, const N: usize, L: PoolLock + Send> Send for Bucket<T, N, L> {}
unsafe impl<T: Sync, const N: usize, L: PoolLock + Sync> Sync for Bucket<T, N, L> {}

impl<T, const N: usize, L: PoolLock> core::fmt::Debug for Bucket<T, N, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bucket")
            .field("chunk", &N)
            .field("chunks", &self.chunks.len())
            .field("active", &self.active)
            .field("head", &self.head)
            .finish()
    }
}

impl<T, const N: usize, L: PoolLock> Bucket<T, N, L> {
    pub fn new() -> Result<Self, Error> {
        const { assert!(N > 0 && N < u16::MAX as usize, "chunk size must fit in 16 bits") };

        let chunk = Layout::array::<Slot<T>>(N)
            .map_err(|_| raw::Error::OutofBounds { requested: N })?;
        let conf = PoolConfig::new(AllocatorType::Pool)
            .with_grow(GrowPolicy::UseInitialSize)
            .with_user_data(chunk.size())
            .with_initial_size(chunk.size())
            .with_align(if chunk.align() > BLOCK_ALIGN { chunk.align() } else { BLOCK_ALIGN });

        Ok(Self {
            pool: AllocatorPool::new(conf)?,
            chunk,
            chunks: Vec::new(),
            free_head: NONE,
            head: 0,
            active: 0,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub const fn active_count(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.chunks.len() * N
    }

    #[inline]
    pub const fn pool(&self) -> &AllocatorPool<L> {
        &self.pool
    }

    #[inline]
    fn slot(&self, idx: u32) -> NonNull<Slot<T>> {
        let idx = idx as usize;
        unsafe { self.chunks[idx / N].add(idx % N) }
    }

    #[inline]
    const fn id_of(idx: u32, live: u32) -> BucketId {
        let idx = idx as usize;
        BucketId {
            allocation_index: (idx % N) as u16,
            bucket_index: (idx / N) as u8,
            is_valid: 1,
            live,
        }
    }

    /// Global slot index of a handle, if the slot was ever handed out.
    #[inline]
    fn index_of(&self, id: BucketId) -> Option<u32> {
        if !id.is_valid() || id.allocation_index as usize >= N {
            return None;
        }
        let idx = id.bucket_index as usize * N + id.allocation_index as usize;
        (idx < self.head as usize).then_some(idx as u32)
    }

    fn grow(&mut self) -> Result<(), Error> {
        if self.chunks.len() == MAX_CHUNKS {
            return Err(Error::TooManyChunks);
        }
        let chunk = self.pool.allocate(self.chunk)?.cast::<Slot<T>>();
        for i in 0..N {
            unsafe { chunk.add(i).write(Slot::vacant()) };
        }
        self.chunks.push(chunk);

        #[cfg(feature = "tracing")]
        tracing::debug!("[bucket]: grew to {} chunks of {}", self.chunks.len(), N);
        Ok(())
    }

    fn claim(&mut self) -> Result<u32, Error> {
        if self.free_head != NONE {
            let idx = self.free_head;
            self.free_head = unsafe { self.slot(idx).as_ref().next_free };
            return Ok(idx);
        }
        if self.head as usize == self.capacity() {
            self.grow()?;
        }
        let idx = self.head;
        self.head += 1;
        Ok(idx)
    }

    pub fn allocate(&mut self, value: T) -> Result<BucketId, Error> {
        self.allocate_with(|| value)
    }

    /// Builds the value, then moves it into a claimed slot. A panic in `f`
    /// leaves the bucket untouched.
    pub fn allocate_with<F: FnOnce() -> T>(&mut self, f: F) -> Result<BucketId, Error> {
        let value = f();
        let idx = self.claim()?;
        let slot = unsafe { self.slot(idx).as_mut() };
        slot.data.write(value);
        slot.occupied = true;
        slot.live = slot.live.wrapping_add(1);
        self.active += 1;
        Ok(Self::id_of(idx, slot.live))
    }

    /// Takes the value out and recycles its slot.
    ///
    /// A foreign handle yields `None` and leaves the bucket as is. Freeing a
    /// handle twice is a caller bug: it panics in debug builds and yields
    /// `None` otherwise.
    #[must_use = "a `None` means the handle was stale or foreign"]
    pub fn free(&mut self, id: BucketId) -> Option<T> {
        let Some(idx) = self.index_of(id) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("[bucket]: free of an invalid handle {:?}", id);
            return None;
        };
        let free_head = self.free_head;
        let slot = unsafe { self.slot(idx).as_mut() };
        if !slot.occupied || slot.live != id.live {
            #[cfg(feature = "tracing")]
            tracing::warn!("[bucket]: free of a stale handle {:?}", id);
            if cfg!(debug_assertions) {
                panic!("double free of bucket handle {:?}", id);
            }
            return None;
        }

        slot.occupied = false;
        slot.next_free = free_head;
        let value = unsafe { slot.data.assume_init_read() };
        self.free_head = idx;
        self.active -= 1;
        Some(value)
    }

    #[inline]
    fn live_slot(&self, id: BucketId) -> Option<NonNull<Slot<T>>> {
        let slot = self.slot(self.index_of(id)?);
        let s = unsafe { slot.as_ref() };
        (s.occupied && s.live == id.live).then_some(slot)
    }

    #[inline]
    pub fn contains(&self, id: BucketId) -> bool {
        self.live_slot(id).is_some()
    }

    pub fn get(&self, id: BucketId) -> Option<&T> {
        self.live_slot(id)
            .map(|slot| unsafe { slot.as_ref().data.assume_init_ref() })
    }

    pub fn get_mut(&mut self, id: BucketId) -> Option<&mut T> {
        self.live_slot(id)
            .map(|mut slot| unsafe { slot.as_mut().data.assume_init_mut() })
    }

    /// Stable address of a live value.
    pub fn get_ptr(&self, id: BucketId) -> Option<NonNull<T>> {
        self.live_slot(id)
            .map(|slot| unsafe { NonNull::new_unchecked((&raw mut (*slot.as_ptr()).data).cast()) })
    }

    /// Visits live values in slot order with a running count, until `f`
    /// returns `true`.
    pub fn view<F: FnMut(&T, usize) -> bool>(&self, mut f: F) {
        for (n, (_, value)) in self.iter().enumerate() {
            if f(value, n) {
                return;
            }
        }
    }

    pub fn view_mut<F: FnMut(&mut T, usize) -> bool>(&mut self, mut f: F) {
        let mut n = 0;
        for idx in 0..self.head {
            let slot = unsafe { self.slot(idx).as_mut() };
            if !slot.occupied {
                continue;
            }
            if f(unsafe { slot.data.assume_init_mut() }, n) {
                return;
            }
            n += 1;
        }
    }

    pub fn find<F: FnMut(&T) -> bool>(&self, mut pred: F) -> Option<BucketId> {
        self.iter().find(|(_, v)| pred(v)).map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketId, &T)> + '_ {
        (0..self.head).filter_map(move |idx| {
            let slot = unsafe { self.slot(idx).as_ref() };
            slot.occupied
                .then(|| (Self::id_of(idx, slot.live), unsafe { slot.data.assume_init_ref() }))
        })
    }

    /// Drops every live value. Chunks stay allocated for reuse.
    pub fn clear(&mut self) {
        for idx in 0..self.head {
            let slot = unsafe { self.slot(idx).as_mut() };
            if slot.occupied {
                slot.occupied = false;
                unsafe { slot.data.assume_init_drop() };
            }
            slot.next_free = NONE;
        }
        self.free_head = NONE;
        self.head = 0;
        self.active = 0;
    }
}

impl<T, const N: usize, L: PoolLock> Drop for Bucket<T, N, L> {
    fn drop(&mut self) {
        self.clear();
        for chunk in self.chunks.drain(..) {
            // Chunks come from this pool and are released exactly once.
            let _ = unsafe { self.pool.free(chunk.cast()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_id_is_invalid() {
        let id = BucketId::default();
        assert!(!id.is_valid());

        let mut bucket = Bucket::<u32, 4>::new().unwrap();
        bucket.allocate(1).unwrap();
        assert_eq!(bucket.get(id), None);
        assert_eq!(bucket.free(id), None);
    }

    #[test]
    fn panicking_builder_keeps_slot() {
        let mut bucket = Bucket::<u32, 2>::new().unwrap();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = bucket.allocate_with(|| panic!("builder"));
        }));
        assert!(res.is_err());
        assert_eq!(bucket.active_count(), 0);

        let id = bucket.allocate(5).unwrap();
        assert_eq!((id.bucket_index, id.allocation_index), (0, 0));
    }

    #[test]
    fn handle_encoding() {
        let mut bucket = Bucket::<u8, 3>::new().unwrap();
        let ids: Vec<_> = (0..7).map(|i| bucket.allocate(i).unwrap()).collect();
        assert_eq!((ids[0].bucket_index, ids[0].allocation_index), (0, 0));
        assert_eq!((ids[4].bucket_index, ids[4].allocation_index), (1, 1));
        assert_eq!((ids[6].bucket_index, ids[6].allocation_index), (2, 0));
        assert_eq!(bucket.chunk_count(), 3);
    }

    #[test]
    fn clear_drops_values() {
        use alloc::rc::Rc;

        let counter = Rc::new(());
        let mut bucket = Bucket::<Rc<()>, 2>::new().unwrap();
        let ids: Vec<_> = (0..5)
            .map(|_| bucket.allocate(counter.clone()).unwrap())
            .collect();
        assert_eq!(Rc::strong_count(&counter), 6);

        bucket.clear();
        assert_eq!(Rc::strong_count(&counter), 1);
        assert_eq!(bucket.active_count(), 0);
        assert!(ids.iter().all(|&id| bucket.get(id).is_none()));

        let _ = bucket.allocate(counter.clone()).unwrap();
        assert_eq!(bucket.chunk_count(), 3);
        drop(bucket);
        assert_eq!(Rc::strong_count(&counter), 1);
    }
}
