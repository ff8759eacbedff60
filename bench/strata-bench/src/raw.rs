use std::alloc::{Layout, alloc, dealloc};
use std::time::{Duration, Instant};

use crate::{BATCH, touch};

pub fn aligned(iters: usize, size: usize) -> Duration {
    let mut ptrs = Vec::with_capacity(BATCH);
    let start = Instant::now();
    for _ in 0..iters {
        for _ in 0..BATCH {
            let ptr = strata::raw::allocate(size, 16).unwrap();
            touch(ptr.as_ptr(), size);
            ptrs.push(ptr);
        }
        for ptr in ptrs.drain(..) {
            unsafe { strata::raw::free(ptr.as_ptr()) };
        }
    }
    start.elapsed()
}

pub fn system(iters: usize, size: usize) -> Duration {
    let layout = Layout::from_size_align(size, 16).unwrap();
    let mut ptrs = Vec::with_capacity(BATCH);
    let start = Instant::now();
    for _ in 0..iters {
        for _ in 0..BATCH {
            let ptr = unsafe { alloc(layout) };
            touch(ptr, size);
            ptrs.push(ptr);
        }
        for ptr in ptrs.drain(..) {
            unsafe { dealloc(ptr, layout) };
        }
    }
    start.elapsed()
}
