use std::time::{Duration, Instant};

use strata::perlude::{
    AllocatorPool, AllocatorType, GrowPolicy, Placement, PoolConfig, PoolLock, SyncPool,
};

use crate::{BATCH, touch};

fn config(kind: AllocatorType, size: usize) -> PoolConfig {
    PoolConfig::new(kind)
        .with_initial_size((size + 64) * BATCH)
        .with_user_data(size)
        .with_grow(GrowPolicy::UseInitialSize)
}

/// Allocates a batch, then frees it newest first.
fn run<L: PoolLock>(pool: &AllocatorPool<L>, iters: usize, size: usize) -> Duration {
    let mut ptrs = Vec::with_capacity(BATCH);
    let start = Instant::now();
    for _ in 0..iters {
        for _ in 0..BATCH {
            let ptr = pool.allocate_bytes(size).unwrap();
            touch(ptr.as_ptr(), size);
            ptrs.push(ptr);
        }
        while let Some(ptr) = ptrs.pop() {
            unsafe { pool.free(ptr).unwrap() };
        }
    }
    start.elapsed()
}

fn local(conf: PoolConfig, iters: usize, size: usize) -> Duration {
    let pool = AllocatorPool::<strata::lock::NoLock>::new(conf).unwrap();
    run(&pool, iters, size)
}

pub fn linear(iters: usize, size: usize) -> Duration {
    local(config(AllocatorType::Linear, size), iters, size)
}

pub fn stack(iters: usize, size: usize) -> Duration {
    local(config(AllocatorType::Stack, size), iters, size)
}

pub fn slab(iters: usize, size: usize) -> Duration {
    local(config(AllocatorType::Pool, size), iters, size)
}

pub fn free_list(iters: usize, size: usize) -> Duration {
    local(config(AllocatorType::FreeList, size), iters, size)
}

pub fn free_list_best(iters: usize, size: usize) -> Duration {
    let conf = config(AllocatorType::FreeList, size).with_placement(Placement::BestFit);
    local(conf, iters, size)
}

pub fn sync_free_list(iters: usize, size: usize) -> Duration {
    let pool = SyncPool::new(config(AllocatorType::FreeList, size)).unwrap();
    run(&pool, iters, size)
}
