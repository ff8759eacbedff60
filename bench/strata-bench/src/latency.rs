use std::time::Instant;

use hdrhistogram::Histogram;
use strata::perlude::{AllocatorType, LocalPool, PoolConfig};

use crate::touch;

const OPS: usize = 100_000;
const LIVE: usize = 1024;

/// Random mixed allocate/free run, printing per-op latency percentiles.
fn mixed(kind: AllocatorType, max: usize) -> (Histogram<u64>, Histogram<u64>) {
    let pool = LocalPool::new(
        PoolConfig::new(kind)
            .with_initial_size(1 << 20)
            .with_user_data(max),
    )
    .unwrap();
    let mut alloc = Histogram::<u64>::new(3).unwrap();
    let mut free = Histogram::<u64>::new(3).unwrap();
    let mut live = Vec::with_capacity(LIVE);

    for _ in 0..OPS {
        if live.len() < LIVE && (live.is_empty() || fastrand::bool()) {
            let size = fastrand::usize(1..=max);
            let start = Instant::now();
            let ptr = pool.allocate_bytes(size).unwrap();
            alloc.record(start.elapsed().as_nanos() as u64).unwrap();
            touch(ptr.as_ptr(), size);
            live.push(ptr);
        } else {
            let ptr = live.swap_remove(fastrand::usize(..live.len()));
            let start = Instant::now();
            unsafe { pool.free(ptr).unwrap() };
            free.record(start.elapsed().as_nanos() as u64).unwrap();
        }
    }
    for ptr in live {
        unsafe { pool.free(ptr).unwrap() };
    }
    (alloc, free)
}

pub fn report(sizes: &[usize]) {
    for &max in sizes {
        for kind in [AllocatorType::Pool, AllocatorType::FreeList] {
            let (alloc, free) = mixed(kind, max);
            for (op, h) in [("allocate", alloc), ("free", free)] {
                println!(
                    "{kind:?} <= {max}B {op}: p50 {}ns p99 {}ns p99.9 {}ns max {}ns",
                    h.value_at_quantile(0.5),
                    h.value_at_quantile(0.99),
                    h.value_at_quantile(0.999),
                    h.max()
                );
            }
        }
    }
}
