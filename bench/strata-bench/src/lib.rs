mod latency;
mod pool;
mod raw;

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};

const SIZES: &[usize] = &[8, 64, 256, 1024, 4096];

/// Live blocks kept per iteration before they are released.
const BATCH: usize = 256;

type BenchFn = fn(usize, usize) -> Duration;

/// Fills a freshly allocated block so the allocation is not optimised out.
#[inline]
fn touch(ptr: *mut u8, size: usize) {
    unsafe { ptr.write_bytes(black_box(0x5A), size.min(64)) };
}

#[cfg(feature = "tracing")]
fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn groups(c: &mut Criterion) {
    #[cfg(feature = "tracing")]
    tracing_init();

    macro_rules! benches {
        ($($module:ident :: $name:ident),* $(,)?) => ([$((stringify!($name), self::$module::$name as BenchFn),)*]);
    }

    let mut g = c.benchmark_group("alloc_benchmark");

    for (i, size) in SIZES.iter().copied().enumerate() {
        for (name, f) in benches![
            raw::aligned,
            raw::system,
            pool::linear,
            pool::stack,
            pool::slab,
            pool::free_list,
            pool::free_list_best,
            pool::sync_free_list,
        ] {
            let id = format!("alloc_benchmark_{i:02}_{size}_{name}");
            g.bench_function(&id, |b| b.iter_custom(|iters| f(iters as usize, size)));
        }
    }
    g.finish();

    latency::report(SIZES);
}

criterion_group!(
    name = alloc_benchmark;
    config = Criterion::default().sample_size(50).measurement_time(Duration::from_secs(10));
    targets = groups
);

criterion_main!(alloc_benchmark);
