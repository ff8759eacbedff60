use core::{alloc::Layout, ptr::NonNull};

use super::tracing_init;
use crate::{
    block::{AllocatorType, Placement},
    perlude::{LocalPool, SyncPool},
    pool::{Error, GrowPolicy, PoolConfig},
};

fn layout(size: usize, align: usize) -> Layout {
    Layout::from_size_align(size, align).unwrap()
}

#[test]
fn no_grow_rejects_oversized_request() {
    tracing_init();
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::FreeList)
            .with_initial_size(1024)
            .with_grow(GrowPolicy::NoGrow),
    )
    .unwrap();

    assert_eq!(
        pool.allocate_bytes(2048),
        Err(Error::Exhausted {
            requested: 2048,
            policy: GrowPolicy::NoGrow
        })
    );
    assert_eq!(pool.allocator_count(), 1);
    assert_eq!(pool.grow_count(), 0);

    let ptr = pool.allocate_bytes(512).unwrap();
    unsafe { pool.free(ptr).unwrap() };
}

#[test]
fn doubled_growth_is_monotonic() {
    tracing_init();
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::FreeList)
            .with_initial_size(256)
            .with_grow(GrowPolicy::UseDoubledRequestedSize),
    )
    .unwrap();

    let requests = [512, 1024, 2048, 4096, 8192];
    let ptrs: Vec<_> = requests
        .iter()
        .map(|&size| pool.allocate_bytes(size).unwrap())
        .collect();

    let sizes: Vec<_> = pool.allocator_infos().iter().map(|i| i.max_size).collect();
    assert_eq!(sizes.len(), requests.len() + 1);
    assert_eq!(pool.grow_count(), requests.len());
    assert!(sizes[1..].windows(2).all(|w| w[0] <= w[1]));
    for (size, req) in sizes[1..].iter().zip(requests) {
        assert!(*size >= 2 * req, "allocator of {} for request {}", size, req);
    }

    for ptr in ptrs {
        unsafe { pool.free(ptr).unwrap() };
    }
    assert_eq!(pool.size_info().used_size, 0);
}

#[test]
fn every_variant_round_trips() {
    tracing_init();
    let kinds = [
        AllocatorType::Linear,
        AllocatorType::Stack,
        AllocatorType::Pool,
        AllocatorType::FreeList,
    ];
    for kind in kinds {
        let pool = LocalPool::new(
            PoolConfig::new(kind)
                .with_initial_size(512)
                .with_user_data(64)
                .with_grow(GrowPolicy::UseInitialSize),
        )
        .unwrap();

        let ptrs: Vec<_> = (0..32)
            .map(|i| {
                let align = 1 << (i % 5);
                let ptr = pool.allocate(layout(48, align)).unwrap();
                assert_eq!(ptr.as_ptr().addr() % align, 0);
                unsafe { ptr.as_ptr().write_bytes(i as u8, 48) };
                ptr
            })
            .collect();
        assert!(pool.grow_count() > 0, "{:?} never grew", kind);
        assert!(ptrs.iter().all(|&p| pool.contains(p)));

        for (i, &ptr) in ptrs.iter().enumerate() {
            let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 48) };
            assert!(bytes.iter().all(|&b| b == i as u8), "{:?} corrupted", kind);
        }
        // Reverse order keeps stack allocators happy.
        for &ptr in ptrs.iter().rev() {
            unsafe { pool.free(ptr).unwrap() };
        }
        assert_eq!(pool.size_info().used_size, 0, "{:?} leaked", kind);
        assert_eq!(pool.allocation_count(), 32);
    }
}

#[test]
fn size_info_aggregates() {
    let pool = LocalPool::new(PoolConfig::new(AllocatorType::FreeList).with_initial_size(1024))
        .unwrap();
    let ptr = pool.allocate_bytes(100).unwrap();

    let info = pool.size_info();
    assert_eq!(info.max_size, 1024);
    assert_eq!(info.used_size, 120);
    assert_eq!(info.available_size, 904);
    assert_eq!(info.peak_size, 120);

    let big = pool.allocate_bytes(2000).unwrap();
    let info = pool.size_info();
    assert_eq!(pool.allocator_count(), 2);
    assert_eq!(info.max_size, 1024 + pool.allocator_infos()[1].max_size);
    assert_eq!(info.used_size, info.max_size - info.available_size);

    unsafe {
        pool.free(big).unwrap();
        pool.free(ptr).unwrap();
    }
    assert_eq!(pool.size_info().peak_size, 120 + 2016);
}

#[test]
fn stack_refuses_out_of_order_free() {
    let pool = LocalPool::new(PoolConfig::new(AllocatorType::Stack).with_initial_size(256)).unwrap();
    let a = pool.allocate_bytes(16).unwrap();
    let b = pool.allocate_bytes(16).unwrap();

    unsafe {
        assert_eq!(pool.free(a), Err(Error::Refused));
        pool.free(b).unwrap();
        pool.free(a).unwrap();
    }
}

#[test]
fn slot_pool_rejects_oversized() {
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::Pool)
            .with_user_data(32)
            .with_initial_size(128),
    )
    .unwrap();
    assert_eq!(
        pool.allocate_bytes(64),
        Err(Error::Oversized {
            requested: 64,
            limit: 32
        })
    );

    let slots: Vec<_> = (0..5).map(|_| pool.allocate_bytes(32).unwrap()).collect();
    assert_eq!(pool.allocator_count(), 2);
    for ptr in slots {
        unsafe { pool.free(ptr).unwrap() };
    }
}

#[test]
fn foreign_pointer_is_unknown() {
    let a = LocalPool::new(PoolConfig::default()).unwrap();
    let b = LocalPool::new(PoolConfig::default()).unwrap();
    let ptr = a.allocate_bytes(8).unwrap();

    unsafe {
        assert_eq!(b.free(ptr), Err(Error::UnknownPointer));
        assert_eq!(b.free(NonNull::dangling()), Err(Error::UnknownPointer));
        a.free(ptr).unwrap();
    }
}

#[test]
fn tracking_catches_double_free() {
    tracing_init();
    let pool = LocalPool::new(PoolConfig::default().with_tracking(true)).unwrap();
    let a = pool.allocate_bytes(40).unwrap();
    let b = pool.allocate_bytes(24).unwrap();
    assert_eq!(pool.leaks().len(), 2);

    unsafe {
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(Error::UnknownPointer));
    }
    assert_eq!(pool.leaks(), vec![(b.as_ptr().addr(), 24)]);
    unsafe { pool.free(b).unwrap() };
    assert!(pool.leaks().is_empty());
}

#[test]
fn idle_allocators_are_reclaimed() {
    tracing_init();
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::FreeList)
            .with_initial_size(128)
            .with_grow(GrowPolicy::UseRequestedSize)
            .with_reclaim_after(2),
    )
    .unwrap();

    let small = pool.allocate_bytes(16).unwrap();
    let big = pool.allocate_bytes(1000).unwrap();
    assert_eq!(pool.allocator_count(), 2);

    unsafe { pool.free(big).unwrap() };
    assert_eq!(pool.allocator_count(), 2);
    unsafe { pool.free(small).unwrap() };
    // The first allocator always stays.
    assert_eq!(pool.allocator_count(), 1);
    assert_eq!(pool.size_info().max_size, 128);
}

#[test]
fn best_fit_placement() {
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::FreeList)
            .with_initial_size(1024)
            .with_placement(Placement::BestFit),
    )
    .unwrap();
    let big = pool.allocate_bytes(200).unwrap();
    let _sep = pool.allocate_bytes(8).unwrap();
    let small = pool.allocate_bytes(48).unwrap();
    let _sep = pool.allocate_bytes(8).unwrap();
    unsafe {
        pool.free(big).unwrap();
        pool.free(small).unwrap();
    }
    assert_eq!(pool.allocate_bytes(40), Ok(small));
    unsafe { pool.reset() };
    assert_eq!(pool.size_info().used_size, 0);
}

#[test]
fn pool_backs_vec() {
    let pool = LocalPool::new(PoolConfig::default().with_initial_size(1 << 12)).unwrap();
    {
        let mut v = allocator_api2::vec::Vec::new_in(&pool);
        v.extend(0..10_000u32);
        assert_eq!(v.len(), 10_000);
        assert_eq!(v[9_999], 9_999);
        let empty: allocator_api2::vec::Vec<u8, _> = allocator_api2::vec::Vec::with_capacity_in(0, &pool);
        assert!(empty.is_empty());
    }
    assert!(pool.grow_count() > 0);
    assert_eq!(pool.size_info().used_size, 0);
}

#[test]
fn thread_safety_follows_lock() {
    let local = LocalPool::new(PoolConfig::default()).unwrap();
    let sync = SyncPool::new(PoolConfig::default()).unwrap();
    assert!(!local.thread_safe());
    assert!(sync.thread_safe());
}

#[test]
fn odd_width_slots_are_recycled() {
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::Pool)
            .with_user_data(48)
            .with_initial_size(4 * 48)
            .with_grow(GrowPolicy::NoGrow),
    )
    .unwrap();

    let slots: Vec<_> = (0..4).map(|_| pool.allocate_bytes(48).unwrap()).collect();
    assert_eq!(pool.size_info().used_size, 4 * 48);
    for &ptr in slots.iter() {
        unsafe { pool.free(ptr).unwrap() };
    }
    assert_eq!(pool.size_info().used_size, 0);

    let again: Vec<_> = (0..4).map(|_| pool.allocate_bytes(48).unwrap()).collect();
    assert_eq!(pool.allocator_count(), 1);
    for ptr in again {
        unsafe { pool.free(ptr).unwrap() };
    }
}

#[test]
fn zero_size_past_a_full_linear_block() {
    let pool = LocalPool::new(
        PoolConfig::new(AllocatorType::Linear)
            .with_initial_size(64)
            .with_grow(GrowPolicy::UseRequestedSize),
    )
    .unwrap();
    let full = pool.allocate_bytes(64).unwrap();
    let empty = pool.allocate_bytes(0).unwrap();
    assert!(pool.contains(empty));
    assert_eq!(pool.allocator_count(), 2);

    unsafe {
        pool.free(empty).unwrap();
        pool.free(full).unwrap();
    }
    assert_eq!(pool.size_info().used_size, 0);
}

#[test]
fn stack_backed_vec_keeps_growing() {
    tracing_init();
    let pool = LocalPool::new(PoolConfig::new(AllocatorType::Stack).with_initial_size(1 << 12)).unwrap();
    let mut v = allocator_api2::vec::Vec::new_in(&pool);
    v.extend(0..100u32);
    assert_eq!(v.iter().sum::<u32>(), 4950);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "does not own")]
fn deallocate_of_a_foreign_pointer() {
    use allocator_api2::alloc::Allocator;

    let a = LocalPool::new(PoolConfig::default()).unwrap();
    let b = LocalPool::new(PoolConfig::default()).unwrap();
    let ptr = a.allocate_bytes(8).unwrap();
    unsafe { b.deallocate(ptr, layout(8, 8)) };
}
