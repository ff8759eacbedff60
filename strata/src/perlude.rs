pub use crate::block::{AllocatorType, Placement, SizeInfo};
pub use crate::bucket::{Bucket, BucketId};
pub use crate::lock::{NoLock, PoolLock, SpinMutex};
pub use crate::pool::{AllocatorPool, Error, GrowPolicy, PoolConfig};
pub use crate::raw::AlignedAlloc;

pub type LocalPool = AllocatorPool<NoLock>;
pub type SyncPool = AllocatorPool<SpinMutex>;

pub type LocalBucket<T, const N: usize> = Bucket<T, N, NoLock>;
pub type SyncBucket<T, const N: usize> = Bucket<T, N, SpinMutex>;

#[cfg(feature = "std")]
pub type StdPool = AllocatorPool<crate::lock::StdMutex>;
