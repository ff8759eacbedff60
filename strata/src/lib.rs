#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[cfg(feature = "tracing")]
extern crate tracing;

pub mod block;
pub mod bucket;
pub mod lock;
pub mod perlude;
pub mod pool;
pub mod raw;
pub mod tracer;

mod numeric {
    pub trait Alignable: Sized + Copy {
        fn align_down(self, other: Self) -> Self;
        fn align_up(self, other: Self) -> Self;
        fn checked_align_up(self, other: Self) -> Option<Self>;
        fn align_offset(&self, other: &Self) -> Self;
        fn is_aligned(&self, other: &Self) -> bool;
    }

    macro_rules! align {
        ($ty:ty) => {
            impl crate::numeric::Alignable for $ty {
                #[inline(always)]
                fn align_down(self, other: Self) -> Self {
                    self & !(other - 1)
                }
                #[inline(always)]
                fn align_up(self, other: Self) -> Self {
                    (self + other - 1) & !(other - 1)
                }
                #[inline(always)]
                fn checked_align_up(self, other: Self) -> Option<Self> {
                    Some(self.checked_add(other - 1)? & !(other - 1))
                }
                #[inline(always)]
                fn align_offset(&self, other: &Self) -> Self {
                    *self & (*other - 1)
                }
                #[inline(always)]
                fn is_aligned(&self, other: &Self) -> bool {
                    self.align_offset(other) == 0
                }
            }
        };
    }

    align!(usize);
    align!(u32);

    /// Packs a value and a 6 bit exponent into a single word.
    pub mod pack {
        pub const SHIFT_BITS: u32 = 6;
        pub const VALUE_BITS: u32 = usize::BITS - SHIFT_BITS;
        pub const VALUE_MASK: usize = (1 << VALUE_BITS) - 1;

        #[inline]
        pub const fn pack(value: usize, shift: u32) -> Option<usize> {
            if value > VALUE_MASK || shift >= (1 << SHIFT_BITS) {
                return None;
            }
            Some(((shift as usize) << VALUE_BITS) | value)
        }

        #[inline]
        pub const fn unpack(packed: usize) -> (usize, u32) {
            (packed & VALUE_MASK, (packed >> VALUE_BITS) as u32)
        }
    }
}
