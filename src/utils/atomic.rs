use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Integer atomics that the lock-free update primitives operate on.
///
/// All loads are relaxed and all updates are plain compare-and-swap:
/// the algorithms in this crate order their phases with fork/join
/// barriers, not with acquire/release pairs on individual cells.
pub trait AtomicInt {
    type Value: Copy + Ord;

    fn load_relaxed(&self) -> Self::Value;

    /// Weak compare-and-swap; on failure returns the value actually read.
    fn cas_weak(&self, current: Self::Value, new: Self::Value)
        -> Result<Self::Value, Self::Value>;
}

macro_rules! impl_atomic_int {
    ($atomic:ty, $value:ty) => {
        impl AtomicInt for $atomic {
            type Value = $value;

            #[inline(always)]
            fn load_relaxed(&self) -> $value {
                self.load(Ordering::Relaxed)
            }

            #[inline(always)]
            fn cas_weak(&self, current: $value, new: $value) -> Result<$value, $value> {
                self.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed)
            }
        }
    };
}

impl_atomic_int!(AtomicU32, u32);
impl_atomic_int!(AtomicU64, u64);
impl_atomic_int!(AtomicUsize, usize);

/// Writes `b` into `a` iff it is a strict improvement (smaller).
///
/// Returns whether this call performed the write. Concurrent callers may
/// all fail if a third party wrote something smaller than every `b`.
#[inline]
pub fn write_min<A: AtomicInt>(a: &A, b: A::Value) -> bool {
    let mut current = a.load_relaxed();
    while b < current {
        match a.cas_weak(current, b) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
    false
}

/// Writes `b` into `a` iff it is a strict improvement (larger).
#[inline]
pub fn write_max<A: AtomicInt>(a: &A, b: A::Value) -> bool {
    let mut current = a.load_relaxed();
    while current < b {
        match a.cas_weak(current, b) {
            Ok(_) => return true,
            Err(actual) => current = actual,
        }
    }
    false
}

/// Adds `delta` to `a`, but only commits while the observed value is
/// strictly above `floor`. Returns the observed value and whether the
/// update committed.
///
/// This is the k-core decrement primitive: concurrent `-1` updates can
/// never drag a remaining-degree below the level currently being peeled.
#[inline]
pub fn fetch_and_add_bounded(a: &AtomicU32, delta: i32, floor: u32) -> (u32, bool) {
    let mut old = a.load(Ordering::Relaxed);
    while old > floor {
        let new = old.wrapping_add_signed(delta);
        match a.compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return (old, true),
            Err(actual) => old = actual,
        }
    }
    (old, false)
}

/// 32-bit deterministic hash finalizer.
#[inline(always)]
pub fn hash32(mut a: u32) -> u32 {
    a = a.wrapping_add(0x7ed55d16).wrapping_add(a << 12);
    a = (a ^ 0xc761c23c) ^ (a >> 19);
    a = a.wrapping_add(0x165667b1).wrapping_add(a << 5);
    a = a.wrapping_add(0xd3a2646c) ^ (a << 9);
    a = a.wrapping_add(0xfd7046c5).wrapping_add(a << 3);
    a = (a ^ 0xb55a4f09) ^ (a >> 16);
    a
}

/// 64-bit deterministic hash finalizer.
#[inline(always)]
pub fn hash64(mut u: u64) -> u64 {
    u = u
        .wrapping_mul(3935559000370003845)
        .wrapping_add(2691343689449507681);
    u ^= u >> 21;
    u ^= u << 37;
    u ^= u >> 4;
    u = u.wrapping_mul(4768777513237032717);
    u ^= u << 20;
    u ^= u >> 41;
    u ^= u << 5;
    u
}

/// Smallest `k` with `2^k >= x` (`x >= 1`).
#[inline(always)]
pub fn log2_up(x: usize) -> u32 {
    usize::BITS - (x.max(1) - 1).leading_zeros()
}
