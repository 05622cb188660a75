//! Numeric kinds the engine aggregates over, with atomic storage support.

use core::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::descriptor::NumberKind;

/// Lock-free storage for one measurement value.
///
/// Integers map onto their native atomics. Floats have no hardware atomics,
/// so [`AtomicF64`] keeps the value as raw bits in an `AtomicU64`.
pub trait AtomicNumber<N>: Default + Send + Sync + 'static {
    fn store(&self, value: N);
    fn add(&self, value: N);
    fn load(&self) -> N;
    /// Read the value and reset it to zero in one atomic step.
    fn swap_zero(&self) -> N;
}

/// The measurement value types instruments are declared over.
pub trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
{
    /// An atomic cell capable of holding this type.
    type Atomic: AtomicNumber<Self>;

    /// The runtime tag matching this type.
    fn kind() -> NumberKind;

    fn into_float(self) -> f64;
}

impl Number for i64 {
    type Atomic = AtomicI64;

    fn kind() -> NumberKind {
        NumberKind::I64
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }
}

impl Number for f64 {
    type Atomic = AtomicF64;

    fn kind() -> NumberKind {
        NumberKind::F64
    }

    fn into_float(self) -> f64 {
        self
    }
}

impl AtomicNumber<i64> for AtomicI64 {
    fn store(&self, value: i64) {
        AtomicI64::store(self, value, Ordering::Relaxed);
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn load(&self) -> i64 {
        AtomicI64::load(self, Ordering::Relaxed)
    }

    fn swap_zero(&self) -> i64 {
        self.swap(0, Ordering::Relaxed)
    }
}

/// An `f64` cell backed by the value's bit pattern.
#[derive(Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicNumber<f64> for AtomicF64 {
    fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, value: f64) {
        // fetch_update retries the closure until no other writer races this
        // read-modify-write.
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn swap_zero(&self) -> f64 {
        f64::from_bits(self.bits.swap(0.0_f64.to_bits(), Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // std atomics carry inherent methods with the same names as the trait,
    // so exercise cells exactly as the engine does: through the `Number`
    // bound. Values are binary fractions so equality is exact for f64 too.

    fn adds_and_resets<T: Number>(a: T, b: T, total: T) {
        let cell = T::Atomic::default();
        cell.add(a);
        cell.add(b);
        assert_eq!(cell.load(), total);

        assert_eq!(cell.swap_zero(), total);
        assert_eq!(cell.load(), T::default());
    }

    fn store_overwrites<T: Number>(first: T, second: T) {
        let cell = T::Atomic::default();
        cell.add(first);
        cell.store(second);
        assert_eq!(cell.load(), second);
    }

    #[test]
    fn i64_cell_adds_and_resets() {
        adds_and_resets(15i64, -10, 5);
    }

    #[test]
    fn f64_cell_adds_and_resets() {
        adds_and_resets(15.25f64, 10.5, 25.75);
    }

    #[test]
    fn i64_cell_store_overwrites() {
        store_overwrites(3i64, -25);
    }

    #[test]
    fn f64_cell_round_trips_through_bits() {
        store_overwrites(1.25f64, -15.5);
    }

    #[test]
    fn concurrent_f64_adds_lose_nothing() {
        let cell = Arc::new(<f64 as Number>::Atomic::default());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cell.add(0.5);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(cell.load(), 2000.0);
    }
}
