use crate::data::{self, SumPoint};
use crate::number::{AtomicNumber, Number};

use super::{Aggregator, AggregatorConfig};

/// Summarizes a set of measurements as their arithmetic sum.
///
/// The value lives in an atomic cell, so the synchronous hot path never
/// blocks: updates are atomic adds and the collection hand-off is an atomic
/// swap with zero.
pub struct Sum<T: Number> {
    value: T::Atomic,
}

impl<T: Number> Aggregator<T> for Sum<T> {
    fn create(_cfg: &AggregatorConfig) -> Self {
        Sum {
            value: T::Atomic::default(),
        }
    }

    fn update(&self, value: T) {
        self.value.add(value)
    }

    fn synchronized_move(&self, into: &Self) {
        into.value.store(self.value.swap_zero())
    }

    fn merge_into(&self, dst: &Self) {
        dst.value.add(self.value.load())
    }

    fn reset(&self) {
        self.value.swap_zero();
    }

    fn subtract_swap(&self, prior: &Self) {
        prior.value.store(self.value.load() - prior.value.load())
    }

    fn has_data(&self) -> bool {
        self.value.load() != T::default()
    }

    fn snapshot(&self) -> Box<dyn data::Aggregation> {
        Box::new(SumPoint {
            value: self.value.load(),
        })
    }
}
