use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::data::{self, GaugePoint};
use crate::number::Number;

use super::{Aggregator, AggregatorConfig};

#[derive(Clone, Copy, Debug)]
struct Sample<T> {
    value: T,
    observed_at: SystemTime,
}

/// Summarizes a set of measurements as the last one made.
pub struct LastValue<T> {
    sample: Mutex<Option<Sample<T>>>,
}

impl<T> LastValue<T> {
    fn get(&self) -> Option<Sample<T>>
    where
        T: Copy,
    {
        *self.sample.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, sample: Option<Sample<T>>) {
        *self.sample.lock().unwrap_or_else(PoisonError::into_inner) = sample;
    }
}

impl<T: Number> Aggregator<T> for LastValue<T> {
    fn create(_cfg: &AggregatorConfig) -> Self {
        LastValue {
            sample: Mutex::new(None),
        }
    }

    fn update(&self, value: T) {
        self.set(Some(Sample {
            value,
            observed_at: SystemTime::now(),
        }));
    }

    fn synchronized_move(&self, into: &Self) {
        into.set(
            self.sample
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }

    fn merge_into(&self, dst: &Self) {
        let src = match self.get() {
            Some(sample) => sample,
            None => return,
        };
        let mut guard = dst.sample.lock().unwrap_or_else(PoisonError::into_inner);
        // Keep the later of the two samples.
        match *guard {
            Some(existing) if existing.observed_at > src.observed_at => {}
            _ => *guard = Some(src),
        }
    }

    fn reset(&self) {
        self.set(None);
    }

    fn subtract_swap(&self, prior: &Self) {
        // A gauge has no meaningful difference; the new value replaces the
        // prior outright.
        prior.set(self.get());
    }

    fn has_data(&self) -> bool {
        self.sample
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn snapshot(&self) -> Box<dyn data::Aggregation> {
        match self.get() {
            Some(sample) => Box::new(GaugePoint {
                value: sample.value,
                observed_at: sample.observed_at,
            }),
            None => Box::new(GaugePoint {
                value: T::default(),
                observed_at: SystemTime::UNIX_EPOCH,
            }),
        }
    }
}
