use std::sync::{Mutex, PoisonError};

use crate::data::{self, HistogramPoint};
use crate::number::Number;

use super::{Aggregator, AggregatorConfig};

/// The explicit bucket boundaries used when neither a view nor a reader
/// provides its own.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

struct Buckets<T> {
    counts: Vec<u64>,
    count: u64,
    sum: T,
}

impl<T: Number> Buckets<T> {
    fn new(slots: usize) -> Buckets<T> {
        Buckets {
            counts: vec![0; slots],
            count: 0,
            sum: T::default(),
        }
    }

    fn record(&mut self, slot: usize, value: T) {
        self.counts[slot] += 1;
        self.count += 1;
        self.sum += value;
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
///
/// Boundaries are sanitized and frozen at creation; only the counts and sum
/// sit behind the lock.
pub struct Histogram<T> {
    bounds: Vec<f64>,
    buckets: Mutex<Buckets<T>>,
}

impl<T: Number> Histogram<T> {
    fn bucket_index(&self, value: T) -> usize {
        // Position of the first boundary not below the value; a measurement
        // equal to a boundary closes that bucket. Anything above the last
        // boundary lands in the trailing slot, which is why `counts` carries
        // one more entry than `bounds`.
        self.bounds
            .partition_point(|&bound| bound < value.into_float())
    }
}

impl<T: Number> Aggregator<T> for Histogram<T> {
    fn create(cfg: &AggregatorConfig) -> Self {
        let mut bounds: Vec<f64> = cfg
            .histogram_boundaries
            .iter()
            .copied()
            .filter(|bound| !bound.is_nan())
            .collect();
        bounds.sort_unstable_by(f64::total_cmp);

        let slots = bounds.len() + 1;
        Histogram {
            bounds,
            buckets: Mutex::new(Buckets::new(slots)),
        }
    }

    fn update(&self, value: T) {
        let slot = self.bucket_index(value);
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.record(slot, value);
    }

    fn synchronized_move(&self, into: &Self) {
        let mut src = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = std::mem::replace(&mut *src, Buckets::new(self.bounds.len() + 1));
        drop(src);

        *into.buckets.lock().unwrap_or_else(PoisonError::into_inner) = drained;
    }

    fn merge_into(&self, dst: &Self) {
        let src = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dst = dst.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        for (d, s) in dst.counts.iter_mut().zip(src.counts.iter()) {
            *d += s;
        }
        dst.count += src.count;
        let sum = src.sum;
        dst.sum += sum;
    }

    fn reset(&self) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        *buckets = Buckets::new(self.bounds.len() + 1);
    }

    fn subtract_swap(&self, prior: &Self) {
        let new = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let mut prior = prior.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        for (p, n) in prior.counts.iter_mut().zip(new.counts.iter()) {
            *p = n.saturating_sub(*p);
        }
        prior.count = new.count.saturating_sub(prior.count);
        let sum = prior.sum;
        prior.sum = new.sum - sum;
    }

    fn has_data(&self) -> bool {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .count
            != 0
    }

    fn snapshot(&self) -> Box<dyn data::Aggregation> {
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        Box::new(HistogramPoint {
            count: buckets.count,
            sum: buckets.sum,
            bounds: self.bounds.clone(),
            bucket_counts: buckets.counts.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new(bounds: &[f64]) -> Histogram<i64> {
        Histogram::create(&AggregatorConfig {
            histogram_boundaries: bounds.to_vec(),
        })
    }

    fn point(h: &Histogram<i64>) -> HistogramPoint<i64> {
        let snap = h.snapshot();
        snap.as_any()
            .downcast_ref::<HistogramPoint<i64>>()
            .unwrap()
            .clone()
    }

    #[test]
    fn boundary_values_fall_in_lower_bucket() {
        let h = new(&[0.0, 5.0, 10.0]);
        h.update(-1); // (-inf, 0]
        h.update(0); // (-inf, 0]
        h.update(1); // (0, 5]
        h.update(5); // (0, 5]
        h.update(10); // (5, 10]
        h.update(11); // (10, +inf)

        let p = point(&h);
        assert_eq!(p.bucket_counts, vec![2, 2, 1, 1]);
        assert_eq!(p.count, 6);
        assert_eq!(p.sum, 26);
        assert_eq!(p.bounds, vec![0.0, 5.0, 10.0]);
    }

    #[test]
    fn unsorted_boundaries_are_sanitized() {
        let h = new(&[10.0, 0.0, 5.0]);
        h.update(7);
        let p = point(&h);
        assert_eq!(p.bounds, vec![0.0, 5.0, 10.0]);
        assert_eq!(p.bucket_counts, vec![0, 0, 1, 0]);
    }

    #[test]
    fn merge_adds_bucketwise() {
        let a = new(&[5.0]);
        let b = new(&[5.0]);
        a.update(1);
        a.update(10);
        b.update(2);

        a.merge_into(&b);
        let p = point(&b);
        assert_eq!(p.bucket_counts, vec![2, 1]);
        assert_eq!(p.count, 3);
        assert_eq!(p.sum, 13);
    }

    #[test]
    fn synchronized_move_drains() {
        let from = new(&[5.0]);
        let to = new(&[5.0]);
        from.update(3);
        from.synchronized_move(&to);

        assert!(!from.has_data());
        assert_eq!(point(&to).count, 1);

        // Move overwrites the destination.
        from.update(8);
        from.synchronized_move(&to);
        let p = point(&to);
        assert_eq!(p.count, 1);
        assert_eq!(p.bucket_counts, vec![0, 1]);
    }

    #[test]
    fn subtract_swap_yields_bucketwise_difference() {
        let current = new(&[5.0]);
        let prior = new(&[5.0]);

        prior.update(1);
        current.update(1);
        current.update(2);
        current.update(9);

        current.subtract_swap(&prior);
        let p = point(&prior);
        assert_eq!(p.count, 2);
        assert_eq!(p.sum, 11);
        assert_eq!(p.bucket_counts, vec![1, 1]);
    }

    #[test]
    fn empty_histogram_has_no_data() {
        let h = new(&[5.0]);
        assert!(!h.has_data());
        h.update(0);
        assert!(h.has_data());
    }
}
