//! Aggregation kernels: the storage types measurements accumulate into.

mod histogram;
mod last_value;
mod sum;

pub use histogram::{Histogram, DEFAULT_HISTOGRAM_BOUNDARIES};
pub use last_value::LastValue;
pub use sum::Sum;

use crate::data;
use crate::descriptor::Descriptor;
use crate::error::{MetricError, MetricResult};
use crate::number::Number;

/// Construction-time configuration shared by every kernel.
///
/// Only histograms carry options today; the other kernels ignore it.
#[derive(Clone, Debug, Default)]
pub struct AggregatorConfig {
    /// Explicit bucket boundaries for histogram storage.
    pub histogram_boundaries: Vec<f64>,
}

/// The operations an aggregation storage supports.
///
/// A storage is one cell of aggregated state for a single attribute set.
/// Every method takes `&self`: storages synchronize internally so the
/// measurement hot path never takes a pipeline-wide lock. Implementations
/// are monomorphized per (kernel, number kind), so there is no dynamic
/// dispatch on the measurement path.
pub trait Aggregator<N: Number>: Send + Sync + Sized + 'static {
    /// A zero-valued storage, ready to accept updates.
    fn create(cfg: &AggregatorConfig) -> Self;

    /// Absorb a single measurement.
    fn update(&self, value: N);

    /// Atomically move the accumulated value into `into`, leaving `self`
    /// empty and valid for immediate further updates. `into` is overwritten.
    fn synchronized_move(&self, into: &Self);

    /// Fold `self` into `dst`. `self` is left unchanged.
    fn merge_into(&self, dst: &Self);

    /// Return to the `create` state.
    fn reset(&self);

    /// Compute `prior := self - prior`, for cumulative-to-delta conversion.
    fn subtract_swap(&self, prior: &Self);

    /// Has the state changed since `create`?
    fn has_data(&self) -> bool;

    /// An owned, read-only copy of the state suitable for emission.
    fn snapshot(&self) -> Box<dyn data::Aggregation>;
}

/// Validates a measurement against the instrument's numeric domain.
///
/// NaN is never aggregable; monotonic instruments additionally refuse
/// negative increments. Violations are reported by the caller and the
/// measurement is dropped.
pub(crate) fn range_test<N: Number>(value: N, descriptor: &Descriptor) -> MetricResult<()> {
    let as_float = value.into_float();
    if as_float.is_nan() {
        return Err(MetricError::InvalidObservation(format!(
            "NaN value recorded for {}",
            descriptor.name()
        )));
    }
    if descriptor.instrument_kind().is_monotonic() && as_float < 0.0 {
        return Err(MetricError::InvalidObservation(format!(
            "negative value recorded for monotonic instrument {}",
            descriptor.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InstrumentKind, NumberKind};

    fn counter() -> Descriptor {
        Descriptor::new("c", InstrumentKind::Counter, NumberKind::F64, "", "")
    }

    fn updown() -> Descriptor {
        Descriptor::new("ud", InstrumentKind::UpDownCounter, NumberKind::F64, "", "")
    }

    #[test]
    fn nan_is_rejected_everywhere() {
        assert!(range_test(f64::NAN, &counter()).is_err());
        assert!(range_test(f64::NAN, &updown()).is_err());
    }

    #[test]
    fn negative_rejected_only_for_monotonic() {
        assert!(range_test(-1.0, &counter()).is_err());
        assert!(range_test(-1.0, &updown()).is_ok());
        assert!(range_test(-1i64, &updown()).is_ok());
        assert!(range_test(1.0, &counter()).is_ok());
    }
}
