//! Reader identity and per-reader collection defaults.
//!
//! A [`Reader`] stands for one collection endpoint. The engine never drives
//! collection itself; readers (or the code testing them) call
//! `CompiledInstrument::collect` with a [`Sequence`] describing the
//! collection window.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use crate::aggregation::Aggregation;
use crate::aggregator::DEFAULT_HISTOGRAM_BOUNDARIES;
use crate::data::Temporality;
use crate::descriptor::{InstrumentKind, NumberKind};

/// Selects the aggregation a reader uses for an instrument kind when no view
/// decides otherwise.
pub trait AggregationSelector: Send + Sync {
    /// Selects the aggregation for the given instrument kind.
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation;
}

impl<F> AggregationSelector for F
where
    F: Fn(InstrumentKind) -> Aggregation + Send + Sync,
{
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        self(kind)
    }
}

/// The default aggregation selection: sums for counter-like kinds, last
/// value for gauges, explicit-bucket histograms for histograms.
#[derive(Clone, Default, Debug)]
pub struct DefaultAggregationSelector {
    pub(crate) _private: (),
}

impl DefaultAggregationSelector {
    /// Create a new default aggregation selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregationSelector for DefaultAggregationSelector {
    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        match kind {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
            InstrumentKind::ObservableGauge => Aggregation::LastValue,
            // Empty boundaries delegate to the reader's per-number-kind
            // defaults at compile time.
            InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
                boundaries: Vec::new(),
            },
        }
    }
}

/// Selects the temporality a reader uses for an instrument kind.
pub trait TemporalitySelector: Send + Sync {
    /// Selects the temporality for the given instrument kind.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;
}

impl<F> TemporalitySelector for F
where
    F: Fn(InstrumentKind) -> Temporality + Send + Sync,
{
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self(kind)
    }
}

/// The default temporality selection: cumulative for every kind.
#[derive(Clone, Default, Debug)]
pub struct DefaultTemporalitySelector {
    pub(crate) _private: (),
}

impl DefaultTemporalitySelector {
    /// Create a new default temporality selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemporalitySelector for DefaultTemporalitySelector {
    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        Temporality::Cumulative
    }
}

/// A temporality selection preferring deltas wherever they are defined.
///
/// Up-down kinds stay cumulative: their deltas cancel and carry no
/// information on their own.
#[derive(Clone, Default, Debug)]
pub struct DeltaTemporalitySelector {
    pub(crate) _private: (),
}

impl DeltaTemporalitySelector {
    /// Create a new delta-preferring temporality selector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemporalitySelector for DeltaTemporalitySelector {
    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        match kind {
            InstrumentKind::Counter
            | InstrumentKind::Histogram
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableGauge => Temporality::Delta,
            InstrumentKind::UpDownCounter | InstrumentKind::ObservableUpDownCounter => {
                Temporality::Cumulative
            }
        }
    }
}

/// The timestamps framing one collection.
#[derive(Clone, Copy, Debug)]
pub struct Sequence {
    /// When the reader performed its first-ever collection.
    pub start: SystemTime,
    /// When the previous collection happened; equals `start` on the first
    /// collection.
    pub last: SystemTime,
    /// When the current collection is happening.
    pub now: SystemTime,
}

static READER_ID: AtomicUsize = AtomicUsize::new(0);

/// Identity token for one collection endpoint, carrying its aggregation and
/// temporality defaults.
///
/// Readers are identified by a process-unique id: compiled instruments keyed
/// by distinct readers keep fully independent state (see [`Sequence`] and
/// the pipeline multiplexing).
pub struct Reader {
    id: usize,
    temporality_selector: Box<dyn TemporalitySelector>,
    aggregation_selector: Box<dyn AggregationSelector>,
    histogram_boundaries: Option<Vec<f64>>,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader").field("id", &self.id).finish()
    }
}

impl Default for Reader {
    fn default() -> Self {
        Reader::builder().build()
    }
}

impl Reader {
    /// Configuration for a reader.
    pub fn builder() -> ReaderBuilder {
        ReaderBuilder::default()
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// The aggregation this reader uses for `kind` when views leave the
    /// choice open. Never returns [`Aggregation::Default`].
    pub fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        match self.aggregation_selector.aggregation(kind) {
            Aggregation::Default => DefaultAggregationSelector::new().aggregation(kind),
            other => other,
        }
    }

    /// The temporality this reader uses for `kind`.
    pub fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.temporality_selector.temporality(kind)
    }

    /// The histogram bucket boundaries this reader uses for `kind` when a
    /// view does not provide its own.
    pub fn histogram_boundaries(&self, _kind: NumberKind) -> &[f64] {
        match &self.histogram_boundaries {
            Some(bounds) => bounds,
            None => &DEFAULT_HISTOGRAM_BOUNDARIES,
        }
    }
}

/// Configuration for a [`Reader`].
pub struct ReaderBuilder {
    temporality_selector: Box<dyn TemporalitySelector>,
    aggregation_selector: Box<dyn AggregationSelector>,
    histogram_boundaries: Option<Vec<f64>>,
}

impl fmt::Debug for ReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReaderBuilder")
    }
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        ReaderBuilder {
            temporality_selector: Box::new(DefaultTemporalitySelector::new()),
            aggregation_selector: Box::new(DefaultAggregationSelector::new()),
            histogram_boundaries: None,
        }
    }
}

impl ReaderBuilder {
    /// New builder with default selectors.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the [TemporalitySelector] this reader will use to determine the
    /// temporality of an instrument based on its kind.
    pub fn with_temporality_selector(
        mut self,
        temporality_selector: impl TemporalitySelector + 'static,
    ) -> Self {
        self.temporality_selector = Box::new(temporality_selector);
        self
    }

    /// Sets the [AggregationSelector] this reader will use to determine the
    /// aggregation for an instrument based on its kind.
    pub fn with_aggregation_selector(
        mut self,
        aggregation_selector: impl AggregationSelector + 'static,
    ) -> Self {
        self.aggregation_selector = Box::new(aggregation_selector);
        self
    }

    /// Sets this reader's default histogram bucket boundaries.
    pub fn with_histogram_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.histogram_boundaries = Some(boundaries);
        self
    }

    /// Create a new [`Reader`] from this configuration.
    pub fn build(self) -> Reader {
        Reader {
            id: READER_ID.fetch_add(1, Ordering::Relaxed),
            temporality_selector: self.temporality_selector,
            aggregation_selector: self.aggregation_selector,
            histogram_boundaries: self.histogram_boundaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_aggregations() {
        let selector = DefaultAggregationSelector::new();
        assert_eq!(
            selector.aggregation(InstrumentKind::Counter),
            Aggregation::Sum
        );
        assert_eq!(
            selector.aggregation(InstrumentKind::ObservableGauge),
            Aggregation::LastValue
        );
        assert!(matches!(
            selector.aggregation(InstrumentKind::Histogram),
            Aggregation::ExplicitBucketHistogram { .. }
        ));
    }

    #[test]
    fn delta_selector_keeps_updown_cumulative() {
        let selector = DeltaTemporalitySelector::new();
        assert_eq!(
            selector.temporality(InstrumentKind::Counter),
            Temporality::Delta
        );
        assert_eq!(
            selector.temporality(InstrumentKind::UpDownCounter),
            Temporality::Cumulative
        );
    }

    #[test]
    fn readers_have_unique_ids() {
        let a = Reader::default();
        let b = Reader::default();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn reader_resolves_default_aggregation() {
        let reader = Reader::builder()
            .with_aggregation_selector(|_kind: InstrumentKind| Aggregation::Default)
            .build();
        assert_eq!(reader.aggregation(InstrumentKind::Counter), Aggregation::Sum);
    }

    #[test]
    fn histogram_boundaries_override() {
        let reader = Reader::builder()
            .with_histogram_boundaries(vec![1.0, 2.0])
            .build();
        assert_eq!(reader.histogram_boundaries(NumberKind::I64), &[1.0, 2.0]);

        let plain = Reader::default();
        assert_eq!(
            plain.histogram_boundaries(NumberKind::F64),
            &DEFAULT_HISTOGRAM_BOUNDARIES
        );
    }
}
