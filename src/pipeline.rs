//! View compilation and the aggregation pipelines it produces.
//!
//! [`Compiler::compile`] turns one instrument descriptor into a
//! [`CompiledInstrument`]: zero or more aggregation pipelines, one per
//! (reader, matched view) pair. Each pipeline owns a map from attribute set
//! to aggregation storage, guarded by a mutex that the measurement hot path
//! never takes; accumulators hand their data to the pipeline only at
//! collection time.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::{InstrumentationScope, Key, KeyValue};

use crate::aggregation::Aggregation;
use crate::aggregator::{Aggregator, AggregatorConfig, Histogram, LastValue, Sum};
use crate::attributes::AttributeSet;
use crate::data::{Metric, Series, Temporality};
use crate::descriptor::Descriptor;
use crate::error::{handle_error, MetricError};
use crate::number::Number;
use crate::reader::{Reader, Sequence};
use crate::view::View;

/// Receives measurements for one attribute set and forwards the accumulated
/// state to its pipeline at collection time.
///
/// Synchronous accumulators live for the lifetime of their instrument and
/// are flushed on every collection; asynchronous accumulators live for a
/// single callback run.
pub trait Accumulator<N: Number>: Send + Sync {
    /// Absorb one measurement.
    fn update(&self, value: N);

    /// Flush accumulated state into the pipeline's output cell.
    fn accumulate(&self);
}

/// One compiled aggregation pipeline: the storage cells and collection
/// behavior for a single (reader, view) pair.
pub(crate) trait Pipeline<N: Number>: Send + Sync + 'static {
    fn new_accumulator(&self, attrs: &[KeyValue]) -> Arc<dyn Accumulator<N>>;

    fn collect(&self, sequence: &Sequence, output: &mut Vec<Metric>);
}

/// Storage cells shared by every pipeline flavor.
struct BaseMetric<N: Number, A: Aggregator<N>> {
    descriptor: Descriptor,
    config: AggregatorConfig,
    keys: Option<Arc<HashSet<Key>>>,
    cells: Mutex<HashMap<AttributeSet, Arc<A>>>,
    _number: PhantomData<fn() -> N>,
}

impl<N: Number, A: Aggregator<N>> BaseMetric<N, A> {
    fn new(behavior: &ConfiguredBehavior) -> Self {
        BaseMetric {
            descriptor: behavior.descriptor.clone(),
            config: behavior.config.clone(),
            keys: behavior.keys.clone(),
            cells: Mutex::new(HashMap::new()),
            _number: PhantomData,
        }
    }

    fn new_storage(&self) -> A {
        A::create(&self.config)
    }

    /// The output cell for `attrs`, allocated on first use.
    fn find_output(&self, attrs: &[KeyValue]) -> Arc<A> {
        let set = match &self.keys {
            Some(keys) => AttributeSet::with_filter(attrs, keys),
            None => AttributeSet::from(attrs),
        };

        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cells
                .entry(set)
                .or_insert_with(|| Arc::new(A::create(&self.config))),
        )
    }

    fn empty_metric(&self, temporality: Temporality) -> Metric {
        Metric {
            descriptor: self.descriptor.clone(),
            temporality,
            series: Vec::new(),
        }
    }
}

/// Accumulator for synchronous instruments.
///
/// `update` goes straight into `current` through the kernel's own
/// synchronization; `accumulate` is the only point where data leaves the
/// accumulator.
struct SyncAccumulator<N: Number, A: Aggregator<N>> {
    current: A,
    snapshot: A,
    output: Arc<A>,
    _number: PhantomData<fn() -> N>,
}

impl<N: Number, A: Aggregator<N>> Accumulator<N> for SyncAccumulator<N, A> {
    fn update(&self, value: N) {
        self.current.update(value)
    }

    fn accumulate(&self) {
        self.current.synchronized_move(&self.snapshot);
        self.snapshot.merge_into(&self.output);
    }
}

/// Accumulator for one (reader, attribute set) pair within a single callback
/// run. The last observation wins.
struct AsyncAccumulator<N: Number, A: Aggregator<N>> {
    current: Mutex<Option<N>>,
    snapshot: A,
    output: Arc<A>,
}

impl<N: Number, A: Aggregator<N>> Accumulator<N> for AsyncAccumulator<N, A> {
    fn update(&self, value: N) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    fn accumulate(&self) {
        // Hold the lock so a concurrent observation cannot interleave with
        // the flush.
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = *current {
            self.snapshot.reset();
            self.snapshot.update(value);
            self.snapshot.merge_into(&self.output);
        }
    }
}

/// Discards everything. Returned when compilation produced no pipeline for
/// the requested instrument or reader.
struct NoopAccumulator;

impl<N: Number> Accumulator<N> for NoopAccumulator {
    fn update(&self, _value: N) {}
    fn accumulate(&self) {}
}

/// Fans measurements out to one child per pipeline.
struct MultiAccumulator<N: Number>(Vec<Arc<dyn Accumulator<N>>>);

impl<N: Number> Accumulator<N> for MultiAccumulator<N> {
    fn update(&self, value: N) {
        for child in &self.0 {
            child.update(value);
        }
    }

    fn accumulate(&self) {
        for child in &self.0 {
            child.accumulate();
        }
    }
}

/// Synchronous pipeline emitting deltas: cells are drained on every
/// collection and removed once they go quiet.
struct DeltaSyncPipeline<N: Number, A: Aggregator<N>> {
    base: BaseMetric<N, A>,
}

impl<N: Number, A: Aggregator<N>> Pipeline<N> for DeltaSyncPipeline<N, A> {
    fn new_accumulator(&self, attrs: &[KeyValue]) -> Arc<dyn Accumulator<N>> {
        Arc::new(SyncAccumulator {
            current: self.base.new_storage(),
            snapshot: self.base.new_storage(),
            output: self.base.find_output(attrs),
            _number: PhantomData,
        })
    }

    fn collect(&self, sequence: &Sequence, output: &mut Vec<Metric>) {
        let mut metric = self.base.empty_metric(Temporality::Delta);

        let mut cells = self
            .base
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cells.retain(|set, storage| {
            if !storage.has_data() {
                return false;
            }

            // Copy out and reset in place; the cell stays allocated for the
            // live hot path.
            let fresh = self.base.new_storage();
            storage.merge_into(&fresh);
            storage.reset();

            metric.series.push(Series {
                attributes: set.clone(),
                aggregation: fresh.snapshot(),
                start: sequence.last,
                end: sequence.now,
            });
            true
        });
        drop(cells);

        output.push(metric);
    }
}

/// Synchronous pipeline emitting cumulative totals: cells persist and are
/// snapshotted without reset.
struct CumulativeSyncPipeline<N: Number, A: Aggregator<N>> {
    base: BaseMetric<N, A>,
}

impl<N: Number, A: Aggregator<N>> Pipeline<N> for CumulativeSyncPipeline<N, A> {
    fn new_accumulator(&self, attrs: &[KeyValue]) -> Arc<dyn Accumulator<N>> {
        Arc::new(SyncAccumulator {
            current: self.base.new_storage(),
            snapshot: self.base.new_storage(),
            output: self.base.find_output(attrs),
            _number: PhantomData,
        })
    }

    fn collect(&self, sequence: &Sequence, output: &mut Vec<Metric>) {
        let mut metric = self.base.empty_metric(Temporality::Cumulative);

        let cells = self
            .base
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (set, storage) in cells.iter() {
            metric.series.push(Series {
                attributes: set.clone(),
                aggregation: storage.snapshot(),
                start: sequence.last,
                end: sequence.now,
            });
        }
        drop(cells);

        output.push(metric);
    }
}

/// Asynchronous pipeline emitting cumulative totals: observer callbacks
/// rebuild the cell map on every run, so collection empties it.
struct CumulativeAsyncPipeline<N: Number, A: Aggregator<N>> {
    base: BaseMetric<N, A>,
}

impl<N: Number, A: Aggregator<N>> Pipeline<N> for CumulativeAsyncPipeline<N, A> {
    fn new_accumulator(&self, attrs: &[KeyValue]) -> Arc<dyn Accumulator<N>> {
        Arc::new(AsyncAccumulator {
            current: Mutex::new(None),
            snapshot: self.base.new_storage(),
            output: self.base.find_output(attrs),
        })
    }

    fn collect(&self, sequence: &Sequence, output: &mut Vec<Metric>) {
        let mut metric = self.base.empty_metric(Temporality::Cumulative);

        let mut cells = self
            .base
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (set, storage) in cells.drain() {
            metric.series.push(Series {
                attributes: set,
                aggregation: storage.snapshot(),
                start: sequence.start,
                end: sequence.now,
            });
        }
        drop(cells);

        output.push(metric);
    }
}

/// Asynchronous pipeline converting cumulative observations to deltas
/// against the previous collection's values.
struct DeltaAsyncPipeline<N: Number, A: Aggregator<N>> {
    base: BaseMetric<N, A>,
    prior: Mutex<HashMap<AttributeSet, Arc<A>>>,
}

impl<N: Number, A: Aggregator<N>> Pipeline<N> for DeltaAsyncPipeline<N, A> {
    fn new_accumulator(&self, attrs: &[KeyValue]) -> Arc<dyn Accumulator<N>> {
        Arc::new(AsyncAccumulator {
            current: Mutex::new(None),
            snapshot: self.base.new_storage(),
            output: self.base.find_output(attrs),
        })
    }

    fn collect(&self, sequence: &Sequence, output: &mut Vec<Metric>) {
        let mut metric = self.base.empty_metric(Temporality::Delta);
        let gauge_like = !self.base.descriptor.instrument_kind().has_temporality();

        let mut cells = self
            .base
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut prior = self.prior.lock().unwrap_or_else(PoisonError::into_inner);

        for (set, storage) in cells.iter() {
            let aggregation = match prior.get(set) {
                Some(pval) => {
                    // pval becomes storage - pval.
                    storage.subtract_swap(pval);
                    if !pval.has_data() {
                        continue;
                    }
                    // Emit the difference, except gauges report the new
                    // value outright.
                    if gauge_like {
                        storage.snapshot()
                    } else {
                        pval.snapshot()
                    }
                }
                None => storage.snapshot(),
            };

            metric.series.push(Series {
                attributes: set.clone(),
                aggregation,
                start: sequence.start,
                end: sequence.now,
            });
        }

        // The cumulative values just observed become the baseline for the
        // next collection's deltas.
        *prior = std::mem::take(&mut *cells);
        drop(prior);
        drop(cells);

        output.push(metric);
    }
}

/// The aggregation behavior one (reader, view) pair settled on.
struct ConfiguredBehavior {
    descriptor: Descriptor,
    kind: Aggregation,
    keys: Option<Arc<HashSet<Key>>>,
    config: AggregatorConfig,
    reader: Arc<Reader>,
}

fn build_view<N: Number>(behavior: &ConfiguredBehavior) -> Arc<dyn Pipeline<N>> {
    if behavior.descriptor.instrument_kind().is_synchronous() {
        build_sync(behavior)
    } else {
        build_async(behavior)
    }
}

fn build_sync<N: Number>(behavior: &ConfiguredBehavior) -> Arc<dyn Pipeline<N>> {
    match behavior.kind {
        Aggregation::LastValue => sync_pipeline::<N, LastValue<N>>(behavior),
        Aggregation::ExplicitBucketHistogram { .. } => {
            sync_pipeline::<N, Histogram<N>>(behavior)
        }
        _ => sync_pipeline::<N, Sum<N>>(behavior),
    }
}

fn build_async<N: Number>(behavior: &ConfiguredBehavior) -> Arc<dyn Pipeline<N>> {
    match behavior.kind {
        Aggregation::LastValue => async_pipeline::<N, LastValue<N>>(behavior),
        Aggregation::ExplicitBucketHistogram { .. } => {
            async_pipeline::<N, Histogram<N>>(behavior)
        }
        _ => async_pipeline::<N, Sum<N>>(behavior),
    }
}

fn sync_pipeline<N: Number, A: Aggregator<N>>(
    behavior: &ConfiguredBehavior,
) -> Arc<dyn Pipeline<N>> {
    let base: BaseMetric<N, A> = BaseMetric::new(behavior);
    match behavior
        .reader
        .temporality(behavior.descriptor.instrument_kind())
    {
        Temporality::Delta => Arc::new(DeltaSyncPipeline { base }),
        _ => Arc::new(CumulativeSyncPipeline { base }),
    }
}

fn async_pipeline<N: Number, A: Aggregator<N>>(
    behavior: &ConfiguredBehavior,
) -> Arc<dyn Pipeline<N>> {
    let base: BaseMetric<N, A> = BaseMetric::new(behavior);
    match behavior
        .reader
        .temporality(behavior.descriptor.instrument_kind())
    {
        // Producing deltas from cumulative observations requires the prior
        // collection's values.
        Temporality::Delta => Arc::new(DeltaAsyncPipeline {
            base,
            prior: Mutex::new(HashMap::new()),
        }),
        _ => Arc::new(CumulativeAsyncPipeline { base }),
    }
}

enum CompiledKind<N: Number> {
    /// No reader wants this instrument; measurements are discarded.
    Null,
    /// Exactly one pipeline exists, owned by one reader.
    Single {
        reader: usize,
        pipeline: Arc<dyn Pipeline<N>>,
    },
    /// Pipelines multiplexed by reader.
    Multi(HashMap<usize, Vec<Arc<dyn Pipeline<N>>>>),
}

/// The compilation result for one instrument descriptor: every aggregation
/// pipeline the configured views and readers asked for.
pub struct CompiledInstrument<N: Number> {
    inner: CompiledKind<N>,
}

impl<N: Number> CompiledInstrument<N> {
    /// True when no reader consumes this instrument and every measurement is
    /// a no-op.
    pub fn is_null(&self) -> bool {
        matches!(self.inner, CompiledKind::Null)
    }

    /// A new accumulator bound to `attrs`.
    ///
    /// With `reader: None` the accumulator feeds every pipeline of every
    /// reader (synchronous instruments, built once at instrument creation).
    /// With a reader it feeds only that reader's pipelines (asynchronous
    /// instruments, built per callback run).
    pub fn new_accumulator(
        &self,
        attrs: &[KeyValue],
        reader: Option<&Reader>,
    ) -> Arc<dyn Accumulator<N>> {
        match &self.inner {
            CompiledKind::Null => Arc::new(NoopAccumulator),
            CompiledKind::Single {
                reader: owner,
                pipeline,
            } => match reader {
                Some(r) if r.id() != *owner => Arc::new(NoopAccumulator),
                _ => pipeline.new_accumulator(attrs),
            },
            CompiledKind::Multi(pipelines) => {
                let children: Vec<_> = match reader {
                    Some(r) => pipelines
                        .get(&r.id())
                        .into_iter()
                        .flatten()
                        .map(|p| p.new_accumulator(attrs))
                        .collect(),
                    None => pipelines
                        .values()
                        .flatten()
                        .map(|p| p.new_accumulator(attrs))
                        .collect(),
                };
                match children.len() {
                    0 => Arc::new(NoopAccumulator),
                    1 => children.into_iter().next().expect("length checked"),
                    _ => Arc::new(MultiAccumulator(children)),
                }
            }
        }
    }

    /// Append this instrument's series for `reader` to `output`.
    pub fn collect(&self, reader: &Reader, sequence: &Sequence, output: &mut Vec<Metric>) {
        match &self.inner {
            CompiledKind::Null => {}
            CompiledKind::Single {
                reader: owner,
                pipeline,
            } => {
                if reader.id() == *owner {
                    pipeline.collect(sequence, output);
                }
            }
            CompiledKind::Multi(pipelines) => {
                if let Some(list) = pipelines.get(&reader.id()) {
                    for pipeline in list {
                        pipeline.collect(sequence, output);
                    }
                }
            }
        }
    }
}

static COMPILER_ID: AtomicUsize = AtomicUsize::new(0);

/// Compiles instrument descriptors against a set of views and readers.
///
/// One compiler exists per (provider, instrumentation scope); the compiled
/// instruments it produces are saved by the instrument facade and used for
/// the instrument's lifetime.
pub struct Compiler {
    id: usize,
    scope: InstrumentationScope,
    views: Vec<View>,
    readers: Vec<Arc<Reader>>,

    /// Per-reader set of emitted stream names, indexed by the reader's
    /// position in `readers`.
    names: Mutex<Vec<HashSet<String>>>,
}

impl Compiler {
    /// A compiler for instruments created by `scope`, against the given
    /// views and readers.
    pub fn new(
        scope: InstrumentationScope,
        views: Vec<View>,
        readers: Vec<Arc<Reader>>,
    ) -> Self {
        let names = readers.iter().map(|_| HashSet::new()).collect();
        Compiler {
            id: COMPILER_ID.fetch_add(1, Ordering::Relaxed),
            scope,
            views,
            readers,
            names: Mutex::new(names),
        }
    }

    /// The readers this compiler serves, in registration order.
    pub fn readers(&self) -> &[Arc<Reader>] {
        &self.readers
    }

    pub(crate) fn provider_id(&self) -> usize {
        self.id
    }

    /// Compile `descriptor` into the pipelines the configured views and
    /// readers ask for.
    ///
    /// Compilation never fails: conflicting or invalid view combinations are
    /// reported through the global error handler and skipped, and an
    /// instrument nobody consumes compiles to a null instrument.
    pub fn compile<N: Number>(&self, descriptor: &Descriptor) -> CompiledInstrument<N> {
        if descriptor.number_kind() != N::kind() {
            handle_error(MetricError::Config(format!(
                "instrument {} expects {:?} measurements",
                descriptor.name(),
                descriptor.number_kind(),
            )));
            return CompiledInstrument {
                inner: CompiledKind::Null,
            };
        }

        let matched: Vec<&View> = self
            .views
            .iter()
            .filter(|view| view.matches(&self.scope, descriptor))
            .collect();

        let mut configs: Vec<Vec<ConfiguredBehavior>> =
            self.readers.iter().map(|_| Vec::new()).collect();

        for (reader_idx, reader) in self.readers.iter().enumerate() {
            for view in &matched {
                let kind = match view.aggregation() {
                    Some(Aggregation::Drop) => continue,
                    Some(Aggregation::Default) | None => {
                        reader.aggregation(descriptor.instrument_kind())
                    }
                    Some(explicit) => explicit.clone(),
                };
                if matches!(kind, Aggregation::Drop) {
                    continue;
                }

                configs[reader_idx].push(ConfiguredBehavior {
                    descriptor: view.rewrite(descriptor),
                    config: self.aggregator_config(&kind, reader, descriptor),
                    kind,
                    keys: view.keys().cloned(),
                    reader: Arc::clone(reader),
                });
            }

            // If there were no matching views, use the reader's default
            // aggregation.
            if matched.is_empty() {
                let kind = reader.aggregation(descriptor.instrument_kind());
                if matches!(kind, Aggregation::Drop) {
                    continue;
                }

                configs[reader_idx].push(ConfiguredBehavior {
                    descriptor: descriptor.clone(),
                    config: self.aggregator_config(&kind, reader, descriptor),
                    kind,
                    keys: None,
                    reader: Arc::clone(reader),
                });
            }
        }

        let mut compiled: HashMap<usize, Vec<Arc<dyn Pipeline<N>>>> = HashMap::new();

        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        for (reader_idx, behaviors) in configs.into_iter().enumerate() {
            let reader_id = self.readers[reader_idx].id();

            for behavior in behaviors {
                if !names[reader_idx].insert(behavior.descriptor.name().to_string()) {
                    handle_error(MetricError::CompileConflict(
                        behavior.descriptor.name().to_string(),
                    ));
                    continue;
                }

                compiled
                    .entry(reader_id)
                    .or_default()
                    .push(build_view::<N>(&behavior));
            }
        }
        drop(names);

        let total: usize = compiled.values().map(Vec::len).sum();
        let inner = match total {
            0 => CompiledKind::Null,
            // Bypass the reader map when a single pipeline exists.
            1 => {
                let (reader, mut pipelines) = compiled
                    .into_iter()
                    .find(|(_, list)| !list.is_empty())
                    .expect("one pipeline exists");
                CompiledKind::Single {
                    reader,
                    pipeline: pipelines.pop().expect("one pipeline exists"),
                }
            }
            _ => CompiledKind::Multi(compiled),
        };

        CompiledInstrument { inner }
    }

    /// Kernel configuration for `kind`, layering view-specified histogram
    /// boundaries over the reader's per-number-kind defaults.
    fn aggregator_config(
        &self,
        kind: &Aggregation,
        reader: &Reader,
        descriptor: &Descriptor,
    ) -> AggregatorConfig {
        let mut config = AggregatorConfig::default();
        if let Aggregation::ExplicitBucketHistogram { boundaries } = kind {
            config.histogram_boundaries = if boundaries.is_empty() {
                reader
                    .histogram_boundaries(descriptor.number_kind())
                    .to_vec()
            } else {
                boundaries.clone()
            };
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HistogramPoint, SumPoint};
    use crate::descriptor::{InstrumentKind, NumberKind};
    use crate::error::tests::CapturedErrors;
    use crate::reader::DeltaTemporalitySelector;
    use std::time::{Duration, SystemTime};

    fn scope() -> InstrumentationScope {
        InstrumentationScope::builder("test-lib").build()
    }

    fn counter(name: &'static str) -> Descriptor {
        Descriptor::new(name, InstrumentKind::Counter, NumberKind::I64, "", "")
    }

    fn times() -> (SystemTime, SystemTime, SystemTime, SystemTime) {
        let t0 = SystemTime::now();
        (
            t0,
            t0 + Duration::from_secs(1),
            t0 + Duration::from_secs(2),
            t0 + Duration::from_secs(3),
        )
    }

    fn sequence(start: SystemTime, last: SystemTime, now: SystemTime) -> Sequence {
        Sequence { start, last, now }
    }

    fn sum_value(metric: &Metric, idx: usize) -> i64 {
        metric.series[idx]
            .point::<SumPoint<i64>>()
            .expect("sum point")
            .value
    }

    #[test]
    fn sync_counter_cumulative() {
        let reader = Arc::new(Reader::default());
        let compiler = Compiler::new(scope(), vec![], vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));
        assert!(!compiled.is_null());

        let attrs = [KeyValue::new("a", 1)];
        let accumulator = compiled.new_accumulator(&attrs, None);
        accumulator.update(3);
        accumulator.update(4);
        accumulator.update(5);
        accumulator.accumulate();

        let (t0, t1, t2, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].temporality, Temporality::Cumulative);
        assert_eq!(output[0].series.len(), 1);
        assert_eq!(sum_value(&output[0], 0), 12);
        assert_eq!(output[0].series[0].start, t0);
        assert_eq!(output[0].series[0].end, t1);

        // No further updates: the cumulative total persists.
        accumulator.accumulate();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t1, t2), &mut output);
        assert_eq!(sum_value(&output[0], 0), 12);
        assert_eq!(output[0].series[0].start, t1);
        assert_eq!(output[0].series[0].end, t2);
    }

    #[test]
    fn sync_counter_delta() {
        let reader = Arc::new(
            Reader::builder()
                .with_temporality_selector(DeltaTemporalitySelector::new())
                .build(),
        );
        let compiler = Compiler::new(scope(), vec![], vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));

        let attrs = [KeyValue::new("a", 1)];
        let accumulator = compiled.new_accumulator(&attrs, None);
        accumulator.update(3);
        accumulator.update(4);
        accumulator.update(5);
        accumulator.accumulate();

        let (t0, t1, t2, t3) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);
        assert_eq!(output[0].temporality, Temporality::Delta);
        assert_eq!(sum_value(&output[0], 0), 12);

        accumulator.update(1);
        accumulator.accumulate();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t1, t2), &mut output);
        assert_eq!(sum_value(&output[0], 0), 1);
        assert_eq!(output[0].series[0].start, t1);
        assert_eq!(output[0].series[0].end, t2);

        // Nothing recorded since the last collection: the series disappears
        // and its cell is swept.
        accumulator.accumulate();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t2, t3), &mut output);
        assert_eq!(output.len(), 1);
        assert!(output[0].series.is_empty());
    }

    #[test]
    fn attribute_filter_merges_series() {
        let reader = Arc::new(Reader::default());
        let view = View::builder()
            .match_instrument_name("requests")
            .with_attribute_filter([Key::new("k")])
            .build()
            .unwrap();
        let compiler = Compiler::new(scope(), vec![view], vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));

        let first = compiled.new_accumulator(
            &[KeyValue::new("k", "x"), KeyValue::new("other", "p")],
            None,
        );
        let second = compiled.new_accumulator(
            &[KeyValue::new("k", "x"), KeyValue::new("other", "q")],
            None,
        );
        first.update(1);
        second.update(2);
        first.accumulate();
        second.accumulate();

        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);

        assert_eq!(output[0].series.len(), 1);
        assert_eq!(sum_value(&output[0], 0), 3);
        let attrs = &output[0].series[0].attributes;
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.as_slice()[0], KeyValue::new("k", "x"));
    }

    #[test]
    fn duplicate_view_names_conflict() {
        let captured = CapturedErrors::install();

        let reader = Arc::new(Reader::default());
        let views = vec![
            View::builder()
                .match_instrument_name("requests")
                .rename("dup")
                .build()
                .unwrap(),
            View::builder()
                .match_instrument_name("requests")
                .rename("dup")
                .with_description("second")
                .build()
                .unwrap(),
        ];
        let compiler = Compiler::new(scope(), views, vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));

        let errs = captured.take();
        assert!(
            errs.iter()
                .any(|e| matches!(e, MetricError::CompileConflict(name) if name == "dup")),
            "expected a CompileConflict, got {errs:?}"
        );

        // Only the first view produced a pipeline.
        let accumulator = compiled.new_accumulator(&[], None);
        accumulator.update(1);
        accumulator.accumulate();

        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].descriptor.name(), "dup");
        assert_eq!(output[0].descriptor.description(), "");
    }

    #[test]
    fn independent_temporalities_per_reader() {
        let cumulative = Arc::new(Reader::default());
        let delta = Arc::new(
            Reader::builder()
                .with_temporality_selector(DeltaTemporalitySelector::new())
                .build(),
        );
        let compiler = Compiler::new(
            scope(),
            vec![],
            vec![Arc::clone(&cumulative), Arc::clone(&delta)],
        );
        let compiled = compiler.compile::<i64>(&counter("requests"));

        let accumulator = compiled.new_accumulator(&[KeyValue::new("a", 1)], None);
        accumulator.update(10);
        accumulator.accumulate();

        let (t0, t1, t2, _) = times();
        let mut cumulative_out = vec![];
        compiled.collect(&cumulative, &sequence(t0, t0, t1), &mut cumulative_out);
        let mut delta_out = vec![];
        compiled.collect(&delta, &sequence(t0, t0, t1), &mut delta_out);

        assert_eq!(cumulative_out[0].temporality, Temporality::Cumulative);
        assert_eq!(delta_out[0].temporality, Temporality::Delta);
        assert_eq!(sum_value(&cumulative_out[0], 0), 10);
        assert_eq!(sum_value(&delta_out[0], 0), 10);

        accumulator.update(5);
        accumulator.accumulate();

        let mut cumulative_out = vec![];
        compiled.collect(&cumulative, &sequence(t0, t1, t2), &mut cumulative_out);
        let mut delta_out = vec![];
        compiled.collect(&delta, &sequence(t0, t1, t2), &mut delta_out);

        // The cumulative reader sees the running total, the delta reader only
        // the change.
        assert_eq!(sum_value(&cumulative_out[0], 0), 15);
        assert_eq!(sum_value(&delta_out[0], 0), 5);
    }

    #[test]
    fn drop_aggregation_compiles_to_null() {
        let reader = Arc::new(Reader::default());
        let view = View::builder()
            .match_instrument_name("requests")
            .with_aggregation(Aggregation::Drop)
            .build()
            .unwrap();
        let compiler = Compiler::new(scope(), vec![view], vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));
        assert!(compiled.is_null());

        // Null instruments swallow everything.
        let accumulator = compiled.new_accumulator(&[], None);
        accumulator.update(5);
        accumulator.accumulate();
        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);
        assert!(output.is_empty());
    }

    #[test]
    fn histogram_view_boundaries_apply() {
        let reader = Arc::new(Reader::default());
        let view = View::builder()
            .match_instrument_name("latency")
            .with_aggregation(Aggregation::ExplicitBucketHistogram {
                boundaries: vec![10.0, 100.0],
            })
            .build()
            .unwrap();
        let compiler = Compiler::new(scope(), vec![view], vec![Arc::clone(&reader)]);
        let descriptor = Descriptor::new(
            "latency",
            InstrumentKind::Histogram,
            NumberKind::F64,
            "",
            "ms",
        );
        let compiled = compiler.compile::<f64>(&descriptor);

        let accumulator = compiled.new_accumulator(&[], None);
        accumulator.update(5.0);
        accumulator.update(50.0);
        accumulator.update(500.0);
        accumulator.accumulate();

        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);

        let point = output[0].series[0]
            .point::<HistogramPoint<f64>>()
            .expect("histogram point");
        assert_eq!(point.bounds, vec![10.0, 100.0]);
        assert_eq!(point.bucket_counts, vec![1, 1, 1]);
        assert_eq!(point.count, 3);
        assert!((point.sum - 555.0).abs() < f64::EPSILON);
    }

    #[test]
    fn number_kind_mismatch_is_null() {
        let captured = CapturedErrors::install();
        let reader = Arc::new(Reader::default());
        let compiler = Compiler::new(scope(), vec![], vec![reader]);

        let compiled = compiler.compile::<f64>(&counter("requests"));
        assert!(compiled.is_null());
        assert!(captured
            .take()
            .iter()
            .any(|e| matches!(e, MetricError::Config(_))));
    }

    #[test]
    fn concurrent_updates_are_all_counted() {
        let reader = Arc::new(Reader::default());
        let compiler = Compiler::new(scope(), vec![], vec![Arc::clone(&reader)]);
        let compiled = Arc::new(compiler.compile::<i64>(&counter("requests")));

        let accumulator = compiled.new_accumulator(&[KeyValue::new("a", 1)], None);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let accumulator = Arc::clone(&accumulator);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        accumulator.update(1);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        accumulator.accumulate();

        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);
        assert_eq!(sum_value(&output[0], 0), 4000);
    }

    #[test]
    fn multiple_views_fan_out_one_update() {
        let reader = Arc::new(Reader::default());
        let views = vec![
            View::builder()
                .match_instrument_name("requests")
                .rename("requests.a")
                .build()
                .unwrap(),
            View::builder()
                .match_instrument_name("requests")
                .rename("requests.b")
                .build()
                .unwrap(),
        ];
        let compiler = Compiler::new(scope(), views, vec![Arc::clone(&reader)]);
        let compiled = compiler.compile::<i64>(&counter("requests"));

        let accumulator = compiled.new_accumulator(&[], None);
        accumulator.update(2);
        accumulator.accumulate();

        let (t0, t1, _, _) = times();
        let mut output = vec![];
        compiled.collect(&reader, &sequence(t0, t0, t1), &mut output);

        let mut names: Vec<_> = output.iter().map(|m| m.descriptor.name()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["requests.a", "requests.b"]);
        assert_eq!(sum_value(&output[0], 0), 2);
        assert_eq!(sum_value(&output[1], 0), 2);
    }
}
