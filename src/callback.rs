//! Observation scoping for asynchronous instruments.
//!
//! Observer callbacks run once per reader collection. Observations are only
//! valid inside the callback, against the reader it is currently serving;
//! the [`ObservationScope`] handed to the callback carries that context
//! explicitly rather than through process-global state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::KeyValue;

use crate::aggregator::range_test;
use crate::attributes::AttributeSet;
use crate::data::Metric;
use crate::descriptor::Descriptor;
use crate::error::{handle_error, MetricError, MetricResult};
use crate::number::Number;
use crate::pipeline::{Accumulator, CompiledInstrument, Compiler};
use crate::reader::{Reader, Sequence};

static INSTRUMENT_ID: AtomicUsize = AtomicUsize::new(0);

/// Accumulators for one reader, rebuilt on every callback run.
struct ReaderState<N: Number> {
    store: Mutex<HashMap<AttributeSet, Arc<dyn Accumulator<N>>>>,
}

/// An asynchronous (observer) instrument.
///
/// Holds the compiled pipelines plus one accumulator store per reader. The
/// store fills as the callback observes values and is flushed and discarded
/// by [`accumulate_for`](ObservableInstrument::accumulate_for) after the
/// callback returns.
pub struct ObservableInstrument<N: Number> {
    id: usize,
    provider: usize,
    descriptor: Descriptor,
    compiled: CompiledInstrument<N>,
    state: HashMap<usize, ReaderState<N>>,
}

impl<N: Number> ObservableInstrument<N> {
    /// Compile `descriptor` with `compiler` and attach per-reader
    /// observation state.
    pub fn new(compiler: &Compiler, descriptor: Descriptor) -> Arc<Self> {
        let compiled = compiler.compile::<N>(&descriptor);
        let state = compiler
            .readers()
            .iter()
            .map(|reader| {
                (
                    reader.id(),
                    ReaderState {
                        store: Mutex::new(HashMap::new()),
                    },
                )
            })
            .collect();

        Arc::new(ObservableInstrument {
            id: INSTRUMENT_ID.fetch_add(1, Ordering::Relaxed),
            provider: compiler.provider_id(),
            descriptor,
            compiled,
            state,
        })
    }

    /// The descriptor this instrument was created with.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Record `value` for `attrs` against the reader the scope serves.
    ///
    /// Within one callback run, the last observation per attribute set wins.
    /// Observations against an ended scope, undeclared instruments, and
    /// out-of-range values are reported through the global error handler;
    /// the first and last are dropped.
    pub fn observe(&self, scope: &ObservationScope, value: N, attrs: &[KeyValue]) {
        if !scope.is_live() {
            handle_error(MetricError::ScopeViolation(format!(
                "instrument {} observed outside of a running callback",
                self.descriptor.name()
            )));
            return;
        }
        if !scope.declared.contains(&self.id) {
            // Report and keep going: the observation still has a live
            // reader to land in.
            handle_error(MetricError::ScopeViolation(format!(
                "instrument {} not declared by the running callback",
                self.descriptor.name()
            )));
        }
        if let Err(err) = range_test(value, &self.descriptor) {
            handle_error(err);
            return;
        }

        if let Some(accumulator) = self.get(&scope.reader, attrs) {
            accumulator.update(value);
        }
    }

    /// Flush every accumulator recorded for `reader` into the pipeline
    /// output cells and discard them; the next callback run starts fresh.
    ///
    /// Called after the callback returns, before
    /// [`collect`](ObservableInstrument::collect). Holding the store lock
    /// bounds concurrency to one flush per reader at a time.
    pub fn accumulate_for(&self, reader: &Reader) {
        let Some(state) = self.state.get(&reader.id()) else {
            return;
        };

        let mut store = state.store.lock().unwrap_or_else(PoisonError::into_inner);
        for accumulator in store.values() {
            accumulator.accumulate();
        }
        store.clear();
    }

    /// Append this instrument's series for `reader` to `output`.
    pub fn collect(&self, reader: &Reader, sequence: &Sequence, output: &mut Vec<Metric>) {
        self.compiled.collect(reader, sequence, output)
    }

    /// The accumulator for `(reader, attrs)`, created on first use in the
    /// current callback run.
    fn get(&self, reader: &Reader, attrs: &[KeyValue]) -> Option<Arc<dyn Accumulator<N>>> {
        let Some(state) = self.state.get(&reader.id()) else {
            handle_error(MetricError::Config(format!(
                "instrument {} observed for an unregistered reader",
                self.descriptor.name()
            )));
            return None;
        };

        let set = AttributeSet::from(attrs);
        let mut store = state.store.lock().unwrap_or_else(PoisonError::into_inner);
        let accumulator = store
            .entry(set)
            .or_insert_with(|| self.compiled.new_accumulator(attrs, Some(reader)));
        Some(Arc::clone(accumulator))
    }
}

/// Type-erased handle to an observable instrument, used to declare callback
/// membership across number kinds.
pub trait AnyObservable: Send + Sync {
    /// Process-unique instrument identity.
    fn instrument_id(&self) -> usize;

    /// Identity of the provider that created this instrument.
    fn provider_id(&self) -> usize;

    /// The instrument's name, for diagnostics.
    fn name(&self) -> String;
}

impl<N: Number> AnyObservable for ObservableInstrument<N> {
    fn instrument_id(&self) -> usize {
        self.id
    }

    fn provider_id(&self) -> usize {
        self.provider
    }

    fn name(&self) -> String {
        self.descriptor.name().to_string()
    }
}

/// The context a callback observes through: the reader being served, the
/// instruments the callback declared, and whether the run is still live.
///
/// The scope is cheap to clone so user code may share it with worker
/// threads; once the run returns, every clone is dead and further
/// observations are dropped with a report.
#[derive(Clone)]
pub struct ObservationScope {
    reader: Arc<Reader>,
    declared: Arc<HashSet<usize>>,
    live: Arc<AtomicBool>,
}

impl ObservationScope {
    /// Whether the callback run this scope belongs to is still executing.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// A registered observer callback and the instruments it may observe.
pub struct Callback {
    function: Box<dyn Fn(&ObservationScope) + Send + Sync>,
    declared: Arc<HashSet<usize>>,
}

impl Callback {
    /// Register `function` to observe the given instruments.
    ///
    /// Every instrument must have been created by `compiler`'s provider;
    /// a foreign instrument fails registration with
    /// [`MetricError::ProviderMismatch`].
    pub fn new<F>(
        compiler: &Compiler,
        instruments: &[Arc<dyn AnyObservable>],
        function: F,
    ) -> MetricResult<Callback>
    where
        F: Fn(&ObservationScope) + Send + Sync + 'static,
    {
        let mut declared = HashSet::with_capacity(instruments.len());
        for instrument in instruments {
            if instrument.provider_id() != compiler.provider_id() {
                return Err(MetricError::ProviderMismatch(instrument.name()));
            }
            declared.insert(instrument.instrument_id());
        }

        Ok(Callback {
            function: Box::new(function),
            declared: Arc::new(declared),
        })
    }

    /// Run the callback once on behalf of `reader`.
    ///
    /// The scope handed to the callback dies when this returns, whether the
    /// callback finished normally or panicked.
    pub fn run(&self, reader: &Arc<Reader>) {
        struct EndScope(Arc<AtomicBool>);

        impl Drop for EndScope {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Release);
            }
        }

        let scope = ObservationScope {
            reader: Arc::clone(reader),
            declared: Arc::clone(&self.declared),
            live: Arc::new(AtomicBool::new(true)),
        };
        // Kills the scope on every exit path, unwinding included.
        let _end = EndScope(Arc::clone(&scope.live));
        (self.function)(&scope);
    }
}
