//! Types for delivery of pre-aggregated metric time series data to readers.

use std::time::SystemTime;
use std::{any, fmt};

use crate::attributes::AttributeSet;
use crate::descriptor::Descriptor;

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    ///
    /// New measurements are added to all previous measurements since a start
    /// time.
    Cumulative,

    /// A measurement interval that resets each cycle.
    ///
    /// Measurements from one cycle are recorded independently, measurements
    /// from other cycles do not affect them.
    Delta,
}

/// One instrument's output for a single reader collection.
#[derive(Debug)]
pub struct Metric {
    /// The descriptor of the stream that produced this data, after any view
    /// rewrites.
    pub descriptor: Descriptor,
    /// The window the series were calculated over.
    pub temporality: Temporality,
    /// One entry per live attribute set.
    pub series: Vec<Series>,
}

/// A single aggregated time series.
#[derive(Debug)]
pub struct Series {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: AttributeSet,
    /// The aggregated value; one of [`SumPoint`], [`GaugePoint`], or
    /// [`HistogramPoint`].
    pub aggregation: Box<dyn Aggregation>,
    /// The start of the window this value was calculated over.
    pub start: SystemTime,
    /// The time this value was collected.
    pub end: SystemTime,
}

/// The store of an aggregated value reported in a [`Series`].
///
/// It will be one of [`SumPoint`], [`GaugePoint`], or [`HistogramPoint`].
pub trait Aggregation: fmt::Debug + any::Any + Send + Sync {
    /// Support downcasting.
    fn as_any(&self) -> &dyn any::Any;
}

/// The arithmetic sum of all measurements in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct SumPoint<T> {
    /// The accumulated value.
    pub value: T,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for SumPoint<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
}

/// The last measurement in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugePoint<T> {
    /// The most recently observed value.
    pub value: T,
    /// When that value was observed.
    pub observed_at: SystemTime,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for GaugePoint<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
}

/// The distribution of measurements in the window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPoint<T> {
    /// The number of measurements.
    pub count: u64,
    /// The arithmetic sum of measurements.
    pub sum: T,
    /// The bucket upper-bound boundaries. `bucket_counts` has one more entry
    /// than `bounds`, the final bucket covering `(bounds.last(), +∞)`.
    pub bounds: Vec<f64>,
    /// Per-bucket measurement counts.
    pub bucket_counts: Vec<u64>,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for HistogramPoint<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
}

impl Series {
    /// The aggregation downcast to a concrete point type.
    pub fn point<P: Aggregation>(&self) -> Option<&P> {
        self.aggregation.as_any().downcast_ref::<P>()
    }
}
