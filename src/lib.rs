//! The view-compilation and aggregation engine of a metrics SDK.
//!
//! This crate sits between instrument updates and metric readers. It
//! compiles user-supplied [`View`] declarations against instrument
//! [`Descriptor`]s into per-reader aggregation pipelines, routes
//! measurements into aggregation cells under concurrent load, and snapshots
//! those cells into reader output with the temporality each [`Reader`]
//! asked for, including the delta↔cumulative conversion both for
//! synchronous and asynchronous instruments.
//!
//! It deliberately excludes the public instrument API, reader transports,
//! and resource metadata: those layers sit on either side of this engine
//! and interact with it through [`Compiler::compile`],
//! [`CompiledInstrument`], and [`Callback`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use opentelemetry::{InstrumentationScope, KeyValue};
//! use viewcore::{
//!     Accumulator, Compiler, Descriptor, InstrumentKind, NumberKind, Reader,
//!     Sequence,
//! };
//!
//! let reader = Arc::new(Reader::default());
//! let compiler = Compiler::new(
//!     InstrumentationScope::builder("my-lib").build(),
//!     vec![],
//!     vec![Arc::clone(&reader)],
//! );
//!
//! // The instrument facade compiles each descriptor once.
//! let counter = compiler.compile::<i64>(&Descriptor::new(
//!     "requests",
//!     InstrumentKind::Counter,
//!     NumberKind::I64,
//!     "handled requests",
//!     "{request}",
//! ));
//!
//! // Hot path: record through an accumulator.
//! let accumulator = counter.new_accumulator(&[KeyValue::new("peer", "a")], None);
//! accumulator.update(1);
//!
//! // Collection: flush accumulators, then pull snapshots per reader.
//! accumulator.accumulate();
//! let now = SystemTime::now();
//! let mut output = vec![];
//! counter.collect(
//!     &reader,
//!     &Sequence { start: now, last: now, now },
//!     &mut output,
//! );
//! ```

mod aggregation;
mod attributes;
mod callback;
mod descriptor;
mod error;
mod pipeline;
mod view;

pub mod aggregator;
pub mod data;
pub mod number;
pub mod reader;

pub use aggregation::Aggregation;
pub use attributes::AttributeSet;
pub use callback::{AnyObservable, Callback, ObservableInstrument, ObservationScope};
pub use descriptor::{Descriptor, InstrumentKind, NumberKind};
pub use error::{handle_error, set_error_handler, MetricError, MetricResult};
pub use pipeline::{Accumulator, CompiledInstrument, Compiler};
pub use reader::{Reader, Sequence};
pub use view::{View, ViewBuilder};
