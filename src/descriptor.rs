use std::borrow::Cow;

/// The identifier of a group of instruments that all perform the same function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum InstrumentKind {
    /// Identifies a group of instruments that record increasing values
    /// synchronously with the code path they are measuring.
    Counter,
    /// A group of instruments that record increasing and decreasing values
    /// synchronously with the code path they are measuring.
    UpDownCounter,
    /// A group of instruments that record a distribution of values
    /// synchronously with the code path they are measuring.
    Histogram,
    /// A group of instruments that record increasing values in an
    /// asynchronous callback.
    ObservableCounter,
    /// A group of instruments that record increasing and decreasing values
    /// in an asynchronous callback.
    ObservableUpDownCounter,
    /// A group of instruments that record current values in an asynchronous
    /// callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// True for instruments updated synchronously with the code path they
    /// measure, false for instruments observed from callbacks.
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::UpDownCounter | InstrumentKind::Histogram
        )
    }

    /// True for counter-like instruments whose output is defined over a time
    /// window. Gauges report the latest value and carry no window.
    pub fn has_temporality(&self) -> bool {
        !matches!(self, InstrumentKind::ObservableGauge)
    }

    /// True for instruments that only accept non-negative increments.
    pub fn is_monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::ObservableCounter
        )
    }
}

/// Whether an instrument is declared over `i64` or `f64` values.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum NumberKind {
    /// Measurements are `i64` values.
    I64,
    /// Measurements are `f64` values.
    F64,
}

/// Immutable description of an instrument: its name, kinds, and the
/// human-oriented metadata it was created with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    name: Cow<'static, str>,
    instrument_kind: InstrumentKind,
    number_kind: NumberKind,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
}

impl Descriptor {
    /// Create a new descriptor.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        instrument_kind: InstrumentKind,
        number_kind: NumberKind,
        description: impl Into<Cow<'static, str>>,
        unit: impl Into<Cow<'static, str>>,
    ) -> Self {
        Descriptor {
            name: name.into(),
            instrument_kind,
            number_kind,
            description: description.into(),
            unit: unit.into(),
        }
    }

    /// The instrument's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The specific kind of instrument.
    pub fn instrument_kind(&self) -> InstrumentKind {
        self.instrument_kind
    }

    /// Whether this instrument is declared over `i64` or `f64` values.
    pub fn number_kind(&self) -> NumberKind {
        self.number_kind
    }

    /// A human-readable description of the instrument.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The unit of measurement recorded by the instrument.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// A copy of this descriptor carrying a different name and, when
    /// non-empty, a different description.
    pub(crate) fn renamed(
        &self,
        name: Option<Cow<'static, str>>,
        description: Option<Cow<'static, str>>,
    ) -> Descriptor {
        Descriptor {
            name: name.unwrap_or_else(|| self.name.clone()),
            instrument_kind: self.instrument_kind,
            number_kind: self.number_kind,
            description: description.unwrap_or_else(|| self.description.clone()),
            unit: self.unit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates() {
        assert!(InstrumentKind::Counter.is_synchronous());
        assert!(InstrumentKind::Histogram.is_synchronous());
        assert!(!InstrumentKind::ObservableCounter.is_synchronous());

        assert!(InstrumentKind::ObservableCounter.has_temporality());
        assert!(!InstrumentKind::ObservableGauge.has_temporality());

        assert!(InstrumentKind::Counter.is_monotonic());
        assert!(!InstrumentKind::UpDownCounter.is_monotonic());
        assert!(!InstrumentKind::Histogram.is_monotonic());
    }

    #[test]
    fn renamed_keeps_unit_and_kinds() {
        let desc = Descriptor::new(
            "requests",
            InstrumentKind::Counter,
            NumberKind::I64,
            "total requests",
            "{request}",
        );
        let renamed = desc.renamed(Some("rpc.requests".into()), None);
        assert_eq!(renamed.name(), "rpc.requests");
        assert_eq!(renamed.description(), "total requests");
        assert_eq!(renamed.unit(), "{request}");
        assert_eq!(renamed.instrument_kind(), InstrumentKind::Counter);
    }
}
