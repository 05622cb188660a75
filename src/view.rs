use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use opentelemetry::{InstrumentationScope, Key};
use regex::Regex;

use crate::aggregation::Aggregation;
use crate::descriptor::{Descriptor, InstrumentKind};
use crate::error::{MetricError, MetricResult};

enum NameCriteria {
    Any,
    Exact(Cow<'static, str>),
    Pattern(Regex),
}

/// Used to customize the streams instruments produce.
///
/// A view pairs matching criteria with a transform. When an instrument
/// matches the criteria, the view's transform decides the emitted stream's
/// name, description, attribute keys, and aggregation. Views that match no
/// field of an instrument do not apply.
///
/// # Example
///
/// ```
/// use viewcore::{Aggregation, View};
///
/// let view = View::builder()
///     .match_instrument_name("latency")
///     .with_aggregation(Aggregation::ExplicitBucketHistogram {
///         boundaries: vec![0.0, 10.0, 100.0],
///     })
///     .build()
///     .unwrap();
/// # drop(view);
/// ```
pub struct View {
    match_name: NameCriteria,
    match_kind: Option<InstrumentKind>,
    match_unit: Option<Cow<'static, str>>,
    match_scope_name: Option<Cow<'static, str>>,
    match_scope_version: Option<Cow<'static, str>>,
    match_scope_schema_url: Option<Cow<'static, str>>,

    rename: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    keys: Option<Arc<HashSet<Key>>>,
    aggregation: Option<Aggregation>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("View")
    }
}

impl View {
    /// Configuration for a view.
    pub fn builder() -> ViewBuilder {
        ViewBuilder::default()
    }

    /// Whether this view applies to `descriptor` as instrumented by `scope`.
    pub fn matches(&self, scope: &InstrumentationScope, descriptor: &Descriptor) -> bool {
        let name_ok = match &self.match_name {
            NameCriteria::Any => true,
            NameCriteria::Exact(name) => name.as_ref() == descriptor.name(),
            NameCriteria::Pattern(re) => re.is_match(descriptor.name()),
        };

        name_ok
            && self
                .match_kind
                .map_or(true, |kind| kind == descriptor.instrument_kind())
            && self
                .match_unit
                .as_ref()
                .map_or(true, |unit| unit.as_ref() == descriptor.unit())
            && self
                .match_scope_name
                .as_ref()
                .map_or(true, |name| name.as_ref() == scope.name())
            && self
                .match_scope_version
                .as_ref()
                .map_or(true, |version| Some(version.as_ref()) == scope.version())
            && self
                .match_scope_schema_url
                .as_ref()
                .map_or(true, |url| Some(url.as_ref()) == scope.schema_url())
    }

    /// The aggregation this view prescribes, if any.
    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.aggregation.as_ref()
    }

    /// The attribute keys the emitted stream is restricted to, if any.
    pub fn keys(&self) -> Option<&Arc<HashSet<Key>>> {
        self.keys.as_ref()
    }

    /// `descriptor` with this view's name and description overrides applied.
    pub(crate) fn rewrite(&self, descriptor: &Descriptor) -> Descriptor {
        descriptor.renamed(self.rename.clone(), self.description.clone())
    }
}

/// A builder for [`View`]s.
///
/// All criteria default to matching anything, but at least one criterion
/// must be provided; a view with no criteria is refused. The instrument name
/// criterion supports wildcard pattern matching: `*` matches zero or more
/// characters and `?` matches exactly one.
#[derive(Default)]
pub struct ViewBuilder {
    name: Option<Cow<'static, str>>,
    kind: Option<InstrumentKind>,
    unit: Option<Cow<'static, str>>,
    scope_name: Option<Cow<'static, str>>,
    scope_version: Option<Cow<'static, str>>,
    scope_schema_url: Option<Cow<'static, str>>,

    rename: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    keys: Option<Arc<HashSet<Key>>>,
    aggregation: Option<Aggregation>,
}

impl fmt::Debug for ViewBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ViewBuilder")
    }
}

impl ViewBuilder {
    /// Match instruments by exact name, or by wildcard pattern when the name
    /// contains `*` or `?`.
    pub fn match_instrument_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Match instruments of the given kind.
    pub fn match_instrument_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Match instruments with the given unit.
    pub fn match_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Match instruments created by the instrumentation scope with this name.
    pub fn match_scope_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.scope_name = Some(name.into());
        self
    }

    /// Match instruments created by the instrumentation scope with this
    /// version.
    pub fn match_scope_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.scope_version = Some(version.into());
        self
    }

    /// Match instruments created by the instrumentation scope with this
    /// schema URL.
    pub fn match_scope_schema_url(mut self, url: impl Into<Cow<'static, str>>) -> Self {
        self.scope_schema_url = Some(url.into());
        self
    }

    /// Rename the emitted stream.
    ///
    /// Renaming is refused when the name criterion is a wildcard pattern: a
    /// single name cannot serve multiple instruments.
    pub fn rename(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.rename = Some(name.into());
        self
    }

    /// Replace the emitted stream's description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict the emitted stream to the given attribute keys.
    ///
    /// Any attribute recorded with a key not in this set is dropped before
    /// aggregation.
    pub fn with_attribute_filter(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        self.keys = Some(Arc::new(keys.into_iter().collect()));
        self
    }

    /// Set the aggregation used for matching instruments.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Build the view.
    pub fn build(self) -> MetricResult<View> {
        let no_criteria = self.name.is_none()
            && self.kind.is_none()
            && self.unit.is_none()
            && self.scope_name.is_none()
            && self.scope_version.is_none()
            && self.scope_schema_url.is_none();
        if no_criteria {
            return Err(MetricError::Config(
                "no criteria provided, dropping view".into(),
            ));
        }

        let match_name = match self.name {
            None => NameCriteria::Any,
            Some(name) if name.contains(['*', '?']) => {
                if self.rename.is_some() {
                    return Err(MetricError::Config(format!(
                        "name replacement for multiple instruments, dropping view: {name}"
                    )));
                }
                let pattern = regex::escape(&name).replace("\\*", ".*").replace("\\?", ".");
                let re = Regex::new(&format!("^{pattern}$"))
                    .map_err(|e| MetricError::Config(e.to_string()))?;
                NameCriteria::Pattern(re)
            }
            Some(name) => NameCriteria::Exact(name),
        };

        if let Some(aggregation) = &self.aggregation {
            aggregation.validate()?;
        }

        Ok(View {
            match_name,
            match_kind: self.kind,
            match_unit: self.unit,
            match_scope_name: self.scope_name,
            match_scope_version: self.scope_version,
            match_scope_schema_url: self.scope_schema_url,
            rename: self.rename,
            description: self.description,
            keys: self.keys,
            aggregation: self.aggregation,
        })
    }
}
