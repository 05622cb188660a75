use std::fmt;

use crate::error::{MetricError, MetricResult};

/// The way recorded measurements are summarized.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that defers to the reader's per-instrument-kind
    /// selection.
    ///
    /// A reader can be configured with an aggregation selection that differs
    /// from the built-in defaults; this variant ensures that selection is
    /// used.
    Default,

    /// An aggregation that summarizes a set of measurements as their
    /// arithmetic sum.
    Sum,

    /// An aggregation that summarizes a set of measurements as the last one
    /// made.
    LastValue,

    /// An aggregation that summarizes a set of measurements as a histogram
    /// with explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Boundary values define bucket upper bounds. Buckets are exclusive
        /// of their lower boundary and inclusive of their upper bound (except
        /// at positive infinity). An empty list delegates to the reader's
        /// default boundaries for the instrument's number kind.
        boundaries: Vec<f64>,
    },
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // used for stream id comparisons
        let name = match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
        };

        f.write_str(name)
    }
}

impl Aggregation {
    /// Validate that this aggregation has correct configuration.
    pub fn validate(&self) -> MetricResult<()> {
        match self {
            Aggregation::Drop
            | Aggregation::Default
            | Aggregation::Sum
            | Aggregation::LastValue => Ok(()),
            Aggregation::ExplicitBucketHistogram { boundaries } => {
                for x in boundaries {
                    if x.is_nan() || x.is_infinite() {
                        return Err(MetricError::Config(format!(
                            "explicit bucket histogram: non-finite boundary: {:?}",
                            boundaries,
                        )));
                    }
                }
                for x in boundaries.windows(2) {
                    if x[0] >= x[1] {
                        return Err(MetricError::Config(format!(
                            "explicit bucket histogram: non-monotonic boundaries: {:?}",
                            boundaries,
                        )));
                    }
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_histogram_boundaries() {
        assert!(Aggregation::Sum.validate().is_ok());
        assert!(Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, 5.0, 10.0]
        }
        .validate()
        .is_ok());
        assert!(Aggregation::ExplicitBucketHistogram {
            boundaries: vec![5.0, 5.0]
        }
        .validate()
        .is_err());
        assert!(Aggregation::ExplicitBucketHistogram {
            boundaries: vec![0.0, f64::NAN]
        }
        .validate()
        .is_err());
    }
}
