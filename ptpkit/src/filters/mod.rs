//! Statistical conditioning of raw delay and offset samples.
//!
//! The filter set is a closed enumeration: a moving average, an exponential
//! smoother and a Peirce-criterion outlier filter. Filters never fail; any
//! invalid parameter is rejected when the configuration is validated, before
//! a filter is ever constructed.

pub use moving_average::MovingAverage;
pub use peirce::PeirceFilter;

mod moving_average;
mod peirce;

use crate::config::OutlierFilterOptions;

/// Upper bound on the sample window of any filter.
pub const MAX_FILTER_SAMPLES: usize = 60;

/// The verdict of a filter on one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutput {
    /// False when the sample was classified as an outlier.
    pub accepted: bool,
    /// The (possibly adjusted) sample to use downstream.
    pub value: i64,
}

/// A single smoothing value, `v' = alpha * sample + (1 - alpha) * v`.
#[derive(Debug, Clone)]
pub struct ExponentialSmooth {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialSmooth {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn feed(&mut self, sample: i64) -> i64 {
        let value = match self.value {
            Some(value) => self.alpha * sample as f64 + (1.0 - self.alpha) * value,
            None => sample as f64,
        };
        self.value = Some(value);
        value as i64
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

/// The closed set of sample filters.
#[derive(Debug, Clone)]
pub enum SampleFilter {
    MovingAverage(MovingAverage),
    ExponentialSmooth(ExponentialSmooth),
    PeirceOutlier(PeirceFilter),
}

impl SampleFilter {
    /// An outlier filter per the given (validated) options, or a plain
    /// moving average when outlier filtering is disabled.
    pub fn from_outlier_options(options: &OutlierFilterOptions) -> Self {
        if options.enabled {
            Self::PeirceOutlier(PeirceFilter::new(options))
        } else {
            Self::MovingAverage(MovingAverage::new(options.capacity))
        }
    }

    pub fn feed(&mut self, sample: i64) -> FilterOutput {
        match self {
            Self::MovingAverage(filter) => FilterOutput {
                accepted: true,
                value: filter.feed(sample),
            },
            Self::ExponentialSmooth(filter) => FilterOutput {
                accepted: true,
                value: filter.feed(sample),
            },
            Self::PeirceOutlier(filter) => filter.feed(sample),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Self::MovingAverage(filter) => filter.clear(),
            Self::ExponentialSmooth(filter) => filter.clear(),
            Self::PeirceOutlier(filter) => filter.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_smooth_converges() {
        let mut filter = ExponentialSmooth::new(0.5);
        assert_eq!(filter.feed(1000), 1000);
        assert_eq!(filter.feed(0), 500);
        assert_eq!(filter.feed(0), 250);
        filter.clear();
        assert_eq!(filter.feed(42), 42);
    }

    #[test]
    fn disabled_outlier_options_fall_back_to_moving_average() {
        let options = OutlierFilterOptions {
            enabled: false,
            ..Default::default()
        };
        let mut filter = SampleFilter::from_outlier_options(&options);
        assert!(matches!(filter, SampleFilter::MovingAverage(_)));
        // An extreme sample is not rejected, only averaged.
        filter.feed(10);
        let out = filter.feed(1_000_000);
        assert!(out.accepted);
    }
}
