use log::debug;

use super::{FilterOutput, MovingAverage};
use crate::config::{OutlierAction, OutlierFilterOptions};

/// Maximum allowed deviations from the mean, in standard deviations, for one
/// doubtful observation among n samples (Peirce's criterion, tabulated after
/// Ross). Index 0 corresponds to n = 3; the filter needs at least 4 samples
/// before it starts classifying.
const PEIRCE_TABLE: [f64; 58] = [
    1.196, 1.383, 1.509, 1.610, 1.693, 1.763, 1.824, 1.878, 1.925, 1.969, 2.007, 2.043, 2.076,
    2.106, 2.134, 2.161, 2.185, 2.209, 2.230, 2.251, 2.271, 2.290, 2.307, 2.324, 2.341, 2.356,
    2.371, 2.385, 2.399, 2.412, 2.425, 2.438, 2.450, 2.461, 2.472, 2.483, 2.494, 2.504, 2.514,
    2.524, 2.533, 2.542, 2.551, 2.560, 2.568, 2.577, 2.585, 2.592, 2.600, 2.608, 2.615, 2.622,
    2.629, 2.636, 2.643, 2.649, 2.656, 2.662,
];

fn peirce_limit(samples: usize) -> Option<f64> {
    if samples < 3 {
        return None;
    }
    let index = (samples - 3).min(PEIRCE_TABLE.len() - 1);
    Some(PEIRCE_TABLE[index])
}

/// Outlier filter applying Peirce's criterion over a bounded window of
/// samples.
///
/// Each new sample is compared against the running mean of the window; when
/// its deviation exceeds the tabulated Peirce maximum (scaled by the
/// configured threshold multiplier) in units of the window's standard
/// deviation, it is classified as an outlier and either discarded or replaced
/// by the current moving average, per the configured action.
#[derive(Debug, Clone)]
pub struct PeirceFilter {
    window: MovingAverage,
    action: OutlierAction,
    threshold: f64,
    weight: f64,
}

impl PeirceFilter {
    /// `options` must already be validated.
    pub fn new(options: &OutlierFilterOptions) -> Self {
        Self {
            window: MovingAverage::new(options.capacity),
            action: options.action,
            threshold: options.threshold,
            weight: options.weight,
        }
    }

    pub fn feed(&mut self, sample: i64) -> FilterOutput {
        // Not enough samples to judge yet; admit unconditionally while the
        // statistics build up.
        let limit = match peirce_limit(self.window.len().max(4)) {
            Some(limit) if self.window.len() >= 4 => limit,
            _ => {
                self.window.feed(sample);
                return FilterOutput {
                    accepted: true,
                    value: sample,
                };
            }
        };

        let mean = self.window.mean();
        let std_dev = self.window.std_dev();
        let deviation = (sample as f64 - mean).abs();

        if std_dev > 0.0 && deviation > limit * std_dev * self.threshold {
            debug!(
                "outlier: sample {sample} deviates {:.1} standard deviations from mean {mean:.0}",
                deviation / std_dev
            );
            return match self.action {
                OutlierAction::Discard => FilterOutput {
                    accepted: false,
                    value: sample,
                },
                OutlierAction::Filter => {
                    // Replace with the moving average, then blend a weighted
                    // version of the deviation back into the statistics.
                    let replacement = mean as i64;
                    let blended = mean + (sample as f64 - mean) * self.weight;
                    self.window.feed(blended as i64);
                    FilterOutput {
                        accepted: false,
                        value: replacement,
                    }
                }
            };
        }

        self.window.feed(sample);
        FilterOutput {
            accepted: true,
            value: sample,
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(action: OutlierAction) -> OutlierFilterOptions {
        OutlierFilterOptions {
            enabled: true,
            action,
            capacity: 10,
            threshold: 1.0,
            weight: 1.0,
        }
    }

    #[test]
    fn constant_stream_never_flags_outliers() {
        let mut filter = PeirceFilter::new(&options(OutlierAction::Discard));
        for _ in 0..100 {
            assert!(filter.feed(500).accepted);
        }
    }

    #[test]
    fn spike_is_flagged_and_discarded() {
        let mut filter = PeirceFilter::new(&options(OutlierAction::Discard));
        for sample in [100, 102, 101, 103, 99] {
            assert!(filter.feed(sample).accepted);
        }

        let out = filter.feed(5000);
        assert!(!out.accepted);
        assert_eq!(out.value, 5000);

        // The spike must not have entered the statistics: the mean is still
        // around 101 and a normal sample passes.
        let out = filter.feed(101);
        assert!(out.accepted);
    }

    #[test]
    fn spike_is_replaced_by_moving_average_when_filtering() {
        let mut filter = PeirceFilter::new(&options(OutlierAction::Filter));
        for sample in [100, 102, 101, 103, 99] {
            assert!(filter.feed(sample).accepted);
        }

        let out = filter.feed(5000);
        assert!(!out.accepted);
        // mean of [100, 102, 101, 103, 99]
        assert_eq!(out.value, 101);
    }

    #[test]
    fn low_weight_limits_outlier_influence() {
        let mut small = PeirceFilter::new(&OutlierFilterOptions {
            weight: 0.01,
            ..options(OutlierAction::Filter)
        });
        let mut large = PeirceFilter::new(&OutlierFilterOptions {
            weight: 2.0,
            ..options(OutlierAction::Filter)
        });
        for sample in [100, 102, 101, 103, 99] {
            small.feed(sample);
            large.feed(sample);
        }
        small.feed(5000);
        large.feed(5000);
        assert!(small.window.mean() < large.window.mean());
    }

    #[test]
    fn loose_threshold_admits_moderate_spikes() {
        let mut tight = PeirceFilter::new(&OutlierFilterOptions {
            threshold: 1.0,
            ..options(OutlierAction::Discard)
        });
        let mut loose = PeirceFilter::new(&OutlierFilterOptions {
            threshold: 1000.0,
            ..options(OutlierAction::Discard)
        });
        for sample in [100, 102, 101, 103, 99] {
            tight.feed(sample);
            loose.feed(sample);
        }
        assert!(!tight.feed(120).accepted);
        assert!(loose.feed(120).accepted);
    }

    #[test]
    fn table_bounds() {
        assert_eq!(peirce_limit(2), None);
        assert_eq!(peirce_limit(3), Some(1.196));
        assert_eq!(peirce_limit(60), Some(2.662));
        // Saturates past the end of the table.
        assert_eq!(peirce_limit(1000), Some(2.662));
    }
}
