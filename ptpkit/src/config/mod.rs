//! Validated configuration consumed by the protocol core.
//!
//! The structures here are plain data: the embedding daemon parses whatever
//! configuration syntax it likes, fills these in, and calls `validate()`
//! before handing them to [`crate::port::Port`]. The core never sees an
//! out-of-range value.

use thiserror::Error;

use crate::bmc::foreign_master::MAX_FOREIGN_RECORDS;
use crate::datastructures::common::{ClockIdentity, ClockQuality};
use crate::filters::MAX_FILTER_SAMPLES;
use crate::time::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("configuration value `{field}` {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Which delay mechanism a port is using. The mechanisms are mutually
/// exclusive per port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMechanism {
    /// End to end delay measurement, directly against the chosen master.
    E2E,
    /// Peer to peer delay measurement against the adjacent node.
    P2P,
    /// No delay measurement: syntonization only, offsets are computed from
    /// sync messages alone.
    Disabled,
}

/// Properties of the local clock instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceConfig {
    pub clock_identity: ClockIdentity,
    pub priority_1: u8,
    pub priority_2: u8,
    pub domain_number: u8,
    pub slave_only: bool,
    /// Quality announced while in master state; clock class 255 is forced
    /// when `slave_only` is set.
    pub clock_quality: ClockQuality,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            clock_identity: ClockIdentity::default(),
            priority_1: 128,
            priority_2: 128,
            domain_number: 0,
            slave_only: false,
            clock_quality: ClockQuality::default(),
        }
    }
}

impl InstanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain_number > 127 {
            return Err(ConfigError::new("domain-number", "must be at most 127"));
        }
        Ok(())
    }
}

/// Per-port protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    pub announce_interval: Interval,
    pub sync_interval: Interval,
    /// Announce intervals without an announce before the receipt timeout
    /// fires.
    pub announce_receipt_timeout: u8,
    /// When nonzero and in slave state, a receipt timeout first disqualifies
    /// the current master and waits this many further timeout periods before
    /// resetting the port, to let a standby master take over seamlessly.
    pub announce_timeout_grace_period: u8,
    pub delay_mechanism: DelayMechanism,
    /// Delay request interval used until the first response is received.
    pub initial_delay_req_interval: Interval,
    /// Explicitly configured delay request interval. When set, the interval
    /// advertised by the master is ignored.
    pub delay_req_interval: Option<Interval>,
    pub foreign_record_capacity: usize,
    /// Statistics periods to wait after entering slave state (or after a
    /// master change) before the servo is driven. Samples still feed the
    /// filters during this window. 0 disables the wait.
    pub calibration_delay: u32,
    /// Consecutive unanswered delay requests before the condition is
    /// reported. 0 disables the check.
    pub delay_miss_limit: u32,
    /// Interval between statistics updates, also the window length for servo
    /// stability detection.
    pub stats_interval_secs: u32,
    /// Compatibility extension: prefer masters announcing a valid UTC
    /// offset. Not part of the standard.
    pub prefer_utc_valid: bool,
    /// Compatibility extension: ignore announces without a valid UTC offset
    /// entirely. Not part of the standard.
    pub require_utc_valid: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            announce_interval: Interval::TWO_SECONDS,
            sync_interval: Interval::ONE_SECOND,
            announce_receipt_timeout: 6,
            announce_timeout_grace_period: 0,
            delay_mechanism: DelayMechanism::E2E,
            initial_delay_req_interval: Interval::ONE_SECOND,
            delay_req_interval: None,
            foreign_record_capacity: 5,
            calibration_delay: 0,
            delay_miss_limit: 8,
            stats_interval_secs: 5,
            prefer_utc_valid: false,
            require_utc_valid: false,
        }
    }
}

impl PortSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let log_announce = self.announce_interval.log_2();
        if !(-1..=7).contains(&log_announce) {
            return Err(ConfigError::new(
                "announce-interval",
                "must be between -1 and 7 (log 2 seconds)",
            ));
        }
        if !(-7..=7).contains(&self.sync_interval.log_2()) {
            return Err(ConfigError::new(
                "sync-interval",
                "must be between -7 and 7 (log 2 seconds)",
            ));
        }
        if self.announce_receipt_timeout < 2 {
            return Err(ConfigError::new(
                "announce-receipt-timeout",
                "must be at least 2",
            ));
        }
        if self.announce_timeout_grace_period > 20 {
            return Err(ConfigError::new(
                "announce-timeout-grace-period",
                "must be at most 20",
            ));
        }
        for (name, interval) in [
            ("delay-req-interval-initial", Some(self.initial_delay_req_interval)),
            ("delay-req-interval", self.delay_req_interval),
        ] {
            if let Some(interval) = interval {
                if !(-7..=7).contains(&interval.log_2()) {
                    return Err(ConfigError::new(name, "must be between -7 and 7 (log 2 seconds)"));
                }
            }
        }
        if !(5..=MAX_FOREIGN_RECORDS).contains(&self.foreign_record_capacity) {
            return Err(ConfigError::new(
                "foreign-record-capacity",
                "must be between 5 and 10",
            ));
        }
        if self.calibration_delay > 100 {
            return Err(ConfigError::new(
                "calibration-delay",
                "must be at most 100 statistics periods",
            ));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::new("stats-interval", "must be nonzero"));
        }
        Ok(())
    }

    /// The window after which a foreign master record without fresh
    /// announces is dropped.
    pub fn foreign_master_window(&self) -> crate::time::TimeInternal {
        self.announce_interval.as_time() * self.announce_receipt_timeout as i32
    }
}

/// What happens to an outlier sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierAction {
    /// Drop the sample; it does not enter the statistics.
    Discard,
    /// Replace the sample with the current moving average, then blend it
    /// into the statistics using the configured weight.
    Filter,
}

/// Settings for one Peirce outlier filter instance (the delay and sync paths
/// each get their own).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierFilterOptions {
    pub enabled: bool,
    pub action: OutlierAction,
    pub capacity: usize,
    /// Multiplier on the Peirce maximum deviation: below 1.0 the filter is
    /// tighter, above 1.0 looser than the standard Peirce test.
    pub threshold: f64,
    /// How much of an outlier's deviation from the mean enters the running
    /// statistics; 1.0 means it is used as-is.
    pub weight: f64,
}

impl Default for OutlierFilterOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            action: OutlierAction::Filter,
            capacity: 20,
            threshold: 1.0,
            weight: 1.0,
        }
    }
}

impl OutlierFilterOptions {
    pub fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if !(4..=MAX_FILTER_SAMPLES).contains(&self.capacity) {
            return Err(ConfigError::new(field, "capacity must be between 4 and 60"));
        }
        if !(0.001..=1000.0).contains(&self.threshold) {
            return Err(ConfigError::new(
                field,
                "threshold must be between 0.001 and 1000.0",
            ));
        }
        if !(0.01..=2.0).contains(&self.weight) {
            return Err(ConfigError::new(
                field,
                "weight must be between 0.01 and 2.0",
            ));
        }
        Ok(())
    }
}

/// How the servo computes its update interval (delta t).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtMethod {
    /// No interval normalization, dt is always 1. Matches the legacy
    /// behavior.
    None,
    /// dt is the configured target update interval (the sync interval).
    Constant,
    /// dt is the wall-clock time elapsed since the previous servo update.
    Measured,
}

/// What happens to the observed frequency drift when the servo resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftHandling {
    /// Start over from zero.
    Reset,
    /// Keep the previously accumulated value.
    Preserve,
    /// Like preserve; additionally the daemon loads the value from a drift
    /// file at startup and saves it at shutdown and on stability.
    File,
}

/// Clock servo settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoOptions {
    pub kp: f64,
    pub ki: f64,
    pub dt_method: DtMethod,
    /// Stiffness of the one-way delay smoothing filter applied after
    /// outlier rejection: each accepted sample enters the estimate with
    /// weight 1/stiffness. 1 disables smoothing.
    pub delayfilter_stiffness: u32,
    /// Maximum absolute frequency shift applied when slewing, in parts per
    /// million. Used as ppb after scaling by 1000.
    pub max_offset_ppm: u32,
    /// Discard sync measurements implying a path delay above this bound
    /// (nanoseconds). 0 disables the check.
    pub max_delay_ns: i64,
    /// Suspend clock updates when the offset exceeds one second, stepping
    /// only if it stays large after the suspension.
    pub panic_mode: bool,
    pub panic_mode_duration_mins: u32,
    /// Offset (nanoseconds) below which panic mode exits without stepping.
    /// 0 disables the extra threshold.
    pub panic_mode_exit_threshold_ns: i64,
    /// Never make any OS clock call; the servo runs observe-only.
    pub no_adjust: bool,
    /// Never step the clock, only slew, however long that takes.
    pub no_reset: bool,
    pub drift_handling: DriftHandling,
    pub stability_detection: bool,
    /// Observed-drift standard deviation (ppb) under which a statistics
    /// window counts as stable.
    pub stability_threshold_ppb: f64,
    /// Consecutive stable windows before the servo is flagged stable.
    pub stability_period: u32,
    /// Minutes without stabilization before the servo is flagged unstable.
    pub stability_timeout_mins: u32,
}

impl Default for ServoOptions {
    fn default() -> Self {
        Self {
            kp: 0.1,
            ki: 0.001,
            dt_method: DtMethod::Constant,
            delayfilter_stiffness: 6,
            max_offset_ppm: 500,
            max_delay_ns: 0,
            panic_mode: false,
            panic_mode_duration_mins: 30,
            panic_mode_exit_threshold_ns: 0,
            no_adjust: false,
            no_reset: false,
            drift_handling: DriftHandling::Preserve,
            stability_detection: false,
            stability_threshold_ppb: 10.0,
            stability_period: 1,
            stability_timeout_mins: 10,
        }
    }
}

impl ServoOptions {
    /// The clamp applied to the servo output and integral, in ppb.
    pub fn max_ppb(&self) -> f64 {
        self.max_offset_ppm as f64 * 1e3
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kp < 1e-6 {
            return Err(ConfigError::new("servo-kp", "must be at least 0.000001"));
        }
        if self.ki < 1e-6 {
            return Err(ConfigError::new("servo-ki", "must be at least 0.000001"));
        }
        if self.delayfilter_stiffness == 0 {
            return Err(ConfigError::new(
                "delayfilter-stiffness",
                "must be at least 1",
            ));
        }
        if !(500..=1000).contains(&self.max_offset_ppm) {
            return Err(ConfigError::new(
                "max-offset-ppm",
                "must be between 500 and 1000",
            ));
        }
        if self.max_delay_ns < 0 {
            return Err(ConfigError::new("max-delay", "must not be negative"));
        }
        if !(1..=60).contains(&self.panic_mode_duration_mins) {
            return Err(ConfigError::new(
                "panic-mode-duration",
                "must be between 1 and 60 minutes",
            ));
        }
        if self.panic_mode_exit_threshold_ns < 0 {
            return Err(ConfigError::new(
                "panic-mode-exit-threshold",
                "must not be negative",
            ));
        }
        if self.no_adjust && self.no_reset {
            // no_adjust already implies the clock is never touched; flagging
            // the combination avoids silently dead configuration.
            return Err(ConfigError::new(
                "no-reset",
                "is meaningless together with no-adjust",
            ));
        }
        if !(1.0..=10000.0).contains(&self.stability_threshold_ppb) {
            return Err(ConfigError::new(
                "stability-threshold",
                "must be between 1.0 and 10000.0 ppb",
            ));
        }
        if !(1..=100).contains(&self.stability_period) {
            return Err(ConfigError::new(
                "stability-period",
                "must be between 1 and 100 windows",
            ));
        }
        if !(1..=60).contains(&self.stability_timeout_mins) {
            return Err(ConfigError::new(
                "stability-timeout",
                "must be between 1 and 60 minutes",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_are_valid() {
        InstanceConfig::default().validate().unwrap();
        PortSettings::default().validate().unwrap();
        OutlierFilterOptions::default().validate("delay").unwrap();
        ServoOptions::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut port = PortSettings {
            foreign_record_capacity: 11,
            ..Default::default()
        };
        assert!(port.validate().is_err());
        port.foreign_record_capacity = 4;
        assert!(port.validate().is_err());
        port.foreign_record_capacity = 10;
        port.validate().unwrap();

        let filter = OutlierFilterOptions {
            threshold: 0.0001,
            ..Default::default()
        };
        assert!(filter.validate("sync").is_err());

        let filter = OutlierFilterOptions {
            weight: 2.5,
            ..Default::default()
        };
        assert!(filter.validate("sync").is_err());

        let servo = ServoOptions {
            kp: 0.0,
            ..Default::default()
        };
        assert!(servo.validate().is_err());

        let servo = ServoOptions {
            max_offset_ppm: 2000,
            ..Default::default()
        };
        assert!(servo.validate().is_err());
    }

    #[test]
    fn foreign_master_window() {
        let port = PortSettings {
            announce_interval: Interval::from_log_2(0),
            announce_receipt_timeout: 3,
            ..Default::default()
        };
        assert_eq!(
            port.foreign_master_window(),
            crate::time::TimeInternal::from_secs(3)
        );
    }
}
