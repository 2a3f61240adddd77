//! The clock servo: a PI controller translating filtered offset-from-master
//! values into frequency adjustments for the local clock.

use log::{debug, info, warn};

use crate::config::{DriftHandling, DtMethod, ServoOptions};
use crate::time::TimeInternal;

/// What the servo wants done to the clock after absorbing a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoCommand {
    /// Adjust the clock frequency by this many parts per billion
    /// (positive speeds the clock up).
    Slew { frequency_ppb: f64 },
    /// Hard-set the clock by adding this correction to it.
    Step { correction: TimeInternal },
    /// Make no clock call this update (panic mode suspension).
    Hold,
}

#[derive(Debug)]
pub struct PiServo {
    options: ServoOptions,
    /// Target update interval in seconds, used by [`DtMethod::Constant`].
    dt_target: f64,
    /// The integral accumulator; this is the observed drift in ppb.
    integral_ppb: f64,
    /// Last commanded frequency adjustment in ppb.
    frequency_ppb: f64,
    last_update: Option<TimeInternal>,
    panic_until: Option<TimeInternal>,
}

impl PiServo {
    pub fn new(options: ServoOptions, dt_target: f64) -> Self {
        Self {
            options,
            dt_target,
            integral_ppb: 0.0,
            frequency_ppb: 0.0,
            last_update: None,
            panic_until: None,
        }
    }

    /// The observed drift (the integral term) in ppb.
    pub fn drift_ppb(&self) -> f64 {
        self.integral_ppb
    }

    /// Seed the drift, e.g. from a drift file or the kernel frequency.
    pub fn set_drift_ppb(&mut self, drift_ppb: f64) {
        let max = self.options.max_ppb();
        self.integral_ppb = drift_ppb.clamp(-max, max);
    }

    pub fn frequency_ppb(&self) -> f64 {
        self.frequency_ppb
    }

    pub fn in_panic_mode(&self) -> bool {
        self.panic_until.is_some()
    }

    /// Reset on (re)entering slave state or on a master change. The drift
    /// survives or not depending on the configured handling.
    pub fn reset(&mut self) {
        match self.options.drift_handling {
            DriftHandling::Reset => self.integral_ppb = 0.0,
            DriftHandling::Preserve | DriftHandling::File => {}
        }
        self.frequency_ppb = 0.0;
        self.last_update = None;
        self.panic_until = None;
    }

    /// Absorb one filtered offset measurement taken at local time `now`.
    pub fn sample(&mut self, offset: TimeInternal, now: TimeInternal) -> ServoCommand {
        if offset.abs() > Self::panic_threshold() {
            if let Some(command) = self.handle_large_offset(offset, now) {
                return command;
            }
        } else if let Some(until) = self.panic_until {
            if now < until {
                debug!("panic mode: offset back below threshold, waiting out suspension");
                return ServoCommand::Hold;
            }
            info!("leaving panic mode, offset {offset} within bounds");
            self.panic_until = None;
        }

        let dt = self.update_interval(now);
        self.last_update = Some(now);

        let max = self.options.max_ppb();
        let error_ppb = -offset.nanos_lossy();
        self.integral_ppb =
            (self.integral_ppb + self.options.ki * error_ppb * dt).clamp(-max, max);
        let adjustment = (self.options.kp * error_ppb + self.integral_ppb).clamp(-max, max);
        self.frequency_ppb = adjustment;

        debug!(
            "servo: offset {offset}, dt {dt:.3}, drift {:.3} ppb, adj {adjustment:.3} ppb",
            self.integral_ppb
        );

        ServoCommand::Slew {
            frequency_ppb: adjustment,
        }
    }

    /// Offset magnitude above which panic mode trips (or, without panic
    /// mode, the clock is stepped outright).
    fn panic_threshold() -> TimeInternal {
        TimeInternal::from_secs(1)
    }

    /// Offset above one second. Returns the command to execute, or None when
    /// the servo should proceed with a normal (clamped) update.
    fn handle_large_offset(&mut self, offset: TimeInternal, now: TimeInternal) -> Option<ServoCommand> {
        if !self.options.panic_mode {
            return if self.options.no_reset {
                // Stepping is forbidden; the regular PI update below will
                // slew at the clamp for as long as it takes.
                None
            } else {
                warn!("offset from master {offset} above 1 second, stepping clock");
                self.reset_after_step();
                Some(ServoCommand::Step {
                    correction: -offset,
                })
            };
        }

        match self.panic_until {
            None => {
                let duration =
                    TimeInternal::from_secs(self.options.panic_mode_duration_mins as i64 * 60);
                self.panic_until = Some(now + duration);
                warn!(
                    "offset from master {offset} above 1 second, suspending clock updates for {} minutes",
                    self.options.panic_mode_duration_mins
                );
                Some(ServoCommand::Hold)
            }
            Some(until) if now < until => Some(ServoCommand::Hold),
            Some(_) => {
                self.panic_until = None;
                let exit_threshold = match self.options.panic_mode_exit_threshold_ns {
                    0 => Self::panic_threshold(),
                    ns => TimeInternal::from_nanos(ns),
                };
                if offset.abs() > exit_threshold {
                    if self.options.no_reset {
                        warn!("offset {offset} still large after panic mode, stepping disabled, slewing");
                        None
                    } else {
                        warn!("offset {offset} still large after panic mode, stepping clock");
                        self.reset_after_step();
                        Some(ServoCommand::Step {
                            correction: -offset,
                        })
                    }
                } else {
                    None
                }
            }
        }
    }

    fn reset_after_step(&mut self) {
        // A step invalidates the phase history but not the frequency
        // estimate.
        self.last_update = None;
        self.panic_until = None;
    }

    fn update_interval(&self, now: TimeInternal) -> f64 {
        match self.options.dt_method {
            DtMethod::None => 1.0,
            DtMethod::Constant => self.dt_target,
            DtMethod::Measured => match self.last_update {
                // Guard against a stepped or misbehaving local clock blowing
                // up the integral term.
                Some(last) => (now - last).secs_lossy().clamp(1e-3, 60.0 * self.dt_target.max(1.0)),
                None => self.dt_target,
            },
        }
    }
}

/// The event reported when the stability assessment changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityEvent {
    BecameStable,
    BecameUnstable,
    /// Never stabilized within the configured timeout.
    TimedOut,
}

/// Detects whether the servo's observed drift has settled.
///
/// The drift is recorded on every servo update; each statistics interval
/// closes a window and the standard deviation of the drift within it is
/// compared against the configured threshold. The servo counts as stable
/// after the configured number of consecutive windows within threshold.
#[derive(Debug)]
pub struct StabilityDetector {
    threshold_ppb: f64,
    period: u32,
    timeout_windows: u32,
    window: Vec<f64>,
    consecutive: u32,
    windows_seen: u32,
    stable: bool,
    timed_out: bool,
}

impl StabilityDetector {
    pub fn new(options: &ServoOptions, stats_interval_secs: u32) -> Self {
        let interval = stats_interval_secs.max(1);
        let timeout_windows = (options.stability_timeout_mins * 60 + interval - 1) / interval;
        Self {
            threshold_ppb: options.stability_threshold_ppb,
            period: options.stability_period,
            timeout_windows,
            window: Vec::new(),
            consecutive: 0,
            windows_seen: 0,
            stable: false,
            timed_out: false,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Record an observed drift value (once per servo update).
    pub fn record(&mut self, drift_ppb: f64) {
        self.window.push(drift_ppb);
    }

    /// Close the current statistics window. Returns an event when the
    /// assessment changed.
    pub fn tick(&mut self) -> Option<StabilityEvent> {
        let std_dev = window_std_dev(&self.window);
        let had_samples = !self.window.is_empty();
        self.window.clear();
        self.windows_seen += 1;

        if had_samples && std_dev <= self.threshold_ppb {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }

        if self.consecutive >= self.period {
            if !self.stable {
                self.stable = true;
                self.timed_out = false;
                return Some(StabilityEvent::BecameStable);
            }
        } else if self.stable {
            self.stable = false;
            return Some(StabilityEvent::BecameUnstable);
        } else if !self.timed_out && self.windows_seen >= self.timeout_windows {
            self.timed_out = true;
            return Some(StabilityEvent::TimedOut);
        }

        None
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.consecutive = 0;
        self.windows_seen = 0;
        self.stable = false;
        self.timed_out = false;
    }
}

fn window_std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples
        .iter()
        .map(|s| {
            let dev = s - mean;
            dev * dev
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servo(options: ServoOptions) -> PiServo {
        PiServo::new(options, 1.0)
    }

    #[test]
    fn proportional_only() {
        let mut servo = servo(ServoOptions {
            kp: 0.001,
            ki: 1e-6,
            dt_method: DtMethod::None,
            ..Default::default()
        });
        // 1000 ns ahead: slow down by about 1 ppb.
        let command = servo.sample(TimeInternal::from_nanos(1000), TimeInternal::from_secs(1));
        match command {
            ServoCommand::Slew { frequency_ppb } => {
                assert!((frequency_ppb - -1.001).abs() < 1e-6)
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn output_never_exceeds_max_ppb() {
        let mut servo = servo(ServoOptions {
            kp: 10.0,
            ki: 10.0,
            no_reset: true,
            ..Default::default()
        });
        let max = ServoOptions::default().max_ppb();

        for offset_ns in [1, 1_000, 1_000_000, 500_000_000, i32::MAX as i64] {
            for sign in [1, -1] {
                let offset = TimeInternal::from_nanos(offset_ns * sign);
                match servo.sample(offset, TimeInternal::from_secs(1)) {
                    ServoCommand::Slew { frequency_ppb } => {
                        assert!(frequency_ppb.abs() <= max, "adj {frequency_ppb} above {max}")
                    }
                    other => panic!("unexpected command {other:?}"),
                }
            }
        }
    }

    #[test]
    fn integral_accumulates() {
        let mut servo = servo(ServoOptions {
            kp: 1e-6,
            ki: 0.001,
            dt_method: DtMethod::None,
            ..Default::default()
        });
        servo.sample(TimeInternal::from_nanos(1000), TimeInternal::from_secs(1));
        assert!((servo.drift_ppb() - -1.0).abs() < 1e-6);
        servo.sample(TimeInternal::from_nanos(1000), TimeInternal::from_secs(2));
        assert!((servo.drift_ppb() - -2.0).abs() < 1e-6);
    }

    #[test]
    fn measured_dt_scales_integral() {
        let mut servo = servo(ServoOptions {
            kp: 1e-6,
            ki: 0.001,
            dt_method: DtMethod::Measured,
            ..Default::default()
        });
        // First update uses the target interval (1 s).
        servo.sample(TimeInternal::from_nanos(1000), TimeInternal::from_secs(10));
        let after_first = servo.drift_ppb();
        // Second update 2 seconds later accumulates twice as much.
        servo.sample(TimeInternal::from_nanos(1000), TimeInternal::from_secs(12));
        assert!((servo.drift_ppb() - (after_first - 2.0)).abs() < 1e-6);
    }

    #[test]
    fn steps_on_large_offset_without_panic_mode() {
        let mut servo = servo(ServoOptions::default());
        let offset = TimeInternal::from_secs(5);
        assert_eq!(
            servo.sample(offset, TimeInternal::from_secs(100)),
            ServoCommand::Step {
                correction: -offset
            }
        );
    }

    #[test]
    fn no_reset_slews_instead_of_stepping() {
        let mut servo = servo(ServoOptions {
            no_reset: true,
            ..Default::default()
        });
        // The clock is ahead, so the servo slews down as hard as allowed.
        match servo.sample(TimeInternal::from_secs(5), TimeInternal::from_secs(100)) {
            ServoCommand::Slew { frequency_ppb } => {
                assert_eq!(frequency_ppb, -ServoOptions::default().max_ppb())
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn panic_mode_suspends_then_steps() {
        let mut servo = servo(ServoOptions {
            panic_mode: true,
            panic_mode_duration_mins: 1,
            ..Default::default()
        });
        let offset = TimeInternal::from_secs(2);

        let start = TimeInternal::from_secs(1000);
        assert_eq!(servo.sample(offset, start), ServoCommand::Hold);
        assert!(servo.in_panic_mode());

        // Still within the suspension.
        let half_way = start + TimeInternal::from_secs(30);
        assert_eq!(servo.sample(offset, half_way), ServoCommand::Hold);

        // Suspension over, offset still large: step.
        let after = start + TimeInternal::from_secs(61);
        assert_eq!(
            servo.sample(offset, after),
            ServoCommand::Step {
                correction: -offset
            }
        );
        assert!(!servo.in_panic_mode());
    }

    #[test]
    fn panic_mode_recovers_without_step() {
        let mut servo = servo(ServoOptions {
            panic_mode: true,
            panic_mode_duration_mins: 1,
            ..Default::default()
        });
        let start = TimeInternal::from_secs(1000);
        assert_eq!(
            servo.sample(TimeInternal::from_secs(2), start),
            ServoCommand::Hold
        );

        // The offset recovered during the suspension; once it expires,
        // normal updates resume.
        let after = start + TimeInternal::from_secs(61);
        match servo.sample(TimeInternal::from_nanos(100), after) {
            ServoCommand::Slew { .. } => {}
            other => panic!("unexpected command {other:?}"),
        }
        assert!(!servo.in_panic_mode());
    }

    #[test]
    fn drift_survives_reset_when_preserved() {
        let mut preserve = servo(ServoOptions {
            drift_handling: DriftHandling::Preserve,
            ..Default::default()
        });
        preserve.set_drift_ppb(1500.0);
        preserve.reset();
        assert_eq!(preserve.drift_ppb(), 1500.0);

        let mut reset = servo(ServoOptions {
            drift_handling: DriftHandling::Reset,
            ..Default::default()
        });
        reset.set_drift_ppb(1500.0);
        reset.reset();
        assert_eq!(reset.drift_ppb(), 0.0);
    }

    #[test]
    fn stability_detector_counts_consecutive_windows() {
        let options = ServoOptions {
            stability_detection: true,
            stability_threshold_ppb: 10.0,
            stability_period: 2,
            stability_timeout_mins: 1,
            ..Default::default()
        };
        let mut detector = StabilityDetector::new(&options, 5);

        // Two quiet windows in a row.
        detector.record(100.0);
        detector.record(101.0);
        assert_eq!(detector.tick(), None);
        detector.record(100.5);
        detector.record(100.2);
        assert_eq!(detector.tick(), Some(StabilityEvent::BecameStable));
        assert!(detector.is_stable());

        // A noisy window drops stability.
        detector.record(100.0);
        detector.record(500.0);
        assert_eq!(detector.tick(), Some(StabilityEvent::BecameUnstable));
    }

    #[test]
    fn stability_detector_times_out() {
        let options = ServoOptions {
            stability_detection: true,
            stability_threshold_ppb: 10.0,
            stability_period: 100,
            stability_timeout_mins: 1,
            ..Default::default()
        };
        // 60 s timeout at 5 s windows: 12 windows.
        let mut detector = StabilityDetector::new(&options, 5);
        let mut events = Vec::new();
        for _ in 0..12 {
            detector.record(0.0);
            if let Some(event) = detector.tick() {
                events.push(event);
            }
        }
        assert_eq!(events, vec![StabilityEvent::TimedOut]);
    }
}
