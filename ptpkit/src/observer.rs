use crate::port::PortState;
use crate::time::TimeInternal;

/// Periodic synchronization statistics, published once per statistics
/// interval while the port is tracking a master.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlaveStatistics {
    pub offset_from_master: Option<TimeInternal>,
    pub mean_path_delay: Option<TimeInternal>,
    /// Last commanded frequency adjustment.
    pub frequency_adjustment_ppb: f64,
    /// The servo's observed drift (its integral term).
    pub drift_ppb: f64,
    pub servo_stable: bool,
    /// Consecutive delay requests that went unanswered.
    pub delay_misses: u32,
}

/// Write-only sink for events the core wants the outside world to see.
/// Implementations must not feed anything back into the protocol.
pub trait Observer {
    fn state_change(&mut self, from: PortState, to: PortState);

    fn statistics(&mut self, statistics: &SlaveStatistics);

    /// The servo stability assessment changed. `stable == false` is also
    /// reported when the servo never stabilized within the configured
    /// timeout.
    fn servo_stability(&mut self, stable: bool);
}

/// An observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn state_change(&mut self, _from: PortState, _to: PortState) {}

    fn statistics(&mut self, _statistics: &SlaveStatistics) {}

    fn servo_stability(&mut self, _stable: bool) {}
}
