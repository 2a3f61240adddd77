use super::TimeInternal;

/// A log2 message interval as used in PTP message headers and datasets.
///
/// The wire representation is the exponent: an interval of `n` means
/// `2^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(i8);

impl Interval {
    pub const ONE_SECOND: Interval = Interval(0);
    pub const TWO_SECONDS: Interval = Interval(1);

    pub fn from_log_2(log_2: i8) -> Self {
        Self(log_2)
    }

    pub fn log_2(self) -> i8 {
        self.0
    }

    pub fn seconds(self) -> f64 {
        2.0f64.powi(self.0 as i32)
    }

    pub fn as_time(self) -> TimeInternal {
        TimeInternal::from_nanos((self.seconds() * 1e9) as i64)
    }

    pub fn as_core_duration(self) -> core::time::Duration {
        core::time::Duration::from_secs_f64(self.seconds())
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::ONE_SECOND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_interval() {
        assert_eq!(Interval::from_log_2(0).as_time(), TimeInternal::from_secs(1));
        assert_eq!(
            Interval::from_log_2(-1).as_time(),
            TimeInternal::from_millis(500)
        );
        assert_eq!(Interval::from_log_2(1).as_time(), TimeInternal::from_secs(2));
        assert_eq!(
            Interval::from_log_2(-7).as_core_duration(),
            core::time::Duration::from_micros(7812) + core::time::Duration::from_nanos(500)
        );
    }
}
