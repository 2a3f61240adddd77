//! Time representation used throughout the crate

pub use interval::Interval;

mod interval;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Canonical time value: either an instant (elapsed time since the PTP epoch)
/// or a signed duration, depending on context.
///
/// The value is always kept normalized: `|nanoseconds| < 1_000_000_000` and
/// the two fields never carry opposing signs. Every constructor and every
/// arithmetic operation re-establishes this invariant, so comparing values
/// field-by-field is sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct TimeInternal {
    seconds: i64,
    nanoseconds: i32,
}

impl TimeInternal {
    pub const ZERO: TimeInternal = TimeInternal {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Build a value from unnormalized parts.
    pub fn new(seconds: i64, nanoseconds: i64) -> Self {
        Self::normalize(seconds, nanoseconds)
    }

    /// Create an instance with the given amount of seconds
    pub fn from_secs(seconds: i64) -> Self {
        Self {
            seconds,
            nanoseconds: 0,
        }
    }

    /// Create an instance with the given amount of milliseconds
    pub fn from_millis(millis: i64) -> Self {
        Self::from_nanos_i128(millis as i128 * 1_000_000)
    }

    /// Create an instance with the given amount of microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self::from_nanos_i128(micros as i128 * 1_000)
    }

    /// Create an instance with the given amount of nanoseconds
    pub fn from_nanos(nanos: i64) -> Self {
        Self::from_nanos_i128(nanos as i128)
    }

    fn from_nanos_i128(nanos: i128) -> Self {
        // Truncating division and remainder agree in sign, which is exactly
        // the normalized form.
        Self {
            seconds: (nanos / NANOS_PER_SECOND as i128) as i64,
            nanoseconds: (nanos % NANOS_PER_SECOND as i128) as i32,
        }
    }

    fn normalize(mut seconds: i64, mut nanoseconds: i64) -> Self {
        seconds += nanoseconds / NANOS_PER_SECOND;
        nanoseconds %= NANOS_PER_SECOND;

        if seconds > 0 && nanoseconds < 0 {
            seconds -= 1;
            nanoseconds += NANOS_PER_SECOND;
        } else if seconds < 0 && nanoseconds > 0 {
            seconds += 1;
            nanoseconds -= NANOS_PER_SECOND;
        }

        Self {
            seconds,
            nanoseconds: nanoseconds as i32,
        }
    }

    /// Whole seconds portion
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second portion, same sign as [TimeInternal::seconds] when both are
    /// nonzero
    pub fn subsec_nanos(&self) -> i32 {
        self.nanoseconds
    }

    /// Total amount of nanoseconds
    pub fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SECOND as i128 + self.nanoseconds as i128
    }

    /// Total amount of nanoseconds, losing some precision
    pub fn nanos_lossy(&self) -> f64 {
        self.total_nanos() as f64
    }

    /// Total amount of seconds, losing some precision
    pub fn secs_lossy(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 / NANOS_PER_SECOND as f64
    }

    pub fn is_negative(&self) -> bool {
        self.seconds < 0 || self.nanoseconds < 0
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanoseconds == 0
    }

    /// Takes the absolute (non-negative) value
    pub fn abs(self) -> Self {
        if self.is_negative() {
            -self
        } else {
            self
        }
    }
}

impl core::ops::Neg for TimeInternal {
    type Output = TimeInternal;

    fn neg(self) -> Self::Output {
        Self {
            seconds: -self.seconds,
            nanoseconds: -self.nanoseconds,
        }
    }
}

impl core::ops::Add for TimeInternal {
    type Output = TimeInternal;

    fn add(self, rhs: TimeInternal) -> Self::Output {
        Self::normalize(
            self.seconds + rhs.seconds,
            self.nanoseconds as i64 + rhs.nanoseconds as i64,
        )
    }
}

impl core::ops::AddAssign for TimeInternal {
    fn add_assign(&mut self, rhs: TimeInternal) {
        *self = *self + rhs;
    }
}

impl core::ops::Sub for TimeInternal {
    type Output = TimeInternal;

    fn sub(self, rhs: TimeInternal) -> Self::Output {
        self + -rhs
    }
}

impl core::ops::SubAssign for TimeInternal {
    fn sub_assign(&mut self, rhs: TimeInternal) {
        *self = *self - rhs;
    }
}

impl core::ops::Mul<i32> for TimeInternal {
    type Output = TimeInternal;

    fn mul(self, rhs: i32) -> Self::Output {
        Self::from_nanos_i128(self.total_nanos() * rhs as i128)
    }
}

impl core::ops::Div<i32> for TimeInternal {
    type Output = TimeInternal;

    fn div(self, rhs: i32) -> Self::Output {
        Self::from_nanos_i128(self.total_nanos() / rhs as i128)
    }
}

impl From<TimeInternal> for core::time::Duration {
    /// Saturates at zero for negative values.
    fn from(value: TimeInternal) -> Self {
        if value.is_negative() {
            core::time::Duration::ZERO
        } else {
            core::time::Duration::new(value.seconds as u64, value.nanoseconds as u32)
        }
    }
}

impl core::fmt::Display for TimeInternal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        write!(
            f,
            "{}{}.{:09}",
            sign,
            self.seconds.abs(),
            self.nanoseconds.abs()
        )
    }
}
