//! The system clock backend: CLOCK_REALTIME disciplined through adjtimex.

use std::io;

use ptpkit::{Clock, TimeInternal};

/// adjtimex frequency unit: parts per million with a 16-bit binary fraction,
/// so 1 ppb is 65.536 units.
const FREQ_UNITS_PER_PPB: f64 = 65.536;

/// The Linux system clock.
///
/// Cloning is free; every handle refers to the same CLOCK_REALTIME.
#[derive(Debug, Default, Clone)]
pub struct LinuxClock;

impl LinuxClock {
    /// The current kernel frequency correction in ppb, used to seed the
    /// servo drift for the preserve/file handling modes.
    pub fn read_frequency_ppb(&self) -> io::Result<f64> {
        let mut timex = new_timex();
        // modes == 0 reads without modifying anything.
        if unsafe { libc::adjtimex(&mut timex) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(timex.freq as f64 / FREQ_UNITS_PER_PPB)
    }
}

impl Clock for LinuxClock {
    type Error = io::Error;

    fn now(&self) -> TimeInternal {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // clock_gettime on CLOCK_REALTIME cannot fail with a valid pointer.
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        TimeInternal::new(ts.tv_sec as i64, ts.tv_nsec as i64)
    }

    fn set_time(&mut self, time: TimeInternal) -> Result<(), Self::Error> {
        let ts = libc::timespec {
            tv_sec: time.seconds() as libc::time_t,
            tv_nsec: time.subsec_nanos() as libc::c_long,
        };
        if unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &ts) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn adjust_frequency(&mut self, frequency_ppb: f64) -> Result<(), Self::Error> {
        let mut timex = new_timex();
        timex.modes = libc::ADJ_FREQUENCY;
        timex.freq = (frequency_ppb * FREQ_UNITS_PER_PPB) as libc::c_long;
        if unsafe { libc::adjtimex(&mut timex) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn step(&mut self, correction: TimeInternal) -> Result<(), Self::Error> {
        let now = self.now();
        self.set_time(now + correction)
    }
}

fn new_timex() -> libc::timex {
    // timex has a platform-dependent set of padding fields; zeroing is the
    // portable way to construct one.
    unsafe { std::mem::zeroed() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_sane() {
        let clock = LinuxClock;
        let now = clock.now();
        // Past 2001-09-09 (1e9 seconds) and normalized.
        assert!(now.seconds() > 1_000_000_000);
        assert!(now.subsec_nanos() >= 0 && now.subsec_nanos() < 1_000_000_000);
    }

    #[test]
    fn frequency_conversion_round_trips() {
        let ppb = 1500.0;
        let units = (ppb * FREQ_UNITS_PER_PPB) as libc::c_long;
        let back = units as f64 / FREQ_UNITS_PER_PPB;
        assert!((back - ppb).abs() < 0.001);
    }
}
