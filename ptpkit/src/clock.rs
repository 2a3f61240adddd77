use crate::time::TimeInternal;

/// Abstraction over the local (system or hardware) clock.
///
/// Implementations live in the embedding daemon; the core only ever reads
/// the time and issues corrections.
pub trait Clock {
    type Error: core::fmt::Debug;

    /// The current local time.
    fn now(&self) -> TimeInternal;

    /// Hard-set the clock to the given time.
    fn set_time(&mut self, time: TimeInternal) -> Result<(), Self::Error>;

    /// Adjust the clock frequency in parts per billion; positive speeds the
    /// clock up.
    fn adjust_frequency(&mut self, frequency_ppb: f64) -> Result<(), Self::Error>;

    /// Jump the clock by the given (signed) correction.
    fn step(&mut self, correction: TimeInternal) -> Result<(), Self::Error>;
}

/// A fake clock for tests: time only moves when told to. Cloning yields a
/// handle onto the same clock, so a test can keep one while the port owns
/// another.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct TestClock {
    inner: std::rc::Rc<std::cell::RefCell<TestClockInner>>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct TestClockInner {
    now: TimeInternal,
    frequency_ppb: f64,
    steps: Vec<TimeInternal>,
}

#[cfg(test)]
impl TestClock {
    pub fn set_now(&self, now: TimeInternal) {
        self.inner.borrow_mut().now = now;
    }

    pub fn frequency_ppb(&self) -> f64 {
        self.inner.borrow().frequency_ppb
    }

    pub fn steps(&self) -> Vec<TimeInternal> {
        self.inner.borrow().steps.clone()
    }
}

#[cfg(test)]
impl Clock for TestClock {
    type Error = core::convert::Infallible;

    fn now(&self) -> TimeInternal {
        self.inner.borrow().now
    }

    fn set_time(&mut self, time: TimeInternal) -> Result<(), Self::Error> {
        self.inner.borrow_mut().now = time;
        Ok(())
    }

    fn adjust_frequency(&mut self, frequency_ppb: f64) -> Result<(), Self::Error> {
        self.inner.borrow_mut().frequency_ppb = frequency_ppb;
        Ok(())
    }

    fn step(&mut self, correction: TimeInternal) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        let now = inner.now;
        inner.now = now + correction;
        inner.steps.push(correction);
        Ok(())
    }
}
