use arrayvec::ArrayVec;

use super::MAX_FILTER_SAMPLES;

/// Fixed-capacity moving average over the most recent samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: ArrayVec<i64, MAX_FILTER_SAMPLES>,
    capacity: usize,
}

impl MovingAverage {
    /// `capacity` must already be validated to be within
    /// 1..=[MAX_FILTER_SAMPLES].
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: ArrayVec::new(),
            capacity,
        }
    }

    pub fn feed(&mut self, sample: i64) -> i64 {
        if self.samples.len() == self.capacity {
            self.samples.remove(0);
        }
        self.samples.push(sample);
        self.mean_i64()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|&s| s as f64).sum::<f64>() / self.samples.len() as f64
    }

    fn mean_i64(&self) -> i64 {
        self.mean() as i64
    }

    /// Population standard deviation of the buffered samples.
    pub fn std_dev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|&s| {
                let dev = s as f64 - mean;
                dev * dev
            })
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
