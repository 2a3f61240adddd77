use crate::config::InstanceConfig;
use crate::datastructures::common::{ClockIdentity, ClockQuality};

/// The DefaultDS, describing the local clock itself, section 8.2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDS {
    pub clock_identity: ClockIdentity,
    pub clock_quality: ClockQuality,
    pub priority_1: u8,
    pub priority_2: u8,
    pub domain_number: u8,
    pub slave_only: bool,
}

impl DefaultDS {
    pub fn new(config: &InstanceConfig) -> Self {
        let mut clock_quality = config.clock_quality;
        if config.slave_only {
            // A slave-only clock always advertises clock class 255.
            clock_quality.clock_class = 255;
        }

        Self {
            clock_identity: config.clock_identity,
            clock_quality,
            priority_1: config.priority_1,
            priority_2: config.priority_2,
            domain_number: config.domain_number,
            slave_only: config.slave_only,
        }
    }

    /// Master-capable clocks are those with a clock class below 128.
    pub fn is_master_capable(&self) -> bool {
        self.clock_quality.clock_class < 128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_only_forces_clock_class() {
        let config = InstanceConfig {
            clock_identity: ClockIdentity([1; 8]),
            slave_only: true,
            ..Default::default()
        };
        let ds = DefaultDS::new(&config);
        assert_eq!(ds.clock_quality.clock_class, 255);
        assert!(!ds.is_master_capable());
    }

    #[test]
    fn master_capability_boundary() {
        let mut config = InstanceConfig::default();
        config.clock_quality.clock_class = 127;
        assert!(DefaultDS::new(&config).is_master_capable());
        config.clock_quality.clock_class = 128;
        assert!(!DefaultDS::new(&config).is_master_capable());
    }
}
