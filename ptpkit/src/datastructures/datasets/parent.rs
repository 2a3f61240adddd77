use crate::datastructures::common::{ClockIdentity, ClockQuality, PortIdentity};
use crate::datastructures::messages::AnnounceMessage;

/// The ParentDS, describing the chosen master and the grandmaster it leads
/// to, section 8.2.3.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParentDS {
    pub parent_port_identity: PortIdentity,
    pub grandmaster_identity: ClockIdentity,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority_1: u8,
    pub grandmaster_priority_2: u8,
}

impl ParentDS {
    pub fn from_announce(announce: &AnnounceMessage) -> Self {
        Self {
            parent_port_identity: announce.header.source_port_identity,
            grandmaster_identity: announce.grandmaster_identity,
            grandmaster_clock_quality: announce.grandmaster_clock_quality,
            grandmaster_priority_1: announce.grandmaster_priority_1,
            grandmaster_priority_2: announce.grandmaster_priority_2,
        }
    }
}
