//! The best master clock algorithm: decides the role of the port from the
//! local clock's dataset and the qualified foreign masters.

use log::debug;

use super::dataset_comparison::ComparisonDataset;
use super::foreign_master::ForeignMasterList;
use crate::datastructures::common::PortIdentity;
use crate::datastructures::datasets::DefaultDS;
use crate::datastructures::messages::AnnounceMessage;
use crate::time::TimeInternal;

/// The role the state decision algorithm recommends for the port.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecommendedState {
    /// The local clock is the best and master-capable.
    Master,
    /// The contained foreign master is the best clock; slave to it.
    Slave(AnnounceMessage),
    /// A foreign master is better, but the local clock cannot be a slave.
    Passive,
    /// No better foreign master and the local clock cannot be a master;
    /// keep listening.
    Listening,
}

#[derive(Debug)]
pub struct Bmca {
    foreign_masters: ForeignMasterList,
    own_port_identity: PortIdentity,
    prefer_utc_valid: bool,
    require_utc_valid: bool,
}

impl Bmca {
    pub fn new(
        foreign_record_capacity: usize,
        own_port_identity: PortIdentity,
        prefer_utc_valid: bool,
        require_utc_valid: bool,
    ) -> Self {
        Self {
            foreign_masters: ForeignMasterList::new(foreign_record_capacity),
            own_port_identity,
            prefer_utc_valid,
            require_utc_valid,
        }
    }

    /// Register a received announce message. Returns whether the message
    /// qualified as a foreign master candidate.
    pub fn register_announce(&mut self, announce: &AnnounceMessage, arrival: TimeInternal) -> bool {
        // Messages from our own instance never qualify.
        if announce.header.source_port_identity.clock_identity
            == self.own_port_identity.clock_identity
        {
            return false;
        }

        // A steps removed of 255 or more means the path is unusable.
        if announce.steps_removed >= 255 {
            return false;
        }

        if self.require_utc_valid && !announce.header.current_utc_offset_valid {
            debug!(
                "ignoring announce from {}: currentUtcOffsetValid not set",
                announce.header.source_port_identity.clock_identity
            );
            return false;
        }

        self.foreign_masters.insert_or_update(announce, arrival);
        true
    }

    /// Run the state decision algorithm: expire stale candidates, pick the
    /// best remaining one and weigh it against our own dataset.
    pub fn recommended_state(
        &mut self,
        own_data: &DefaultDS,
        now: TimeInternal,
        expiry_window: TimeInternal,
    ) -> RecommendedState {
        self.foreign_masters.expire(now, expiry_window);

        let d0 = ComparisonDataset::from_default_ds(own_data);
        let best = self.foreign_masters.best(self.prefer_utc_valid);

        match best {
            None => self.master_or_listening(own_data),
            Some(best) => {
                if d0
                    .compare(&best.dataset(), self.prefer_utc_valid)
                    .is_better()
                {
                    self.master_or_listening(own_data)
                } else if !own_data.is_master_capable() {
                    RecommendedState::Slave(best.announce)
                } else {
                    RecommendedState::Passive
                }
            }
        }
    }

    fn master_or_listening(&self, own_data: &DefaultDS) -> RecommendedState {
        if own_data.is_master_capable() {
            RecommendedState::Master
        } else {
            RecommendedState::Listening
        }
    }

    /// Drop a candidate that stopped announcing (grace period failover).
    pub fn disqualify(&mut self, source_identity: PortIdentity) {
        self.foreign_masters.disqualify(source_identity);
    }

    pub fn clear(&mut self) {
        self.foreign_masters.clear();
    }

    pub fn foreign_master_count(&self) -> usize {
        self.foreign_masters.len()
    }
}
