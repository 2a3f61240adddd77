//! The data set comparison underlying the best master clock algorithm

use core::cmp::Ordering;

use crate::datastructures::common::{ClockIdentity, ClockQuality};
use crate::datastructures::datasets::DefaultDS;
use crate::datastructures::messages::AnnounceMessage;

/// The data a clock advertises about itself, gathered either from a received
/// announce message or from our own DefaultDS, in the shape the comparison
/// algorithm wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonDataset {
    pub priority_1: u8,
    pub clock_quality: ClockQuality,
    pub priority_2: u8,
    pub identity: ClockIdentity,
    pub steps_removed: u16,
    pub utc_offset_valid: bool,
}

/// The ordering result of the dataset comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOrdering {
    /// This dataset describes the better clock
    Better,
    /// The datasets describe the same clock
    Same,
    /// The other dataset describes the better clock
    Worse,
}

impl DatasetOrdering {
    pub fn is_better(&self) -> bool {
        matches!(self, DatasetOrdering::Better)
    }
}

impl ComparisonDataset {
    pub fn from_announce(message: &AnnounceMessage) -> Self {
        Self {
            priority_1: message.grandmaster_priority_1,
            clock_quality: message.grandmaster_clock_quality,
            priority_2: message.grandmaster_priority_2,
            identity: message.grandmaster_identity,
            steps_removed: message.steps_removed,
            utc_offset_valid: message.header.current_utc_offset_valid,
        }
    }

    pub fn from_default_ds(ds: &DefaultDS) -> Self {
        Self {
            priority_1: ds.priority_1,
            clock_quality: ds.clock_quality,
            priority_2: ds.priority_2,
            identity: ds.clock_identity,
            steps_removed: 0,
            utc_offset_valid: false,
        }
    }

    /// Returns the ordering of `self` in comparison to `other`, descending
    /// priority: priority1, clock class, clock accuracy, variance,
    /// priority2, then the clock identity as the final tie break. Lower
    /// values win throughout.
    ///
    /// With `prefer_utc_valid` set (a compatibility extension, not part of
    /// the standard), a candidate announcing a valid UTC offset beats any
    /// candidate that does not, before the regular fields are considered.
    pub fn compare(&self, other: &Self, prefer_utc_valid: bool) -> DatasetOrdering {
        if prefer_utc_valid {
            match (self.utc_offset_valid, other.utc_offset_valid) {
                (true, false) => return DatasetOrdering::Better,
                (false, true) => return DatasetOrdering::Worse,
                _ => {}
            }
        }

        match self.priority_1.cmp(&other.priority_1) {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }
        match self
            .clock_quality
            .clock_class
            .cmp(&other.clock_quality.clock_class)
        {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }
        match self
            .clock_quality
            .clock_accuracy
            .cmp(&other.clock_quality.clock_accuracy)
        {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }
        match self
            .clock_quality
            .offset_scaled_log_variance
            .cmp(&other.clock_quality.offset_scaled_log_variance)
        {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }
        match self.priority_2.cmp(&other.priority_2) {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }
        match self.identity.cmp(&other.identity) {
            Ordering::Equal => {}
            Ordering::Greater => return DatasetOrdering::Worse,
            Ordering::Less => return DatasetOrdering::Better,
        }

        // Same grandmaster; a shorter path wins.
        match self.steps_removed.cmp(&other.steps_removed) {
            Ordering::Equal => DatasetOrdering::Same,
            Ordering::Greater => DatasetOrdering::Worse,
            Ordering::Less => DatasetOrdering::Better,
        }
    }
}
