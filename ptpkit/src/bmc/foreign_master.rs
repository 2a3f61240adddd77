//! The foreign master dataset: candidate masters learned from announce
//! messages

use arrayvec::ArrayVec;

use super::dataset_comparison::ComparisonDataset;
use crate::datastructures::common::PortIdentity;
use crate::datastructures::messages::AnnounceMessage;
use crate::time::TimeInternal;

/// Compile-time bound on the table; the runtime capacity is configured
/// between 5 and this.
pub const MAX_FOREIGN_RECORDS: usize = 10;

/// Window within which a newly received sequence id may lag the stored one
/// before the announce is considered stale (u16 rollover handling).
const SEQUENCE_ID_WINDOW: u16 = 4;

#[derive(Debug, Clone, Copy)]
pub struct ForeignMasterRecord {
    pub announce: AnnounceMessage,
    pub last_announce: TimeInternal,
}

impl ForeignMasterRecord {
    pub fn source_identity(&self) -> PortIdentity {
        self.announce.header.source_port_identity
    }

    pub fn sequence_id(&self) -> u16 {
        self.announce.header.sequence_id
    }

    pub fn dataset(&self) -> ComparisonDataset {
        ComparisonDataset::from_announce(&self.announce)
    }
}

/// A bounded table of foreign masters, keyed by the announcing port's
/// identity. At most one record exists per source identity.
#[derive(Debug)]
pub struct ForeignMasterList {
    records: ArrayVec<ForeignMasterRecord, MAX_FOREIGN_RECORDS>,
    capacity: usize,
}

impl ForeignMasterList {
    /// `capacity` must already be validated to be within
    /// 5..=[MAX_FOREIGN_RECORDS].
    pub fn new(capacity: usize) -> Self {
        Self {
            records: ArrayVec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Register an announce message received at `arrival`. An already known
    /// source is updated in place; a new source evicts the record with the
    /// oldest arrival time when the table is full.
    pub fn insert_or_update(&mut self, announce: &AnnounceMessage, arrival: TimeInternal) {
        let source_identity = announce.header.source_port_identity;

        if let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.source_identity() == source_identity)
        {
            if !sequence_id_fresh(record.sequence_id(), announce.header.sequence_id) {
                return;
            }
            record.announce = *announce;
            record.last_announce = arrival;
            return;
        }

        if self.records.len() >= self.capacity {
            if let Some(oldest) = self
                .records
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.last_announce)
                .map(|(i, _)| i)
            {
                self.records.remove(oldest);
            }
        }

        self.records.push(ForeignMasterRecord {
            announce: *announce,
            last_announce: arrival,
        });
    }

    /// Drop every record that has not been refreshed within `window` before
    /// `now`.
    pub fn expire(&mut self, now: TimeInternal, window: TimeInternal) {
        self.records.retain(|r| now - r.last_announce <= window);
    }

    /// Remove a specific candidate, e.g. a timed-out master during the
    /// announce timeout grace period.
    pub fn disqualify(&mut self, source_identity: PortIdentity) {
        self.records.retain(|r| r.source_identity() != source_identity);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// The best remaining candidate under the dataset comparison order.
    pub fn best(&self, prefer_utc_valid: bool) -> Option<&ForeignMasterRecord> {
        self.records.iter().reduce(|best, candidate| {
            if candidate
                .dataset()
                .compare(&best.dataset(), prefer_utc_valid)
                .is_better()
            {
                candidate
            } else {
                best
            }
        })
    }
}

/// Announce messages must arrive with non-decreasing sequence ids (modulo
/// rollover); anything older is a duplicate or reordered packet.
fn sequence_id_fresh(stored: u16, received: u16) -> bool {
    if stored >= SEQUENCE_ID_WINDOW {
        received >= stored
    } else {
        // Close to rollover: also accept ids that wrapped.
        received >= stored || received > u16::MAX - SEQUENCE_ID_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::ClockIdentity;
    use crate::datastructures::messages::Header;

    fn announce(id: u8, sequence_id: u16) -> AnnounceMessage {
        AnnounceMessage {
            header: Header {
                source_port_identity: PortIdentity {
                    clock_identity: ClockIdentity([id; 8]),
                    port_number: 1,
                },
                sequence_id,
                ..Header::new()
            },
            origin_timestamp: Default::default(),
            current_utc_offset: 0,
            grandmaster_priority_1: id,
            grandmaster_clock_quality: Default::default(),
            grandmaster_priority_2: 128,
            grandmaster_identity: ClockIdentity([id; 8]),
            steps_removed: 0,
            time_source: Default::default(),
        }
    }

    #[test]
    fn capacity_eviction_drops_oldest_arrival() {
        let mut list = ForeignMasterList::new(5);
        for id in 0..6u8 {
            list.insert_or_update(&announce(id, 0), TimeInternal::from_secs(id as i64));
        }

        assert_eq!(list.len(), 5);
        // Record 0 had the oldest arrival and must be gone.
        assert!(list
            .records
            .iter()
            .all(|r| r.source_identity().clock_identity != ClockIdentity([0; 8])));
    }

    #[test]
    fn update_in_place_refreshes_arrival() {
        let mut list = ForeignMasterList::new(5);
        list.insert_or_update(&announce(1, 0), TimeInternal::from_secs(0));
        list.insert_or_update(&announce(2, 0), TimeInternal::from_secs(1));
        list.insert_or_update(&announce(1, 1), TimeInternal::from_secs(2));

        assert_eq!(list.len(), 2);
        list.expire(TimeInternal::from_secs(3), TimeInternal::from_secs(2));
        // Record 2 (arrival 1) is outside the window, record 1 was
        // refreshed at 2 and survives.
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.best(false).unwrap().source_identity().clock_identity,
            ClockIdentity([1; 8])
        );
    }

    #[test]
    fn stale_sequence_ids_are_ignored() {
        let mut list = ForeignMasterList::new(5);
        list.insert_or_update(&announce(1, 10), TimeInternal::from_secs(0));
        list.insert_or_update(&announce(1, 9), TimeInternal::from_secs(1));
        assert_eq!(list.best(false).unwrap().sequence_id(), 10);
        assert_eq!(list.best(false).unwrap().last_announce, TimeInternal::ZERO);

        // Rollover: stored id close to zero accepts a wrapped id.
        let mut list = ForeignMasterList::new(5);
        list.insert_or_update(&announce(1, 1), TimeInternal::from_secs(0));
        list.insert_or_update(&announce(1, u16::MAX), TimeInternal::from_secs(1));
        assert_eq!(list.best(false).unwrap().sequence_id(), u16::MAX);
    }

    #[test]
    fn best_applies_comparison_order() {
        let mut list = ForeignMasterList::new(5);
        // priority_1 equals the id here, so lower ids win.
        list.insert_or_update(&announce(30, 0), TimeInternal::from_secs(0));
        list.insert_or_update(&announce(10, 0), TimeInternal::from_secs(1));
        list.insert_or_update(&announce(20, 0), TimeInternal::from_secs(2));

        assert_eq!(
            list.best(false).unwrap().source_identity().clock_identity,
            ClockIdentity([10; 8])
        );
    }

    #[test]
    fn disqualify_removes_candidate() {
        let mut list = ForeignMasterList::new(5);
        list.insert_or_update(&announce(1, 0), TimeInternal::from_secs(0));
        list.insert_or_update(&announce(2, 0), TimeInternal::from_secs(0));
        list.disqualify(PortIdentity {
            clock_identity: ClockIdentity([1; 8]),
            port_number: 1,
        });
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.best(false).unwrap().source_identity().clock_identity,
            ClockIdentity([2; 8])
        );
    }
}
