//! Bookkeeping for the sync and delay measurement exchanges.
//!
//! This module only tracks timestamps and sequence ids and computes raw
//! values; filtering and servo handling happen in [`super::Port`].

use log::{debug, warn};

use crate::config::DelayMechanism;
use crate::datastructures::common::PortIdentity;
use crate::datastructures::messages::{
    DelayRespMessage, FollowUpMessage, PdelayRespFollowUpMessage, PdelayRespMessage, SyncMessage,
};
use crate::time::TimeInternal;

/// A completed sync measurement: the master-to-slave difference
/// `delta = t2 - t1` and the local receive time it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMeasurement {
    pub delta: TimeInternal,
    pub event_time: TimeInternal,
}

#[derive(Debug, PartialEq, Eq)]
enum SyncState {
    Initial,
    /// Two-step sync seen, follow-up outstanding.
    AfterSync {
        sync_id: u16,
        recv_time: TimeInternal,
        sync_correction: TimeInternal,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct PendingDelayReq {
    sequence_id: u16,
    /// t3, filled in when the departure timestamp arrives.
    send_time: Option<TimeInternal>,
}

#[derive(Debug, PartialEq, Eq)]
struct PendingPdelayReq {
    sequence_id: u16,
    /// t1, filled in when the departure timestamp arrives.
    send_time: Option<TimeInternal>,
    /// (t2, t4, accumulated correction) once the response arrived; a
    /// two-step exchange then waits for the response follow-up carrying t3.
    response: Option<(TimeInternal, TimeInternal, TimeInternal)>,
}

/// Tracks the in-flight measurement exchanges of one port.
#[derive(Debug)]
pub struct MeasurementTracker {
    mechanism: DelayMechanism,
    sync_state: SyncState,
    pending_followup: Option<FollowUpMessage>,
    /// Most recent completed sync measurement, input to the path delay
    /// computation.
    last_sync: Option<SyncMeasurement>,
    pending_delay: Option<PendingDelayReq>,
    pending_pdelay: Option<PendingPdelayReq>,
    consecutive_misses: u32,
}

impl MeasurementTracker {
    pub fn new(mechanism: DelayMechanism) -> Self {
        Self {
            mechanism,
            sync_state: SyncState::Initial,
            pending_followup: None,
            last_sync: None,
            pending_delay: None,
            pending_pdelay: None,
            consecutive_misses: 0,
        }
    }

    /// Reset for a new master or after a protocol reset.
    pub fn reset(&mut self) {
        self.sync_state = SyncState::Initial;
        self.pending_followup = None;
        self.last_sync = None;
        self.pending_delay = None;
        self.pending_pdelay = None;
        self.consecutive_misses = 0;
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Handle a sync message received at `recv_time` (t2). For one-step
    /// syncs the measurement completes immediately; a two-step sync waits
    /// for its follow-up.
    pub fn handle_sync(
        &mut self,
        message: &SyncMessage,
        recv_time: TimeInternal,
    ) -> Option<SyncMeasurement> {
        debug!("received sync {}", message.header.sequence_id);
        if message.header.two_step_flag {
            self.sync_state = SyncState::AfterSync {
                sync_id: message.header.sequence_id,
                recv_time,
                sync_correction: message.header.correction(),
            };

            // A matching follow-up may already have arrived out of order.
            if let Some(follow_up) = self.pending_followup.take() {
                return self.handle_follow_up(&follow_up);
            }
            None
        } else {
            self.sync_state = SyncState::Initial;
            let send_time =
                TimeInternal::from(message.origin_timestamp) + message.header.correction();
            Some(self.complete_sync(send_time, recv_time))
        }
    }

    pub fn handle_follow_up(&mut self, message: &FollowUpMessage) -> Option<SyncMeasurement> {
        debug!("received follow-up {}", message.header.sequence_id);
        match self.sync_state {
            SyncState::AfterSync {
                sync_id,
                recv_time,
                sync_correction,
            } if sync_id == message.header.sequence_id => {
                self.pending_followup = None;
                self.sync_state = SyncState::Initial;
                let send_time = TimeInternal::from(message.precise_origin_timestamp)
                    + message.header.correction()
                    + sync_correction;
                Some(self.complete_sync(send_time, recv_time))
            }
            _ => {
                // Not the follow-up we are waiting for; keep it around in
                // case its sync is still in flight.
                self.pending_followup = Some(*message);
                None
            }
        }
    }

    fn complete_sync(&mut self, send_time: TimeInternal, recv_time: TimeInternal) -> SyncMeasurement {
        let measurement = SyncMeasurement {
            delta: recv_time - send_time,
            event_time: recv_time,
        };
        self.last_sync = Some(measurement);
        measurement
    }

    /// A delay request was issued. Requests that never got their response
    /// count as misses.
    pub fn delay_req_issued(&mut self, sequence_id: u16) {
        if self.pending_delay.take().is_some() || self.pending_pdelay.take().is_some() {
            self.consecutive_misses = self.consecutive_misses.saturating_add(1);
            debug!(
                "delay request went unanswered ({} consecutive)",
                self.consecutive_misses
            );
        }
        match self.mechanism {
            DelayMechanism::E2E => {
                self.pending_delay = Some(PendingDelayReq {
                    sequence_id,
                    send_time: None,
                });
            }
            DelayMechanism::P2P => {
                self.pending_pdelay = Some(PendingPdelayReq {
                    sequence_id,
                    send_time: None,
                    response: None,
                });
            }
            DelayMechanism::Disabled => {}
        }
    }

    /// Record the departure timestamp (t3 for E2E, t1 for P2P) of an issued
    /// request.
    pub fn delay_req_timestamp(&mut self, sequence_id: u16, send_time: TimeInternal) {
        match self.mechanism {
            DelayMechanism::E2E => {
                if let Some(pending) = &mut self.pending_delay {
                    if pending.sequence_id == sequence_id {
                        pending.send_time = Some(send_time);
                    }
                }
            }
            DelayMechanism::P2P => {
                if let Some(pending) = &mut self.pending_pdelay {
                    if pending.sequence_id == sequence_id {
                        pending.send_time = Some(send_time);
                    }
                }
            }
            DelayMechanism::Disabled => {}
        }
    }

    /// Handle a delay response. Returns the raw mean path delay when the
    /// exchange completes: `((t2 - t1) + (t4 - t3)) / 2`.
    pub fn handle_delay_resp(
        &mut self,
        message: &DelayRespMessage,
        own_identity: PortIdentity,
    ) -> Option<TimeInternal> {
        if message.requesting_port_identity != own_identity {
            return None;
        }

        let pending = match &self.pending_delay {
            Some(pending) if pending.sequence_id == message.header.sequence_id => pending,
            _ => {
                debug!(
                    "discarding delay response with unexpected sequence id {}",
                    message.header.sequence_id
                );
                return None;
            }
        };

        let send_time = pending.send_time?;
        self.pending_delay = None;
        self.consecutive_misses = 0;

        let last_sync = self.last_sync?;
        // t4, with the correction accumulated along the return path removed.
        let recv_time = TimeInternal::from(message.receive_timestamp) - message.header.correction();

        let raw = (last_sync.delta + (recv_time - send_time)) / 2;
        if raw.is_negative() {
            warn!("discarding negative path delay {raw}");
            return None;
        }
        Some(raw)
    }

    /// Handle a peer delay response received at `recv_time` (t4). One-step
    /// responders fold the turnaround time into the correction field and the
    /// link delay completes here; two-step exchanges wait for the follow-up.
    pub fn handle_pdelay_resp(
        &mut self,
        message: &PdelayRespMessage,
        recv_time: TimeInternal,
        own_identity: PortIdentity,
    ) -> Option<TimeInternal> {
        if message.requesting_port_identity != own_identity {
            return None;
        }

        let pending = match &mut self.pending_pdelay {
            Some(pending) if pending.sequence_id == message.header.sequence_id => pending,
            _ => {
                debug!(
                    "discarding peer delay response with unexpected sequence id {}",
                    message.header.sequence_id
                );
                return None;
            }
        };

        let send_time = pending.send_time?;

        if message.header.two_step_flag {
            pending.response = Some((
                TimeInternal::from(message.request_receipt_timestamp),
                recv_time,
                message.header.correction(),
            ));
            return None;
        }

        // One-step: correction holds the responder's turnaround.
        self.pending_pdelay = None;
        self.consecutive_misses = 0;
        let raw = (recv_time - send_time - message.header.correction()) / 2;
        if raw.is_negative() {
            warn!("discarding negative peer link delay {raw}");
            return None;
        }
        Some(raw)
    }

    /// Complete a two-step peer delay exchange:
    /// `((t4 - t1) - (t3 - t2)) / 2`.
    pub fn handle_pdelay_resp_follow_up(
        &mut self,
        message: &PdelayRespFollowUpMessage,
        own_identity: PortIdentity,
    ) -> Option<TimeInternal> {
        if message.requesting_port_identity != own_identity {
            return None;
        }

        let pending = match &self.pending_pdelay {
            Some(pending) if pending.sequence_id == message.header.sequence_id => pending,
            _ => return None,
        };

        let send_time = pending.send_time?;
        let (request_receipt, recv_time, correction) = pending.response?;
        self.pending_pdelay = None;
        self.consecutive_misses = 0;

        let response_origin =
            TimeInternal::from(message.response_origin_timestamp) + message.header.correction();
        let turnaround = response_origin - request_receipt;
        let raw = (recv_time - send_time - turnaround - correction) / 2;
        if raw.is_negative() {
            warn!("discarding negative peer link delay {raw}");
            return None;
        }
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::{ClockIdentity, WireTimestamp};
    use crate::datastructures::messages::Header;

    fn identity(id: u8) -> PortIdentity {
        PortIdentity {
            clock_identity: ClockIdentity([id; 8]),
            port_number: 1,
        }
    }

    fn timestamp(nanos: u64) -> WireTimestamp {
        WireTimestamp {
            seconds: 0,
            nanos: nanos as u32,
        }
    }

    #[test]
    fn end_to_end_exchange() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);

        // t1 = 1000 (one-step sync), t2 = 1050.
        let sync = tracker.handle_sync(
            &SyncMessage {
                header: Header::new(),
                origin_timestamp: timestamp(1000),
            },
            TimeInternal::from_nanos(1050),
        );
        assert_eq!(
            sync,
            Some(SyncMeasurement {
                delta: TimeInternal::from_nanos(50),
                event_time: TimeInternal::from_nanos(1050),
            })
        );

        // t3 = 2000, t4 = 2060.
        tracker.delay_req_issued(17);
        tracker.delay_req_timestamp(17, TimeInternal::from_nanos(2000));
        let raw = tracker.handle_delay_resp(
            &DelayRespMessage {
                header: Header {
                    sequence_id: 17,
                    ..Header::new()
                },
                receive_timestamp: timestamp(2060),
                requesting_port_identity: identity(1),
            },
            identity(1),
        );

        // meanPathDelay = ((t2 - t1) + (t4 - t3)) / 2 = (50 + 60) / 2.
        assert_eq!(raw, Some(TimeInternal::from_nanos(55)));
        assert_eq!(tracker.consecutive_misses(), 0);
    }

    #[test]
    fn two_step_sync_waits_for_follow_up() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);

        let sync = tracker.handle_sync(
            &SyncMessage {
                header: Header {
                    two_step_flag: true,
                    sequence_id: 5,
                    correction_field: 100 << 16,
                    ..Header::new()
                },
                origin_timestamp: timestamp(0),
            },
            TimeInternal::from_nanos(2000),
        );
        assert_eq!(sync, None);

        let measurement = tracker.handle_follow_up(&FollowUpMessage {
            header: Header {
                sequence_id: 5,
                correction_field: 200 << 16,
                ..Header::new()
            },
            precise_origin_timestamp: timestamp(1000),
        });

        // t1 = 1000 + 100 + 200 corrections, t2 = 2000.
        assert_eq!(
            measurement,
            Some(SyncMeasurement {
                delta: TimeInternal::from_nanos(700),
                event_time: TimeInternal::from_nanos(2000),
            })
        );
    }

    #[test]
    fn follow_up_before_sync_is_buffered() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);

        assert_eq!(
            tracker.handle_follow_up(&FollowUpMessage {
                header: Header {
                    sequence_id: 9,
                    ..Header::new()
                },
                precise_origin_timestamp: timestamp(1000),
            }),
            None
        );

        let measurement = tracker.handle_sync(
            &SyncMessage {
                header: Header {
                    two_step_flag: true,
                    sequence_id: 9,
                    ..Header::new()
                },
                origin_timestamp: timestamp(0),
            },
            TimeInternal::from_nanos(1500),
        );
        assert_eq!(
            measurement,
            Some(SyncMeasurement {
                delta: TimeInternal::from_nanos(500),
                event_time: TimeInternal::from_nanos(1500),
            })
        );
    }

    #[test]
    fn mismatched_follow_up_is_held_not_applied() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);

        tracker.handle_sync(
            &SyncMessage {
                header: Header {
                    two_step_flag: true,
                    sequence_id: 10,
                    ..Header::new()
                },
                origin_timestamp: timestamp(0),
            },
            TimeInternal::from_nanos(1500),
        );

        // Follow-up for a different sync must not complete this one.
        assert_eq!(
            tracker.handle_follow_up(&FollowUpMessage {
                header: Header {
                    sequence_id: 9,
                    ..Header::new()
                },
                precise_origin_timestamp: timestamp(1000),
            }),
            None
        );
        assert_ne!(tracker.sync_state, SyncState::Initial);
    }

    #[test]
    fn delay_resp_sequence_and_identity_mismatches_are_discarded() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);
        tracker.handle_sync(
            &SyncMessage {
                header: Header::new(),
                origin_timestamp: timestamp(1000),
            },
            TimeInternal::from_nanos(1050),
        );
        tracker.delay_req_issued(17);
        tracker.delay_req_timestamp(17, TimeInternal::from_nanos(2000));

        // Wrong sequence id.
        let resp = DelayRespMessage {
            header: Header {
                sequence_id: 16,
                ..Header::new()
            },
            receive_timestamp: timestamp(2060),
            requesting_port_identity: identity(1),
        };
        assert_eq!(tracker.handle_delay_resp(&resp, identity(1)), None);

        // Wrong requesting identity.
        let resp = DelayRespMessage {
            header: Header {
                sequence_id: 17,
                ..Header::new()
            },
            receive_timestamp: timestamp(2060),
            requesting_port_identity: identity(2),
        };
        assert_eq!(tracker.handle_delay_resp(&resp, identity(1)), None);

        // The pending request is still answerable afterwards.
        let resp = DelayRespMessage {
            header: Header {
                sequence_id: 17,
                ..Header::new()
            },
            receive_timestamp: timestamp(2060),
            requesting_port_identity: identity(1),
        };
        assert!(tracker.handle_delay_resp(&resp, identity(1)).is_some());
    }

    #[test]
    fn unanswered_requests_count_as_misses() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::E2E);
        tracker.delay_req_issued(1);
        tracker.delay_req_issued(2);
        tracker.delay_req_issued(3);
        assert_eq!(tracker.consecutive_misses(), 2);
    }

    #[test]
    fn peer_delay_two_step_exchange() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::P2P);

        tracker.delay_req_issued(7);
        // t1 = 1000.
        tracker.delay_req_timestamp(7, TimeInternal::from_nanos(1000));

        // Response: t2 = 5000 remote, received at t4 = 1100 local.
        let resp = PdelayRespMessage {
            header: Header {
                two_step_flag: true,
                sequence_id: 7,
                ..Header::new()
            },
            request_receipt_timestamp: timestamp(5000),
            requesting_port_identity: identity(1),
        };
        assert_eq!(
            tracker.handle_pdelay_resp(&resp, TimeInternal::from_nanos(1100), identity(1)),
            None
        );

        // Follow-up: t3 = 5020 remote. Link delay:
        // ((t4 - t1) - (t3 - t2)) / 2 = (100 - 20) / 2 = 40.
        let follow_up = PdelayRespFollowUpMessage {
            header: Header {
                sequence_id: 7,
                ..Header::new()
            },
            response_origin_timestamp: timestamp(5020),
            requesting_port_identity: identity(1),
        };
        assert_eq!(
            tracker.handle_pdelay_resp_follow_up(&follow_up, identity(1)),
            Some(TimeInternal::from_nanos(40))
        );
    }

    #[test]
    fn peer_delay_one_step_uses_correction() {
        let mut tracker = MeasurementTracker::new(DelayMechanism::P2P);

        tracker.delay_req_issued(7);
        tracker.delay_req_timestamp(7, TimeInternal::from_nanos(1000));

        // One-step responder: turnaround of 20 ns in the correction field.
        let resp = PdelayRespMessage {
            header: Header {
                sequence_id: 7,
                correction_field: 20 << 16,
                ..Header::new()
            },
            request_receipt_timestamp: timestamp(0),
            requesting_port_identity: identity(1),
        };
        assert_eq!(
            tracker.handle_pdelay_resp(&resp, TimeInternal::from_nanos(1100), identity(1)),
            Some(TimeInternal::from_nanos(40))
        );
    }
}
