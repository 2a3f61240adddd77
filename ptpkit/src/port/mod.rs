//! The PTP port: the state machine tying BMCA, measurement, filtering and
//! the servo together.
//!
//! The port is event driven and performs no I/O. The embedding loop feeds it
//! received packets, departure timestamps and timer expiries; every handler
//! returns a list of [`PortAction`]s telling the loop what to send and which
//! timers to re-arm.

pub use measurement::{MeasurementTracker, SyncMeasurement};
pub use state::PortState;

pub mod measurement;
mod sequence_id;
mod state;


use arrayvec::ArrayVec;
use log::{debug, info, warn};
use rand::Rng;

use crate::bmc::bmca::{Bmca, RecommendedState};
use crate::clock::Clock;
use crate::config::{
    DelayMechanism, InstanceConfig, OutlierAction, OutlierFilterOptions, PortSettings,
    ServoOptions,
};
use crate::datastructures::common::{PortIdentity, WireTimestamp};
use crate::datastructures::datasets::{CurrentDS, DefaultDS, ParentDS, TimePropertiesDS};
use crate::datastructures::messages::{
    AnnounceMessage, DelayReqMessage, DelayRespMessage, FollowUpMessage, Header, Message,
    PdelayReqMessage, PdelayRespFollowUpMessage, PdelayRespMessage, SyncMessage,
};
use crate::filters::{ExponentialSmooth, SampleFilter};
use crate::observer::{Observer, SlaveStatistics};
use crate::servo::{PiServo, ServoCommand, StabilityDetector, StabilityEvent};
use crate::time::TimeInternal;
use sequence_id::SequenceIdGenerator;

/// Consecutive failed clock calls before the port goes to FAULTY.
const CLOCK_FAULT_LIMIT: u32 = 3;

/// The one-way delay smoother: accepted samples enter the estimate with a
/// weight of one over the configured stiffness.
fn delay_smoother(options: &ServoOptions) -> SampleFilter {
    SampleFilter::ExponentialSmooth(ExponentialSmooth::new(
        1.0 / options.delayfilter_stiffness.max(1) as f64,
    ))
}

/// Identifies an event message awaiting its departure timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampContext {
    Sync {
        sequence_id: u16,
    },
    DelayReq {
        sequence_id: u16,
    },
    PdelayReq {
        sequence_id: u16,
    },
    /// A peer delay response we sent; the follow-up carries its departure
    /// time back to the requestor.
    PdelayResp {
        sequence_id: u16,
        requestor: PortIdentity,
    },
}

/// An action the embedding event loop must perform on behalf of the port.
#[derive(Debug)]
pub enum PortAction {
    /// Send over the event socket and report the departure timestamp back
    /// via [`Port::handle_send_timestamp`].
    SendEvent {
        context: TimestampContext,
        data: Vec<u8>,
    },
    /// Send over the general socket.
    SendGeneral { data: Vec<u8> },
    ResetAnnounceTimer { duration: core::time::Duration },
    ResetSyncTimer { duration: core::time::Duration },
    ResetDelayRequestTimer { duration: core::time::Duration },
    ResetAnnounceReceiptTimer { duration: core::time::Duration },
}

pub type PortActionList = ArrayVec<PortAction, 8>;

/// A PTP ordinary clock port.
pub struct Port<C, O, R> {
    state: PortState,
    /// The first LISTENING announce timeout re-arms instead of acting.
    listening_first_pass: bool,
    /// Set while waiting out the announce timeout grace period in SLAVE.
    in_grace_period: bool,
    settings: PortSettings,
    servo_options: ServoOptions,
    port_identity: PortIdentity,
    default_ds: DefaultDS,
    current_ds: CurrentDS,
    parent_ds: ParentDS,
    time_properties_ds: TimePropertiesDS,
    bmca: Bmca,
    clock: C,
    observer: O,
    rng: R,
    servo: PiServo,
    stability: StabilityDetector,
    delay_filter: SampleFilter,
    delay_filter_action: OutlierAction,
    /// Smooths the accepted delay samples into the path delay estimate.
    delay_smoother: SampleFilter,
    sync_filter: SampleFilter,
    sync_filter_action: OutlierAction,
    tracker: MeasurementTracker,
    /// Filtered mean path (or peer link) delay.
    mean_path_delay: Option<TimeInternal>,
    /// Filtered offset from master, for the statistics output.
    offset_from_master: Option<TimeInternal>,
    remote_master: Option<PortIdentity>,
    /// Delay request interval advertised by the master in its delay
    /// responses (log 2 seconds).
    master_delay_interval: Option<i8>,
    /// Statistics periods left before the servo may be driven.
    calibration_remaining: u32,
    clock_failures: u32,
    announce_seq: SequenceIdGenerator,
    sync_seq: SequenceIdGenerator,
    delay_seq: SequenceIdGenerator,
}

impl<C: Clock, O: Observer, R: Rng> Port<C, O, R> {
    /// All configuration must have been validated; see [`crate::config`].
    pub fn new(
        instance: &InstanceConfig,
        settings: PortSettings,
        delay_filter_options: &OutlierFilterOptions,
        sync_filter_options: &OutlierFilterOptions,
        servo_options: ServoOptions,
        clock: C,
        observer: O,
        rng: R,
    ) -> Self {
        let port_identity = PortIdentity {
            clock_identity: instance.clock_identity,
            port_number: 1,
        };
        let default_ds = DefaultDS::new(instance);
        let bmca = Bmca::new(
            settings.foreign_record_capacity,
            port_identity,
            settings.prefer_utc_valid,
            settings.require_utc_valid,
        );
        let servo = PiServo::new(servo_options, settings.sync_interval.seconds());
        let stability = StabilityDetector::new(&servo_options, settings.stats_interval_secs);

        Self {
            state: PortState::Initializing,
            listening_first_pass: true,
            in_grace_period: false,
            settings,
            servo_options,
            port_identity,
            default_ds,
            current_ds: CurrentDS::default(),
            parent_ds: ParentDS::default(),
            time_properties_ds: TimePropertiesDS::default(),
            bmca,
            clock,
            observer,
            rng,
            servo,
            stability,
            delay_filter: SampleFilter::from_outlier_options(delay_filter_options),
            delay_filter_action: delay_filter_options.action,
            delay_smoother: delay_smoother(&servo_options),
            sync_filter: SampleFilter::from_outlier_options(sync_filter_options),
            sync_filter_action: sync_filter_options.action,
            tracker: MeasurementTracker::new(settings.delay_mechanism),
            mean_path_delay: None,
            offset_from_master: None,
            remote_master: None,
            master_delay_interval: None,
            calibration_remaining: 0,
            clock_failures: 0,
            announce_seq: SequenceIdGenerator::new(),
            sync_seq: SequenceIdGenerator::new(),
            delay_seq: SequenceIdGenerator::new(),
        }
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn port_identity(&self) -> PortIdentity {
        self.port_identity
    }

    pub fn remote_master(&self) -> Option<PortIdentity> {
        self.remote_master
    }

    pub fn mean_path_delay(&self) -> Option<TimeInternal> {
        self.mean_path_delay
    }

    pub fn offset_from_master(&self) -> Option<TimeInternal> {
        self.offset_from_master
    }

    pub fn current_ds(&self) -> &CurrentDS {
        &self.current_ds
    }

    pub fn parent_ds(&self) -> &ParentDS {
        &self.parent_ds
    }

    pub fn time_properties_ds(&self) -> &TimePropertiesDS {
        &self.time_properties_ds
    }

    /// Seed the servo drift, e.g. from a drift file (`drift_handling =
    /// file`) or the kernel frequency at startup.
    pub fn seed_drift_ppb(&mut self, drift_ppb: f64) {
        self.servo.set_drift_ppb(drift_ppb);
    }

    pub fn drift_ppb(&self) -> f64 {
        self.servo.drift_ppb()
    }

    /// Apply new servo settings in place (reload). The accumulated drift
    /// carries over; the stability assessment starts fresh since its
    /// parameters may have changed shape.
    pub fn reconfigure_servo(&mut self, options: ServoOptions) {
        let drift = self.servo.drift_ppb();
        self.servo = PiServo::new(options, self.settings.sync_interval.seconds());
        self.servo.set_drift_ppb(drift);
        self.stability = StabilityDetector::new(&options, self.settings.stats_interval_secs);
        if options.delayfilter_stiffness != self.servo_options.delayfilter_stiffness {
            self.delay_smoother = delay_smoother(&options);
        }
        self.servo_options = options;
    }

    /// Network and timers are up; leave INITIALIZING.
    pub fn enable(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();
        if self.state != PortState::Initializing {
            return actions;
        }
        self.transition(PortState::Listening);
        self.listening_first_pass = true;
        actions.push(PortAction::ResetAnnounceReceiptTimer {
            duration: self.announce_receipt_duration(),
        });
        if self.settings.delay_mechanism == DelayMechanism::P2P {
            // Peer delay runs on the link regardless of port role.
            actions.push(PortAction::ResetDelayRequestTimer {
                duration: self.delay_req_duration(),
            });
        }
        actions
    }

    /// An unrecoverable fault (e.g. the transport died).
    pub fn fault(&mut self) -> PortActionList {
        if self.state != PortState::Faulty {
            self.transition(PortState::Faulty);
            self.clear_slave_state();
        }
        PortActionList::new()
    }

    /// The fault condition cleared; reinitialize.
    pub fn recover(&mut self) -> PortActionList {
        if self.state == PortState::Faulty {
            self.transition(PortState::Initializing);
        }
        PortActionList::new()
    }

    pub fn disable(&mut self) -> PortActionList {
        if self.state != PortState::Disabled {
            self.transition(PortState::Disabled);
            self.clear_slave_state();
            self.bmca.clear();
        }
        PortActionList::new()
    }

    pub fn enable_port(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();
        if self.state == PortState::Disabled {
            self.transition(PortState::Listening);
            self.listening_first_pass = true;
            actions.push(PortAction::ResetAnnounceReceiptTimer {
                duration: self.announce_receipt_duration(),
            });
        }
        actions
    }

    /// Periodic BMCA run.
    pub fn handle_bmca_timer(&mut self) -> PortActionList {
        match self.state {
            PortState::Initializing | PortState::Faulty | PortState::Disabled => {
                return PortActionList::new()
            }
            _ => {}
        }

        let now = self.clock.now();
        let window = self.settings.foreign_master_window();
        let recommendation = self.bmca.recommended_state(&self.default_ds, now, window);

        match recommendation {
            RecommendedState::Master => self.recommend_master(),
            RecommendedState::Slave(announce) => self.recommend_slave(&announce),
            RecommendedState::Passive => {
                if self.state != PortState::Passive {
                    self.clear_slave_state();
                    self.transition(PortState::Passive);
                }
                PortActionList::new()
            }
            RecommendedState::Listening => PortActionList::new(),
        }
    }

    fn recommend_master(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();
        match self.state {
            PortState::Master | PortState::PreMaster => {}
            // In LISTENING the takeover is driven by the announce receipt
            // timeout, not by the periodic BMCA run.
            PortState::Listening => {}
            _ => {
                // Qualify through PRE_MASTER for one announce interval
                // before taking over.
                self.clear_slave_state();
                self.transition(PortState::PreMaster);
                actions.push(PortAction::ResetAnnounceReceiptTimer {
                    duration: self.settings.announce_interval.as_core_duration(),
                });
            }
        }
        actions
    }

    fn recommend_slave(&mut self, announce: &AnnounceMessage) -> PortActionList {
        let source = announce.header.source_port_identity;

        if self.state.is_slave_like() && self.remote_master == Some(source) {
            // Same master; refresh the datasets it advertises.
            self.parent_ds = ParentDS::from_announce(announce);
            self.time_properties_ds = TimePropertiesDS::from_announce(announce);
            self.current_ds.steps_removed = announce.steps_removed + 1;
            self.in_grace_period = false;
            return PortActionList::new();
        }

        self.adopt_master(announce)
    }

    fn adopt_master(&mut self, announce: &AnnounceMessage) -> PortActionList {
        let source = announce.header.source_port_identity;
        info!(
            "new best master {} (grandmaster {})",
            source.clock_identity, announce.grandmaster_identity
        );

        self.clear_slave_state();
        self.remote_master = Some(source);
        self.parent_ds = ParentDS::from_announce(announce);
        self.time_properties_ds = TimePropertiesDS::from_announce(announce);
        self.current_ds.steps_removed = announce.steps_removed + 1;
        self.calibration_remaining = self.settings.calibration_delay;

        if self.state != PortState::Uncalibrated {
            self.transition(PortState::Uncalibrated);
        } else {
            info!("resynchronizing against new master");
        }

        let mut actions = PortActionList::new();
        actions.push(PortAction::ResetAnnounceReceiptTimer {
            duration: self.announce_receipt_duration(),
        });
        if self.settings.delay_mechanism != DelayMechanism::Disabled {
            actions.push(PortAction::ResetDelayRequestTimer {
                duration: self.delay_req_duration(),
            });
        }
        actions
    }

    /// The announce receipt timeout fired. Doubles as the PRE_MASTER
    /// qualification timer.
    pub fn handle_announce_receipt_timer(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();

        match self.state {
            PortState::Listening => {
                if self.listening_first_pass {
                    self.listening_first_pass = false;
                    actions.push(PortAction::ResetAnnounceReceiptTimer {
                        duration: self.announce_receipt_duration(),
                    });
                } else if self.default_ds.is_master_capable() {
                    // Nobody is announcing; take over.
                    self.transition(PortState::Master);
                    self.push_master_timers(&mut actions);
                } else {
                    actions.push(PortAction::ResetAnnounceReceiptTimer {
                        duration: self.announce_receipt_duration(),
                    });
                }
            }
            PortState::PreMaster => {
                self.transition(PortState::Master);
                self.push_master_timers(&mut actions);
            }
            PortState::Slave | PortState::Uncalibrated => {
                if let Some(master) = self.remote_master {
                    self.bmca.disqualify(master);
                }
                let grace = self.settings.announce_timeout_grace_period;
                if self.state == PortState::Slave && grace > 0 && !self.in_grace_period {
                    // Give a standby master time to take over before a full
                    // protocol reset.
                    self.in_grace_period = true;
                    warn!(
                        "announce receipt timeout, disqualifying current master; waiting {} more timeouts before reset",
                        grace
                    );
                    actions.push(PortAction::ResetAnnounceReceiptTimer {
                        duration: self.exact_announce_timeout() * grace as u32,
                    });
                } else {
                    warn!("announce receipt timeout, resetting to LISTENING");
                    self.reset_to_listening(&mut actions);
                }
            }
            PortState::Passive => {
                actions.push(PortAction::ResetAnnounceReceiptTimer {
                    duration: self.announce_receipt_duration(),
                });
            }
            _ => {}
        }

        actions
    }

    /// Announce transmission (master state only).
    pub fn handle_announce_timer(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();
        if self.state != PortState::Master {
            return actions;
        }

        let announce = AnnounceMessage {
            header: Header {
                domain_number: self.default_ds.domain_number,
                source_port_identity: self.port_identity,
                sequence_id: self.announce_seq.generate(),
                log_message_interval: self.settings.announce_interval.log_2(),
                current_utc_offset_valid: self.time_properties_ds.current_utc_offset_valid,
                leap59: self.time_properties_ds.leap59,
                leap61: self.time_properties_ds.leap61,
                ptp_timescale: self.time_properties_ds.ptp_timescale,
                time_traceable: self.time_properties_ds.time_traceable,
                frequency_traceable: self.time_properties_ds.frequency_traceable,
                ..Header::new()
            },
            origin_timestamp: WireTimestamp::default(),
            current_utc_offset: self.time_properties_ds.current_utc_offset,
            grandmaster_priority_1: self.default_ds.priority_1,
            grandmaster_clock_quality: self.default_ds.clock_quality,
            grandmaster_priority_2: self.default_ds.priority_2,
            grandmaster_identity: self.default_ds.clock_identity,
            steps_removed: 0,
            time_source: self.time_properties_ds.time_source,
        };

        self.push_general(&mut actions, Message::Announce(announce));
        actions.push(PortAction::ResetAnnounceTimer {
            duration: self.settings.announce_interval.as_core_duration(),
        });
        actions
    }

    /// Sync transmission (master state only). Two-step: the follow-up goes
    /// out once the departure timestamp comes back.
    pub fn handle_sync_timer(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();
        if self.state != PortState::Master {
            return actions;
        }

        let sequence_id = self.sync_seq.generate();
        let sync = SyncMessage {
            header: Header {
                two_step_flag: true,
                domain_number: self.default_ds.domain_number,
                source_port_identity: self.port_identity,
                sequence_id,
                log_message_interval: self.settings.sync_interval.log_2(),
                ..Header::new()
            },
            origin_timestamp: WireTimestamp::default(),
        };

        self.push_event(
            &mut actions,
            Message::Sync(sync),
            TimestampContext::Sync { sequence_id },
        );
        actions.push(PortAction::ResetSyncTimer {
            duration: self.settings.sync_interval.as_core_duration(),
        });
        actions
    }

    /// Delay request transmission.
    pub fn handle_delay_request_timer(&mut self) -> PortActionList {
        let mut actions = PortActionList::new();

        match self.settings.delay_mechanism {
            DelayMechanism::E2E => {
                if !self.state.is_slave_like() {
                    return actions;
                }
                let sequence_id = self.delay_seq.generate();
                let delay_req = DelayReqMessage {
                    header: Header {
                        domain_number: self.default_ds.domain_number,
                        source_port_identity: self.port_identity,
                        sequence_id,
                        ..Header::new()
                    },
                    origin_timestamp: WireTimestamp::default(),
                };
                self.tracker.delay_req_issued(sequence_id);
                self.push_event(
                    &mut actions,
                    Message::DelayReq(delay_req),
                    TimestampContext::DelayReq { sequence_id },
                );
            }
            DelayMechanism::P2P => {
                if matches!(
                    self.state,
                    PortState::Initializing | PortState::Faulty | PortState::Disabled
                ) {
                    return actions;
                }
                let sequence_id = self.delay_seq.generate();
                let pdelay_req = PdelayReqMessage {
                    header: Header {
                        domain_number: self.default_ds.domain_number,
                        source_port_identity: self.port_identity,
                        sequence_id,
                        ..Header::new()
                    },
                    origin_timestamp: WireTimestamp::default(),
                };
                self.tracker.delay_req_issued(sequence_id);
                self.push_event(
                    &mut actions,
                    Message::PdelayReq(pdelay_req),
                    TimestampContext::PdelayReq { sequence_id },
                );
            }
            DelayMechanism::Disabled => return actions,
        }

        actions.push(PortAction::ResetDelayRequestTimer {
            duration: self.delay_req_duration(),
        });
        actions
    }

    /// Statistics interval tick: calibration countdown, stability windows,
    /// the statistics report.
    pub fn handle_stats_timer(&mut self) -> PortActionList {
        if self.calibration_remaining > 0 && self.state.is_slave_like() {
            self.calibration_remaining -= 1;
            if self.calibration_remaining == 0 {
                info!("calibration delay over, enabling clock updates");
            }
        }

        if self.servo_options.stability_detection && self.state == PortState::Slave {
            match self.stability.tick() {
                Some(StabilityEvent::BecameStable) => {
                    info!("servo: stabilized, drift {:.1} ppb", self.servo.drift_ppb());
                    self.observer.servo_stability(true);
                }
                Some(StabilityEvent::BecameUnstable) => {
                    warn!("servo: lost stability");
                    self.observer.servo_stability(false);
                }
                Some(StabilityEvent::TimedOut) => {
                    warn!("servo: not stabilized within the configured timeout");
                    self.observer.servo_stability(false);
                }
                None => {}
            }
        }

        let misses = self.tracker.consecutive_misses();
        if self.settings.delay_miss_limit > 0
            && misses >= self.settings.delay_miss_limit
            && self.state.is_slave_like()
        {
            warn!("{misses} consecutive delay requests unanswered");
        }

        if self.state.is_slave_like() {
            let statistics = SlaveStatistics {
                offset_from_master: self.offset_from_master,
                mean_path_delay: self.mean_path_delay,
                frequency_adjustment_ppb: self.servo.frequency_ppb(),
                drift_ppb: self.servo.drift_ppb(),
                servo_stable: self.stability.is_stable(),
                delay_misses: misses,
            };
            self.observer.statistics(&statistics);
        }

        PortActionList::new()
    }

    /// A packet arrived on the event socket with its receive timestamp.
    pub fn handle_event_receive(&mut self, data: &[u8], timestamp: TimeInternal) -> PortActionList {
        let message = match Message::deserialize(data) {
            Ok(message) => message,
            Err(error) => {
                debug!("dropping undecodable event message: {error}");
                return PortActionList::new();
            }
        };
        self.handle_message(message, Some(timestamp))
    }

    /// A packet arrived on the general socket.
    pub fn handle_general_receive(&mut self, data: &[u8]) -> PortActionList {
        let message = match Message::deserialize(data) {
            Ok(message) => message,
            Err(error) => {
                debug!("dropping undecodable general message: {error}");
                return PortActionList::new();
            }
        };
        self.handle_message(message, None)
    }

    fn handle_message(&mut self, message: Message, timestamp: Option<TimeInternal>) -> PortActionList {
        let mut actions = PortActionList::new();

        if message.header().domain_number != self.default_ds.domain_number {
            return actions;
        }
        if matches!(
            self.state,
            PortState::Initializing | PortState::Faulty | PortState::Disabled
        ) {
            return actions;
        }

        match message {
            Message::Announce(announce) => self.handle_announce(&announce, &mut actions),
            Message::Sync(sync) => {
                if self.from_current_master(&sync.header) {
                    let receive_time = timestamp.unwrap_or_else(|| self.clock.now());
                    if let Some(measurement) = self.tracker.handle_sync(&sync, receive_time) {
                        self.process_sync_measurement(measurement);
                    }
                }
            }
            Message::FollowUp(follow_up) => {
                if self.from_current_master(&follow_up.header) {
                    if let Some(measurement) = self.tracker.handle_follow_up(&follow_up) {
                        self.process_sync_measurement(measurement);
                    }
                }
            }
            Message::DelayReq(delay_req) => {
                self.handle_delay_req(&delay_req, timestamp, &mut actions)
            }
            Message::DelayResp(delay_resp) => {
                if self.state.is_slave_like()
                    && self.settings.delay_mechanism == DelayMechanism::E2E
                {
                    if self.settings.delay_req_interval.is_none() {
                        self.master_delay_interval = Some(delay_resp.header.log_message_interval);
                    }
                    if let Some(raw) =
                        self.tracker.handle_delay_resp(&delay_resp, self.port_identity)
                    {
                        self.process_delay_sample(raw);
                    }
                }
            }
            Message::PdelayReq(pdelay_req) => {
                self.handle_pdelay_req(&pdelay_req, timestamp, &mut actions)
            }
            Message::PdelayResp(pdelay_resp) => {
                if self.settings.delay_mechanism == DelayMechanism::P2P {
                    let receive_time = timestamp.unwrap_or_else(|| self.clock.now());
                    if let Some(raw) = self.tracker.handle_pdelay_resp(
                        &pdelay_resp,
                        receive_time,
                        self.port_identity,
                    ) {
                        self.process_delay_sample(raw);
                    }
                }
            }
            Message::PdelayRespFollowUp(follow_up) => {
                if self.settings.delay_mechanism == DelayMechanism::P2P {
                    if let Some(raw) = self
                        .tracker
                        .handle_pdelay_resp_follow_up(&follow_up, self.port_identity)
                    {
                        self.process_delay_sample(raw);
                    }
                }
            }
            Message::Signaling(_) | Message::Management(_) => {
                debug!("ignoring signaling/management message");
            }
        }

        actions
    }

    fn handle_announce(&mut self, announce: &AnnounceMessage, actions: &mut PortActionList) {
        let arrival = self.clock.now();
        if !self.bmca.register_announce(announce, arrival) {
            return;
        }

        let from_master = self.from_current_master(&announce.header);
        if from_master {
            self.in_grace_period = false;
        }

        // Fresh announces re-arm the receipt timeout in every state that
        // waits for one.
        match self.state {
            PortState::Listening | PortState::Passive => {
                actions.push(PortAction::ResetAnnounceReceiptTimer {
                    duration: self.announce_receipt_duration(),
                });
            }
            PortState::Slave | PortState::Uncalibrated if from_master => {
                actions.push(PortAction::ResetAnnounceReceiptTimer {
                    duration: self.announce_receipt_duration(),
                });
            }
            _ => {}
        }
    }

    fn handle_delay_req(
        &mut self,
        delay_req: &DelayReqMessage,
        timestamp: Option<TimeInternal>,
        actions: &mut PortActionList,
    ) {
        if self.state != PortState::Master || self.settings.delay_mechanism != DelayMechanism::E2E
        {
            return;
        }

        let receive_time = timestamp.unwrap_or_else(|| self.clock.now());
        let resp = DelayRespMessage {
            header: Header {
                domain_number: self.default_ds.domain_number,
                source_port_identity: self.port_identity,
                sequence_id: delay_req.header.sequence_id,
                correction_field: delay_req.header.correction_field,
                log_message_interval: self
                    .settings
                    .delay_req_interval
                    .unwrap_or(self.settings.initial_delay_req_interval)
                    .log_2(),
                ..Header::new()
            },
            receive_timestamp: WireTimestamp::from(receive_time),
            requesting_port_identity: delay_req.header.source_port_identity,
        };
        self.push_general(actions, Message::DelayResp(resp));
    }

    fn handle_pdelay_req(
        &mut self,
        pdelay_req: &PdelayReqMessage,
        timestamp: Option<TimeInternal>,
        actions: &mut PortActionList,
    ) {
        if self.settings.delay_mechanism != DelayMechanism::P2P {
            return;
        }

        let receive_time = timestamp.unwrap_or_else(|| self.clock.now());
        let sequence_id = pdelay_req.header.sequence_id;
        let requestor = pdelay_req.header.source_port_identity;
        let resp = PdelayRespMessage {
            header: Header {
                two_step_flag: true,
                domain_number: self.default_ds.domain_number,
                source_port_identity: self.port_identity,
                sequence_id,
                ..Header::new()
            },
            request_receipt_timestamp: WireTimestamp::from(receive_time),
            requesting_port_identity: requestor,
        };
        self.push_event(
            actions,
            Message::PdelayResp(resp),
            TimestampContext::PdelayResp {
                sequence_id,
                requestor,
            },
        );
    }

    /// The departure timestamp of an event message came back from the
    /// transport.
    pub fn handle_send_timestamp(
        &mut self,
        context: TimestampContext,
        timestamp: TimeInternal,
    ) -> PortActionList {
        let mut actions = PortActionList::new();

        match context {
            TimestampContext::Sync { sequence_id } => {
                if self.state != PortState::Master {
                    return actions;
                }
                let follow_up = FollowUpMessage {
                    header: Header {
                        domain_number: self.default_ds.domain_number,
                        source_port_identity: self.port_identity,
                        sequence_id,
                        log_message_interval: self.settings.sync_interval.log_2(),
                        ..Header::new()
                    },
                    precise_origin_timestamp: WireTimestamp::from(timestamp),
                };
                self.push_general(&mut actions, Message::FollowUp(follow_up));
            }
            TimestampContext::DelayReq { sequence_id } | TimestampContext::PdelayReq { sequence_id } => {
                self.tracker.delay_req_timestamp(sequence_id, timestamp);
            }
            TimestampContext::PdelayResp {
                sequence_id,
                requestor,
            } => {
                let follow_up = PdelayRespFollowUpMessage {
                    header: Header {
                        domain_number: self.default_ds.domain_number,
                        source_port_identity: self.port_identity,
                        sequence_id,
                        ..Header::new()
                    },
                    response_origin_timestamp: WireTimestamp::from(timestamp),
                    requesting_port_identity: requestor,
                };
                self.push_general(&mut actions, Message::PdelayRespFollowUp(follow_up));
            }
        }

        actions
    }

    /// A completed sync measurement: compute the offset, filter it and run
    /// the servo.
    fn process_sync_measurement(&mut self, measurement: SyncMeasurement) {
        let raw_offset = match self.settings.delay_mechanism {
            DelayMechanism::Disabled => measurement.delta,
            DelayMechanism::E2E | DelayMechanism::P2P => match self.mean_path_delay {
                Some(delay) => measurement.delta - delay,
                // No path delay estimate yet; the offset would be biased by
                // the full one-way delay.
                None => return,
            },
        };

        let filtered = self.sync_filter.feed(raw_offset.total_nanos() as i64);
        if !filtered.accepted && self.sync_outlier_discards() {
            debug!("sync outlier discarded: {raw_offset}");
            return;
        }
        let offset = TimeInternal::from_nanos(filtered.value);

        self.offset_from_master = Some(offset);
        self.current_ds.offset_from_master = offset;

        if self.state == PortState::Uncalibrated {
            // First complete measurement; the port is synchronized enough to
            // call itself a slave.
            self.transition(PortState::Slave);
        }

        if self.calibration_remaining > 0 {
            debug!("calibration delay active, not driving servo");
            return;
        }

        let command = self.servo.sample(offset, measurement.event_time);
        self.stability.record(self.servo.drift_ppb());
        self.apply_servo_command(command);
    }

    fn process_delay_sample(&mut self, raw: TimeInternal) {
        let max_delay = self.servo_options.max_delay_ns;
        if max_delay > 0 && raw.total_nanos() > max_delay as i128 {
            warn!("discarding path delay {raw} above the configured maximum");
            return;
        }

        let filtered = self.delay_filter.feed(raw.total_nanos() as i64);
        if !filtered.accepted && self.delay_outlier_discards() {
            debug!("delay outlier discarded: {raw}");
            return;
        }

        let smoothed = self.delay_smoother.feed(filtered.value);
        let delay = TimeInternal::from_nanos(smoothed.value);
        self.mean_path_delay = Some(delay);
        self.current_ds.mean_path_delay = delay;
    }

    fn apply_servo_command(&mut self, command: ServoCommand) {
        if self.servo_options.no_adjust {
            // Observe-only mode: the servo state advances but the clock is
            // never touched.
            return;
        }

        let result = match command {
            ServoCommand::Slew { frequency_ppb } => self.clock.adjust_frequency(frequency_ppb),
            ServoCommand::Step { correction } => {
                let result = self.clock.step(correction);
                if result.is_ok() {
                    info!("stepped clock by {correction}");
                    // Phase history is meaningless across a step.
                    self.sync_filter.clear();
                    self.delay_filter.clear();
                    self.delay_smoother.clear();
                    self.tracker.reset();
                    self.mean_path_delay = None;
                    self.offset_from_master = None;
                }
                result.map(|_| ())
            }
            ServoCommand::Hold => Ok(()),
        };

        match result {
            Ok(()) => self.clock_failures = 0,
            Err(error) => {
                self.clock_failures += 1;
                warn!(
                    "clock adjustment failed ({}/{CLOCK_FAULT_LIMIT}): {error:?}",
                    self.clock_failures
                );
                if self.clock_failures >= CLOCK_FAULT_LIMIT {
                    self.fault();
                }
            }
        }
    }

    fn from_current_master(&self, header: &Header) -> bool {
        self.state.is_slave_like() && self.remote_master == Some(header.source_port_identity)
    }

    fn sync_outlier_discards(&self) -> bool {
        self.sync_filter_action == OutlierAction::Discard
    }

    fn delay_outlier_discards(&self) -> bool {
        self.delay_filter_action == OutlierAction::Discard
    }

    fn reset_to_listening(&mut self, actions: &mut PortActionList) {
        self.clear_slave_state();
        self.transition(PortState::Listening);
        self.listening_first_pass = true;
        actions.push(PortAction::ResetAnnounceReceiptTimer {
            duration: self.announce_receipt_duration(),
        });
    }

    fn clear_slave_state(&mut self) {
        self.remote_master = None;
        self.in_grace_period = false;
        self.tracker.reset();
        self.sync_filter.clear();
        self.delay_filter.clear();
        self.delay_smoother.clear();
        self.stability.reset();
        self.mean_path_delay = None;
        self.offset_from_master = None;
        self.master_delay_interval = None;
        self.calibration_remaining = 0;
        self.servo.reset();
    }

    fn transition(&mut self, to: PortState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug_assert!(
            PortState::valid_transition(from, to),
            "undefined port state transition {from} -> {to}"
        );
        info!("state change {from} -> {to}");
        self.state = to;
        self.observer.state_change(from, to);
    }

    fn push_master_timers(&mut self, actions: &mut PortActionList) {
        actions.push(PortAction::ResetAnnounceTimer {
            duration: core::time::Duration::ZERO,
        });
        actions.push(PortAction::ResetSyncTimer {
            duration: self.settings.sync_interval.as_core_duration(),
        });
    }

    fn push_general(&mut self, actions: &mut PortActionList, message: Message) {
        match message.serialize_vec() {
            Ok(data) => actions.push(PortAction::SendGeneral { data }),
            Err(error) => warn!("could not serialize message: {error}"),
        }
    }

    fn push_event(
        &mut self,
        actions: &mut PortActionList,
        message: Message,
        context: TimestampContext,
    ) {
        match message.serialize_vec() {
            Ok(data) => actions.push(PortAction::SendEvent { context, data }),
            Err(error) => warn!("could not serialize message: {error}"),
        }
    }

    /// The exact receipt timeout: timeout count times the announce interval.
    fn exact_announce_timeout(&self) -> core::time::Duration {
        self.settings
            .announce_interval
            .as_core_duration()
            .saturating_mul(self.settings.announce_receipt_timeout as u32)
    }

    /// In SLAVE/UNCALIBRATED the timeout is exact; elsewhere it is spread
    /// with a random factor of 1..2 so that ports do not take over in
    /// lockstep (section 9.2.6.12).
    fn announce_receipt_duration(&mut self) -> core::time::Duration {
        let exact = self.exact_announce_timeout();
        match self.state {
            PortState::Slave | PortState::Uncalibrated => exact,
            _ => exact.mul_f64(1.0 + self.rng.gen::<f64>()),
        }
    }

    /// Delay requests are scattered around the nominal interval (factor
    /// 0.5..1.5) to keep slaves from querying the master in lockstep.
    fn delay_req_duration(&mut self) -> core::time::Duration {
        let interval = match self.settings.delay_req_interval {
            Some(interval) => interval,
            None => match self.master_delay_interval {
                Some(log_2) if (-7..=7).contains(&log_2) => {
                    crate::time::Interval::from_log_2(log_2)
                }
                _ => self.settings.initial_delay_req_interval,
            },
        };
        interval
            .as_core_duration()
            .mul_f64(0.5 + self.rng.gen::<f64>())
    }
}
