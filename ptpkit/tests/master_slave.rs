//! End to end: a master-capable port and a slave-only port exchanging real
//! serialized messages over a simulated network with a known path delay and
//! clock offset. The slave must converge on exactly those numbers.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::mock::StepRng;

use ptpkit::config::OutlierFilterOptions;
use ptpkit::port::PortActionList;
use ptpkit::{
    Clock, ClockIdentity, ClockQuality, InstanceConfig, Interval, NoopObserver, Port, PortAction,
    PortSettings, PortState, ServoOptions, TimeInternal,
};

/// One-way network delay between the two nodes, in nanoseconds.
const PATH_DELAY_NS: i64 = 100;
/// How far ahead of the master the slave's clock runs, in nanoseconds.
const SLAVE_SKEW_NS: i64 = 500_000;

/// Shared simulated wall clock (the "true" time).
#[derive(Debug, Default, Clone)]
struct SimTime {
    nanos: Rc<RefCell<i64>>,
}

impl SimTime {
    fn advance(&self, nanos: i64) {
        *self.nanos.borrow_mut() += nanos;
    }

    fn now(&self) -> i64 {
        *self.nanos.borrow()
    }
}

/// A node clock: the true time plus a fixed skew. Frequency adjustments are
/// recorded but (for this test) do not move the clock.
#[derive(Debug, Clone)]
struct SimClock {
    time: SimTime,
    skew_ns: i64,
    frequency_ppb: Rc<RefCell<f64>>,
}

impl SimClock {
    fn new(time: SimTime, skew_ns: i64) -> Self {
        Self {
            time,
            skew_ns,
            frequency_ppb: Rc::new(RefCell::new(0.0)),
        }
    }

    fn frequency_ppb(&self) -> f64 {
        *self.frequency_ppb.borrow()
    }
}

impl Clock for SimClock {
    type Error = std::convert::Infallible;

    fn now(&self) -> TimeInternal {
        TimeInternal::from_nanos(self.time.now() + self.skew_ns)
    }

    fn set_time(&mut self, _time: TimeInternal) -> Result<(), Self::Error> {
        Ok(())
    }

    fn adjust_frequency(&mut self, frequency_ppb: f64) -> Result<(), Self::Error> {
        *self.frequency_ppb.borrow_mut() = frequency_ppb;
        Ok(())
    }

    fn step(&mut self, correction: TimeInternal) -> Result<(), Self::Error> {
        self.skew_ns += correction.total_nanos() as i64;
        Ok(())
    }
}

type SimPort = Port<SimClock, NoopObserver, StepRng>;

fn make_port(instance: InstanceConfig, clock: SimClock) -> SimPort {
    let settings = PortSettings {
        announce_interval: Interval::from_log_2(0),
        sync_interval: Interval::from_log_2(0),
        announce_receipt_timeout: 3,
        ..Default::default()
    };
    Port::new(
        &instance,
        settings,
        &OutlierFilterOptions::default(),
        &OutlierFilterOptions::default(),
        ServoOptions::default(),
        clock,
        NoopObserver,
        StepRng::new(0, 0),
    )
}

/// Deliver every send in `actions` from one port to the other, simulating
/// the network delay, and process any actions the delivery provokes.
fn relay(
    time: &SimTime,
    actions: PortActionList,
    sender: &mut SimPort,
    sender_clock: &SimClock,
    receiver: &mut SimPort,
    receiver_clock: &SimClock,
) {
    let mut queue: Vec<PortAction> = actions.into_iter().collect();

    while !queue.is_empty() {
        let mut next = Vec::new();
        for action in queue {
            match action {
                PortAction::SendEvent { context, data } => {
                    // The departure timestamp is taken at the sender...
                    let follow_ups = sender.handle_send_timestamp(context, sender_clock.now());
                    next.extend(follow_ups);

                    // ...then the message propagates for the path delay.
                    time.advance(PATH_DELAY_NS);
                    let receive_actions =
                        receiver.handle_event_receive(&data, receiver_clock.now());
                    relay_back(time, receive_actions, receiver, receiver_clock, sender, sender_clock);
                }
                PortAction::SendGeneral { data } => {
                    time.advance(PATH_DELAY_NS);
                    let receive_actions = receiver.handle_general_receive(&data);
                    relay_back(time, receive_actions, receiver, receiver_clock, sender, sender_clock);
                }
                // Timer management is the event loop's business; the test
                // drives timers explicitly.
                _ => {}
            }
        }
        queue = next;
    }
}

/// Responses flowing the other way (e.g. a delay response provoked by a
/// delivered delay request).
fn relay_back(
    time: &SimTime,
    actions: PortActionList,
    sender: &mut SimPort,
    sender_clock: &SimClock,
    receiver: &mut SimPort,
    receiver_clock: &SimClock,
) {
    if actions
        .iter()
        .any(|a| matches!(a, PortAction::SendEvent { .. } | PortAction::SendGeneral { .. }))
    {
        relay(time, actions, sender, sender_clock, receiver, receiver_clock);
    }
}

#[test]
fn slave_converges_on_configured_skew_and_delay() {
    let time = SimTime::default();
    let master_clock = SimClock::new(time.clone(), 0);
    let slave_clock = SimClock::new(time.clone(), SLAVE_SKEW_NS);

    let mut master = make_port(
        InstanceConfig {
            clock_identity: ClockIdentity([1; 8]),
            clock_quality: ClockQuality {
                clock_class: 6,
                ..Default::default()
            },
            ..Default::default()
        },
        master_clock.clone(),
    );
    let mut slave = make_port(
        InstanceConfig {
            clock_identity: ClockIdentity([2; 8]),
            slave_only: true,
            ..Default::default()
        },
        slave_clock.clone(),
    );

    master.enable();
    slave.enable();

    // The master's network stays silent; after the second receipt timeout
    // it takes over.
    master.handle_announce_receipt_timer();
    master.handle_announce_receipt_timer();
    assert_eq!(master.state(), PortState::Master);
    assert_eq!(slave.state(), PortState::Listening);

    // A few protocol rounds: announce, sync + follow-up, delay exchange.
    for _ in 0..4 {
        time.advance(1_000_000_000);

        let announces = master.handle_announce_timer();
        relay(&time, announces, &mut master, &master_clock, &mut slave, &slave_clock);
        slave.handle_bmca_timer();

        let syncs = master.handle_sync_timer();
        relay(&time, syncs, &mut master, &master_clock, &mut slave, &slave_clock);

        let delay_reqs = slave.handle_delay_request_timer();
        relay(&time, delay_reqs, &mut slave, &slave_clock, &mut master, &master_clock);
    }

    assert_eq!(slave.state(), PortState::Slave);
    assert_eq!(
        slave.remote_master().map(|m| m.clock_identity),
        Some(ClockIdentity([1; 8]))
    );

    // The measured path delay and offset are exactly the simulated ones.
    assert_eq!(
        slave.mean_path_delay(),
        Some(TimeInternal::from_nanos(PATH_DELAY_NS))
    );
    assert_eq!(
        slave.offset_from_master(),
        Some(TimeInternal::from_nanos(SLAVE_SKEW_NS))
    );

    // The slave runs ahead of the master, so the servo slows it down. The
    // master's own clock is never adjusted.
    assert!(slave_clock.frequency_ppb() < 0.0);
    assert_eq!(master_clock.frequency_ppb(), 0.0);
}
