//! Sans-io implementation of an IEEE 1588-2008 (PTP) ordinary clock: best
//! master clock algorithm, port state machine, delay/offset measurement,
//! statistical sample filtering and a PI clock servo.
//!
//! The library performs no I/O of its own. A [`Port`] consumes network and
//! timer events and produces [`PortAction`]s; the embedding daemon owns the
//! sockets and timers and supplies a [`Clock`] implementation for the local
//! oscillator. All tunables arrive through the validated structures in
//! [`config`] — the library never parses configuration syntax.

pub mod bmc;
pub mod clock;
pub mod config;
pub mod datastructures;
pub mod filters;
pub mod observer;
pub mod port;
pub mod servo;
pub mod time;

pub use clock::Clock;
pub use config::{
    DelayMechanism, DriftHandling, DtMethod, InstanceConfig, OutlierAction, OutlierFilterOptions,
    PortSettings, ServoOptions,
};
pub use datastructures::common::{ClockIdentity, ClockQuality, PortIdentity};
pub use observer::{NoopObserver, Observer, SlaveStatistics};
pub use port::{Port, PortAction, PortState, TimestampContext};
pub use time::{Interval, TimeInternal};

/// Upper bound for a serialized PTP message handled by this crate.
pub const MAX_DATA_LEN: usize = 255;
