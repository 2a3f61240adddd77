//! Common data types from IEEE 1588-2008 section 5.3

pub use clock_accuracy::ClockAccuracy;
pub use clock_identity::ClockIdentity;
pub use clock_quality::ClockQuality;
pub use port_identity::PortIdentity;
pub use time_source::TimeSource;
pub use timestamp::WireTimestamp;

mod clock_accuracy;
mod clock_identity;
mod clock_quality;
mod port_identity;
mod time_source;
mod timestamp;
