use crate::datastructures::common::TimeSource;
use crate::datastructures::messages::AnnounceMessage;

/// The TimePropertiesDS, describing the timescale distributed by the current
/// master, section 8.2.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePropertiesDS {
    pub current_utc_offset: i16,
    pub current_utc_offset_valid: bool,
    pub leap59: bool,
    pub leap61: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    pub ptp_timescale: bool,
    pub time_source: TimeSource,
}

impl Default for TimePropertiesDS {
    /// The ARB timescale properties of an unsynchronized local oscillator.
    fn default() -> Self {
        Self {
            current_utc_offset: 0,
            current_utc_offset_valid: false,
            leap59: false,
            leap61: false,
            time_traceable: false,
            frequency_traceable: false,
            ptp_timescale: false,
            time_source: TimeSource::InternalOscillator,
        }
    }
}

impl TimePropertiesDS {
    /// Update from the accepted master's announce message (the S1 update of
    /// the state decision algorithm).
    pub fn from_announce(announce: &AnnounceMessage) -> Self {
        Self {
            current_utc_offset: announce.current_utc_offset,
            current_utc_offset_valid: announce.header.current_utc_offset_valid,
            leap59: announce.header.leap59,
            leap61: announce.header.leap61,
            time_traceable: announce.header.time_traceable,
            frequency_traceable: announce.header.frequency_traceable,
            ptp_timescale: announce.header.ptp_timescale,
            time_source: announce.time_source,
        }
    }
}
