/// The origin of a clock's time, section 7.6.2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TimeSource {
    AtomicClock = 0x10,
    Gnss = 0x20,
    TerrestrialRadio = 0x30,
    Ptp = 0x40,
    Ntp = 0x50,
    HandSet = 0x60,
    Other = 0x90,
    InternalOscillator = 0xA0,
}

impl TimeSource {
    pub fn to_primitive(self) -> u8 {
        self as u8
    }

    pub fn from_primitive(value: u8) -> Self {
        match value {
            0x10 => Self::AtomicClock,
            0x20 => Self::Gnss,
            0x30 => Self::TerrestrialRadio,
            0x40 => Self::Ptp,
            0x50 => Self::Ntp,
            0x60 => Self::HandSet,
            0xA0 => Self::InternalOscillator,
            _ => Self::Other,
        }
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::InternalOscillator
    }
}
