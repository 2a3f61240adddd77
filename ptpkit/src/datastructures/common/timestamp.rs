use crate::datastructures::WireFormatError;
use crate::time::TimeInternal;

/// The on-wire timestamp format: a 48-bit unsigned seconds field and a 32-bit
/// nanoseconds field, section 5.3.3.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireTimestamp {
    /// The seconds field of the timestamp. 48-bit, must be less than 2^48.
    pub seconds: u64,
    /// The nanoseconds field of the timestamp. Must be less than 10^9.
    pub nanos: u32,
}

impl WireTimestamp {
    pub fn wire_size(&self) -> usize {
        10
    }

    pub fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        buffer[0..6].copy_from_slice(&self.seconds.to_be_bytes()[2..8]);
        buffer[6..10].copy_from_slice(&self.nanos.to_be_bytes());
        Ok(())
    }

    pub fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 10 {
            return Err(WireFormatError::BufferTooShort);
        }
        let mut seconds = [0; 8];
        seconds[2..8].copy_from_slice(&buffer[0..6]);
        Ok(Self {
            seconds: u64::from_be_bytes(seconds),
            nanos: u32::from_be_bytes([buffer[6], buffer[7], buffer[8], buffer[9]]),
        })
    }
}

impl From<WireTimestamp> for TimeInternal {
    fn from(ts: WireTimestamp) -> Self {
        TimeInternal::new(ts.seconds as i64, ts.nanos as i64)
    }
}

impl From<TimeInternal> for WireTimestamp {
    /// Negative values cannot be represented on the wire and saturate to the
    /// epoch.
    fn from(time: TimeInternal) -> Self {
        if time.is_negative() {
            WireTimestamp::default()
        } else {
            WireTimestamp {
                seconds: time.seconds() as u64,
                nanos: time.subsec_nanos() as u32,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let ts = WireTimestamp {
            seconds: 0x0000_1234_5678_9abc,
            nanos: 999_999_999,
        };
        let mut buffer = [0; 10];
        ts.serialize(&mut buffer).unwrap();
        assert_eq!(buffer[0..6], [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);
        assert_eq!(WireTimestamp::deserialize(&buffer).unwrap(), ts);
    }

    #[test]
    fn conversion() {
        let time = TimeInternal::new(5, 17);
        let ts = WireTimestamp::from(time);
        assert_eq!(TimeInternal::from(ts), time);
    }
}
