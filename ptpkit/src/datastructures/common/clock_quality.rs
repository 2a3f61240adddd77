use super::ClockAccuracy;
use crate::datastructures::WireFormatError;

/// The quality of a clock as advertised in announce messages, section 5.3.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockQuality {
    /// The PTP clock class. Classes below 128 identify master-capable
    /// clocks, 255 is slave-only.
    pub clock_class: u8,
    pub clock_accuracy: ClockAccuracy,
    /// 2-log of the variance (in seconds^2) of the clock when not
    /// synchronized, offset and scaled per section 7.6.3.
    pub offset_scaled_log_variance: u16,
}

impl Default for ClockQuality {
    fn default() -> Self {
        Self {
            clock_class: 248,
            clock_accuracy: ClockAccuracy::default(),
            offset_scaled_log_variance: 0xFFFF,
        }
    }
}

impl ClockQuality {
    pub fn wire_size(&self) -> usize {
        4
    }

    pub fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 4 {
            return Err(WireFormatError::BufferTooShort);
        }
        buffer[0] = self.clock_class;
        buffer[1] = self.clock_accuracy.to_primitive();
        buffer[2..4].copy_from_slice(&self.offset_scaled_log_variance.to_be_bytes());
        Ok(())
    }

    pub fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 4 {
            return Err(WireFormatError::BufferTooShort);
        }
        Ok(Self {
            clock_class: buffer[0],
            clock_accuracy: ClockAccuracy::from_primitive(buffer[1]),
            offset_scaled_log_variance: u16::from_be_bytes([buffer[2], buffer[3]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let quality = ClockQuality {
            clock_class: 6,
            clock_accuracy: ClockAccuracy::NS100,
            offset_scaled_log_variance: 0x1234,
        };
        let mut buffer = [0; 4];
        quality.serialize(&mut buffer).unwrap();
        assert_eq!(buffer, [6, 0x21, 0x12, 0x34]);
        assert_eq!(ClockQuality::deserialize(&buffer).unwrap(), quality);
    }
}
