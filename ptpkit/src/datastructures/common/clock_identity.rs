use crate::datastructures::WireFormatError;

/// The identity of a PTP clock, usually derived from the MAC address of the
/// interface (EUI-64).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    pub fn wire_size(&self) -> usize {
        8
    }

    pub fn serialize(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 8 {
            return Err(WireFormatError::BufferTooShort);
        }
        buffer[0..8].copy_from_slice(&self.0);
        Ok(())
    }

    pub fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        if buffer.len() < 8 {
            return Err(WireFormatError::BufferTooShort);
        }
        let mut id = [0; 8];
        id.copy_from_slice(&buffer[0..8]);
        Ok(Self(id))
    }
}

impl core::fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let identity = ClockIdentity([0x00, 0x25, 0x64, 0xff, 0xfe, 0x12, 0x34, 0x56]);
        let mut buffer = [0; 8];
        identity.serialize(&mut buffer).unwrap();
        assert_eq!(ClockIdentity::deserialize(&buffer).unwrap(), identity);
    }

    #[test]
    fn display() {
        let identity = ClockIdentity([0, 1, 2, 3, 4, 5, 6, 0xff]);
        assert_eq!(identity.to_string(), "00:01:02:03:04:05:06:ff");
    }
}
