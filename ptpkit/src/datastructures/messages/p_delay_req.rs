use super::Header;
use crate::datastructures::common::WireTimestamp;
use crate::datastructures::WireFormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdelayReqMessage {
    pub header: Header,
    pub origin_timestamp: WireTimestamp,
}

impl PdelayReqMessage {
    /// 10 bytes of timestamp plus 10 reserved bytes, section 13.9.
    pub(super) fn content_size(&self) -> usize {
        20
    }

    pub(super) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 20 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.origin_timestamp.serialize(&mut buffer[0..10])?;
        buffer[10..20].fill(0);
        Ok(())
    }

    pub(super) fn deserialize_content(
        header: Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        if buffer.len() < 20 {
            return Err(WireFormatError::BufferTooShort);
        }
        Ok(Self {
            header,
            origin_timestamp: WireTimestamp::deserialize(&buffer[0..10])?,
        })
    }
}
