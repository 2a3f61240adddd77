use super::Header;
use crate::datastructures::common::WireTimestamp;
use crate::datastructures::WireFormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayReqMessage {
    pub header: Header,
    pub origin_timestamp: WireTimestamp,
}

impl DelayReqMessage {
    pub(super) fn content_size(&self) -> usize {
        10
    }

    pub(super) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        self.origin_timestamp.serialize(buffer)
    }

    pub(super) fn deserialize_content(
        header: Header,
        buffer: &[u8],
    ) -> Result<Self, WireFormatError> {
        Ok(Self {
            header,
            origin_timestamp: WireTimestamp::deserialize(buffer)?,
        })
    }
}
