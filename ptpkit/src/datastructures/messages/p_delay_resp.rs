use super::Header;
use crate::datastructures::common::{PortIdentity, WireTimestamp};
use crate::datastructures::WireFormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdelayRespMessage {
    pub header: Header,
    pub request_receipt_timestamp: WireTimestamp,
    pub requesting_port_identity: PortIdentity,
}

impl PdelayRespMessage {
    pub(super) fn content_size(&self) -> usize {
        20
    }

    pub(super) fn serialize_content(&self, buffer: &mut [u8]) -> Result<(), WireFormatError> {
        if buffer.len() < 20 {
            return Err(WireFormatError::BufferTooShort);
        }
        self.request_receipt_timestamp
            .serialize(&mut buffer[0..10])?;
        self.requesting_port_identity
            .serialize(&mut buffer[10..20])?;
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
            request_receipt_timestamp: WireTimestamp::deserialize(&buffer[0..10])?,
            requesting_port_identity: PortIdentity::deserialize(&buffer[10..20])?,
        })
    }
}
