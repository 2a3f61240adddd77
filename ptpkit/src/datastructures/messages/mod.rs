//! PTP network messages

pub use announce::*;
pub use delay_req::*;
pub use delay_resp::*;
pub use follow_up::*;
pub use header::*;
pub use p_delay_req::*;
pub use p_delay_resp::*;
pub use p_delay_resp_follow_up::*;
pub use sync::*;

use crate::datastructures::WireFormatError;

mod announce;
mod delay_req;
mod delay_resp;
mod follow_up;
mod header;
mod p_delay_req;
mod p_delay_resp;
mod p_delay_resp_follow_up;
mod sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PdelayReq = 0x2,
    PdelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PdelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

impl MessageType {
    pub fn to_primitive(self) -> u8 {
        self as u8
    }

    pub fn from_primitive(value: u8) -> Result<Self, WireFormatError> {
        match value {
            0x0 => Ok(Self::Sync),
            0x1 => Ok(Self::DelayReq),
            0x2 => Ok(Self::PdelayReq),
            0x3 => Ok(Self::PdelayResp),
            0x8 => Ok(Self::FollowUp),
            0x9 => Ok(Self::DelayResp),
            0xA => Ok(Self::PdelayRespFollowUp),
            0xB => Ok(Self::Announce),
            0xC => Ok(Self::Signaling),
            0xD => Ok(Self::Management),
            _ => Err(WireFormatError::EnumConversionError),
        }
    }
}

/// The control field of the message header is redundant with the message
/// type but must still be filled in for 1588-2008 compatibility,
/// section 13.3.2.10.
pub(super) fn control_field(message_type: MessageType) -> u8 {
    match message_type {
        MessageType::Sync => 0x00,
        MessageType::DelayReq => 0x01,
        MessageType::FollowUp => 0x02,
        MessageType::DelayResp => 0x03,
        MessageType::Management => 0x04,
        _ => 0x05,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Sync(SyncMessage),
    DelayReq(DelayReqMessage),
    PdelayReq(PdelayReqMessage),
    PdelayResp(PdelayRespMessage),
    FollowUp(FollowUpMessage),
    DelayResp(DelayRespMessage),
    PdelayRespFollowUp(PdelayRespFollowUpMessage),
    Announce(AnnounceMessage),
    /// Recognized but not processed by this implementation.
    Signaling(Header),
    /// Recognized but not processed by this implementation.
    Management(Header),
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Sync(m) => &m.header,
            Message::DelayReq(m) => &m.header,
            Message::PdelayReq(m) => &m.header,
            Message::PdelayResp(m) => &m.header,
            Message::FollowUp(m) => &m.header,
            Message::DelayResp(m) => &m.header,
            Message::PdelayRespFollowUp(m) => &m.header,
            Message::Announce(m) => &m.header,
            Message::Signaling(h) => h,
            Message::Management(h) => h,
        }
    }

    /// The byte size on the wire of this message
    pub fn wire_size(&self) -> usize {
        self.header().wire_size() + self.content_size()
    }

    fn content_size(&self) -> usize {
        match self {
            Message::Sync(m) => m.content_size(),
            Message::DelayReq(m) => m.content_size(),
            Message::PdelayReq(m) => m.content_size(),
            Message::PdelayResp(m) => m.content_size(),
            Message::FollowUp(m) => m.content_size(),
            Message::DelayResp(m) => m.content_size(),
            Message::PdelayRespFollowUp(m) => m.content_size(),
            Message::Announce(m) => m.content_size(),
            Message::Signaling(_) | Message::Management(_) => 0,
        }
    }

    fn content_type(&self) -> MessageType {
        match self {
            Message::Sync(_) => MessageType::Sync,
            Message::DelayReq(_) => MessageType::DelayReq,
            Message::PdelayReq(_) => MessageType::PdelayReq,
            Message::PdelayResp(_) => MessageType::PdelayResp,
            Message::FollowUp(_) => MessageType::FollowUp,
            Message::DelayResp(_) => MessageType::DelayResp,
            Message::PdelayRespFollowUp(_) => MessageType::PdelayRespFollowUp,
            Message::Announce(_) => MessageType::Announce,
            Message::Signaling(_) => MessageType::Signaling,
            Message::Management(_) => MessageType::Management,
        }
    }

    /// Serializes the message into the PTP wire format.
    ///
    /// Returns the used buffer size that contains the message.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, WireFormatError> {
        let size = self.wire_size();
        if buffer.len() < size {
            return Err(WireFormatError::BufferTooShort);
        }

        self.header()
            .serialize_header(self.content_type(), self.content_size(), &mut buffer[0..34])?;

        match self {
            Message::Sync(m) => m.serialize_content(&mut buffer[34..])?,
            Message::DelayReq(m) => m.serialize_content(&mut buffer[34..])?,
            Message::PdelayReq(m) => m.serialize_content(&mut buffer[34..])?,
            Message::PdelayResp(m) => m.serialize_content(&mut buffer[34..])?,
            Message::FollowUp(m) => m.serialize_content(&mut buffer[34..])?,
            Message::DelayResp(m) => m.serialize_content(&mut buffer[34..])?,
            Message::PdelayRespFollowUp(m) => m.serialize_content(&mut buffer[34..])?,
            Message::Announce(m) => m.serialize_content(&mut buffer[34..])?,
            Message::Signaling(_) | Message::Management(_) => {}
        }

        Ok(size)
    }

    pub fn serialize_vec(&self) -> Result<Vec<u8>, WireFormatError> {
        let mut buffer = vec![0; self.wire_size()];
        self.serialize(&mut buffer)?;
        Ok(buffer)
    }

    /// Deserializes a message from the PTP wire format.
    pub fn deserialize(buffer: &[u8]) -> Result<Self, WireFormatError> {
        let (header, message_type, _) = Header::deserialize_header(buffer)?;
        let content = &buffer[34..];

        match message_type {
            MessageType::Sync => Ok(Message::Sync(SyncMessage::deserialize_content(
                header, content,
            )?)),
            MessageType::DelayReq => Ok(Message::DelayReq(DelayReqMessage::deserialize_content(
                header, content,
            )?)),
            MessageType::PdelayReq => Ok(Message::PdelayReq(
                PdelayReqMessage::deserialize_content(header, content)?,
            )),
            MessageType::PdelayResp => Ok(Message::PdelayResp(
                PdelayRespMessage::deserialize_content(header, content)?,
            )),
            MessageType::FollowUp => Ok(Message::FollowUp(FollowUpMessage::deserialize_content(
                header, content,
            )?)),
            MessageType::DelayResp => Ok(Message::DelayResp(
                DelayRespMessage::deserialize_content(header, content)?,
            )),
            MessageType::PdelayRespFollowUp => Ok(Message::PdelayRespFollowUp(
                PdelayRespFollowUpMessage::deserialize_content(header, content)?,
            )),
            MessageType::Announce => Ok(Message::Announce(AnnounceMessage::deserialize_content(
                header, content,
            )?)),
            MessageType::Signaling => Ok(Message::Signaling(header)),
            MessageType::Management => Ok(Message::Management(header)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::common::{
        ClockAccuracy, ClockIdentity, ClockQuality, PortIdentity, TimeSource, WireTimestamp,
    };

    #[test]
    fn announce_roundtrip() {
        let announce = Message::Announce(AnnounceMessage {
            header: Header {
                domain_number: 0,
                source_port_identity: PortIdentity {
                    clock_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
                    port_number: 1,
                },
                sequence_id: 42,
                log_message_interval: 1,
                current_utc_offset_valid: true,
                ..Header::new()
            },
            origin_timestamp: WireTimestamp::default(),
            current_utc_offset: 37,
            grandmaster_priority_1: 128,
            grandmaster_clock_quality: ClockQuality {
                clock_class: 6,
                clock_accuracy: ClockAccuracy::NS100,
                offset_scaled_log_variance: 0x4e5d,
            },
            grandmaster_priority_2: 128,
            grandmaster_identity: ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]),
            steps_removed: 0,
            time_source: TimeSource::Gnss,
        });

        let data = announce.serialize_vec().unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(Message::deserialize(&data).unwrap(), announce);
    }

    #[test]
    fn delay_resp_roundtrip() {
        let resp = Message::DelayResp(DelayRespMessage {
            header: Header {
                sequence_id: 7,
                correction_field: 500 << 16,
                ..Header::new()
            },
            receive_timestamp: WireTimestamp {
                seconds: 12345,
                nanos: 999,
            },
            requesting_port_identity: PortIdentity {
                clock_identity: ClockIdentity([8; 8]),
                port_number: 2,
            },
        });

        let data = resp.serialize_vec().unwrap();
        assert_eq!(data.len(), 54);
        assert_eq!(Message::deserialize(&data).unwrap(), resp);
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert_eq!(
            Message::deserialize(&[0; 20]),
            Err(WireFormatError::BufferTooShort)
        );
    }
}
