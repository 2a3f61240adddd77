use super::{control_field, MessageType};
use crate::datastructures::common::PortIdentity;
use crate::datastructures::WireFormatError;
use crate::time::TimeInternal;

/// The common 34-byte PTP message header, section 13.3.
///
/// The message type and length are not part of the struct; they are derived
/// from the containing [`super::Message`] during serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub domain_number: u8,
    pub alternate_master_flag: bool,
    pub two_step_flag: bool,
    pub unicast_flag: bool,
    pub leap61: bool,
    pub leap59: bool,
    pub current_utc_offset_valid: bool,
    pub ptp_timescale: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    /// Raw correction field: nanoseconds scaled by 2^16.
    pub correction_field: i64,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub log_message_interval: i8,
}

impl Header {
    pub(crate) fn new() -> Self {
        Self {
            domain_number: 0,
            alternate_master_flag: false,
            two_step_flag: false,
            unicast_flag: false,
            leap61: false,
            leap59: false,
            current_utc_offset_valid: false,
            ptp_timescale: false,
            time_traceable: false,
            frequency_traceable: false,
            correction_field: 0,
            source_port_identity: PortIdentity::default(),
            sequence_id: 0,
            log_message_interval: 0x7F,
        }
    }

    pub fn wire_size(&self) -> usize {
        34
    }

    /// The correction field rounded down to whole nanoseconds.
    pub fn correction(&self) -> TimeInternal {
        TimeInternal::from_nanos(self.correction_field >> 16)
    }

    pub(super) fn serialize_header(
        &self,
        message_type: MessageType,
        content_length: usize,
        buffer: &mut [u8],
    ) -> Result<(), WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        buffer[0] = message_type.to_primitive() & 0x0F;
        buffer[1] = 0x02;
        buffer[2..4].copy_from_slice(&((content_length + self.wire_size()) as u16).to_be_bytes());
        buffer[4] = self.domain_number;
        buffer[5] = 0;
        buffer[6] = 0;
        buffer[7] = 0;
        buffer[6] |= self.alternate_master_flag as u8;
        buffer[6] |= (self.two_step_flag as u8) << 1;
        buffer[6] |= (self.unicast_flag as u8) << 2;
        buffer[7] |= self.leap61 as u8;
        buffer[7] |= (self.leap59 as u8) << 1;
        buffer[7] |= (self.current_utc_offset_valid as u8) << 2;
        buffer[7] |= (self.ptp_timescale as u8) << 3;
        buffer[7] |= (self.time_traceable as u8) << 4;
        buffer[7] |= (self.frequency_traceable as u8) << 5;
        buffer[8..16].copy_from_slice(&self.correction_field.to_be_bytes());
        buffer[16..20].copy_from_slice(&[0, 0, 0, 0]);
        self.source_port_identity.serialize(&mut buffer[20..30])?;
        buffer[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buffer[32] = control_field(message_type);
        buffer[33] = self.log_message_interval as u8;

        Ok(())
    }

    pub(super) fn deserialize_header(
        buffer: &[u8],
    ) -> Result<(Self, MessageType, usize), WireFormatError> {
        if buffer.len() < 34 {
            return Err(WireFormatError::BufferTooShort);
        }

        if buffer[1] & 0x0F != 2 {
            return Err(WireFormatError::UnsupportedVersion);
        }

        let message_type = MessageType::from_primitive(buffer[0] & 0x0F)?;
        let message_length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;

        let header = Self {
            domain_number: buffer[4],
            alternate_master_flag: buffer[6] & (1 << 0) > 0,
            two_step_flag: buffer[6] & (1 << 1) > 0,
            unicast_flag: buffer[6] & (1 << 2) > 0,
            leap61: buffer[7] & (1 << 0) > 0,
            leap59: buffer[7] & (1 << 1) > 0,
            current_utc_offset_valid: buffer[7] & (1 << 2) > 0,
            ptp_timescale: buffer[7] & (1 << 3) > 0,
            time_traceable: buffer[7] & (1 << 4) > 0,
            frequency_traceable: buffer[7] & (1 << 5) > 0,
            correction_field: i64::from_be_bytes(buffer[8..16].try_into().unwrap()),
            source_port_identity: PortIdentity::deserialize(&buffer[20..30])?,
            sequence_id: u16::from_be_bytes([buffer[30], buffer[31]]),
            log_message_interval: buffer[33] as i8,
        };

        Ok((header, message_type, message_length))
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
