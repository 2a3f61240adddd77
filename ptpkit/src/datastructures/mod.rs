//! General datastructures: identities, clock quality, datasets and the wire
//! messages exchanged between ports.

use thiserror::Error;

pub mod common;
pub mod datasets;
pub mod messages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireFormatError {
    #[error("a field contained an invalid value")]
    EnumConversionError,
    #[error("the buffer is too short to contain the message")]
    BufferTooShort,
    #[error("unsupported ptp version")]
    UnsupportedVersion,
}
