//! Error types for the eISCP protocol.

use thiserror::Error;

/// Protocol-level errors raised while framing or parsing packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in packet header.
    #[error("Invalid magic bytes: expected 'ISCP', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Header length field does not match the fixed header size.
    #[error("Invalid header size: {0} (expected 16)")]
    InvalidHeaderSize(u32),

    /// Declared payload is larger than any receiver sends.
    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(u32, u32),

    /// Packet payload is incomplete.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Declared payload does not end where the message does.
    #[error("Payload does not end with a terminator: last byte 0x{0:02X}")]
    MissingTerminator(u8),

    /// Payload is too short to carry a command code.
    #[error("Payload too short: {0} bytes")]
    PayloadTooShort(usize),

    /// Payload does not start with the '!' introducer.
    #[error("Invalid payload introducer: 0x{0:02X}")]
    InvalidIntroducer(u8),

    /// Command code is not three ASCII characters.
    #[error("Invalid command code: {0:?}")]
    InvalidCode(Vec<u8>),

    /// Discovery reply could not be turned into device information.
    #[error("Invalid device info: {0}")]
    InvalidDeviceInfo(String),

    /// Message carried a different command code than the one expected.
    #[error("Unexpected command code: expected {expected}, got {actual}")]
    UnexpectedCode { expected: String, actual: String },
}
