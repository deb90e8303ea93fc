//! Packet framing and message types for the Onkyo/Integra eISCP protocol.
//!
//! eISCP wraps ISCP text commands (`PWR01`, `MVLQSTN`, ...) in a binary
//! header so they can travel over TCP and UDP.
//!
//! # Packet Format
//!
//! ```text
//! +--------+-------------+--------------+---------+----------+-----------+
//! | Magic  | Header size | Payload size | Version | Reserved |  Payload  |
//! | "ISCP" |  u32 BE 16  |    u32 BE    |  0x01   | 3 bytes  | variable  |
//! +--------+-------------+--------------+---------+----------+-----------+
//! ```
//!
//! The payload is `'!'`, a device category byte, a 3-character command code
//! and a value, followed by a line ending.
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use eiscp_protocol::{decode_packets, encode_packet, DeviceCategory};
//!
//! let packet = encode_packet("PWRQSTN", DeviceCategory::Receiver);
//!
//! let mut buf = BytesMut::from(packet.as_bytes());
//! let decoded = decode_packets(&mut buf);
//!
//! let message = decoded.packets[0].message().unwrap();
//! assert_eq!(message.code(), "PWR");
//! assert_eq!(message.value(), "QSTN");
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    decode_datagram, decode_header, decode_packets, encode_packet, Decoded, Packet, PacketHeader,
};
pub use error::ProtocolError;
pub use types::{
    DeviceCategory, DeviceInfo, Message, CODE_LEN, DISCOVERY_COMMAND, DISCOVERY_PORT,
    DISCOVERY_REPLY_CODE, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE, NO_VALUE, PROTOCOL_VERSION, QUERY,
};
