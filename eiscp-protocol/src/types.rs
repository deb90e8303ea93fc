//! Message and device types for the eISCP protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Magic bytes at the start of every packet.
pub const MAGIC: [u8; 4] = *b"ISCP";

/// Fixed header size, also carried in the header itself.
pub const HEADER_SIZE: usize = 16;

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Largest payload accepted from the wire. Receivers never send more than a
/// few hundred bytes, so anything above this is a corrupt length field.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

/// UDP port receivers listen on for discovery, and the default TCP port.
pub const DISCOVERY_PORT: u16 = 60128;

/// Command sent to locate receivers.
pub const DISCOVERY_COMMAND: &str = "ECNQSTN";

/// Command code of a discovery reply.
pub const DISCOVERY_REPLY_CODE: &str = "ECN";

/// Parameter asking a receiver to report the current state of a command.
pub const QUERY: &str = "QSTN";

/// Value a receiver sends when it has nothing to report.
pub const NO_VALUE: &str = "N/A";

/// First byte of every payload.
pub const INTRODUCER: u8 = b'!';

/// Terminator appended to outgoing payloads.
pub const TERMINATOR: &[u8] = b"\r\n";

/// EOF marker receivers append before the line ending.
pub const EOF_MARKER: u8 = 0x1A;

/// Bytes a payload may end with: EOF markers and line endings.
pub(crate) fn is_terminator(byte: u8) -> bool {
    matches!(byte, EOF_MARKER | 0x19 | b'\r' | b'\n')
}

/// Length of a command code.
pub const CODE_LEN: usize = 3;

/// Class of addressed device, carried as the second payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCategory {
    /// Audio/video receivers (`'1'`).
    Receiver,
    /// Wildcard used for discovery (`'x'`).
    Any,
    /// Any other unit type byte.
    Other(u8),
}

impl DeviceCategory {
    /// The byte written on the wire.
    pub fn as_byte(self) -> u8 {
        match self {
            DeviceCategory::Receiver => b'1',
            DeviceCategory::Any => b'x',
            DeviceCategory::Other(b) => b,
        }
    }
}

impl From<u8> for DeviceCategory {
    fn from(value: u8) -> Self {
        match value {
            b'1' => DeviceCategory::Receiver,
            b'x' => DeviceCategory::Any,
            other => DeviceCategory::Other(other),
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// A logical command code and value pair carried by one packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    category: DeviceCategory,
    code: String,
    value: String,
}

impl Message {
    /// Build a message addressed to a receiver.
    pub fn new(code: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            category: DeviceCategory::Receiver,
            code: code.into(),
            value: normalize_value(value),
        }
    }

    /// Parse a packet payload: `'!'`, category, 3-character code, value and
    /// an optional terminator.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let body = trim_terminator(payload);
        if body.len() < 2 + CODE_LEN {
            return Err(ProtocolError::PayloadTooShort(body.len()));
        }
        if body[0] != INTRODUCER {
            return Err(ProtocolError::InvalidIntroducer(body[0]));
        }

        let code = &body[2..2 + CODE_LEN];
        if !code.is_ascii() {
            return Err(ProtocolError::InvalidCode(code.to_vec()));
        }

        let value = String::from_utf8_lossy(&body[2 + CODE_LEN..]).into_owned();

        Ok(Self {
            category: DeviceCategory::from(body[1]),
            code: String::from_utf8_lossy(code).into_owned(),
            value: normalize_value(value),
        })
    }

    /// The 3-character command code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The value, empty when the receiver returned no data.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Category byte the sender put in the payload.
    pub fn category(&self) -> DeviceCategory {
        self.category
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.code, self.value)
    }
}

fn normalize_value(value: String) -> String {
    if value == NO_VALUE {
        String::new()
    } else {
        value
    }
}

/// Strip the trailing EOF marker and line ending, in whatever combination
/// the receiver sent them.
fn trim_terminator(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| !is_terminator(b))
        .map_or(0, |i| i + 1);
    &payload[..end]
}

/// Information a receiver reports about itself in its discovery reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Model name, e.g. `TX-NR609`.
    pub model: String,
    /// Unit type the receiver answered with.
    pub category: DeviceCategory,
    /// Destination area code (`DX` North America, `XX` Europe/Asia, `JJ` Japan).
    pub dest_area: String,
    /// Unique identifier, usually the MAC address.
    pub identifier: String,
    /// TCP port the receiver accepts control connections on.
    pub port: u16,
}

impl DeviceInfo {
    /// Build device information from an `ECN` discovery reply whose value is
    /// `model/port/area/identifier`.
    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        if message.code() != DISCOVERY_REPLY_CODE {
            return Err(ProtocolError::UnexpectedCode {
                expected: DISCOVERY_REPLY_CODE.to_string(),
                actual: message.code().to_string(),
            });
        }

        let fields: Vec<&str> = message.value().split('/').collect();
        let [model, port, area, identifier] = fields.as_slice() else {
            return Err(ProtocolError::InvalidDeviceInfo(format!(
                "expected 4 fields, got {} in {:?}",
                fields.len(),
                message.value()
            )));
        };

        let port = port.trim().parse::<u16>().map_err(|e| {
            ProtocolError::InvalidDeviceInfo(format!("invalid port {:?}: {}", port, e))
        })?;

        Ok(Self {
            model: model.trim().to_string(),
            category: message.category(),
            dest_area: area.trim().to_string(),
            identifier: identifier.trim().to_string(),
            port,
        })
    }
}
