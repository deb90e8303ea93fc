//! Codec for encoding and decoding eISCP packets.
//!
//! Packet format (integers big-endian):
//! ```text
//! +--------+-------------+--------------+---------+----------+-------------------+
//! | Magic  | Header size | Payload size | Version | Reserved |      Payload      |
//! | "ISCP" |   u32 = 16  |     u32      |  0x01   | 00 00 00 | !1PWR01\r\n ...   |
//! +--------+-------------+--------------+---------+----------+-------------------+
//! | 4 bytes|   4 bytes   |   4 bytes    | 1 byte  | 3 bytes  | Payload size bytes|
//! ```
//!
//! A TCP read can carry any number of packets back to back, possibly ending
//! in the middle of one. [`decode_packets`] takes every complete packet off
//! the front of a buffer and leaves a trailing partial packet in place for
//! the next read. Corrupt data is skipped up to the next magic marker and
//! reported as a diagnostic instead of failing the whole buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

/// Bytes that open every well-formed header: magic plus the header size.
const FRAME_SIGNATURE: [u8; 8] = [b'I', b'S', b'C', b'P', 0, 0, 0, HEADER_SIZE as u8];

/// One complete packet, header included.
///
/// Equality is byte-for-byte, which is what discovery relies on to recognise
/// its own broadcast coming back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet(Bytes);

impl Packet {
    /// Wrap raw bytes received as one unit, e.g. a UDP datagram.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The full packet as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload following the header.
    pub fn payload(&self) -> &[u8] {
        self.0.get(HEADER_SIZE..).unwrap_or_default()
    }

    /// Parse the message carried in the payload.
    pub fn message(&self) -> Result<Message, ProtocolError> {
        Message::parse(self.payload())
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_len: u32,
    pub version: u8,
}

impl PacketHeader {
    /// Header plus payload length.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// Result of decoding a buffer: the packets recovered, in stream order, and
/// whatever had to be skipped to get them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub packets: Vec<Packet>,
    pub diagnostics: Vec<ProtocolError>,
}

impl Decoded {
    /// True when nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Encode a command string (code plus parameters) for a device category.
///
/// The command is written verbatim and followed by `\r\n`. Decoding strips
/// every trailing EOF marker (`0x1A`, `0x19`) and line ending, so a command
/// that itself ends in one of those bytes loses them on the way back:
/// `"IFA\x19"` decodes as code `IFA` with an empty value.
pub fn encode_packet(command: &str, category: DeviceCategory) -> Packet {
    let payload_len = 2 + command.len() + TERMINATOR.len();

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload_len);
    frame.put_slice(&MAGIC);
    frame.put_u32(HEADER_SIZE as u32);
    frame.put_u32(payload_len as u32);
    frame.put_u8(PROTOCOL_VERSION);
    frame.put_bytes(0, 3);

    frame.put_u8(INTRODUCER);
    frame.put_u8(category.as_byte());
    frame.put_slice(command.as_bytes());
    frame.put_slice(TERMINATOR);

    Packet(frame.freeze())
}

/// Try to decode a packet header from the buffer.
/// Returns None if there's not enough data yet.
pub fn decode_header(buf: &[u8]) -> Result<Option<PacketHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    if buf[0..4] != MAGIC {
        return Err(ProtocolError::InvalidMagic(leading_bytes(buf)));
    }

    let mut fields = &buf[4..HEADER_SIZE];
    let header_size = fields.get_u32();
    if header_size as usize != HEADER_SIZE {
        return Err(ProtocolError::InvalidHeaderSize(header_size));
    }

    let payload_len = fields.get_u32();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload_len, MAX_PAYLOAD_SIZE));
    }

    Ok(Some(PacketHeader {
        payload_len,
        version: fields.get_u8(),
    }))
}

/// Take every complete packet off the front of `buf`.
///
/// A trailing incomplete packet stays in `buf`. Garbage before a magic
/// marker, headers that fail validation, and packets whose declared length
/// runs into the next packet or stops short of the terminator are skipped
/// and reported in [`Decoded::diagnostics`].
pub fn decode_packets(buf: &mut BytesMut) -> Decoded {
    let mut decoded = Decoded::default();

    while !buf.is_empty() {
        match find(buf, &MAGIC) {
            Some(0) => {}
            Some(pos) => {
                decoded
                    .diagnostics
                    .push(ProtocolError::InvalidMagic(leading_bytes(buf)));
                buf.advance(pos);
            }
            None => {
                // Keep a tail that could be the start of a magic split across reads.
                let keep = partial_magic_suffix(buf);
                if buf.len() > keep {
                    decoded
                        .diagnostics
                        .push(ProtocolError::InvalidMagic(leading_bytes(buf)));
                    buf.advance(buf.len() - keep);
                }
                break;
            }
        }

        let header = match decode_header(buf) {
            Ok(Some(header)) => header,
            Ok(None) => break,
            Err(e) => {
                decoded.diagnostics.push(e);
                resync(buf);
                continue;
            }
        };

        let frame_len = header.frame_len();
        let available = &buf[HEADER_SIZE..frame_len.min(buf.len())];
        if let Some(next) = find(available, &FRAME_SIGNATURE) {
            decoded.diagnostics.push(ProtocolError::IncompleteFrame {
                expected: header.payload_len as usize,
                actual: next,
            });
            buf.advance(HEADER_SIZE + next);
            continue;
        }

        if buf.len() < frame_len {
            break;
        }

        // A declared length shorter than the message cuts it before its
        // terminator; an empty payload ends on a header byte.
        let last = buf[frame_len - 1];
        if header.payload_len == 0 || !is_terminator(last) {
            decoded.diagnostics.push(ProtocolError::MissingTerminator(last));
            resync(buf);
            continue;
        }

        decoded.packets.push(Packet(buf.split_to(frame_len).freeze()));
    }

    decoded
}

/// Decode a self-contained buffer such as a UDP datagram. Unlike
/// [`decode_packets`], trailing partial data is reported rather than kept.
pub fn decode_datagram(data: &[u8]) -> Decoded {
    let mut buf = BytesMut::from(data);
    let mut decoded = decode_packets(&mut buf);

    if !buf.is_empty() {
        let expected = match decode_header(&buf) {
            Ok(Some(header)) => header.frame_len(),
            _ => HEADER_SIZE,
        };
        decoded.diagnostics.push(ProtocolError::IncompleteFrame {
            expected,
            actual: buf.len(),
        });
    }

    decoded
}

/// Drop the packet at the front of `buf` up to the next magic marker, or
/// everything but a possible partial marker when there is none.
fn resync(buf: &mut BytesMut) {
    match find(&buf[1..], &MAGIC) {
        Some(pos) => buf.advance(pos + 1),
        None => {
            let keep = partial_magic_suffix(&buf[1..]);
            buf.advance(buf.len() - keep);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn partial_magic_suffix(buf: &[u8]) -> usize {
    (1..MAGIC.len())
        .rev()
        .find(|&n| buf.len() >= n && buf[buf.len() - n..] == MAGIC[..n])
        .unwrap_or(0)
}

fn leading_bytes(buf: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    let n = buf.len().min(4);
    out[..n].copy_from_slice(&buf[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(packets: &[Packet]) -> BytesMut {
        let mut buf = BytesMut::new();
        for p in packets {
            buf.extend_from_slice(p.as_bytes());
        }
        buf
    }

    #[test]
    fn test_encode_layout() {
        let packet = encode_packet("PWRQSTN", DeviceCategory::Receiver);
        let bytes = packet.as_bytes();

        assert_eq!(&bytes[0..4], b"ISCP");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 16]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 11]);
        assert_eq!(bytes[12], PROTOCOL_VERSION);
        assert_eq!(&bytes[13..16], &[0, 0, 0]);
        assert_eq!(packet.payload(), b"!1PWRQSTN\r\n");
    }

    #[test]
    fn test_encode_decode_message() {
        let packet = encode_packet("MVL2F", DeviceCategory::Receiver);

        let header = decode_header(packet.as_bytes()).unwrap().unwrap();
        assert_eq!(header.payload_len as usize, packet.payload().len());

        let msg = packet.message().unwrap();
        assert_eq!(msg.code(), "MVL");
        assert_eq!(msg.value(), "2F");
    }

    #[test]
    fn test_decode_multiple_packets() {
        let sent = vec![
            encode_packet("PWR01", DeviceCategory::Receiver),
            encode_packet("AMT00", DeviceCategory::Receiver),
            encode_packet("MVL1A", DeviceCategory::Receiver),
        ];
        let mut buf = concat(&sent);

        let decoded = decode_packets(&mut buf);
        assert!(decoded.is_clean());
        assert_eq!(decoded.packets, sent);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_packet_is_kept() {
        let first = encode_packet("PWR01", DeviceCategory::Receiver);
        let second = encode_packet("SLI23", DeviceCategory::Receiver);
        let mut buf = concat(&[first.clone()]);
        buf.extend_from_slice(&second.as_bytes()[..10]);

        let decoded = decode_packets(&mut buf);
        assert!(decoded.is_clean());
        assert_eq!(decoded.packets, vec![first]);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&second.as_bytes()[10..]);
        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![second]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_magic_split_across_reads() {
        let packet = encode_packet("PWR01", DeviceCategory::Receiver);
        let mut buf = BytesMut::from(&b"ISC"[..]);

        let decoded = decode_packets(&mut buf);
        assert!(decoded.packets.is_empty());
        assert!(decoded.is_clean());
        assert_eq!(&buf[..], b"ISC");

        buf.extend_from_slice(&packet.as_bytes()[3..]);
        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![packet]);
    }

    #[test]
    fn test_garbage_between_packets_is_skipped() {
        let first = encode_packet("PWR01", DeviceCategory::Receiver);
        let second = encode_packet("AMT01", DeviceCategory::Receiver);
        let mut buf = concat(&[first.clone()]);
        buf.extend_from_slice(b"\x00\xffjunk");
        buf.extend_from_slice(second.as_bytes());

        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![first, second]);
        assert_eq!(decoded.diagnostics.len(), 1);
        assert!(matches!(
            decoded.diagnostics[0],
            ProtocolError::InvalidMagic(_)
        ));
    }

    #[test]
    fn test_inconsistent_length_is_skipped() {
        let good = encode_packet("PWR01", DeviceCategory::Receiver);

        // Header claims 200 bytes of payload but the next packet follows early.
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(HEADER_SIZE as u32);
        buf.put_u32(200);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_bytes(0, 3);
        buf.put_slice(b"!1NLSC0P");
        buf.extend_from_slice(good.as_bytes());

        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![good]);
        assert_eq!(
            decoded.diagnostics,
            vec![ProtocolError::IncompleteFrame {
                expected: 200,
                actual: 8
            }]
        );
    }

    #[test]
    fn test_short_declared_length_is_skipped() {
        let good = encode_packet("AMT01", DeviceCategory::Receiver);

        // Header claims 5 payload bytes, cutting "!1PWR01\x1a\r\n" after the code.
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(HEADER_SIZE as u32);
        buf.put_u32(5);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_bytes(0, 3);
        buf.put_slice(b"!1PWR01\x1a\r\n");

        let mut alone = buf.clone();
        let decoded = decode_packets(&mut alone);
        assert!(decoded.packets.is_empty());
        assert_eq!(decoded.diagnostics, vec![ProtocolError::MissingTerminator(b'R')]);
        assert!(alone.is_empty());

        buf.extend_from_slice(good.as_bytes());
        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![good]);
        assert_eq!(decoded.diagnostics, vec![ProtocolError::MissingTerminator(b'R')]);
    }

    #[test]
    fn test_empty_payload_is_skipped() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(HEADER_SIZE as u32);
        buf.put_u32(0);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_bytes(0, 3);

        let decoded = decode_packets(&mut buf);
        assert!(decoded.packets.is_empty());
        assert_eq!(decoded.diagnostics, vec![ProtocolError::MissingTerminator(0)]);
    }

    #[test]
    fn test_trailing_terminator_bytes_in_command_are_lost() {
        let packet = encode_packet("IFA\x19", DeviceCategory::Receiver);
        let message = packet.message().unwrap();
        assert_eq!(message.code(), "IFA");
        assert_eq!(message.value(), "");
    }

    #[test]
    fn test_invalid_header_size_is_skipped() {
        let good = encode_packet("AMT00", DeviceCategory::Receiver);
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32(12);
        buf.put_u32(5);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_bytes(0, 3);
        buf.extend_from_slice(good.as_bytes());

        let decoded = decode_packets(&mut buf);
        assert_eq!(decoded.packets, vec![good]);
        assert_eq!(decoded.diagnostics, vec![ProtocolError::InvalidHeaderSize(12)]);
    }

    #[test]
    fn test_incomplete_header() {
        let partial = b"ISCP\x00";
        let result = decode_header(partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let result = decode_header(b"BNDPxxxxxxxxxxxxxxxx");
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_datagram_reports_truncation() {
        let packet = encode_packet("ECNQSTN", DeviceCategory::Any);
        let truncated = &packet.as_bytes()[..packet.as_bytes().len() - 2];

        let decoded = decode_datagram(truncated);
        assert!(decoded.packets.is_empty());
        assert_eq!(
            decoded.diagnostics,
            vec![ProtocolError::IncompleteFrame {
                expected: packet.as_bytes().len(),
                actual: truncated.len()
            }]
        );
    }

    #[test]
    fn test_packet_equality_is_bytewise() {
        let probe = encode_packet(DISCOVERY_COMMAND, DeviceCategory::Any);
        let echoed = Packet::from_bytes(probe.as_bytes().to_vec());
        assert_eq!(probe, echoed);

        let other = encode_packet(DISCOVERY_COMMAND, DeviceCategory::Receiver);
        assert_ne!(probe, other);
    }
}
