use bytes::BytesMut;
use eiscp_protocol::{decode_packets, encode_packet, DeviceCategory, Message, NO_VALUE};
use proptest::prelude::*;

fn code_strategy() -> impl Strategy<Value = String> {
    "[A-Z0-9]{3}"
}

/// Printable ASCII never contains a terminator byte.
fn value_strategy() -> impl Strategy<Value = String> {
    "[ -~]{0,40}".prop_filter("N/A decodes as empty", |v| v != NO_VALUE)
}

fn message_strategy() -> impl Strategy<Value = (String, String)> {
    (code_strategy(), value_strategy())
}

proptest! {
    #[test]
    fn prop_roundtrip_message(code in code_strategy(), value in value_strategy(), category in any::<u8>()) {
        let category = DeviceCategory::from(category);
        let packet = encode_packet(&format!("{}{}", code, value), category);

        let mut buf = BytesMut::from(packet.as_bytes());
        let decoded = decode_packets(&mut buf);
        prop_assert!(decoded.is_clean(), "{:?}", decoded.diagnostics);
        prop_assert!(buf.is_empty());
        prop_assert_eq!(&decoded.packets, &vec![packet]);

        let message = decoded.packets[0].message().unwrap();
        prop_assert_eq!(message.code(), code.as_str());
        prop_assert_eq!(message.value(), value.as_str());
        prop_assert_eq!(message.category(), category);
    }

    #[test]
    fn prop_concatenated_frames_keep_order(
        messages in prop::collection::vec(message_strategy(), 1..8),
        split in any::<prop::sample::Index>(),
    ) {
        let mut stream = Vec::new();
        for (code, value) in &messages {
            let packet = encode_packet(&format!("{}{}", code, value), DeviceCategory::Receiver);
            stream.extend_from_slice(packet.as_bytes());
        }

        // Deliver the stream in two reads cut at an arbitrary point.
        let cut = split.index(stream.len() + 1);
        let mut buf = BytesMut::from(&stream[..cut]);
        let mut packets = decode_packets(&mut buf).packets;
        buf.extend_from_slice(&stream[cut..]);
        let decoded = decode_packets(&mut buf);
        prop_assert!(decoded.is_clean(), "{:?}", decoded.diagnostics);
        prop_assert!(buf.is_empty());
        packets.extend(decoded.packets);

        let received: Vec<Message> = packets.iter().map(|p| p.message().unwrap()).collect();
        let expected: Vec<Message> = messages
            .iter()
            .map(|(code, value)| Message::new(code.as_str(), value.as_str()))
            .collect();
        prop_assert_eq!(received, expected);
    }
}
