#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    rust_2024_compatibility,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]

//! The default parser of socketwire.
//!
//! Packets are written in the socket.io text format:
//! ```text
//! <packet type>[<# of binary attachments>-][<namespace>,][<acknowledgment id>][JSON-stringified payload without binary]
//! + binary attachments extracted
//! ```
//! Each attachment travels as a separate binary engine message following the text message.
use bytes::Bytes;
use socketwire_core::{
    Str,
    packet::Packet,
    parser::{EncodedPacket, Parse, ParseError, ParserState},
};

mod de;
mod ser;

/// Parse and serialize from and into the socket.io text format.
/// See the [socket.io protocol doc](https://socket.io/docs/v4/socket-io-protocol/#packet-encoding).
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonParser;

impl Parse for CommonParser {
    fn encode(self, packet: Packet) -> EncodedPacket {
        ser::serialize_packet(packet)
    }

    fn decode_str(self, state: &ParserState, data: Str) -> Result<Packet, ParseError> {
        if state.is_pending() {
            state.reset();
            return Err(ParseError::UnexpectedStringPacket);
        }
        let de::Decoded {
            packet,
            attachments,
        } = de::deserialize_packet(data)?;
        if packet.inner.is_binary() && attachments > 0 {
            state.start_partial(packet, attachments);
            Err(ParseError::NeedsMoreBinaryData)
        } else {
            Ok(packet)
        }
    }

    fn decode_bin(self, state: &ParserState, bin: Bytes) -> Result<Packet, ParseError> {
        let Some(mut partial) = state.push_attachment(bin)? else {
            return Err(ParseError::NeedsMoreBinaryData);
        };
        de::fill_placeholders(&mut partial.packet.inner, &partial.attachments)?;
        Ok(partial.packet)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde_json::json;
    use socketwire_core::{Sid, Value, packet::ConnectPacket, packet::PacketData};

    use super::*;

    fn encode(packet: Packet) -> String {
        CommonParser.encode(packet).data.into()
    }

    fn decode(data: String) -> Packet {
        CommonParser
            .decode_str(&ParserState::default(), data.into())
            .unwrap()
    }

    fn json_value(value: serde_json::Value) -> Value {
        Value::from(value)
    }

    #[test]
    fn packet_connect() {
        let sid = Sid::new();
        let payload = Value::from_data(&ConnectPacket { sid, pid: None }).unwrap();
        let expected = format!("0{}", json!({ "sid": sid }));
        assert_eq!(encode(Packet::connect("/", Some(payload.clone()))), expected);
        assert_eq!(decode(expected), Packet::connect("/", Some(payload.clone())));

        let expected = format!("0/admin™,{}", json!({ "sid": sid }));
        assert_eq!(
            encode(Packet::connect("/admin™", Some(payload.clone()))),
            expected
        );
        assert_eq!(decode(expected), Packet::connect("/admin™", Some(payload)));

        assert_eq!(decode("0".into()), Packet::connect("/", None));
    }

    #[test]
    fn packet_disconnect() {
        assert_eq!(encode(Packet::disconnect("/")), "1");
        assert_eq!(encode(Packet::disconnect("/admin™")), "1/admin™,");
        assert_eq!(decode("1/admin™,".into()), Packet::disconnect("/admin™"));
    }

    #[test]
    fn packet_event() {
        let args = vec![json_value(json!({ "data": "value™" }))];
        let expected = format!("2{}", json!(["event", { "data": "value™" }]));
        assert_eq!(encode(Packet::event("/", "event", args.clone())), expected);
        assert_eq!(decode(expected), Packet::event("/", "event", args.clone()));

        let mut packet = Packet::event("/admin™", "event", args.clone());
        packet.inner.set_ack_id(1);
        let expected = format!("2/admin™,1{}", json!(["event", { "data": "value™" }]));
        assert_eq!(encode(packet.clone()), expected);
        assert_eq!(decode(expected), packet);

        assert_eq!(encode(Packet::event("/", "event", vec![])), r#"2["event"]"#);
    }

    #[test]
    fn packet_event_ack() {
        let packet = Packet::ack("/", vec![Value::from(2)], 3456);
        assert_eq!(encode(packet.clone()), "33456[2]");
        assert_eq!(decode("33456[2]".into()), packet);

        let packet = Packet::ack("/admin™", vec![Value::from("data")], 54);
        assert_eq!(encode(packet.clone()), "3/admin™,54[\"data\"]");
        assert_eq!(decode("3/admin™,54[\"data\"]".into()), packet);
    }

    #[test]
    fn packet_connect_error() {
        let expected = format!("4/admin™,{}", json!({ "message": "Invalid namespace" }));
        assert_eq!(
            encode(Packet::connect_error("/admin™", "Invalid namespace")),
            expected
        );
    }

    #[test]
    fn binary_event_two_phases() {
        let state = ParserState::default();
        let payload = r#"51-/admin™,254["event",{"data":"value™"},{"_placeholder":true,"num":0}]"#;
        assert_eq!(
            CommonParser
                .decode_str(&state, payload.into())
                .unwrap_err(),
            ParseError::NeedsMoreBinaryData
        );
        let packet = CommonParser
            .decode_bin(&state, Bytes::from_static(&[1, 2, 3]))
            .unwrap();

        let mut obj = BTreeMap::new();
        obj.insert("data".to_string(), Value::from("value™"));
        let mut expected = Packet::event(
            "/admin™",
            "event",
            vec![Value::Object(obj), Value::Binary(Bytes::from_static(&[1, 2, 3]))],
        );
        expected.inner.set_ack_id(254);
        assert_eq!(packet, expected);
        assert!(!state.is_pending());

        let encoded = CommonParser.encode(expected);
        assert_eq!(encoded.data, payload);
        assert_eq!(encoded.attachments, vec![Bytes::from_static(&[1, 2, 3])]);
    }

    #[test]
    fn binary_ack_waits_for_every_attachment() {
        let state = ParserState::default();
        let payload =
            r#"62-7[{"_placeholder":true,"num":1},{"_placeholder":true,"num":0}]"#;
        assert_eq!(
            CommonParser.decode_str(&state, payload.into()).unwrap_err(),
            ParseError::NeedsMoreBinaryData
        );
        assert_eq!(
            CommonParser
                .decode_bin(&state, Bytes::from_static(b"a"))
                .unwrap_err(),
            ParseError::NeedsMoreBinaryData
        );
        let packet = CommonParser
            .decode_bin(&state, Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!(
            packet.inner,
            PacketData::BinaryAck(
                vec![
                    Value::Binary(Bytes::from_static(b"b")),
                    Value::Binary(Bytes::from_static(b"a"))
                ],
                7
            )
        );
    }

    #[test]
    fn unexpected_messages() {
        let state = ParserState::default();
        assert_eq!(
            CommonParser
                .decode_bin(&state, Bytes::from_static(b"a"))
                .unwrap_err(),
            ParseError::UnexpectedBinaryPacket
        );

        let payload = r#"51-["ev",{"_placeholder":true,"num":0}]"#;
        CommonParser.decode_str(&state, payload.into()).unwrap_err();
        assert_eq!(
            CommonParser
                .decode_str(&state, r#"2["ev"]"#.into())
                .unwrap_err(),
            ParseError::UnexpectedStringPacket
        );
        assert!(!state.is_pending());
    }
}
