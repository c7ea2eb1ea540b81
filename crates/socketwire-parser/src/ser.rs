use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use socketwire_core::{
    Str, Value,
    packet::{Packet, PacketData},
    parser::EncodedPacket,
};

/// Serialize a packet to the text format.
///
/// Binary values are pulled out of the payload in traversal order and replaced
/// with `{"_placeholder":true,"num":<index>}`. The packet type follows the extracted
/// attachments: an event with binary data is always written as a binary event.
pub fn serialize_packet(packet: Packet) -> EncodedPacket {
    let mut attachments = Vec::new();
    let index = packet.inner.index();
    let ack = packet.inner.ack_id();

    let payload = match packet.inner {
        PacketData::Connect(data) => data.map(|v| to_json(v, &mut attachments)),
        PacketData::Disconnect => None,
        PacketData::Event(e, args, _) | PacketData::BinaryEvent(e, args, _) => {
            let mut data = Vec::with_capacity(args.len() + 1);
            data.push(JsonValue::String(e.to_string()));
            data.extend(args.into_iter().map(|v| to_json(v, &mut attachments)));
            Some(JsonValue::Array(data))
        }
        PacketData::EventAck(args, _) | PacketData::BinaryAck(args, _) => Some(JsonValue::Array(
            args.into_iter()
                .map(|v| to_json(v, &mut attachments))
                .collect(),
        )),
        PacketData::ConnectError(data) => Some(to_json(data, &mut attachments)),
    };

    let index = match index {
        2 | 5 if attachments.is_empty() => 2,
        2 | 5 => 5,
        3 | 6 if attachments.is_empty() => 3,
        3 | 6 => 6,
        i => i,
    };

    let payload = payload.map(|p| p.to_string());
    let mut data = String::with_capacity(
        1 + packet.ns.len() + payload.as_ref().map(String::len).unwrap_or(0) + 16,
    );
    data.push(char::from(b'0' + index));
    if index == 5 || index == 6 {
        serialize_attachments(&mut data, attachments.len());
    }
    serialize_nsp(&mut data, &packet.ns);
    if let Some(ack) = ack {
        serialize_ack(&mut data, ack);
    }
    if let Some(payload) = payload {
        data.push_str(&payload);
    }

    EncodedPacket {
        data: Str::from(data),
        attachments,
    }
}

fn serialize_attachments(output: &mut String, count: usize) {
    output.push_str(itoa::Buffer::new().format(count));
    output.push('-');
}

fn serialize_nsp(output: &mut String, nsp: &str) {
    if !nsp.is_empty() && nsp != "/" {
        if !nsp.starts_with('/') {
            output.push('/');
        }
        output.push_str(nsp);
        output.push(',');
    }
}

fn serialize_ack(output: &mut String, ack: i64) {
    output.push_str(itoa::Buffer::new().format(ack));
}

fn to_json(value: Value, attachments: &mut Vec<Bytes>) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(b),
        Value::Number(n) => JsonValue::Number(n),
        Value::String(s) => JsonValue::String(s),
        Value::Binary(bin) => {
            let num = attachments.len();
            attachments.push(bin);
            placeholder(num)
        }
        Value::Array(arr) => {
            JsonValue::Array(arr.into_iter().map(|v| to_json(v, attachments)).collect())
        }
        Value::Object(obj) => JsonValue::Object(object_to_json(obj, attachments)),
    }
}

fn object_to_json(obj: BTreeMap<String, Value>, attachments: &mut Vec<Bytes>) -> Map<String, JsonValue> {
    obj.into_iter()
        .map(|(k, v)| (k, to_json(v, attachments)))
        .collect()
}

fn placeholder(num: usize) -> JsonValue {
    let mut map = Map::with_capacity(2);
    map.insert("_placeholder".into(), JsonValue::Bool(true));
    map.insert("num".into(), JsonValue::from(num));
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(b: &'static [u8]) -> Value {
        Value::Binary(Bytes::from_static(b))
    }

    #[test]
    fn placeholders_follow_traversal_order() {
        let mut obj = BTreeMap::new();
        obj.insert("a".to_string(), bin(b"first"));
        obj.insert("b".to_string(), Value::Array(vec![bin(b"second")]));
        let packet = Packet::event("/", "upload", vec![Value::Object(obj), bin(b"third")]);

        let encoded = serialize_packet(packet);
        assert_eq!(
            encoded.data,
            r#"53-["upload",{"a":{"_placeholder":true,"num":0},"b":[{"_placeholder":true,"num":1}]},{"_placeholder":true,"num":2}]"#
        );
        assert_eq!(
            encoded.attachments,
            vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b"second"),
                Bytes::from_static(b"third")
            ]
        );
    }

    #[test]
    fn plain_event_marked_binary_is_normalized() {
        let packet = Packet {
            inner: PacketData::BinaryEvent("ev".into(), vec![Value::from(1)], None),
            ns: "/".into(),
        };
        assert_eq!(serialize_packet(packet).data, r#"2["ev",1]"#);
    }

    #[test]
    fn nsp_without_leading_slash() {
        let mut out = String::new();
        serialize_nsp(&mut out, "admin");
        assert_eq!(out, "/admin,");
    }
}
