use bytes::Bytes;
use socketwire_core::{
    Str, Value,
    packet::{Packet, PacketData},
    parser::ParseError,
};

/// A decoded text message, with the attachment count announced in its header.
pub struct Decoded {
    pub packet: Packet,
    pub attachments: usize,
}

/// Parse the header and the json payload of a text message.
/// Placeholders of binary packets are left in place.
pub fn deserialize_packet(data: Str) -> Result<Decoded, ParseError> {
    let input = data.as_str();
    let index = match input.as_bytes().first() {
        Some(c @ b'0'..=b'6') => c - b'0',
        _ => return Err(ParseError::InvalidPacketType),
    };
    let mut reader = Reader { input, pos: 1 };

    let attachments = if index == 5 || index == 6 {
        reader.read_attachments()?
    } else {
        0
    };
    let ns = reader.read_nsp(&data);
    let ack = reader.read_ack()?;
    let payload = reader.rest();

    let inner = match index {
        0 => PacketData::Connect(read_optional_json(payload)?),
        1 => PacketData::Disconnect,
        2 | 5 => {
            let (event, args) = read_event(payload)?;
            if index == 2 {
                PacketData::Event(event, args, ack)
            } else {
                PacketData::BinaryEvent(event, args, ack)
            }
        }
        3 | 6 => {
            let ack = ack.ok_or(ParseError::InvalidAckId)?;
            let args = match read_json(payload)? {
                Value::Array(args) => args,
                _ => return Err(ParseError::InvalidData),
            };
            if index == 3 {
                PacketData::EventAck(args, ack)
            } else {
                PacketData::BinaryAck(args, ack)
            }
        }
        _ => PacketData::ConnectError(read_json(payload)?),
    };

    let packet = Packet { inner, ns };
    if packet.inner.is_binary() && count_placeholders(&packet.inner) != attachments {
        return Err(ParseError::InvalidAttachments);
    }
    Ok(Decoded {
        packet,
        attachments,
    })
}

struct Reader<'a> {
    input: &'a str,
    pos: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn read_digits(&mut self) -> &str {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// `<count>-`
    fn read_attachments(&mut self) -> Result<usize, ParseError> {
        let count = self
            .read_digits()
            .parse()
            .map_err(|_| ParseError::InvalidAttachments)?;
        if self.peek() != Some(b'-') {
            return Err(ParseError::InvalidAttachments);
        }
        self.pos += 1;
        Ok(count)
    }

    /// `/<name>,` or nothing for the main namespace.
    fn read_nsp(&mut self, data: &Str) -> Str {
        if self.peek() != Some(b'/') {
            return Str::from("/");
        }
        let start = self.pos;
        let end = self.input[start..]
            .find(',')
            .map(|i| start + i)
            .unwrap_or(self.input.len());
        self.pos = (end + 1).min(self.input.len());
        data.slice(start..end)
    }

    fn read_ack(&mut self) -> Result<Option<i64>, ParseError> {
        let digits = self.read_digits();
        if digits.is_empty() {
            return Ok(None);
        }
        digits
            .parse()
            .map(Some)
            .map_err(|_| ParseError::InvalidAckId)
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }
}

fn read_json(payload: &str) -> Result<Value, ParseError> {
    serde_json::from_str(payload).map_err(|_| ParseError::InvalidData)
}

fn read_optional_json(payload: &str) -> Result<Option<Value>, ParseError> {
    if payload.is_empty() {
        Ok(None)
    } else {
        read_json(payload).map(Some)
    }
}

fn read_event(payload: &str) -> Result<(Str, Vec<Value>), ParseError> {
    let Value::Array(data) = read_json(payload)? else {
        return Err(ParseError::InvalidData);
    };
    let mut data = data.into_iter();
    match data.next() {
        Some(Value::String(event)) => Ok((Str::from(event), data.collect())),
        _ => Err(ParseError::InvalidEventName),
    }
}

fn placeholder_num(value: &Value) -> Option<u64> {
    let obj = value.as_object()?;
    if obj.len() == 2 && obj.get("_placeholder").and_then(Value::as_bool) == Some(true) {
        obj.get("num").and_then(Value::as_u64)
    } else {
        None
    }
}

fn count_placeholders(data: &PacketData) -> usize {
    fn count(value: &Value) -> usize {
        if placeholder_num(value).is_some() {
            return 1;
        }
        match value {
            Value::Array(arr) => arr.iter().map(count).sum(),
            Value::Object(obj) => obj.values().map(count).sum(),
            _ => 0,
        }
    }
    match data {
        PacketData::BinaryEvent(_, args, _) | PacketData::BinaryAck(args, _) => {
            args.iter().map(count).sum()
        }
        _ => 0,
    }
}

/// Replace the placeholders of a binary packet with its attachments.
pub fn fill_placeholders(data: &mut PacketData, attachments: &[Bytes]) -> Result<(), ParseError> {
    fn fill(value: &mut Value, attachments: &[Bytes]) -> Result<(), ParseError> {
        if let Some(num) = placeholder_num(value) {
            let bin = usize::try_from(num)
                .ok()
                .and_then(|n| attachments.get(n))
                .ok_or(ParseError::InvalidAttachments)?;
            *value = Value::Binary(bin.clone());
            return Ok(());
        }
        match value {
            Value::Array(arr) => arr.iter_mut().try_for_each(|v| fill(v, attachments)),
            Value::Object(obj) => obj.values_mut().try_for_each(|v| fill(v, attachments)),
            _ => Ok(()),
        }
    }
    match data {
        PacketData::BinaryEvent(_, args, _) | PacketData::BinaryAck(args, _) => {
            args.iter_mut().try_for_each(|v| fill(v, attachments))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &'static str) -> Result<Packet, ParseError> {
        deserialize_packet(Str::from(data)).map(|d| d.packet)
    }

    #[test]
    fn header_grammar() {
        let decoded = deserialize_packet(Str::from(
            r#"52-/admin™,12[{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#,
        ))
        .unwrap();
        assert_eq!(decoded.attachments, 2);
        assert_eq!(decoded.packet.ns, "/admin™");
        assert_eq!(decoded.packet.inner.ack_id(), Some(12));
    }

    #[test]
    fn namespace_without_payload() {
        let packet = decode("1/admin").unwrap();
        assert_eq!(packet.ns, "/admin");
        assert_eq!(packet.inner, PacketData::Disconnect);
    }

    #[test]
    fn malformed_packets() {
        assert_eq!(decode("").unwrap_err(), ParseError::InvalidPacketType);
        assert_eq!(decode("7").unwrap_err(), ParseError::InvalidPacketType);
        assert_eq!(decode("4abc").unwrap_err(), ParseError::InvalidData);
        assert_eq!(decode("2{}").unwrap_err(), ParseError::InvalidData);
        assert_eq!(decode("2[1]").unwrap_err(), ParseError::InvalidEventName);
        assert_eq!(decode("3[]").unwrap_err(), ParseError::InvalidAckId);
        assert_eq!(
            decode("299999999999999999999[\"ev\"]").unwrap_err(),
            ParseError::InvalidAckId
        );
        assert_eq!(decode("5[\"ev\"]").unwrap_err(), ParseError::InvalidAttachments);
        assert_eq!(
            decode("52-[\"ev\",{\"_placeholder\":true,\"num\":0}]").unwrap_err(),
            ParseError::InvalidAttachments
        );
    }

    #[test]
    fn placeholder_out_of_range() {
        let mut data = PacketData::BinaryEvent(
            "ev".into(),
            vec![read_json(r#"{"_placeholder":true,"num":3}"#).unwrap()],
            None,
        );
        assert_eq!(
            fill_placeholders(&mut data, &[Bytes::new()]).unwrap_err(),
            ParseError::InvalidAttachments
        );
    }
}
