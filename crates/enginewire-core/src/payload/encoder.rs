use bytes::{BufMut, Bytes, BytesMut};

use super::{
    BINARY_PACKET_SEPARATOR_V3, PACKET_SEPARATOR_V4, Payload, STRING_PACKET_SEPARATOR_V3,
};
use crate::{Packet, ProtocolVersion};

/// Accumulates packets into a single payload while staying under `max_payload`.
///
/// The caller checks [`PayloadEncoder::fits`] before pushing a buffer of packets,
/// so that packets sent together are never split between two payloads.
#[derive(Debug)]
pub struct PayloadEncoder {
    protocol: ProtocolVersion,
    supports_binary: bool,
    max_payload: u64,
    packets: Vec<Packet>,
    estimated_size: usize,
}

impl PayloadEncoder {
    /// Create a new encoder.
    ///
    /// `supports_binary` is false when the client asked for base64 payloads (`b64=1`).
    /// Only protocol v3 payloads may carry raw binary data.
    pub fn new(protocol: ProtocolVersion, supports_binary: bool, max_payload: u64) -> Self {
        Self {
            protocol,
            supports_binary,
            max_payload,
            packets: Vec::new(),
            estimated_size: 0,
        }
    }

    fn b64(&self) -> bool {
        self.protocol == ProtocolVersion::V4 || !self.supports_binary
    }

    fn packet_size(&self, packet: &Packet) -> usize {
        // separator, or length digits and separator for v3
        const FRAMING_LEN: usize = 1;
        let digits = match self.protocol {
            ProtocolVersion::V4 => 0,
            ProtocolVersion::V3 => self.max_payload.checked_ilog10().unwrap_or(0) as usize + 2,
        };
        packet.size_hint(self.b64()) + FRAMING_LEN + digits
    }

    /// Returns true if the packets can be added without going over `max_payload`.
    /// An empty encoder accepts anything so a payload always makes progress.
    pub fn fits(&self, packets: &[Packet]) -> bool {
        if self.packets.is_empty() {
            return true;
        }
        let size: usize = packets.iter().map(|p| self.packet_size(p)).sum();
        (self.estimated_size + size) as u64 <= self.max_payload
    }

    /// Add packets to the payload
    pub fn push(&mut self, packets: impl IntoIterator<Item = Packet>) {
        for packet in packets {
            self.estimated_size += self.packet_size(&packet);
            self.packets.push(packet);
        }
    }

    /// Returns true if no packet was pushed yet
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Encode the pushed packets
    pub fn finish(self) -> Payload {
        match self.protocol {
            ProtocolVersion::V4 => encode_v4(self.packets),
            ProtocolVersion::V3 => {
                let has_binary = self.packets.iter().any(Packet::is_binary);
                if has_binary && self.supports_binary {
                    encode_v3_binary(self.packets)
                } else {
                    encode_v3_string(self.packets)
                }
            }
        }
    }
}

fn encode_v4(packets: Vec<Packet>) -> Payload {
    let mut data = String::new();
    for packet in packets {
        if !data.is_empty() {
            data.push(PACKET_SEPARATOR_V4 as char);
        }
        data.push_str(&String::from(packet));
    }
    Payload {
        data: data.into(),
        has_binary: false,
    }
}

/// The length prefix counts utf-16 code units, like the length of a js string.
fn encode_v3_string(packets: Vec<Packet>) -> Payload {
    let mut data = BytesMut::new();
    let mut itoa = itoa::Buffer::new();
    for packet in packets {
        let packet = String::from(packet);
        let len = packet.encode_utf16().count();
        data.put_slice(itoa.format(len).as_bytes());
        data.put_u8(STRING_PACKET_SEPARATOR_V3);
        data.put_slice(packet.as_bytes());
    }
    Payload {
        data: data.freeze(),
        has_binary: false,
    }
}

fn encode_v3_binary(packets: Vec<Packet>) -> Payload {
    let mut data = BytesMut::new();
    let mut itoa = itoa::Buffer::new();
    for packet in packets {
        match packet {
            Packet::BinaryV3(bin) | Packet::Binary(bin) => {
                data.put_u8(0x01);
                for digit in itoa.format(bin.len() + 1).bytes() {
                    data.put_u8(digit - b'0');
                }
                data.put_u8(BINARY_PACKET_SEPARATOR_V3);
                data.put_u8(0x04);
                data.put_slice(&bin);
            }
            packet => {
                let packet = String::from(packet);
                data.put_u8(0x00);
                for digit in itoa.format(packet.len()).bytes() {
                    data.put_u8(digit - b'0');
                }
                data.put_u8(BINARY_PACKET_SEPARATOR_V3);
                data.put_slice(packet.as_bytes());
            }
        }
    }
    Payload {
        data: data.freeze(),
        has_binary: true,
    }
}

impl From<Payload> for Bytes {
    fn from(payload: Payload) -> Self {
        payload.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(protocol: ProtocolVersion, binary: bool, packets: Vec<Packet>) -> Payload {
        let mut encoder = PayloadEncoder::new(protocol, binary, 1000);
        encoder.push(packets);
        encoder.finish()
    }

    #[test]
    fn v4_payload() {
        let payload = encode(
            ProtocolVersion::V4,
            true,
            vec![
                Packet::Message("hello€".into()),
                Packet::Binary(vec![1, 2, 3, 4].into()),
            ],
        );
        assert_eq!(payload.data, "4hello€\x1ebAQIDBA==");
        assert!(!payload.has_binary);
    }

    #[test]
    fn v3_string_payload_counts_utf16_units() {
        let payload = encode(
            ProtocolVersion::V3,
            false,
            vec![Packet::Message("hello€".into()), Packet::Message("😀".into())],
        );
        assert_eq!(payload.data, "7:4hello€3:4😀");
    }

    #[test]
    fn v3_string_payload_with_b64_binary() {
        let payload = encode(
            ProtocolVersion::V3,
            false,
            vec![Packet::Pong, Packet::BinaryV3(vec![1, 2, 3, 4].into())],
        );
        assert_eq!(payload.data, "1:310:b4AQIDBA==");
        assert!(!payload.has_binary);
    }

    #[test]
    fn v3_binary_payload() {
        let payload = encode(
            ProtocolVersion::V3,
            true,
            vec![
                Packet::Message("hello".into()),
                Packet::BinaryV3(vec![1, 2, 3].into()),
            ],
        );
        assert!(payload.has_binary);
        assert_eq!(
            &payload.data[..],
            &[
                0x00, 0x06, 0xff, b'4', b'h', b'e', b'l', b'l', b'o', 0x01, 0x04, 0xff, 0x04, 1,
                2, 3
            ]
        );
        assert_eq!(payload.content_type(), "application/octet-stream");
    }

    #[test]
    fn fits_keeps_the_payload_under_max() {
        let mut encoder = PayloadEncoder::new(ProtocolVersion::V4, true, 10);
        let big = [Packet::Message("123456789".into())];
        assert!(encoder.fits(&big));
        encoder.push(big);
        assert!(!encoder.fits(&[Packet::Message("1".into())]));
    }
}
