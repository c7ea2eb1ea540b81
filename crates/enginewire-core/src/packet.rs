use base64::{Engine, engine::general_purpose};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Sid, Str};

/// A transport level packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Handshake packet, sent by the server once the session is created
    Open(OpenPacket),
    /// Ask the other side to close the session
    Close,
    /// Heartbeat request
    Ping,
    /// Heartbeat response
    Pong,
    /// `2probe`, sent by the client on a new transport to test it
    PingUpgrade,
    /// `3probe`, the answer to [`Packet::PingUpgrade`]
    PongUpgrade,
    /// Application text message
    Message(Str),
    /// Commit the upgrade to the probed transport
    Upgrade,
    /// Packet without meaning, used to release a pending long-poll request during an upgrade
    Noop,
    /// Application binary message.
    ///
    /// Sent as a raw frame on binary capable transports,
    /// otherwise as `b<base64>`.
    Binary(Bytes),
    /// Application binary message for protocol v3 clients.
    ///
    /// Sent as a raw frame prefixed with the message type byte on binary capable
    /// transports, otherwise as `b4<base64>`.
    BinaryV3(Bytes),
}

/// Errors that occur when decoding packets or payloads.
///
/// Decoding never panics: callers receive this error and must close the session.
#[derive(Debug, thiserror::Error)]
pub enum PacketParseError {
    /// The open packet body is not valid json
    #[error("invalid open packet: {0}")]
    InvalidOpenPacket(#[from] serde_json::Error),
    /// The first char does not map to a packet type
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),
    /// The packet data is invalid for its type
    #[error("invalid packet payload")]
    InvalidPacketPayload,
    /// A length prefix does not match the data that follows
    #[error("invalid packet length")]
    InvalidPacketLen,
    /// Text data is not valid utf-8
    #[error("invalid utf8 data: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// Base64 data could not be decoded
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// The payload is bigger than the configured maximum
    #[error("payload too large: max {max}")]
    PayloadTooLarge {
        /// The maximum allowed payload size
        max: u64,
    },
}

/// A packet encoded for a transport that may carry binary frames.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePacket {
    /// A text frame
    Text(String),
    /// A binary frame
    Binary(Bytes),
}

impl Packet {
    /// Check if the packet carries binary data
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_) | Packet::BinaryV3(_))
    }

    /// Upper bound of the encoded size of this packet.
    ///
    /// If `b64` is set, binary packets are measured in their base64 form:
    /// `ceil(n / 3) * 4`.
    pub fn size_hint(&self, b64: bool) -> usize {
        match self {
            Packet::Open(open) => 1 + open.size_hint(),
            Packet::Close | Packet::Ping | Packet::Pong | Packet::Upgrade | Packet::Noop => 1,
            Packet::PingUpgrade | Packet::PongUpgrade => 6,
            Packet::Message(msg) => 1 + msg.len(),
            Packet::Binary(data) if b64 => {
                1 + base64::encoded_len(data.len(), true).unwrap_or(usize::MAX - 1)
            }
            Packet::BinaryV3(data) if b64 => {
                2 + base64::encoded_len(data.len(), true).unwrap_or(usize::MAX - 2)
            }
            Packet::Binary(data) | Packet::BinaryV3(data) => 1 + data.len(),
        }
    }

    /// Encode the packet for a transport.
    ///
    /// Binary packets become raw binary frames when `supports_binary` is set,
    /// and base64 text otherwise.
    pub fn encode(self, supports_binary: bool) -> WirePacket {
        match self {
            Packet::Binary(data) if supports_binary => WirePacket::Binary(data),
            Packet::BinaryV3(data) if supports_binary => {
                let mut buf = BytesMut::with_capacity(data.len() + 1);
                buf.put_u8(0x04);
                buf.put_slice(&data);
                WirePacket::Binary(buf.freeze())
            }
            packet => WirePacket::Text(packet.into()),
        }
    }

    /// Decode a binary frame received on a binary capable transport.
    ///
    /// Protocol v3 clients prefix binary frames with the message type byte.
    pub fn decode_binary(mut data: Bytes, v3: bool) -> Result<Packet, PacketParseError> {
        if v3 {
            match data.first() {
                Some(0x04) => Ok(Packet::BinaryV3(data.split_off(1))),
                c => Err(PacketParseError::InvalidPacketType(c.map(|c| *c as char))),
            }
        } else {
            Ok(Packet::Binary(data))
        }
    }
}

impl From<Packet> for String {
    fn from(packet: Packet) -> String {
        let mut buffer = String::with_capacity(packet.size_hint(true));
        match packet {
            Packet::Open(open) => {
                buffer.push('0');
                open.write_json(&mut buffer);
            }
            Packet::Close => buffer.push('1'),
            Packet::Ping => buffer.push('2'),
            Packet::Pong => buffer.push('3'),
            Packet::PingUpgrade => buffer.push_str("2probe"),
            Packet::PongUpgrade => buffer.push_str("3probe"),
            Packet::Message(msg) => {
                buffer.push('4');
                buffer.push_str(&msg);
            }
            Packet::Upgrade => buffer.push('5'),
            Packet::Noop => buffer.push('6'),
            Packet::Binary(data) => {
                buffer.push('b');
                general_purpose::STANDARD.encode_string(data, &mut buffer);
            }
            Packet::BinaryV3(data) => {
                buffer.push_str("b4");
                general_purpose::STANDARD.encode_string(data, &mut buffer);
            }
        };
        buffer
    }
}

impl TryFrom<Str> for Packet {
    type Error = PacketParseError;
    fn try_from(value: Str) -> Result<Self, Self::Error> {
        let packet_type = value
            .as_bytes()
            .first()
            .ok_or(PacketParseError::InvalidPacketType(None))?;
        let is_probe = value.as_bytes().get(1..) == Some(b"probe".as_slice());
        let packet = match packet_type {
            b'0' => Packet::Open(serde_json::from_str(&value[1..])?),
            b'1' => Packet::Close,
            b'2' if is_probe => Packet::PingUpgrade,
            b'2' => Packet::Ping,
            b'3' if is_probe => Packet::PongUpgrade,
            b'3' => Packet::Pong,
            b'4' => Packet::Message(value.slice(1..)),
            b'5' => Packet::Upgrade,
            b'6' => Packet::Noop,
            b'b' if value.as_bytes().get(1) == Some(&b'4') => {
                Packet::BinaryV3(general_purpose::STANDARD.decode(&value[2..])?.into())
            }
            b'b' => Packet::Binary(general_purpose::STANDARD.decode(&value[1..])?.into()),
            c => return Err(PacketParseError::InvalidPacketType(Some(*c as char))),
        };
        Ok(packet)
    }
}
impl TryFrom<String> for Packet {
    type Error = PacketParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Packet::try_from(Str::from(value))
    }
}
impl TryFrom<&str> for Packet {
    type Error = PacketParseError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Packet::try_from(Str::from(value.to_owned()))
    }
}

/// The handshake data sent in the [`Packet::Open`] packet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    /// The session id
    pub sid: Sid,
    /// The transports the client may upgrade to
    pub upgrades: Vec<String>,
    /// Heartbeat interval in milliseconds
    pub ping_interval: u64,
    /// Heartbeat timeout in milliseconds
    pub ping_timeout: u64,
    /// The maximum number of bytes per payload
    pub max_payload: u64,
}

impl OpenPacket {
    fn size_hint(&self) -> usize {
        // {"sid":"","upgrades":[],"pingInterval":,"pingTimeout":,"maxPayload":}
        const PUNCTUATION: usize = 69;
        PUNCTUATION
            + 16
            + self.upgrades.iter().map(|u| u.len() + 3).sum::<usize>()
            + 3 * 20
    }

    /// Session ids and transport names never need escaping,
    /// so the json is written by hand.
    fn write_json(&self, buffer: &mut String) {
        let mut itoa = itoa::Buffer::new();
        buffer.push_str("{\"sid\":\"");
        buffer.push_str(self.sid.as_str());
        buffer.push_str("\",\"upgrades\":[");
        for (i, upgrade) in self.upgrades.iter().enumerate() {
            if i > 0 {
                buffer.push(',');
            }
            buffer.push('"');
            buffer.push_str(upgrade);
            buffer.push('"');
        }
        buffer.push_str("],\"pingInterval\":");
        buffer.push_str(itoa.format(self.ping_interval));
        buffer.push_str(",\"pingTimeout\":");
        buffer.push_str(itoa.format(self.ping_timeout));
        buffer.push_str(",\"maxPayload\":");
        buffer.push_str(itoa.format(self.max_payload));
        buffer.push('}');
    }
}

/// Packets sent together. Buffering them guarantees they are written
/// atomically to the transport.
pub type PacketBuf = SmallVec<[Packet; 2]>;
