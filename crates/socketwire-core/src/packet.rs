//! The socket.io [`Packet`], carried inside engine message packets.
use serde::{Deserialize, Serialize};

use crate::{Sid, Str, Value};

/// A socket.io packet: some [`PacketData`] addressed to a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// The packet data
    pub inner: PacketData,
    /// The namespace path
    pub ns: Str,
}

impl Packet {
    /// Create a connect packet, with an optional payload.
    /// Clients send their auth data with it. The server answers with a [`ConnectPacket`].
    pub fn connect(ns: impl Into<Str>, value: Option<Value>) -> Self {
        Self {
            inner: PacketData::Connect(value),
            ns: ns.into(),
        }
    }

    /// Create a disconnect packet for a namespace
    pub fn disconnect(ns: impl Into<Str>) -> Self {
        Self {
            inner: PacketData::Disconnect,
            ns: ns.into(),
        }
    }

    /// Create a connect error packet with a `{ "message": .. }` payload.
    pub fn connect_error(ns: impl Into<Str>, message: impl Into<String>) -> Self {
        let mut obj = std::collections::BTreeMap::new();
        obj.insert("message".to_string(), Value::String(message.into()));
        Self {
            inner: PacketData::ConnectError(Value::Object(obj)),
            ns: ns.into(),
        }
    }

    /// Create an event packet. If one of the arguments holds binary data
    /// it becomes a binary event.
    pub fn event(ns: impl Into<Str>, event: impl Into<Str>, args: Vec<Value>) -> Self {
        let event = event.into();
        let inner = if args.iter().any(Value::has_binary) {
            PacketData::BinaryEvent(event, args, None)
        } else {
            PacketData::Event(event, args, None)
        };
        Self {
            inner,
            ns: ns.into(),
        }
    }

    /// Create an ack packet. If one of the arguments holds binary data
    /// it becomes a binary ack.
    pub fn ack(ns: impl Into<Str>, args: Vec<Value>, ack: i64) -> Self {
        let inner = if args.iter().any(Value::has_binary) {
            PacketData::BinaryAck(args, ack)
        } else {
            PacketData::EventAck(args, ack)
        };
        Self {
            inner,
            ns: ns.into(),
        }
    }
}

/// | Type          | ID  |
/// |---------------|-----|
/// | CONNECT       | 0   |
/// | DISCONNECT    | 1   |
/// | EVENT         | 2   |
/// | ACK           | 3   |
/// | CONNECT_ERROR | 4   |
/// | BINARY_EVENT  | 5   |
/// | BINARY_ACK    | 6   |
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    /// Connect to a namespace, with an optional payload
    Connect(Option<Value>),
    /// Disconnect from a namespace
    Disconnect,
    /// An event with its arguments and an optional ack id
    Event(Str, Vec<Value>, Option<i64>),
    /// The response to an event
    EventAck(Vec<Value>, i64),
    /// The namespace refused the connection
    ConnectError(Value),
    /// An event with binary attachments
    BinaryEvent(Str, Vec<Value>, Option<i64>),
    /// The response to an event, with binary attachments
    BinaryAck(Vec<Value>, i64),
}

impl PacketData {
    /// The packet type id
    pub fn index(&self) -> u8 {
        match self {
            PacketData::Connect(_) => 0,
            PacketData::Disconnect => 1,
            PacketData::Event(..) => 2,
            PacketData::EventAck(..) => 3,
            PacketData::ConnectError(_) => 4,
            PacketData::BinaryEvent(..) => 5,
            PacketData::BinaryAck(..) => 6,
        }
    }

    /// Set the ack id of an event. Other packets are left untouched.
    pub fn set_ack_id(&mut self, ack_id: i64) {
        if let PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) = self {
            *ack = Some(ack_id);
        }
    }

    /// Returns the ack id of an event or an ack
    pub fn ack_id(&self) -> Option<i64> {
        match self {
            PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) => *ack,
            PacketData::EventAck(_, ack) | PacketData::BinaryAck(_, ack) => Some(*ack),
            _ => None,
        }
    }

    /// Returns true for binary events and binary acks
    pub fn is_binary(&self) -> bool {
        matches!(self, PacketData::BinaryEvent(..) | PacketData::BinaryAck(..))
    }

    /// Counts the binary attachments of the packet
    pub fn count_binary(&self) -> usize {
        match self {
            PacketData::Event(_, args, _)
            | PacketData::BinaryEvent(_, args, _)
            | PacketData::EventAck(args, _)
            | PacketData::BinaryAck(args, _) => args.iter().map(Value::count_binary).sum(),
            PacketData::Connect(Some(v)) | PacketData::ConnectError(v) => v.count_binary(),
            PacketData::Connect(None) | PacketData::Disconnect => 0,
        }
    }
}

/// The payload of the connect packet sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectPacket {
    /// The socket id
    pub sid: Sid,
    /// The private session id, used to recover the session after a disconnection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<Sid>,
}

/// Packets are serialized as a flat record for cluster messages.
/// Events keep the `[event, ...args]` array layout of the text format.
impl Serialize for Packet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct RawPacket<'a> {
            ns: &'a Str,
            r#type: u8,
            #[serde(skip_serializing_if = "Option::is_none")]
            data: Option<Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            ack: Option<i64>,
        }
        let event_array = |event: &Str, args: &[Value]| {
            let mut data = Vec::with_capacity(args.len() + 1);
            data.push(Value::String(event.to_string()));
            data.extend_from_slice(args);
            Value::Array(data)
        };
        let data = match &self.inner {
            PacketData::Connect(v) => v.clone(),
            PacketData::Disconnect => None,
            PacketData::Event(e, args, _) | PacketData::BinaryEvent(e, args, _) => {
                Some(event_array(e, args))
            }
            PacketData::EventAck(args, _) | PacketData::BinaryAck(args, _) => {
                Some(Value::Array(args.clone()))
            }
            PacketData::ConnectError(v) => Some(v.clone()),
        };
        RawPacket {
            ns: &self.ns,
            r#type: self.inner.index(),
            data,
            ack: self.inner.ack_id(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Packet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        #[derive(Deserialize)]
        struct RawPacket {
            ns: Str,
            r#type: u8,
            data: Option<Value>,
            ack: Option<i64>,
        }
        let raw = RawPacket::deserialize(deserializer)?;
        let missing = |field: &str| D::Error::custom(format!("missing field: {field}"));
        let args = |data: Option<Value>| match data {
            Some(Value::Array(args)) => Ok(args),
            _ => Err(missing("data")),
        };
        let event = |data: Option<Value>| {
            let mut args = args(data)?.into_iter();
            match args.next() {
                Some(Value::String(event)) => Ok((Str::from(event), args.collect::<Vec<_>>())),
                _ => Err(D::Error::custom("invalid event name")),
            }
        };
        let inner = match raw.r#type {
            0 => PacketData::Connect(raw.data),
            1 => PacketData::Disconnect,
            2 => {
                let (e, args) = event(raw.data)?;
                PacketData::Event(e, args, raw.ack)
            }
            3 => PacketData::EventAck(args(raw.data)?, raw.ack.ok_or_else(|| missing("ack"))?),
            4 => PacketData::ConnectError(raw.data.ok_or_else(|| missing("data"))?),
            5 => {
                let (e, args) = event(raw.data)?;
                PacketData::BinaryEvent(e, args, raw.ack)
            }
            6 => PacketData::BinaryAck(args(raw.data)?, raw.ack.ok_or_else(|| missing("ack"))?),
            i => return Err(D::Error::custom(format!("invalid packet type {i}"))),
        };
        Ok(Self { inner, ns: raw.ns })
    }
}
