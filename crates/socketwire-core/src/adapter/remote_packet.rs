//! The messages exchanged by cluster adapters.
//!
//! Every message carries the id of the server that sent it and the namespace it targets.
//! The message type is serialized as a single byte.
use serde::{Deserialize, Serialize};

use super::{BroadcastOptions, RemoteSocketData, Room};
use crate::{Sid, Str, Uid, Value, packet::Packet};

/// The type code of a cluster message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// A server joined the cluster
    InitialHeartbeat = 1,
    /// A server is still alive
    Heartbeat = 2,
    /// Broadcast a packet, with or without acks
    Broadcast = 3,
    /// Add the matching sockets to rooms
    SocketsJoin = 4,
    /// Remove the matching sockets from rooms
    SocketsLeave = 5,
    /// Disconnect the matching sockets
    DisconnectSockets = 6,
    /// Describe the matching sockets
    FetchSockets = 7,
    /// The answer to [`MessageType::FetchSockets`]
    FetchSocketsResponse = 8,
    /// Call the server side handlers of an event
    ServerSideEmit = 9,
    /// The answer of a server side handler
    ServerSideEmitResponse = 10,
    /// The number of sockets reached by a broadcast with acks
    BroadcastClientCount = 11,
    /// The ack of a socket reached by a broadcast
    BroadcastAck = 12,
    /// A server left the cluster
    AdapterClose = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, u8> {
        use MessageType::*;
        Ok(match value {
            1 => InitialHeartbeat,
            2 => Heartbeat,
            3 => Broadcast,
            4 => SocketsJoin,
            5 => SocketsLeave,
            6 => DisconnectSockets,
            7 => FetchSockets,
            8 => FetchSocketsResponse,
            9 => ServerSideEmit,
            10 => ServerSideEmitResponse,
            11 => BroadcastClientCount,
            12 => BroadcastAck,
            13 => AdapterClose,
            v => return Err(v),
        })
    }
}

/// The payload of a cluster message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    /// A server joined the cluster. The others answer with a heartbeat.
    InitialHeartbeat,
    /// A server is still alive
    Heartbeat,
    /// Broadcast a packet. With a request id, the acks are sent back.
    Broadcast {
        /// The broadcast target
        opts: BroadcastOptions,
        /// The packet to send
        packet: Packet,
        /// Set when acks are expected
        request_id: Option<Sid>,
    },
    /// Add the matching sockets to rooms
    SocketsJoin {
        /// The sockets to update
        opts: BroadcastOptions,
        /// The rooms to join
        rooms: Vec<Room>,
    },
    /// Remove the matching sockets from rooms
    SocketsLeave {
        /// The sockets to update
        opts: BroadcastOptions,
        /// The rooms to leave
        rooms: Vec<Room>,
    },
    /// Disconnect the matching sockets
    DisconnectSockets {
        /// The sockets to disconnect
        opts: BroadcastOptions,
    },
    /// Describe the matching sockets
    FetchSockets {
        /// The sockets to describe
        opts: BroadcastOptions,
        /// The request id
        request_id: Sid,
    },
    /// The sockets matching a [`MessageData::FetchSockets`] request
    FetchSocketsResponse {
        /// The request id
        request_id: Sid,
        /// The matching sockets of the server
        sockets: Vec<RemoteSocketData>,
    },
    /// Call the server side handlers of an event.
    /// With a request id, each server answers once.
    ServerSideEmit {
        /// Set when answers are expected
        request_id: Option<Sid>,
        /// The event name
        event: Str,
        /// The event arguments
        args: Vec<Value>,
    },
    /// The answer of a server to a [`MessageData::ServerSideEmit`]
    ServerSideEmitResponse {
        /// The request id
        request_id: Sid,
        /// The response arguments
        response: Vec<Value>,
    },
    /// The number of sockets a server reached for a broadcast with acks
    BroadcastClientCount {
        /// The request id
        request_id: Sid,
        /// The number of acks to expect from this server
        client_count: u32,
    },
    /// The ack of a socket for a broadcast
    BroadcastAck {
        /// The request id
        request_id: Sid,
        /// The socket that answered
        sid: Sid,
        /// The ack arguments
        response: Vec<Value>,
    },
    /// A server left the cluster
    AdapterClose,
}

impl MessageData {
    /// The type code of the message
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageData::InitialHeartbeat => MessageType::InitialHeartbeat,
            MessageData::Heartbeat => MessageType::Heartbeat,
            MessageData::Broadcast { .. } => MessageType::Broadcast,
            MessageData::SocketsJoin { .. } => MessageType::SocketsJoin,
            MessageData::SocketsLeave { .. } => MessageType::SocketsLeave,
            MessageData::DisconnectSockets { .. } => MessageType::DisconnectSockets,
            MessageData::FetchSockets { .. } => MessageType::FetchSockets,
            MessageData::FetchSocketsResponse { .. } => MessageType::FetchSocketsResponse,
            MessageData::ServerSideEmit { .. } => MessageType::ServerSideEmit,
            MessageData::ServerSideEmitResponse { .. } => MessageType::ServerSideEmitResponse,
            MessageData::BroadcastClientCount { .. } => MessageType::BroadcastClientCount,
            MessageData::BroadcastAck { .. } => MessageType::BroadcastAck,
            MessageData::AdapterClose => MessageType::AdapterClose,
        }
    }

    /// The request id of responses.
    pub fn response_id(&self) -> Option<Sid> {
        match self {
            MessageData::FetchSocketsResponse { request_id, .. }
            | MessageData::ServerSideEmitResponse { request_id, .. }
            | MessageData::BroadcastClientCount { request_id, .. }
            | MessageData::BroadcastAck { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Returns true if any value of the message holds binary data.
    pub fn has_binary(&self) -> bool {
        match self {
            MessageData::Broadcast { packet, .. } => packet.inner.count_binary() > 0,
            MessageData::ServerSideEmit { args: values, .. }
            | MessageData::ServerSideEmitResponse {
                response: values, ..
            }
            | MessageData::BroadcastAck {
                response: values, ..
            } => values.iter().any(Value::has_binary),
            MessageData::FetchSocketsResponse { sockets, .. } => {
                sockets.iter().any(|s| s.auth.has_binary())
            }
            _ => false,
        }
    }
}

/// A message exchanged between the servers of a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMessage {
    /// The id of the sending server
    pub uid: Uid,
    /// The namespace path
    pub nsp: Str,
    /// The payload
    pub data: MessageData,
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    uid: Uid,
    nsp: Str,
    r#type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opts: Option<BroadcastOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    packet: Option<Packet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<Sid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rooms: Option<Vec<Room>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sockets: Option<Vec<RemoteSocketData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<Str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<Sid>,
}

impl Serialize for ClusterMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut raw = RawMessage {
            uid: self.uid,
            nsp: self.nsp.clone(),
            r#type: self.data.message_type() as u8,
            opts: None,
            packet: None,
            request_id: None,
            rooms: None,
            sockets: None,
            event: None,
            args: None,
            client_count: None,
            sid: None,
        };
        match self.data.clone() {
            MessageData::InitialHeartbeat | MessageData::Heartbeat | MessageData::AdapterClose => {}
            MessageData::Broadcast {
                opts,
                packet,
                request_id,
            } => {
                raw.opts = Some(opts);
                raw.packet = Some(packet);
                raw.request_id = request_id;
            }
            MessageData::SocketsJoin { opts, rooms } | MessageData::SocketsLeave { opts, rooms } => {
                raw.opts = Some(opts);
                raw.rooms = Some(rooms);
            }
            MessageData::DisconnectSockets { opts } => raw.opts = Some(opts),
            MessageData::FetchSockets { opts, request_id } => {
                raw.opts = Some(opts);
                raw.request_id = Some(request_id);
            }
            MessageData::FetchSocketsResponse {
                request_id,
                sockets,
            } => {
                raw.request_id = Some(request_id);
                raw.sockets = Some(sockets);
            }
            MessageData::ServerSideEmit {
                request_id,
                event,
                args,
            } => {
                raw.request_id = request_id;
                raw.event = Some(event);
                raw.args = Some(args);
            }
            MessageData::ServerSideEmitResponse {
                request_id,
                response,
            } => {
                raw.request_id = Some(request_id);
                raw.args = Some(response);
            }
            MessageData::BroadcastClientCount {
                request_id,
                client_count,
            } => {
                raw.request_id = Some(request_id);
                raw.client_count = Some(client_count);
            }
            MessageData::BroadcastAck {
                request_id,
                sid,
                response,
            } => {
                raw.request_id = Some(request_id);
                raw.sid = Some(sid);
                raw.args = Some(response);
            }
        }
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClusterMessage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let raw = RawMessage::deserialize(deserializer)?;
        let missing = |field: &str| D::Error::custom(format!("missing field: {field}"));
        let r#type = MessageType::try_from(raw.r#type)
            .map_err(|t| D::Error::custom(format!("invalid message type {t}")))?;
        let opts = raw.opts.ok_or_else(|| missing("opts"));
        let request_id = raw.request_id.ok_or_else(|| missing("request_id"));
        let rooms = raw.rooms.ok_or_else(|| missing("rooms"));
        let args = raw.args.ok_or_else(|| missing("args"));

        let data = match r#type {
            MessageType::InitialHeartbeat => MessageData::InitialHeartbeat,
            MessageType::Heartbeat => MessageData::Heartbeat,
            MessageType::AdapterClose => MessageData::AdapterClose,
            MessageType::Broadcast => MessageData::Broadcast {
                opts: opts?,
                packet: raw.packet.ok_or_else(|| missing("packet"))?,
                request_id: raw.request_id,
            },
            MessageType::SocketsJoin => MessageData::SocketsJoin {
                opts: opts?,
                rooms: rooms?,
            },
            MessageType::SocketsLeave => MessageData::SocketsLeave {
                opts: opts?,
                rooms: rooms?,
            },
            MessageType::DisconnectSockets => MessageData::DisconnectSockets { opts: opts? },
            MessageType::FetchSockets => MessageData::FetchSockets {
                opts: opts?,
                request_id: request_id?,
            },
            MessageType::FetchSocketsResponse => MessageData::FetchSocketsResponse {
                request_id: request_id?,
                sockets: raw.sockets.ok_or_else(|| missing("sockets"))?,
            },
            MessageType::ServerSideEmit => MessageData::ServerSideEmit {
                request_id: raw.request_id,
                event: raw.event.ok_or_else(|| missing("event"))?,
                args: args?,
            },
            MessageType::ServerSideEmitResponse => MessageData::ServerSideEmitResponse {
                request_id: request_id?,
                response: args?,
            },
            MessageType::BroadcastClientCount => MessageData::BroadcastClientCount {
                request_id: request_id?,
                client_count: raw.client_count.ok_or_else(|| missing("client_count"))?,
            },
            MessageType::BroadcastAck => MessageData::BroadcastAck {
                request_id: request_id?,
                sid: raw.sid.ok_or_else(|| missing("sid"))?,
                response: args?,
            },
        };
        Ok(ClusterMessage {
            uid: raw.uid,
            nsp: raw.nsp,
            data,
        })
    }
}
