use std::{convert::Infallible, sync::Arc};

use serde::Serialize;
use socketwire_core::{Value, packet::Packet, value::to_args};

use crate::{
    SocketIo,
    adapter::{Adapter, LocalAdapter},
    errors::{SendError, SocketError},
    handler::{AckRequest, FromConnectParts, FromDisconnectParts, FromMessageParts},
    socket::{DisconnectReason, Socket},
};

/// A reference to the [`Socket`] that received the event.
#[derive(Debug)]
pub struct SocketRef<A: Adapter = LocalAdapter>(Arc<Socket<A>>);

impl<A: Adapter> FromConnectParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_connect_parts(s: &Arc<Socket<A>>, _: &Option<Value>) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}
impl<A: Adapter> FromMessageParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        _: &mut Vec<Value>,
        _: &Option<AckRequest>,
    ) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}
impl<A: Adapter> FromDisconnectParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_disconnect_parts(s: &Arc<Socket<A>>, _: DisconnectReason) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}

impl<A: Adapter> std::ops::Deref for SocketRef<A> {
    type Target = Socket<A>;
    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<A: Adapter> PartialEq for SocketRef<A> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl<A: Adapter> From<Arc<Socket<A>>> for SocketRef<A> {
    #[inline(always)]
    fn from(socket: Arc<Socket<A>>) -> Self {
        Self(socket)
    }
}
impl<A: Adapter> Clone for SocketRef<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Adapter> SocketRef<A> {
    /// Disconnect the socket from its namespace, see [`Socket::disconnect`].
    #[inline(always)]
    pub fn disconnect(self) -> Result<(), SocketError> {
        self.0.disconnect()
    }
}

/// Answers the ack of the current event. If the client did not ask for an ack,
/// or another handler of the event already answered it, sending does nothing.
#[derive(Debug)]
pub struct AckSender<A: Adapter = LocalAdapter> {
    socket: Arc<Socket<A>>,
    ack: Option<AckRequest>,
}

impl<A: Adapter> FromMessageParts<A> for AckSender<A> {
    type Error = Infallible;
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        _: &mut Vec<Value>,
        ack: &Option<AckRequest>,
    ) -> Result<Self, Infallible> {
        Ok(Self {
            socket: s.clone(),
            ack: ack.clone(),
        })
    }
}

impl<A: Adapter> AckSender<A> {
    /// Send the ack. The data follows the same rules as [`Socket::emit`]:
    /// a tuple is sent as several arguments.
    ///
    /// # Errors
    /// * [`SendError::Serialize`] if the data cannot be serialized. The ack is not consumed.
    /// * [`SendError::Socket`] if the socket is closed or its buffer is full.
    pub fn send<T: ?Sized + Serialize>(self, data: &T) -> Result<(), SendError> {
        let Some(ack) = self.ack else {
            return Ok(());
        };
        let args = to_args(data)?;
        if !ack.claim() {
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?self.socket.id, "ack {} already sent", ack.id());
            return Ok(());
        }
        let packet = Packet::ack(self.socket.ns.path.clone(), args, ack.id());
        self.socket.send(packet)?;
        Ok(())
    }
}

macro_rules! impl_socket_extractor {
    ($ty:ty, |$s:ident| $body:expr) => {
        impl<A: Adapter> FromConnectParts<A> for $ty {
            type Error = Infallible;
            fn from_connect_parts($s: &Arc<Socket<A>>, _: &Option<Value>) -> Result<Self, Infallible> {
                Ok($body)
            }
        }
        impl<A: Adapter> FromMessageParts<A> for $ty {
            type Error = Infallible;
            fn from_message_parts(
                $s: &Arc<Socket<A>>,
                _: &mut Vec<Value>,
                _: &Option<AckRequest>,
            ) -> Result<Self, Infallible> {
                Ok($body)
            }
        }
        impl<A: Adapter> FromDisconnectParts<A> for $ty {
            type Error = Infallible;
            fn from_disconnect_parts($s: &Arc<Socket<A>>, _: DisconnectReason) -> Result<Self, Infallible> {
                Ok($body)
            }
        }
    };
}

impl_socket_extractor!(crate::ProtocolVersion, |s| s.protocol());
impl_socket_extractor!(crate::TransportType, |s| s.transport_type());

impl<A: Adapter> FromDisconnectParts<A> for DisconnectReason {
    type Error = Infallible;
    fn from_disconnect_parts(
        _: &Arc<Socket<A>>,
        reason: DisconnectReason,
    ) -> Result<Self, Infallible> {
        Ok(reason)
    }
}

/// The socket is not bound to a server yet. It only happens to sockets
/// created by hand, outside of a running server.
#[derive(Debug, thiserror::Error)]
#[error("socket is not bound to a server")]
pub struct NotBound;

fn get_io<A: Adapter>(s: &Socket<A>) -> Result<SocketIo<A>, NotBound> {
    s.get_io().cloned().ok_or(NotBound)
}

impl<A: Adapter> FromConnectParts<A> for SocketIo<A> {
    type Error = NotBound;
    fn from_connect_parts(s: &Arc<Socket<A>>, _: &Option<Value>) -> Result<Self, NotBound> {
        get_io(s)
    }
}
impl<A: Adapter> FromMessageParts<A> for SocketIo<A> {
    type Error = NotBound;
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        _: &mut Vec<Value>,
        _: &Option<AckRequest>,
    ) -> Result<Self, NotBound> {
        get_io(s)
    }
}
impl<A: Adapter> FromDisconnectParts<A> for SocketIo<A> {
    type Error = NotBound;
    fn from_disconnect_parts(s: &Arc<Socket<A>>, _: DisconnectReason) -> Result<Self, NotBound> {
        get_io(s)
    }
}

#[cfg(test)]
mod tests {
    use enginewire::Packet as EPacket;
    use socketwire_core::Sid;

    use super::*;
    use crate::ns::Namespace;

    #[tokio::test]
    async fn ack_sender_sends_once() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();
        let (esock, mut rx) = enginewire::Socket::<crate::client::SocketData<LocalAdapter>>::new_dummy(
            Sid::new(),
            Box::new(|_, _| {}),
        );
        let socket = Arc::new(Socket::new(ns.clone(), esock, None, None));
        socket.set_connected(true);
        drop(ns);

        let ack = Some(AckRequest::new(3));
        let first = AckSender::from_message_parts(&socket, &mut vec![], &ack).unwrap();
        let second = AckSender::from_message_parts(&socket, &mut vec![], &ack).unwrap();
        first.send(&("ok", 1)).unwrap();
        second.send(&"again").unwrap();

        let EPacket::Message(msg) = rx.recv().await.unwrap() else {
            panic!("expected a message packet");
        };
        assert_eq!(msg, "33[\"ok\",1]");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_sender_without_request() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();
        let ack = AckSender::from_message_parts(&socket, &mut vec![], &None).unwrap();
        ack.send(&"ignored").unwrap();
    }

    #[tokio::test]
    async fn unbound_socket() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();
        assert!(SocketIo::from_connect_parts(&socket, &None).is_err());
        let reason = DisconnectReason::from_disconnect_parts(&socket, DisconnectReason::HeartbeatTimeout);
        assert_eq!(reason.unwrap(), DisconnectReason::HeartbeatTimeout);
    }
}
