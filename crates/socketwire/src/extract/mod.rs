//! Extractors for the [`ConnectHandler`], [`ConnectMiddleware`], [`MessageHandler`]
//! and [`DisconnectHandler`] arguments.
//!
//! * [`Data`]: deserializes the auth payload on connect, or the event arguments on a message.
//!   If it fails, the handler is not called.
//! * [`TryData`]: same as [`Data`] but hands the deserialization result to the handler.
//! * [`SocketRef`]: the [`Socket`](crate::socket::Socket) that received the event.
//! * [`SocketIo`](crate::SocketIo): the server handle.
//! * [`AckSender`]: answers the ack of the current event.
//! * [`ProtocolVersion`](crate::ProtocolVersion): the protocol version of the client.
//! * [`TransportType`](crate::TransportType): the current transport of the client.
//! * [`DisconnectReason`](crate::socket::DisconnectReason): why the socket left.
//! * [`Extension`] and [`MaybeExtension`]: a clone of a value stored in the socket extensions.
//! * [`HttpExtension`] and [`MaybeHttpExtension`]: a clone of an extension of the http request
//!   that opened the connection.
//!
//! Any type can be an extractor by implementing [`FromConnectParts`], [`FromMessageParts`] or
//! [`FromDisconnectParts`]. An extractor that keeps an `Arc<Socket>` must drop it once the
//! socket is disconnected, otherwise the socket is never freed.
//!
//! ```no_run
//! # use socketwire::{SocketIo, adapter::Adapter, handler::FromConnectParts, socket::Socket};
//! # use socketwire_core::Value;
//! # use std::sync::Arc;
//! struct UserId(String);
//!
//! #[derive(Debug)]
//! struct UserIdNotFound;
//! impl std::fmt::Display for UserIdNotFound {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("user id not found")
//!     }
//! }
//! impl std::error::Error for UserIdNotFound {}
//!
//! impl<A: Adapter> FromConnectParts<A> for UserId {
//!     type Error = UserIdNotFound;
//!     fn from_connect_parts(s: &Arc<Socket<A>>, _: &Option<Value>) -> Result<Self, Self::Error> {
//!         s.req_parts()
//!             .uri
//!             .query()
//!             .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("user=")))
//!             .map(|id| UserId(id.to_string()))
//!             .ok_or(UserIdNotFound)
//!     }
//! }
//!
//! let (_, io) = SocketIo::new_svc();
//! io.ns("/", async |UserId(id): UserId| println!("user {id} connected"));
//! ```
//!
//! [`ConnectHandler`]: crate::handler::ConnectHandler
//! [`ConnectMiddleware`]: crate::handler::ConnectMiddleware
//! [`MessageHandler`]: crate::handler::MessageHandler
//! [`DisconnectHandler`]: crate::handler::DisconnectHandler
//! [`FromConnectParts`]: crate::handler::FromConnectParts
//! [`FromMessageParts`]: crate::handler::FromMessageParts
//! [`FromDisconnectParts`]: crate::handler::FromDisconnectParts
mod data;
mod extensions;
mod socket;

pub use data::*;
pub use extensions::*;
pub use socket::*;

/// Implements `Deref` and `DerefMut` to the inner value of a tuple struct extractor.
macro_rules! impl_deref {
    ($ident:ident) => {
        impl<T> std::ops::Deref for $ident<T> {
            type Target = T;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<T> std::ops::DerefMut for $ident<T> {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
    ($ident:ident: $ty:ty) => {
        impl<T> std::ops::Deref for $ident<T> {
            type Target = $ty;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<T> std::ops::DerefMut for $ident<T> {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }
    };
}
pub(crate) use impl_deref;
