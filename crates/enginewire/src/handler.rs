//! ## The [`EngineIoHandler`] receives the events of every session
//!
//! ```
//! # use bytes::Bytes;
//! # use enginewire::{handler::EngineIoHandler, Socket, DisconnectReason, Str};
//! # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! #[derive(Debug, Default)]
//! struct Counter {
//!     clients: AtomicUsize,
//! }
//!
//! impl EngineIoHandler for Counter {
//!     type Data = ();
//!
//!     fn on_connect(self: Arc<Self>, socket: Arc<Socket<()>>) {
//!         self.clients.fetch_add(1, Ordering::Relaxed);
//!     }
//!     fn on_disconnect(&self, socket: Arc<Socket<()>>, reason: DisconnectReason) {
//!         self.clients.fetch_sub(1, Ordering::Relaxed);
//!     }
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
//!         socket.emit(msg).ok();
//!     }
//!     fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) { }
//! }
//! ```
use std::sync::Arc;

use bytes::Bytes;

use crate::{
    Str,
    socket::{DisconnectReason, Socket},
};

/// Callbacks called by the engine for each session.
///
/// They are called from the transport tasks, so they should not block.
pub trait EngineIoHandler: std::fmt::Debug + Send + Sync + 'static {
    /// Data attached to each session
    type Data: Default + Send + Sync + 'static;

    /// Called once the session is registered, before the handshake is written
    fn on_connect(self: Arc<Self>, socket: Arc<Socket<Self::Data>>);

    /// Called exactly once when the session is closed
    fn on_disconnect(&self, socket: Arc<Socket<Self::Data>>, reason: DisconnectReason);

    /// Called for every text message
    fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<Self::Data>>);

    /// Called for every binary message
    fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<Self::Data>>);
}
