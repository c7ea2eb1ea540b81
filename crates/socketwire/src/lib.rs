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
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
//! Namespaces, rooms, broadcasts and acknowledgements on top of the `enginewire` transport.
//!
//! The server is a tower [`Service`](tower_service::Service) or [`Layer`](tower_layer::Layer)
//! built with [`SocketIo::builder`]. The [`SocketIo`] handle that comes with it registers the
//! namespaces and broadcasts from anywhere in the program.
//!
//! ```no_run
//! use socketwire::{SocketIo, extract::*};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Deserialize, Serialize)]
//! struct Message {
//!     room: String,
//!     text: String,
//! }
//!
//! let (svc, io) = SocketIo::new_svc();
//! io.ns("/", async |socket: SocketRef| {
//!     socket.on("join", async |socket: SocketRef, Data::<String>(room)| {
//!         socket.leave_all();
//!         socket.join(room);
//!     });
//!     socket.on("message", async |socket: SocketRef, Data::<Message>(msg), ack: AckSender| {
//!         socket.to(msg.room.clone()).emit("message", &msg).await.ok();
//!         ack.send(&"delivered").ok();
//!     });
//!     socket.on_disconnect(async |socket: SocketRef, reason: socketwire::socket::DisconnectReason| {
//!         println!("{} left: {reason}", socket.id);
//!     });
//! });
//! // Serve `svc` with hyper or any tower compatible server.
//! ```
//!
//! ## Handlers and extractors
//! Connect, message and disconnect handlers are async closures or functions. Their arguments
//! are extractors, see the [`extract`] module, and connect handlers accept middlewares,
//! see the [`handler`] module.
//!
//! ## Emitting
//! * [`Socket::emit`](socket::Socket::emit) sends an event to a single client and
//!   [`Socket::emit_with_ack`](socket::Socket::emit_with_ack) waits for its answer.
//! * Operators select sockets by room: `to`, `within`, `except`, `broadcast`, `local`.
//!   Their `emit_with_ack` returns an [`AckStream`](ack::AckStream) yielding every ack.
//!   See the [`operators`] module.
//! * Tuples are sent as several arguments and [`bytes::Bytes`] values as binary attachments.
//! * Reserved event names (`connect`, `connect_error`, `disconnect`, `disconnecting`,
//!   `newListener`, `removeListener`) are refused with [`SendError::ReservedEvent`].
//!
//! ## Per socket state
//! The [`extensions`] of a socket store typed values for the lifetime of the socket.
//!
//! ## Connection state recovery
//! With [`SocketIoBuilder::with_connection_state_recovery`], a client that reconnects soon
//! enough gets its rooms back and receives the packets it missed.
//!
//! ## Adapters
//! The [`LocalAdapter`](adapter::LocalAdapter) keeps the rooms in memory. The
//! `socketwire-cluster` crate shares them between servers.
//!
//! ## Feature flags
//! * `tracing`: log with [`tracing`](https://docs.rs/tracing).
pub mod ack;
pub mod adapter;
pub mod extensions;
pub mod extract;
pub mod handler;
pub mod layer;
pub mod operators;
pub mod service;
pub mod socket;

pub use enginewire::TransportType;
pub use errors::{
    AckError, AdapterError, BroadcastError, ConnectFail, DisconnectError, EmitWithAckError,
    NsInsertError, ParseError, RemoteActionError, SendError, ServerSideEmitError, ServerSideError,
    SocketError, ValueError,
};
pub use io::{SocketIo, SocketIoBuilder, SocketIoConfig};
pub use socketwire_core::{Sid, Str, Uid, Value};

mod client;
mod errors;
mod io;
mod ns;

/// The socket.io protocol version of a client.
///
/// It follows the engine version: engine v3 clients speak v4 and engine v4 clients speak v5.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Protocol 4, used by socket.io v2 clients
    V4 = 4,
    /// Protocol 5
    V5 = 5,
}

impl From<ProtocolVersion> for enginewire::ProtocolVersion {
    fn from(value: ProtocolVersion) -> Self {
        match value {
            ProtocolVersion::V4 => Self::V3,
            ProtocolVersion::V5 => Self::V4,
        }
    }
}
impl From<enginewire::ProtocolVersion> for ProtocolVersion {
    fn from(value: enginewire::ProtocolVersion) -> Self {
        match value {
            enginewire::ProtocolVersion::V3 => Self::V4,
            enginewire::ProtocolVersion::V4 => Self::V5,
        }
    }
}
