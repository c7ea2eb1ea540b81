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
    rust_2024_compatibility,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
//! Transport session layer served as a tower [`Service`](tower_service::Service).
//!
//! A client opens a session over http long-polling, websocket or webtransport
//! and may later upgrade it from polling to a better transport.
//! The engine runs the heartbeat, keeps a registry of live sessions and forwards
//! messages to an [`EngineIoHandler`](handler::EngineIoHandler).
//!
//! ```no_run
//! # use bytes::Bytes;
//! # use enginewire::{handler::EngineIoHandler, service::EngineIoService, Socket, DisconnectReason, Str};
//! # use std::sync::Arc;
//! #[derive(Debug)]
//! struct Echo;
//!
//! impl EngineIoHandler for Echo {
//!     type Data = ();
//!     fn on_connect(self: Arc<Self>, socket: Arc<Socket<()>>) { }
//!     fn on_disconnect(&self, socket: Arc<Socket<()>>, reason: DisconnectReason) { }
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
//!         socket.emit(msg).ok();
//!     }
//!     fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) {
//!         socket.emit_binary(data).ok();
//!     }
//! }
//!
//! let svc = EngineIoService::new(Arc::new(Echo));
//! ```

pub use enginewire_core::{Packet, ProtocolVersion, Sid, Str, TransportType};
pub use errors::Error;
pub use socket::{DisconnectReason, ReadyState, Socket};

pub mod body;
pub mod config;
pub mod handler;
pub mod layer;
pub mod middleware;
pub mod service;
pub mod socket;

mod engine;
mod errors;
mod peekable;
mod transport;
