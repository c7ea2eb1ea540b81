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
//! Core types of the enginewire transport layer.
//!
//! This crate holds everything that does not need a runtime:
//! * the [`Packet`] model with its text representation,
//! * the http long-polling [`payload`] codecs for both protocol versions,
//! * the length-prefixed [`stream`] codec used by stream based transports,
//! * session ids ([`Sid`]), [`ProtocolVersion`] and [`TransportType`].

pub use packet::{OpenPacket, Packet, PacketBuf, PacketParseError, WirePacket};
pub use protocol::{ProtocolVersion, TransportType, UnknownProtocolVersionError, UnknownTransportError};
pub use sid::{Sid, SidDecodeError};
pub use str::Str;

pub mod payload;
pub mod stream;

mod packet;
mod protocol;
mod sid;
mod str;
