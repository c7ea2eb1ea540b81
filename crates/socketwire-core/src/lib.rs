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
//! Core types of the socketwire multiplexing layer.
//!
//! They are shared between the server, the parsers and the adapters:
//! * the socket.io [`packet`] model and the [`parser::Parse`] contract,
//! * the [`Value`] payload tree that can hold binary data,
//! * the [`adapter`] contract with the in-memory [`CoreLocalAdapter`](adapter::CoreLocalAdapter),
//! * a small local [`registry`] of typed listeners.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use enginewire_core::{Sid, Str};
pub use value::Value;

pub mod adapter;
pub mod errors;
pub mod packet;
pub mod parser;
pub mod registry;
pub mod value;

/// A unique identifier for a server instance, used by cluster adapters
/// to tag their messages and to ignore their own.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Uid(Sid);

impl Uid {
    /// A zeroed server id.
    pub const ZERO: Self = Self(Sid::ZERO);

    /// Generate a new random server id.
    pub fn new() -> Self {
        Self(Sid::new())
    }

    /// The string representation of the id.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}
impl FromStr for Uid {
    type Err = enginewire_core::SidDecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sid::from_str(s).map(Self)
    }
}
