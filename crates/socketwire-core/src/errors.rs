//! Errors shared by the server and the adapters.
use std::{convert::Infallible, fmt};

use serde::{Deserialize, Serialize};

use crate::Value;

/// Error when writing to the underlying engine socket
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SocketError {
    /// The socket channel is full.
    /// The buffer size can be increased with the `max_buffer_size` engine option.
    #[error("internal channel full error")]
    InternalChannelFull,

    /// The socket is already closed
    #[error("socket closed")]
    Closed,
}

/// An opaque error returned by an adapter implementation.
#[derive(Debug, thiserror::Error)]
pub struct AdapterError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
impl From<Infallible> for AdapterError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Error when disconnecting sockets.
#[derive(Debug, thiserror::Error)]
pub enum DisconnectError {
    /// The socket channel is full.
    #[error("internal channel full error")]
    InternalChannelFull,

    /// An error occurred while forwarding the disconnection to other servers.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Error returned when emitting an event to the other servers and waiting for their answer.
#[derive(Debug, thiserror::Error)]
pub enum ServerSideEmitError {
    /// Some servers did not answer in time.
    /// The responses that arrived are still available.
    #[error("timeout reached: only {} responses received out of {expected}", .responses.len())]
    Timeout {
        /// The responses received before the timeout
        responses: Vec<Vec<Value>>,
        /// The number of responses that were expected
        expected: usize,
    },
    /// The adapter could not forward the event.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}
