use enginewire::{DisconnectReason as EngineDisconnectReason, Sid};
use tokio::time::error::Elapsed;

pub use matchit::InsertError as NsInsertError;
pub use socketwire_core::adapter::BroadcastError;
pub use socketwire_core::errors::{AdapterError, DisconnectError, ServerSideEmitError, SocketError};
pub use socketwire_core::parser::ParseError;
pub use socketwire_core::value::ValueError;

/// Errors raised while dispatching an incoming packet
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid packet type")]
    InvalidPacketType,

    #[error("invalid namespace")]
    InvalidNamespace,

    #[error("cannot find socket {0}")]
    SocketGone(Sid),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// The reasons why a socket could not join a namespace.
#[derive(thiserror::Error, Debug)]
pub enum ConnectFail {
    /// A namespace middleware refused the connection
    #[error("connection refused: {0}")]
    Rejected(String),

    /// No namespace matches the requested path
    #[error("invalid namespace")]
    InvalidNamespace,

    /// The connect packet could not be written to the engine socket
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    /// The adapter failed to register the socket
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Error of an acknowledgement.
#[derive(thiserror::Error, Debug)]
pub enum AckError {
    /// The ack arguments cannot be deserialized into the requested type
    #[error("cannot deserialize ack response: {0}")]
    Decode(#[from] ValueError),

    /// No ack was received in time
    #[error("ack timeout error")]
    Timeout,

    /// The packet could not be written to the engine socket
    #[error("error sending data through the engine socket: {0}")]
    Socket(#[from] SocketError),
}

impl From<Elapsed> for AckError {
    fn from(_: Elapsed) -> Self {
        Self::Timeout
    }
}

/// Error of an emit.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    /// The event name is reserved and cannot be emitted
    #[error("{0:?} is a reserved event name")]
    ReservedEvent(String),

    /// The data could not be serialized
    #[error("error serializing data: {0}")]
    Serialize(#[from] ValueError),

    /// The packet could not be written to the engine socket
    #[error("error sending data through the engine socket: {0}")]
    Socket(#[from] SocketError),

    /// Some recipients of a broadcast could not be reached
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
}

/// Error of an emit expecting acknowledgements.
#[derive(thiserror::Error, Debug)]
pub enum EmitWithAckError {
    /// The event name is reserved and cannot be emitted
    #[error("{0:?} is a reserved event name")]
    ReservedEvent(String),

    /// The data could not be serialized
    #[error("error serializing data: {0}")]
    Serialize(#[from] ValueError),

    /// The packet could not be written to the engine socket
    #[error("error sending data through the engine socket: {0}")]
    Socket(#[from] SocketError),

    /// The adapter could not forward the packet to the other servers
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

impl From<SendError> for EmitWithAckError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::ReservedEvent(e) => Self::ReservedEvent(e),
            SendError::Serialize(e) => Self::Serialize(e),
            SendError::Socket(e) => Self::Socket(e),
            SendError::Broadcast(BroadcastError::Adapter(e)) => Self::Adapter(e),
            SendError::Broadcast(_) => Self::Socket(SocketError::Closed),
        }
    }
}

/// Error of an action on a [`RemoteSocket`](crate::socket::RemoteSocket).
#[derive(thiserror::Error, Debug)]
pub enum RemoteActionError {
    /// The packet could not be written to the engine socket
    #[error("send error: {0}")]
    Socket(#[from] SendError),

    /// The adapter could not reach the server owning the socket
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The packet could not be delivered or the socket could not be disconnected
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
}

/// Error of an emit to the server side handlers of the other servers.
#[derive(thiserror::Error, Debug)]
pub enum ServerSideError {
    /// The data could not be serialized
    #[error("error serializing data: {0}")]
    Serialize(#[from] ValueError),

    /// The adapter failed or some servers did not answer in time
    #[error(transparent)]
    Emit(#[from] ServerSideEmitError),
}

impl From<AdapterError> for ServerSideError {
    fn from(err: AdapterError) -> Self {
        Self::Emit(ServerSideEmitError::Adapter(err))
    }
}

/// A dispatch error maps to the reason to close the engine socket, if it is fatal.
/// Errors that map to `None` keep the connection alive.
impl From<&Error> for Option<EngineDisconnectReason> {
    fn from(value: &Error) -> Self {
        use EngineDisconnectReason::*;
        match value {
            Error::InvalidPacketType => Some(PacketParsingError),
            Error::SocketGone(_) | Error::Adapter(_) | Error::InvalidNamespace => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_close_the_connection() {
        let reason: Option<EngineDisconnectReason> = (&Error::InvalidPacketType).into();
        assert_eq!(reason, Some(EngineDisconnectReason::PacketParsingError));
        let reason: Option<EngineDisconnectReason> = (&Error::InvalidNamespace).into();
        assert_eq!(reason, None);
    }

    #[test]
    fn reserved_event_message() {
        let err = SendError::ReservedEvent("disconnect".into());
        assert_eq!(err.to_string(), "\"disconnect\" is a reserved event name");
    }
}
