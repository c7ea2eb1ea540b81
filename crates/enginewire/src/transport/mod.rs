//! Transports carrying the sessions.
//!
//! * [`polling`]: http long-polling, the only transport that may be upgraded.
//! * [`ws`]: websocket.
//! * [`webtransport`]: a datagram duplex stream with length-prefixed frames.
//!
//! Stream transports share the same pipeline: a task writes the session queue to the
//! transport while the connection task reads packets and forwards them to the handler.

use std::{ops::ControlFlow, sync::Arc};

use enginewire_core::{OpenPacket, Packet};
use futures_util::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use tokio::task::JoinHandle;

use crate::{
    ProtocolVersion, Sid, TransportType,
    config::EngineIoConfig,
    engine::EngineIo,
    errors::Error,
    handler::EngineIoHandler,
    socket::{DisconnectReason, Socket},
};

pub mod polling;
pub mod webtransport;
pub mod ws;

/// The handshake packet for a session opened on `transport`
pub(crate) fn make_open_packet(transport: TransportType, id: Sid, config: &EngineIoConfig) -> OpenPacket {
    OpenPacket {
        sid: id,
        upgrades: config.upgrades(transport),
        ping_timeout: config.ping_timeout.as_millis() as u64,
        ping_interval: config.ping_interval.as_millis() as u64,
        max_payload: config.max_payload,
    }
}

/// Handle a packet received from the client, whatever the transport.
///
/// Returns [`ControlFlow::Break`] once the session is closed.
pub(crate) fn on_packet<H: EngineIoHandler>(
    engine: &EngineIo<H>,
    socket: &Arc<Socket<H::Data>>,
    packet: Packet,
) -> Result<ControlFlow<()>, Error> {
    match packet {
        Packet::Close => {
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?socket.id, "closing session");
            if socket.is_http() {
                // release a pending poll request
                socket.send(Packet::Noop).ok();
            }
            engine.close_session(socket.id, DisconnectReason::TransportClose);
            return Ok(ControlFlow::Break(()));
        }
        Packet::Pong if socket.protocol == ProtocolVersion::V4 => socket.on_heartbeat(),
        Packet::Ping if socket.protocol == ProtocolVersion::V3 => socket.on_heartbeat(),
        Packet::Ping | Packet::Pong => return Err(Error::InvalidHeartbeatDirection),
        Packet::Message(msg) => engine.handler.on_message(msg, socket.clone()),
        Packet::Binary(data) | Packet::BinaryV3(data) => {
            engine.handler.on_binary(data, socket.clone())
        }
        p => return Err(Error::BadPacket(p)),
    }
    Ok(ControlFlow::Continue(()))
}

/// Run an open session on a stream transport until the client leaves
/// or a transport error occurs. The session is closed on return.
pub(crate) async fn serve<H, Tx, Rx>(
    engine: Arc<EngineIo<H>>,
    socket: Arc<Socket<H::Data>>,
    tx: Tx,
    rx: Rx,
) where
    H: EngineIoHandler,
    Tx: Sink<Packet, Error = Error> + Unpin + Send + 'static,
    Rx: Stream<Item = Result<Packet, Error>> + Unpin,
{
    let tx_handle = forward_to_socket(socket.clone(), tx);

    match forward_to_handler(&engine, rx, &socket).await {
        Ok(()) => engine.close_session(socket.id, DisconnectReason::TransportClose),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?socket.id, "error when handling packet: {:?}", e);
            let reason: Option<DisconnectReason> = (&e).into();
            engine.close_session(socket.id, reason.unwrap_or(DisconnectReason::TransportError));
        }
    }
    tx_handle.abort();
}

/// Forward every packet received from the transport to the handler
async fn forward_to_handler<H, Rx>(
    engine: &EngineIo<H>,
    mut rx: Rx,
    socket: &Arc<Socket<H::Data>>,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    Rx: Stream<Item = Result<Packet, Error>> + Unpin,
{
    while let Some(packet) = rx.try_next().await? {
        if on_packet(engine, socket, packet)?.is_break() {
            break;
        }
    }
    Ok(())
}

/// Write a packet to the transport. Returns false once the close packet is written.
async fn write_packet<Tx>(tx: &mut Tx, packet: Packet) -> bool
where
    Tx: Sink<Packet, Error = Error> + Unpin,
{
    match packet {
        // Noop packets left by an upgrade are meaningless here
        Packet::Noop => true,
        Packet::Close => {
            tx.send(Packet::Close).await.ok();
            false
        }
        packet => {
            if let Err(_e) = tx.feed(packet).await {
                #[cfg(feature = "tracing")]
                tracing::debug!("error sending packet: {}", _e);
            }
            true
        }
    }
}

/// Write the session queue to the transport.
///
/// The transport is flushed only once the queue is drained.
fn forward_to_socket<D, Tx>(socket: Arc<Socket<D>>, mut tx: Tx) -> JoinHandle<()>
where
    D: Default + Send + Sync + 'static,
    Tx: Sink<Packet, Error = Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut internal_rx = socket.internal_rx.lock().await;

        'queue: while let Some(packets) = internal_rx.recv().await {
            for packet in packets {
                if !write_packet(&mut tx, packet).await {
                    break 'queue;
                }
            }
            while let Ok(packets) = internal_rx.try_recv() {
                for packet in packets {
                    if !write_packet(&mut tx, packet).await {
                        break 'queue;
                    }
                }
            }
            tx.flush().await.ok();
        }
        internal_rx.close();
    })
}

/// Probe a new transport for a session opened with http polling.
///
/// ```text
/// CLIENT                                     SERVER
///   │  2probe (on the new transport)           │
///   │ ───────────────────────────────────────► │
///   │                                3probe    │
///   │ ◄─────────────────────────────────────── │
///   │                   6 (on the pending poll)│
///   │ ◄─────────────────────────────────────── │
///   │  5                                       │
///   │ ───────────────────────────────────────► │
/// ```
///
/// The session keeps its packet queue, so nothing is lost or reordered.
/// On failure the session stays on polling.
pub(crate) async fn upgrade_handshake<D, Tx, Rx>(
    socket: &Arc<Socket<D>>,
    tx: &mut Tx,
    rx: &mut Rx,
    config: &EngineIoConfig,
    transport: TransportType,
) -> Result<(), Error>
where
    D: Default + Send + Sync + 'static,
    Tx: Sink<Packet, Error = Error> + Unpin,
    Rx: Stream<Item = Result<Packet, Error>> + Unpin,
{
    if !socket.start_upgrade() {
        return Err(Error::Upgrade);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(sid = ?socket.id, ?transport, "upgrade started");

    let probe = tokio::time::timeout(config.upgrade_timeout, probe(socket, tx, rx))
        .await
        .unwrap_or(Err(Error::UpgradeTimeout));
    if let Err(e) = probe {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?socket.id, "upgrade failed: {e}");
        socket.cancel_upgrade();
        return Err(e);
    }

    // wait for the pending poll request to release the queue
    let _rx = socket.internal_rx.lock().await;
    socket.finish_upgrade(transport);

    #[cfg(feature = "tracing")]
    tracing::debug!(sid = ?socket.id, ?transport, "upgrade done");
    Ok(())
}

async fn probe<D, Tx, Rx>(socket: &Socket<D>, tx: &mut Tx, rx: &mut Rx) -> Result<(), Error>
where
    D: Default + Send + Sync + 'static,
    Tx: Sink<Packet, Error = Error> + Unpin,
    Rx: Stream<Item = Result<Packet, Error>> + Unpin,
{
    match rx.next().await.ok_or(Error::Upgrade)?? {
        Packet::PingUpgrade => tx.send(Packet::PongUpgrade).await?,
        p => return Err(Error::BadPacket(p)),
    }

    socket.send(Packet::Noop).map_err(|_| Error::Upgrade)?;

    match rx.next().await.ok_or(Error::Upgrade)?? {
        Packet::Upgrade => Ok(()),
        p => Err(Error::BadPacket(p)),
    }
}
