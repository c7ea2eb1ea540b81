//! The webtransport transport runs over any bidirectional byte stream
//! with length-prefixed frames (see [`FrameCodec`]).
//!
//! The first frame is an open packet:
//! * `0` creates a session and is answered with the handshake packet,
//! * `0{"sid":"..."}` probes an existing polling session to upgrade it.

use std::sync::Arc;

use enginewire_core::{
    Packet, PacketParseError,
    stream::{Frame, FrameCodec, FrameError},
};
use futures_util::{SinkExt, StreamExt};
use http::request::Parts;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    DisconnectReason, ProtocolVersion, Sid, TransportType,
    engine::EngineIo,
    errors::Error,
    handler::EngineIoHandler,
    transport::{make_open_packet, serve, upgrade_handshake, ws::check_upgrade},
};

#[derive(Debug, Deserialize)]
struct UpgradeHandshake {
    sid: Sid,
}

/// Read the session id of the first frame, if any
fn parse_handshake(frame: Frame) -> Result<Option<Sid>, Error> {
    let Frame::Text(data) = frame else {
        return Err(Error::BadRequest);
    };
    match data.strip_prefix('0') {
        Some("") => Ok(None),
        Some(json) => {
            let handshake: UpgradeHandshake =
                serde_json::from_str(json).map_err(PacketParseError::from)?;
            Ok(Some(handshake.sid))
        }
        None => Err(Error::BadRequest),
    }
}

fn frame_to_packet(frame: Result<Frame, FrameError>) -> Result<Packet, Error> {
    match frame? {
        Frame::Text(data) => Ok(Packet::try_from(data)?),
        Frame::Binary(data) => Ok(Packet::Binary(data)),
    }
}

/// Run a webtransport stream until it is closed.
///
/// The client has `upgrade_timeout` to send the open packet.
pub(crate) async fn on_init<H, S>(
    engine: Arc<EngineIo<H>>,
    conn: S,
    req_parts: Parts,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(conn, FrameCodec::new(engine.config.max_payload));
    let (tx, mut frames) = framed.split::<Packet>();
    let mut tx = tx.sink_map_err(Error::from);

    let first = tokio::time::timeout(engine.config.upgrade_timeout, frames.next())
        .await
        .map_err(|_| Error::UpgradeTimeout)?
        .ok_or(Error::BadRequest)??;
    let sid = parse_handshake(first)?;
    let mut rx = frames.map(frame_to_packet);

    let socket = match sid {
        Some(sid) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "webtransport upgrade");

            let upgrade = match check_upgrade(&engine, sid) {
                Ok(()) => engine.get_socket(sid).ok_or(Error::UnknownSessionID(sid)),
                Err(e) => Err(e),
            };
            let res = match upgrade {
                Ok(socket) => upgrade_handshake(
                    &socket,
                    &mut tx,
                    &mut rx,
                    &engine.config,
                    TransportType::WebTransport,
                )
                .await
                .map(|_| socket),
                Err(e) => Err(e),
            };
            match res {
                Ok(socket) => socket,
                Err(e) => {
                    tx.send(Packet::Close).await.ok();
                    return Err(e);
                }
            }
        }
        None => {
            let socket = engine.create_session(
                ProtocolVersion::V4,
                TransportType::WebTransport,
                req_parts,
                true,
            );
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?socket.id, "new webtransport connection");

            let open = make_open_packet(TransportType::WebTransport, socket.id, &engine.config);
            if let Err(e) = tx.send(Packet::Open(open)).await {
                engine.close_session(socket.id, DisconnectReason::TransportError);
                return Err(e);
            }
            socket.set_open();
            socket
                .clone()
                .spawn_heartbeat(engine.config.ping_interval, engine.config.ping_timeout);
            socket
        }
    };

    serve(engine, socket, tx, rx).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_frames() {
        assert_eq!(parse_handshake(Frame::Text("0".into())).unwrap(), None);
        let sid = parse_handshake(Frame::Text(r#"0{"sid":"AAAAAAAAAAAAAAAA"}"#.into())).unwrap();
        assert_eq!(sid, Some(Sid::ZERO));
        assert!(matches!(
            parse_handshake(Frame::Text("4hello".into())),
            Err(Error::BadRequest)
        ));
        assert!(matches!(
            parse_handshake(Frame::Binary(bytes::Bytes::from_static(b"0"))),
            Err(Error::BadRequest)
        ));
        assert!(matches!(
            parse_handshake(Frame::Text("0{".into())),
            Err(Error::PacketParse(_))
        ));
    }
}
