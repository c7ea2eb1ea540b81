//! The websocket transport.
//!
//! [`new_req`] answers the http upgrade request and spawns the connection task.
//! A request without `sid` opens a new session, a request with `sid` probes
//! an existing polling session to upgrade it.

use std::{future, sync::Arc};

use enginewire_core::Packet;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderValue, Request, Response, StatusCode, header, request::Parts};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        self, Message, Utf8Bytes,
        handshake::derive_accept_key,
        protocol::{Role, WebSocketConfig},
    },
};

use crate::{
    DisconnectReason, ProtocolVersion, Sid, Str, TransportType,
    body::ResponseBody,
    config::EngineIoConfig,
    engine::EngineIo,
    errors::Error,
    handler::EngineIoHandler,
    transport::{make_open_packet, serve, upgrade_handshake},
};
use enginewire_core::WirePacket;

/// Create the `101 Switching Protocols` response
fn ws_response<B>(ws_key: &HeaderValue) -> Result<Response<ResponseBody<B>>, Error> {
    let derived = derive_accept_key(ws_key.as_bytes());
    let sec = HeaderValue::try_from(derived).map_err(|_| Error::InvalidWebSocketKey)?;
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, HeaderValue::from_static("websocket"))
        .header(header::CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(header::SEC_WEBSOCKET_ACCEPT, sec)
        .body(ResponseBody::empty_response())
        .map_err(Error::Http)
}

/// Check that an upgrade may start before switching protocols,
/// so invalid attempts get a proper http error.
pub(crate) fn check_upgrade<H: EngineIoHandler>(engine: &EngineIo<H>, sid: Sid) -> Result<(), Error> {
    let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionID(sid))?;
    if !engine.config.allow_upgrades || !socket.is_http() || socket.is_upgrading() {
        return Err(Error::Upgrade);
    }
    Ok(())
}

/// Answer a websocket upgrade request and spawn the connection task.
pub(crate) fn new_req<H, R, B>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    sid: Option<Sid>,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Send + 'static,
{
    let (parts, body) = req.into_parts();
    let ws_key = parts
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(Error::InvalidWebSocketKey)?
        .clone();
    if let Some(sid) = sid {
        check_upgrade(&engine, sid)?;
    }
    let req = Request::from_parts(parts.clone(), body);

    tokio::spawn(async move {
        let conn = match hyper::upgrade::on(req).await {
            Ok(conn) => hyper_util::rt::TokioIo::new(conn),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("ws upgrade error: {}", _e);
                return;
            }
        };
        if let Err(_e) = on_init(engine, conn, protocol, sid, parts).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("ws closed with error: {:?}", _e);
        }
    });

    ws_response(&ws_key)
}

fn ws_config(config: &EngineIoConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_payload as usize);
    ws_config.max_frame_size = Some(config.max_payload as usize);
    ws_config.read_buffer_size = config.ws_read_buffer_size;
    ws_config
}

/// Turn a websocket message into a packet. Control frames are skipped.
fn ws_message_to_packet(
    msg: Result<Message, tungstenite::Error>,
    v3: bool,
) -> Option<Result<Packet, Error>> {
    let packet = match msg {
        Ok(Message::Text(msg)) => Str::from_utf8(msg.into())
            .map_err(|e| Error::PacketParse(e.into()))
            .and_then(|msg| Ok(Packet::try_from(msg)?)),
        Ok(Message::Binary(data)) => Packet::decode_binary(data, v3).map_err(Error::from),
        Ok(Message::Close(_)) => Ok(Packet::Close),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => return None,
        Err(e) => Err(e.into()),
    };
    Some(packet)
}

fn packet_to_ws_message(packet: Packet) -> Message {
    match packet {
        Packet::Close => Message::Close(None),
        packet => match packet.encode(true) {
            WirePacket::Text(text) => Message::Text(Utf8Bytes::from(text)),
            WirePacket::Binary(data) => Message::Binary(data),
        },
    }
}

/// Run a websocket connection until it is closed.
///
/// Sends the handshake packet for a new session, or runs the upgrade probe for an existing one.
pub(crate) async fn on_init<H, S>(
    engine: Arc<EngineIo<H>>,
    conn: S,
    protocol: ProtocolVersion,
    sid: Option<Sid>,
    req_parts: Parts,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = WebSocketStream::from_raw_socket(conn, Role::Server, Some(ws_config(&engine.config))).await;
    let (tx, rx) = ws.split();
    let v3 = protocol == ProtocolVersion::V3;
    let mut tx = tx.with(|p: Packet| future::ready(Ok::<_, Error>(packet_to_ws_message(p))));
    let mut rx = rx.filter_map(move |msg| future::ready(ws_message_to_packet(msg, v3)));

    let socket = match sid {
        Some(sid) => {
            let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionID(sid))?;
            if let Err(e) = upgrade_handshake(
                &socket,
                &mut tx,
                &mut rx,
                &engine.config,
                TransportType::Websocket,
            )
            .await
            {
                tx.send(Packet::Close).await.ok();
                return Err(e);
            }
            socket
        }
        None => {
            let socket =
                engine.create_session(protocol, TransportType::Websocket, req_parts, true);
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?socket.id, "new websocket connection");

            let open = make_open_packet(TransportType::Websocket, socket.id, &engine.config);
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
