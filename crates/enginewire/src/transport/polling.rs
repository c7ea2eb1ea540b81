//! The polling transport handles the handshake, poll and post requests
use std::sync::Arc;

use bytes::Bytes;
use enginewire_core::{
    Packet, PacketBuf,
    payload::{self, Payload, PayloadEncoder},
};
use http::{HeaderValue, Request, Response, StatusCode, header, request::Parts};
use http_body::Body;
use http_body_util::{BodyExt, Limited, LengthLimitError};
use smallvec::smallvec;
use tokio::sync::MutexGuard;

use crate::{
    ProtocolVersion, Sid, TransportType,
    body::ResponseBody,
    engine::EngineIo,
    errors::Error,
    handler::EngineIoHandler,
    peekable::PeekableReceiver,
    socket::DisconnectReason,
    transport::{make_open_packet, on_packet},
};

fn http_response<B>(data: impl Into<Bytes>, content_type: &'static str) -> Result<Response<ResponseBody<B>>, Error> {
    let body: Bytes = data.into();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
        .body(ResponseBody::custom_response(body))
        .map_err(Error::Http)
}

fn payload_response<B>(payload: Payload) -> Result<Response<ResponseBody<B>>, Error> {
    let content_type = payload.content_type();
    http_response(payload.data, content_type)
}

/// Create a polling session and answer with the handshake packet.
///
/// `supports_binary` is false when a v3 client asked for base64 payloads with `b64=1`.
pub(crate) fn open_req<H, B>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    parts: Parts,
    supports_binary: bool,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
{
    let socket = engine.create_session(protocol, TransportType::Polling, parts, supports_binary);
    let packet = make_open_packet(TransportType::Polling, socket.id, &engine.config);

    // v3 sessions get a length-prefixed handshake
    let mut encoder = PayloadEncoder::new(protocol, supports_binary, engine.config.max_payload);
    encoder.push([Packet::Open(packet)]);
    socket.set_open();
    socket
        .clone()
        .spawn_heartbeat(engine.config.ping_interval, engine.config.ping_timeout);

    payload_response(encoder.finish())
}

/// Add a batch to the payload. A close packet ends the session queue.
fn push_packets(
    encoder: &mut PayloadEncoder,
    rx: &mut MutexGuard<'_, PeekableReceiver<PacketBuf>>,
    packets: PacketBuf,
) -> bool {
    let close = packets.iter().any(|p| matches!(p, Packet::Close));
    encoder.push(packets);
    if close {
        #[cfg(feature = "tracing")]
        tracing::debug!("close packet sent, closing session queue");
        rx.close();
    }
    close
}

/// Handle a poll request.
///
/// Queued packets are sent at once, as long as they fit in `max_payload`.
/// Otherwise the request waits for the next packet.
pub(crate) async fn polling_req<H, B>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    sid: Sid,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
{
    let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionID(sid))?;
    if !socket.is_http() {
        return Err(Error::TransportMismatch);
    }

    let mut rx = match socket.internal_rx.try_lock() {
        Ok(rx) => rx,
        // the upgrade holds the queue, the poll is released at once
        Err(_) if socket.is_upgrading() => {
            let mut encoder =
                PayloadEncoder::new(protocol, socket.supports_binary, engine.config.max_payload);
            encoder.push([Packet::Noop]);
            return payload_response(encoder.finish());
        }
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "multiple polling requests");
            socket.close(DisconnectReason::MultipleHttpPollingError);
            return Err(Error::MultipleHttpPolling);
        }
    };
    // the session may have been upgraded before the queue was acquired
    if !socket.is_http() {
        return Err(Error::TransportMismatch);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(?sid, "polling request");

    let mut encoder =
        PayloadEncoder::new(protocol, socket.supports_binary, engine.config.max_payload);
    let packets = rx.recv().await.unwrap_or_else(|| smallvec![Packet::Close]);
    let mut closed = push_packets(&mut encoder, &mut rx, packets);
    while !closed {
        if !rx.peek().is_some_and(|p| encoder.fits(p)) {
            break;
        }
        match rx.try_recv() {
            Ok(packets) => closed = push_packets(&mut encoder, &mut rx, packets),
            Err(_) => break,
        }
    }

    let payload = encoder.finish();
    #[cfg(feature = "tracing")]
    tracing::trace!(?sid, "sending payload: {:?}", payload.data);
    payload_response(payload)
}

/// Handle a post request: decode the payload and handle each packet in order.
pub(crate) async fn post_req<H, R, B>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    sid: Sid,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Body + Send + Unpin + 'static,
    R::Data: Send,
    R::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionID(sid))?;
    if !socket.is_http() {
        return Err(Error::TransportMismatch);
    }

    let Ok(_post) = socket.post_lock.try_lock() else {
        #[cfg(feature = "tracing")]
        tracing::debug!(?sid, "multiple post requests");
        socket.close(DisconnectReason::MultipleHttpPollingError);
        return Err(Error::MultipleHttpPolling);
    };

    let is_binary = req
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/octet-stream"));

    let body = match Limited::new(req.into_body(), engine.config.max_payload as usize)
        .collect()
        .await
    {
        Ok(body) => body.to_bytes(),
        Err(e) => {
            let err = if e.is::<LengthLimitError>() {
                Error::PayloadTooLarge
            } else {
                Error::BodyRead
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "error reading body: {err}");
            socket.close(DisconnectReason::TransportError);
            return Err(err);
        }
    };

    let packets = match payload::decode(body, protocol, is_binary) {
        Ok(packets) => packets,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "error parsing payload: {e}");
            socket.close(DisconnectReason::PacketParsingError);
            return Err(e.into());
        }
    };

    for packet in packets {
        match on_packet(&engine, &socket, packet) {
            Ok(flow) if flow.is_break() => break,
            Ok(_) => (),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?sid, "bad packet received: {e}");
                let reason: Option<DisconnectReason> = (&e).into();
                socket.close(reason.unwrap_or(DisconnectReason::TransportError));
                return Err(e);
            }
        }
    }
    http_response("ok", "text/html")
}
