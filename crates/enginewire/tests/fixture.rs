#![allow(dead_code)]

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{BufMut, Bytes};
use enginewire::{
    DisconnectReason, ProtocolVersion, Sid, Socket, Str, config::EngineIoConfig,
    handler::EngineIoHandler, service::EngineIoService,
};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    sync::mpsc,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{handshake::client::generate_key, protocol::Role},
};
use tower_service::Service;

/// The handshake packet data
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(Sid),
    Disconnect(Sid, DisconnectReason),
    Message(Sid, String),
    Binary(Sid, Bytes),
}

/// Echo every message and record every event
#[derive(Debug)]
pub struct EchoHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl EchoHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EngineIoHandler for EchoHandler {
    type Data = ();

    fn on_connect(self: Arc<Self>, socket: Arc<Socket<()>>) {
        self.tx.send(Event::Connect(socket.id)).ok();
    }

    fn on_disconnect(&self, socket: Arc<Socket<()>>, reason: DisconnectReason) {
        self.tx.send(Event::Disconnect(socket.id, reason)).ok();
    }

    fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
        self.tx.send(Event::Message(socket.id, msg.to_string())).ok();
        socket.emit(msg).ok();
    }

    fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) {
        self.tx.send(Event::Binary(socket.id, data.clone())).ok();
        socket.emit_binary(data).ok();
    }
}

pub fn test_config() -> EngineIoConfig {
    EngineIoConfig::builder()
        .ping_interval(Duration::from_millis(300))
        .ping_timeout(Duration::from_millis(200))
        .max_payload(1e6 as u64)
        .build()
}

pub fn create_server(config: EngineIoConfig) -> (EngineIoService<EchoHandler>, mpsc::UnboundedReceiver<Event>) {
    let (handler, rx) = EchoHandler::new();
    (EngineIoService::with_config(Arc::new(handler), config), rx)
}

/// Send a request, `params` are appended to the query
pub async fn send_req(
    svc: &mut EngineIoService<EchoHandler>,
    params: &str,
    method: Method,
    body: Option<Bytes>,
) -> (StatusCode, String) {
    let body = Full::new(body.unwrap_or_default());
    let req = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1/engine.io/?{params}"))
        .body(body)
        .unwrap();
    let res = svc.call(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// Open a v4 polling session and return its sid
pub async fn create_polling_connection(svc: &mut EngineIoService<EchoHandler>) -> String {
    let (status, body) = send_req(svc, "EIO=4&transport=polling", Method::GET, None).await;
    assert_eq!(status, 200);
    let open: OpenPacket = serde_json::from_str(&body[1..]).unwrap();
    open.sid
}

/// An in-memory duplex stream
pub struct StreamImpl(mpsc::UnboundedSender<Bytes>, mpsc::UnboundedReceiver<Bytes>);

impl AsyncRead for StreamImpl {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.1.poll_recv(cx).map(|e| {
            if let Some(e) = e {
                buf.put(e);
            }
            Ok(())
        })
    }
}

impl AsyncWrite for StreamImpl {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let len = buf.len();
        self.0.send(Bytes::copy_from_slice(buf)).ok();
        Poll::Ready(Ok(len))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        self.1.close();
        Poll::Ready(Ok(()))
    }
}

pub fn stream_pair() -> (StreamImpl, StreamImpl) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (tx1, rx1) = mpsc::unbounded_channel();
    (StreamImpl(tx, rx1), StreamImpl(tx1, rx))
}

pub fn ws_parts(protocol: ProtocolVersion) -> http::request::Parts {
    let eio = match protocol {
        ProtocolVersion::V3 => 3,
        ProtocolVersion::V4 => 4,
    };
    Request::builder()
        .method("GET")
        .header("Host", "127.0.0.1")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .uri(format!("ws://127.0.0.1/engine.io/?EIO={eio}&transport=websocket"))
        .body(())
        .unwrap()
        .into_parts()
        .0
}

/// Connect a websocket client, optionally upgrading the session `sid`
pub async fn new_ws_mock_conn(
    svc: &EngineIoService<EchoHandler>,
    protocol: ProtocolVersion,
    sid: Option<Sid>,
) -> WebSocketStream<StreamImpl> {
    let (server, client) = stream_pair();
    tokio::spawn(svc.ws_init(server, protocol, sid, ws_parts(protocol)));
    WebSocketStream::from_raw_socket(client, Role::Client, Default::default()).await
}

/// Wait for the next event, failing after one second
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event timeout")
        .expect("handler dropped")
}
