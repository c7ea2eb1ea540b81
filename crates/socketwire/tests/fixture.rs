#![allow(dead_code)]

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use enginewire::service::NotFoundService;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use socketwire::service::SocketIoService;
use tower_service::Service;

pub type Svc = SocketIoService<NotFoundService>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPacket {
    sid: String,
}

/// Send a request, `params` are appended to the query
pub async fn send_req(
    svc: &mut Svc,
    params: &str,
    method: Method,
    body: Option<String>,
) -> (StatusCode, String) {
    let body = Full::new(body.map(Bytes::from).unwrap_or_default());
    let req = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1/socket.io/?EIO=4&transport=polling&{params}"))
        .body(body)
        .unwrap();
    let res = svc.call(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// A polling client speaking raw socket.io packets
pub struct Client {
    svc: Svc,
    pub sid: String,
    buf: VecDeque<String>,
}

impl Client {
    /// Open an engine session without joining any namespace
    pub async fn open(svc: &Svc) -> Self {
        let mut svc = svc.clone();
        let (status, body) = send_req(&mut svc, "", Method::GET, None).await;
        assert_eq!(status, 200);
        let open: OpenPacket = serde_json::from_str(&body[1..]).unwrap();
        Self {
            svc,
            sid: open.sid,
            buf: VecDeque::new(),
        }
    }

    /// Open a session and join the main namespace, returning the connect packet
    pub async fn connect(svc: &Svc) -> (Self, String) {
        let mut client = Self::open(svc).await;
        client.send("0").await;
        let connect = client.recv().await;
        assert!(connect.starts_with("0{"), "unexpected packet {connect}");
        (client, connect)
    }

    /// Send a socket.io packet
    pub async fn send(&mut self, packet: &str) {
        let params = format!("sid={}", self.sid);
        let body = Some(format!("4{packet}"));
        let (status, res) = send_req(&mut self.svc, &params, Method::POST, body).await;
        assert_eq!(status, 200);
        assert_eq!(res, "ok");
    }

    /// Close the engine session
    pub async fn close(&mut self) {
        let params = format!("sid={}", self.sid);
        send_req(&mut self.svc, &params, Method::POST, Some("1".into())).await;
    }

    /// Receive the next socket.io packet, failing after one second
    pub async fn recv(&mut self) -> String {
        loop {
            if let Some(packet) = self.buf.pop_front() {
                return packet;
            }
            let params = format!("sid={}", self.sid);
            let (status, body) = tokio::time::timeout(
                Duration::from_secs(1),
                send_req(&mut self.svc, &params, Method::GET, None),
            )
            .await
            .expect("poll timeout");
            assert_eq!(status, 200);
            self.buf.extend(
                body.split('\x1e')
                    .filter_map(|p| p.strip_prefix('4'))
                    .map(str::to_string),
            );
        }
    }
}

/// The json payload of a packet, after its header
pub fn payload(packet: &str) -> serde_json::Value {
    let start = packet.find(['{', '[']).expect("packet without payload");
    serde_json::from_str(&packet[start..]).unwrap()
}

/// Wait for the next item of a channel, failing after one second
pub async fn timeout_rcv<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("channel timeout")
        .expect("channel closed")
}
