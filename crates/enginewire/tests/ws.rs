use std::time::Duration;

use bytes::Bytes;
use enginewire::{DisconnectReason, ProtocolVersion, Sid};
use futures_util::{SinkExt, StreamExt};
use http::Method;
use tokio_tungstenite::tungstenite::Message;

mod fixture;
use fixture::{
    Event, OpenPacket, create_polling_connection, create_server, new_ws_mock_conn, next_event,
    send_req, stream_pair, test_config, ws_parts,
};

async fn next_text<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match tokio::time::timeout(Duration::from_secs(1), ws.next()).await {
        Ok(Some(Ok(Message::Text(msg)))) => msg.to_string(),
        msg => panic!("unexpected message {msg:?}"),
    }
}

#[tokio::test]
async fn ws_handshake_and_echo() {
    let (svc, mut rx) = create_server(test_config());
    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, None).await;

    let open = next_text(&mut ws).await;
    let open: OpenPacket = serde_json::from_str(&open[1..]).unwrap();
    assert!(open.upgrades.is_empty());
    assert!(matches!(next_event(&mut rx).await, Event::Connect(_)));

    ws.send(Message::Text("4hello".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "4hello");

    ws.send(Message::Binary(Bytes::from_static(&[1, 2, 3]))).await.unwrap();
    match ws.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data, Bytes::from_static(&[1, 2, 3])),
        msg => panic!("unexpected message {msg:?}"),
    }
}

#[tokio::test]
async fn ws_v3_binary_prefix() {
    let (svc, _rx) = create_server(test_config());
    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V3, None).await;
    next_text(&mut ws).await;

    ws.send(Message::Binary(Bytes::from_static(&[4, 1, 2]))).await.unwrap();
    match ws.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data, Bytes::from_static(&[4, 1, 2])),
        msg => panic!("unexpected message {msg:?}"),
    }
}

#[tokio::test]
async fn ws_heartbeat() {
    let (svc, mut rx) = create_server(test_config());
    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, None).await;
    next_text(&mut ws).await;
    next_event(&mut rx).await;

    assert_eq!(next_text(&mut ws).await, "2");
    ws.send(Message::Text("3".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "2");
    ws.send(Message::Text("3".into())).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn ws_client_close() {
    let (svc, mut rx) = create_server(test_config());
    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, None).await;
    next_text(&mut ws).await;
    next_event(&mut rx).await;

    ws.send(Message::Text("1".into())).await.unwrap();
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::TransportClose)
    ));
    assert_eq!(svc.sessions_count(), 0);
}

#[tokio::test]
async fn polling_to_ws_upgrade() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "3probe");

    // the pending poll is released with a noop packet
    let (status, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 200);
    assert_eq!(body, "6");

    ws.send(Message::Text("5".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 400);
    assert_eq!(body, r#"{"code":3,"message":"Bad request"}"#);

    ws.send(Message::Text("4hello".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "4hello");

    // a second upgrade of the same session is rejected
    let (server, _client) = stream_pair();
    let res = svc
        .ws_init(
            server,
            ProtocolVersion::V4,
            Some(sid.parse().unwrap()),
            ws_parts(ProtocolVersion::V4),
        )
        .await;
    assert!(res.is_err());

    ws.send(Message::Text("4world".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "4world");
}

#[tokio::test]
async fn messages_during_upgrade_are_flushed_by_polling() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "3probe");
    tokio::time::sleep(Duration::from_millis(20)).await;

    // echoed while the upgrade is pending
    let body = Bytes::from_static(b"4a\x1e4b");
    let (status, body) = send_req(&mut svc, &params, Method::POST, Some(body)).await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");
    let (status, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 200);
    assert_eq!(body, "6\x1e4a\x1e4b");

    ws.send(Message::Text("5".into())).await.unwrap();
    ws.send(Message::Text("4c".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "4c");
}

#[tokio::test]
async fn failed_upgrade_keeps_polling() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let mut ws = new_ws_mock_conn(&svc, ProtocolVersion::V4, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("4hello".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let body = Bytes::from_static(b"4still polling");
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(body)).await;
    assert_eq!(status, 200);
    let (_, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(body, "4still polling");
}

#[tokio::test]
async fn upgrade_unknown_session() {
    let (svc, _rx) = create_server(test_config());
    let (server, _client) = stream_pair();
    let res = svc
        .ws_init(server, ProtocolVersion::V4, Some(Sid::ZERO), ws_parts(ProtocolVersion::V4))
        .await;
    assert!(matches!(res, Err(enginewire::Error::UnknownSessionID(_))));
}
