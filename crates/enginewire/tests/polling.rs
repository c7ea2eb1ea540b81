use std::{borrow::Cow, time::Duration};

use bytes::Bytes;
use enginewire::{DisconnectReason, config::EngineIoConfig};
use http::Method;

mod fixture;
use fixture::{Event, OpenPacket, create_polling_connection, create_server, next_event, send_req, test_config};

#[tokio::test]
async fn handshake_v4() {
    let (mut svc, mut rx) = create_server(test_config());
    let (status, body) = send_req(&mut svc, "EIO=4&transport=polling", Method::GET, None).await;
    assert_eq!(status, 200);
    assert!(body.starts_with('0'));
    let open: OpenPacket = serde_json::from_str(&body[1..]).unwrap();
    assert_eq!(open.upgrades, vec!["websocket", "webtransport"]);
    assert_eq!(open.ping_interval, 300);
    assert_eq!(open.ping_timeout, 200);
    assert_eq!(open.max_payload, 1e6 as u64);
    assert!(matches!(next_event(&mut rx).await, Event::Connect(sid) if sid.as_str() == open.sid));
}

#[tokio::test]
async fn message_echo() {
    let (mut svc, _rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let body = Bytes::from_static(b"4hello\x1e4world\x1ebAQID");
    let (status, res) = send_req(&mut svc, &params, Method::POST, Some(body)).await;
    assert_eq!(status, 200);
    assert_eq!(res, "ok");

    let (status, res) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 200);
    assert_eq!(res, "4hello\x1e4world\x1ebAQID");
}

#[tokio::test]
async fn heartbeat_v3_client_ping() {
    let (mut svc, _rx) = create_server(test_config());
    let (status, body) = send_req(&mut svc, "EIO=3&transport=polling", Method::GET, None).await;
    assert_eq!(status, 200);
    let (len, packet) = body.split_once(':').unwrap();
    assert_eq!(len.parse::<usize>().unwrap(), packet.encode_utf16().count());
    let open: OpenPacket = serde_json::from_str(&packet[1..]).unwrap();
    let params = format!("EIO=3&transport=polling&sid={}", open.sid);

    let ping = Bytes::from_static(b"1:2");
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(ping)).await;
    assert_eq!(status, 200);
    let (_, res) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(res, "1:3");
}

#[tokio::test]
async fn heartbeat_timeout() {
    let (mut svc, mut rx) = create_server(test_config());
    create_polling_connection(&mut svc).await;
    let Event::Connect(sid) = next_event(&mut rx).await else {
        panic!("expected connect event");
    };
    assert_eq!(
        next_event(&mut rx).await,
        Event::Disconnect(sid, DisconnectReason::HeartbeatTimeout)
    );
    assert_eq!(svc.sessions_count(), 0);
}

#[tokio::test]
async fn unknown_sid() {
    let (mut svc, _rx) = create_server(test_config());
    let params = "EIO=4&transport=polling&sid=AAAAAAAAAAAAAAAA";
    let (status, body) = send_req(&mut svc, params, Method::GET, None).await;
    assert_eq!(status, 400);
    assert_eq!(body, r#"{"code":1,"message":"Session ID unknown"}"#);
}

#[tokio::test]
async fn handshake_errors() {
    let (mut svc, _rx) = create_server(test_config());
    let (status, body) = send_req(&mut svc, "EIO=4&transport=grpc", Method::GET, None).await;
    assert_eq!(status, 400);
    assert_eq!(body, r#"{"code":0,"message":"Transport unknown"}"#);

    let (_, body) = send_req(&mut svc, "EIO=4&transport=polling", Method::POST, None).await;
    assert_eq!(body, r#"{"code":2,"message":"Bad handshake method"}"#);

    let (_, body) = send_req(&mut svc, "EIO=5&transport=polling", Method::GET, None).await;
    assert_eq!(body, r#"{"code":5,"message":"Unsupported protocol version"}"#);
    assert_eq!(svc.sessions_count(), 0);
}

#[tokio::test]
async fn request_middleware_rejects() {
    let config = EngineIoConfig::builder()
        .request_middleware(|parts: &http::request::Parts| -> Result<(), Cow<'static, str>> {
            match parts.headers.get("x-token") {
                Some(_) => Ok(()),
                None => Err("missing token".into()),
            }
        })
        .build();
    let (mut svc, mut rx) = create_server(config);
    let (status, body) = send_req(&mut svc, "EIO=4&transport=polling", Method::GET, None).await;
    assert_eq!(status, 400);
    assert_eq!(body, r#"{"code":4,"message":"missing token"}"#);
    assert_eq!(svc.sessions_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn request_middleware_runs_before_validation() {
    let config = EngineIoConfig::builder()
        .request_middleware(|_: &http::request::Parts| -> Result<(), Cow<'static, str>> {
            Err("denied".into())
        })
        .build();
    let (mut svc, _rx) = create_server(config);
    let denied = r#"{"code":4,"message":"denied"}"#;

    for params in [
        "EIO=5&transport=polling",
        "EIO=4&transport=carrier-pigeon",
        "EIO=4&transport=polling&sid=AAAAAAAAAAAAAAAA",
    ] {
        let (status, body) = send_req(&mut svc, params, Method::GET, None).await;
        assert_eq!(status, 400);
        assert_eq!(body, denied, "{params}");
    }
    let (_, body) = send_req(&mut svc, "EIO=4&transport=polling", Method::POST, None).await;
    assert_eq!(body, denied);
}

#[tokio::test]
async fn multiple_polling_requests() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    let Event::Connect(_) = next_event(&mut rx).await else {
        panic!("expected connect event");
    };
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let mut svc1 = svc.clone();
    let params1 = params.clone();
    let first =
        tokio::spawn(async move { send_req(&mut svc1, &params1, Method::GET, None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, _) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 400);

    let (status, body) = first.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, "1");
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::MultipleHttpPollingError)
    ));
}

#[tokio::test]
async fn payload_too_large() {
    let config = EngineIoConfig::builder().max_payload(100).build();
    let (mut svc, mut rx) = create_server(config);
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;

    let params = format!("EIO=4&transport=polling&sid={sid}");
    let body = Bytes::from(format!("4{}", "a".repeat(200)));
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(body)).await;
    assert_eq!(status, 413);
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::TransportError)
    ));
}

#[tokio::test]
async fn wrong_heartbeat_direction() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;

    let params = format!("EIO=4&transport=polling&sid={sid}");
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(Bytes::from_static(b"2"))).await;
    assert_eq!(status, 400);
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::TransportError)
    ));
}

#[tokio::test]
async fn malformed_payload() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;

    let params = format!("EIO=4&transport=polling&sid={sid}");
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(Bytes::from_static(b"9"))).await;
    assert_eq!(status, 400);
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::PacketParsingError)
    ));
}

#[tokio::test]
async fn client_close() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;

    let params = format!("EIO=4&transport=polling&sid={sid}");
    let (status, _) = send_req(&mut svc, &params, Method::POST, Some(Bytes::from_static(b"1"))).await;
    assert_eq!(status, 200);
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::TransportClose)
    ));

    let (status, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 400);
    assert_eq!(body, r#"{"code":1,"message":"Session ID unknown"}"#);
}
