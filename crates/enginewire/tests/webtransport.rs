use std::time::Duration;

use bytes::Bytes;
use enginewire::DisconnectReason;
use enginewire_core::{
    Packet,
    stream::{Frame, FrameCodec},
};
use futures_util::{SinkExt, StreamExt};
use http::{Method, Request};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;

mod fixture;
use fixture::{
    Event, OpenPacket, create_polling_connection, create_server, next_event, send_req,
    test_config,
};

/// Open a webtransport stream and send the raw open frame
async fn connect(
    svc: &enginewire::service::EngineIoService<fixture::EchoHandler>,
    open: &str,
) -> Framed<DuplexStream, FrameCodec> {
    let (server, mut client) = tokio::io::duplex(4096);
    let parts = Request::get("https://127.0.0.1/engine.io/").body(()).unwrap().into_parts().0;
    tokio::spawn(svc.webtransport_init(server, parts));

    client.write_all(&[open.len() as u8]).await.unwrap();
    client.write_all(open.as_bytes()).await.unwrap();
    Framed::new(client, FrameCodec::new(1e6 as u64))
}

async fn next_frame(framed: &mut Framed<DuplexStream, FrameCodec>) -> Frame {
    tokio::time::timeout(Duration::from_secs(1), framed.next())
        .await
        .expect("frame timeout")
        .expect("stream closed")
        .unwrap()
}

#[tokio::test]
async fn webtransport_session() {
    let (svc, mut rx) = create_server(test_config());
    let mut framed = connect(&svc, "0").await;

    let Frame::Text(open) = next_frame(&mut framed).await else {
        panic!("expected open packet");
    };
    let open: OpenPacket = serde_json::from_str(&open[1..]).unwrap();
    assert!(open.upgrades.is_empty());
    assert!(matches!(next_event(&mut rx).await, Event::Connect(_)));

    framed.send(Packet::Message("hello".into())).await.unwrap();
    assert_eq!(next_frame(&mut framed).await, Frame::Text("4hello".into()));

    framed.send(Packet::Binary(Bytes::from_static(&[1, 2]))).await.unwrap();
    assert_eq!(next_frame(&mut framed).await, Frame::Binary(Bytes::from_static(&[1, 2])));

    framed.send(Packet::Close).await.unwrap();
    assert!(matches!(
        next_event(&mut rx).await,
        Event::Disconnect(_, DisconnectReason::TransportClose)
    ));
}

#[tokio::test]
async fn polling_to_webtransport_upgrade() {
    let (mut svc, mut rx) = create_server(test_config());
    let sid = create_polling_connection(&mut svc).await;
    next_event(&mut rx).await;
    let params = format!("EIO=4&transport=polling&sid={sid}");

    let mut framed = connect(&svc, &format!(r#"0{{"sid":"{sid}"}}"#)).await;
    framed.send(Packet::PingUpgrade).await.unwrap();
    assert_eq!(next_frame(&mut framed).await, Frame::Text("3probe".into()));

    let (_, body) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(body, "6");

    framed.send(Packet::Upgrade).await.unwrap();
    framed.send(Packet::Message("hello".into())).await.unwrap();
    assert_eq!(next_frame(&mut framed).await, Frame::Text("4hello".into()));

    let (status, _) = send_req(&mut svc, &params, Method::GET, None).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn webtransport_bad_open() {
    let (svc, mut rx) = create_server(test_config());
    let mut framed = connect(&svc, "4hello").await;
    let res = tokio::time::timeout(Duration::from_secs(1), framed.next()).await.unwrap();
    assert!(res.is_none());
    assert!(rx.try_recv().is_err());
}
