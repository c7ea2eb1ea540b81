use std::time::Duration;

use futures_util::StreamExt;
use socketwire::{
    AckError, SocketIo,
    extract::{AckSender, Data, SocketRef},
};
use tokio::sync::mpsc;

mod fixture;
use fixture::{Client, timeout_rcv};

#[tokio::test]
pub async fn client_ack_answered_once() {
    let (svc, io) = SocketIo::new_svc();
    io.ns("/", async |socket: SocketRef| {
        for _ in 0..2 {
            socket.on("echo", async |Data::<String>(value), ack: AckSender| {
                ack.send(&value).ok();
            });
        }
    });

    let (mut client, _) = Client::connect(&svc).await;
    client.send(r#"25["echo","abc"]"#).await;
    assert_eq!(client.recv().await, r#"35["abc"]"#);

    io.emit("end", &"bye").await.unwrap();
    assert_eq!(client.recv().await, r#"2["end","bye"]"#);
}

#[tokio::test]
pub async fn server_emit_with_ack() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        let stream = socket.emit_with_ack::<_, String>("question", &"?").unwrap();
        let tx = tx.clone();
        tokio::spawn(async move { tx.send(stream.await).unwrap() });
    });

    let (mut client, _) = Client::connect(&svc).await;
    assert_eq!(client.recv().await, r#"21["question","?"]"#);
    client.send(r#"31["answer"]"#).await;
    assert_eq!(timeout_rcv(&mut rx).await.unwrap(), "answer");
}

#[tokio::test]
pub async fn server_emit_with_ack_timeout() {
    let (svc, io) = SocketIo::builder()
        .ack_timeout(Duration::from_millis(50))
        .build_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        let stream = socket.emit_with_ack::<_, String>("question", &"?").unwrap();
        let tx = tx.clone();
        tokio::spawn(async move { tx.send(stream.await).unwrap() });
    });

    let (mut client, _) = Client::connect(&svc).await;
    assert_eq!(client.recv().await, r#"21["question","?"]"#);
    assert!(matches!(timeout_rcv(&mut rx).await, Err(AckError::Timeout)));
}

#[tokio::test]
pub async fn broadcast_emit_with_ack() {
    let (svc, io) = SocketIo::new_svc();
    io.ns("/", async || {});

    let (mut a, _) = Client::connect(&svc).await;
    let (mut b, _) = Client::connect(&svc).await;
    let stream = io
        .emit_with_ack::<_, usize>("count", &"?")
        .await
        .unwrap();

    for (client, n) in [(&mut a, 1), (&mut b, 2)] {
        assert_eq!(client.recv().await, r#"21["count","?"]"#);
        client.send(&format!("31[{n}]")).await;
    }

    let mut acks: Vec<usize> = stream.map(|(_, res)| res.unwrap()).collect().await;
    acks.sort_unstable();
    assert_eq!(acks, [1, 2]);
}
