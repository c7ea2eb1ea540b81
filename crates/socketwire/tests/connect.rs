use socketwire::{
    SocketIo,
    extract::{Data, SocketRef},
    handler::{ConnectHandler, ConnectOutcome},
    socket::DisconnectReason,
};
use tokio::sync::mpsc;

mod fixture;
use fixture::{Client, payload, timeout_rcv};

#[tokio::test]
pub async fn connect_main_namespace() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        tx.send(socket.id).unwrap();
    });

    let (_client, connect) = Client::connect(&svc).await;
    let sid = timeout_rcv(&mut rx).await;
    assert_eq!(payload(&connect)["sid"], sid.to_string());
    assert!(io.get_socket(sid).is_some());
}

#[tokio::test]
pub async fn connect_invalid_namespace() {
    let (svc, io) = SocketIo::new_svc();
    io.ns("/", async || {});

    let mut client = Client::open(&svc).await;
    client.send("0/unknown,").await;
    assert_eq!(
        client.recv().await,
        r#"4/unknown,{"message":"Invalid namespace"}"#
    );
}

#[tokio::test]
pub async fn connect_dynamic_namespace() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.dyn_ns("/room/{id}", async move |socket: SocketRef| {
        tx.send(socket.ns().to_string()).unwrap();
    })
    .unwrap();

    let mut client = Client::open(&svc).await;
    client.send("0/room/42,").await;
    let connect = client.recv().await;
    assert!(connect.starts_with("0/room/42,{"), "{connect}");
    assert_eq!(timeout_rcv(&mut rx).await, "/room/42");
    assert!(io.of("/room/42").is_some());
}

#[tokio::test]
pub async fn connect_middleware_reject() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = async move |_: SocketRef| tx.send(()).unwrap();
    io.ns("/", handler.with(async || Err::<(), _>("denied")));

    let mut client = Client::open(&svc).await;
    client.send("0").await;
    assert_eq!(client.recv().await, r#"4{"message":"denied"}"#);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
pub async fn connect_middlewares_in_order() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
    let mw = |i: usize| {
        let tx = tx.clone();
        async move || {
            tx.send(i).unwrap();
            ConnectOutcome::Continue
        }
    };
    let handler = async || {};
    io.ns("/", handler.with(mw(1)).with(mw(2)).with(mw(3)));

    Client::connect(&svc).await;
    for i in 1..=3 {
        assert_eq!(timeout_rcv(&mut rx).await, i);
    }
}

#[tokio::test]
pub async fn connect_middleware_short_circuits() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
    let handler = async || {};
    io.ns(
        "/",
        handler
            .with(async move || ConnectOutcome::Reject("first".into()))
            .with(async move || {
                tx.send(2).unwrap();
                ConnectOutcome::Continue
            }),
    );

    let mut client = Client::open(&svc).await;
    client.send("0").await;
    assert_eq!(client.recv().await, r#"4{"message":"first"}"#);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
pub async fn connect_middleware_with_extractors() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = async || {};
    let auth = async move |socket: SocketRef, Data(token): Data<String>| {
        tx.send(socket.id).unwrap();
        if token == "secret" { Ok(()) } else { Err("bad token") }
    };
    io.ns("/", handler.with(auth));

    // auth payload that does not deserialize into the extractor
    let mut client = Client::open(&svc).await;
    client.send(r#"0{"token":"secret"}"#).await;
    let connect_error = client.recv().await;
    assert!(connect_error.starts_with("4{"), "{connect_error}");
    assert!(payload(&connect_error)["message"].is_string());
    assert!(rx.try_recv().is_err());

    let mut client = Client::open(&svc).await;
    client.send(r#"0"wrong""#).await;
    assert_eq!(client.recv().await, r#"4{"message":"bad token"}"#);
    let sid = timeout_rcv(&mut rx).await;
    assert!(io.get_socket(sid).is_none());

    let mut client = Client::open(&svc).await;
    client.send(r#"0"secret""#).await;
    let connect = client.recv().await;
    assert!(connect.starts_with("0{"), "{connect}");
    let sid = timeout_rcv(&mut rx).await;
    assert!(io.get_socket(sid).is_some());
}

/// Connect a client with a disconnect handler, send a malformed packet and
/// return the disconnect reason.
async fn disconnect_on_malformed(packet: &str) -> DisconnectReason {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        let tx = tx.clone();
        socket.on_disconnect(async move |reason: DisconnectReason| {
            tx.send(reason).unwrap();
        });
    });

    let (mut client, _) = Client::connect(&svc).await;
    assert_eq!(io.sockets().len(), 1);
    client.send(packet).await;
    let reason = timeout_rcv(&mut rx).await;
    assert!(io.sockets().is_empty());
    reason
}

#[tokio::test]
pub async fn malformed_event_payload_closes_connection() {
    let reason = disconnect_on_malformed("2abc").await;
    assert_eq!(reason, DisconnectReason::PacketParsingError);
}

#[tokio::test]
pub async fn mismatched_attachment_count_closes_connection() {
    let packet = r#"52-["file",{"_placeholder":true,"num":0}]"#;
    let reason = disconnect_on_malformed(packet).await;
    assert_eq!(reason, DisconnectReason::PacketParsingError);
}

#[tokio::test]
pub async fn unknown_packet_type_closes_connection() {
    let reason = disconnect_on_malformed(r#"9["e"]"#).await;
    assert_eq!(reason, DisconnectReason::PacketParsingError);
}
