use socketwire::{
    SendError, SocketIo,
    extract::{AckSender, Data, SocketRef},
    socket::DisconnectReason,
};
use tokio::sync::mpsc;

mod fixture;
use fixture::{Client, timeout_rcv};

fn rooms_handler(io: &SocketIo) {
    io.ns("/", async |socket: SocketRef| {
        socket.on("join", async |socket: SocketRef, Data::<String>(room), ack: AckSender| {
            socket.join(room);
            ack.send(&"joined").unwrap();
        });
        socket.on(
            "say",
            async |socket: SocketRef, Data::<(String, String)>((room, text))| {
                socket.to(room).emit("said", &text).await.unwrap();
            },
        );
    });
}

#[tokio::test]
pub async fn room_broadcast_skips_sender() {
    let (svc, io) = SocketIo::new_svc();
    rooms_handler(&io);

    let (mut a, _) = Client::connect(&svc).await;
    let (mut b, _) = Client::connect(&svc).await;
    let (mut c, _) = Client::connect(&svc).await;
    for client in [&mut a, &mut b] {
        client.send(r#"21["join","news"]"#).await;
        assert_eq!(client.recv().await, r#"31["joined"]"#);
    }

    a.send(r#"2["say","news","hello"]"#).await;
    assert_eq!(b.recv().await, r#"2["said","hello"]"#);

    io.emit("end", &"bye").await.unwrap();
    assert_eq!(a.recv().await, r#"2["end","bye"]"#);
    assert_eq!(b.recv().await, r#"2["end","bye"]"#);
    assert_eq!(c.recv().await, r#"2["end","bye"]"#);
}

#[tokio::test]
pub async fn server_broadcast_except() {
    let (svc, io) = SocketIo::new_svc();
    rooms_handler(&io);

    let (mut a, _) = Client::connect(&svc).await;
    let (mut b, _) = Client::connect(&svc).await;
    a.send(r#"21["join","muted"]"#).await;
    assert_eq!(a.recv().await, r#"31["joined"]"#);

    io.except("muted").emit("news", &(1, "two")).await.unwrap();
    io.to("muted").emit("end", &"bye").await.unwrap();
    assert_eq!(b.recv().await, r#"2["news",1,"two"]"#);
    assert_eq!(a.recv().await, r#"2["end","bye"]"#);
    assert_eq!(io.to("muted").sockets().len(), 1);
    assert_eq!(io.sockets().len(), 2);
}

#[tokio::test]
pub async fn reserved_event() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        let res = socket.emit("disconnect", &"nope");
        tx.send(matches!(res, Err(SendError::ReservedEvent(_)))).unwrap();
    });

    Client::connect(&svc).await;
    assert!(timeout_rcv(&mut rx).await);
}

#[tokio::test]
pub async fn disconnect_from_client() {
    let (svc, io) = SocketIo::new_svc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (reason_tx, mut reason_rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        socket.join("lobby");
        let tx = tx.clone();
        socket.on_disconnecting(async move |socket: SocketRef| {
            tx.send(socket.rooms()).unwrap();
        });
        let reason_tx = reason_tx.clone();
        socket.on_disconnect(async move |reason: DisconnectReason| {
            reason_tx.send(reason).unwrap();
        });
    });

    let (mut client, _) = Client::connect(&svc).await;
    client.send("1").await;

    let rooms = timeout_rcv(&mut rx).await;
    assert!(rooms.iter().any(|r| r == "lobby"));
    assert_eq!(
        timeout_rcv(&mut reason_rx).await,
        DisconnectReason::ClientNSDisconnect
    );
    assert!(io.sockets().is_empty());
    assert!(io.to("lobby").sockets().is_empty());
}

#[tokio::test]
pub async fn disconnect_from_server() {
    let (svc, io) = SocketIo::new_svc();
    let (reason_tx, mut reason_rx) = mpsc::unbounded_channel();
    io.ns("/", async move |socket: SocketRef| {
        let reason_tx = reason_tx.clone();
        socket.on_disconnect(async move |reason: DisconnectReason| {
            reason_tx.send(reason).unwrap();
        });
    });

    let (mut client, _) = Client::connect(&svc).await;
    io.disconnect().await.unwrap();
    assert_eq!(client.recv().await, "1");
    assert_eq!(
        timeout_rcv(&mut reason_rx).await,
        DisconnectReason::ServerNSDisconnect
    );
}
