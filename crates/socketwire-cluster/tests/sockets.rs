use std::time::Duration;

use socketwire::{ServerSideError, ServerSideEmitError, extract::SocketRef};
use socketwire_cluster::ClusterAdapterConfig;

use fixture::Adapter;

#[tokio::test]
async fn server_count() {
    let [io1, io2, io3] = fixture::spawn_servers();
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    io3.ns("/", async || ());
    fixture::settle().await;

    assert_eq!(io1.of("/").unwrap().server_count().await.unwrap(), 3);
    assert_eq!(io2.of("/").unwrap().server_count().await.unwrap(), 3);
    assert_eq!(io3.of("/").unwrap().server_count().await.unwrap(), 3);
}

#[tokio::test]
async fn closed_server_leaves_the_cluster() {
    let [io1, io2] = fixture::spawn_servers();
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    fixture::settle().await;
    assert_eq!(io1.of("/").unwrap().server_count().await.unwrap(), 2);

    io2.close().await;
    fixture::settle().await;
    assert_eq!(io1.of("/").unwrap().server_count().await.unwrap(), 1);
}

#[tokio::test]
async fn fetch_sockets_and_rooms() {
    let [io1, io2, io3] = fixture::spawn_servers();
    let handler = |room: &'static str| async move |socket: SocketRef<Adapter>| socket.join(room);
    io1.ns("/", handler("room1"));
    io2.ns("/", handler("room2"));
    io3.ns("/", handler("room3"));
    fixture::settle().await;

    let _sock1 = io1.new_dummy_sock("/", ()).await;
    let _sock2 = io2.new_dummy_sock("/", ()).await;
    let _sock3 = io3.new_dummy_sock("/", ()).await;

    let sockets = io1.fetch_sockets().await.unwrap();
    assert_eq!(sockets.len(), 3);

    let sockets = io2.to("room3").fetch_sockets().await.unwrap();
    assert_eq!(sockets.len(), 1);
    let remote = &sockets[0];
    assert_eq!(remote.data().rooms, ["room3"]);
    assert_ne!(remote.data().server_id, sockets_server(&io2).await);

    let mut rooms = io3.rooms().await.unwrap();
    rooms.sort();
    assert_eq!(rooms, ["room1", "room2", "room3"]);
}

async fn sockets_server(io: &socketwire::SocketIo<Adapter>) -> socketwire::Uid {
    io.local().fetch_sockets().await.unwrap()[0].data().server_id
}

#[tokio::test]
async fn join_and_leave_across_servers() {
    let [io1, io2] = fixture::spawn_servers();
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    fixture::settle().await;

    let (_tx1, mut rx1) = io1.new_dummy_sock("/", ()).await;
    let (_tx2, mut rx2) = io2.new_dummy_sock("/", ()).await;
    timeout_rcv!(&mut rx1);
    timeout_rcv!(&mut rx2);

    io1.join("news").await.unwrap();
    fixture::settle().await;
    assert_eq!(io2.local().to("news").sockets().len(), 1);

    io2.to("news").emit("news", "hello").await.unwrap();
    assert_eq!(timeout_rcv!(&mut rx1), r#"2["news","hello"]"#);
    assert_eq!(timeout_rcv!(&mut rx2), r#"2["news","hello"]"#);

    io2.leave("news").await.unwrap();
    fixture::settle().await;
    assert!(io1.local().to("news").sockets().is_empty());
}

#[tokio::test]
async fn remote_socket_operations() {
    let [io1, io2] = fixture::spawn_servers();
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    fixture::settle().await;

    let (_tx, mut rx) = io2.new_dummy_sock("/", ()).await;
    timeout_rcv!(&mut rx);

    let sockets = io1.fetch_sockets().await.unwrap();
    assert_eq!(sockets.len(), 1);
    let remote = &sockets[0];

    remote.emit("direct", "hi").await.unwrap();
    assert_eq!(timeout_rcv!(&mut rx), r#"2["direct","hi"]"#);

    remote.join("vip").await.unwrap();
    fixture::settle().await;
    assert_eq!(io2.local().to("vip").sockets().len(), 1);
    assert_eq!(remote.rooms().await.unwrap(), ["vip"]);

    remote.clone().disconnect().await.unwrap();
    assert_eq!(timeout_rcv!(&mut rx), "1");
    fixture::settle().await;
    assert!(io2.local().sockets().is_empty());
}

#[tokio::test]
async fn server_side_emit_with_ack() {
    let [io1, io2, io3] = fixture::spawn_servers();
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    io3.ns("/", async || ());
    io2.on_server_side("sum", |(a, b): (u32, u32)| a + b);
    io3.on_server_side("sum", |(a, b): (u32, u32)| a + b + 1);
    fixture::settle().await;

    let mut responses = io1.server_side_emit_with_ack("sum", &(1, 2)).await.unwrap();
    responses.sort_by_key(|res| res[0].as_u64());
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0][0].as_u64(), Some(3));
    assert_eq!(responses[1][0].as_u64(), Some(4));
}

#[tokio::test]
async fn server_side_emit_timeout() {
    let config = ClusterAdapterConfig::new().with_request_timeout(Duration::from_millis(100));
    let [io1, io2, io3] = fixture::spawn_servers_with_config(config);
    io1.ns("/", async || ());
    io2.ns("/", async || ());
    io3.ns("/", async || ());
    // io3 never answers
    io2.on_server_side("ping", |(): ()| "pong");
    fixture::settle().await;

    let err = io1.server_side_emit_with_ack("ping", &()).await.unwrap_err();
    match err {
        ServerSideError::Emit(ServerSideEmitError::Timeout {
            ref responses,
            expected,
        }) => {
            assert_eq!(responses.len(), 1);
            assert_eq!(expected, 2);
        }
        err => panic!("unexpected error {err:?}"),
    }
    assert!(
        err.to_string()
            .contains("only 1 responses received out of 2")
    );
}
