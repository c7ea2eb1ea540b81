use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{self, Poll},
    time::Duration,
};

use futures_core::{FusedStream, Stream};
use futures_util::{StreamExt, stream::TakeUntil};
use pin_project_lite::pin_project;
use socketwire_core::{Sid, adapter::AckStreamItem, adapter::remote_packet::MessageData};
use tokio::{sync::mpsc, time};

/// The pending requests of an adapter, by request id.
pub(crate) type Responses = Arc<Mutex<HashMap<Sid, mpsc::Sender<MessageData>>>>;

pin_project! {
    /// The responses to a request. The request is forgotten when the stream is dropped,
    /// later responses are then ignored.
    pub struct ResponseStream {
        #[pin]
        rx: mpsc::Receiver<MessageData>,
        req_id: Sid,
        responses: Responses,
    }
    impl PinnedDrop for ResponseStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            this.responses.lock().unwrap().remove(this.req_id);
        }
    }
}

impl ResponseStream {
    /// Register a request. It must be done before publishing it,
    /// a fast server could answer before the registration otherwise.
    pub fn register(responses: &Responses, req_id: Sid, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        responses.lock().unwrap().insert(req_id, tx);
        Self {
            rx,
            req_id,
            responses: responses.clone(),
        }
    }

    /// A stream without any response.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            rx,
            req_id: Sid::ZERO,
            responses: Responses::default(),
        }
    }
}

impl Stream for ResponseStream {
    type Item = MessageData;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rx.poll_recv(cx)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("req_id", &self.req_id)
            .finish()
    }
}

pin_project! {
    /// The acks of a broadcast: the acks of the local sockets merged with
    /// the ones forwarded by the other servers.
    ///
    /// Each remote server first sends the number of sockets it reached, then their acks.
    /// The remote part ends when every server sent its count and every counted ack arrived,
    /// or when the timeout is reached.
    pub struct AckStream<S> {
        #[pin]
        local: S,
        #[pin]
        remote: TakeUntil<ResponseStream, time::Sleep>,
        // Acks announced and not yet received.
        ack_count: u32,
        // Servers that did not send their count yet.
        server_count: usize,
        local_done: bool,
        remote_done: bool,
    }
}

impl<S> AckStream<S> {
    pub fn new(local: S, remote: ResponseStream, timeout: Duration, server_count: usize) -> Self {
        Self {
            local,
            remote: remote.take_until(time::sleep(timeout)),
            ack_count: 0,
            server_count,
            local_done: false,
            remote_done: server_count == 0,
        }
    }

    pub fn new_local(local: S) -> Self {
        Self::new(local, ResponseStream::empty(), Duration::ZERO, 0)
    }
}

impl<S, E> AckStream<S>
where
    S: Stream<Item = AckStreamItem<E>>,
{
    fn poll_remote(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<S::Item>> {
        let mut this = self.project();
        loop {
            if *this.server_count == 0 && *this.ack_count == 0 {
                *this.remote_done = true;
            }
            if *this.remote_done {
                return Poll::Ready(None);
            }
            match this.remote.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    tracing::debug!(
                        missing_servers = *this.server_count,
                        missing_acks = *this.ack_count,
                        "broadcast ack timeout"
                    );
                    *this.remote_done = true;
                }
                Poll::Ready(Some(MessageData::BroadcastClientCount { client_count, .. }))
                    if *this.server_count > 0 =>
                {
                    *this.ack_count += client_count;
                    *this.server_count -= 1;
                }
                Poll::Ready(Some(MessageData::BroadcastAck { sid, response, .. }))
                    if *this.ack_count > 0 =>
                {
                    *this.ack_count -= 1;
                    return Poll::Ready(Some((sid, Ok(response))));
                }
                Poll::Ready(Some(data)) => {
                    tracing::warn!(kind = ?data.message_type(), "unexpected broadcast response");
                }
            }
        }
    }
}

impl<S, E> Stream for AckStream<S>
where
    S: Stream<Item = AckStreamItem<E>>,
{
    type Item = AckStreamItem<E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.local_done {
            let this = self.as_mut().project();
            match this.local.poll_next(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => *this.local_done = true,
                Poll::Pending => {}
            }
        }
        match self.as_mut().poll_remote(cx) {
            Poll::Ready(None) if !self.local_done => Poll::Pending,
            res => res,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.local.size_hint();
        let remote = self.ack_count as usize;
        let upper = upper.filter(|_| self.server_count == 0);
        (lower + remote, upper.map(|upper| upper + remote))
    }
}

impl<S, E> FusedStream for AckStream<S>
where
    S: Stream<Item = AckStreamItem<E>>,
{
    fn is_terminated(&self) -> bool {
        self.local_done && self.remote_done
    }
}

impl<S> fmt::Debug for AckStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckStream")
            .field("ack_count", &self.ack_count)
            .field("server_count", &self.server_count)
            .field("local_done", &self.local_done)
            .field("remote_done", &self.remote_done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use socketwire_core::Value;

    use super::*;

    type Item = AckStreamItem<std::io::Error>;

    fn remote(responses: &Responses) -> (ResponseStream, mpsc::Sender<MessageData>) {
        let req_id = Sid::new();
        let stream = ResponseStream::register(responses, req_id, 16);
        let tx = responses.lock().unwrap().get(&req_id).unwrap().clone();
        (stream, tx)
    }

    fn count(client_count: u32) -> MessageData {
        MessageData::BroadcastClientCount {
            request_id: Sid::ZERO,
            client_count,
        }
    }

    fn ack(sid: Sid) -> MessageData {
        MessageData::BroadcastAck {
            request_id: Sid::ZERO,
            sid,
            response: vec![Value::from("ok")],
        }
    }

    #[tokio::test]
    async fn merges_local_and_remote_acks() {
        let responses = Responses::default();
        let (remote, tx) = remote(&responses);
        let local_sid = Sid::new();
        let local: [Item; 1] = [(local_sid, Ok(vec![]))];
        let local = stream::iter(local);
        let stream = AckStream::new(local, remote, Duration::from_secs(5), 2);

        let remote_sids = [Sid::new(), Sid::new(), Sid::new()];
        tx.send(count(2)).await.unwrap();
        tx.send(ack(remote_sids[0])).await.unwrap();
        tx.send(count(1)).await.unwrap();
        tx.send(ack(remote_sids[1])).await.unwrap();
        tx.send(ack(remote_sids[2])).await.unwrap();

        let sids: Vec<Sid> = stream
            .map(|(sid, res)| {
                assert!(res.is_ok());
                sid
            })
            .collect()
            .await;
        assert_eq!(sids, [local_sid, remote_sids[0], remote_sids[1], remote_sids[2]]);
    }

    #[tokio::test]
    async fn unannounced_acks_are_ignored() {
        let responses = Responses::default();
        let (remote, tx) = remote(&responses);
        let stream = AckStream::new(stream::empty::<Item>(), remote, Duration::from_secs(5), 1);
        let mut stream = std::pin::pin!(stream);

        tx.send(ack(Sid::new())).await.unwrap();
        tx.send(count(1)).await.unwrap();
        let sid = Sid::new();
        tx.send(ack(sid)).await.unwrap();

        assert_eq!(stream.next().await.unwrap().0, sid);
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_timeout() {
        let responses = Responses::default();
        let (remote, tx) = remote(&responses);
        let stream = AckStream::new(stream::empty::<Item>(), remote, Duration::from_millis(50), 2);
        let mut stream = std::pin::pin!(stream);
        tx.send(count(3)).await.unwrap();

        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn dropped_request_is_forgotten() {
        let responses = Responses::default();
        let (stream, _tx) = remote(&responses);
        assert_eq!(responses.lock().unwrap().len(), 1);
        drop(stream);
        assert!(responses.lock().unwrap().is_empty());
    }
}
