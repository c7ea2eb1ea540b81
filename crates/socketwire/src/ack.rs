//! Acknowledgement streams.
//!
//! [`AckStream`] is both a [`Stream`] yielding the ack of every targeted socket and a [`Future`]
//! resolving to the first one, deserialized as `T`.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_core::{FusedFuture, FusedStream, Future, Stream};
use futures_util::stream::FuturesUnordered;
use serde::de::DeserializeOwned;
use socketwire_core::{Sid, Value, adapter::AckStreamItem, packet::Packet, value::from_args};
use tokio::{sync::oneshot::Receiver, time::Timeout};

use crate::{
    adapter::Adapter,
    errors::{AckError, SocketError},
    socket::Socket,
};

pub(crate) type AckResult<T> = Result<T, AckError>;

pin_project_lite::pin_project! {
    /// The ack of one socket, bounded by a timeout.
    pub struct AckResultWithId {
        id: Sid,
        #[pin]
        result: Timeout<Receiver<AckResult<Vec<Value>>>>,
    }
}

impl Future for AckResultWithId {
    type Output = AckStreamItem<AckError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let project = self.project();
        project.result.poll(cx).map(|v| {
            let v = match v {
                Ok(Ok(res)) => res,
                Ok(Err(_)) => Err(AckError::Socket(SocketError::Closed)),
                Err(_) => Err(AckError::Timeout),
            };
            (*project.id, v)
        })
    }
}

pin_project_lite::pin_project! {
    /// The raw acks of one or several local sockets.
    ///
    /// Adapters return it, or wrap it, from [`broadcast_with_ack`](socketwire_core::adapter::CoreAdapter::broadcast_with_ack).
    #[project = InnerProj]
    pub enum AckInnerStream {
        /// The acks of a broadcast
        Stream {
            #[pin]
            rxs: FuturesUnordered<AckResultWithId>,
        },
        /// The ack of a single socket
        Fut {
            #[pin]
            rx: AckResultWithId,
            polled: bool,
        },
    }
}

impl AckInnerStream {
    /// A stream that yields nothing.
    pub fn empty() -> Self {
        AckInnerStream::Stream {
            rxs: FuturesUnordered::new(),
        }
    }

    /// Send the packet to every socket, each with its own ack id, and wait for their acks.
    pub fn broadcast<'a, A: Adapter>(
        packet: Packet,
        sockets: impl Iterator<Item = &'a Arc<Socket<A>>>,
        duration: Duration,
    ) -> (Self, u32) {
        let rxs = FuturesUnordered::new();
        let mut count = 0;
        for socket in sockets {
            let rx = match socket.send_with_ack(packet.clone()) {
                Ok(rx) => rx,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(sid = ?socket.id, "cannot send packet with ack: {_e}");
                    continue;
                }
            };
            rxs.push(AckResultWithId {
                result: tokio::time::timeout(duration, rx),
                id: socket.id,
            });
            count += 1;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("broadcast with ack to {count} sockets");
        (AckInnerStream::Stream { rxs }, count)
    }

    /// Wait for the ack of a single socket.
    pub fn send(rx: Receiver<AckResult<Vec<Value>>>, duration: Duration, id: Sid) -> Self {
        AckInnerStream::Fut {
            polled: false,
            rx: AckResultWithId {
                id,
                result: tokio::time::timeout(duration, rx),
            },
        }
    }
}

impl Stream for AckInnerStream {
    type Item = AckStreamItem<AckError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        use InnerProj::*;

        match self.project() {
            Fut { polled, .. } if *polled => Poll::Ready(None),
            Stream { rxs } => rxs.poll_next(cx),
            Fut { rx, polled } => match rx.poll(cx) {
                Poll::Ready(val) => {
                    *polled = true;
                    Poll::Ready(Some(val))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            AckInnerStream::Stream { rxs } => rxs.size_hint(),
            AckInnerStream::Fut { polled: true, .. } => (0, Some(0)),
            AckInnerStream::Fut { .. } => (1, Some(1)),
        }
    }
}

impl FusedStream for AckInnerStream {
    fn is_terminated(&self) -> bool {
        match self {
            AckInnerStream::Stream { rxs } => rxs.is_terminated(),
            AckInnerStream::Fut { polled, .. } => *polled,
        }
    }
}

pin_project_lite::pin_project! {
    /// A [`Stream`]/[`Future`] of acknowledgements deserialized as `T`.
    ///
    /// * As a [`Stream`] it yields the ack of every targeted socket with its id.
    /// * As a [`Future`] it resolves to the first ack. It is the natural way to
    ///   await the ack of a single socket.
    ///
    /// A socket that does not answer in time yields [`AckError::Timeout`], and an
    /// ack that does not deserialize as `T` yields [`AckError::Decode`].
    ///
    /// ```no_run
    /// # use socketwire::{SocketIo, extract::SocketRef};
    /// # use futures_util::StreamExt;
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     let ack = socket.emit_with_ack::<_, String>("hello", "world").unwrap().await;
    ///     println!("ack: {ack:?}");
    ///
    ///     socket.broadcast().emit_with_ack::<_, String>("hello", "everyone")
    ///         .await
    ///         .unwrap()
    ///         .for_each(|(id, ack)| async move { println!("{id}: {ack:?}") })
    ///         .await;
    /// });
    /// ```
    #[must_use = "futures and streams do nothing unless you `.await` or poll them"]
    pub struct AckStream<T, S = AckInnerStream> {
        #[pin]
        inner: S,
        _marker: std::marker::PhantomData<fn() -> T>,
    }
}

impl<T, S> AckStream<T, S> {
    pub(crate) fn new(inner: S) -> Self {
        AckStream {
            inner,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, S> Stream for AckStream<T, S>
where
    T: DeserializeOwned,
    S: Stream<Item = AckStreamItem<AckError>>,
{
    type Item = (Sid, AckResult<T>);

    #[inline]
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|v| v.map(|(id, v)| (id, decode_ack(v))))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T, S> FusedStream for AckStream<T, S>
where
    T: DeserializeOwned,
    S: FusedStream<Item = AckStreamItem<AckError>>,
{
    #[inline]
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl<T, S> Future for AckStream<T, S>
where
    T: DeserializeOwned,
    S: Stream<Item = AckStreamItem<AckError>>,
{
    type Output = AckResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.poll_next(cx) {
            Poll::Ready(Some((_, v))) => Poll::Ready(decode_ack(v)),
            // Nobody was targeted, so nobody will answer.
            Poll::Ready(None) => Poll::Ready(Err(AckError::Socket(SocketError::Closed))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, S> FusedFuture for AckStream<T, S>
where
    T: DeserializeOwned,
    S: FusedStream<Item = AckStreamItem<AckError>>,
{
    #[inline]
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

fn decode_ack<T: DeserializeOwned>(ack: AckResult<Vec<Value>>) -> AckResult<T> {
    ack.and_then(|args| from_args(args).map_err(AckError::Decode))
}
