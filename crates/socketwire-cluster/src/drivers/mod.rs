//! Drivers carry the messages of the cluster adapter between servers.
//!
//! A driver provides two things:
//! * named pub/sub channels, where a published message reaches every current subscriber,
//! * an attachment store for messages that are too big or too binary for the channels
//!   of some backends (a PostgreSQL `NOTIFY` payload is limited to 8000 bytes of text).
//!
//! Clones of a driver must share their subscriptions. The [`MemoryDriver`] connects
//! servers living in the same process.
use std::{
    future::Future,
    pin::Pin,
    task::{self, Poll},
};

use futures_core::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;

mod memory;

pub use memory::MemoryDriver;

pin_project! {
    /// A stream of messages received from a channel.
    #[derive(Debug)]
    pub struct MessageStream {
        #[pin]
        rx: mpsc::Receiver<Vec<u8>>,
    }
}

impl MessageStream {
    /// Create a stream fed by the given receiver.
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

impl Stream for MessageStream {
    type Item = Vec<u8>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rx.poll_recv(cx)
    }
}

/// The transport of the cluster adapter.
pub trait Driver: Clone + Send + Sync + 'static {
    /// The error of the driver.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a message to a channel.
    fn publish(
        &self,
        chan: &str,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Subscribe to a channel. Messages published once this future resolved are received.
    fn subscribe(
        &self,
        chan: String,
    ) -> impl Future<Output = Result<MessageStream, Self::Error>> + Send;

    /// Stop every subscription of this driver to a channel.
    fn unsubscribe(&self, chan: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Store a payload and return its id.
    fn store_attachment(
        &self,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Get a stored payload. Attachments may expire, in which case `None` is returned.
    fn fetch_attachment(
        &self,
        id: u64,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;
}
