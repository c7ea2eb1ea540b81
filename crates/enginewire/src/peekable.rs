use tokio::sync::mpsc::{Receiver, error::TryRecvError};

/// A [`Receiver`] able to look at the next item without consuming it.
///
/// The polling transport peeks at queued packets to know if they still fit
/// in the current payload.
#[derive(Debug)]
pub struct PeekableReceiver<T> {
    rx: Receiver<T>,
    next: Option<T>,
}

impl<T> PeekableReceiver<T> {
    pub fn new(rx: Receiver<T>) -> Self {
        Self { rx, next: None }
    }

    pub fn peek(&mut self) -> Option<&T> {
        if self.next.is_none() {
            self.next = self.rx.try_recv().ok();
        }
        self.next.as_ref()
    }

    pub async fn recv(&mut self) -> Option<T> {
        match self.next.take() {
            Some(item) => Some(item),
            None => self.rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        match self.next.take() {
            Some(item) => Ok(item),
            None => self.rx.try_recv(),
        }
    }

    pub fn close(&mut self) {
        self.rx.close()
    }
}

#[cfg(test)]
mod tests {
    use enginewire_core::Packet;
    use tokio::sync::mpsc::channel;

    use super::PeekableReceiver;

    #[tokio::test]
    async fn peek_then_recv() {
        let (tx, rx) = channel(2);
        let mut rx = PeekableReceiver::new(rx);
        assert!(rx.peek().is_none());

        tx.send(Packet::Ping).await.unwrap();
        tx.send(Packet::Pong).await.unwrap();
        assert_eq!(rx.peek(), Some(&Packet::Ping));
        assert_eq!(rx.peek(), Some(&Packet::Ping));
        assert_eq!(rx.recv().await, Some(Packet::Ping));
        assert_eq!(rx.try_recv().unwrap(), Packet::Pong);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_keeps_peeked_item() {
        let (tx, rx) = channel(1);
        let mut rx = PeekableReceiver::new(rx);
        tx.send(Packet::Noop).await.unwrap();
        rx.peek();
        rx.close();
        assert!(tx.is_closed());
        assert_eq!(rx.recv().await, Some(Packet::Noop));
        assert_eq!(rx.recv().await, None);
    }
}
