use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    fmt,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{broadcast, mpsc},
    task::AbortHandle,
};

use super::{Driver, MessageStream};

/// The number of messages a slow subscriber can lag behind before losing some.
const CHANNEL_CAPACITY: usize = 1024;
/// The number of attachments kept, the oldest ones are dropped first.
const MAX_ATTACHMENTS: usize = 1024;

#[derive(Default)]
struct Hub {
    channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    attachments: Mutex<BTreeMap<u64, Vec<u8>>>,
    next_attachment: AtomicU64,
}

/// An in-process driver. Every driver connected to the same hub, with
/// [`MemoryDriver::connect`], is a server of the same cluster.
///
/// ```
/// use socketwire_cluster::{ClusterAdapterCtr, drivers::MemoryDriver};
///
/// let driver = MemoryDriver::new();
/// let server1 = ClusterAdapterCtr::new(driver.clone());
/// let server2 = ClusterAdapterCtr::new(driver.connect());
/// ```
#[derive(Clone)]
pub struct MemoryDriver {
    hub: Arc<Hub>,
    subscriptions: Arc<Mutex<HashMap<String, Vec<AbortHandle>>>>,
}

impl MemoryDriver {
    /// Create a driver on a new hub.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            subscriptions: Arc::default(),
        }
    }

    /// Create another driver on the same hub, with its own subscriptions.
    pub fn connect(&self) -> Self {
        Self {
            hub: self.hub.clone(),
            subscriptions: Arc::default(),
        }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscriptions = self.subscriptions.lock().unwrap();
        f.debug_struct("MemoryDriver")
            .field("subscriptions", &subscriptions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Driver for MemoryDriver {
    type Error = Infallible;

    async fn publish(&self, chan: &str, data: Vec<u8>) -> Result<(), Self::Error> {
        if let Some(tx) = self.hub.channels.read().unwrap().get(chan) {
            // No receiver means no subscriber, the message is dropped.
            tx.send(data).ok();
        }
        Ok(())
    }

    async fn subscribe(&self, chan: String) -> Result<MessageStream, Self::Error> {
        let mut rx = self
            .hub
            .channels
            .write()
            .unwrap()
            .entry(chan.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let (tx, stream_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let chan_name = chan.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(data) => {
                        if tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(chan = %chan_name, "subscriber lagged, {n} messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions
            .lock()
            .unwrap()
            .entry(chan)
            .or_default()
            .push(task.abort_handle());
        Ok(MessageStream::new(stream_rx))
    }

    async fn unsubscribe(&self, chan: &str) -> Result<(), Self::Error> {
        let tasks = self.subscriptions.lock().unwrap().remove(chan);
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        Ok(())
    }

    async fn store_attachment(&self, data: Vec<u8>) -> Result<u64, Self::Error> {
        let id = self.hub.next_attachment.fetch_add(1, Ordering::Relaxed);
        let mut attachments = self.hub.attachments.lock().unwrap();
        attachments.insert(id, data);
        while attachments.len() > MAX_ATTACHMENTS {
            attachments.pop_first();
        }
        Ok(id)
    }

    async fn fetch_attachment(&self, id: u64) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.hub.attachments.lock().unwrap().get(&id).cloned())
    }
}
