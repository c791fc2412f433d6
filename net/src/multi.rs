use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use tokio::sync::mpsc::{
    self,
    error::TrySendError,
};

use crate::{
    Error,
    PacketDest,
    PacketSource,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug)]
struct Listeners<T> {
    next_id: u64,
    queues:  Vec<(ListenerId, mpsc::Sender<T>)>,
}

/// Fan-out to any number of bounded queues. A full queue loses the packet rather than holding
/// up the others; a queue whose receiver is gone is removed.
#[derive(Debug)]
pub struct MultiDest<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for MultiDest<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Default for MultiDest<T> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                queues:  vec![],
            })),
        }
    }
}

impl<T> MultiDest<T>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, queue_size: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(queue_size.max(1));

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.queues.push((id, tx));

        Subscription {
            id,
            rx,
        }
    }

    /// Returns whether the listener was still registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.queues.len();
        listeners.queues.retain(|(other, _)| *other != id);

        listeners.queues.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer a packet to every listener without waiting.
    pub fn publish(&self, packet: &T) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);

        listeners.queues.retain(|(id, tx)| match tx.try_send(packet.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(listener = ?id, "listener queue full, dropping packet");
                true
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(listener = ?id, "listener gone");
                false
            },
        });
    }
}

#[async_trait::async_trait]
impl<T> PacketDest<T> for MultiDest<T>
where
    T: Clone + Send + 'static,
{
    async fn write(&mut self, packet: T, _timeout: Option<Duration>) -> Result<(), Error> {
        self.publish(&packet);
        Ok(())
    }
}

/// One listener's queue.
#[derive(Debug)]
pub struct Subscription<T> {
    id: ListenerId,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    #[inline]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The underlying queue, for consumers that want a stream rather than timed reads.
    pub fn into_receiver(self) -> mpsc::Receiver<T> {
        self.rx
    }
}

#[async_trait::async_trait]
impl<T> PacketSource<T> for Subscription<T>
where
    T: Send + 'static,
{
    #[inline]
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<T>, Error> {
        self.rx.read(timeout).await
    }

    fn reset(&mut self) {
        self.rx.reset();
    }
}
