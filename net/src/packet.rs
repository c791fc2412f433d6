use std::time::Duration;

use tokio::sync::mpsc;

use crate::Error;

#[async_trait::async_trait]
pub trait PacketSource<T>: Send {
    /// Next packet, or `Ok(None)` once `timeout` elapses. `None` waits indefinitely.
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<T>, Error>;

    /// Discard anything buffered but not yet read.
    fn reset(&mut self) {}
}

#[async_trait::async_trait]
pub trait PacketDest<T>: Send {
    /// Hand off a packet, failing with [`Error::Timeout`] if that takes longer than `timeout`.
    async fn write(&mut self, packet: T, timeout: Option<Duration>) -> Result<(), Error>;

    fn reset(&mut self) {}
}

#[async_trait::async_trait]
impl<T, S> PacketSource<T> for Box<S>
where
    T: Send + 'static,
    S: PacketSource<T> + ?Sized,
{
    #[inline]
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<T>, Error> {
        (**self).read(timeout).await
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset()
    }
}

#[async_trait::async_trait]
impl<T, D> PacketDest<T> for Box<D>
where
    T: Send + 'static,
    D: PacketDest<T> + ?Sized,
{
    #[inline]
    async fn write(&mut self, packet: T, timeout: Option<Duration>) -> Result<(), Error> {
        (**self).write(packet, timeout).await
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset()
    }
}

#[async_trait::async_trait]
impl<T> PacketSource<T> for mpsc::Receiver<T>
where
    T: Send + 'static,
{
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<T>, Error> {
        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.recv()).await {
                Ok(received) => received,
                Err(_elapsed) => return Ok(None),
            },
            None => self.recv().await,
        };

        received.map(Some).ok_or(Error::Closed)
    }

    fn reset(&mut self) {
        while self.try_recv().is_ok() {}
    }
}

#[async_trait::async_trait]
impl<T> PacketSource<T> for mpsc::UnboundedReceiver<T>
where
    T: Send + 'static,
{
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<T>, Error> {
        let received = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.recv()).await {
                Ok(received) => received,
                Err(_elapsed) => return Ok(None),
            },
            None => self.recv().await,
        };

        received.map(Some).ok_or(Error::Closed)
    }

    fn reset(&mut self) {
        while self.try_recv().is_ok() {}
    }
}

#[async_trait::async_trait]
impl<T> PacketDest<T> for mpsc::Sender<T>
where
    T: Send + 'static,
{
    async fn write(&mut self, packet: T, timeout: Option<Duration>) -> Result<(), Error> {
        match timeout {
            Some(timeout) => self.send_timeout(packet, timeout).await.map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => Error::Timeout,
                mpsc::error::SendTimeoutError::Closed(_) => Error::Closed,
            }),
            None => self.send(packet).await.map_err(|_| Error::Closed),
        }
    }
}

#[async_trait::async_trait]
impl<T> PacketDest<T> for mpsc::UnboundedSender<T>
where
    T: Send + 'static,
{
    async fn write(&mut self, packet: T, _timeout: Option<Duration>) -> Result<(), Error> {
        self.send(packet).map_err(|_| Error::Closed)
    }
}
