use message::LogRecord;
use net::{
    ListenerId,
    MultiDest,
    PacketSource,
    Subscription,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fan-out point for decoded log records. Every listener gets its own bounded queue; a slow
/// listener loses records instead of stalling the others.
#[derive(Debug, Clone, Default)]
pub struct LogHub {
    dest: MultiDest<LogRecord>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_log_listener(&self, queue_size: usize) -> Subscription<LogRecord> {
        let sub = self.dest.subscribe(queue_size);
        tracing::debug!(listener = ?sub.id(), queue_size, "log listener added");

        sub
    }

    /// Returns whether the listener was still registered.
    pub fn remove_log_listener(&self, id: ListenerId) -> bool {
        self.dest.unsubscribe(id)
    }

    #[inline]
    pub fn listeners(&self) -> usize {
        self.dest.len()
    }

    /// Publish every record `source` yields until cancelled or the source closes.
    pub fn spawn_pump<S>(&self, mut source: S, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: PacketSource<LogRecord> + 'static,
    {
        let dest = self.dest.clone();

        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    _ = cancel.cancelled() => break,
                    record = source.read(None) => record,
                };

                match record {
                    Ok(Some(record)) => {
                        tracing::trace!(%record, "log");
                        dest.publish(&record);
                    },
                    Ok(None) => {},
                    Err(net::Error::Closed) => {
                        tracing::debug!("log channel closed");
                        break;
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "log decoding failed");
                        source.reset();
                    },
                }
            }

            tracing::debug!("log pump stopped");
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use message::{
        Level,
        LogHeader,
        LogId,
    };
    use tokio::sync::mpsc;

    use super::*;

    fn record(signal: u8) -> LogRecord {
        LogRecord::raw(&LogHeader::new(7, Level::Info, LogId::new(1, signal), 0), Bytes::new())
    }

    #[tokio::test]
    async fn every_listener_sees_every_record() -> eyre::Result<()> {
        let hub = LogHub::new();
        let mut a = hub.add_log_listener(8);
        let mut b = hub.add_log_listener(8);

        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let pump = hub.spawn_pump(rx, cancel.clone());

        for signal in 0..3 {
            tx.send(record(signal)).await?;
        }

        for sub in [&mut a, &mut b] {
            for signal in 0..3 {
                let got = sub.read(Some(Duration::from_secs(1))).await?.unwrap();
                assert_eq!(got.id, LogId::new(1, signal));
            }
        }

        assert!(hub.remove_log_listener(b.id()));
        assert!(!hub.remove_log_listener(b.id()));
        assert_eq!(hub.listeners(), 1);

        tx.send(record(9)).await?;
        assert!(a.read(Some(Duration::from_secs(1))).await?.is_some());
        assert!(matches!(b.read(Some(Duration::from_millis(20))).await, Err(net::Error::Closed)));

        cancel.cancel();
        pump.await?;

        Ok(())
    }

    #[tokio::test]
    async fn pump_ends_with_its_source() -> eyre::Result<()> {
        let hub = LogHub::new();
        let (tx, rx) = mpsc::channel::<LogRecord>(1);

        let pump = hub.spawn_pump(rx, CancellationToken::new());
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), pump).await??;

        Ok(())
    }
}
