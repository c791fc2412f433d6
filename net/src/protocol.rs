use std::{
    collections::VecDeque,
    time::Duration,
};

use codec::ProtocolLayer;

use crate::{
    deadline,
    remaining,
    BoxError,
    Error,
    PacketDest,
    PacketSource,
};

/// Reads from an upstream source through a protocol layer. Outputs completed by one upstream
/// packet are queued and handed out one per `read`.
pub struct ProtocolSource<S, L>
where
    L: ProtocolLayer,
{
    upstream: S,
    layer:    L,
    pending:  VecDeque<L::Output>,
}

impl<S, L> ProtocolSource<S, L>
where
    L: ProtocolLayer,
{
    pub fn new(upstream: S, layer: L) -> Self {
        Self {
            upstream,
            layer,
            pending: VecDeque::new(),
        }
    }

    #[inline]
    pub fn layer(&self) -> &L {
        &self.layer
    }
}

#[async_trait::async_trait]
impl<S, L> PacketSource<L::Output> for ProtocolSource<S, L>
where
    S: PacketSource<L::Input>,
    L: ProtocolLayer + Send,
    L::Input: Send + 'static,
    L::Output: Send + 'static,
    L::Error: Into<BoxError>,
{
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<L::Output>, Error> {
        let deadline = deadline(timeout);

        loop {
            if let Some(out) = self.pending.pop_front() {
                return Ok(Some(out));
            }

            let Some(input) = self.upstream.read(remaining(deadline)).await? else {
                return Ok(None);
            };

            let outputs = self.layer.transform(input).map_err(|e| Error::Layer(e.into()))?;
            self.pending.extend(outputs);
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.upstream.reset();
    }
}

/// Writes to a downstream destination through a protocol layer.
pub struct ProtocolDest<D, L> {
    downstream: D,
    layer:      L,
}

impl<D, L> ProtocolDest<D, L>
where
    L: ProtocolLayer,
    D: PacketDest<L::Output>,
    L::Output: Send + 'static,
    L::Error: Into<BoxError>,
{
    pub fn new(downstream: D, layer: L) -> Self {
        Self {
            downstream,
            layer,
        }
    }

    /// Push anything the layer buffered downstream.
    pub async fn flush(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let outputs = self.layer.flush().map_err(|e| Error::Layer(e.into()))?;
        self.write_all(outputs, timeout).await
    }

    async fn write_all(&mut self, outputs: Vec<L::Output>, timeout: Option<Duration>) -> Result<(), Error> {
        let deadline = deadline(timeout);

        for out in outputs {
            self.downstream.write(out, remaining(deadline)).await?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<D, L> PacketDest<L::Input> for ProtocolDest<D, L>
where
    D: PacketDest<L::Output>,
    L: ProtocolLayer + Send,
    L::Input: Send + 'static,
    L::Output: Send + 'static,
    L::Error: Into<BoxError>,
{
    async fn write(&mut self, packet: L::Input, timeout: Option<Duration>) -> Result<(), Error> {
        let outputs = self.layer.transform(packet).map_err(|e| Error::Layer(e.into()))?;
        self.write_all(outputs, timeout).await
    }

    fn reset(&mut self) {
        self.downstream.reset();
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use codec::{
        DatalinkRx,
        DatalinkTx,
        DecoderLayer,
        EncoderLayer,
        FrameCodec,
        ProtocolLayerExt,
    };
    use message::MessageType;
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn layered_round_trip() -> eyre::Result<()> {
        let (raw_tx, raw_rx) = mpsc::channel::<Bytes>(16);

        let tx_layer = DatalinkTx::direct(MessageType::Comms)
            .then(EncoderLayer::<FrameCodec, Bytes>::new(FrameCodec::new()));
        let mut dest = ProtocolDest::new(raw_tx, tx_layer);

        let rx_layer = DecoderLayer::new(FrameCodec::new()).then(DatalinkRx);
        let mut source = ProtocolSource::new(raw_rx, rx_layer);

        dest.write(Bytes::from(vec![3; 400]), None).await?;
        dest.flush(None).await?;

        let first = source.read(Some(Duration::from_secs(1))).await?.unwrap();
        let second = source.read(Some(Duration::from_secs(1))).await?.unwrap();

        assert_eq!(first.ty, MessageType::Comms);
        assert_eq!(first.payload.len() + second.payload.len(), 400);
        assert!(source.read(Some(Duration::from_millis(10))).await?.is_none());

        Ok(())
    }
}
