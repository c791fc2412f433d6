use std::time::Duration;

use bytes::Bytes;
use message::{
    MessageType,
    SerialDatagram,
};

use crate::{
    Error,
    PacketDest,
};

/// Routes each datagram's payload to the log or the comms destination according to its tag.
pub struct Demux<L, C> {
    log:   L,
    comms: C,
}

impl<L, C> Demux<L, C> {
    pub fn new(log: L, comms: C) -> Self {
        Self {
            log,
            comms,
        }
    }
}

#[async_trait::async_trait]
impl<L, C> PacketDest<SerialDatagram> for Demux<L, C>
where
    L: PacketDest<Bytes>,
    C: PacketDest<Bytes>,
{
    #[tracing::instrument(level = "trace", skip_all, fields(ty = ?packet.ty, len = packet.payload.len()))]
    async fn write(&mut self, packet: SerialDatagram, timeout: Option<Duration>) -> Result<(), Error> {
        match codec::route(&packet) {
            MessageType::Log => self.log.write(packet.payload, timeout).await,
            MessageType::Comms => self.comms.write(packet.payload, timeout).await,
        }
    }

    fn reset(&mut self) {
        self.log.reset();
        self.comms.reset();
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;
    use tokio::sync::mpsc;

    use super::*;
    use crate::PacketSource;

    #[tokio::test]
    async fn routes_every_datagram_once() -> eyre::Result<()> {
        const N: usize = 10_000;

        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        let (comms_tx, mut comms_rx) = mpsc::unbounded_channel();
        let mut demux = Demux::new(log_tx, comms_tx);

        let mut rng = rand::thread_rng();
        let mut expected_log = vec![];
        let mut expected_comms = vec![];

        for i in 0..N {
            let ty = if rng.gen() {
                MessageType::Log
            } else {
                MessageType::Comms
            };

            let payload = Bytes::copy_from_slice(&(i as u32).to_be_bytes());
            match ty {
                MessageType::Log => expected_log.push(payload.clone()),
                MessageType::Comms => expected_comms.push(payload.clone()),
            }

            demux.write(SerialDatagram::new(ty, payload)?, None).await?;
        }
        drop(demux);

        let mut got_log = vec![];
        while let Ok(Some(b)) = log_rx.read(None).await {
            got_log.push(b);
        }

        let mut got_comms = vec![];
        while let Ok(Some(b)) = comms_rx.read(None).await {
            got_comms.push(b);
        }

        assert_eq!(got_log, expected_log);
        assert_eq!(got_comms, expected_comms);
        assert_eq!(got_log.len() + got_comms.len(), N);

        Ok(())
    }
}
