use bytes::Bytes;
use message::{
    comms::MAX_RELAYED_PAYLOAD,
    datagram,
    MessageType,
    SerialDatagram,
    SerialFrame,
};

/// Wraps upper-layer bytes into datagrams carrying a fixed type tag, splitting payloads that
/// exceed `capacity` across consecutive datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatalinkTx {
    ty:       MessageType,
    capacity: usize,
}

impl DatalinkTx {
    /// For datagrams that go straight into a frame.
    pub fn direct(ty: MessageType) -> Self {
        Self {
            ty,
            capacity: datagram::MAX_PAYLOAD,
        }
    }

    /// For datagrams that ride inside a relay COMMS datagram.
    pub fn relayed(ty: MessageType) -> Self {
        Self {
            ty,
            capacity: MAX_RELAYED_PAYLOAD,
        }
    }

    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl crate::ProtocolLayer for DatalinkTx {
    type Error = crate::Error;
    type Input = Bytes;
    type Output = Bytes;

    fn transform(&mut self, input: Bytes) -> Result<Vec<Bytes>, crate::Error> {
        input
            .chunks(self.capacity)
            .map(|chunk| {
                let dg = SerialDatagram::new(self.ty, Bytes::copy_from_slice(chunk))?;
                Ok::<_, crate::Error>(dg.to_bytes())
            })
            .collect()
    }
}

/// Strips the type tag off each frame's payload. Frames with unknown tags are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatalinkRx;

impl crate::ProtocolLayer for DatalinkRx {
    type Error = crate::Error;
    type Input = SerialFrame;
    type Output = SerialDatagram;

    fn transform(&mut self, input: SerialFrame) -> Result<Vec<SerialDatagram>, crate::Error> {
        match SerialDatagram::from_slice(input.payload()) {
            Ok(dg) => Ok(vec![dg]),
            Err(e) => {
                tracing::debug!(error = %e, payload = %hex::encode(input.payload()), "dropping datagram");
                Ok(vec![])
            },
        }
    }
}

/// Which downstream channel a datagram belongs to.
#[inline]
pub fn route(dg: &SerialDatagram) -> MessageType {
    dg.ty
}
