//! Reliable delivery over the radio relay: per-destination sequence numbers, acknowledgements,
//! timed retransmission and a bounded in-flight window.

mod registry;
mod transport;

pub use registry::{
    PacketRegistry,
    RegistryFull,
};
pub use transport::{
    AckSender,
    Inbound,
    Outbound,
    ReliableDest,
    ReliableSource,
    ReliableTransport,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    RegistryFull(#[from] RegistryFull),

    #[error("no destination bound to source {0:#06x}")]
    UnknownSource(u16),

    #[error("transmit pump gone")]
    Closed,
}
