//! Routing primitives connecting the layers of the stack.
//!
//! Every hop between components is a [`PacketSource`] or [`PacketDest`]: reads and writes
//! take an optional timeout, and a read that times out yields `Ok(None)` rather than an error.

use std::time::Duration;

use tokio::time::Instant;

pub use self::{
    byte_stream::ByteStream,
    demux::Demux,
    multi::{
        ListenerId,
        MultiDest,
        Subscription,
    },
    packet::{
        PacketDest,
        PacketSource,
    },
    protocol::{
        ProtocolDest,
        ProtocolSource,
    },
};

mod byte_stream;
mod demux;
mod multi;
mod packet;
mod protocol;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("remote end of channel closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("protocol layer failed: {0}")]
    Layer(#[source] BoxError),
}

/// Absolute deadline for an operation given its relative timeout.
#[inline]
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// What is left of the timeout of an operation started with [`deadline`].
#[inline]
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}
