//! Command/response protocol with the OBC, including scheduled commands whose responses arrive
//! later over the log channel.

mod client;
mod response;
mod scheduled;

pub use client::{
    CmdOutcome,
    ObcClient,
};
pub use response::{
    ObcResponse,
    PendingResponse,
};
pub use scheduled::{
    Register,
    ScheduledResponses,
    Stop,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("expected a response header")]
    NotResponse,

    #[error("response for command {got:#04x}, expected {expected:#04x}")]
    CmdId { expected: u8, got: u8 },

    #[error("response timestamp {got}, expected {expected}")]
    Timestamp { expected: u32, got: u32 },

    #[error("response carries no response code")]
    MissingCode,

    #[error("unknown response code {0:#04x}")]
    UnknownCode(u8),
}

/// Why the deferred response to a scheduled command will never arrive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unresolved {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("superseded by a later command with the same correlation id")]
    Superseded,

    #[error("scheduled response listener stopped")]
    Dropped,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lookup(#[from] message::LookupError),

    #[error(transparent)]
    Encode(#[from] message::EncodeError),

    #[error(transparent)]
    Header(#[from] message::cmd::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Net(#[from] net::Error),

    #[error(transparent)]
    Mailbox(#[from] actix::MailboxError),

    #[error(transparent)]
    Scheduled(#[from] Unresolved),

    #[error("timed out waiting for response")]
    Timeout,
}
