//! The running side of the stack: reliable delivery over the radio relay, the OBC command
//! client, log fan-out, and [`Link`], which wires all of it onto a serial connection.

pub mod app;
pub mod config;
mod link;
mod logs;
pub mod reliable;

pub use config::{
    LinkConfig,
    RelayConfig,
};
pub use link::Link;
pub use logs::LogHub;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("opening serial port: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error(transparent)]
    Net(#[from] net::Error),

    #[error("link is not running over a radio relay")]
    NotRelayed,
}
