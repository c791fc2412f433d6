pub use ::tokio_util::codec as tokio_codec;

mod compose;
mod datalink;
mod frame;
mod layer;
mod log;

pub use self::{
    compose::*,
    datalink::*,
    frame::*,
    layer::*,
    log::*,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] message::frame::Error),

    #[error(transparent)]
    Datagram(#[from] message::datagram::Error),

    #[error(transparent)]
    Log(#[from] message::log::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
