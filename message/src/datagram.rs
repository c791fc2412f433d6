use std::fmt::{
    Display,
    Formatter,
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};
use packed_struct::prelude::*;

use crate::frame;

/// Largest payload a datagram can carry inside one frame.
pub const MAX_PAYLOAD: usize = frame::MAX_PAYLOAD - 1;

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum MessageType {
    Log   = 0x00,
    Comms = 0x01,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("empty datagram")]
    Empty,

    #[error("unknown datagram type tag {0:#04x}")]
    UnknownType(u8),

    #[error("datagram payload of {0} bytes exceeds {}", MAX_PAYLOAD)]
    TooLarge(usize),
}

/// Datalink unit: a one-byte type tag followed by the upper layer's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialDatagram {
    pub ty:      MessageType,
    pub payload: Bytes,
}

impl SerialDatagram {
    pub fn new(ty: MessageType, payload: impl Into<Bytes>) -> Result<Self, Error> {
        let payload = payload.into();

        if payload.len() > MAX_PAYLOAD {
            return Err(Error::TooLarge(payload.len()));
        }

        Ok(Self {
            ty,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.payload.len() + 1);

        out.put_u8(self.ty.to_primitive());
        out.put_slice(&self.payload);

        out.freeze()
    }

    pub fn from_slice(src: &[u8]) -> Result<Self, Error> {
        let (&tag, payload) = src.split_first().ok_or(Error::Empty)?;
        let ty = MessageType::from_primitive(tag).ok_or(Error::UnknownType(tag))?;

        Self::new(ty, Bytes::copy_from_slice(payload))
    }
}

impl Display for SerialDatagram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} / payload: 0x{}", self.ty, hex::encode(&self.payload))
    }
}
