use std::fmt::{
    Display,
    Formatter,
};

use bytes::Bytes;

use crate::{
    cmd,
    comms,
    datagram,
    frame,
    log,
    CmdMessage,
    CommsDatagram,
    LogRecord,
    MessageType,
    SerialDatagram,
    SerialFrame,
};

/// A unit that owns its bytes.
pub trait Packet {
    type Error;

    fn serialize(&self) -> Result<Bytes, Self::Error>;

    /// The payload this packet carries for the layer above it.
    fn extract_data(&self) -> Bytes;
}

impl Packet for SerialFrame {
    type Error = frame::Error;

    fn serialize(&self) -> Result<Bytes, Self::Error> {
        Ok(self.to_bytes())
    }

    fn extract_data(&self) -> Bytes {
        self.payload().clone()
    }
}

impl Packet for SerialDatagram {
    type Error = datagram::Error;

    fn serialize(&self) -> Result<Bytes, Self::Error> {
        Ok(self.to_bytes())
    }

    fn extract_data(&self) -> Bytes {
        self.payload.clone()
    }
}

impl Packet for CommsDatagram {
    type Error = comms::Error;

    fn serialize(&self) -> Result<Bytes, Self::Error> {
        self.to_bytes()
    }

    fn extract_data(&self) -> Bytes {
        self.payload.clone()
    }
}

impl Packet for CmdMessage {
    type Error = cmd::Error;

    fn serialize(&self) -> Result<Bytes, Self::Error> {
        self.to_bytes()
    }

    fn extract_data(&self) -> Bytes {
        self.payload.clone()
    }
}

impl Packet for LogRecord {
    type Error = log::Error;

    fn serialize(&self) -> Result<Bytes, Self::Error> {
        self.to_bytes()
    }

    fn extract_data(&self) -> Bytes {
        self.payload.clone()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] frame::Error),

    #[error(transparent)]
    Datagram(#[from] datagram::Error),

    #[error(transparent)]
    Comms(#[from] comms::Error),

    #[error(transparent)]
    Cmd(#[from] cmd::Error),

    #[error(transparent)]
    Log(#[from] log::Error),
}

/// Any packet of the stack, tagged with its layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPacket {
    Raw(Bytes),
    Frame(SerialFrame),
    Datagram(SerialDatagram),
    Comms(CommsDatagram),
    /// A datagram that travelled inside a relay COMMS datagram.
    Relayed(SerialDatagram),
    Cmd(CmdMessage),
    Log(LogRecord),
}

impl AnyPacket {
    pub fn serialize(&self) -> Result<Bytes, Error> {
        Ok(match self {
            AnyPacket::Raw(b) => b.clone(),
            AnyPacket::Frame(p) => p.serialize()?,
            AnyPacket::Datagram(p) | AnyPacket::Relayed(p) => p.serialize()?,
            AnyPacket::Comms(p) => p.serialize()?,
            AnyPacket::Cmd(p) => p.serialize()?,
            AnyPacket::Log(p) => p.serialize()?,
        })
    }

    pub fn extract_data(&self) -> Bytes {
        match self {
            AnyPacket::Raw(b) => b.clone(),
            AnyPacket::Frame(p) => p.extract_data(),
            AnyPacket::Datagram(p) | AnyPacket::Relayed(p) => p.extract_data(),
            AnyPacket::Comms(p) => p.extract_data(),
            AnyPacket::Cmd(p) => p.extract_data(),
            AnyPacket::Log(p) => p.extract_data(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnyPacket::Raw(_) => "raw",
            AnyPacket::Frame(_) => "frame",
            AnyPacket::Datagram(_) | AnyPacket::Relayed(_) => "datagram",
            AnyPacket::Comms(_) => "comms",
            AnyPacket::Cmd(_) => "cmd",
            AnyPacket::Log(_) => "log",
        }
    }

    /// Parse the packet carried one layer down, if any.
    ///
    /// `relay_obc` is the OBC hardware ID when the bytes came off the radio-relay path, where
    /// the outermost comms-tagged datagram holds a COMMS datagram; `None` for the direct path,
    /// where it holds a command message. The datagram inside a relay COMMS datagram always holds
    /// a command message. Acknowledgements and datagrams for the radio itself have nothing
    /// further to peel.
    pub fn peel(&self, relay_obc: Option<u16>) -> Result<Option<AnyPacket>, Error> {
        let inner = match self {
            AnyPacket::Raw(b) => AnyPacket::Frame(SerialFrame::from_slice(b)?),
            AnyPacket::Frame(f) => AnyPacket::Datagram(SerialDatagram::from_slice(f.payload())?),

            AnyPacket::Datagram(d) => match (d.ty, relay_obc) {
                (MessageType::Log, _) => AnyPacket::Log(LogRecord::from_slice(&d.payload)?),
                (MessageType::Comms, Some(obc)) => AnyPacket::Comms(CommsDatagram::from_slice(&d.payload, obc)?),
                (MessageType::Comms, None) => AnyPacket::Cmd(CmdMessage::from_slice(&d.payload)?),
            },

            AnyPacket::Comms(c) => match relay_obc {
                Some(obc) if c.is_relay(obc) && !c.payload.is_empty() => {
                    AnyPacket::Relayed(SerialDatagram::from_slice(&c.payload)?)
                },
                _ => return Ok(None),
            },

            AnyPacket::Relayed(d) => match d.ty {
                MessageType::Log => AnyPacket::Log(LogRecord::from_slice(&d.payload)?),
                MessageType::Comms => AnyPacket::Cmd(CmdMessage::from_slice(&d.payload)?),
            },

            AnyPacket::Cmd(_) | AnyPacket::Log(_) => return Ok(None),
        };

        Ok(Some(inner))
    }
}

impl Display for AnyPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyPacket::Raw(b) => write!(f, "0x{}", hex::encode(b)),
            AnyPacket::Frame(p) => write!(f, "crc {:#06x} / payload: 0x{}", p.crc(), hex::encode(p.payload())),
            AnyPacket::Datagram(p) | AnyPacket::Relayed(p) => write!(f, "{p}"),
            AnyPacket::Comms(p) => write!(f, "{p}"),
            AnyPacket::Cmd(p) => write!(f, "{} / payload: 0x{}", p.header.summary(), hex::encode(&p.payload)),
            AnyPacket::Log(p) => write!(f, "{p}"),
        }
    }
}
