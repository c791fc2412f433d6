//! Wire types shared by every layer of the ground link.
//!
//! Each unit that travels the stack (frame, datagram, COMMS datagram, command message, log
//! record) owns its bytes and implements [`Packet`]. [`AnyPacket`] is the tagged union used
//! where the layer of a packet is only known at runtime.

pub mod catalogue;
pub mod checksum;
pub mod cmd;
pub mod comms;
pub mod datagram;
pub mod frame;
pub mod log;
mod packet;
mod value;

pub use catalogue::{
    Catalogue,
    CatalogueError,
    CmdKey,
    CommandSpec,
    DecodeError,
    EncodeError,
    FieldDef,
    FieldKind,
    LogSpec,
    LookupError,
    Specification,
};
pub use checksum::{
    Checksum,
    FrameCrc,
};
pub use cmd::{
    CmdHeader,
    CmdMessage,
    CorrelationId,
    ExecTime,
    ResponseCode,
};
pub use comms::{
    CommsDatagram,
    OBC_HWID,
};
pub use datagram::{
    MessageType,
    SerialDatagram,
};
pub use frame::SerialFrame;
pub use log::{
    Level,
    LogHeader,
    LogId,
    LogRecord,
};
pub use packet::{
    AnyPacket,
    Error as PacketError,
    Packet,
};
pub use value::{
    Fields,
    Value,
};
