use std::fmt::{
    Display,
    Formatter,
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};
use chrono::{
    DateTime,
    TimeZone,
    Utc,
};
use packed_struct::prelude::*;

const RESP_BIT: u32 = 0x8000_0000;
pub const MAX_DATA_LEN: u32 = !RESP_BIT;

/// When the OBC should execute a command.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecTime {
    Immediate,
    At(DateTime<Utc>),
}

impl ExecTime {
    /// Wire value of [`ExecTime::Immediate`].
    pub const IMMEDIATE: u32 = 0;

    /// Seconds since the Unix epoch. Scheduled times never collide with the immediate sentinel.
    pub fn timestamp(&self) -> u32 {
        match self {
            ExecTime::Immediate => Self::IMMEDIATE,
            ExecTime::At(t) => t.timestamp().clamp(1, u32::MAX as i64) as u32,
        }
    }

    pub fn from_timestamp(ts: u32) -> Self {
        if ts == Self::IMMEDIATE {
            return ExecTime::Immediate;
        }

        Utc.timestamp_opt(ts as i64, 0).single().map_or(ExecTime::Immediate, ExecTime::At)
    }

    #[inline]
    pub fn is_immediate(&self) -> bool {
        matches!(self, ExecTime::Immediate)
    }
}

impl Display for ExecTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecTime::Immediate => write!(f, "immediate"),
            ExecTime::At(t) => write!(f, "{}", t.format("%y/%m/%d %TZ")),
        }
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum ResponseCode {
    Success          = 0x00,
    SuccessScheduled = 0x01,
    Error            = 0x02,
    CmdNotFound      = 0x03,
    NotImplemented   = 0x04,
}

/// Token pairing a scheduled command with the response that later arrives over the log
/// channel. Packed from header fields, so two commands sharing seq, id, time and flags
/// collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("command payload of {0} bytes does not fit in 31 bits")]
    DataLen(usize),

    #[error("command message truncated: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error(transparent)]
    Packing(#[from] PackingError),
}

/// Application command header: `[seq][cmd_id][timestamp: u32][flags: u16][resp:1|data_len:31]`,
/// big-endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "12", endian = "msb")]
pub struct CmdHeader {
    pub seq_num:   u8,
    pub cmd_id:    u8,
    pub timestamp: u32,
    pub flags:     u16,
    len_resp:      u32,
}

impl CmdHeader {
    pub const SIZE: usize = 12;

    pub fn command(
        seq_num: u8,
        cmd_id: u8,
        exec: ExecTime,
        flags: u16,
        data_len: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            seq_num,
            cmd_id,
            timestamp: exec.timestamp(),
            flags,
            len_resp: checked_len(data_len)?,
        })
    }

    /// Response header echoing this command's identifying fields.
    pub fn response(&self, data_len: usize) -> Result<Self, Error> {
        Ok(Self {
            len_resp: checked_len(data_len)? | RESP_BIT,
            ..*self
        })
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.len_resp & RESP_BIT != 0
    }

    #[inline]
    pub fn data_len(&self) -> u32 {
        self.len_resp & MAX_DATA_LEN
    }

    #[inline]
    pub fn exec_time(&self) -> ExecTime {
        ExecTime::from_timestamp(self.timestamp)
    }

    #[inline]
    pub fn uuid(&self) -> CorrelationId {
        CorrelationId(
            (self.seq_num as u64) << 56
                | (self.cmd_id as u64) << 48
                | (self.timestamp as u64) << 16
                | self.flags as u64,
        )
    }

    #[inline]
    pub fn summary(&self) -> Summary<'_> {
        Summary(self)
    }

    pub fn to_bytes(&self) -> Result<[u8; 12], Error> {
        Ok(self.pack()?)
    }

    pub fn from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() < Self::SIZE {
            return Err(Error::Truncated {
                expected: Self::SIZE,
                got:      src.len(),
            });
        }

        Ok(Self::unpack_from_slice(&src[..Self::SIZE])?)
    }
}

/// One-line rendering of a [`CmdHeader`]. The derived `Display` prints every packed field.
#[derive(Debug, Clone, Copy)]
pub struct Summary<'a>(&'a CmdHeader);

impl Display for Summary<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let header = self.0;

        write!(
            f,
            "[seq {}] cmd {:#04x}{} at {} (flags {:#06x}, {} bytes)",
            header.seq_num,
            header.cmd_id,
            if header.is_response() {
                "[Resp]"
            } else {
                ""
            },
            header.exec_time(),
            header.flags,
            header.data_len(),
        )
    }
}

#[inline]
fn checked_len(data_len: usize) -> Result<u32, Error> {
    u32::try_from(data_len)
        .ok()
        .filter(|&len| len <= MAX_DATA_LEN)
        .ok_or(Error::DataLen(data_len))
}

/// A command header with the payload it announces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CmdMessage {
    pub header:  CmdHeader,
    pub payload: Bytes,
}

impl CmdMessage {
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let header = self.header.to_bytes()?;
        let mut out = BytesMut::with_capacity(header.len() + self.payload.len());

        out.put_slice(&header);
        out.put_slice(&self.payload);

        Ok(out.freeze())
    }

    /// Parse a header and exactly the `data_len` bytes it announces; trailing bytes are
    /// ignored.
    pub fn from_slice(src: &[u8]) -> Result<Self, Error> {
        let header = CmdHeader::from_slice(src)?;

        let expected = CmdHeader::SIZE + header.data_len() as usize;
        if src.len() < expected {
            return Err(Error::Truncated {
                expected,
                got: src.len(),
            });
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&src[CmdHeader::SIZE..expected]),
        })
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_layout() {
        let hdr = CmdHeader::command(7, 0x21, ExecTime::Immediate, 0x0102, 3).unwrap();
        let bytes = hdr.to_bytes().unwrap();

        assert_eq!(bytes, [7, 0x21, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 3]);

        let resp = hdr.response(5).unwrap();
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(&bytes[8..], &[0x80, 0, 0, 5]);
        assert!(resp.is_response());
        assert_eq!(resp.data_len(), 5);
        assert_eq!(CmdHeader::from_slice(&bytes).unwrap(), resp);
    }

    #[test]
    fn response_keeps_correlation() {
        let at = ExecTime::At(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let hdr = CmdHeader::command(200, 4, at, 0, 0).unwrap();

        assert_eq!(hdr.uuid(), hdr.response(17).unwrap().uuid());
        assert_eq!(hdr.uuid(), CorrelationId(200 << 56 | 4 << 48 | 1_700_000_000 << 16));
        assert_eq!(hdr.exec_time(), at);
    }

    #[test]
    fn data_len_limited_to_31_bits() {
        assert_eq!(
            CmdHeader::command(0, 0, ExecTime::Immediate, 0, 1 << 31),
            Err(Error::DataLen(1 << 31))
        );
        assert!(CmdHeader::command(0, 0, ExecTime::Immediate, 0, MAX_DATA_LEN as usize).is_ok());
    }

    #[test]
    fn message_respects_data_len() {
        let header = CmdHeader::command(1, 2, ExecTime::Immediate, 0, 2).unwrap();
        let msg = CmdMessage {
            header,
            payload: Bytes::from_static(&[9, 8]),
        };

        let mut bytes = msg.to_bytes().unwrap().to_vec();
        bytes.push(0xff);
        assert_eq!(CmdMessage::from_slice(&bytes).unwrap(), msg);

        assert!(matches!(
            CmdMessage::from_slice(&bytes[..CmdHeader::SIZE + 1]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn summary_is_one_line() {
        let hdr = CmdHeader::command(3, 0x10, ExecTime::Immediate, 0, 4).unwrap();
        assert_eq!(hdr.summary().to_string(), "[seq 3] cmd 0x10 at immediate (flags 0x0000, 4 bytes)");

        let resp = hdr.response(1).unwrap();
        assert_eq!(resp.summary().to_string(), "[seq 3] cmd 0x10[Resp] at immediate (flags 0x0000, 1 bytes)");
    }

    #[test]
    fn epoch_is_not_immediate() {
        let at = ExecTime::At(Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(at.timestamp(), 1);
        assert_eq!(ExecTime::from_timestamp(0), ExecTime::Immediate);
    }

    proptest! {
        #[test]
        fn unpack_pack_equivalence(data in any::<[u8; 12]>()) {
            let hdr = CmdHeader::from_slice(&data).unwrap();
            prop_assert_eq!(hdr.to_bytes().unwrap(), data);
        }
    }
}
