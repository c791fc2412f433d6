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

use crate::{
    DecodeError,
    Fields,
};

const LEVEL_SHIFT: u16 = 13;
const GROUP_SHIFT: u16 = 8;
const GROUP_MASK: u8 = 0x1f;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown(u8),
}

impl Level {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            5 => Level::Fatal,
            other => Level::Unknown(other),
        }
    }

    fn bits(&self) -> u8 {
        match *self {
            Level::Trace => 0,
            Level::Debug => 1,
            Level::Info => 2,
            Level::Warn => 3,
            Level::Error => 4,
            Level::Fatal => 5,
            Level::Unknown(bits) => bits & 0x07,
        }
    }
}

/// `(group, signal)` pair identifying one kind of log. Groups are 5 bits wide.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct LogId {
    pub group:  u8,
    pub signal: u8,
}

impl LogId {
    #[inline]
    pub const fn new(group: u8, signal: u8) -> Self {
        Self {
            group: group & GROUP_MASK,
            signal,
        }
    }
}

impl Display for LogId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group, self.signal)
    }
}

/// `[timestamp: u32][level:3 | group:5 | signal:8][len: u8]`, big-endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "7", endian = "msb")]
pub struct LogHeader {
    pub timestamp: u32,
    ident:         u16,
    pub len:       u8,
}

impl LogHeader {
    pub const SIZE: usize = 7;

    pub fn new(timestamp: u32, level: Level, id: LogId, len: u8) -> Self {
        let ident = (level.bits() as u16) << LEVEL_SHIFT
            | ((id.group & GROUP_MASK) as u16) << GROUP_SHIFT
            | id.signal as u16;

        Self {
            timestamp,
            ident,
            len,
        }
    }

    #[inline]
    pub fn level(&self) -> Level {
        Level::from_bits((self.ident >> LEVEL_SHIFT) as u8)
    }

    #[inline]
    pub fn id(&self) -> LogId {
        LogId::new((self.ident >> GROUP_SHIFT) as u8, self.ident as u8)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("log payload of {0} bytes does not fit the one-byte length field")]
    TooLarge(usize),

    #[error("log record truncated: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error(transparent)]
    Packing(#[from] PackingError),
}

/// One decoded telemetry log. Name and description are empty when the catalogue has no entry
/// for the id; `fields` is empty and `error` set when the payload does not match its spec.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp:   u32,
    pub level:       Level,
    pub id:          LogId,
    pub group_name:  Option<String>,
    pub name:        Option<String>,
    pub description: Option<String>,
    pub payload:     Bytes,
    pub fields:      Option<Fields>,
    pub error:       Option<DecodeError>,
}

impl LogRecord {
    /// An undecorated record, as it comes off the wire before catalogue lookup.
    pub fn raw(header: &LogHeader, payload: Bytes) -> Self {
        Self {
            timestamp: header.timestamp,
            level: header.level(),
            id: header.id(),
            group_name: None,
            name: None,
            description: None,
            payload,
            fields: None,
            error: None,
        }
    }

    #[inline]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp as i64, 0).single()
    }

    pub fn header(&self) -> Result<LogHeader, Error> {
        let len = u8::try_from(self.payload.len()).map_err(|_| Error::TooLarge(self.payload.len()))?;

        Ok(LogHeader::new(self.timestamp, self.level, self.id, len))
    }

    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let header = self.header()?.pack()?;
        let mut out = BytesMut::with_capacity(header.len() + self.payload.len());

        out.put_slice(&header);
        out.put_slice(&self.payload);

        Ok(out.freeze())
    }

    pub fn from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() < LogHeader::SIZE {
            return Err(Error::Truncated {
                expected: LogHeader::SIZE,
                got:      src.len(),
            });
        }

        let header = LogHeader::unpack_from_slice(&src[..LogHeader::SIZE])?;
        let expected = LogHeader::SIZE + header.len as usize;

        if src.len() < expected {
            return Err(Error::Truncated {
                expected,
                got: src.len(),
            });
        }

        Ok(Self::raw(&header, Bytes::copy_from_slice(&src[LogHeader::SIZE..expected])))
    }
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ts = match self.time() {
            Some(t) => t.format("%y/%m/%d %TZ").to_string(),
            None => self.timestamp.to_string(),
        };

        write!(f, "{ts} [{:?}] ", self.level)?;

        match (&self.group_name, &self.name) {
            (Some(group), Some(name)) => write!(f, "{group}.{name}")?,
            _ => write!(f, "<unknown {}>", self.id)?,
        }

        match (&self.fields, &self.error) {
            (_, Some(e)) => write!(f, " (undecoded: {e}) 0x{}", hex::encode(&self.payload)),
            (Some(fields), None) => {
                for (k, v) in fields {
                    write!(f, " {k}={v}")?;
                }

                Ok(())
            },
            (None, None) => write!(f, " 0x{}", hex::encode(&self.payload)),
        }
    }
}
