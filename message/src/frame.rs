use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};

use crate::{
    Checksum,
    FrameCrc,
};

pub const SYNC: [u8; 2] = [0xab, 0xcd];

pub const MIN_PAYLOAD: usize = 1;
pub const MAX_PAYLOAD: usize = 234;

/// Sync bytes plus the length byte.
pub const HEADER_BYTES: usize = SYNC.len() + 1;
pub const CRC_BYTES: usize = 2;
pub const OVERHEAD_BYTES: usize = HEADER_BYTES + CRC_BYTES;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("frame payload length {0} outside 1..=234")]
    PayloadLength(usize),

    #[error("frame does not start with sync pattern (got {0:02x?})")]
    Sync([u8; 2]),

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("frame checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    Checksum { computed: u16, received: u16 },
}

/// One physical-layer unit: `[sync0, sync1, len, payload.., crc_hi, crc_lo]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialFrame {
    payload: Bytes,
}

impl SerialFrame {
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, Error> {
        let payload = payload.into();

        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
            return Err(Error::PayloadLength(payload.len()));
        }

        Ok(Self {
            payload,
        })
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    #[inline]
    pub fn crc(&self) -> u16 {
        FrameCrc::checksum(&self.payload)
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.payload.len() + OVERHEAD_BYTES);

        dst.put_slice(&SYNC);
        dst.put_u8(self.payload.len() as u8);
        dst.put_slice(&self.payload);
        dst.put_u16(self.crc());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.write_to(&mut out);

        out.freeze()
    }

    /// Parse exactly one complete frame. Streams go through the framing codec instead, which
    /// resynchronizes on corruption rather than failing.
    pub fn from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() < HEADER_BYTES {
            return Err(Error::Truncated {
                expected: HEADER_BYTES,
                got:      src.len(),
            });
        }

        if src[..2] != SYNC {
            return Err(Error::Sync([src[0], src[1]]));
        }

        let len = src[2] as usize;
        if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&len) {
            return Err(Error::PayloadLength(len));
        }

        let expected = len + OVERHEAD_BYTES;
        if src.len() != expected {
            return Err(Error::Truncated {
                expected,
                got: src.len(),
            });
        }

        let payload = &src[HEADER_BYTES..HEADER_BYTES + len];
        let received = u16::from_be_bytes([src[expected - 2], src[expected - 1]]);
        let computed = FrameCrc::checksum(payload);

        if received != computed {
            return Err(Error::Checksum {
                computed,
                received,
            });
        }

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = SerialFrame::new(vec![1, 2, 3]).unwrap();
        let bytes = frame.to_bytes();

        let crc = FrameCrc::checksum(&[1, 2, 3]).to_be_bytes();
        assert_eq!(&bytes[..], &[0xab, 0xcd, 0x03, 0x01, 0x02, 0x03, crc[0], crc[1]][..]);

        assert_eq!(SerialFrame::from_slice(&bytes), Ok(frame));
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(SerialFrame::new(vec![]), Err(Error::PayloadLength(0)));
        assert_eq!(SerialFrame::new(vec![0; 235]), Err(Error::PayloadLength(235)));
        assert!(SerialFrame::new(vec![0; 234]).is_ok());
    }

    #[test]
    fn rejects_corruption() {
        let mut bytes = SerialFrame::new(vec![9; 10]).unwrap().to_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        assert!(matches!(SerialFrame::from_slice(&bytes), Err(Error::Checksum { .. })));
        assert!(matches!(SerialFrame::from_slice(&bytes[..5]), Err(Error::Truncated { .. })));
        assert_eq!(SerialFrame::from_slice(&[0xab, 0xce, 1]), Err(Error::Sync([0xab, 0xce])));
    }
}
