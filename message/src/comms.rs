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

/// Default hardware ID of the onboard computer. Datagrams to or from the OBC are relay
/// datagrams and carry no command number.
pub const OBC_HWID: u16 = 0x0001;

pub const SEQ_MASK: u16 = 0x7fff;

/// Largest datalink payload that still fits once wrapped in a datagram, a relay datagram and
/// the outer datagram again.
pub const MAX_RELAYED_PAYLOAD: usize = crate::datagram::MAX_PAYLOAD - CommsHeader::SIZE - 1;
const RESP_BIT: u16 = 0x8000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "6", endian = "lsb")]
pub struct CommsHeader {
    seq_resp:      u16,
    pub dest_hwid: u16,
    pub src_hwid:  u16,
}

impl CommsHeader {
    pub const SIZE: usize = 6;

    #[inline]
    pub fn seq_num(&self) -> u16 {
        self.seq_resp & SEQ_MASK
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.seq_resp & RESP_BIT != 0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("comms datagram truncated: need {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error(transparent)]
    Packing(#[from] PackingError),
}

/// Addressed, sequence-numbered unit exchanged with the radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommsDatagram {
    /// 15-bit sequence number.
    pub seq_num:   u16,
    pub response:  bool,
    pub dest_hwid: u16,
    pub src_hwid:  u16,
    /// Absent for relay datagrams, present for everything addressed to the radio itself.
    pub cmd_num:   Option<u8>,
    pub payload:   Bytes,
}

impl CommsDatagram {
    /// A datagram carrying datalink traffic to or from the OBC.
    pub fn relay(seq_num: u16, dest_hwid: u16, src_hwid: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            seq_num: seq_num & SEQ_MASK,
            response: false,
            dest_hwid,
            src_hwid,
            cmd_num: None,
            payload: payload.into(),
        }
    }

    /// A datagram carrying a command for the radio itself.
    pub fn command(
        seq_num: u16,
        dest_hwid: u16,
        src_hwid: u16,
        cmd_num: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            seq_num: seq_num & SEQ_MASK,
            response: false,
            dest_hwid,
            src_hwid,
            cmd_num: Some(cmd_num),
            payload: payload.into(),
        }
    }

    /// Whether this datagram travels to or from the OBC at `obc_hwid`.
    #[inline]
    pub fn is_relay(&self, obc_hwid: u16) -> bool {
        is_relay(self.dest_hwid, self.src_hwid, obc_hwid)
    }

    pub fn header(&self) -> CommsHeader {
        let resp = if self.response {
            RESP_BIT
        } else {
            0
        };

        CommsHeader {
            seq_resp:  (self.seq_num & SEQ_MASK) | resp,
            dest_hwid: self.dest_hwid,
            src_hwid:  self.src_hwid,
        }
    }

    /// Acknowledgement for this datagram: same sequence number, addresses swapped, no payload.
    pub fn ack(&self) -> Self {
        Self {
            seq_num:   self.seq_num,
            response:  true,
            dest_hwid: self.src_hwid,
            src_hwid:  self.dest_hwid,
            cmd_num:   self.cmd_num,
            payload:   Bytes::new(),
        }
    }

    /// The command number goes on the wire iff the datagram has one, so relay datagrams must
    /// be built with [`Self::relay`] and radio traffic with [`Self::command`].
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let header = self.header().pack()?;
        let mut out = BytesMut::with_capacity(header.len() + 1 + self.payload.len());

        out.put_slice(&header);
        if let Some(cmd_num) = self.cmd_num {
            out.put_u8(cmd_num);
        }
        out.put_slice(&self.payload);

        Ok(out.freeze())
    }

    /// Parse a datagram. Only datagrams that neither come from nor go to `obc_hwid` carry a
    /// command number.
    pub fn from_slice(src: &[u8], obc_hwid: u16) -> Result<Self, Error> {
        if src.len() < CommsHeader::SIZE {
            return Err(Error::Truncated {
                expected: CommsHeader::SIZE,
                got:      src.len(),
            });
        }

        let (header_bytes, rest) = src.split_at(CommsHeader::SIZE);
        let header = CommsHeader::unpack_from_slice(header_bytes)?;

        let (cmd_num, payload) = if is_relay(header.dest_hwid, header.src_hwid, obc_hwid) {
            (None, rest)
        } else {
            let (&cmd_num, payload) = rest.split_first().ok_or(Error::Truncated {
                expected: CommsHeader::SIZE + 1,
                got:      src.len(),
            })?;

            (Some(cmd_num), payload)
        };

        Ok(Self {
            seq_num: header.seq_num(),
            response: header.is_response(),
            dest_hwid: header.dest_hwid,
            src_hwid: header.src_hwid,
            cmd_num,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[inline]
fn is_relay(dest_hwid: u16, src_hwid: u16, obc_hwid: u16) -> bool {
    dest_hwid == obc_hwid || src_hwid == obc_hwid
}

impl Display for CommsDatagram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[seq {}{}] {:#06x} -> {:#06x}",
            self.seq_num,
            if self.response {
                " resp"
            } else {
                ""
            },
            self.src_hwid,
            self.dest_hwid,
        )?;

        if let Some(cmd_num) = self.cmd_num {
            write!(f, " cmd {cmd_num}")?;
        }

        write!(f, " / payload: 0x{}", hex::encode(&self.payload))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_is_little_endian() {
        let dg = CommsDatagram::relay(0x0102, OBC_HWID, 0x0304, vec![0xaa]);
        let bytes = dg.to_bytes().unwrap();

        assert_eq!(&bytes[..], &[0x02, 0x01, 0x01, 0x00, 0x04, 0x03, 0xaa][..]);
        assert_eq!(CommsDatagram::from_slice(&bytes, OBC_HWID).unwrap(), dg);
    }

    #[test]
    fn response_bit_is_bit_15() {
        let ack = CommsDatagram::relay(5, OBC_HWID, 0x0100, vec![1]).ack();
        let bytes = ack.to_bytes().unwrap();

        assert_eq!(&bytes[..2], &[0x05, 0x80]);
        assert_eq!(ack.dest_hwid, 0x0100);
        assert_eq!(ack.src_hwid, OBC_HWID);
        assert!(ack.payload.is_empty());

        let parsed = CommsDatagram::from_slice(&bytes, OBC_HWID).unwrap();
        assert!(parsed.response);
        assert_eq!(parsed.seq_num, 5);
    }

    #[test]
    fn command_number_only_off_relay() {
        let dg = CommsDatagram::command(0x7fff, 0x0200, 0x0100, 9, vec![4, 5]);
        let bytes = dg.to_bytes().unwrap();

        assert_eq!(bytes.len(), CommsHeader::SIZE + 1 + 2);
        assert_eq!(bytes[CommsHeader::SIZE], 9);
        assert_eq!(CommsDatagram::from_slice(&bytes, OBC_HWID).unwrap(), dg);

        assert!(matches!(
            CommsDatagram::from_slice(&bytes[..CommsHeader::SIZE], OBC_HWID),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn sequence_masked_to_15_bits() {
        let dg = CommsDatagram::relay(0xffff, OBC_HWID, 0x0100, vec![]);
        assert_eq!(dg.seq_num, 0x7fff);
        assert!(!dg.header().is_response());
    }

    #[test]
    fn configured_obc_hwid_decides_layout() {
        const OBC: u16 = 0x0005;

        let dg = CommsDatagram::relay(0, OBC, 0x0100, vec![0x01, 0xaa]);
        let bytes = dg.to_bytes().unwrap();

        assert_eq!(&bytes[..], &[0x00, 0x00, 0x05, 0x00, 0x00, 0x01, 0x01, 0xaa][..]);
        assert!(dg.is_relay(OBC));
        assert!(!dg.is_relay(OBC_HWID));

        let parsed = CommsDatagram::from_slice(&bytes, OBC).unwrap();
        assert_eq!(parsed.cmd_num, None);
        assert_eq!(&parsed.payload[..], &[0x01, 0xaa]);
        assert_eq!(parsed, dg);

        // under the default id the first payload byte would be taken as a command number
        let misread = CommsDatagram::from_slice(&bytes, OBC_HWID).unwrap();
        assert_eq!(misread.cmd_num, Some(0x01));
    }
}
