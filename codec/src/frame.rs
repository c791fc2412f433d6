use std::sync::{
    atomic::{
        AtomicU64,
        Ordering,
    },
    Arc,
};

use bytes::{
    Buf,
    Bytes,
    BytesMut,
};
use message::{
    frame::{
        CRC_BYTES,
        MAX_PAYLOAD,
        MIN_PAYLOAD,
        SYNC,
    },
    Checksum,
    FrameCrc,
    SerialFrame,
};
use tokio_util::codec::{
    Decoder,
    Encoder,
};

/// Counters for frames the deframer completed or discarded while resynchronizing.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames:     AtomicU64,
    bad_length: AtomicU64,
    bad_crc:    AtomicU64,
}

impl FrameStats {
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bad_length(&self) -> u64 {
        self.bad_length.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bad_crc(&self) -> u64 {
        self.bad_crc.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.bad_length() + self.bad_crc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Sync0,
    Sync1,
    Header,
    Data { len: usize },
    Crc,
}

/// Byte-stream framing: `[0xab, 0xcd, len, payload.., crc16 (BE)]`.
///
/// Decoding resynchronizes on bad lengths and checksum mismatches by dropping back to
/// searching for the sync pattern; corrupt frames are counted in [`FrameStats`] and never
/// surfaced as errors.
#[derive(Debug, Default)]
pub struct FrameCodec {
    state:   State,
    payload: Bytes,
    stats:   Arc<FrameStats>,
}

impl Default for State {
    fn default() -> Self {
        State::Sync0
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<FrameStats> {
        self.stats.clone()
    }

    #[inline]
    fn resync(&mut self) {
        self.state = State::Sync0;
        self.payload = Bytes::new();
    }
}

impl Decoder for FrameCodec {
    type Error = crate::Error;
    type Item = SerialFrame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SerialFrame>, crate::Error> {
        loop {
            match self.state {
                State::Sync0 => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    if src.get_u8() == SYNC[0] {
                        self.state = State::Sync1;
                    }
                },

                State::Sync1 => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    self.state = match src.get_u8() {
                        b if b == SYNC[1] => State::Header,
                        b if b == SYNC[0] => State::Sync1,
                        _ => State::Sync0,
                    };
                },

                State::Header => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    let len = src.get_u8() as usize;

                    if (MIN_PAYLOAD..=MAX_PAYLOAD).contains(&len) {
                        self.state = State::Data {
                            len,
                        };
                    } else {
                        tracing::debug!(len, "frame length out of range, resyncing");
                        self.stats.bad_length.fetch_add(1, Ordering::Relaxed);
                        self.resync();
                    }
                },

                State::Data {
                    len,
                } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }

                    self.payload = src.split_to(len).freeze();
                    self.state = State::Crc;
                },

                State::Crc => {
                    if src.len() < CRC_BYTES {
                        return Ok(None);
                    }

                    let received = src.get_u16();
                    let computed = FrameCrc::checksum(&self.payload);
                    let payload = std::mem::take(&mut self.payload);

                    self.state = State::Sync0;

                    if received != computed {
                        tracing::debug!(
                            payload = %hex::encode(&payload),
                            received = format_args!("{received:#06x}"),
                            computed = format_args!("{computed:#06x}"),
                            "frame checksum mismatch, dropping",
                        );
                        self.stats.bad_crc.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    self.stats.frames.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(SerialFrame::new(payload)?));
                },
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SerialFrame>, crate::Error> {
        let result = self.decode(src)?;

        if result.is_none() && self.state != State::Sync0 {
            tracing::debug!(state = ?self.state, "stream ended mid-frame");
            self.resync();
            src.clear();
        }

        Ok(result)
    }
}

impl Encoder<SerialFrame> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: SerialFrame, dst: &mut BytesMut) -> Result<(), crate::Error> {
        item.write_to(dst);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = crate::Error;

    /// Frame a raw payload; fails if it does not fit in one frame.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), crate::Error> {
        SerialFrame::new(item)?.write_to(dst);
        Ok(())
    }
}
