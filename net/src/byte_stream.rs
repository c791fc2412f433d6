use std::time::Duration;

use bytes::{
    Bytes,
    BytesMut,
};

use crate::{
    deadline,
    remaining,
    Error,
    PacketSource,
};

/// Presents a source of byte chunks as a contiguous stream, so readers can ask for exact
/// lengths regardless of how the bytes were chunked in transit.
pub struct ByteStream<S> {
    source: S,
    buf:    BytesMut,
}

impl<S> ByteStream<S>
where
    S: PacketSource<Bytes>,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            buf: BytesMut::new(),
        }
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Exactly `n` bytes, or `Ok(None)` if they don't arrive before the timeout. Bytes that did
    /// arrive stay buffered for the next read.
    pub async fn read_exact(&mut self, n: usize, timeout: Option<Duration>) -> Result<Option<Bytes>, Error> {
        let deadline = deadline(timeout);

        while self.buf.len() < n {
            match self.source.read(remaining(deadline)).await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }

        Ok(Some(self.buf.split_to(n).freeze()))
    }

    /// Discard buffered bytes and anything pending upstream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.source.reset();
    }
}

#[async_trait::async_trait]
impl<S> PacketSource<Bytes> for ByteStream<S>
where
    S: PacketSource<Bytes>,
{
    async fn read(&mut self, timeout: Option<Duration>) -> Result<Option<Bytes>, Error> {
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.split().freeze()));
        }

        self.source.read(timeout).await
    }

    fn reset(&mut self) {
        ByteStream::reset(self)
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn exact_reads_span_chunks() -> eyre::Result<()> {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let mut stream = ByteStream::new(rx);

        tx.send(Bytes::from_static(&[1, 2]))?;
        tx.send(Bytes::from_static(&[3, 4, 5]))?;

        assert_eq!(stream.read_exact(3, None).await?.as_deref(), Some(&[1, 2, 3][..]));
        assert_eq!(stream.buffered(), 2);

        let short = Some(Duration::from_millis(10));
        assert_eq!(stream.read_exact(4, short).await?, None);
        assert_eq!(stream.buffered(), 2);

        tx.send(Bytes::from_static(&[6, 7]))?;
        assert_eq!(stream.read_exact(4, short).await?.as_deref(), Some(&[4, 5, 6, 7][..]));

        tx.send(Bytes::from_static(&[8]))?;
        stream.reset();
        assert_eq!(stream.read_exact(1, short).await?, None);

        Ok(())
    }
}
