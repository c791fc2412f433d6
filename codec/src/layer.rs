use std::marker::PhantomData;

use bytes::{
    Bytes,
    BytesMut,
};
use tokio_util::codec::{
    Decoder,
    Encoder,
};

/// One stage of the stack: turns each input into zero or more outputs, possibly buffering
/// partial input between calls.
pub trait ProtocolLayer {
    type Input;
    type Output;
    type Error;

    fn transform(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, Self::Error>;

    /// Emit whatever buffered input can still be completed.
    fn flush(&mut self) -> Result<Vec<Self::Output>, Self::Error> {
        Ok(vec![])
    }
}

impl<L> ProtocolLayer for Box<L>
where
    L: ProtocolLayer + ?Sized,
{
    type Error = L::Error;
    type Input = L::Input;
    type Output = L::Output;

    #[inline]
    fn transform(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, Self::Error> {
        (**self).transform(input)
    }

    #[inline]
    fn flush(&mut self) -> Result<Vec<Self::Output>, Self::Error> {
        (**self).flush()
    }
}

/// Drives a stream [`Decoder`] as a layer: input chunks accumulate in an internal buffer and
/// every item the decoder completes is emitted, in order.
#[derive(Debug, Default)]
pub struct DecoderLayer<D> {
    decoder: D,
    buf:     BytesMut,
}

impl<D> DecoderLayer<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            buf: BytesMut::new(),
        }
    }

    #[inline]
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Bytes received but not yet consumed by the decoder.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl<D> ProtocolLayer for DecoderLayer<D>
where
    D: Decoder,
{
    type Error = D::Error;
    type Input = Bytes;
    type Output = D::Item;

    fn transform(&mut self, input: Bytes) -> Result<Vec<D::Item>, D::Error> {
        self.buf.extend_from_slice(&input);

        let mut out = vec![];
        while let Some(item) = self.decoder.decode(&mut self.buf)? {
            out.push(item);
        }

        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<D::Item>, D::Error> {
        let mut out = vec![];
        while let Some(item) = self.decoder.decode_eof(&mut self.buf)? {
            out.push(item);
        }

        Ok(out)
    }
}

/// Drives an [`Encoder`] as a layer: each item becomes one serialized chunk.
#[derive(Debug, Default)]
pub struct EncoderLayer<E, T> {
    encoder: E,
    _item:   PhantomData<fn(T)>,
}

impl<E, T> EncoderLayer<E, T> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            _item: PhantomData,
        }
    }
}

impl<E, T> ProtocolLayer for EncoderLayer<E, T>
where
    E: Encoder<T>,
{
    type Error = E::Error;
    type Input = T;
    type Output = Bytes;

    fn transform(&mut self, input: T) -> Result<Vec<Bytes>, E::Error> {
        let mut dst = BytesMut::new();
        self.encoder.encode(input, &mut dst)?;

        Ok(vec![dst.freeze()])
    }
}

/// Applies a fallible function to each input.
pub struct MapLayer<F, I, O, E> {
    f:      F,
    _types: PhantomData<fn(I) -> Result<O, E>>,
}

impl<F, I, O, E> MapLayer<F, I, O, E>
where
    F: FnMut(I) -> Result<Option<O>, E>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, I, O, E> ProtocolLayer for MapLayer<F, I, O, E>
where
    F: FnMut(I) -> Result<Option<O>, E>,
{
    type Error = E;
    type Input = I;
    type Output = O;

    #[inline]
    fn transform(&mut self, input: I) -> Result<Vec<O>, E> {
        Ok((self.f)(input)?.into_iter().collect())
    }
}

#[cfg(test)]
mod test {
    use tokio_util::codec::{
        BytesCodec,
        LinesCodec,
    };

    use super::*;

    #[test]
    fn decoder_layer_buffers_partial_input() -> eyre::Result<()> {
        let mut layer = DecoderLayer::new(LinesCodec::new());

        assert!(layer.transform(Bytes::from_static(b"ab"))?.is_empty());
        assert_eq!(layer.buffered(), 2);

        let out = layer.transform(Bytes::from_static(b"c\nde\nf"))?;
        assert_eq!(out, vec!["abc".to_owned(), "de".to_owned()]);

        assert_eq!(layer.flush()?, vec!["f".to_owned()]);

        Ok(())
    }

    #[test]
    fn encoder_layer_one_chunk_per_item() -> eyre::Result<()> {
        let mut layer = EncoderLayer::new(BytesCodec::new());

        let out = layer.transform(Bytes::from_static(&[1, 2]))?;
        assert_eq!(out, vec![Bytes::from_static(&[1, 2])]);

        Ok(())
    }

    #[test]
    fn map_layer_filters() {
        let mut layer = MapLayer::new(|x: u8| Ok::<_, ()>((x % 2 == 0).then_some(x * 10)));

        assert_eq!(layer.transform(2), Ok(vec![20]));
        assert_eq!(layer.transform(3), Ok(vec![]));
    }
}
