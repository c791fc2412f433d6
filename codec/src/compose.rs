use crate::ProtocolLayer;

/// Two layers run back to back: every output of the first is fed to the second.
pub struct Compose<A, B> {
    first:  A,
    second: B,
}

impl<A, B> Compose<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
        }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A, B> ProtocolLayer for Compose<A, B>
where
    A: ProtocolLayer,
    B: ProtocolLayer<Input = A::Output>,
    A::Error: From<B::Error>,
{
    type Error = A::Error;
    type Input = A::Input;
    type Output = B::Output;

    fn transform(&mut self, input: A::Input) -> Result<Vec<B::Output>, A::Error> {
        let mut out = vec![];

        for item in self.first.transform(input)? {
            out.extend(self.second.transform(item)?);
        }

        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<B::Output>, A::Error> {
        let mut out = vec![];

        for item in self.first.flush()? {
            out.extend(self.second.transform(item)?);
        }
        out.extend(self.second.flush()?);

        Ok(out)
    }
}

pub trait ProtocolLayerExt: ProtocolLayer + Sized {
    fn then<B>(self, next: B) -> Compose<Self, B>
    where
        B: ProtocolLayer<Input = Self::Output>,
    {
        Compose::new(self, next)
    }
}

impl<L> ProtocolLayerExt for L where L: ProtocolLayer {}
