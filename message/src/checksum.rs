pub trait Checksum {
    type Output: Copy + Eq + std::fmt::Debug + std::fmt::LowerHex;

    const SIZE: usize = std::mem::size_of::<Self::Output>();

    fn checksum(vals: &[u8]) -> Self::Output;

    /// Big-endian wire representation of [`Checksum::checksum`].
    fn checksum_bytes(vals: &[u8]) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Option<Self::Output>;
}

#[macro_export]
macro_rules! impl_checksum {
    ($vis:vis $name:ident, $ty:ty, $algo:expr) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::checksum::Checksum for $name {
            type Output = $ty;

            fn checksum(vals: &[u8]) -> Self::Output {
                const INSTANCE: ::crc::Crc<$ty> = ::crc::Crc::<$ty>::new(&$algo);

                INSTANCE.checksum(vals)
            }

            fn checksum_bytes(vals: &[u8]) -> Vec<u8> {
                <$ty>::to_be_bytes(Self::checksum(vals)).to_vec()
            }

            fn from_bytes(bytes: &[u8]) -> Option<Self::Output> {
                let array = bytes.try_into().ok()?;
                Some(<$ty>::from_be_bytes(array))
            }
        }
    };
}

pub use impl_checksum;

impl_checksum!(pub FrameCrc, u16, ::crc::CRC_16_IBM_3740);

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    impl_checksum!(pub U32CompileTest, u32, ::crc::CRC_32_ISO_HDLC);

    #[test]
    fn frame_crc_check_value() {
        assert_eq!(FrameCrc::checksum(b"123456789"), 0x29b1);
        assert_eq!(FrameCrc::checksum_bytes(b"123456789"), vec![0x29, 0xb1]);
    }

    #[test]
    fn from_bytes_rejects_wrong_width() {
        assert_eq!(FrameCrc::from_bytes(&[0x29]), None);
        assert_eq!(FrameCrc::from_bytes(&[0x29, 0xb1]), Some(0x29b1));
    }

    proptest! {
        #[test]
        fn bytes_agree_with_int(to_checksum in any::<Vec<u8>>()) {
            let array = FrameCrc::checksum_bytes(&to_checksum);
            prop_assert_eq!(array.len(), FrameCrc::SIZE);
            prop_assert_eq!(FrameCrc::from_bytes(&array), Some(FrameCrc::checksum(&to_checksum)));

            let wide = U32CompileTest::checksum_bytes(&to_checksum);
            prop_assert_eq!(wide.len(), 4);
            prop_assert_eq!(U32CompileTest::from_bytes(&wide), Some(U32CompileTest::checksum(&to_checksum)));
        }
    }
}
