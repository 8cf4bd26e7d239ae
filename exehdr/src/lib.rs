pub mod cascade;
mod error;
pub mod le;
pub mod mz;
pub mod ne;
pub mod offset;
mod source;
#[cfg(test)]
mod testing;
pub mod w3;


pub use crate::error::DecodeError;
pub use crate::source::ByteSource;


pub(crate) trait ReadLe {
    fn read_le(buf: &[u8], pos: &mut usize) -> Self;
}
macro_rules! impl_read_le {
    ($type:ty) => {
        impl ReadLe for $type {
            fn read_le(buf: &[u8], pos: &mut usize) -> Self {
                const SIZE: usize = ::std::mem::size_of::<$type>();
                let mut bytes = [0u8; SIZE];
                bytes.copy_from_slice(&buf[*pos..*pos+SIZE]);
                *pos += SIZE;
                <$type>::from_le_bytes(bytes)
            }
        }
    };
}
impl_read_le!(u8);
impl_read_le!(u16);
impl_read_le!(u32);

pub(crate) fn read_bytes<const N: usize>(buf: &[u8], pos: &mut usize) -> [u8; N] {
    let mut ret = [0u8; N];
    ret.copy_from_slice(&buf[*pos..*pos+N]);
    *pos += N;
    ret
}
