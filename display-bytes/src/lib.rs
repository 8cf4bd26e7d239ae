//! Wrappers that render raw byte strings readably.
//!
//! Executable headers store names as counted or fixed-length byte fields that are neither
//! guaranteed to be valid UTF-8 nor NUL-terminated; these types keep the exact bytes while
//! offering a lossless escaped rendering (`b"..."`) and a lossy text rendering.

use std::array::TryFromSliceError;
use std::fmt;
use std::ops::Index;


fn write_escaped(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "b\"")?;
    for &b in bytes {
        match b {
            0x00 => write!(f, "\\0")?,
            0x09 => write!(f, "\\t")?,
            0x0A => write!(f, "\\n")?,
            0x0D => write!(f, "\\r")?,
            0x22 => write!(f, "\\\"")?,
            // no need to escape 0x27
            0x5C => write!(f, "\\\\")?,
            0x20..=0x7E => write!(f, "{}", char::from(b))?,
            other => write!(f, "\\x{:02X}", other)?,
        }
    }
    write!(f, "\"")
}

/// Renders a byte field as text, stopping at the first NUL and replacing anything that is not
/// printable ASCII with `.`.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TruncatedText<'a>(&'a [u8]);
impl<'a> TruncatedText<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    /// The bytes that will be rendered, i.e. everything before the first NUL.
    pub fn visible_bytes(&self) -> &'a [u8] {
        match self.0.iter().position(|&b| b == 0x00) {
            Some(nul_index) => &self.0[..nul_index],
            None => self.0,
        }
    }
}
impl<'a> fmt::Debug for TruncatedText<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TruncatedText({:?})", self.to_string())
    }
}
impl<'a> fmt::Display for TruncatedText<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.visible_bytes() {
            let c = if (0x20..=0x7E).contains(&b) { char::from(b) } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}


/// A fixed-length byte field.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DisplayBytes<const SIZE: usize>([u8; SIZE]);
impl<const SIZE: usize> DisplayBytes<SIZE> {
    pub fn as_text(&self) -> TruncatedText<'_> {
        TruncatedText(&self.0)
    }
}
impl<const SIZE: usize> Default for DisplayBytes<SIZE> {
    fn default() -> Self {
        Self([0u8; SIZE])
    }
}
impl<const SIZE: usize> fmt::Debug for DisplayBytes<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayBytes({})", self)
    }
}
impl<const SIZE: usize> fmt::Display for DisplayBytes<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.0)
    }
}
impl<const SIZE: usize> From<[u8; SIZE]> for DisplayBytes<SIZE> {
    fn from(value: [u8; SIZE]) -> Self {
        Self(value)
    }
}
impl<const SIZE: usize> From<DisplayBytes<SIZE>> for [u8; SIZE] {
    fn from(value: DisplayBytes<SIZE>) -> Self {
        value.0
    }
}
impl<const SIZE: usize> TryFrom<&[u8]> for DisplayBytes<SIZE> {
    type Error = TryFromSliceError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let buf: [u8; SIZE] = value.try_into()?;
        Ok(Self(buf))
    }
}
impl<const SIZE: usize> AsRef<[u8]> for DisplayBytes<SIZE> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl<const SIZE: usize> Index<usize> for DisplayBytes<SIZE> {
    type Output = u8;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}


/// A variable-length byte string, e.g. the payload of a length-prefixed name.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DisplayBytesVec(Vec<u8>);
impl DisplayBytesVec {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_text(&self) -> TruncatedText<'_> {
        TruncatedText(&self.0)
    }
}
impl fmt::Debug for DisplayBytesVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayBytesVec({})", self)
    }
}
impl fmt::Display for DisplayBytesVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.0)
    }
}
impl From<Vec<u8>> for DisplayBytesVec {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}
impl From<DisplayBytesVec> for Vec<u8> {
    fn from(value: DisplayBytesVec) -> Self {
        value.0
    }
}
impl From<&[u8]> for DisplayBytesVec {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}
impl AsRef<[u8]> for DisplayBytesVec {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
impl Index<usize> for DisplayBytesVec {
    type Output = u8;
    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
