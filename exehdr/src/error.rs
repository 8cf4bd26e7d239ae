use std::fmt;
use std::io;


#[derive(Debug)]
pub enum DecodeError {
    /// The underlying stream failed while seeking to or reading at `offset`.
    Stream { offset: u64, error: io::Error },
    /// The file ended before `wanted` bytes could be read at `offset`.
    UnexpectedEof { offset: u64, wanted: usize, got: usize },
    /// An offset taken from the file points at or beyond its end.
    OffsetOutOfRange { offset: u64, file_length: u64 },
    /// A length-prefixed name at `offset` carries the 0xFF end-of-data sentinel.
    NameSentinel { offset: u64 },
    /// A header decoder was pointed at a different format.
    UnexpectedMagic { offset: u64, found: [u8; 2] },
}
impl DecodeError {
    /// Whether the failure concerns the stream itself rather than the data found in it.
    ///
    /// Stream faults abort a whole table walk; any other failure only concerns the entry whose
    /// data was being followed.
    pub fn is_stream_fault(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// Whether the failure is a short read as opposed to a stream error.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof { .. })
    }

    pub fn offset(&self) -> u64 {
        match self {
            Self::Stream { offset, .. } => *offset,
            Self::UnexpectedEof { offset, .. } => *offset,
            Self::OffsetOutOfRange { offset, .. } => *offset,
            Self::NameSentinel { offset } => *offset,
            Self::UnexpectedMagic { offset, .. } => *offset,
        }
    }
}
impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream { offset, error }
                => write!(f, "I/O error at offset {:#010X}: {}", offset, error),
            Self::UnexpectedEof { offset, wanted, got }
                => write!(f, "unexpected end of file at offset {:#010X} (wanted {} bytes, got {})", offset, wanted, got),
            Self::OffsetOutOfRange { offset, file_length }
                => write!(f, "offset {:#010X} lies outside the file ({} bytes)", offset, file_length),
            Self::NameSentinel { offset }
                => write!(f, "name at offset {:#010X} has the end-of-data length byte 0xFF", offset),
            Self::UnexpectedMagic { offset, found }
                => write!(f, "unexpected magic {:02X} {:02X} at offset {:#010X}", found[0], found[1], offset),
        }
    }
}
impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stream { error, .. } => Some(error),
            Self::UnexpectedEof { .. } => None,
            Self::OffsetOutOfRange { .. } => None,
            Self::NameSentinel { .. } => None,
            Self::UnexpectedMagic { .. } => None,
        }
    }
}


/// Separates an entry-local failure from a stream fault.
///
/// The outer `Err` carries stream faults, which must abort the surrounding walk; the inner result
/// is stored on the entry being decoded.
pub(crate) fn isolate<T>(result: Result<T, DecodeError>) -> Result<Result<T, DecodeError>, DecodeError> {
    match result {
        Err(e) if e.is_stream_fault() => Err(e),
        other => Ok(other),
    }
}
