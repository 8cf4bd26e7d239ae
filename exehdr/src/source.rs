//! Random-access reading with typed failures.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::debug;

use crate::error::DecodeError;


/// A seekable byte source over one file.
///
/// Every read is an exact read: a short read is reported as [`DecodeError::UnexpectedEof`], any
/// other failure of the underlying stream (including a failed seek) as [`DecodeError::Stream`].
#[derive(Debug)]
pub struct ByteSource<R> {
    reader: R,
    position: u64,
    length: u64,
}
impl<R: Read + Seek> ByteSource<R> {
    pub fn new(mut reader: R) -> Result<Self, DecodeError> {
        let length = reader.seek(SeekFrom::End(0))
            .map_err(|error| DecodeError::Stream { offset: 0, error })?;
        reader.seek(SeekFrom::Start(0))
            .map_err(|error| DecodeError::Stream { offset: 0, error })?;
        Ok(Self {
            reader,
            position: 0,
            length,
        })
    }

    pub fn len(&self) -> u64 { self.length }
    pub fn is_empty(&self) -> bool { self.length == 0 }
    pub fn position(&self) -> u64 { self.position }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), DecodeError> {
        if offset > self.length {
            return Err(DecodeError::OffsetOutOfRange { offset, file_length: self.length });
        }
        self.reader.seek(SeekFrom::Start(offset))
            .map_err(|error| DecodeError::Stream { offset, error })?;
        self.position = offset;
        Ok(())
    }

    /// Fills `buf` from the current position.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let offset = self.position;
        let mut total_bytes_read = 0;
        while total_bytes_read < buf.len() {
            match self.reader.read(&mut buf[total_bytes_read..]) {
                Ok(0) => break,
                Ok(n) => total_bytes_read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.position += total_bytes_read as u64;
                    return Err(DecodeError::Stream { offset, error });
                },
            }
        }
        self.position += total_bytes_read as u64;
        if total_bytes_read < buf.len() {
            debug!("short read at {:#010X}: wanted {} bytes, got {}", offset, buf.len(), total_bytes_read);
            return Err(DecodeError::UnexpectedEof {
                offset,
                wanted: buf.len(),
                got: total_bytes_read,
            });
        }
        Ok(())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_array_at<const N: usize>(&mut self, offset: u64) -> Result<[u8; N], DecodeError> {
        self.seek_to(offset)?;
        self.read_array()
    }

    pub fn read_vec(&mut self, length: usize) -> Result<Vec<u8>, DecodeError> {
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let buf: [u8; 1] = self.read_array()?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Runs a nested walk and returns the cursor to where it was before.
    pub fn with_saved_position<T, F>(&mut self, walk: F) -> Result<T, DecodeError>
        where F: FnOnce(&mut Self) -> Result<T, DecodeError>
    {
        let saved = self.position;
        let result = walk(self);
        let restored = self.seek_to(saved);
        let value = result?;
        restored?;
        Ok(value)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
