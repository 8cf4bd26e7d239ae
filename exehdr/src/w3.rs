//! W3 containers.
//!
//! Windows 3.x `WIN386.EXE` bundles its virtual device drivers in a W3 container: a short header
//! followed by a directory of modules, each an LE image stored elsewhere in the file.

use std::io::{Read, Seek};

use display_bytes::DisplayBytes;
use tracing::debug;

use crate::{read_bytes, ByteSource, DecodeError, ReadLe};
use crate::offset::TableOffset;


pub const HEADER_SIZE: usize = 16;
pub const MODULE_ENTRY_SIZE: usize = 16;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Header {
    pub header_offset: u64,
    // signature: b"W3"
    pub vmm_version: u16,
    pub module_count: u16,
    pub reserved: DisplayBytes<10>,
}
impl Header {
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>, header_offset: u64) -> Result<Self, DecodeError> {
        let buf: [u8; HEADER_SIZE] = source.read_array_at(header_offset)?;

        let mut pos = 0;
        let signature: [u8; 2] = read_bytes(&buf, &mut pos);
        if &signature != b"W3" {
            return Err(DecodeError::UnexpectedMagic { offset: header_offset, found: signature });
        }
        let vmm_version = u16::read_le(&buf, &mut pos);
        let module_count = u16::read_le(&buf, &mut pos);
        let reserved: [u8; 10] = read_bytes(&buf, &mut pos);

        Ok(Self {
            header_offset,
            vmm_version,
            module_count,
            reserved: reserved.into(),
        })
    }

    /// `(major, minor)`
    pub fn vmm_version(&self) -> (u8, u8) {
        ((self.vmm_version >> 8) as u8, (self.vmm_version & 0xFF) as u8)
    }
}


/// One row of the module directory.
///
/// The name is a fixed eight-byte field; it is padded with NULs when shorter but need not be
/// terminated at all.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ModuleEntry {
    pub name: DisplayBytes<8>,
    pub offset: TableOffset, // u32, absolute
    pub size: u32,
}
impl ModuleEntry {
    fn read_from(buf: &[u8; MODULE_ENTRY_SIZE]) -> Self {
        let mut pos = 0;
        let name: [u8; 8] = read_bytes(buf, &mut pos);
        let offset = TableOffset::absolute(u32::read_le(buf, &mut pos));
        let size = u32::read_le(buf, &mut pos);
        Self {
            name: name.into(),
            offset,
            size,
        }
    }
}


#[derive(Debug)]
pub struct Container {
    pub header: Header,
    pub modules: Result<Vec<ModuleEntry>, DecodeError>,
}
impl Container {
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>, header_offset: u64) -> Result<Self, DecodeError> {
        let header = Header::read(source, header_offset)?;
        let modules = read_module_directory(source, &header);
        Ok(Self {
            header,
            modules,
        })
    }
}


/// Reads the `module_count` entries that directly follow the header.
pub fn read_module_directory<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header) -> Result<Vec<ModuleEntry>, DecodeError> {
    let directory_offset = header.header_offset.saturating_add(HEADER_SIZE as u64);
    debug!("reading {} W3 module entries at {:#010X}", header.module_count, directory_offset);
    source.seek_to(directory_offset)?;

    let mut modules = Vec::with_capacity(header.module_count.into());
    for _ in 0..header.module_count {
        let buf: [u8; MODULE_ENTRY_SIZE] = source.read_array()?;
        modules.push(ModuleEntry::read_from(&buf));
    }
    Ok(modules)
}
