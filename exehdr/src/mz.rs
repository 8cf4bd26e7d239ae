//! MZ (Mark Zbikowski) executable format.
//!
//! MZ executables are the native DOS executable format.
//!
//! Every NE, LE and PE executable is simultaneously an MZ executable. Such files carry an extended
//! header directly after the classic one, whose last field holds the absolute file offset of the
//! next header in the chain.

use std::fmt;
use std::io::{Read, Seek};

use display_bytes::DisplayBytes;
use tracing::debug;

use crate::{read_bytes, ByteSource, DecodeError, ReadLe};
use crate::offset::TableOffset;


pub const BYTES_PER_PARAGRAPH: u32 = 16;
pub const BYTES_PER_PAGE: u32 = 512;

pub const PRIMARY_HEADER_SIZE: usize = 28;
pub const EXTENDED_HEADER_OFFSET: u64 = PRIMARY_HEADER_SIZE as u64;
pub const EXTENDED_HEADER_SIZE: usize = 36;

/// A relocation table at or beyond this offset leaves room for the extended header.
pub const EXTENDED_HEADER_THRESHOLD: u16 = 0x0040;


/// Whether the two bytes are the MZ signature.
///
/// Some early DOS toolchains wrote the signature as `ZM`; both orders are accepted for the sake of
/// those files, although DOS itself only ever needed `MZ`.
pub fn is_mz_magic(magic: [u8; 2]) -> bool {
    &magic == b"MZ" || &magic == b"ZM"
}


#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FarPointer {
    pub segment: u16,
    pub offset: u16,
}
impl FarPointer {
    /// Decodes the offset-then-segment layout used by NE headers and relocation tables.
    pub fn from_le_u32(value: u32) -> Self {
        Self {
            segment: (value >> 16) as u16,
            offset: (value & 0xFFFF) as u16,
        }
    }
}
impl fmt::Display for FarPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MagicCheck {
    Mz(PrimaryHeader),
    NotMz { magic: DisplayBytes<2> },
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PrimaryHeader {
    pub magic: DisplayBytes<2>,
    pub last_page_bytes: u16,
    pub pages: u16,
    pub relocation_items: u16,
    pub header_size_paragraphs: u16,
    pub required_allocation_paragraphs: u16,
    pub requested_allocation_paragraphs: u16,
    pub initial_ss_sp: FarPointer,
    pub checksum: u16,
    pub initial_cs_ip: FarPointer,
    pub relocation_table_offset: u16,
    pub overlay: u16,
}
impl PrimaryHeader {
    /// Reads the header at the start of the file.
    ///
    /// A file without the MZ signature is not an error; it is reported as
    /// [`MagicCheck::NotMz`].
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>) -> Result<MagicCheck, DecodeError> {
        let header_buf: [u8; PRIMARY_HEADER_SIZE] = source.read_array_at(0)?;

        let mut pos = 0;
        let magic: [u8; 2] = read_bytes(&header_buf, &mut pos);
        if !is_mz_magic(magic) {
            debug!("no MZ signature; found {:02X} {:02X}", magic[0], magic[1]);
            return Ok(MagicCheck::NotMz { magic: magic.into() });
        }

        let last_page_bytes = u16::read_le(&header_buf, &mut pos);
        let pages = u16::read_le(&header_buf, &mut pos);
        let relocation_items = u16::read_le(&header_buf, &mut pos);
        let header_size_paragraphs = u16::read_le(&header_buf, &mut pos);
        let required_allocation_paragraphs = u16::read_le(&header_buf, &mut pos);
        let requested_allocation_paragraphs = u16::read_le(&header_buf, &mut pos);
        let initial_ss = u16::read_le(&header_buf, &mut pos);
        let initial_sp = u16::read_le(&header_buf, &mut pos);
        let checksum = u16::read_le(&header_buf, &mut pos);
        let initial_ip = u16::read_le(&header_buf, &mut pos);
        let initial_cs = u16::read_le(&header_buf, &mut pos);
        let relocation_table_offset = u16::read_le(&header_buf, &mut pos);
        let overlay = u16::read_le(&header_buf, &mut pos);

        Ok(MagicCheck::Mz(Self {
            magic: magic.into(),
            last_page_bytes,
            pages,
            relocation_items,
            header_size_paragraphs,
            required_allocation_paragraphs,
            requested_allocation_paragraphs,
            initial_ss_sp: FarPointer { segment: initial_ss, offset: initial_sp },
            checksum,
            initial_cs_ip: FarPointer { segment: initial_cs, offset: initial_ip },
            relocation_table_offset,
            overlay,
        }))
    }

    /// `(pages - 1) * 512 + last_page_bytes`; a page count of zero counts as one page.
    pub fn code_size(&self) -> u32 {
        u32::from(self.pages).saturating_sub(1) * BYTES_PER_PAGE + u32::from(self.last_page_bytes)
    }

    pub fn has_extended_header(&self) -> bool {
        self.relocation_table_offset >= EXTENDED_HEADER_THRESHOLD
    }

    pub fn header_size_bytes(&self) -> u32 {
        u32::from(self.header_size_paragraphs) * BYTES_PER_PARAGRAPH
    }

    pub fn required_allocation_bytes(&self) -> u32 {
        u32::from(self.required_allocation_paragraphs) * BYTES_PER_PARAGRAPH
    }

    pub fn requested_allocation_bytes(&self) -> u32 {
        u32::from(self.requested_allocation_paragraphs) * BYTES_PER_PARAGRAPH
    }

    pub fn relocation_table(&self) -> TableOffset {
        TableOffset::absolute(self.relocation_table_offset.into())
    }

    /// Reads the DOS relocation table.
    pub fn read_relocations<R: Read + Seek>(&self, source: &mut ByteSource<R>) -> Result<Vec<FarPointer>, DecodeError> {
        source.seek_to(self.relocation_table_offset.into())?;

        let mut relocations = Vec::with_capacity(self.relocation_items.into());
        for _ in 0..self.relocation_items {
            let buf: [u8; 4] = source.read_array()?;
            relocations.push(FarPointer::from_le_u32(u32::from_le_bytes(buf)));
        }
        Ok(relocations)
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ExtendedHeader {
    pub reserved: DisplayBytes<4>,
    pub behavior_flags: u16,
    pub behavior_data: DisplayBytes<26>,
    pub next_header_offset: u32,
}
impl ExtendedHeader {
    /// Reads the extended header that directly follows the primary header.
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>) -> Result<Self, DecodeError> {
        let buf: [u8; EXTENDED_HEADER_SIZE] = source.read_array_at(EXTENDED_HEADER_OFFSET)?;

        let mut pos = 0;
        let reserved: [u8; 4] = read_bytes(&buf, &mut pos);
        let behavior_flags = u16::read_le(&buf, &mut pos);
        let behavior_data: [u8; 26] = read_bytes(&buf, &mut pos);
        let next_header_offset = u32::read_le(&buf, &mut pos);
        debug!("extended MZ header points at {:#010X}", next_header_offset);

        Ok(Self {
            reserved: reserved.into(),
            behavior_flags,
            behavior_data: behavior_data.into(),
            next_header_offset,
        })
    }

    pub fn next_header(&self) -> TableOffset {
        TableOffset::absolute(self.next_header_offset)
    }
}
