//! Builders for synthetic executables used by the unit tests.

use std::io::{self, Cursor, Read, Seek, SeekFrom};


pub(crate) fn put_u16(buf: &mut [u8], pos: usize, value: u16) {
    buf[pos..pos+2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut [u8], pos: usize, value: u32) {
    buf[pos..pos+4].copy_from_slice(&value.to_le_bytes());
}

/// Writes `bytes` at `pos`, growing the buffer with zeroes if necessary.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, pos: usize, bytes: &[u8]) {
    if buf.len() < pos + bytes.len() {
        buf.resize(pos + bytes.len(), 0);
    }
    buf[pos..pos+bytes.len()].copy_from_slice(bytes);
}

/// Serves `data` like a `Cursor`, except that reading at or beyond `fail_from` fails with an I/O
/// error that is not `Interrupted`.
pub(crate) struct FailingReader {
    inner: Cursor<Vec<u8>>,
    fail_from: u64,
}
impl FailingReader {
    pub fn new(data: Vec<u8>, fail_from: u64) -> Self {
        Self { inner: Cursor::new(data), fail_from }
    }
}
impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.inner.position();
        if position >= self.fail_from {
            return Err(io::Error::other("media error"));
        }
        let allowed = usize::try_from(self.fail_from - position).unwrap_or(usize::MAX).min(buf.len());
        self.inner.read(&mut buf[..allowed])
    }
}
impl Seek for FailingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// A 64-byte MZ stub whose extended header points at `next_header`.
pub(crate) fn mz_stub(next_header: u32) -> Vec<u8> {
    let mut data = vec![0u8; 0x40];
    data[0] = b'M';
    data[1] = b'Z';
    put_u16(&mut data, 0x02, 0x0040); // bytes on last page
    put_u16(&mut data, 0x04, 0x0001); // pages
    put_u16(&mut data, 0x08, 0x0004); // header paragraphs
    put_u16(&mut data, 0x18, 0x0040); // relocation table offset
    put_u32(&mut data, 0x3C, next_header);
    data
}


pub(crate) const NE_OFFSET: usize = 0x80;
pub(crate) const NE_SEGMENT_TABLE: usize = 0x40;
pub(crate) const NE_RESIDENT_NAMES: usize = 0x60;
pub(crate) const NE_MODULE_TABLE: usize = 0x80;
pub(crate) const NE_IMPORTED_NAMES: usize = 0x90;
pub(crate) const NE_ENTRY_TABLE: usize = 0xF0;
pub(crate) const NE_NON_RESIDENT_NAMES: usize = 0x300;
pub(crate) const NE_SHIFT_COUNT: u16 = 4;
pub(crate) const NE_RELOCATIONS: usize = 0x420;

/// A synthetic NE executable and the offsets a test may want to poke at.
pub(crate) struct NeFile {
    pub data: Vec<u8>,
    /// Relative to the imported-names table.
    pub module_name_offsets: Vec<u16>,
    /// Relative to the imported-names table.
    pub procedure_name_offset: u16,
}
impl NeFile {
    /// Absolute file position of the length byte of the given imported name.
    pub fn imported_name_location(&self, name_offset: u16) -> usize {
        NE_OFFSET + NE_IMPORTED_NAMES + usize::from(name_offset)
    }
}

/// One NE relocation record; `first` and `second` are the two words of the target.
pub(crate) fn relocation_record(address_type: u8, type_and_flags: u8, source_offset: u16, first: u16, second: u16) -> [u8; 8] {
    let mut record = [0u8; 8];
    record[0] = address_type;
    record[1] = type_and_flags;
    put_u16(&mut record, 2, source_offset);
    put_u16(&mut record, 4, first);
    put_u16(&mut record, 6, second);
    record
}

/// An MZ stub followed by an NE header at 0x80 importing `modules`.
///
/// Segment 1 (code, sectors 0x40 = 0x400, 0x20 bytes) carries two relocations: an import by
/// ordinal from module 1 and an additive import by name from module 2. Segment 2 (data, not in
/// the file) stores 0 for both its length and minimum allocation.
pub(crate) fn ne_file(modules: &[&[u8]]) -> NeFile {
    let h = NE_OFFSET;
    let mut data = mz_stub(h as u32);
    data.resize(h + 0x40, 0);

    data[h] = b'N';
    data[h+1] = b'E';
    data[h+0x02] = 5; // linker version
    data[h+0x03] = 10; // linker revision
    put_u16(&mut data, h+0x04, NE_ENTRY_TABLE as u16);
    put_u16(&mut data, h+0x06, 14); // entry table bytes
    put_u32(&mut data, h+0x08, 0xDEADBEEF);
    data[h+0x0C] = 0x02 | 0x20; // MULTIPLEDATA, 80286
    data[h+0x0D] = 0x03 | 0x80; // PM GUI, library
    put_u16(&mut data, h+0x0E, 2); // auto data segment
    put_u16(&mut data, h+0x10, 0x0400); // heap
    put_u16(&mut data, h+0x12, 0x1000); // stack
    put_u32(&mut data, h+0x14, 0x0001_0010); // CS:IP
    put_u32(&mut data, h+0x18, 0x0002_0000); // SS:SP
    put_u16(&mut data, h+0x1C, 2); // segments
    put_u16(&mut data, h+0x1E, modules.len() as u16);
    put_u16(&mut data, h+0x20, 15); // non-resident name table bytes
    put_u16(&mut data, h+0x22, NE_SEGMENT_TABLE as u16);
    put_u16(&mut data, h+0x24, NE_RESIDENT_NAMES as u16); // no resources
    put_u16(&mut data, h+0x26, NE_RESIDENT_NAMES as u16);
    put_u16(&mut data, h+0x28, NE_MODULE_TABLE as u16);
    put_u16(&mut data, h+0x2A, NE_IMPORTED_NAMES as u16);
    put_u32(&mut data, h+0x2C, NE_NON_RESIDENT_NAMES as u32);
    put_u16(&mut data, h+0x30, 1); // movable entries
    put_u16(&mut data, h+0x32, NE_SHIFT_COUNT);
    data[h+0x36] = 0x02; // Windows
    data[h+0x37] = 0x08; // fast-load area
    put_u16(&mut data, h+0x3E, 0x030A); // Windows 3.10

    // segment table
    let mut segments = [0u8; 16];
    put_u16(&mut segments, 0, 0x0040);
    put_u16(&mut segments, 2, 0x0020);
    put_u16(&mut segments, 4, 0x0150); // MOVEABLE | PRELOAD | HAS_RELOCATION_INFO
    put_u16(&mut segments, 6, 0x0020);
    put_u16(&mut segments, 8, 0x0050);
    put_u16(&mut segments, 10, 0x0000);
    put_u16(&mut segments, 12, 0x0001); // DATA
    put_u16(&mut segments, 14, 0x0000);
    put_bytes(&mut data, h + NE_SEGMENT_TABLE, &segments);

    // resident names: the module name with ordinal 0
    put_bytes(&mut data, h + NE_RESIDENT_NAMES, b"\x07TESTMOD\x00\x00\x00");

    // imported names, starting with the customary empty name
    let mut imported = vec![0u8];
    let mut module_name_offsets = Vec::with_capacity(modules.len());
    for module in modules {
        module_name_offsets.push(imported.len() as u16);
        imported.push(module.len() as u8);
        imported.extend_from_slice(module);
    }
    let procedure_name_offset = imported.len() as u16;
    imported.extend_from_slice(b"\x07DoThing");
    put_bytes(&mut data, h + NE_IMPORTED_NAMES, &imported);

    // module reference table
    for (i, offset) in module_name_offsets.iter().enumerate() {
        put_bytes(&mut data, h + NE_MODULE_TABLE + 2*i, &offset.to_le_bytes());
    }

    // entry table: one fixed bundle in segment 1, one movable bundle
    put_bytes(
        &mut data,
        h + NE_ENTRY_TABLE,
        b"\x01\x01\x01\x10\x00\x01\xFF\x01\xCD\x3F\x02\x04\x00\x00",
    );

    // non-resident names: the description with ordinal 0
    put_bytes(&mut data, NE_NON_RESIDENT_NAMES, b"\x0BTest module\x00\x00\x00");

    // segment 1 data followed by its relocations
    put_bytes(&mut data, 0x400, &[0x90; 0x20]);
    let mut relocations = 2u16.to_le_bytes().to_vec();
    // far address, import by ordinal
    relocations.extend_from_slice(&relocation_record(0x03, 0x01, 0x0004, 1, 5));
    // far address, import by name, additive
    relocations.extend_from_slice(&relocation_record(0x03, 0x02 | 0x04, 0x0008, 2, procedure_name_offset));
    put_bytes(&mut data, NE_RELOCATIONS, &relocations);

    NeFile {
        data,
        module_name_offsets,
        procedure_name_offset,
    }
}
