//! New Executable (or Segmented Executable) format.
//!
//! The NE format was introduced with Windows 1.0 and OS/2 1.x and supplanted by PE in Windows NT
//! 3.1 and Windows 95.
//!
//! Almost every table offset in the NE header counts from the start of the NE header itself. The
//! exceptions are the non-resident-name table, whose offset counts from the start of the file, and
//! the per-segment data offsets, which count sectors of `1 << offset_shift_count` bytes from the
//! start of the file.

use std::io::{Read, Seek};

use bitflags::bitflags;
use display_bytes::{DisplayBytes, DisplayBytesVec};
use from_to_repr::from_to_other;
use tracing::debug;

use crate::{read_bytes, ByteSource, DecodeError, ReadLe};
use crate::error::isolate;
use crate::mz::FarPointer;
use crate::offset::{OffsetContext, TableOffset};


pub const HEADER_SIZE: usize = 64;
const MODULE_REFERENCE_SIZE: u64 = 2;
const SEGMENT_RECORD_SIZE: usize = 8;
const RELOCATION_RECORD_SIZE: usize = 8;

/// A stored segment size of 0 stands for this many bytes.
pub const MAX_SEGMENT_SIZE: u32 = 0x1_0000;

/// Segment number marking a movable-segment reference in entry bundles and relocations.
const MOVABLE_SEGMENT_INDICATOR: u8 = 0xFF;


/// Whether a name length byte is the 0xFF end-of-data sentinel (-1 when read as signed).
fn is_length_sentinel(length: u8) -> bool {
    length as i8 == -1
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Header {
    /// Absolute file offset of the b"NE" signature.
    pub header_offset: u64,

    // signature: b"NE",
    pub linker_version: u8,
    pub linker_revision: u8,
    pub entry_table: TableOffset, // u16
    pub entry_table_bytes: u16,
    pub crc32: u32,
    pub program_flags: ProgramFlags, // u8
    pub application_flags: ApplicationFlags, // u8
    pub auto_data_segment_number: u16,
    pub initial_heap_size: u16,
    pub initial_stack_size: u16,
    pub cs_ip: FarPointer, // u32
    pub ss_sp: FarPointer, // u32
    pub segment_count: u16,
    pub module_reference_count: u16,
    pub non_resident_name_table_bytes: u16,
    pub segment_table: TableOffset, // u16
    pub resource_table: TableOffset, // u16
    pub resident_name_table: TableOffset, // u16
    pub module_reference_table: TableOffset, // u16
    pub imported_names_table: TableOffset, // u16
    pub non_resident_name_table: TableOffset, // u32, absolute!
    pub movable_entry_count: u16,
    pub offset_shift_count: u16, // == log_2(sector size)
    pub resource_segment_count: u16,
    pub target_os: TargetOs, // u8
    pub os2_flags: Os2Flags, // u8
    pub return_thunks_offset: u16,
    pub segment_reference_thunks_offset: u16,
    pub min_code_swap_area: u16,
    pub expected_windows_version: u16, // minor in the low byte, major in the high byte
}
impl Header {
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>, header_offset: u64) -> Result<Self, DecodeError> {
        let header_buf: [u8; HEADER_SIZE] = source.read_array_at(header_offset)?;

        let mut pos = 0;
        let signature: [u8; 2] = read_bytes(&header_buf, &mut pos);
        if &signature != b"NE" {
            return Err(DecodeError::UnexpectedMagic { offset: header_offset, found: signature });
        }

        let linker_version = u8::read_le(&header_buf, &mut pos);
        let linker_revision = u8::read_le(&header_buf, &mut pos);
        let entry_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let entry_table_bytes = u16::read_le(&header_buf, &mut pos);
        let crc32 = u32::read_le(&header_buf, &mut pos);
        let program_flags = ProgramFlags::from_bits_retain(u8::read_le(&header_buf, &mut pos));
        let application_flags = ApplicationFlags::from_bits_retain(u8::read_le(&header_buf, &mut pos));
        let auto_data_segment_number = u16::read_le(&header_buf, &mut pos);
        let initial_heap_size = u16::read_le(&header_buf, &mut pos);
        let initial_stack_size = u16::read_le(&header_buf, &mut pos);
        let cs_ip = FarPointer::from_le_u32(u32::read_le(&header_buf, &mut pos));
        let ss_sp = FarPointer::from_le_u32(u32::read_le(&header_buf, &mut pos));
        let segment_count = u16::read_le(&header_buf, &mut pos);
        let module_reference_count = u16::read_le(&header_buf, &mut pos);
        let non_resident_name_table_bytes = u16::read_le(&header_buf, &mut pos);
        let segment_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let resource_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let resident_name_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let module_reference_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let imported_names_table = TableOffset::header_relative(u16::read_le(&header_buf, &mut pos).into());
        let non_resident_name_table = TableOffset::absolute(u32::read_le(&header_buf, &mut pos));
        let movable_entry_count = u16::read_le(&header_buf, &mut pos);
        let offset_shift_count = u16::read_le(&header_buf, &mut pos);
        let resource_segment_count = u16::read_le(&header_buf, &mut pos);
        let target_os = TargetOs::from_base_type(u8::read_le(&header_buf, &mut pos));
        let os2_flags = Os2Flags::from_bits_retain(u8::read_le(&header_buf, &mut pos));
        let return_thunks_offset = u16::read_le(&header_buf, &mut pos);
        let segment_reference_thunks_offset = u16::read_le(&header_buf, &mut pos);
        let min_code_swap_area = u16::read_le(&header_buf, &mut pos);
        let expected_windows_version = u16::read_le(&header_buf, &mut pos);

        Ok(Self {
            header_offset,
            linker_version,
            linker_revision,
            entry_table,
            entry_table_bytes,
            crc32,
            program_flags,
            application_flags,
            auto_data_segment_number,
            initial_heap_size,
            initial_stack_size,
            cs_ip,
            ss_sp,
            segment_count,
            module_reference_count,
            non_resident_name_table_bytes,
            segment_table,
            resource_table,
            resident_name_table,
            module_reference_table,
            imported_names_table,
            non_resident_name_table,
            movable_entry_count,
            offset_shift_count,
            resource_segment_count,
            target_os,
            os2_flags,
            return_thunks_offset,
            segment_reference_thunks_offset,
            min_code_swap_area,
            expected_windows_version,
        })
    }

    pub fn context(&self) -> OffsetContext {
        OffsetContext {
            header_offset: self.header_offset,
            shift_count: self.offset_shift_count,
        }
    }

    /// `(major, minor)`
    pub fn windows_version(&self) -> (u8, u8) {
        ((self.expected_windows_version >> 8) as u8, (self.expected_windows_version & 0xFF) as u8)
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DataSegmentModel {
    None,
    SingleData,
    MultipleData,
    AutoData,
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum ApplicationType {
    None = 0x00,
    Fullscreen = 0x01,
    PmCompatible = 0x02,
    PmGui = 0x03,
    Other(u8),
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum TargetOs {
    Unknown = 0x00,
    Os2 = 0x01,
    Windows = 0x02,
    EuropeanMsDos4 = 0x03,
    Windows386 = 0x04,
    BorlandOss = 0x05,
    PharLapOs2 = 0x81,
    PharLapWindows = 0x82,
    Other(u8),
}

const DATA_MODEL_MASK: u8 = 0b0000_0011;
const APPLICATION_TYPE_MASK: u8 = 0b0000_0111;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct ProgramFlags : u8 {
        const GLOBAL_INIT = 0x04;
        const PROTECTED_MODE_ONLY = 0x08;
        const INSTRUCTIONS_8086 = 0x10;
        const INSTRUCTIONS_80286 = 0x20;
        const INSTRUCTIONS_80386 = 0x40;
        const INSTRUCTIONS_80X87 = 0x80;
    }

    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct ApplicationFlags : u8 {
        const OS2_FAMILY = 0x08;
        const EXECUTABLE = 0x10;
        const LINK_ERRORS = 0x20;
        const LIBRARY_MODULE = 0x80;
    }

    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Os2Flags : u8 {
        const LONG_FILE_NAMES = 0x01;
        const PROTECTED_MODE = 0x02;
        const PROPORTIONAL_FONTS = 0x04;
        const FAST_LOAD_AREA = 0x08;
    }

    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct SegmentFlags : u16 {
        const DATA = 0x0001;
        const ALLOCATED = 0x0002;
        const LOADED = 0x0004;
        const MOVEABLE = 0x0010;
        const SHARED = 0x0020;
        const PRELOAD = 0x0040;
        const PROTECTED = 0x0080;
        const HAS_RELOCATION_INFO = 0x0100;
        const DISCARDABLE = 0x1000;
    }

    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct EntryFlags : u8 {
        const EXPORTED = 0x01;
        const SHARED_DATA = 0x02;
    }
}

impl ProgramFlags {
    pub fn data_segment_model(self) -> DataSegmentModel {
        match self.bits() & DATA_MODEL_MASK {
            0 => DataSegmentModel::None,
            1 => DataSegmentModel::SingleData,
            2 => DataSegmentModel::MultipleData,
            _ => DataSegmentModel::AutoData,
        }
    }
}

impl ApplicationFlags {
    pub fn application_type(self) -> ApplicationType {
        ApplicationType::from_base_type(self.bits() & APPLICATION_TYPE_MASK)
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Segment {
    /// 1-based, as referenced by relocations and entry bundles.
    pub number: u16,
    pub sector_offset: TableOffset, // u16 sectors
    pub stored_length: u16,
    pub flags: SegmentFlags, // u16
    pub stored_min_allocation: u16,
}
impl Segment {
    fn from_record(number: u16, record: &[u8; SEGMENT_RECORD_SIZE]) -> Self {
        let mut pos = 0;
        let sector_offset = TableOffset::sectors(u16::read_le(record, &mut pos));
        let stored_length = u16::read_le(record, &mut pos);
        let flags = SegmentFlags::from_bits_retain(u16::read_le(record, &mut pos));
        let stored_min_allocation = u16::read_le(record, &mut pos);
        Self {
            number,
            sector_offset,
            stored_length,
            flags,
            stored_min_allocation,
        }
    }

    /// Segment length in bytes; a stored 0 means 64 KiB.
    pub fn length(&self) -> u32 {
        if self.stored_length == 0 { MAX_SEGMENT_SIZE } else { self.stored_length.into() }
    }

    /// Minimum allocation in bytes; a stored 0 means 64 KiB.
    pub fn min_allocation(&self) -> u32 {
        if self.stored_min_allocation == 0 { MAX_SEGMENT_SIZE } else { self.stored_min_allocation.into() }
    }

    pub fn is_data(&self) -> bool {
        self.flags.contains(SegmentFlags::DATA)
    }

    /// A segment with sector offset 0 has no data in the file.
    pub fn has_file_data(&self) -> bool {
        self.sector_offset.raw != 0
    }

    pub fn data_offset(&self, context: &OffsetContext) -> u64 {
        self.sector_offset.resolve(context)
    }

    /// The relocation records of a segment directly follow its data.
    pub fn relocation_table_offset(&self, context: &OffsetContext) -> Option<u64> {
        if !self.flags.contains(SegmentFlags::HAS_RELOCATION_INFO) || !self.has_file_data() {
            return None;
        }
        Some(self.data_offset(context).saturating_add(self.length().into()))
    }
}


#[derive(Debug)]
pub struct ModuleReference {
    /// 1-based, as referenced by relocations.
    pub number: u16,
    pub name_offset: u16,
    pub name: Result<DisplayBytesVec, DecodeError>,
}


#[derive(Debug)]
pub struct RelocationEntry {
    pub address_type: AddressType, // u8
    // relocation_type: lower 2 bits of u8 (see target)
    pub additive: bool, // bit 2 of u8
    pub source_chain_offset: u16,
    pub target: RelocationTarget, // all variants equivalent to [u8; 4]
}

#[derive(Debug)]
pub enum RelocationTarget {
    InternalReferenceToFixedSegment {
        segment_number: u8, // except 0xFF
        offset_into_segment: u16,
    },
    InternalReferenceToMovableSegment {
        // segment_number == 0xFF: u8,
        entry_ordinal: u16,
    },
    ImportOrdinal {
        module_number: u16,
        procedure_ordinal: u16,
    },
    ImportName {
        module_number: u16,
        procedure_name_offset: u16,
        procedure_name: Result<DisplayBytesVec, DecodeError>, // dereferenced
    },
    OperatingSystemFixup {
        fixup_type: FixupType, // u16
    },
}
impl RelocationTarget {
    pub fn module_number(&self) -> Option<u16> {
        match self {
            Self::ImportOrdinal { module_number, .. } => Some(*module_number),
            Self::ImportName { module_number, .. } => Some(*module_number),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum AddressType {
    LowByte = 0x00,
    Segment = 0x02,
    FarAddress = 0x03,
    Offset = 0x05,
    FarAddress48 = 0x0B,
    Offset32 = 0x0D,
    Other(u8),
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u16, derive_compare = "as_int")]
pub enum FixupType {
    FiarqqFjarqq = 0x0001,
    FisrqqFjsrqq = 0x0002,
    FicrqqFjcrqq = 0x0003,
    Fierqq = 0x0004,
    Fidrqq = 0x0005,
    Fiwrqq = 0x0006,
    Other(u16),
}

const RELOCATION_TYPE_MASK: u8 = 0b0000_0011;
const RELOCATION_ADDITIVE: u8 = 0b0000_0100;


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NameTableEntry {
    // length: u8,
    pub name: DisplayBytesVec, // [u8; length],
    pub ordinal_number: u16,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum EntryBundle {
    // number_of_entries: u8,
    // segment_indicator: u8, (discriminant)

    Unused {
        // segment_indicator == 0x00
        entry_count: u8,
    },
    Fixed {
        // segment_indicator in 0x01..=0xFE
        segment_number: u8,
        entries: Vec<FixedSegmentEntry>,
    },
    Movable {
        // segment_indicator == 0xFF
        entries: Vec<MovableSegmentEntry>,
    },
}
impl EntryBundle {
    /// How many ordinals the bundle occupies.
    pub fn entry_count(&self) -> usize {
        match self {
            Self::Unused { entry_count } => (*entry_count).into(),
            Self::Fixed { entries, .. } => entries.len(),
            Self::Movable { entries } => entries.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FixedSegmentEntry {
    pub flags: EntryFlags, // u8
    pub entry_point_offset: u16,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MovableSegmentEntry {
    pub flags: EntryFlags, // u8
    pub int_3fh: DisplayBytes<2>,
    pub segment_number: u8,
    pub entry_point_offset: u16,
}


/// Which of the optional walks to perform.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WalkOptions {
    pub relocations: bool,
}
impl Default for WalkOptions {
    fn default() -> Self {
        Self { relocations: true }
    }
}


#[derive(Debug)]
pub struct SegmentRelocations {
    pub segment_number: u16,
    pub table_offset: u64,
    pub entries: Result<Vec<RelocationEntry>, DecodeError>,
}


/// An NE header together with everything reachable from it.
///
/// Each table is decoded independently: a table that cannot be read leaves its siblings and the
/// header intact.
#[derive(Debug)]
pub struct Image {
    pub header: Header,
    pub segments: Result<Vec<Segment>, DecodeError>,
    pub segment_relocations: Vec<SegmentRelocations>,
    pub module_references: Result<Vec<ModuleReference>, DecodeError>,
    pub resident_names: Result<Vec<NameTableEntry>, DecodeError>,
    pub non_resident_names: Result<Vec<NameTableEntry>, DecodeError>,
    pub entry_table: Result<Vec<EntryBundle>, DecodeError>,
}
impl Image {
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>, header_offset: u64, options: &WalkOptions) -> Result<Self, DecodeError> {
        let header = Header::read(source, header_offset)?;

        let segments = read_segment_table(source, &header);
        let segment_relocations = match (&segments, options.relocations) {
            (Ok(segments), true) => read_all_relocations(source, &header, segments),
            _ => Vec::new(),
        };
        let module_references = read_module_references(source, &header);
        let resident_names = read_name_table(
            source,
            header.resident_name_table.resolve(&header.context()),
            None,
        );
        let non_resident_names = if header.non_resident_name_table_bytes == 0 || header.non_resident_name_table.raw == 0 {
            Ok(Vec::new())
        } else {
            read_name_table(
                source,
                header.non_resident_name_table.resolve(&header.context()),
                Some(header.non_resident_name_table_bytes.into()),
            )
        };
        let entry_table = read_entry_table(source, &header);

        Ok(Self {
            header,
            segments,
            segment_relocations,
            module_references,
            resident_names,
            non_resident_names,
            entry_table,
        })
    }

    /// Looks up the name of a module by its 1-based reference number.
    pub fn module_name(&self, module_number: u16) -> Option<&DisplayBytesVec> {
        let references = self.module_references.as_ref().ok()?;
        let reference = references.get(usize::from(module_number).checked_sub(1)?)?;
        reference.name.as_ref().ok()
    }
}


/// Reads a length-prefixed name at an absolute position.
pub fn read_counted_name<R: Read + Seek>(source: &mut ByteSource<R>, location: u64) -> Result<DisplayBytesVec, DecodeError> {
    let [length] = source.read_array_at::<1>(location)?;
    if is_length_sentinel(length) {
        debug!("name at {:#010X} has sentinel length", location);
        return Err(DecodeError::NameSentinel { offset: location });
    }
    let name = source.read_vec(length.into())?;
    Ok(name.into())
}

/// Reads a name from the imported-names table; `name_offset` counts from the start of that table.
pub fn read_imported_name<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header, name_offset: u16) -> Result<DisplayBytesVec, DecodeError> {
    let location = header.imported_names_table.resolve_plus(&header.context(), name_offset.into());
    read_counted_name(source, location)
}

pub fn read_segment_table<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header) -> Result<Vec<Segment>, DecodeError> {
    // the table itself is not shifted, only the offsets within it are
    let table_offset = header.segment_table.resolve(&header.context());
    debug!("segment table: {} entries at {:#010X}", header.segment_count, table_offset);
    source.seek_to(table_offset)?;

    let mut segments = Vec::with_capacity(header.segment_count.into());
    for index in 0..header.segment_count {
        let record: [u8; SEGMENT_RECORD_SIZE] = source.read_array()?;
        segments.push(Segment::from_record(index + 1, &record));
    }
    Ok(segments)
}

/// Resolves each module reference to the name it points at.
///
/// A reference whose name cannot be read keeps the failure on its own entry; a failure to read
/// the reference table itself aborts the walk.
pub fn read_module_references<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header) -> Result<Vec<ModuleReference>, DecodeError> {
    let context = header.context();
    let mut references = Vec::with_capacity(header.module_reference_count.into());
    for index in 0..header.module_reference_count {
        let local_offset = u64::from(index) * MODULE_REFERENCE_SIZE;
        let location = header.module_reference_table.resolve_plus(&context, local_offset);
        let name_offset = u16::from_le_bytes(source.read_array_at(location)?);

        let name = isolate(read_imported_name(source, header, name_offset))?;
        if let Err(e) = &name {
            debug!("module reference {} (name offset {:#06X}): {}", index + 1, name_offset, e);
        }
        references.push(ModuleReference {
            number: index + 1,
            name_offset,
            name,
        });
    }
    Ok(references)
}

fn read_all_relocations<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header, segments: &[Segment]) -> Vec<SegmentRelocations> {
    let context = header.context();
    let mut all_relocations = Vec::new();
    for segment in segments {
        let Some(table_offset) = segment.relocation_table_offset(&context) else {
            continue;
        };
        let entries = read_relocations(source, header, table_offset);
        let stream_fault = matches!(&entries, Err(e) if e.is_stream_fault());
        all_relocations.push(SegmentRelocations {
            segment_number: segment.number,
            table_offset,
            entries,
        });
        if stream_fault {
            break;
        }
    }
    all_relocations
}

/// Reads the relocation records of one segment; `table_offset` points at the record count.
pub fn read_relocations<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header, table_offset: u64) -> Result<Vec<RelocationEntry>, DecodeError> {
    source.seek_to(table_offset)?;
    let record_count = source.read_u16_le()?;
    debug!("{} relocation records at {:#010X}", record_count, table_offset);

    let mut records = Vec::with_capacity(record_count.into());
    for _ in 0..record_count {
        let record_buf: [u8; RELOCATION_RECORD_SIZE] = source.read_array()?;

        let mut pos = 0;
        let address_type = AddressType::from_base_type(u8::read_le(&record_buf, &mut pos));
        let type_and_flags = u8::read_le(&record_buf, &mut pos);
        let source_chain_offset = u16::read_le(&record_buf, &mut pos);

        let target = match type_and_flags & RELOCATION_TYPE_MASK {
            0 => {
                let segment_number = u8::read_le(&record_buf, &mut pos);
                let _zero = u8::read_le(&record_buf, &mut pos);
                let value = u16::read_le(&record_buf, &mut pos);
                if segment_number == MOVABLE_SEGMENT_INDICATOR {
                    RelocationTarget::InternalReferenceToMovableSegment {
                        entry_ordinal: value,
                    }
                } else {
                    RelocationTarget::InternalReferenceToFixedSegment {
                        segment_number,
                        offset_into_segment: value,
                    }
                }
            },
            1 => {
                let module_number = u16::read_le(&record_buf, &mut pos);
                let procedure_ordinal = u16::read_le(&record_buf, &mut pos);
                RelocationTarget::ImportOrdinal {
                    module_number,
                    procedure_ordinal,
                }
            },
            2 => {
                let module_number = u16::read_le(&record_buf, &mut pos);
                let procedure_name_offset = u16::read_le(&record_buf, &mut pos);

                // the name lives elsewhere; come back to the next record afterwards
                let procedure_name = isolate(source.with_saved_position(|s|
                    read_imported_name(s, header, procedure_name_offset)
                ))?;

                RelocationTarget::ImportName {
                    module_number,
                    procedure_name_offset,
                    procedure_name,
                }
            },
            _ => {
                let fixup_type = FixupType::from_base_type(u16::read_le(&record_buf, &mut pos));
                RelocationTarget::OperatingSystemFixup {
                    fixup_type,
                }
            },
        };

        records.push(RelocationEntry {
            address_type,
            additive: type_and_flags & RELOCATION_ADDITIVE != 0,
            source_chain_offset,
            target,
        });
    }
    Ok(records)
}

/// Reads a resident or non-resident name table: length-prefixed names, each followed by an
/// ordinal, up to a zero length byte or `byte_limit` bytes.
pub fn read_name_table<R: Read + Seek>(source: &mut ByteSource<R>, location: u64, byte_limit: Option<u64>) -> Result<Vec<NameTableEntry>, DecodeError> {
    source.seek_to(location)?;

    let mut table = Vec::new();
    loop {
        let entry_location = source.position();
        if let Some(limit) = byte_limit {
            if entry_location - location >= limit {
                break;
            }
        }

        let length = source.read_u8()?;
        if length == 0 {
            // end of table
            break;
        }
        if is_length_sentinel(length) {
            return Err(DecodeError::NameSentinel { offset: entry_location });
        }

        let name = source.read_vec(length.into())?;
        let ordinal_number = source.read_u16_le()?;
        table.push(NameTableEntry {
            name: name.into(),
            ordinal_number,
        });
    }
    Ok(table)
}

pub fn read_entry_table<R: Read + Seek>(source: &mut ByteSource<R>, header: &Header) -> Result<Vec<EntryBundle>, DecodeError> {
    let location = header.entry_table.resolve(&header.context());
    let limit = u64::from(header.entry_table_bytes);
    source.seek_to(location)?;

    let mut entry_table = Vec::new();
    while source.position() - location < limit {
        let entry_count = source.read_u8()?;
        if entry_count == 0 {
            // no more bundles
            break;
        }

        let segment_indicator = source.read_u8()?;
        let bundle = match segment_indicator {
            0x00 => {
                // unused entries
                EntryBundle::Unused { entry_count }
            },
            MOVABLE_SEGMENT_INDICATOR => {
                let mut entries = Vec::with_capacity(entry_count.into());
                for _ in 0..entry_count {
                    let entry_buf: [u8; 6] = source.read_array()?;

                    let mut pos = 0;
                    let flags = EntryFlags::from_bits_retain(u8::read_le(&entry_buf, &mut pos));
                    let int_3fh: [u8; 2] = read_bytes(&entry_buf, &mut pos);
                    let segment_number = u8::read_le(&entry_buf, &mut pos);
                    let entry_point_offset = u16::read_le(&entry_buf, &mut pos);

                    entries.push(MovableSegmentEntry {
                        flags,
                        int_3fh: int_3fh.into(),
                        segment_number,
                        entry_point_offset,
                    });
                }
                EntryBundle::Movable { entries }
            },
            other => {
                let mut entries = Vec::with_capacity(entry_count.into());
                for _ in 0..entry_count {
                    let entry_buf: [u8; 3] = source.read_array()?;

                    let mut pos = 0;
                    let flags = EntryFlags::from_bits_retain(u8::read_le(&entry_buf, &mut pos));
                    let entry_point_offset = u16::read_le(&entry_buf, &mut pos);

                    entries.push(FixedSegmentEntry {
                        flags,
                        entry_point_offset,
                    });
                }
                EntryBundle::Fixed { segment_number: other, entries }
            },
        };
        entry_table.push(bundle);
    }
    Ok(entry_table)
}


#[cfg(test)]
mod tests {
    use super::{
        read_module_references, read_segment_table, ApplicationType, DataSegmentModel, EntryBundle,
        EntryFlags, Header, Image, Os2Flags, ProgramFlags, RelocationTarget, TargetOs, WalkOptions,
    };
    use crate::{ByteSource, DecodeError};
    use crate::mz::FarPointer;
    use crate::testing::{
        ne_file, put_bytes, put_u16, relocation_record, FailingReader, NE_IMPORTED_NAMES, NE_OFFSET,
        NE_RELOCATIONS, NE_SEGMENT_TABLE,
    };
    use std::io::Cursor;
    use tracing_test::traced_test;

    fn source_for(data: Vec<u8>) -> ByteSource<Cursor<Vec<u8>>> {
        ByteSource::new(Cursor::new(data)).unwrap()
    }

    #[test]
    fn test_header_fields_and_flags() {
        let file = ne_file(&[b"KERNEL"]);
        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();

        assert_eq!((header.linker_version, header.linker_revision), (5, 10));
        assert_eq!(header.crc32, 0xDEADBEEF);
        assert_eq!(header.program_flags.data_segment_model(), DataSegmentModel::MultipleData);
        assert!(header.program_flags.contains(ProgramFlags::INSTRUCTIONS_80286));
        assert!(!header.program_flags.contains(ProgramFlags::INSTRUCTIONS_80386));
        assert_eq!(header.application_flags.application_type(), ApplicationType::PmGui);
        assert!(header.application_flags.contains(super::ApplicationFlags::LIBRARY_MODULE));
        assert_eq!(header.target_os, TargetOs::Windows);
        assert!(header.os2_flags.contains(Os2Flags::FAST_LOAD_AREA));
        assert_eq!(header.windows_version(), (3, 10));
        assert_eq!(header.cs_ip, FarPointer { segment: 1, offset: 0x10 });
        assert_eq!(header.ss_sp, FarPointer { segment: 2, offset: 0 });
        assert_eq!(header.context().header_offset, NE_OFFSET as u64);
        assert_eq!(header.context().shift_count, 4);

        // the non-resident name table is the one absolute offset
        let context = header.context();
        assert_eq!(header.non_resident_name_table.resolve(&context), 0x300);
        assert_eq!(header.module_reference_table.resolve(&context), 0x100);
    }

    #[test]
    fn test_target_os_vendor_values() {
        assert_eq!(TargetOs::from_base_type(0x81), TargetOs::PharLapOs2);
        assert_eq!(TargetOs::from_base_type(0x82), TargetOs::PharLapWindows);
        assert_eq!(TargetOs::from_base_type(0x42), TargetOs::Other(0x42));
    }

    #[test]
    fn test_wrong_magic() {
        let mut file = ne_file(&[]);
        file.data[NE_OFFSET + 1] = b'X';
        let mut source = source_for(file.data);
        let err = Header::read(&mut source, NE_OFFSET as u64).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedMagic { found: [b'N', b'X'], .. }));
    }

    #[test]
    fn test_two_module_names_in_order() {
        let file = ne_file(&[b"KERNEL", b"USER"]);
        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();

        let references = read_module_references(&mut source, &header).unwrap();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].number, 1);
        assert_eq!(references[0].name.as_ref().unwrap().as_ref(), b"KERNEL");
        assert_eq!(references[1].number, 2);
        assert_eq!(references[1].name.as_ref().unwrap().as_ref(), b"USER");
    }

    #[test]
    #[traced_test]
    fn test_sentinel_name_is_an_error() {
        let mut file = ne_file(&[b"KERNEL", b"USER", b"GDI"]);
        let location = file.imported_name_location(file.module_name_offsets[1]);
        file.data[location] = 0xFF;

        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();
        let references = read_module_references(&mut source, &header).unwrap();

        assert_eq!(references.len(), 3);
        assert_eq!(references[0].name.as_ref().unwrap().as_ref(), b"KERNEL");
        match &references[1].name {
            Err(DecodeError::NameSentinel { offset }) => assert_eq!(*offset, location as u64),
            other => panic!("expected sentinel error, got {:?}", other),
        }
        assert_eq!(references[2].name.as_ref().unwrap().as_ref(), b"GDI");
        assert!(logs_contain("sentinel length"));
    }

    #[test]
    fn test_segment_sizes_and_offsets() {
        let file = ne_file(&[]);
        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();
        let segments = read_segment_table(&mut source, &header).unwrap();
        let context = header.context();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].number, 1);
        assert!(!segments[0].is_data());
        assert_eq!(segments[0].length(), 0x20);
        assert_eq!(segments[0].min_allocation(), 0x20);
        assert_eq!(segments[0].data_offset(&context), 0x400);
        assert_eq!(segments[0].relocation_table_offset(&context), Some(NE_RELOCATIONS as u64));

        assert!(segments[1].is_data());
        assert_eq!(segments[1].stored_length, 0);
        assert_eq!(segments[1].length(), 65536);
        assert_eq!(segments[1].min_allocation(), 65536);
        assert_eq!(segments[1].relocation_table_offset(&context), None);
    }

    #[test]
    fn test_zero_substitution_is_per_field() {
        let mut file = ne_file(&[]);
        // segment 1: length 0, min allocation 0x10
        put_u16(&mut file.data, NE_OFFSET + 0x40 + 2, 0x0000);
        put_u16(&mut file.data, NE_OFFSET + 0x40 + 6, 0x0010);
        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();
        let segments = read_segment_table(&mut source, &header).unwrap();
        assert_eq!(segments[0].length(), 65536);
        assert_eq!(segments[0].min_allocation(), 0x10);
    }

    #[test]
    fn test_full_image() {
        let file = ne_file(&[b"KERNEL", b"USER"]);
        let mut source = source_for(file.data);
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();

        assert_eq!(image.segments.as_ref().unwrap().len(), 2);
        assert_eq!(image.module_name(1).unwrap().as_ref(), b"KERNEL");
        assert_eq!(image.module_name(2).unwrap().as_ref(), b"USER");
        assert!(image.module_name(0).is_none());
        assert!(image.module_name(3).is_none());

        assert_eq!(image.segment_relocations.len(), 1);
        let relocations = &image.segment_relocations[0];
        assert_eq!(relocations.segment_number, 1);
        assert_eq!(relocations.table_offset, NE_RELOCATIONS as u64);
        let entries = relocations.entries.as_ref().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].additive);
        assert_eq!(entries[0].source_chain_offset, 4);
        match &entries[0].target {
            RelocationTarget::ImportOrdinal { module_number, procedure_ordinal } => {
                assert_eq!(*module_number, 1);
                assert_eq!(*procedure_ordinal, 5);
            },
            other => panic!("unexpected target {:?}", other),
        }
        assert!(entries[1].additive);
        match &entries[1].target {
            RelocationTarget::ImportName { module_number, procedure_name_offset, procedure_name } => {
                assert_eq!(*module_number, 2);
                assert_eq!(*procedure_name_offset, file.procedure_name_offset);
                assert_eq!(procedure_name.as_ref().unwrap().as_ref(), b"DoThing");
            },
            other => panic!("unexpected target {:?}", other),
        }

        let resident = image.resident_names.as_ref().unwrap();
        assert_eq!(resident.len(), 1);
        assert_eq!(resident[0].name.as_ref(), b"TESTMOD");
        let non_resident = image.non_resident_names.as_ref().unwrap();
        assert_eq!(non_resident.len(), 1);
        assert_eq!(non_resident[0].name.as_ref(), b"Test module");

        let bundles = image.entry_table.as_ref().unwrap();
        assert_eq!(bundles.len(), 2);
        match &bundles[0] {
            EntryBundle::Fixed { segment_number, entries } => {
                assert_eq!(*segment_number, 1);
                assert_eq!(entries[0].flags, EntryFlags::EXPORTED);
                assert_eq!(entries[0].entry_point_offset, 0x10);
            },
            other => panic!("unexpected bundle {:?}", other),
        }
        match &bundles[1] {
            EntryBundle::Movable { entries } => {
                assert_eq!(entries[0].segment_number, 2);
                assert_eq!(entries[0].int_3fh.as_ref(), b"\xCD\x3F");
                assert_eq!(entries[0].entry_point_offset, 4);
            },
            other => panic!("unexpected bundle {:?}", other),
        }
    }

    #[test]
    fn test_relocations_can_be_skipped() {
        let file = ne_file(&[b"KERNEL"]);
        let mut source = source_for(file.data);
        let options = WalkOptions { relocations: false };
        let image = Image::read(&mut source, NE_OFFSET as u64, &options).unwrap();
        assert!(image.segment_relocations.is_empty());
        assert!(image.segments.is_ok());
    }

    #[test]
    fn test_bad_table_leaves_siblings_intact() {
        let mut file = ne_file(&[b"KERNEL"]);
        // far more module references than the file can hold
        put_u16(&mut file.data, NE_OFFSET + 0x1E, 0x4000);
        // truncate the relocation records
        file.data.truncate(NE_RELOCATIONS + 6);

        let mut source = source_for(file.data);
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();

        assert!(image.module_references.as_ref().unwrap_err().is_eof());
        assert_eq!(image.segments.as_ref().unwrap().len(), 2);
        assert!(image.segment_relocations[0].entries.as_ref().unwrap_err().is_eof());
        assert_eq!(image.resident_names.as_ref().unwrap().len(), 1);
        assert_eq!(image.entry_table.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_truncated_name_is_local_to_its_entry() {
        let mut file = ne_file(&[b"KERNEL", b"USER"]);
        // point module 2 past the end of the file
        put_u16(&mut file.data, NE_OFFSET + 0x80 + 2, 0x7000);
        let mut source = source_for(file.data);
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();
        let references = read_module_references(&mut source, &header).unwrap();
        assert!(references[0].name.is_ok());
        assert!(matches!(references[1].name, Err(DecodeError::OffsetOutOfRange { .. })));
    }

    #[test]
    fn test_relocation_count_follows_segment_data() {
        let file = ne_file(&[b"KERNEL", b"USER"]);
        let mut source = source_for(file.data);
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();
        let context = image.header.context();
        let segment = &image.segments.as_ref().unwrap()[0];

        // the segment data (0x90 filler) would read as a count of 0x9090
        let relocations = &image.segment_relocations[0];
        assert_eq!(segment.data_offset(&context), 0x400);
        assert_eq!(relocations.table_offset, 0x400 + 0x20);
        assert_eq!(relocations.entries.as_ref().unwrap().len(), 2);
    }

    /// Gives segment 2 a 0x10-byte body at 0x500 followed by an empty relocation table.
    fn with_second_relocated_segment(data: &mut Vec<u8>) {
        let record = NE_OFFSET + NE_SEGMENT_TABLE + 8;
        put_u16(data, record, 0x0050);
        put_u16(data, record + 2, 0x0010);
        put_u16(data, record + 4, 0x0101); // DATA | HAS_RELOCATION_INFO
        put_u16(data, record + 6, 0x0010);
        put_bytes(data, 0x510, &[0x00, 0x00]);
    }

    #[test]
    fn test_relocation_target_kinds() {
        let mut file = ne_file(&[b"KERNEL"]);
        // a 0xFF length byte right after "DoThing"
        let sentinel_name_offset = file.procedure_name_offset + 8;
        let sentinel_location = file.imported_name_location(sentinel_name_offset);
        file.data[sentinel_location] = 0xFF;

        let mut relocations = 5u16.to_le_bytes().to_vec();
        relocations.extend_from_slice(&relocation_record(0x03, 0x00, 0x0000, 0x0002, 0x0010));
        relocations.extend_from_slice(&relocation_record(0x03, 0x00, 0x0002, 0x00FF, 0x0003));
        relocations.extend_from_slice(&relocation_record(0x03, 0x02, 0x0004, 1, sentinel_name_offset));
        relocations.extend_from_slice(&relocation_record(0x02, 0x03, 0x0006, 0x0001, 0x0000));
        relocations.extend_from_slice(&relocation_record(0x03, 0x02, 0x0008, 1, file.procedure_name_offset));
        put_bytes(&mut file.data, NE_RELOCATIONS, &relocations);

        let mut source = source_for(file.data);
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();
        let entries = image.segment_relocations[0].entries.as_ref().unwrap();
        assert_eq!(entries.len(), 5);

        match &entries[0].target {
            RelocationTarget::InternalReferenceToFixedSegment { segment_number, offset_into_segment } => {
                assert_eq!(*segment_number, 2);
                assert_eq!(*offset_into_segment, 0x10);
            },
            other => panic!("unexpected target {:?}", other),
        }
        match &entries[1].target {
            RelocationTarget::InternalReferenceToMovableSegment { entry_ordinal } => assert_eq!(*entry_ordinal, 3),
            other => panic!("unexpected target {:?}", other),
        }
        match &entries[2].target {
            RelocationTarget::ImportName { procedure_name: Err(DecodeError::NameSentinel { offset }), .. } => {
                assert_eq!(*offset, sentinel_location as u64);
            },
            other => panic!("unexpected target {:?}", other),
        }
        assert_eq!(entries[3].address_type, super::AddressType::Segment);
        match &entries[3].target {
            RelocationTarget::OperatingSystemFixup { fixup_type } => assert_eq!(*fixup_type, super::FixupType::FiarqqFjarqq),
            other => panic!("unexpected target {:?}", other),
        }
        // the walk went on past the bad name
        match &entries[4].target {
            RelocationTarget::ImportName { procedure_name, .. } => {
                assert_eq!(procedure_name.as_ref().unwrap().as_ref(), b"DoThing");
            },
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_stream_fault_aborts_module_walk() {
        let file = ne_file(&[b"KERNEL", b"USER"]);
        let reader = FailingReader::new(file.data, (NE_OFFSET + NE_IMPORTED_NAMES) as u64);
        let mut source = ByteSource::new(reader).unwrap();
        let header = Header::read(&mut source, NE_OFFSET as u64).unwrap();

        let err = read_module_references(&mut source, &header).unwrap_err();
        assert!(err.is_stream_fault());
        assert!(matches!(err, DecodeError::Stream { .. }));
    }

    #[test]
    fn test_stream_fault_stops_relocation_walk() {
        let mut file = ne_file(&[b"KERNEL"]);
        with_second_relocated_segment(&mut file.data);

        // without a fault, both segments have their relocations read
        let mut source = source_for(file.data.clone());
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();
        assert_eq!(image.segment_relocations.len(), 2);
        assert_eq!(image.segment_relocations[1].segment_number, 2);
        assert_eq!(image.segment_relocations[1].table_offset, 0x510);
        assert!(image.segment_relocations[1].entries.as_ref().unwrap().is_empty());

        // a fault in segment 1's table ends the walk there
        let reader = FailingReader::new(file.data, NE_RELOCATIONS as u64);
        let mut source = ByteSource::new(reader).unwrap();
        let image = Image::read(&mut source, NE_OFFSET as u64, &WalkOptions::default()).unwrap();
        assert_eq!(image.segment_relocations.len(), 1);
        assert!(image.segment_relocations[0].entries.as_ref().unwrap_err().is_stream_fault());
        assert_eq!(image.module_name(1).unwrap().as_ref(), b"KERNEL");
        assert_eq!(image.resident_names.as_ref().unwrap().len(), 1);
    }
}
