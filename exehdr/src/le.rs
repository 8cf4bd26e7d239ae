//! Linear Executable format (LE and LX).
//!
//! LE is used by Windows 3.x/9x virtual device drivers and some DOS extenders; LX is its OS/2 2.x
//! descendant. Only the fixed header is decoded; the object, fixup and resource tables are not.

use std::io::{Read, Seek};

use bitflags::bitflags;
use display_bytes::DisplayBytes;
use from_to_repr::from_to_other;
use tracing::warn;

use crate::{read_bytes, ByteSource, DecodeError, ReadLe};
use crate::offset::{OffsetContext, TableOffset};


pub const HEADER_SIZE: usize = 0xB0;

const MODULE_TYPE_MASK: u32 = 0x0003_8000;
const WINDOWING_MASK: u32 = 0x0000_0700;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Variant {
    Le,
    Lx,
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Header {
    pub header_offset: u64,
    pub signature: DisplayBytes<2>,
    pub byte_order: u8,
    pub word_order: u8,
    pub format_level: u32,
    pub cpu_type: CpuType, // u16
    pub os_type: OsType, // u16
    pub module_version: u32,
    pub module_flags: ModuleFlags, // u32
    pub page_count: u32,
    pub eip_object: u32,
    pub eip: u32,
    pub esp_object: u32,
    pub esp: u32,
    pub page_size: u32,
    pub page_shift_or_last_page_size: u32, // LX: page offset shift, LE: bytes on last page
    pub fixup_section_size: u32,
    pub fixup_section_checksum: u32,
    pub loader_section_size: u32,
    pub loader_section_checksum: u32,
    pub object_table: TableOffset,
    pub object_count: u32,
    pub object_page_table: TableOffset,
    pub object_iterated_pages: TableOffset,
    pub resource_table: TableOffset,
    pub resource_count: u32,
    pub resident_name_table: TableOffset,
    pub entry_table: TableOffset,
    pub module_directives_table: TableOffset,
    pub module_directives_count: u32,
    pub fixup_page_table: TableOffset,
    pub fixup_record_table: TableOffset,
    pub import_module_table: TableOffset,
    pub import_module_count: u32,
    pub import_procedure_table: TableOffset,
    pub per_page_checksum_table: TableOffset,
    pub data_pages: TableOffset, // absolute
    pub preload_page_count: u32,
    pub non_resident_name_table: TableOffset, // absolute
    pub non_resident_name_table_bytes: u32,
    pub non_resident_name_table_checksum: u32,
    pub auto_data_object: u32,
    pub debug_info: TableOffset, // absolute
    pub debug_info_bytes: u32,
    pub instance_preload_count: u32,
    pub instance_demand_count: u32,
    pub heap_size: u32,
    pub stack_size: u32,
}
impl Header {
    pub fn read<R: Read + Seek>(source: &mut ByteSource<R>, header_offset: u64) -> Result<Self, DecodeError> {
        let buf: [u8; HEADER_SIZE] = source.read_array_at(header_offset)?;

        let mut pos = 0;
        let signature: [u8; 2] = read_bytes(&buf, &mut pos);
        if &signature != b"LE" && &signature != b"LX" {
            return Err(DecodeError::UnexpectedMagic { offset: header_offset, found: signature });
        }

        let byte_order = u8::read_le(&buf, &mut pos);
        let word_order = u8::read_le(&buf, &mut pos);
        if byte_order != 0 || word_order != 0 {
            warn!(
                "linear executable at {:#010X} declares big-endian byte/word order ({}/{}); decoding as little-endian anyway",
                header_offset, byte_order, word_order,
            );
        }

        let relative = |pos: &mut usize| TableOffset::header_relative(u32::read_le(&buf, pos));

        let format_level = u32::read_le(&buf, &mut pos);
        let cpu_type = CpuType::from_base_type(u16::read_le(&buf, &mut pos));
        let os_type = OsType::from_base_type(u16::read_le(&buf, &mut pos));
        let module_version = u32::read_le(&buf, &mut pos);
        let module_flags = ModuleFlags::from_bits_retain(u32::read_le(&buf, &mut pos));
        let page_count = u32::read_le(&buf, &mut pos);
        let eip_object = u32::read_le(&buf, &mut pos);
        let eip = u32::read_le(&buf, &mut pos);
        let esp_object = u32::read_le(&buf, &mut pos);
        let esp = u32::read_le(&buf, &mut pos);
        let page_size = u32::read_le(&buf, &mut pos);
        let page_shift_or_last_page_size = u32::read_le(&buf, &mut pos);
        let fixup_section_size = u32::read_le(&buf, &mut pos);
        let fixup_section_checksum = u32::read_le(&buf, &mut pos);
        let loader_section_size = u32::read_le(&buf, &mut pos);
        let loader_section_checksum = u32::read_le(&buf, &mut pos);
        let object_table = relative(&mut pos);
        let object_count = u32::read_le(&buf, &mut pos);
        let object_page_table = relative(&mut pos);
        let object_iterated_pages = relative(&mut pos);
        let resource_table = relative(&mut pos);
        let resource_count = u32::read_le(&buf, &mut pos);
        let resident_name_table = relative(&mut pos);
        let entry_table = relative(&mut pos);
        let module_directives_table = relative(&mut pos);
        let module_directives_count = u32::read_le(&buf, &mut pos);
        let fixup_page_table = relative(&mut pos);
        let fixup_record_table = relative(&mut pos);
        let import_module_table = relative(&mut pos);
        let import_module_count = u32::read_le(&buf, &mut pos);
        let import_procedure_table = relative(&mut pos);
        let per_page_checksum_table = relative(&mut pos);
        let data_pages = TableOffset::absolute(u32::read_le(&buf, &mut pos));
        let preload_page_count = u32::read_le(&buf, &mut pos);
        let non_resident_name_table = TableOffset::absolute(u32::read_le(&buf, &mut pos));
        let non_resident_name_table_bytes = u32::read_le(&buf, &mut pos);
        let non_resident_name_table_checksum = u32::read_le(&buf, &mut pos);
        let auto_data_object = u32::read_le(&buf, &mut pos);
        let debug_info = TableOffset::absolute(u32::read_le(&buf, &mut pos));
        let debug_info_bytes = u32::read_le(&buf, &mut pos);
        let instance_preload_count = u32::read_le(&buf, &mut pos);
        let instance_demand_count = u32::read_le(&buf, &mut pos);
        let heap_size = u32::read_le(&buf, &mut pos);
        let stack_size = u32::read_le(&buf, &mut pos);

        Ok(Self {
            header_offset,
            signature: signature.into(),
            byte_order,
            word_order,
            format_level,
            cpu_type,
            os_type,
            module_version,
            module_flags,
            page_count,
            eip_object,
            eip,
            esp_object,
            esp,
            page_size,
            page_shift_or_last_page_size,
            fixup_section_size,
            fixup_section_checksum,
            loader_section_size,
            loader_section_checksum,
            object_table,
            object_count,
            object_page_table,
            object_iterated_pages,
            resource_table,
            resource_count,
            resident_name_table,
            entry_table,
            module_directives_table,
            module_directives_count,
            fixup_page_table,
            fixup_record_table,
            import_module_table,
            import_module_count,
            import_procedure_table,
            per_page_checksum_table,
            data_pages,
            preload_page_count,
            non_resident_name_table,
            non_resident_name_table_bytes,
            non_resident_name_table_checksum,
            auto_data_object,
            debug_info,
            debug_info_bytes,
            instance_preload_count,
            instance_demand_count,
            heap_size,
            stack_size,
        })
    }

    pub fn variant(&self) -> Variant {
        if self.signature.as_ref() == b"LX" { Variant::Lx } else { Variant::Le }
    }

    pub fn context(&self) -> OffsetContext {
        OffsetContext {
            header_offset: self.header_offset,
            shift_count: 0,
        }
    }
}


#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u16, derive_compare = "as_int")]
pub enum CpuType {
    I80286 = 0x0001,
    I80386 = 0x0002,
    I80486 = 0x0003,
    Pentium = 0x0004,
    I860N10 = 0x0020,
    I860N11 = 0x0021,
    MipsMarkI = 0x0040,
    MipsMarkII = 0x0041,
    MipsMarkIII = 0x0042,
    Other(u16),
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u16, derive_compare = "as_int")]
pub enum OsType {
    Unknown = 0x0000,
    Os2 = 0x0001,
    Windows = 0x0002,
    Dos4 = 0x0003,
    Windows386 = 0x0004,
    Other(u16),
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u32, derive_compare = "as_int")]
pub enum ModuleType {
    Program = 0x0000_0000,
    Library = 0x0000_8000,
    ProtectedMemoryLibrary = 0x0001_8000,
    PhysicalDeviceDriver = 0x0002_0000,
    VirtualDeviceDriver = 0x0002_8000,
    Other(u32),
}

#[derive(Clone, Copy, Debug)]
#[from_to_other(base_type = u32, derive_compare = "as_int")]
pub enum WindowingCompatibility {
    Unknown = 0x0000_0000,
    Incompatible = 0x0000_0100,
    Compatible = 0x0000_0200,
    UsesWindowingApi = 0x0000_0300,
    Other(u32),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct ModuleFlags : u32 {
        const PER_PROCESS_LIBRARY_INIT = 0x0000_0004;
        const INTERNAL_FIXUPS_REMOVED = 0x0000_0010;
        const EXTERNAL_FIXUPS_REMOVED = 0x0000_0020;
        const NOT_LOADABLE = 0x0000_2000;
        const PER_PROCESS_LIBRARY_TERMINATION = 0x4000_0000;
    }
}

impl ModuleFlags {
    pub fn module_type(self) -> ModuleType {
        ModuleType::from_base_type(self.bits() & MODULE_TYPE_MASK)
    }

    pub fn windowing_compatibility(self) -> WindowingCompatibility {
        WindowingCompatibility::from_base_type(self.bits() & WINDOWING_MASK)
    }
}
