//! The human-readable report.

use std::io::{self, Write};

use display_bytes::TruncatedText;
use exehdr::DecodeError;
use exehdr::cascade::{Decoded, NextHeader, OffsetOrigin, Outcome, Primary, Secondary};
use exehdr::le;
use exehdr::mz::BYTES_PER_PAGE;
use exehdr::ne::{
    self, ApplicationFlags, ApplicationType, DataSegmentModel, EntryBundle, Os2Flags, ProgramFlags,
    RelocationTarget, SegmentFlags, TargetOs,
};
use exehdr::w3;


/// Writes the report for one decoded file.
///
/// Tables that could not be read are noted inline; the returned list repeats those failures so
/// the caller can pass them on as warnings.
pub fn write_report<W: Write>(out: &mut W, file_name: &str, decoded: &Decoded) -> io::Result<Vec<String>> {
    let mut warnings = Vec::new();

    if let Outcome::NotMz { .. } = &decoded.outcome {
        writeln!(out, "Not a DOS/MZ executable: {}", file_name)?;
        return Ok(warnings);
    }

    if decoded.primary.is_some() || decoded.next_header.is_some() {
        writeln!(out, "{}:", file_name)?;
    }
    if let Some(primary) = &decoded.primary {
        write_primary(out, primary, &mut warnings)?;
    }
    if let Some(next_header) = &decoded.next_header {
        write_next_header(out, next_header)?;
    }

    if let Some(secondary) = &decoded.secondary {
        writeln!(out)?;
        writeln!(out)?;
        match secondary {
            Secondary::Ne(image) => write_ne(out, image, &mut warnings)?,
            Secondary::Le(header) => write_le(out, header)?,
            Secondary::W3(container) => write_w3(out, container, &mut warnings)?,
            Secondary::Pe { offset } => {
                writeln!(out, "Portable Executable header found at offset 0x{:08x}", offset)?;
                writeln!(out, "Portable Executable headers are not decoded.")?;
            },
            Secondary::Unknown { tag, value, .. } => {
                writeln!(out, "Unknown next header type: {}/0x{:04x}", tag, value)?;
            },
        }
    }

    Ok(warnings)
}


/// Describes a failure that ends the cascade, naming the file the way the diagnostics do.
pub fn failure_message(file_name: &str, error: &DecodeError) -> String {
    if error.is_eof() {
        format!("Unexpected end of file: {} ({})", file_name, error)
    } else {
        format!("Cannot read {}: {}", file_name, error)
    }
}


fn table_failure(out: &mut impl Write, warnings: &mut Vec<String>, table: &str, error: &DecodeError) -> io::Result<()> {
    writeln!(out, "  ({} unreadable: {})", table, error)?;
    warnings.push(format!("cannot read {}: {}", table, error));
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}


fn write_primary<W: Write>(out: &mut W, primary: &Primary, warnings: &mut Vec<String>) -> io::Result<()> {
    let header = &primary.header;
    let full_pages_bytes = u32::from(header.pages).saturating_sub(1) * BYTES_PER_PAGE;

    writeln!(out, "DOS executable with magic:\t{}", header.magic.as_text())?;
    writeln!(out, "Number of executable pages:\t0x{:04x} ({}+ bytes)", header.pages, full_pages_bytes)?;
    writeln!(out, "Size of final page:\t\t{} bytes", header.last_page_bytes)?;
    writeln!(out, "Total code size:\t\t0x{:08x} ({} bytes)", header.code_size(), header.code_size())?;
    writeln!(out, "Total relocation entries:\t0x{:04x}", header.relocation_items)?;
    writeln!(out, "Header size in paragraphs:\t0x{:04x} ({} bytes)", header.header_size_paragraphs, header.header_size_bytes())?;
    writeln!(out, "Minimum memory in paragraphs:\t0x{:04x} ({} bytes)", header.required_allocation_paragraphs, header.required_allocation_bytes())?;
    writeln!(out, "Maximum memory in paragraphs:\t0x{:04x} ({} bytes)", header.requested_allocation_paragraphs, header.requested_allocation_bytes())?;
    writeln!(out, "Initial CS:IP (entrypoint):\t{}", header.initial_cs_ip)?;
    writeln!(out, "Initial SS:SP (stack):\t\t{}", header.initial_ss_sp)?;
    writeln!(out, "Checksum:\t\t\t0x{:04x}", header.checksum)?;
    writeln!(out, "Relocation table offset:\t0x{:04x}", header.relocation_table_offset)?;
    writeln!(out, "Overlay:\t\t\t0x{:04x}", header.overlay)?;

    match &primary.relocations {
        Ok(relocations) => {
            for (i, relocation) in relocations.iter().enumerate() {
                writeln!(out, "  Relocation {}:\t\t{}", i, relocation)?;
            }
        },
        Err(e) => table_failure(out, warnings, "DOS relocation table", e)?,
    }
    Ok(())
}

fn write_next_header<W: Write>(out: &mut W, next_header: &NextHeader) -> io::Result<()> {
    match next_header.origin {
        OffsetOrigin::ExtendedHeader => writeln!(out, "Offset to next header:\t\t0x{:08x}", next_header.offset),
        OffsetOrigin::Override => writeln!(out, "Offset to next header:\t\t0x{:08x} (override)", next_header.offset),
    }
}


fn data_segment_model_name(model: DataSegmentModel) -> &'static str {
    match model {
        DataSegmentModel::None => "Not indicated",
        DataSegmentModel::SingleData => "SINGLEDATA",
        DataSegmentModel::MultipleData => "MULTIPLEDATA",
        DataSegmentModel::AutoData => "AUTODATA",
    }
}

fn application_type_name(application_type: ApplicationType) -> &'static str {
    match application_type {
        ApplicationType::None => "Not indicated",
        ApplicationType::Fullscreen => "OS/2 Fullscreen CUI application",
        ApplicationType::PmCompatible => "OS/2 Presentation Manager compatible CUI application",
        ApplicationType::PmGui => "Windows or Presentation Manager GUI application",
        ApplicationType::Other(_) => "Other",
    }
}

fn target_os_name(target_os: TargetOs) -> &'static str {
    match target_os {
        TargetOs::Unknown => "Unknown",
        TargetOs::Os2 => "OS/2",
        TargetOs::Windows => "Windows",
        TargetOs::EuropeanMsDos4 => "MS-DOS 4.00 (Europe)",
        TargetOs::Windows386 => "Windows/386",
        TargetOs::BorlandOss => "Borland Operating System Services",
        TargetOs::PharLapOs2 => "Phar Lap 286|DOS-Extender (OS/2)",
        TargetOs::PharLapWindows => "Phar Lap 286|DOS-Extender (Windows)",
        TargetOs::Other(_) => "Other",
    }
}

fn segment_flag_words(flags: SegmentFlags) -> String {
    let mut words = String::new();
    words.push_str(if flags.contains(SegmentFlags::DATA) { "DATA " } else { "CODE " });
    if flags.contains(SegmentFlags::ALLOCATED) { words.push_str("ALLOCATED "); }
    if flags.contains(SegmentFlags::LOADED) { words.push_str("LOADED "); }
    if flags.contains(SegmentFlags::MOVEABLE) { words.push_str("MOVEABLE "); }
    words.push_str(if flags.contains(SegmentFlags::SHARED) { "PURE " } else { "IMPURE " });
    if flags.contains(SegmentFlags::PRELOAD) { words.push_str("PRELOAD "); }
    if flags.contains(SegmentFlags::PROTECTED) { words.push_str("PROTECTED "); }
    if flags.contains(SegmentFlags::HAS_RELOCATION_INFO) { words.push_str("RELOCINFO "); }
    if flags.contains(SegmentFlags::DISCARDABLE) { words.push_str("DISCARD "); }
    words
}

fn write_ne<W: Write>(out: &mut W, image: &ne::Image, warnings: &mut Vec<String>) -> io::Result<()> {
    let header = &image.header;
    let context = header.context();
    let program = header.program_flags;
    let application = header.application_flags;
    let (windows_major, windows_minor) = header.windows_version();

    writeln!(out, "New Executable header found at offset 0x{:08x}", header.header_offset)?;
    writeln!(out, "New Executable with magic:\tNE")?;
    writeln!(out, "Linker version:\t\t\t{}.{}", header.linker_version, header.linker_revision)?;
    writeln!(out, "Entry table offset:\t\t0x{:04x} (File offset 0x{:08x})", header.entry_table.raw, header.entry_table.resolve(&context))?;
    writeln!(out, "Entry table size:\t\t0x{:04x} ({} bytes)", header.entry_table_bytes, header.entry_table_bytes)?;
    writeln!(out, "Header CRC:\t\t\t0x{:08x}", header.crc32)?;
    writeln!(out, ".EXE Flags:\t\t\t0x{:02x}", program.bits())?;
    writeln!(out, " - Data Segment Model:\t\t{}", data_segment_model_name(program.data_segment_model()))?;
    writeln!(out, " - Global initialization:\t{}", yes_no(program.contains(ProgramFlags::GLOBAL_INIT)))?;
    writeln!(out, " - Protected Mode only:\t\t{}", yes_no(program.contains(ProgramFlags::PROTECTED_MODE_ONLY)))?;
    writeln!(out, " - 8086 opcodes used:\t\t{}", yes_no(program.contains(ProgramFlags::INSTRUCTIONS_8086)))?;
    writeln!(out, " - 80286 opcodes used:\t\t{}", yes_no(program.contains(ProgramFlags::INSTRUCTIONS_80286)))?;
    writeln!(out, " - 80386 opcodes used:\t\t{}", yes_no(program.contains(ProgramFlags::INSTRUCTIONS_80386)))?;
    writeln!(out, " - FPU/80x87 opcodes used:\t{}", yes_no(program.contains(ProgramFlags::INSTRUCTIONS_80X87)))?;
    writeln!(out, "Application flags:\t\t0x{:02x}", application.bits())?;
    writeln!(out, " - Application type:\t\t{}", application_type_name(application.application_type()))?;
    writeln!(out, " - OS/2 Family executable:\t{}", yes_no(application.contains(ApplicationFlags::OS2_FAMILY)))?;
    writeln!(out, " - Is executable:\t\t{}", yes_no(application.contains(ApplicationFlags::EXECUTABLE)))?;
    writeln!(out, " - Generated with link errors:\t{}", yes_no(application.contains(ApplicationFlags::LINK_ERRORS)))?;
    writeln!(out, " - Is library (DLL or driver):\t{}", yes_no(application.contains(ApplicationFlags::LIBRARY_MODULE)))?;
    writeln!(out, "AUTODATA segment number:\t0x{:04x}", header.auto_data_segment_number)?;
    writeln!(out, "Initial heap size:\t\t0x{:04x}", header.initial_heap_size)?;
    writeln!(out, "Initial stack size:\t\t0x{:04x}", header.initial_stack_size)?;
    writeln!(out, "Initial CS:IP (entrypoint):\t{}", header.cs_ip)?;
    writeln!(out, "Initial SS:SP (stack):\t\t{}", header.ss_sp)?;
    writeln!(out, "Segment count:\t\t\t0x{:04x} ({})", header.segment_count, header.segment_count)?;
    writeln!(out, "Module reference count:\t\t0x{:04x} ({})", header.module_reference_count, header.module_reference_count)?;
    writeln!(out, "Non-resident name table size:\t0x{:04x} ({} bytes)", header.non_resident_name_table_bytes, header.non_resident_name_table_bytes)?;
    for (label, offset) in [
        ("Offset of segment table:\t", header.segment_table),
        ("Offset of resource table:\t", header.resource_table),
        ("Offset of resident name table:\t", header.resident_name_table),
        ("Offset of module table:\t\t", header.module_reference_table),
        ("Offset of imported names table:\t", header.imported_names_table),
    ] {
        writeln!(out, "{}0x{:04x} (File offset 0x{:08x})", label, offset.raw, offset.resolve(&context))?;
    }
    writeln!(out, "Non-resident names table:\t0x{:08x} (File offset)", header.non_resident_name_table.raw)?;
    writeln!(out, "Movable entry points:\t\t0x{:04x} ({})", header.movable_entry_count, header.movable_entry_count)?;
    writeln!(out, "Offset shift count:\t\t0x{:04x} ({})", header.offset_shift_count, header.offset_shift_count)?;
    writeln!(out, "Resource segment count:\t\t0x{:04x} ({})", header.resource_segment_count, header.resource_segment_count)?;
    writeln!(out, "Target operating system:\t{} (0x{:02x})", target_os_name(header.target_os), header.target_os.to_base_type())?;
    writeln!(out, " - OS/2 long filenames:\t\t{}", yes_no(header.os2_flags.contains(Os2Flags::LONG_FILE_NAMES)))?;
    writeln!(out, " - OS/2 protected mode:\t\t{}", yes_no(header.os2_flags.contains(Os2Flags::PROTECTED_MODE)))?;
    writeln!(out, " - Proportional fonts:\t\t{}", yes_no(header.os2_flags.contains(Os2Flags::PROPORTIONAL_FONTS)))?;
    writeln!(out, " - Fast-load area:\t\t{}", yes_no(header.os2_flags.contains(Os2Flags::FAST_LOAD_AREA)))?;
    writeln!(out, "Windows version:\t\t{}.{} (0x{:04x})", windows_major, windows_minor, header.expected_windows_version)?;

    writeln!(out)?;
    writeln!(out)?;
    match &image.segments {
        Ok(segments) => {
            for segment in segments {
                writeln!(out, "Segment {}: {}", segment.number, segment_flag_words(segment.flags))?;
                writeln!(out, "  Offset      (file)   Length   (dec)   MinAlloc")?;
                writeln!(
                    out,
                    "  0x{:04x}  0x{:08x}   0x{:05x}  {:5}   0x{:05x}",
                    segment.sector_offset.raw, segment.data_offset(&context),
                    segment.length(), segment.length(), segment.min_allocation(),
                )?;
                if let Some(relocations) = image.segment_relocations.iter().find(|r| r.segment_number == segment.number) {
                    write_segment_relocations(out, image, relocations, warnings)?;
                }
                writeln!(out)?;
            }
        },
        Err(e) => table_failure(out, warnings, "segment table", e)?,
    }

    match &image.module_references {
        Ok(references) => {
            writeln!(out, "Modules count: {}", references.len())?;
            for reference in references {
                match &reference.name {
                    Ok(name) => writeln!(out, "  Module {}:\t{}", reference.number, name.as_text())?,
                    Err(e) => {
                        writeln!(out, "  Module {}:\t(unreadable: {})", reference.number, e)?;
                        warnings.push(format!("cannot read name of module {}: {}", reference.number, e));
                    },
                }
            }
        },
        Err(e) => table_failure(out, warnings, "module reference table", e)?,
    }

    write_name_table(out, "Resident names", &image.resident_names, warnings)?;
    write_name_table(out, "Non-resident names", &image.non_resident_names, warnings)?;

    match &image.entry_table {
        Ok(bundles) => {
            writeln!(out, "Entry table:")?;
            let mut ordinal = 1usize;
            for bundle in bundles {
                match bundle {
                    EntryBundle::Unused { entry_count } => {
                        ordinal += usize::from(*entry_count);
                    },
                    EntryBundle::Fixed { segment_number, entries } => {
                        for entry in entries {
                            writeln!(out, "  @{}:\t{:02X}:{:04X} flags 0x{:02x}", ordinal, segment_number, entry.entry_point_offset, entry.flags.bits())?;
                            ordinal += 1;
                        }
                    },
                    EntryBundle::Movable { entries } => {
                        for entry in entries {
                            writeln!(out, "  @{}:\t{:02X}:{:04X} flags 0x{:02x} (movable)", ordinal, entry.segment_number, entry.entry_point_offset, entry.flags.bits())?;
                            ordinal += 1;
                        }
                    },
                }
            }
        },
        Err(e) => table_failure(out, warnings, "entry table", e)?,
    }
    Ok(())
}

fn write_segment_relocations<W: Write>(out: &mut W, image: &ne::Image, relocations: &ne::SegmentRelocations, warnings: &mut Vec<String>) -> io::Result<()> {
    let entries = match &relocations.entries {
        Ok(entries) => entries,
        Err(e) => {
            let table = format!("relocations of segment {}", relocations.segment_number);
            return table_failure(out, warnings, &table, e);
        },
    };
    writeln!(out, "  Relocations ({}) at 0x{:08x}:", entries.len(), relocations.table_offset)?;
    for entry in entries {
        let additive = if entry.additive { " additive" } else { "" };
        write!(out, "    0x{:04x} {:?}{}: ", entry.source_chain_offset, entry.address_type, additive)?;
        let module_name = |number: u16| {
            image.module_name(number)
                .map(|name| name.as_text().to_string())
                .unwrap_or_else(|| format!("#{}", number))
        };
        match &entry.target {
            RelocationTarget::InternalReferenceToFixedSegment { segment_number, offset_into_segment } => {
                writeln!(out, "segment {}:0x{:04x}", segment_number, offset_into_segment)?;
            },
            RelocationTarget::InternalReferenceToMovableSegment { entry_ordinal } => {
                writeln!(out, "movable entry @{}", entry_ordinal)?;
            },
            RelocationTarget::ImportOrdinal { module_number, procedure_ordinal } => {
                writeln!(out, "{}.{}", module_name(*module_number), procedure_ordinal)?;
            },
            RelocationTarget::ImportName { module_number, procedure_name, .. } => {
                match procedure_name {
                    Ok(name) => writeln!(out, "{}.{}", module_name(*module_number), name.as_text())?,
                    Err(e) => {
                        writeln!(out, "{}.(unreadable: {})", module_name(*module_number), e)?;
                        warnings.push(format!("cannot read imported procedure name: {}", e));
                    },
                }
            },
            RelocationTarget::OperatingSystemFixup { fixup_type } => {
                writeln!(out, "OS fixup {:?}", fixup_type)?;
            },
        }
    }
    Ok(())
}

fn write_name_table<W: Write>(out: &mut W, title: &str, table: &Result<Vec<ne::NameTableEntry>, DecodeError>, warnings: &mut Vec<String>) -> io::Result<()> {
    match table {
        Ok(entries) => {
            writeln!(out, "{}:", title)?;
            for entry in entries {
                writeln!(out, "  @{}:\t{}", entry.ordinal_number, entry.name.as_text())?;
            }
            Ok(())
        },
        Err(e) => table_failure(out, warnings, &title.to_lowercase(), e),
    }
}


fn write_le<W: Write>(out: &mut W, header: &le::Header) -> io::Result<()> {
    let flags = header.module_flags;
    let variant = match header.variant() {
        le::Variant::Le => "LE",
        le::Variant::Lx => "LX",
    };

    writeln!(out, "Linear Executable header found at offset 0x{:08x}", header.header_offset)?;
    writeln!(out, "Linear Executable with magic:\t{}", variant)?;
    writeln!(out, "Byte order / word order:\t{} / {}", header.byte_order, header.word_order)?;
    writeln!(out, "Format level:\t\t\t{}", header.format_level)?;
    writeln!(out, "CPU type:\t\t\t{:?}", header.cpu_type)?;
    writeln!(out, "Target operating system:\t{:?}", header.os_type)?;
    writeln!(out, "Module version:\t\t\t0x{:08x}", header.module_version)?;
    writeln!(out, "Module flags:\t\t\t0x{:08x}", flags.bits())?;
    writeln!(out, " - Module type:\t\t\t{:?}", flags.module_type())?;
    writeln!(out, " - PM windowing:\t\t{:?}", flags.windowing_compatibility())?;
    writeln!(out, " - Per-process library init:\t{}", yes_no(flags.contains(le::ModuleFlags::PER_PROCESS_LIBRARY_INIT)))?;
    writeln!(out, " - Per-process library term:\t{}", yes_no(flags.contains(le::ModuleFlags::PER_PROCESS_LIBRARY_TERMINATION)))?;
    writeln!(out, " - Internal fixups removed:\t{}", yes_no(flags.contains(le::ModuleFlags::INTERNAL_FIXUPS_REMOVED)))?;
    writeln!(out, " - External fixups removed:\t{}", yes_no(flags.contains(le::ModuleFlags::EXTERNAL_FIXUPS_REMOVED)))?;
    writeln!(out, " - Not loadable:\t\t{}", yes_no(flags.contains(le::ModuleFlags::NOT_LOADABLE)))?;
    writeln!(out, "Page count:\t\t\t{}", header.page_count)?;
    writeln!(out, "Page size:\t\t\t0x{:08x}", header.page_size)?;
    writeln!(out, "Initial CS:EIP (entrypoint):\tobject {}:0x{:08x}", header.eip_object, header.eip)?;
    writeln!(out, "Initial SS:ESP (stack):\t\tobject {}:0x{:08x}", header.esp_object, header.esp)?;
    writeln!(out, "Object table:\t\t\t{} ({} objects)", header.object_table, header.object_count)?;
    writeln!(out, "Resource table:\t\t\t{} ({} resources)", header.resource_table, header.resource_count)?;
    writeln!(out, "Resident name table:\t\t{}", header.resident_name_table)?;
    writeln!(out, "Entry table:\t\t\t{}", header.entry_table)?;
    writeln!(out, "Fixup page table:\t\t{}", header.fixup_page_table)?;
    writeln!(out, "Fixup record table:\t\t{}", header.fixup_record_table)?;
    writeln!(out, "Import module table:\t\t{} ({} modules)", header.import_module_table, header.import_module_count)?;
    writeln!(out, "Data pages:\t\t\t{}", header.data_pages)?;
    writeln!(out, "Non-resident name table:\t{} ({} bytes)", header.non_resident_name_table, header.non_resident_name_table_bytes)?;
    writeln!(out, "Heap size:\t\t\t0x{:08x}", header.heap_size)?;
    writeln!(out, "Stack size:\t\t\t0x{:08x}", header.stack_size)?;
    writeln!(out, "Object, fixup and resource tables: not yet decoded")?;
    Ok(())
}


fn write_w3<W: Write>(out: &mut W, container: &w3::Container, warnings: &mut Vec<String>) -> io::Result<()> {
    let header = &container.header;
    let (vmm_major, vmm_minor) = header.vmm_version();

    writeln!(out, "W3 container found at offset 0x{:08x}", header.header_offset)?;
    writeln!(out, "VMM version:\t\t\t{}.{} (0x{:04x})", vmm_major, vmm_minor, header.vmm_version)?;
    writeln!(out, "Module count:\t\t\t{}", header.module_count)?;
    match &container.modules {
        Ok(modules) => {
            writeln!(out, "  Name       Offset       Size")?;
            for module in modules {
                let name = TruncatedText::new(module.name.as_ref());
                writeln!(out, "  {:<8}   0x{:08x}   0x{:08x}", name.to_string(), module.offset.raw, module.size)?;
            }
        },
        Err(e) => table_failure(out, warnings, "W3 module directory", e)?,
    }
    Ok(())
}
