//! Container detection and the object front-end seam.
//!
//! [`Object`] dispatches over the built-in front ends (ELF, Mach-O, PE) by
//! file magic. Callers with exotic containers implement [`ObjectReader`]
//! instead: a small capability set (enumerate sections, load bytes,
//! enumerate relocations) that feeds the same section registry and
//! relocation engine the built-in front ends use.

use std::fmt;

use debugid::CodeId;

use runic_common::{Arch, Endian, FileFormat, ObjectKind};

use crate::error::{Error, ErrorKind, Result};
use crate::registry::{group, GroupChoice, SectionId, SectionRegistry};

/// Sections loaded from an object, plus anomalies observed while loading.
///
/// The anomalies feed the session's harmless-error ring once it exists.
pub(crate) struct LoadedSections<'data> {
    pub(crate) registry: SectionRegistry<'data>,
    pub(crate) anomalies: Vec<(ErrorKind, String)>,
}

/// Metadata of one section, as reported by an [`ObjectReader`].
#[derive(Clone, Debug)]
pub struct SectionInfo {
    /// The section name, in the container's native spelling.
    pub name: String,
    /// The section size in bytes.
    pub size: u64,
    /// The load address of the section.
    pub address: u64,
    /// The linked section index (ELF `sh_link` semantics).
    pub link: u32,
    /// Container-specific flags (ELF `sh_flags` semantics).
    pub flags: u64,
    /// The size of one table entry, for table-shaped sections.
    pub entry_size: u64,
}

/// One relocation record, as reported by an [`ObjectReader`].
#[derive(Clone, Copy, Debug)]
pub struct RelocEntry {
    /// Offset inside the target section.
    pub offset: u64,
    /// The architecture-specific relocation type.
    pub rtype: u32,
    /// The symbol index the relocation refers to.
    pub symbol: u32,
    /// The explicit addend (RELA); `None` means the addend is stored in
    /// the section bytes (REL).
    pub addend: Option<i64>,
}

/// The capability set a custom object reader supplies.
///
/// Implementations may be in-memory, file-backed or network-backed; the
/// pipeline only ever asks for whole sections and their relocations.
pub trait ObjectReader {
    /// Total size of the object in bytes.
    fn object_size(&self) -> u64;

    /// Reads `len` bytes at `offset` of the object.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// The byte order of the object.
    fn endianness(&self) -> Endian;

    /// The pointer width of the object in bytes (4 or 8).
    fn pointer_size(&self) -> u8;

    /// The architecture-specific machine type (ELF `e_machine` semantics).
    fn machine_type(&self) -> u16;

    /// The number of sections in the object.
    fn section_count(&self) -> usize;

    /// Metadata of the section at `index`.
    fn section_info(&self, index: usize) -> Result<SectionInfo>;

    /// The raw bytes of the section at `index`.
    fn load_section(&self, index: usize) -> Result<Vec<u8>>;

    /// The relocations applying to the section at `index`.
    ///
    /// The default is an object without relocations.
    fn relocations_for(&self, index: usize) -> Result<Vec<RelocEntry>> {
        let _ = index;
        Ok(Vec::new())
    }
}

/// What a compressed section was compressed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionKind {
    /// zlib/deflate, used by `SHF_COMPRESSED` type 1 and `.zdebug_*`.
    Zlib,
    /// zstd, used by `SHF_COMPRESSED` type 2.
    Zstd,
}

/// Decompresses section payloads.
///
/// The built-in [`ZlibDecompressor`] handles zlib; zstd-compressed objects
/// need a caller-supplied implementation backed by a zstd library.
pub trait Decompressor {
    /// Decompresses `data` into a buffer of `uncompressed_size` bytes.
    fn decompress(
        &self,
        kind: CompressionKind,
        data: &[u8],
        uncompressed_size: u64,
    ) -> Result<Vec<u8>>;
}

/// The default decompressor: zlib only.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZlibDecompressor;

impl Decompressor for ZlibDecompressor {
    fn decompress(
        &self,
        kind: CompressionKind,
        data: &[u8],
        uncompressed_size: u64,
    ) -> Result<Vec<u8>> {
        match kind {
            CompressionKind::Zlib => {
                let size =
                    usize::try_from(uncompressed_size).map_err(|_| ErrorKind::AllocFail)?;
                let mut decompressed = Vec::with_capacity(size);
                flate2::Decompress::new(true)
                    .decompress_vec(data, &mut decompressed, flate2::FlushDecompress::Finish)
                    .map_err(|e| Error::new(ErrorKind::SectionSizeOrOffsetLarge, e))?;
                Ok(decompressed)
            }
            CompressionKind::Zstd => Err(Error::new(
                ErrorKind::VersionUnsupported,
                "zstd-compressed section requires an external decompressor",
            )),
        }
    }
}

/// Writes a relocated value of `width` bytes into section data.
pub(crate) fn apply_reloc_value(
    data: &mut [u8],
    offset: usize,
    width: u8,
    value: u64,
    endian: Endian,
) -> Result<()> {
    let width = width as usize;
    let slot = data
        .get_mut(offset..offset + width)
        .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

    let bytes = match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    };
    match endian {
        Endian::Little => slot.copy_from_slice(&bytes[..width]),
        Endian::Big => slot.copy_from_slice(&bytes[8 - width..]),
    }
    Ok(())
}

/// Reads the implicit addend of a REL-style relocation from section bytes.
pub(crate) fn read_reloc_addend(
    data: &[u8],
    offset: usize,
    width: u8,
    endian: Endian,
) -> Result<i64> {
    let width = width as usize;
    let slot = data
        .get(offset..offset + width)
        .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

    let mut bytes = [0u8; 8];
    match endian {
        Endian::Little => bytes[..width].copy_from_slice(slot),
        Endian::Big => bytes[8 - width..].copy_from_slice(slot),
    }
    let value = match endian {
        Endian::Little => u64::from_le_bytes(bytes),
        Endian::Big => u64::from_be_bytes(bytes),
    };
    Ok(value as i64)
}

// ELF machine numbers this reader knows relocation widths for.
pub(crate) const EM_386: u16 = 3;
pub(crate) const EM_SPARC: u16 = 2;
pub(crate) const EM_SPARC32PLUS: u16 = 18;
pub(crate) const EM_MIPS: u16 = 8;
pub(crate) const EM_PPC: u16 = 20;
pub(crate) const EM_PPC64: u16 = 21;
pub(crate) const EM_S390: u16 = 22;
pub(crate) const EM_ARM: u16 = 40;
pub(crate) const EM_SPARCV9: u16 = 43;
pub(crate) const EM_X86_64: u16 = 62;
pub(crate) const EM_AARCH64: u16 = 183;
pub(crate) const EM_RISCV: u16 = 243;

/// The byte width written by an absolute relocation of `rtype` on
/// `machine`, or `None` for types this reader does not apply.
///
/// Only direct (`S + A`) types appear on DWARF sections of relocatable
/// objects; anything else is surfaced as an unhandled-relocation anomaly.
pub(crate) fn reloc_width(machine: u16, rtype: u32) -> Option<u8> {
    let width = match (machine, rtype) {
        (EM_386, 1) => 4,                       // R_386_32
        (EM_X86_64, 1) => 8,                    // R_X86_64_64
        (EM_X86_64, 10) | (EM_X86_64, 11) => 4, // R_X86_64_32 / _32S
        (EM_ARM, 2) => 4,                       // R_ARM_ABS32
        (EM_AARCH64, 257) => 8,                 // R_AARCH64_ABS64
        (EM_AARCH64, 258) => 4,                 // R_AARCH64_ABS32
        (EM_PPC, 1) => 4,                       // R_PPC_ADDR32
        (EM_PPC64, 1) => 4,                     // R_PPC64_ADDR32
        (EM_PPC64, 38) => 8,                    // R_PPC64_ADDR64
        (EM_MIPS, 2) => 4,                      // R_MIPS_32
        (EM_MIPS, 18) => 8,                     // R_MIPS_64
        (EM_SPARC | EM_SPARC32PLUS | EM_SPARCV9, 3) => 4, // R_SPARC_32
        (EM_SPARC | EM_SPARC32PLUS | EM_SPARCV9, 23) => 4, // R_SPARC_UA32
        (EM_SPARCV9, 32) => 8,                  // R_SPARC_64
        (EM_SPARCV9, 54) => 8,                  // R_SPARC_UA64
        (EM_S390, 4) => 4,                      // R_390_32
        (EM_S390, 22) => 8,                     // R_390_64
        (EM_RISCV, 1) => 4,                     // R_RISCV_32
        (EM_RISCV, 2) => 8,                     // R_RISCV_64
        _ => return None,
    };
    Some(width)
}

/// Maps an ELF-style machine number to an [`Arch`].
pub(crate) fn machine_arch(machine: u16, is_64: bool) -> Arch {
    match machine {
        EM_386 => Arch::X86,
        EM_X86_64 => Arch::Amd64,
        EM_ARM => Arch::Arm,
        EM_AARCH64 => Arch::Arm64,
        EM_PPC => Arch::Ppc,
        EM_PPC64 => Arch::Ppc64,
        EM_MIPS if is_64 => Arch::Mips64,
        EM_MIPS => Arch::Mips,
        EM_SPARC | EM_SPARC32PLUS => Arch::Sparc,
        EM_SPARCV9 => Arch::Sparc64,
        EM_RISCV => Arch::Riscv64,
        EM_S390 => Arch::S390x,
        _ => Arch::Unknown,
    }
}

/// An object file of any supported container format.
pub enum Object<'data> {
    /// An ELF object.
    #[cfg(feature = "elf")]
    Elf(crate::elf::ElfObject<'data>),
    /// A Mach-O object.
    #[cfg(feature = "macho")]
    MachO(crate::macho::MachObject<'data>),
    /// A PE/COFF object.
    #[cfg(feature = "pe")]
    Pe(crate::pe::PeObject<'data>),
}

macro_rules! match_inner {
    ($self:expr, $object:ident => $expr:expr) => {
        match $self {
            #[cfg(feature = "elf")]
            Object::Elf($object) => $expr,
            #[cfg(feature = "macho")]
            Object::MachO($object) => $expr,
            #[cfg(feature = "pe")]
            Object::Pe($object) => $expr,
        }
    };
}

impl<'data> Object<'data> {
    /// Identifies the container format by its magic, without parsing.
    pub fn peek(data: &[u8]) -> FileFormat {
        if data.get(..4) == Some(b"\x7fELF") {
            return FileFormat::Elf;
        }
        if let Some(magic) = data.get(..4) {
            let magic = u32::from_le_bytes(magic.try_into().unwrap());
            if matches!(magic, 0xfeed_face | 0xfeed_facf | 0xcefa_edfe | 0xcffa_edfe) {
                return FileFormat::MachO;
            }
        }
        if data.get(..2) == Some(b"MZ") {
            return FileFormat::Pe;
        }
        FileFormat::Unknown
    }

    /// Whether the buffer looks like a supported object file.
    pub fn test(data: &[u8]) -> bool {
        Object::peek(data) != FileFormat::Unknown
    }

    /// Parses the object in the buffer.
    pub fn parse(data: &'data [u8]) -> Result<Object<'data>> {
        match Object::peek(data) {
            #[cfg(feature = "elf")]
            FileFormat::Elf => crate::elf::ElfObject::parse(data).map(Object::Elf),
            #[cfg(feature = "macho")]
            FileFormat::MachO => crate::macho::MachObject::parse(data).map(Object::MachO),
            #[cfg(feature = "pe")]
            FileFormat::Pe => crate::pe::PeObject::parse(data).map(Object::Pe),
            _ => Err(Error::new(
                ErrorKind::BadMagic,
                "unrecognized or unsupported container format",
            )),
        }
    }

    /// The container format of this object.
    pub fn file_format(&self) -> FileFormat {
        match_inner!(self, object => object.file_format())
    }

    /// The byte order of this object.
    pub fn endian(&self) -> Endian {
        match_inner!(self, object => object.endian())
    }

    /// The CPU architecture of this object.
    pub fn arch(&self) -> Arch {
        match_inner!(self, object => object.arch())
    }

    /// The designated use of this object.
    pub fn kind(&self) -> ObjectKind {
        match_inner!(self, object => object.kind())
    }

    /// The pointer width of this object, in bytes.
    pub fn pointer_size(&self) -> u8 {
        match_inner!(self, object => object.pointer_size())
    }

    /// The object's code identifier (build id / UUID), if present.
    pub fn code_id(&self) -> Option<CodeId> {
        match_inner!(self, object => object.code_id())
    }

    /// Whether the object carries a `.debug_info` section in any group.
    pub fn has_debug_info(&self) -> bool {
        match_inner!(self, object => object.has_debug_info())
    }

    /// The raw contents of the `.gnu_debuglink` section, if present.
    pub fn debug_link_data(&self) -> Option<&'data [u8]> {
        match self {
            #[cfg(feature = "elf")]
            Object::Elf(elf) => elf.debug_link_data(),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    pub(crate) fn load_sections(&self, choice: GroupChoice) -> Result<LoadedSections<'data>> {
        match_inner!(self, object => object.load_sections(choice))
    }
}

impl fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("file_format", &self.file_format())
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("endian", &self.endian())
            .finish()
    }
}

/// Builds a section registry from a custom [`ObjectReader`].
///
/// Symbols in custom readers resolve to address 0, which matches the
/// relocatable-object case where relocations on DWARF sections name other
/// DWARF section bases.
pub(crate) fn load_sections_from_reader(
    reader: &dyn ObjectReader,
    choice: GroupChoice,
) -> Result<LoadedSections<'static>> {
    const SHF_COMPRESSED: u64 = 0x800;

    let endian = reader.endianness();
    let machine = reader.machine_type();
    let mut registry = SectionRegistry::new();
    let mut anomalies = Vec::new();

    for index in 0..reader.section_count() {
        let info = reader.section_info(index)?;
        let (id, z_prefixed, is_dwo) = match SectionId::from_object_name(&info.name) {
            Some(resolved) => resolved,
            None => continue,
        };

        let group = if is_dwo { group::DWO } else { group::BASE };
        if !choice.admits(group) {
            continue;
        }

        let mut data = reader.load_section(index)?;
        let mut compressed = false;
        let mut uncompressed_size = None;

        if z_prefixed || info.flags & SHF_COMPRESSED != 0 || data.starts_with(b"ZLIB") {
            if let Some((size, payload)) = split_gnu_compressed(&data) {
                data = ZlibDecompressor.decompress(CompressionKind::Zlib, payload, size)?;
                compressed = true;
                uncompressed_size = Some(size);
            }
        }

        for reloc in reader.relocations_for(index)? {
            let offset = match usize::try_from(reloc.offset) {
                Ok(offset) => offset,
                Err(_) => {
                    anomalies.push((
                        ErrorKind::SectionSizeOrOffsetLarge,
                        format!("relocation offset {:#x} in {}", reloc.offset, info.name),
                    ));
                    continue;
                }
            };
            let width = match reloc_width(machine, reloc.rtype) {
                Some(width) => width,
                None => {
                    if reloc.rtype != 0 {
                        anomalies.push((
                            ErrorKind::UnhandledRelocation,
                            format!("type {} on {}", reloc.rtype, info.name),
                        ));
                    }
                    continue;
                }
            };

            let addend = match reloc.addend {
                Some(addend) => addend,
                None => read_reloc_addend(&data, offset, width, endian)?,
            };
            apply_reloc_value(&mut data, offset, width, addend as u64, endian)?;
        }

        registry.insert(crate::registry::Section {
            id,
            data: data.into(),
            address: info.address,
            group,
            compressed,
            uncompressed_size,
        });
    }

    Ok(LoadedSections {
        registry,
        anomalies,
    })
}

/// Splits a GNU `ZLIB` header (magic + 8-byte big-endian size) from its
/// deflate payload.
pub(crate) fn split_gnu_compressed(data: &[u8]) -> Option<(u64, &[u8])> {
    if !data.starts_with(b"ZLIB") || data.len() < 12 {
        return None;
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&data[4..12]);
    Some((u64::from_be_bytes(size), &data[12..]))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_peek() {
        assert_eq!(Object::peek(b"\x7fELF\x02\x01\x01"), FileFormat::Elf);
        assert_eq!(Object::peek(&[0xcf, 0xfa, 0xed, 0xfe]), FileFormat::MachO);
        assert_eq!(Object::peek(b"MZ\x90\x00"), FileFormat::Pe);
        assert_eq!(Object::peek(b"#!/bin/sh"), FileFormat::Unknown);
        assert_eq!(Object::peek(b""), FileFormat::Unknown);
    }

    #[test]
    fn test_reloc_width_table() {
        assert_eq!(reloc_width(EM_X86_64, 1), Some(8));
        assert_eq!(reloc_width(EM_X86_64, 10), Some(4));
        assert_eq!(reloc_width(EM_AARCH64, 257), Some(8));
        assert_eq!(reloc_width(EM_SPARCV9, 32), Some(8));
        assert_eq!(reloc_width(EM_X86_64, 2), None); // R_X86_64_PC32
        assert_eq!(reloc_width(0x1234, 1), None);
    }

    #[test]
    fn test_apply_and_read_reloc() {
        let mut data = vec![0u8; 8];
        apply_reloc_value(&mut data, 2, 4, 0x1122_3344, Endian::Little).unwrap();
        assert_eq!(&data[2..6], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            read_reloc_addend(&data, 2, 4, Endian::Little).unwrap(),
            0x1122_3344
        );

        let mut data = vec![0u8; 8];
        apply_reloc_value(&mut data, 0, 8, 0x0102_0304_0506_0708, Endian::Big).unwrap();
        assert_eq!(data, [1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(apply_reloc_value(&mut data, 6, 4, 0, Endian::Little).is_err());
    }

    #[test]
    fn test_split_gnu_compressed() {
        let mut section = b"ZLIB".to_vec();
        section.extend_from_slice(&42u64.to_be_bytes());
        section.extend_from_slice(b"payload");

        let (size, payload) = split_gnu_compressed(&section).unwrap();
        assert_eq!(size, 42);
        assert_eq!(payload, b"payload");

        assert!(split_gnu_compressed(b"ZLI").is_none());
        assert!(split_gnu_compressed(b"none").is_none());
    }

    struct FakeReader {
        sections: Vec<(SectionInfo, Vec<u8>, Vec<RelocEntry>)>,
    }

    impl ObjectReader for FakeReader {
        fn object_size(&self) -> u64 {
            0
        }
        fn read_at(&self, _offset: u64, _len: usize) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn endianness(&self) -> Endian {
            Endian::Little
        }
        fn pointer_size(&self) -> u8 {
            8
        }
        fn machine_type(&self) -> u16 {
            EM_X86_64
        }
        fn section_count(&self) -> usize {
            self.sections.len()
        }
        fn section_info(&self, index: usize) -> Result<SectionInfo> {
            Ok(self.sections[index].0.clone())
        }
        fn load_section(&self, index: usize) -> Result<Vec<u8>> {
            Ok(self.sections[index].1.clone())
        }
        fn relocations_for(&self, index: usize) -> Result<Vec<RelocEntry>> {
            Ok(self.sections[index].2.clone())
        }
    }

    fn info(name: &str, size: u64) -> SectionInfo {
        SectionInfo {
            name: name.into(),
            size,
            address: 0,
            link: 0,
            flags: 0,
            entry_size: 0,
        }
    }

    #[test]
    fn test_load_sections_from_reader() {
        let reader = FakeReader {
            sections: vec![
                (info(".text", 4), vec![0x90; 4], vec![]),
                (
                    info(".debug_info", 8),
                    vec![0; 8],
                    vec![
                        RelocEntry {
                            offset: 0,
                            rtype: 10, // R_X86_64_32
                            symbol: 1,
                            addend: Some(0x44),
                        },
                        RelocEntry {
                            offset: 4,
                            rtype: 2, // R_X86_64_PC32: unhandled
                            symbol: 1,
                            addend: Some(0),
                        },
                    ],
                ),
                (info(".debug_str.dwo", 2), b"x\0".to_vec(), vec![]),
            ],
        };

        let loaded = load_sections_from_reader(&reader, GroupChoice::Any).unwrap();
        let info_data = loaded.registry.data(SectionId::DebugInfo).unwrap();
        assert_eq!(&info_data[..4], &[0x44, 0, 0, 0]);
        assert_eq!(loaded.anomalies.len(), 1);
        assert_eq!(loaded.anomalies[0].0, ErrorKind::UnhandledRelocation);

        let dwo = loaded.registry.get(SectionId::DebugStr).unwrap();
        assert_eq!(dwo.group, group::DWO);

        // Base-only choice excludes the dwo member.
        let loaded = load_sections_from_reader(&reader, GroupChoice::Base).unwrap();
        assert!(loaded.registry.get(SectionId::DebugStr).is_none());
    }
}
