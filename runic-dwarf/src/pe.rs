//! The PE/COFF object front end.
//!
//! Windows binaries normally carry PDB debug info, but MinGW and clang
//! `--target=*-windows-gnu` toolchains embed DWARF in COFF sections named
//! `.debug_info` and friends, with long names resolved through the COFF
//! string table. That is the shape this front end reads.

use std::borrow::Cow;
use std::fmt;

use debugid::CodeId;
use goblin::pe::PE;

use runic_common::{Arch, Endian, FileFormat, ObjectKind};

use crate::error::{Error, ErrorKind, Result};
use crate::object::{self, CompressionKind, Decompressor, LoadedSections, ZlibDecompressor};
use crate::registry::{group, GroupChoice, Section, SectionId, SectionRegistry};

const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const IMAGE_FILE_MACHINE_ARMNT: u16 = 0x01c4;
const IMAGE_FILE_MACHINE_ARM64: u16 = 0xaa64;

const IMAGE_FILE_DLL: u16 = 0x2000;

/// Portable Executable, used on Windows.
pub struct PeObject<'data> {
    pe: PE<'data>,
    data: &'data [u8],
}

impl<'data> PeObject<'data> {
    /// Tests whether the buffer could contain a PE object.
    pub fn test(data: &[u8]) -> bool {
        data.get(..2) == Some(b"MZ")
    }

    /// Parses a PE object from the buffer.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let pe = PE::parse(data).map_err(|e| Error::new(ErrorKind::TruncatedHeader, e))?;
        Ok(PeObject { pe, data })
    }

    /// The container file format, which is always `FileFormat::Pe`.
    pub fn file_format(&self) -> FileFormat {
        FileFormat::Pe
    }

    /// PE images are always little-endian.
    pub fn endian(&self) -> Endian {
        Endian::Little
    }

    /// The CPU architecture from the COFF header.
    pub fn arch(&self) -> Arch {
        match self.pe.header.coff_header.machine {
            IMAGE_FILE_MACHINE_I386 => Arch::X86,
            IMAGE_FILE_MACHINE_AMD64 => Arch::Amd64,
            IMAGE_FILE_MACHINE_ARMNT => Arch::Arm,
            IMAGE_FILE_MACHINE_ARM64 => Arch::Arm64,
            _ => Arch::Unknown,
        }
    }

    /// The pointer width in bytes.
    pub fn pointer_size(&self) -> u8 {
        if self.pe.is_64 {
            8
        } else {
            4
        }
    }

    /// The object kind from the COFF characteristics.
    pub fn kind(&self) -> ObjectKind {
        if self.pe.header.coff_header.characteristics & IMAGE_FILE_DLL != 0 {
            ObjectKind::Library
        } else {
            ObjectKind::Executable
        }
    }

    /// The code identifier: debug directory signature and age, when the
    /// image carries one.
    pub fn code_id(&self) -> Option<CodeId> {
        let debug_data = self.pe.debug_data.as_ref()?;
        let codeview = debug_data.codeview_pdb70_debug_info.as_ref()?;
        let mut binary = Vec::with_capacity(20);
        binary.extend_from_slice(&codeview.signature);
        binary.extend_from_slice(&codeview.age.to_le_bytes());
        Some(CodeId::from_binary(&binary))
    }

    /// Whether a `.debug_info` COFF section is present.
    pub fn has_debug_info(&self) -> bool {
        self.pe.sections.iter().any(|section| {
            section_name(section)
                .and_then(|name| SectionId::from_object_name(&name))
                .map(|(id, _, _)| id == SectionId::DebugInfo)
                .unwrap_or(false)
        })
    }

    pub(crate) fn load_sections(&self, choice: GroupChoice) -> Result<LoadedSections<'data>> {
        let mut registry = SectionRegistry::new();
        let mut anomalies = Vec::new();

        // PE has neither COMDAT DWARF groups nor split objects; only the
        // base group exists.
        if choice.admits(group::BASE) {
            for section in &self.pe.sections {
                let name = match section_name(section) {
                    Some(name) => name,
                    None => continue,
                };
                let (id, _, _) = match SectionId::from_object_name(&name) {
                    Some(resolved) => resolved,
                    None => continue,
                };

                let offset = section.pointer_to_raw_data as usize;
                let size = section.size_of_raw_data as usize;
                if offset == 0 {
                    continue;
                }
                let raw = match self.data.get(offset..offset + size) {
                    Some(raw) => raw,
                    None => {
                        anomalies.push((
                            ErrorKind::SectionSizeOrOffsetLarge,
                            format!("section {name} points outside the file"),
                        ));
                        continue;
                    }
                };

                // COFF pads raw data to the file alignment; the virtual
                // size is the real section length when smaller.
                let virtual_size = section.virtual_size as usize;
                let raw = if virtual_size > 0 && virtual_size < raw.len() {
                    &raw[..virtual_size]
                } else {
                    raw
                };

                let mut data: Cow<'data, [u8]> = Cow::Borrowed(raw);
                let mut compressed = false;
                let mut uncompressed_size = None;
                if let Some((decompressed_size, payload)) = object::split_gnu_compressed(raw) {
                    data = Cow::Owned(ZlibDecompressor.decompress(
                        CompressionKind::Zlib,
                        payload,
                        decompressed_size,
                    )?);
                    compressed = true;
                    uncompressed_size = Some(decompressed_size);
                }

                registry.insert(Section {
                    id,
                    data,
                    address: u64::from(section.virtual_address),
                    group: group::BASE,
                    compressed,
                    uncompressed_size,
                });
            }
        }

        Ok(LoadedSections {
            registry,
            anomalies,
        })
    }
}

fn section_name(section: &goblin::pe::section_table::SectionTable) -> Option<String> {
    if let Some(real_name) = &section.real_name {
        return Some(real_name.clone());
    }
    section.name().ok().map(str::to_owned)
}

impl fmt::Debug for PeObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("has_debug_info", &self.has_debug_info())
            .finish()
    }
}
