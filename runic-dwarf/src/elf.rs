//! The ELF object front end.
//!
//! Container parsing (headers, section table, symbols, notes) goes through
//! goblin. Everything DWARF-specific on top is implemented here: locating
//! and decompressing debug sections, partitioning them into COMDAT/`.dwo`
//! groups, and applying relocations to the DWARF sections of relocatable
//! objects. Relocation records are decoded from the raw section bytes
//! because the generic `r_info` split does not hold on MIPS64
//! little-endian and SPARC V9.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use debugid::CodeId;
use goblin::container::{Container, Ctx};
use goblin::elf::compression_header::CompressionHeader;
use goblin::elf::{self, Elf};

use runic_common::{Arch, Endian, FileFormat, ObjectKind};

use crate::error::{Error, ErrorKind, Result};
use crate::object::{
    self, apply_reloc_value, machine_arch, read_reloc_addend, reloc_width, CompressionKind,
    Decompressor, LoadedSections, ZlibDecompressor,
};
use crate::registry::{group, GroupChoice, Section, SectionId, SectionRegistry};

const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;
const SHT_REL: u32 = 9;
const SHT_GROUP: u32 = 17;
const GRP_COMDAT: u32 = 1;
const SHF_COMPRESSED: u64 = 0x800;

const ELFCOMPRESS_ZLIB: u32 = 1;
const ELFCOMPRESS_ZSTD: u32 = 2;

const ET_REL: u16 = 1;

/// Executable and Linkable Format, used on Linux and most Unixes.
pub struct ElfObject<'data> {
    elf: Elf<'data>,
    data: &'data [u8],
}

impl<'data> ElfObject<'data> {
    /// Tests whether the buffer could contain an ELF object.
    pub fn test(data: &[u8]) -> bool {
        data.get(..4) == Some(b"\x7fELF")
    }

    /// Parses an ELF object from the buffer.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let elf = Elf::parse(data).map_err(|e| Error::new(ErrorKind::TruncatedHeader, e))?;
        Ok(ElfObject { elf, data })
    }

    /// The container file format, which is always `FileFormat::Elf`.
    pub fn file_format(&self) -> FileFormat {
        FileFormat::Elf
    }

    /// The byte order declared in the ELF identification.
    pub fn endian(&self) -> Endian {
        if self.elf.little_endian {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    /// The CPU architecture from the ELF header.
    pub fn arch(&self) -> Arch {
        machine_arch(self.elf.header.e_machine, self.elf.is_64)
    }

    /// The pointer width in bytes.
    pub fn pointer_size(&self) -> u8 {
        if self.elf.is_64 {
            8
        } else {
            4
        }
    }

    /// The object kind from the ELF header.
    pub fn kind(&self) -> ObjectKind {
        let kind = match self.elf.header.e_type {
            elf::header::ET_NONE => ObjectKind::None,
            elf::header::ET_REL => ObjectKind::Relocatable,
            elf::header::ET_EXEC => ObjectKind::Executable,
            elf::header::ET_DYN => ObjectKind::Library,
            elf::header::ET_CORE => ObjectKind::Dump,
            _ => ObjectKind::Other,
        };

        // Stripped-out debug companions keep ET_EXEC but lose their
        // interpreter; an executable without one is really a debug file.
        if kind == ObjectKind::Executable && self.elf.interpreter.is_none() {
            return ObjectKind::Debug;
        }

        kind
    }

    /// The address the image prefers to be loaded at: the first `PT_LOAD`
    /// segment.
    pub fn load_address(&self) -> u64 {
        for phdr in &self.elf.program_headers {
            if phdr.p_type == elf::program_header::PT_LOAD {
                return phdr.p_vaddr;
            }
        }
        0
    }

    /// The GNU build id, from `PT_NOTE` headers or the build-id note
    /// section.
    pub fn build_id(&self) -> Option<&'data [u8]> {
        if let Some(mut notes) = self.elf.iter_note_headers(self.data) {
            while let Some(Ok(note)) = notes.next() {
                if note.n_type == elf::note::NT_GNU_BUILD_ID {
                    return Some(note.desc);
                }
            }
        }

        if let Some(mut notes) = self
            .elf
            .iter_note_sections(self.data, Some(".note.gnu.build-id"))
        {
            while let Some(Ok(note)) = notes.next() {
                if note.n_type == elf::note::NT_GNU_BUILD_ID {
                    return Some(note.desc);
                }
            }
        }

        None
    }

    /// The object's code identifier, derived from the build id.
    pub fn code_id(&self) -> Option<CodeId> {
        self.build_id()
            .filter(|slice| !slice.is_empty())
            .map(CodeId::from_binary)
    }

    /// The raw `.gnu_debuglink` contents, if the section exists.
    pub fn debug_link_data(&self) -> Option<&'data [u8]> {
        let header = self
            .elf
            .section_headers
            .iter()
            .find(|header| self.section_name(header) == Some(".gnu_debuglink"))?;
        self.raw_section_data(header).ok()
    }

    /// Whether the object carries `.debug_info` in any spelling or group.
    pub fn has_debug_info(&self) -> bool {
        self.elf.section_headers.iter().any(|header| {
            self.section_name(header)
                .and_then(SectionId::from_object_name)
                .map(|(id, _, _)| id == SectionId::DebugInfo)
                .unwrap_or(false)
        })
    }

    fn section_name(&self, header: &elf::SectionHeader) -> Option<&'data str> {
        self.elf.shdr_strtab.get_at(header.sh_name)
    }

    fn raw_section_data(&self, header: &elf::SectionHeader) -> Result<&'data [u8]> {
        let offset = usize::try_from(header.sh_offset)
            .map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        let size =
            usize::try_from(header.sh_size).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        self.data
            .get(offset..offset.checked_add(size).ok_or(ErrorKind::SectionSizeOrOffsetLarge)?)
            .ok_or_else(|| ErrorKind::SectionSizeOrOffsetLarge.into())
    }

    fn ctx(&self) -> Ctx {
        Ctx::new(
            if self.elf.is_64 {
                Container::Big
            } else {
                Container::Little
            },
            if self.elf.little_endian {
                scroll::Endian::Little
            } else {
                scroll::Endian::Big
            },
        )
    }

    /// Decompresses a section payload in either compression framing.
    fn decompress_section(&self, data: &[u8]) -> Result<Option<(u64, Vec<u8>)>> {
        if let Some((size, payload)) = object::split_gnu_compressed(data) {
            let out = ZlibDecompressor.decompress(CompressionKind::Zlib, payload, size)?;
            return Ok(Some((size, out)));
        }

        let ctx = self.ctx();
        let compression = CompressionHeader::parse(data, 0, ctx)
            .map_err(|e| Error::new(ErrorKind::SectionSizeOrOffsetLarge, e))?;
        let payload = data
            .get(CompressionHeader::size(ctx)..)
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

        let kind = match compression.ch_type {
            ELFCOMPRESS_ZLIB => CompressionKind::Zlib,
            ELFCOMPRESS_ZSTD => CompressionKind::Zstd,
            _ => return Ok(None),
        };
        let out = ZlibDecompressor.decompress(kind, payload, compression.ch_size)?;
        Ok(Some((compression.ch_size, out)))
    }

    /// Partitions sections into groups: `SHT_GROUP` COMDAT members get
    /// numbers from 3, `.dwo`-suffixed sections get the DWO group, and
    /// everything else stays in the base group.
    fn comdat_groups(
        &self,
        anomalies: &mut Vec<(ErrorKind, String)>,
    ) -> HashMap<usize, u32> {
        let shnum = self.elf.section_headers.len();
        let mut map = HashMap::new();
        let mut next_group = group::DWO + 1;

        for header in &self.elf.section_headers {
            if header.sh_type != SHT_GROUP {
                continue;
            }
            let data = match self.raw_section_data(header) {
                Ok(data) => data,
                Err(_) => continue,
            };

            match parse_group_words(data, self.endian(), shnum) {
                Some((flags, members)) => {
                    if flags & GRP_COMDAT == 0 {
                        continue;
                    }
                    let number = next_group;
                    next_group += 1;
                    for member in members {
                        map.insert(member as usize, number);
                    }
                }
                None => anomalies.push((
                    ErrorKind::SectionSizeOrOffsetLarge,
                    "SHT_GROUP members out of range in both byte orders".into(),
                )),
            }
        }

        map
    }

    pub(crate) fn load_sections(&self, choice: GroupChoice) -> Result<LoadedSections<'data>> {
        let mut registry = SectionRegistry::new();
        let mut anomalies = Vec::new();
        let comdat = self.comdat_groups(&mut anomalies);
        let relocatable = self.elf.header.e_type == ET_REL;

        for (index, header) in self.elf.section_headers.iter().enumerate() {
            if header.sh_type == SHT_NOBITS || header.sh_offset == 0 {
                continue;
            }
            let name = match self.section_name(header) {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };
            let (id, z_prefixed, is_dwo) = match SectionId::from_object_name(name) {
                Some(resolved) => resolved,
                None => continue,
            };

            let section_group = match comdat.get(&index) {
                Some(&number) => number,
                None if is_dwo => group::DWO,
                None => group::BASE,
            };
            if !choice.admits(section_group) {
                continue;
            }

            let raw = self.raw_section_data(header)?;

            let mut compressed = false;
            let mut uncompressed_size = None;
            let mut data: Cow<'data, [u8]> =
                if z_prefixed || header.sh_flags & SHF_COMPRESSED != 0 {
                    match self.decompress_section(raw)? {
                        Some((size, decompressed)) => {
                            compressed = true;
                            uncompressed_size = Some(size);
                            Cow::Owned(decompressed)
                        }
                        None => {
                            anomalies.push((
                                ErrorKind::VersionUnsupported,
                                format!("unknown compression type on {name}"),
                            ));
                            Cow::Borrowed(raw)
                        }
                    }
                } else {
                    Cow::Borrowed(raw)
                };

            if relocatable {
                self.apply_section_relocations(index, &mut data, &mut anomalies)?;
            }

            registry.insert(Section {
                id,
                data,
                address: header.sh_addr,
                group: section_group,
                compressed,
                uncompressed_size,
            });
        }

        Ok(LoadedSections {
            registry,
            anomalies,
        })
    }

    /// Applies the relocations of every `.rel*`/`.rela*` section that
    /// targets section `target`.
    fn apply_section_relocations(
        &self,
        target: usize,
        data: &mut Cow<'data, [u8]>,
        anomalies: &mut Vec<(ErrorKind, String)>,
    ) -> Result<()> {
        let machine = self.elf.header.e_machine;
        let endian = self.endian();

        for header in &self.elf.section_headers {
            let is_rela = header.sh_type == SHT_RELA;
            if !is_rela && header.sh_type != SHT_REL {
                continue;
            }
            if header.sh_info as usize != target {
                continue;
            }

            let raw = self.raw_section_data(header)?;
            let mut entries = RawRelocIter {
                data: raw,
                pos: 0,
                is_64: self.elf.is_64,
                is_rela,
                endian,
                machine,
            };

            while let Some(entry) = entries.next()? {
                let width = match reloc_width(machine, entry.rtype) {
                    Some(width) => width,
                    None => {
                        if entry.rtype != 0 {
                            anomalies.push((
                                ErrorKind::UnhandledRelocation,
                                format!("type {} at offset {:#x}", entry.rtype, entry.offset),
                            ));
                        }
                        continue;
                    }
                };

                let offset = match usize::try_from(entry.offset) {
                    Ok(offset) => offset,
                    Err(_) => {
                        anomalies.push((
                            ErrorKind::SectionSizeOrOffsetLarge,
                            format!("relocation offset {:#x}", entry.offset),
                        ));
                        continue;
                    }
                };

                let symbol_value = self.symbol_address(entry.symbol as usize);
                let bytes = data.to_mut();
                let addend = match entry.addend {
                    Some(addend) => addend,
                    None => read_reloc_addend(bytes, offset, width, endian)?,
                };
                let value = symbol_value.wrapping_add(addend as u64);
                apply_reloc_value(bytes, offset, width, value, endian)?;
            }
        }

        Ok(())
    }

    /// Resolves a symbol index to its address.
    ///
    /// In relocatable objects the symbol usually names another DWARF
    /// section's base, which sits at address 0 until linked.
    fn symbol_address(&self, index: usize) -> u64 {
        let sym = match self.elf.syms.get(index) {
            Some(sym) => sym,
            None => return 0,
        };
        let section_base = self
            .elf
            .section_headers
            .get(sym.st_shndx)
            .map(|header| header.sh_addr)
            .unwrap_or(0);
        sym.st_value.wrapping_add(section_base)
    }
}

impl fmt::Debug for ElfObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("endian", &self.endian())
            .field("load_address", &format_args!("{:#x}", self.load_address()))
            .field("has_debug_info", &self.has_debug_info())
            .finish()
    }
}

#[derive(Debug)]
struct RawReloc {
    offset: u64,
    symbol: u32,
    rtype: u32,
    addend: Option<i64>,
}

/// Decodes relocation records straight from section bytes, honoring the
/// architecture-specific `r_info` layouts.
struct RawRelocIter<'data> {
    data: &'data [u8],
    pos: usize,
    is_64: bool,
    is_rela: bool,
    endian: Endian,
    machine: u16,
}

impl RawRelocIter<'_> {
    fn entry_size(&self) -> usize {
        match (self.is_64, self.is_rela) {
            (true, true) => 24,
            (true, false) => 16,
            (false, true) => 12,
            (false, false) => 8,
        }
    }

    fn read_u32(&self, at: usize) -> u32 {
        let bytes: [u8; 4] = self.data[at..at + 4].try_into().unwrap();
        match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        }
    }

    fn read_u64(&self, at: usize) -> u64 {
        let bytes: [u8; 8] = self.data[at..at + 8].try_into().unwrap();
        match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        }
    }

    fn next(&mut self) -> Result<Option<RawReloc>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let size = self.entry_size();
        if self.data.len() - self.pos < size {
            return Err(Error::new(
                ErrorKind::Truncated,
                "relocation section size is not a multiple of its entry size",
            ));
        }

        let at = self.pos;
        self.pos += size;

        let entry = if self.is_64 {
            let offset = self.read_u64(at);
            let info = self.read_u64(at + 8);
            let addend = self
                .is_rela
                .then(|| self.read_u64(at + 16) as i64);

            let (symbol, rtype) = split_info64(info, self.machine, self.endian);
            RawReloc {
                offset,
                symbol,
                rtype,
                addend,
            }
        } else {
            let offset = u64::from(self.read_u32(at));
            let info = self.read_u32(at + 4);
            let addend = self
                .is_rela
                .then(|| self.read_u32(at + 8) as i32 as i64);

            RawReloc {
                offset,
                symbol: info >> 8,
                rtype: info & 0xff,
                addend,
            }
        };

        Ok(Some(entry))
    }
}

/// Splits an ELF64 `r_info` word into (symbol, type).
///
/// MIPS64 little-endian lays the field out as a packed struct
/// (sym:u32, ssym:u8, type3:u8, type2:u8, type:u8), and SPARC V9 stores
/// type-specific data in bits 8..32 of the low word.
fn split_info64(info: u64, machine: u16, endian: Endian) -> (u32, u32) {
    match machine {
        object::EM_MIPS if endian == Endian::Little => {
            ((info & 0xffff_ffff) as u32, (info >> 56) as u32)
        }
        object::EM_SPARCV9 => ((info >> 32) as u32, (info & 0xff) as u32),
        _ => ((info >> 32) as u32, (info & 0xffff_ffff) as u32),
    }
}

/// Reads a `SHT_GROUP` payload: a flags word followed by member section
/// indices.
///
/// Some producers emit the words in the opposite byte order from the
/// object's declared endianness; the reading that keeps every member
/// index inside the section table wins, and only if neither does is the
/// group rejected.
fn parse_group_words(data: &[u8], endian: Endian, shnum: usize) -> Option<(u32, Vec<u32>)> {
    let decode = |endian: Endian| -> Option<(u32, Vec<u32>)> {
        if data.len() < 4 || data.len() % 4 != 0 {
            return None;
        }
        let word = |at: usize| {
            let bytes: [u8; 4] = data[at..at + 4].try_into().unwrap();
            match endian {
                Endian::Little => u32::from_le_bytes(bytes),
                Endian::Big => u32::from_be_bytes(bytes),
            }
        };

        let flags = word(0);
        let members: Vec<u32> = (4..data.len()).step_by(4).map(word).collect();
        members
            .iter()
            .all(|&member| (member as usize) < shnum && member != 0)
            .then_some((flags, members))
    };

    let swapped = match endian {
        Endian::Little => Endian::Big,
        Endian::Big => Endian::Little,
    };
    decode(endian).or_else(|| decode(swapped))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_split_info64() {
        // Generic: sym in the high word, type in the low.
        assert_eq!(
            split_info64(0x0000_0005_0000_0001, object::EM_X86_64, Endian::Little),
            (5, 1)
        );

        // MIPS64el: packed struct layout.
        let info = u64::from_le_bytes([0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12]);
        assert_eq!(
            split_info64(info, object::EM_MIPS, Endian::Little),
            (7, 0x12)
        );

        // SPARC V9: only the low byte is the type.
        assert_eq!(
            split_info64(0x0000_0003_1234_5620, object::EM_SPARCV9, Endian::Little),
            (3, 0x20)
        );
    }

    #[test]
    fn test_parse_group_words() {
        // Well-formed little-endian group: COMDAT flag + members 2 and 3.
        let data: Vec<u8> = [1u32, 2, 3]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        assert_eq!(
            parse_group_words(&data, Endian::Little, 5),
            Some((1, vec![2, 3]))
        );

        // The same bytes read as big-endian have out-of-range members, so
        // the swapped-order fallback recovers them.
        assert_eq!(
            parse_group_words(&data, Endian::Big, 5),
            Some((1, vec![2, 3]))
        );

        // Out of range in both orders.
        let data: Vec<u8> = [1u32, 0x7000_0000]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        assert_eq!(parse_group_words(&data, Endian::Little, 5), None);

        // Truncated payload.
        assert_eq!(parse_group_words(&[1, 2], Endian::Little, 5), None);
    }

    #[test]
    fn test_raw_reloc_iter_rela64() {
        // One RELA entry: offset 0x10, sym 2, type R_X86_64_32 (10),
        // addend 0x44.
        let mut data = vec![];
        data.extend_from_slice(&0x10u64.to_le_bytes());
        data.extend_from_slice(&((2u64 << 32) | 10).to_le_bytes());
        data.extend_from_slice(&0x44i64.to_le_bytes());

        let mut iter = RawRelocIter {
            data: &data,
            pos: 0,
            is_64: true,
            is_rela: true,
            endian: Endian::Little,
            machine: object::EM_X86_64,
        };

        let entry = iter.next().unwrap().unwrap();
        assert_eq!(entry.offset, 0x10);
        assert_eq!(entry.symbol, 2);
        assert_eq!(entry.rtype, 10);
        assert_eq!(entry.addend, Some(0x44));
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn test_raw_reloc_iter_rejects_ragged_section() {
        let data = vec![0u8; 20]; // not a multiple of 24
        let mut iter = RawRelocIter {
            data: &data,
            pos: 0,
            is_64: true,
            is_rela: true,
            endian: Endian::Little,
            machine: object::EM_X86_64,
        };
        assert_eq!(iter.next().unwrap_err().kind(), ErrorKind::Truncated);
    }
}
