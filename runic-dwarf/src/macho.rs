//! The Mach-O object front end.
//!
//! DWARF sections on macOS live in the `__DWARF` segment of a dSYM bundle
//! (or of the object itself, for `-g` builds of `.o` files) with
//! double-underscore names. Fat binaries are not handled here; slice one
//! architecture out before opening.

use std::borrow::Cow;
use std::fmt;

use debugid::CodeId;
use goblin::mach::{self, constants::cputype, MachO};

use runic_common::{Arch, Endian, FileFormat, ObjectKind};

use crate::error::{Error, ErrorKind, Result};
use crate::object::{self, CompressionKind, Decompressor, LoadedSections, ZlibDecompressor};
use crate::registry::{group, GroupChoice, Section, SectionId, SectionRegistry};

/// Mach Objects, used on macOS and iOS.
pub struct MachObject<'data> {
    macho: MachO<'data>,
}

impl<'data> MachObject<'data> {
    /// Tests whether the buffer could contain a (thin) Mach-O object.
    pub fn test(data: &[u8]) -> bool {
        match data.get(..4) {
            Some(magic) => {
                let magic = u32::from_le_bytes(magic.try_into().unwrap());
                matches!(
                    magic,
                    0xfeed_face | 0xfeed_facf | 0xcefa_edfe | 0xcffa_edfe
                )
            }
            None => false,
        }
    }

    /// Parses a Mach-O object from the buffer.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let macho =
            MachO::parse(data, 0).map_err(|e| Error::new(ErrorKind::TruncatedHeader, e))?;
        Ok(MachObject { macho })
    }

    /// The container file format, which is always `FileFormat::MachO`.
    pub fn file_format(&self) -> FileFormat {
        FileFormat::MachO
    }

    /// The byte order of this object.
    pub fn endian(&self) -> Endian {
        if self.macho.little_endian {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    /// The CPU architecture from the Mach header.
    pub fn arch(&self) -> Arch {
        match self.macho.header.cputype() {
            cputype::CPU_TYPE_I386 => Arch::X86,
            cputype::CPU_TYPE_X86_64 => Arch::Amd64,
            cputype::CPU_TYPE_ARM => Arch::Arm,
            cputype::CPU_TYPE_ARM64 => Arch::Arm64,
            cputype::CPU_TYPE_POWERPC => Arch::Ppc,
            cputype::CPU_TYPE_POWERPC64 => Arch::Ppc64,
            _ => Arch::Unknown,
        }
    }

    /// The pointer width in bytes.
    pub fn pointer_size(&self) -> u8 {
        if self.macho.is_64 {
            8
        } else {
            4
        }
    }

    /// The object kind from the Mach header.
    pub fn kind(&self) -> ObjectKind {
        match self.macho.header.filetype {
            mach::header::MH_OBJECT => ObjectKind::Relocatable,
            mach::header::MH_EXECUTE | mach::header::MH_PRELOAD => ObjectKind::Executable,
            mach::header::MH_DYLIB | mach::header::MH_FVMLIB => ObjectKind::Library,
            mach::header::MH_CORE => ObjectKind::Dump,
            mach::header::MH_DSYM => ObjectKind::Debug,
            _ => ObjectKind::Other,
        }
    }

    /// The UUID from the `LC_UUID` load command.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        for cmd in &self.macho.load_commands {
            if let mach::load_command::CommandVariant::Uuid(ref uuid_cmd) = cmd.command {
                return Some(uuid_cmd.uuid);
            }
        }
        None
    }

    /// The object's code identifier, derived from the UUID.
    pub fn code_id(&self) -> Option<CodeId> {
        self.uuid().map(|uuid| CodeId::from_binary(&uuid))
    }

    /// Whether a `__DWARF,__debug_info` section is present.
    pub fn has_debug_info(&self) -> bool {
        self.each_dwarf_section(|id, _, _| id == SectionId::DebugInfo)
            .unwrap_or(false)
    }

    /// Visits DWARF-bearing sections until the callback returns `true`.
    fn each_dwarf_section<F>(&self, mut visit: F) -> Result<bool>
    where
        F: FnMut(SectionId, u64, &'data [u8]) -> bool,
    {
        for segment in &self.macho.segments {
            let segment_name = segment.name().unwrap_or_default();
            if segment_name != "__DWARF" && segment_name != "__TEXT" {
                continue;
            }

            for entry in segment {
                let (section, data) = match entry {
                    Ok(found) => found,
                    // Do not iterate past broken section headers.
                    Err(_) => break,
                };
                let name = match section.name() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                if let Some((id, _, _)) = SectionId::from_object_name(name) {
                    if visit(id, section.addr, data) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    pub(crate) fn load_sections(&self, choice: GroupChoice) -> Result<LoadedSections<'data>> {
        let mut registry = SectionRegistry::new();
        let mut decompress_error = None;

        // Mach-O has no COMDAT or .dwo grouping; everything is base.
        if choice.admits(group::BASE) {
            self.each_dwarf_section(|id, addr, data| {
                let mut cooked: Cow<'data, [u8]> = Cow::Borrowed(data);
                let mut compressed = false;
                let mut uncompressed_size = None;

                if let Some((size, payload)) = object::split_gnu_compressed(data) {
                    match ZlibDecompressor.decompress(CompressionKind::Zlib, payload, size) {
                        Ok(out) => {
                            cooked = Cow::Owned(out);
                            compressed = true;
                            uncompressed_size = Some(size);
                        }
                        Err(err) => {
                            decompress_error = Some(err);
                            return true;
                        }
                    }
                }

                registry.insert(Section {
                    id,
                    data: cooked,
                    address: addr,
                    group: group::BASE,
                    compressed,
                    uncompressed_size,
                });
                false
            })?;
        }

        match decompress_error {
            Some(err) => Err(err),
            None => Ok(LoadedSections {
                registry,
                anomalies: Vec::new(),
            }),
        }
    }
}

impl fmt::Debug for MachObject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachObject")
            .field("arch", &self.arch())
            .field("kind", &self.kind())
            .field("uuid", &self.uuid().map(|uuid| format!("{uuid:02x?}")))
            .field("has_debug_info", &self.has_debug_info())
            .finish()
    }
}
