//! Descriptive enums shared by the object front ends.

use std::fmt;

/// Byte order of data in an object file, selected at open time.
///
/// Every fixed-width read in the reader pipeline consults this value, so it is
/// deliberately a two-state runtime selector rather than a type parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// Returns `true` if this is big-endian byte order.
    #[inline]
    pub fn is_big(self) -> bool {
        self == Endian::Big
    }
}

impl Default for Endian {
    #[cfg(target_endian = "little")]
    fn default() -> Self {
        Endian::Little
    }

    #[cfg(target_endian = "big")]
    fn default() -> Self {
        Endian::Big
    }
}

/// The container format of an object file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileFormat {
    /// The format could not be determined from the file magic.
    Unknown,
    /// Executable and Linkable Format, used on Linux and most Unixes.
    Elf,
    /// Mach Objects, used on macOS and iOS.
    MachO,
    /// Portable Executable, used on Windows (and by MinGW toolchains).
    Pe,
}

impl FileFormat {
    /// Returns the short name of the file format.
    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Unknown => "unknown",
            FileFormat::Elf => "elf",
            FileFormat::MachO => "macho",
            FileFormat::Pe => "pe",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The designated use of an object file.
///
/// Debug information behaves differently depending on the object kind: in
/// relocatable objects DWARF sections still carry relocations that must be
/// applied before parsing, and address zero is a legitimate function address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// No object kind was specified in the header.
    None,
    /// An intermediate object file (`.o`); sections are unplaced and carry
    /// relocations.
    Relocatable,
    /// A standalone executable program.
    Executable,
    /// A dynamic shared library.
    Library,
    /// A core dump.
    Dump,
    /// A file that carries only debug information for another object, such as
    /// a stripped-out `.debug` file or a dSYM companion.
    Debug,
    /// Any other valid but unclassified object kind.
    Other,
}

impl ObjectKind {
    /// Returns the short name of the object kind.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::None => "none",
            ObjectKind::Relocatable => "rel",
            ObjectKind::Executable => "exe",
            ObjectKind::Library => "lib",
            ObjectKind::Dump => "dump",
            ObjectKind::Debug => "debug",
            ObjectKind::Other => "other",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The CPU architecture an object file targets.
///
/// Only the architectures with DWARF-bearing toolchains in common use are
/// listed; everything else maps to [`Arch::Unknown`] and is still readable as
/// long as the relocation types on its DWARF sections are absolute.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    /// Unrecognized machine type.
    Unknown,
    /// 32-bit x86.
    X86,
    /// 64-bit x86 (amd64).
    Amd64,
    /// 32-bit ARM.
    Arm,
    /// 64-bit ARM (aarch64).
    Arm64,
    /// 32-bit PowerPC.
    Ppc,
    /// 64-bit PowerPC.
    Ppc64,
    /// 32-bit MIPS.
    Mips,
    /// 64-bit MIPS.
    Mips64,
    /// 32-bit SPARC.
    Sparc,
    /// SPARC V9.
    Sparc64,
    /// RISC-V with 64-bit pointers.
    Riscv64,
    /// IBM z/Architecture.
    S390x,
}

impl Arch {
    /// Returns the name of the architecture.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Ppc => "ppc",
            Arch::Ppc64 => "ppc64",
            Arch::Mips => "mips",
            Arch::Mips64 => "mips64",
            Arch::Sparc => "sparc",
            Arch::Sparc64 => "sparc64",
            Arch::Riscv64 => "riscv64",
            Arch::S390x => "s390x",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_default_matches_target() {
        #[cfg(target_endian = "little")]
        assert_eq!(Endian::default(), Endian::Little);
        #[cfg(target_endian = "big")]
        assert_eq!(Endian::default(), Endian::Big);
    }

    #[test]
    fn test_names() {
        assert_eq!(Arch::Amd64.to_string(), "x86_64");
        assert_eq!(ObjectKind::Relocatable.to_string(), "rel");
        assert_eq!(FileFormat::MachO.to_string(), "macho");
    }
}
