//! A reader for DWARF debugging information embedded in object files.
//!
//! This crate opens ELF, Mach-O and PE objects (or any container exposed
//! through the [`ObjectReader`] capability trait) and surfaces their
//! debugging contents: compilation units, debugging information entries
//! with decoded attributes, line number programs, call frame information,
//! and location/range lists. It is the layer a debugger or symbolizer sits
//! on top of.
//!
//! # Shape of the API
//!
//! The root handle is a [`DwarfSession`]. Section discovery, relocation
//! application and decompression happen when the session is built;
//! everything below a unit header — abbreviation tables, the DIE tree,
//! line programs, frame rows — decodes lazily as it is queried. Handles
//! ([`UnitRef`], [`Die`], iterators) borrow from the session and carry
//! plain offsets, so they copy freely and compare by identity.
//!
//! ```no_run
//! use fallible_iterator::FallibleIterator;
//! use runic_dwarf::{FileSession, OpenOptions, DW_AT_name};
//!
//! # fn main() -> Result<(), runic_dwarf::Error> {
//! let session = FileSession::open("./a.out", &OpenOptions::default())?
//!     .expect("object has no DWARF");
//!
//! for unit in session.session().units() {
//!     let root = unit.root_die();
//!     if let Some(name) = root.attr_string(DW_AT_name)? {
//!         println!("compile unit: {}", String::from_utf8_lossy(name));
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Errors are values ([`Error`] with an [`ErrorKind`]); valid absence is
//! `Ok(None)`, never an error. Non-fatal anomalies (an unknown relocation
//! type, trailing padding) are recorded in a bounded ring queried with
//! [`DwarfSession::harmless_errors`] instead of surfacing through call
//! returns.
//!
//! Split DWARF is handled by opening the `.dwo` side as its own session
//! and attaching the executable's session with
//! [`DwarfSession::attach_tied`]; `addrx`/`strx` lookups then route
//! through the tied object.

#![warn(missing_docs)]

pub mod abbrev;
mod attr;
pub mod constants;
mod error;
pub mod frame;
pub mod line;
pub mod lists;
mod object;
mod reader;
mod registry;
mod session;
mod unit;

#[cfg(feature = "elf")]
pub mod elf;
mod link;
#[cfg(feature = "macho")]
pub mod macho;
#[cfg(feature = "pe")]
pub mod pe;

pub use crate::abbrev::{AbbrevTable, Abbreviation, AttributeSpec};
pub use crate::attr::{form_class, Attr, AttrValue, Encoding, FormClass};
pub use crate::constants::*;
pub use crate::frame::{
    CallFrameInstruction, CfaRule, Cie, Fde, FrameEntry, FrameKind, FrameSection, RegisterRule,
    UnwindRow,
};
pub use crate::line::{
    FileEntry, LineProgram, LineProgramHeader, LineRow, LineRows, LineSequence, LineString,
    LineStrings,
};
pub use crate::lists::{LocationEntry, LoclistIter, Range, RnglistIter};
pub use crate::error::{Error, ErrorKind, HarmlessError, Result, HARMLESS_ERROR_CAPACITY};
pub use crate::link::{
    find_debug_file, DebugLink, FileSession, OpenOptions, PathSource, ResolvedPath,
};
pub use crate::object::{
    CompressionKind, Decompressor, Object, ObjectReader, RelocEntry, SectionInfo,
    ZlibDecompressor,
};
pub use crate::reader::{Format, SectionReader};
pub use crate::registry::{group, GroupChoice, Section, SectionId, SectionRegistry};
pub use crate::session::DwarfSession;
pub use crate::unit::{
    AttrsIter, Die, EntriesIter, Unit, UnitBases, UnitHeader, UnitRef,
};

#[doc(no_inline)]
pub use runic_common::{Arch, ByteView, Endian, FileFormat, ObjectKind};
