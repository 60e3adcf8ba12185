//! Error values shared across the reader pipeline.

use std::collections::VecDeque;
use std::error;
use std::fmt;

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error code carried by an [`Error`].
///
/// Valid absence (a missing section, a DIE without the requested attribute,
/// a PC outside every FDE) is never an error in this crate; such lookups
/// return `Ok(None)`. Errors describe malformed input, violated policies, or
/// misused handles.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A read ran past the end of its section or declared limit.
    Truncated,
    /// A LEB128 value was overlong or overflowed 64 bits.
    MalformedLeb,
    /// The file magic does not match any supported container format.
    BadMagic,
    /// An object file header was too short to parse.
    TruncatedHeader,
    /// A section's size or offset points outside the file.
    SectionSizeOrOffsetLarge,
    /// A section name offset points outside the string table.
    SectionStringOffsetBad,
    /// A size field holds a value the format does not allow.
    BadTypeSize,
    /// An offset size other than 32 or 64 bits was requested.
    OffsetSize,
    /// A DIE refers to an abbreviation code missing from its table.
    AbbrevMissing,
    /// An attribute carries a form this reader does not know.
    UnknownForm,
    /// A program contains an opcode this reader does not know.
    UnknownOpcode,
    /// A version number outside the supported range, or a reserved value.
    VersionUnsupported,
    /// A relocation on a DWARF section has a type the reader cannot apply.
    UnhandledRelocation,
    /// An indexed form was used without its base attribute on the unit.
    MissingBase,
    /// An address index points outside `.debug_addr`.
    AddrIndexOutOfRange,
    /// An allocation could not be satisfied.
    AllocFail,
    /// An underlying I/O operation failed.
    Io,
    /// A handle was used against the wrong session or unit.
    InvalidHandle,
}

impl ErrorKind {
    /// Returns a short description of the error kind.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Truncated => "read past the end of the section",
            ErrorKind::MalformedLeb => "malformed LEB128 value",
            ErrorKind::BadMagic => "unrecognized file magic",
            ErrorKind::TruncatedHeader => "object header truncated",
            ErrorKind::SectionSizeOrOffsetLarge => "section size or offset out of bounds",
            ErrorKind::SectionStringOffsetBad => "section name offset out of bounds",
            ErrorKind::BadTypeSize => "invalid size field",
            ErrorKind::OffsetSize => "offset size is neither 32 nor 64 bits",
            ErrorKind::AbbrevMissing => "abbreviation code not found",
            ErrorKind::UnknownForm => "unknown attribute form",
            ErrorKind::UnknownOpcode => "unknown opcode",
            ErrorKind::VersionUnsupported => "unsupported version",
            ErrorKind::UnhandledRelocation => "unhandled relocation type",
            ErrorKind::MissingBase => "indexed form without a base attribute",
            ErrorKind::AddrIndexOutOfRange => "address index out of range",
            ErrorKind::AllocFail => "allocation failed",
            ErrorKind::Io => "i/o error",
            ErrorKind::InvalidHandle => "handle does not belong to this session",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// An error when reading DWARF debugging information.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates an error of a known kind with an arbitrary payload.
    pub fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind,
            source: Some(source.into()),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, e)
    }
}

/// A recorded non-fatal anomaly.
///
/// Harmless errors never surface through call returns; they accumulate in a
/// bounded ring on the session and can be inspected after the fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarmlessError {
    /// The error code of the anomaly.
    pub kind: ErrorKind,
    /// A human-readable description of where and what.
    pub message: String,
}

impl fmt::Display for HarmlessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Capacity of the harmless-error ring; older entries are dropped first.
pub const HARMLESS_ERROR_CAPACITY: usize = 50;

/// A bounded FIFO of [`HarmlessError`] records.
#[derive(Debug, Default)]
pub(crate) struct HarmlessRing {
    entries: VecDeque<HarmlessError>,
}

impl HarmlessRing {
    pub(crate) fn record(&mut self, kind: ErrorKind, message: impl Into<String>) {
        if self.entries.len() == HARMLESS_ERROR_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(HarmlessError {
            kind,
            message: message.into(),
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<HarmlessError> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_error_kind() {
        let err = Error::from(ErrorKind::Truncated);
        assert_eq!(err.kind(), ErrorKind::Truncated);
        assert_eq!(err.to_string(), "read past the end of the section");

        let err = Error::new(
            ErrorKind::Io,
            std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_harmless_ring_is_bounded() {
        let mut ring = HarmlessRing::default();
        for i in 0..HARMLESS_ERROR_CAPACITY + 7 {
            ring.record(ErrorKind::UnhandledRelocation, format!("entry {i}"));
        }

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), HARMLESS_ERROR_CAPACITY);
        assert_eq!(snapshot[0].message, "entry 7");
    }
}
