//! A uniform view over binary data, however it is owned.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::cell::StableDeref;

/// The storage behind a [`ByteView`].
#[derive(Debug)]
enum Backing<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for Backing<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            Backing::Buf(ref buf) => buf,
            Backing::Mmap(ref mmap) => mmap,
        }
    }
}

/// A smart pointer over the raw bytes of an object file.
///
/// Sessions parse straight out of the buffer they were opened from, so the
/// buffer must stay put for the lifetime of everything derived from it.
/// `ByteView` makes the three ways of getting at file data (a borrowed slice,
/// an owned vector, a memory mapped file) interchangeable behind a single
/// dereferencing type with a stable address.
///
/// # Example
///
/// ```
/// use runic_common::ByteView;
///
/// let view = ByteView::from_slice(b"\x7fELF");
/// assert_eq!(&view[..], b"\x7fELF");
/// ```
#[derive(Debug)]
pub struct ByteView<'a> {
    backing: Backing<'a>,
}

impl<'a> ByteView<'a> {
    /// Constructs a view over a borrowed slice.
    pub fn from_slice(buffer: &'a [u8]) -> Self {
        ByteView {
            backing: Backing::Buf(Cow::Borrowed(buffer)),
        }
    }

    /// Constructs a view that takes ownership of a vector.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        ByteView {
            backing: Backing::Buf(Cow::Owned(buffer)),
        }
    }

    /// Constructs a view from a clone-on-write slice.
    pub fn from_cow(cow: Cow<'a, [u8]>) -> Self {
        ByteView {
            backing: Backing::Buf(cow),
        }
    }

    /// Memory maps an open file.
    ///
    /// Falls back to reading the file into memory if it cannot be mapped, for
    /// instance because it is empty or lives on a filesystem without mmap
    /// support.
    pub fn map_file(file: File) -> Result<Self, io::Error> {
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => Backing::Mmap(mmap),
            Err(_) => {
                let mut buf = vec![];
                let mut file = file;
                io::Read::read_to_end(&mut file, &mut buf)?;
                Backing::Buf(Cow::Owned(buf))
            }
        };

        Ok(ByteView { backing })
    }

    /// Opens the file at the given path and memory maps it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        Self::map_file(File::open(path)?)
    }

    /// Returns the bytes of this view.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.backing
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

// Both backings keep the byte buffer at a stable heap (or mapped) address
// while the view itself moves.
unsafe impl StableDeref for ByteView<'_> {}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_from_slice() {
        let view = ByteView::from_slice(b"hello");
        assert_eq!(view.len(), 5);
        assert_eq!(&view[..2], b"he");
    }

    #[test]
    fn test_map_file() -> Result<(), io::Error> {
        let mut file = tempfile::tempfile()?;
        file.write_all(b"1234")?;
        let view = ByteView::map_file(file)?;
        assert_eq!(&view[..], b"1234");
        Ok(())
    }

    #[test]
    fn test_map_empty_file() -> Result<(), io::Error> {
        let file = tempfile::tempfile()?;
        let view = ByteView::map_file(file)?;
        assert_eq!(view.len(), 0);
        Ok(())
    }
}
