//! Bounded, endian-aware reads over raw section bytes.
//!
//! [`SectionReader`] is the only way the rest of the crate touches section
//! data. Every read checks against the declared limit before consuming
//! anything; a failed read leaves the cursor exactly where it was. Offsets
//! reported by the reader are always relative to the start of the full
//! section, which is what DIE and unit offsets are defined against.

use runic_common::Endian;

use crate::error::{Error, ErrorKind, Result};

/// The offset width of a DWARF contribution (32-bit or 64-bit format).
///
/// Chosen per unit (or per standalone header) by the initial length field and
/// fixed for the rest of that contribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// The 32-bit DWARF format: offsets are 4 bytes.
    Dwarf32,
    /// The 64-bit DWARF format: offsets are 8 bytes.
    Dwarf64,
}

impl Format {
    /// The size in bytes of an offset in this format.
    #[inline]
    pub fn word_size(self) -> u8 {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 8,
        }
    }

    /// The size in bytes of the initial length field that introduced this
    /// format.
    #[inline]
    pub fn initial_length_size(self) -> u8 {
        match self {
            Format::Dwarf32 => 4,
            Format::Dwarf64 => 12,
        }
    }
}

/// The longest legal LEB128 encoding of a 64-bit value.
const MAX_LEB_BYTES: usize = 10;

/// A cursor over one section's bytes.
///
/// Cheap to copy; navigation helpers hand out positioned sub-readers rather
/// than mutating shared state.
#[derive(Clone, Copy, Debug)]
pub struct SectionReader<'data> {
    data: &'data [u8],
    endian: Endian,
    pos: usize,
    limit: usize,
}

impl<'data> SectionReader<'data> {
    /// Creates a reader over an entire section.
    pub fn new(data: &'data [u8], endian: Endian) -> Self {
        SectionReader {
            data,
            endian,
            pos: 0,
            limit: data.len(),
        }
    }

    /// Returns the byte order of this reader.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns the current cursor position, relative to the section start.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Moves the cursor to an absolute section offset.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.limit {
            return Err(ErrorKind::Truncated.into());
        }
        self.pos = pos;
        Ok(())
    }

    /// Lowers the limit of this reader to an absolute section offset.
    ///
    /// Used to confine parsing to one unit's or one entry's contribution.
    pub fn clamp(&mut self, limit: usize) -> Result<()> {
        if limit > self.data.len() || limit < self.pos {
            return Err(ErrorKind::Truncated.into());
        }
        self.limit = limit;
        Ok(())
    }

    /// Returns the current limit of this reader.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of readable bytes left before the limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Returns `true` if the cursor has reached the limit.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.limit
    }

    /// Returns the underlying section bytes, ignoring cursor and limit.
    #[inline]
    pub fn section_data(&self) -> &'data [u8] {
        self.data
    }

    /// Consumes `len` bytes and returns them.
    pub fn take(&mut self, len: usize) -> Result<&'data [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;
        if end > self.limit {
            return Err(ErrorKind::Truncated.into());
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Advances the cursor by `len` bytes without returning them.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Splits off a sub-reader over the next `len` bytes and advances past
    /// them. The sub-reader keeps section-relative positions.
    pub fn split(&mut self, len: usize) -> Result<SectionReader<'data>> {
        let start = self.pos;
        self.skip(len)?;
        let mut sub = *self;
        sub.pos = start;
        sub.limit = start + len;
        Ok(sub)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a single signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Reads a 16-bit value in the section's byte order.
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    /// Reads a 32-bit value in the section's byte order.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    /// Reads a 64-bit value in the section's byte order.
    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    /// Reads a target address of the given byte size, zero-extended.
    ///
    /// Address sizes of 1, 2, 4 and 8 bytes occur in the wild; anything else
    /// is rejected when the unit header is parsed, so this only guards.
    pub fn read_address(&mut self, address_size: u8) -> Result<u64> {
        match address_size {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => Err(ErrorKind::BadTypeSize.into()),
        }
    }

    /// Reads a section offset in the given DWARF format.
    pub fn read_offset(&mut self, format: Format) -> Result<u64> {
        match format {
            Format::Dwarf32 => self.read_u32().map(u64::from),
            Format::Dwarf64 => self.read_u64(),
        }
    }

    /// Reads an initial length field.
    ///
    /// A 32-bit value below `0xffff_fff0` selects the 32-bit format. The
    /// escape value `0xffff_ffff` is followed by the real 64-bit length and
    /// selects the 64-bit format. The values in between are reserved by
    /// DWARF 3 and rejected.
    pub fn read_initial_length(&mut self) -> Result<(u64, Format)> {
        let mut probe = *self;
        let word = probe.read_u32()?;
        let result = match word {
            0xffff_ffff => {
                let length = probe.read_u64()?;
                (length, Format::Dwarf64)
            }
            0xffff_fff0..=0xffff_fffe => {
                return Err(Error::new(
                    ErrorKind::VersionUnsupported,
                    format!("reserved initial length {word:#x}"),
                ))
            }
            _ => (u64::from(word), Format::Dwarf32),
        };
        self.pos = probe.pos;
        Ok(result)
    }

    /// Reads an unsigned LEB128 value.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        let mut pos = self.pos;

        loop {
            if pos >= self.limit {
                return Err(ErrorKind::Truncated.into());
            }
            let byte = self.data[pos];
            pos += 1;

            if shift == 63 && byte > 1 {
                return Err(ErrorKind::MalformedLeb.into());
            }
            result |= u64::from(byte & 0x7f) << shift;

            if byte & 0x80 == 0 {
                self.pos = pos;
                return Ok(result);
            }

            shift += 7;
            if pos - self.pos >= MAX_LEB_BYTES {
                return Err(ErrorKind::MalformedLeb.into());
            }
        }
    }

    /// Reads a signed LEB128 value.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut pos = self.pos;

        loop {
            if pos >= self.limit {
                return Err(ErrorKind::Truncated.into());
            }
            let byte = self.data[pos];
            pos += 1;

            if shift == 63 && byte != 0 && byte != 0x7f {
                return Err(ErrorKind::MalformedLeb.into());
            }
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                // Sign-extend from the final payload bit.
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                self.pos = pos;
                return Ok(result);
            }

            if pos - self.pos >= MAX_LEB_BYTES {
                return Err(ErrorKind::MalformedLeb.into());
            }
        }
    }

    /// Reads bytes up to (not including) the next NUL and consumes the NUL.
    pub fn read_null_terminated(&mut self) -> Result<&'data [u8]> {
        let window = &self.data[self.pos..self.limit];
        match window.iter().position(|&b| b == 0) {
            Some(nul) => {
                let bytes = &window[..nul];
                self.pos += nul + 1;
                Ok(bytes)
            }
            None => Err(ErrorKind::Truncated.into()),
        }
    }
}

/// Reads a NUL-terminated string starting at `offset` of `data`.
///
/// This is the landing check for `strp`-class references: the offset must be
/// inside the section and a terminator must exist before its end.
pub(crate) fn string_at(data: &[u8], offset: u64) -> Result<&[u8]> {
    let offset = usize::try_from(offset).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
    let window = data.get(offset..).ok_or(ErrorKind::Truncated)?;
    match window.iter().position(|&b| b == 0) {
        Some(nul) => Ok(&window[..nul]),
        None => Err(ErrorKind::Truncated.into()),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn le(data: &[u8]) -> SectionReader<'_> {
        SectionReader::new(data, Endian::Little)
    }

    #[test]
    fn test_fixed_width_reads() {
        let mut r = SectionReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05], Endian::Little);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.read_u8().unwrap(), 0x03);
        assert_eq!(r.pos(), 3);

        let mut r = SectionReader::new(&[0x01, 0x02, 0x03, 0x04], Endian::Big);
        assert_eq!(r.read_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_failed_read_keeps_cursor() {
        let mut r = le(&[0xaa, 0xbb]);
        r.read_u8().unwrap();
        assert_eq!(r.read_u32().unwrap_err().kind(), ErrorKind::Truncated);
        assert_eq!(r.pos(), 1);

        // An unterminated LEB also leaves the cursor alone.
        let mut r = le(&[0x80, 0x80]);
        assert_eq!(r.read_uleb128().unwrap_err().kind(), ErrorKind::Truncated);
        assert_eq!(r.pos(), 0);
    }

    #[test]
    fn test_uleb128() {
        assert_eq!(le(&[0x00]).read_uleb128().unwrap(), 0);
        assert_eq!(le(&[0x7f]).read_uleb128().unwrap(), 127);
        assert_eq!(le(&[0x80, 0x01]).read_uleb128().unwrap(), 128);
        assert_eq!(le(&[0xb9, 0x64]).read_uleb128().unwrap(), 12857);
        assert_eq!(
            le(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01])
                .read_uleb128()
                .unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_uleb128_overflow() {
        // 11 continuation bytes can never encode a u64.
        let mut r = le(&[0x80; 16]);
        assert_eq!(r.read_uleb128().unwrap_err().kind(), ErrorKind::MalformedLeb);
        assert_eq!(r.pos(), 0);

        // Exactly 10 bytes but with payload bits above bit 63.
        let mut r = le(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(r.read_uleb128().unwrap_err().kind(), ErrorKind::MalformedLeb);
    }

    #[test]
    fn test_sleb128() {
        assert_eq!(le(&[0x00]).read_sleb128().unwrap(), 0);
        assert_eq!(le(&[0x02]).read_sleb128().unwrap(), 2);
        assert_eq!(le(&[0x7e]).read_sleb128().unwrap(), -2);
        assert_eq!(le(&[0xff, 0x00]).read_sleb128().unwrap(), 127);
        assert_eq!(le(&[0x80, 0x7f]).read_sleb128().unwrap(), -128);
        assert_eq!(
            le(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f])
                .read_sleb128()
                .unwrap(),
            i64::MIN
        );
    }

    #[test]
    fn test_leb_round_trips() {
        fn encode_uleb(mut value: u64) -> Vec<u8> {
            let mut out = vec![];
            loop {
                let byte = (value & 0x7f) as u8;
                value >>= 7;
                if value == 0 {
                    out.push(byte);
                    return out;
                }
                out.push(byte | 0x80);
            }
        }

        fn encode_sleb(mut value: i64) -> Vec<u8> {
            let mut out = vec![];
            loop {
                let byte = (value & 0x7f) as u8;
                value >>= 7;
                let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
                if done {
                    out.push(byte);
                    return out;
                }
                out.push(byte | 0x80);
            }
        }

        for value in [0u64, 1, 127, 128, 0xffff, 1 << 32, u64::MAX - 1, u64::MAX] {
            let encoded = encode_uleb(value);
            assert_eq!(le(&encoded).read_uleb128().unwrap(), value);
        }

        for value in [0i64, 1, -1, 63, -64, 64, i64::MAX, i64::MIN, -12_345_678] {
            let encoded = encode_sleb(value);
            assert_eq!(le(&encoded).read_sleb128().unwrap(), value);
        }
    }

    #[test]
    fn test_initial_length() {
        let mut r = le(&[0x10, 0x00, 0x00, 0x00]);
        assert_eq!(r.read_initial_length().unwrap(), (0x10, Format::Dwarf32));

        let mut r = le(&[
            0xff, 0xff, 0xff, 0xff, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        assert_eq!(r.read_initial_length().unwrap(), (8, Format::Dwarf64));
        assert_eq!(r.pos(), 12);

        let mut r = le(&[0xf2, 0xff, 0xff, 0xff]);
        assert_eq!(
            r.read_initial_length().unwrap_err().kind(),
            ErrorKind::VersionUnsupported
        );
        assert_eq!(r.pos(), 0);
    }

    #[test]
    fn test_null_terminated() {
        let mut r = le(b"main\0rest");
        assert_eq!(r.read_null_terminated().unwrap(), b"main");
        assert_eq!(r.pos(), 5);

        let mut r = le(b"unterminated");
        assert!(r.read_null_terminated().is_err());
        assert_eq!(r.pos(), 0);
    }

    #[test]
    fn test_split_and_clamp() {
        let mut r = le(&[1, 2, 3, 4, 5, 6]);
        r.skip(1).unwrap();
        let mut sub = r.split(3).unwrap();
        assert_eq!(sub.pos(), 1);
        assert_eq!(sub.remaining(), 3);
        assert_eq!(sub.read_u8().unwrap(), 2);
        assert_eq!(r.pos(), 4);
        assert!(sub.read_u32().is_err());
    }

    #[test]
    fn test_string_at() {
        let data = b"one\0two\0";
        assert_eq!(string_at(data, 0).unwrap(), b"one");
        assert_eq!(string_at(data, 4).unwrap(), b"two");
        assert!(string_at(data, 100).is_err());
        assert!(string_at(b"nope", 0).is_err());
    }
}
