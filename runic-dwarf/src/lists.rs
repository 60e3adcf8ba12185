//! Range and location list engines.
//!
//! DWARF 2–4 store flat `(begin, end)` pair lists in `.debug_ranges` and
//! `.debug_loc`; DWARF 5 replaces them with typed entry streams in
//! `.debug_rnglists` and `.debug_loclists`, optionally reached through an
//! offset array indexed by `rnglistx`/`loclistx`. Both generations cook
//! down to the same output: absolute `(begin, end)` pairs, with a flag
//! marking entries whose `addrx` indices could not be resolved because the
//! skeleton's address base is absent.

use fallible_iterator::FallibleIterator;

use crate::attr::AttrValue;
use crate::constants::*;
use crate::error::{ErrorKind, Result};
use crate::reader::{Format, SectionReader};
use crate::registry::SectionId;
use crate::unit::UnitRef;

/// A cooked address range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    /// The first address of the range.
    pub begin: u64,
    /// One past the last address of the range.
    pub end: u64,
    /// Set when an `addrx` index in this entry (or its base) could not be
    /// resolved because `.debug_addr` or the address base is missing. The
    /// raw operands are carried through unresolved.
    pub debug_addr_unavailable: bool,
}

/// A cooked location list entry: a range plus its expression bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationEntry<'data> {
    /// The range this location applies to.
    pub range: Range,
    /// The DWARF expression describing the location.
    pub data: &'data [u8],
    /// Whether this is a `DW_LLE_default_location` entry, valid at any PC
    /// not covered by another entry.
    pub is_default: bool,
}

/// The sentinel that marks a base-address selection in v2–4 lists.
fn base_address_sentinel(address_size: u8) -> u64 {
    match address_size {
        8 => u64::MAX,
        size => (1u64 << (u64::from(size) * 8)) - 1,
    }
}

/// Resolves a `rnglistx`/`loclistx` index through the offset array at
/// `base`.
pub(crate) fn resolve_list_index(
    mut reader: SectionReader<'_>,
    base: u64,
    format: Format,
    index: u64,
) -> Result<u64> {
    let word = u64::from(format.word_size());
    let slot = base
        .checked_add(
            index
                .checked_mul(word)
                .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?,
        )
        .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;
    reader.seek(usize::try_from(slot).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)?;
    let relative = reader.read_offset(format)?;
    base.checked_add(relative)
        .ok_or_else(|| ErrorKind::SectionSizeOrOffsetLarge.into())
}

/// The default offset-array base when `DW_AT_rnglists_base` (or
/// `loclists_base`) is absent: just past the section header, which is where
/// split units expect it.
pub(crate) fn default_lists_base(format: Format) -> u64 {
    match format {
        Format::Dwarf32 => 12,
        Format::Dwarf64 => 20,
    }
}

/// Internal state shared by both engines.
struct ListState<'s, 'data> {
    unit: UnitRef<'s, 'data>,
    reader: SectionReader<'s>,
    v5: bool,
    base: u64,
    unavailable: bool,
    done: bool,
}

impl<'s, 'data> ListState<'s, 'data> {
    fn new(unit: UnitRef<'s, 'data>, reader: SectionReader<'s>, v5: bool) -> Result<Self> {
        let base = unit.bases()?.low_pc.unwrap_or(0);
        Ok(ListState {
            unit,
            reader,
            v5,
            base,
            unavailable: false,
            done: false,
        })
    }

    /// Resolves an address index, downgrading a missing base to the
    /// unavailable flag instead of failing the iteration.
    fn addr_index(&mut self, index: u64) -> Result<u64> {
        match self.unit.session().resolve_addr_index(self.unit, index) {
            Ok(address) => Ok(address),
            Err(err) if err.kind() == ErrorKind::MissingBase => {
                self.unavailable = true;
                Ok(index)
            }
            Err(err) => Err(err),
        }
    }

    fn cook(&self, begin: u64, end: u64) -> Range {
        Range {
            begin,
            end,
            debug_addr_unavailable: self.unavailable,
        }
    }
}

/// An iterator over one attribute's range list.
pub struct RnglistIter<'s, 'data> {
    state: ListState<'s, 'data>,
}

impl<'s, 'data> RnglistIter<'s, 'data> {
    pub(crate) fn new(
        unit: UnitRef<'s, 'data>,
        reader: SectionReader<'s>,
        v5: bool,
    ) -> Result<Self> {
        Ok(RnglistIter {
            state: ListState::new(unit, reader, v5)?,
        })
    }

    fn next_legacy(&mut self) -> Result<Option<Range>> {
        let state = &mut self.state;
        let address_size = state.unit.header().address_size;
        let sentinel = base_address_sentinel(address_size);

        loop {
            let begin = state.reader.read_address(address_size)?;
            let end = state.reader.read_address(address_size)?;

            if begin == 0 && end == 0 {
                state.done = true;
                return Ok(None);
            }
            if begin == sentinel {
                state.base = end;
                continue;
            }

            let base = state.base;
            return Ok(Some(state.cook(
                base.wrapping_add(begin),
                base.wrapping_add(end),
            )));
        }
    }

    fn next_v5(&mut self) -> Result<Option<Range>> {
        loop {
            let kind = DwRle(self.state.reader.read_u8()?);
            match kind {
                DW_RLE_end_of_list => {
                    self.state.done = true;
                    return Ok(None);
                }
                DW_RLE_base_addressx => {
                    let index = self.state.reader.read_uleb128()?;
                    self.state.base = self.state.addr_index(index)?;
                }
                DW_RLE_base_address => {
                    let address_size = self.state.unit.header().address_size;
                    self.state.base = self.state.reader.read_address(address_size)?;
                    self.state.unavailable = false;
                }
                DW_RLE_startx_endx => {
                    let begin = self.state.reader.read_uleb128()?;
                    let end = self.state.reader.read_uleb128()?;
                    let begin = self.state.addr_index(begin)?;
                    let end = self.state.addr_index(end)?;
                    return Ok(Some(self.state.cook(begin, end)));
                }
                DW_RLE_startx_length => {
                    let begin = self.state.reader.read_uleb128()?;
                    let length = self.state.reader.read_uleb128()?;
                    let begin = self.state.addr_index(begin)?;
                    return Ok(Some(self.state.cook(begin, begin.wrapping_add(length))));
                }
                DW_RLE_offset_pair => {
                    let begin = self.state.reader.read_uleb128()?;
                    let end = self.state.reader.read_uleb128()?;
                    let base = self.state.base;
                    return Ok(Some(self.state.cook(
                        base.wrapping_add(begin),
                        base.wrapping_add(end),
                    )));
                }
                DW_RLE_start_end => {
                    let address_size = self.state.unit.header().address_size;
                    let begin = self.state.reader.read_address(address_size)?;
                    let end = self.state.reader.read_address(address_size)?;
                    return Ok(Some(self.state.cook(begin, end)));
                }
                DW_RLE_start_length => {
                    let address_size = self.state.unit.header().address_size;
                    let begin = self.state.reader.read_address(address_size)?;
                    let length = self.state.reader.read_uleb128()?;
                    return Ok(Some(self.state.cook(begin, begin.wrapping_add(length))));
                }
                unknown => {
                    return Err(crate::error::Error::new(
                        ErrorKind::UnknownOpcode,
                        format!("{unknown}"),
                    ))
                }
            }
        }
    }
}

impl FallibleIterator for RnglistIter<'_, '_> {
    type Item = Range;
    type Error = crate::error::Error;

    fn next(&mut self) -> Result<Option<Range>> {
        if self.state.done {
            return Ok(None);
        }
        let result = if self.state.v5 {
            self.next_v5()
        } else {
            self.next_legacy()
        };
        if result.is_err() {
            self.state.done = true;
        }
        result
    }
}

/// An iterator over one attribute's location list.
pub struct LoclistIter<'s, 'data> {
    state: ListState<'s, 'data>,
}

impl<'s, 'data> LoclistIter<'s, 'data> {
    pub(crate) fn new(
        unit: UnitRef<'s, 'data>,
        reader: SectionReader<'s>,
        v5: bool,
    ) -> Result<Self> {
        Ok(LoclistIter {
            state: ListState::new(unit, reader, v5)?,
        })
    }

    fn read_counted_block(&mut self) -> Result<&'s [u8]> {
        let len = self.state.reader.read_uleb128()?;
        let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        self.state.reader.take(len)
    }

    fn next_legacy(&mut self) -> Result<Option<LocationEntry<'s>>> {
        let address_size = self.state.unit.header().address_size;
        let sentinel = base_address_sentinel(address_size);

        loop {
            let begin = self.state.reader.read_address(address_size)?;
            let end = self.state.reader.read_address(address_size)?;

            if begin == 0 && end == 0 {
                self.state.done = true;
                return Ok(None);
            }
            if begin == sentinel {
                self.state.base = end;
                continue;
            }

            let len = self.state.reader.read_u16()? as usize;
            let data = self.state.reader.take(len)?;
            let base = self.state.base;
            return Ok(Some(LocationEntry {
                range: self
                    .state
                    .cook(base.wrapping_add(begin), base.wrapping_add(end)),
                data,
                is_default: false,
            }));
        }
    }

    fn next_v5(&mut self) -> Result<Option<LocationEntry<'s>>> {
        loop {
            let kind = DwLle(self.state.reader.read_u8()?);
            match kind {
                DW_LLE_end_of_list => {
                    self.state.done = true;
                    return Ok(None);
                }
                DW_LLE_base_addressx => {
                    let index = self.state.reader.read_uleb128()?;
                    self.state.base = self.state.addr_index(index)?;
                }
                DW_LLE_base_address => {
                    let address_size = self.state.unit.header().address_size;
                    self.state.base = self.state.reader.read_address(address_size)?;
                    self.state.unavailable = false;
                }
                DW_LLE_startx_endx => {
                    let begin = self.state.addr_index_from_uleb()?;
                    let end = self.state.addr_index_from_uleb()?;
                    let data = self.read_counted_block()?;
                    return Ok(Some(LocationEntry {
                        range: self.state.cook(begin, end),
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_startx_length => {
                    let begin = self.state.addr_index_from_uleb()?;
                    let length = self.state.reader.read_uleb128()?;
                    let data = self.read_counted_block()?;
                    return Ok(Some(LocationEntry {
                        range: self.state.cook(begin, begin.wrapping_add(length)),
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_offset_pair => {
                    let begin = self.state.reader.read_uleb128()?;
                    let end = self.state.reader.read_uleb128()?;
                    let data = self.read_counted_block()?;
                    let base = self.state.base;
                    return Ok(Some(LocationEntry {
                        range: self
                            .state
                            .cook(base.wrapping_add(begin), base.wrapping_add(end)),
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_default_location => {
                    let data = self.read_counted_block()?;
                    return Ok(Some(LocationEntry {
                        range: self.state.cook(0, u64::MAX),
                        data,
                        is_default: true,
                    }));
                }
                DW_LLE_start_end => {
                    let address_size = self.state.unit.header().address_size;
                    let begin = self.state.reader.read_address(address_size)?;
                    let end = self.state.reader.read_address(address_size)?;
                    let data = self.read_counted_block()?;
                    return Ok(Some(LocationEntry {
                        range: self.state.cook(begin, end),
                        data,
                        is_default: false,
                    }));
                }
                DW_LLE_start_length => {
                    let address_size = self.state.unit.header().address_size;
                    let begin = self.state.reader.read_address(address_size)?;
                    let length = self.state.reader.read_uleb128()?;
                    let data = self.read_counted_block()?;
                    return Ok(Some(LocationEntry {
                        range: self.state.cook(begin, begin.wrapping_add(length)),
                        data,
                        is_default: false,
                    }));
                }
                unknown => {
                    return Err(crate::error::Error::new(
                        ErrorKind::UnknownOpcode,
                        format!("{unknown}"),
                    ))
                }
            }
        }
    }
}

impl ListState<'_, '_> {
    fn addr_index_from_uleb(&mut self) -> Result<u64> {
        let index = self.reader.read_uleb128()?;
        self.addr_index(index)
    }
}

impl<'s> FallibleIterator for LoclistIter<'s, '_> {
    type Item = LocationEntry<'s>;
    type Error = crate::error::Error;

    fn next(&mut self) -> Result<Option<LocationEntry<'s>>> {
        if self.state.done {
            return Ok(None);
        }
        let result = if self.state.v5 {
            self.next_v5()
        } else {
            self.next_legacy()
        };
        if result.is_err() {
            self.state.done = true;
        }
        result
    }
}

/// Locates a range list from an attribute value.
///
/// A section offset is used directly; a `rnglistx` index goes through the
/// offset array at the unit's `rnglists_base`.
pub(crate) fn locate_rnglist(
    unit: UnitRef<'_, '_>,
    value: AttrValue<'_>,
) -> Result<Option<(SectionId, u64, bool)>> {
    let header = unit.header();
    let v5 = header.version >= 5;

    let located = match value {
        AttrValue::SecOffset(offset) | AttrValue::Udata(offset) => {
            let id = if v5 {
                SectionId::DebugRngLists
            } else {
                SectionId::DebugRanges
            };
            (id, offset, v5)
        }
        AttrValue::RnglistIndex(index) => {
            let id = SectionId::DebugRngLists;
            let data = unit
                .session()
                .section_reader(id)
                .ok_or(ErrorKind::MissingBase)?;
            let base = unit
                .bases()?
                .rnglists_base
                .unwrap_or_else(|| default_lists_base(header.format));
            let offset = resolve_list_index(data, base, header.format, index)?;
            (id, offset, true)
        }
        _ => return Ok(None),
    };

    Ok(Some(located))
}

/// Locates a location list from an attribute value.
///
/// The counterpart of [`locate_rnglist`] for `.debug_loc` /
/// `.debug_loclists`.
pub(crate) fn locate_loclist(
    unit: UnitRef<'_, '_>,
    value: AttrValue<'_>,
) -> Result<Option<(SectionId, u64, bool)>> {
    let header = unit.header();
    let v5 = header.version >= 5;

    let located = match value {
        AttrValue::SecOffset(offset) | AttrValue::Udata(offset) => {
            let id = if v5 {
                SectionId::DebugLocLists
            } else {
                SectionId::DebugLoc
            };
            (id, offset, v5)
        }
        AttrValue::LoclistIndex(index) => {
            let id = SectionId::DebugLocLists;
            let data = unit
                .session()
                .section_reader(id)
                .ok_or(ErrorKind::MissingBase)?;
            let base = unit
                .bases()?
                .loclists_base
                .unwrap_or_else(|| default_lists_base(header.format));
            let offset = resolve_list_index(data, base, header.format, index)?;
            (id, offset, true)
        }
        _ => return Ok(None),
    };

    Ok(Some(located))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_base_address_sentinel() {
        assert_eq!(base_address_sentinel(4), 0xffff_ffff);
        assert_eq!(base_address_sentinel(8), u64::MAX);
        assert_eq!(base_address_sentinel(2), 0xffff);
    }

    #[test]
    fn test_resolve_list_index() {
        // Offset array at base 4 with entries [0x10, 0x20].
        let data = [
            0x00, 0x00, 0x00, 0x00, // header filler
            0x10, 0x00, 0x00, 0x00, // [0]
            0x20, 0x00, 0x00, 0x00, // [1]
        ];
        let reader = SectionReader::new(&data, runic_common::Endian::Little);

        assert_eq!(
            resolve_list_index(reader, 4, Format::Dwarf32, 0).unwrap(),
            0x14
        );
        assert_eq!(
            resolve_list_index(reader, 4, Format::Dwarf32, 1).unwrap(),
            0x24
        );
        assert!(resolve_list_index(reader, 4, Format::Dwarf32, 9).is_err());
    }

    #[test]
    fn test_default_lists_base() {
        assert_eq!(default_lists_base(Format::Dwarf32), 12);
        assert_eq!(default_lists_base(Format::Dwarf64), 20);
    }
}
