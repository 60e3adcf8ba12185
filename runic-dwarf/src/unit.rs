//! Compilation units and the lazy DIE walk.
//!
//! Unit headers are scanned eagerly when a session is built; everything
//! below a header (abbreviation table, base attributes, the DIE tree) is
//! decoded on demand. DIE handles are plain `(unit, offset)` pairs carrying
//! a borrow of their session, so references between units (and cycles) never
//! materialize as pointers.

use fallible_iterator::FallibleIterator;
use once_cell::unsync::OnceCell;
use std::fmt;
use std::sync::Arc;

use crate::abbrev::{Abbreviation, AbbrevTable};
use crate::attr::{self, Attr, AttrValue, Encoding};
use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::reader::{Format, SectionReader};
use crate::session::DwarfSession;

/// A parsed unit header from `.debug_info` or `.debug_types`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitHeader {
    /// Section offset of the initial length field.
    pub offset: usize,
    /// The unit type; synthesized for pre-DWARF-5 units.
    pub unit_type: DwUt,
    /// The DWARF version of this unit.
    pub version: u16,
    /// The offset format selected by the initial length.
    pub format: Format,
    /// The size of a target address in this unit.
    pub address_size: u8,
    /// The value of the initial length field.
    pub unit_length: u64,
    /// The offset of this unit's abbreviation table in `.debug_abbrev`.
    pub abbrev_offset: u64,
    /// The type signature, for type units.
    pub type_signature: Option<u64>,
    /// The unit-relative offset of the type DIE, for type units.
    pub type_offset: Option<u64>,
    /// The split-DWARF id, for skeleton and split units (DWARF 5 header
    /// field; DWARF 4 producers put it in `DW_AT_GNU_dwo_id` instead).
    pub dwo_id: Option<u64>,
    /// Whether this unit lives in `.debug_info` (as opposed to
    /// `.debug_types`).
    pub is_info: bool,
    /// Section offset of the first DIE.
    pub entries_offset: usize,
    /// Section offset one past the end of this unit.
    pub end_offset: usize,
    /// Whether the declared unit length ran past the end of the section.
    ///
    /// The unit is clamped to the section end so that decoding fails with
    /// `Truncated` at the first cut entry instead of rejecting the whole
    /// section.
    pub truncated: bool,
}

impl UnitHeader {
    /// The decoding parameters of this unit.
    pub fn encoding(&self) -> Encoding {
        Encoding {
            version: self.version,
            format: self.format,
            address_size: self.address_size,
        }
    }

    /// Whether this is a type unit (in either section).
    pub fn is_type_unit(&self) -> bool {
        matches!(self.unit_type, DW_UT_type | DW_UT_split_type)
    }

    /// Whether this is a skeleton unit awaiting its `.dwo`.
    pub fn is_skeleton(&self) -> bool {
        self.unit_type == DW_UT_skeleton
    }

    /// Whether this unit came out of a split (`.dwo`) object.
    pub fn is_split(&self) -> bool {
        matches!(self.unit_type, DW_UT_split_compile | DW_UT_split_type)
    }

    /// Parses one unit header at `reader`'s position.
    pub fn parse(reader: &mut SectionReader<'_>, is_info: bool) -> Result<UnitHeader> {
        let offset = reader.pos();
        let (unit_length, format) = reader.read_initial_length()?;

        let length = usize::try_from(unit_length).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        let declared_end = reader
            .pos()
            .checked_add(length)
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;
        let truncated = declared_end > reader.limit();
        let end_offset = if truncated {
            reader.limit()
        } else {
            declared_end
        };

        let version = reader.read_u16()?;
        if !(2..=5).contains(&version) {
            return Err(Error::new(
                ErrorKind::VersionUnsupported,
                format!("unit version {version}"),
            ));
        }

        let unit_type;
        let address_size;
        let abbrev_offset;
        let mut type_signature = None;
        let mut type_offset = None;
        let mut dwo_id = None;

        if version >= 5 {
            unit_type = DwUt(reader.read_u8()?);
            address_size = reader.read_u8()?;
            abbrev_offset = reader.read_offset(format)?;
            match unit_type {
                DW_UT_skeleton | DW_UT_split_compile => {
                    dwo_id = Some(reader.read_u64()?);
                }
                DW_UT_type | DW_UT_split_type => {
                    type_signature = Some(reader.read_u64()?);
                    type_offset = Some(reader.read_offset(format)?);
                }
                DW_UT_compile | DW_UT_partial => {}
                other => {
                    return Err(Error::new(
                        ErrorKind::VersionUnsupported,
                        format!("unit type {other}"),
                    ))
                }
            }
        } else {
            abbrev_offset = reader.read_offset(format)?;
            address_size = reader.read_u8()?;
            if is_info {
                unit_type = DW_UT_compile;
            } else {
                // A DWARF 4 type unit in .debug_types.
                unit_type = DW_UT_type;
                type_signature = Some(reader.read_u64()?);
                type_offset = Some(reader.read_offset(format)?);
            }
        }

        if !matches!(address_size, 1 | 2 | 4 | 8) {
            return Err(Error::new(
                ErrorKind::BadTypeSize,
                format!("address size {address_size}"),
            ));
        }

        let entries_offset = reader.pos();
        if entries_offset > end_offset {
            return Err(ErrorKind::Truncated.into());
        }

        // Leave the reader at the next unit header.
        reader.seek(end_offset)?;

        Ok(UnitHeader {
            offset,
            unit_type,
            version,
            format,
            address_size,
            unit_length,
            abbrev_offset,
            type_signature,
            type_offset,
            dwo_id,
            is_info,
            entries_offset,
            end_offset,
            truncated,
        })
    }
}

/// Base offsets collected from a unit's root DIE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnitBases {
    /// `DW_AT_addr_base` / `DW_AT_GNU_addr_base`.
    pub addr_base: Option<u64>,
    /// `DW_AT_str_offsets_base`.
    pub str_offsets_base: Option<u64>,
    /// `DW_AT_loclists_base`.
    pub loclists_base: Option<u64>,
    /// `DW_AT_rnglists_base`.
    pub rnglists_base: Option<u64>,
    /// `DW_AT_GNU_ranges_base`, for DWARF 4 split producers.
    pub ranges_base: Option<u64>,
    /// `DW_AT_GNU_dwo_id`, for DWARF 4 skeletons.
    pub dwo_id: Option<u64>,
    /// `DW_AT_low_pc` when encoded directly; the default base address for
    /// range and location lists.
    pub low_pc: Option<u64>,
}

/// The per-unit state owned by a session.
#[derive(Debug, Default)]
pub(crate) struct UnitState {
    pub(crate) abbrevs: OnceCell<Arc<AbbrevTable>>,
    pub(crate) bases: OnceCell<UnitBases>,
}

/// A unit context: the header plus lazily-populated caches.
#[derive(Debug)]
pub struct Unit {
    pub(crate) header: UnitHeader,
    pub(crate) state: UnitState,
}

impl Unit {
    pub(crate) fn new(header: UnitHeader) -> Self {
        Unit {
            header,
            state: UnitState::default(),
        }
    }

    /// The parsed header of this unit.
    pub fn header(&self) -> &UnitHeader {
        &self.header
    }
}

/// Scans all unit headers in a section.
///
/// Trailing bytes too short to hold another header are recorded as a
/// harmless anomaly rather than failing the scan.
pub(crate) fn scan_units(
    mut reader: SectionReader<'_>,
    is_info: bool,
) -> Result<(Vec<Unit>, Option<usize>)> {
    let mut units = Vec::new();
    let mut trailing = None;

    while !reader.is_empty() {
        if reader.remaining() < 4 {
            trailing = Some(reader.remaining());
            break;
        }
        let header = UnitHeader::parse(&mut reader, is_info)?;
        units.push(Unit::new(header));
    }

    Ok((units, trailing))
}

/// A borrowed handle to one unit of a session.
#[derive(Clone, Copy)]
pub struct UnitRef<'s, 'data> {
    pub(crate) session: &'s DwarfSession<'data>,
    pub(crate) index: usize,
    pub(crate) is_info: bool,
}

impl<'s, 'data> UnitRef<'s, 'data> {
    fn unit(&self) -> &'s Unit {
        self.session.unit_slot(self.index, self.is_info)
    }

    /// The session this unit belongs to.
    pub fn session(&self) -> &'s DwarfSession<'data> {
        self.session
    }

    /// The index of this unit within its section's unit list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The parsed header of this unit.
    pub fn header(&self) -> &'s UnitHeader {
        &self.unit().header
    }

    /// The decoding parameters of this unit.
    pub fn encoding(&self) -> Encoding {
        self.header().encoding()
    }

    /// The abbreviation table of this unit, parsed and cached on first use.
    pub fn abbrevs(&self) -> Result<&'s AbbrevTable> {
        self.session
            .abbrev_table(self.unit())
            .map(|arc| &**arc)
    }

    /// The base offsets collected from this unit's root DIE.
    pub fn bases(&self) -> Result<UnitBases> {
        if let Some(bases) = self.unit().state.bases.get() {
            return Ok(*bases);
        }
        let bases = self.compute_bases()?;
        // A concurrent fill cannot happen on an unsync cell; a repeated fill
        // computes the same value.
        Ok(*self.unit().state.bases.get_or_init(|| bases))
    }

    fn compute_bases(&self) -> Result<UnitBases> {
        let mut bases = UnitBases {
            dwo_id: self.header().dwo_id,
            ..UnitBases::default()
        };

        let root = self.root_die();
        let mut attrs = root.attrs()?;
        while let Some(attr) = attrs.next()? {
            match attr.at {
                DW_AT_addr_base | DW_AT_GNU_addr_base => bases.addr_base = attr.value.sec_offset(),
                DW_AT_str_offsets_base => bases.str_offsets_base = attr.value.sec_offset(),
                DW_AT_loclists_base => bases.loclists_base = attr.value.sec_offset(),
                DW_AT_rnglists_base => bases.rnglists_base = attr.value.sec_offset(),
                DW_AT_GNU_ranges_base => bases.ranges_base = attr.value.sec_offset(),
                DW_AT_GNU_dwo_id => bases.dwo_id = attr.value.udata().or(bases.dwo_id),
                DW_AT_low_pc => {
                    if let AttrValue::Addr(addr) = attr.value {
                        bases.low_pc = Some(addr);
                    }
                }
                _ => {}
            }
        }

        Ok(bases)
    }

    /// The split-DWARF id of this unit, from the header or the root DIE.
    pub fn dwo_id(&self) -> Result<Option<u64>> {
        Ok(self.bases()?.dwo_id)
    }

    /// A reader over this unit's section, clamped to the unit end.
    pub(crate) fn section_reader(&self) -> Result<SectionReader<'s>> {
        let mut reader = self.session.unit_section_reader(self.is_info)?;
        reader.clamp(self.header().end_offset)?;
        Ok(reader)
    }

    /// The root DIE of this unit.
    pub fn root_die(&self) -> Die<'s, 'data> {
        Die {
            unit: *self,
            offset: self.header().entries_offset,
        }
    }

    /// A handle to the DIE at the given section offset.
    ///
    /// The offset must point into this unit's DIE range; attributes are not
    /// parsed by this call.
    pub fn die_at_offset(&self, offset: usize) -> Result<Die<'s, 'data>> {
        let header = self.header();
        if offset < header.entries_offset || offset >= header.end_offset {
            return Err(Error::new(
                ErrorKind::InvalidHandle,
                format!("offset {offset:#x} outside unit at {:#x}", header.offset),
            ));
        }
        Ok(Die {
            unit: *self,
            offset,
        })
    }

    /// The type DIE of a type unit.
    pub fn type_die(&self) -> Result<Option<Die<'s, 'data>>> {
        match self.header().type_offset {
            Some(rel) => {
                let offset = self
                    .header()
                    .offset
                    .checked_add(usize::try_from(rel).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)
                    .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;
                self.die_at_offset(offset).map(Some)
            }
            None => Ok(None),
        }
    }

    /// A depth-first iterator over every DIE in this unit.
    pub fn entries(&self) -> EntriesIter<'s, 'data> {
        EntriesIter {
            unit: *self,
            offset: self.header().entries_offset,
            depth: 0,
        }
    }
}

impl fmt::Debug for UnitRef<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRef")
            .field("index", &self.index)
            .field("is_info", &self.is_info)
            .field("header", self.header())
            .finish()
    }
}

/// A handle to one debugging information entry.
///
/// Copies freely; equality means the same section and the same offset.
#[derive(Clone, Copy)]
pub struct Die<'s, 'data> {
    unit: UnitRef<'s, 'data>,
    offset: usize,
}

impl<'s, 'data> Die<'s, 'data> {
    /// The unit this DIE belongs to.
    pub fn unit(&self) -> UnitRef<'s, 'data> {
        self.unit
    }

    /// The section offset of this DIE.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The unit-relative offset of this DIE.
    pub fn unit_offset(&self) -> usize {
        self.offset - self.unit.header().offset
    }

    fn reader(&self) -> Result<SectionReader<'s>> {
        let mut reader = self.unit.section_reader()?;
        reader.seek(self.offset)?;
        Ok(reader)
    }

    /// The abbreviation declaration of this DIE, or `None` for a null entry.
    pub fn abbrev(&self) -> Result<Option<&'s Abbreviation>> {
        let mut reader = self.reader()?;
        let code = reader.read_uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        let table = self.unit.abbrevs()?;
        match table.get(code) {
            Some(abbrev) => Ok(Some(abbrev)),
            None => Err(Error::new(
                ErrorKind::AbbrevMissing,
                format!("code {code} at offset {:#x}", self.offset),
            )),
        }
    }

    /// The tag of this DIE, or `None` for a null entry.
    pub fn tag(&self) -> Result<Option<DwTag>> {
        Ok(self.abbrev()?.map(|a| a.tag()))
    }

    /// An iterator over the attributes of this DIE.
    ///
    /// A null entry yields no attributes. Any malformed attribute aborts
    /// the whole iteration; there is no resynchronization inside a DIE.
    pub fn attrs(&self) -> Result<AttrsIter<'s, 'data>> {
        let mut reader = self.reader()?;
        let code = reader.read_uleb128()?;
        let abbrev = if code == 0 {
            None
        } else {
            let table = self.unit.abbrevs()?;
            Some(table.get(code).ok_or_else(|| {
                Error::new(
                    ErrorKind::AbbrevMissing,
                    format!("code {code} at offset {:#x}", self.offset),
                )
            })?)
        };

        Ok(AttrsIter {
            unit: self.unit,
            reader,
            abbrev,
            next_spec: 0,
        })
    }

    /// Finds the attribute with the given name, if present.
    pub fn attr(&self, at: DwAt) -> Result<Option<Attr<'s>>> {
        let mut attrs = self.attrs()?;
        while let Some(attr) = attrs.next()? {
            if attr.at == at {
                return Ok(Some(attr));
            }
        }
        Ok(None)
    }

    /// Finds the uncooked value of the attribute with the given name.
    pub fn attr_value(&self, at: DwAt) -> Result<Option<AttrValue<'s>>> {
        Ok(self.attr(at)?.map(|attr| attr.value))
    }

    /// Decodes the attribute as a string, resolving `strp`-class references.
    pub fn attr_string(&self, at: DwAt) -> Result<Option<&'s [u8]>> {
        match self.attr_value(at)? {
            Some(value) => self.unit.session.resolve_string(self.unit, value),
            None => Ok(None),
        }
    }

    /// Decodes the attribute as an address, resolving `addrx` indices.
    pub fn attr_address(&self, at: DwAt) -> Result<Option<u64>> {
        match self.attr_value(at)? {
            Some(AttrValue::Addr(addr)) => Ok(Some(addr)),
            Some(AttrValue::AddrIndex(index)) => self
                .unit
                .session
                .resolve_addr_index(self.unit, index)
                .map(Some),
            Some(_) | None => Ok(None),
        }
    }

    /// Decodes the attribute as an unsigned constant.
    pub fn attr_udata(&self, at: DwAt) -> Result<Option<u64>> {
        Ok(self.attr_value(at)?.and_then(|value| value.udata()))
    }

    /// Follows a reference-class attribute to its target DIE.
    ///
    /// Same-unit references stay in this unit; `ref_addr` and `ref_sig8`
    /// resolve through the session's unit index; `ref_sup*` resolve through
    /// the tied session if one is attached.
    pub fn follow_ref(&self, at: DwAt) -> Result<Option<Die<'s, 'data>>> {
        let value = match self.attr_value(at)? {
            Some(value) => value,
            None => return Ok(None),
        };
        self.unit.session.resolve_reference(self.unit, value)
    }

    /// The section offset just past this DIE's attributes.
    fn after_attrs(&self) -> Result<(Option<&'s Abbreviation>, usize)> {
        let mut reader = self.reader()?;
        let code = reader.read_uleb128()?;
        if code == 0 {
            return Ok((None, reader.pos()));
        }

        let table = self.unit.abbrevs()?;
        let abbrev = table.get(code).ok_or_else(|| {
            Error::new(
                ErrorKind::AbbrevMissing,
                format!("code {code} at offset {:#x}", self.offset),
            )
        })?;

        let encoding = self.unit.encoding();
        for spec in abbrev.attributes() {
            attr::skip_value(&mut reader, *spec, encoding)?;
        }
        Ok((Some(abbrev), reader.pos()))
    }

    /// The first child of this DIE, if it has children.
    pub fn child(&self) -> Result<Option<Die<'s, 'data>>> {
        let (abbrev, after) = self.after_attrs()?;
        if !abbrev.is_some_and(|a| a.has_children()) {
            return Ok(None);
        }

        let mut reader = self.unit.section_reader()?;
        reader.seek(after)?;
        let code = reader.read_uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        Ok(Some(Die {
            unit: self.unit,
            offset: after,
        }))
    }

    /// The next sibling of this DIE, if any.
    ///
    /// Uses `DW_AT_sibling` when present and in range; otherwise skips the
    /// attributes and any child subtree.
    pub fn sibling(&self) -> Result<Option<Die<'s, 'data>>> {
        let abbrev = match self.abbrev()? {
            Some(abbrev) => abbrev,
            None => return Ok(None),
        };

        if abbrev
            .attributes()
            .iter()
            .any(|spec| spec.at == DW_AT_sibling)
        {
            if let Some(AttrValue::UnitRef(rel)) = self.attr_value(DW_AT_sibling)? {
                let header = self.unit.header();
                if let Some(target) = header.offset.checked_add(rel as usize) {
                    // Only trust the attribute when it lands inside the
                    // unit, past this DIE.
                    if target > self.offset && target < header.end_offset {
                        let die = self.unit.die_at_offset(target)?;
                        return Ok(match die.is_null()? {
                            true => None,
                            false => Some(die),
                        });
                    }
                }
            }
        }

        let (_, after) = self.after_attrs()?;
        let mut reader = self.unit.section_reader()?;
        reader.seek(after)?;

        if abbrev.has_children() {
            skip_subtree(&mut reader, self.unit)?;
        }

        if reader.is_empty() {
            return Ok(None);
        }

        let offset = reader.pos();
        let code = reader.read_uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        Ok(Some(Die {
            unit: self.unit,
            offset,
        }))
    }

    fn is_null(&self) -> Result<bool> {
        let mut reader = self.reader()?;
        Ok(reader.read_uleb128()? == 0)
    }
}

impl PartialEq for Die<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.unit.is_info == other.unit.is_info
    }
}

impl Eq for Die<'_, '_> {}

impl fmt::Debug for Die<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Die")
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("tag", &self.tag().ok().flatten())
            .finish()
    }
}

/// Skips the children of a DIE; the reader must be positioned at the first
/// child's abbreviation code.
fn skip_subtree(reader: &mut SectionReader<'_>, unit: UnitRef<'_, '_>) -> Result<()> {
    let table = unit.abbrevs()?;
    let encoding = unit.encoding();
    let mut depth = 1usize;

    while depth > 0 {
        let code = reader.read_uleb128()?;
        if code == 0 {
            depth -= 1;
            continue;
        }
        let abbrev = table
            .get(code)
            .ok_or_else(|| Error::new(ErrorKind::AbbrevMissing, format!("code {code}")))?;
        for spec in abbrev.attributes() {
            attr::skip_value(reader, *spec, encoding)?;
        }
        if abbrev.has_children() {
            depth += 1;
        }
    }

    Ok(())
}

/// An iterator over the attributes of one DIE.
pub struct AttrsIter<'s, 'data> {
    unit: UnitRef<'s, 'data>,
    reader: SectionReader<'s>,
    abbrev: Option<&'s Abbreviation>,
    next_spec: usize,
}

impl<'s> FallibleIterator for AttrsIter<'s, '_> {
    type Item = Attr<'s>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<Attr<'s>>> {
        let abbrev = match self.abbrev {
            Some(abbrev) => abbrev,
            None => return Ok(None),
        };
        let spec = match abbrev.attributes().get(self.next_spec) {
            Some(spec) => *spec,
            None => return Ok(None),
        };

        let value = attr::read_value(&mut self.reader, spec, self.unit.encoding())?;
        self.next_spec += 1;

        Ok(Some(Attr {
            at: spec.at,
            form: spec.form,
            value,
        }))
    }
}

/// A depth-first iterator over all DIEs of a unit.
///
/// Yields `(depth, die)` pairs; the root is at depth 0. Null entries are
/// consumed as delimiters and never yielded.
pub struct EntriesIter<'s, 'data> {
    unit: UnitRef<'s, 'data>,
    offset: usize,
    depth: isize,
}

impl<'s, 'data> FallibleIterator for EntriesIter<'s, 'data> {
    type Item = (isize, Die<'s, 'data>);
    type Error = Error;

    fn next(&mut self) -> Result<Option<(isize, Die<'s, 'data>)>> {
        let mut reader = self.unit.section_reader()?;
        reader.seek(self.offset)?;

        loop {
            if reader.is_empty() {
                return Ok(None);
            }

            let offset = reader.pos();
            let code = reader.read_uleb128()?;
            if code == 0 {
                self.depth -= 1;
                self.offset = reader.pos();
                continue;
            }

            let die = Die {
                unit: self.unit,
                offset,
            };
            let depth = self.depth;

            let (abbrev, after) = die.after_attrs()?;
            // A non-null entry always has an abbreviation here.
            let has_children = abbrev.map(|a| a.has_children()).unwrap_or(false);
            if has_children {
                self.depth += 1;
            }
            self.offset = after;

            return Ok(Some((depth, die)));
        }
    }
}

#[cfg(test)]
mod tests {
    use runic_common::Endian;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_v4_header() {
        // 32-bit DWARF 4 compile unit header, little-endian.
        let data = [
            0x0b, 0x00, 0x00, 0x00, // unit_length = 11
            0x04, 0x00, // version 4
            0x34, 0x12, 0x00, 0x00, // abbrev offset 0x1234
            0x08, // address size
            0x00, 0x00, 0x00, 0x00, // payload
        ];
        let mut reader = SectionReader::new(&data, Endian::Little);
        let header = UnitHeader::parse(&mut reader, true).unwrap();

        assert_eq!(header.version, 4);
        assert_eq!(header.format, Format::Dwarf32);
        assert_eq!(header.abbrev_offset, 0x1234);
        assert_eq!(header.address_size, 8);
        assert_eq!(header.unit_type, DW_UT_compile);
        assert_eq!(header.entries_offset, 11);
        assert_eq!(header.end_offset, 15);
        assert_eq!(reader.pos(), 15);
    }

    #[test]
    fn test_parse_v5_skeleton_header() {
        let data = [
            0x14, 0x00, 0x00, 0x00, // unit_length = 20
            0x05, 0x00, // version 5
            0x04, // DW_UT_skeleton
            0x08, // address size
            0x00, 0x00, 0x00, 0x00, // abbrev offset
            0xef, 0xbe, 0xad, 0xde, 0x00, 0x00, 0x00, 0x00, // dwo id
            0x00, 0x00, 0x00, 0x00, // payload
        ];
        let mut reader = SectionReader::new(&data, Endian::Little);
        let header = UnitHeader::parse(&mut reader, true).unwrap();

        assert_eq!(header.unit_type, DW_UT_skeleton);
        assert!(header.is_skeleton());
        assert_eq!(header.dwo_id, Some(0xdead_beef));
        assert_eq!(header.entries_offset, 20);
    }

    #[test]
    fn test_parse_v4_type_unit_header() {
        let data = [
            0x15, 0x00, 0x00, 0x00, // unit_length = 21
            0x04, 0x00, // version 4
            0x00, 0x00, 0x00, 0x00, // abbrev offset
            0x08, // address size
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, // signature
            0x17, 0x00, 0x00, 0x00, // type offset
            0x00, 0x00, // payload
        ];
        let mut reader = SectionReader::new(&data, Endian::Little);
        let header = UnitHeader::parse(&mut reader, false).unwrap();

        assert!(header.is_type_unit());
        assert_eq!(header.type_signature, Some(0x8877_6655_4433_2211));
        assert_eq!(header.type_offset, Some(0x17));
    }

    #[test]
    fn test_bad_version() {
        let data = [0x04, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00];
        let mut reader = SectionReader::new(&data, Endian::Little);
        let err = UnitHeader::parse(&mut reader, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionUnsupported);
    }

    #[test]
    fn test_length_past_section_is_clamped() {
        let data = [
            0xff, 0x00, 0x00, 0x00, // unit_length = 255, way past the end
            0x04, 0x00, // version 4
            0x00, 0x00, 0x00, 0x00, // abbrev offset
            0x08, // address size
            0x01, // a first DIE code, then the cut
        ];
        let mut reader = SectionReader::new(&data, Endian::Little);
        let header = UnitHeader::parse(&mut reader, true).unwrap();

        assert!(header.truncated);
        assert_eq!(header.end_offset, data.len());
    }
}
