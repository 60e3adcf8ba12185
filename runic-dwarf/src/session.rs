//! The DWARF session: the root handle owning sections, unit contexts,
//! caches, and the harmless-error ring.
//!
//! A session is built over a section registry and hands out borrowed
//! handles (units, DIEs, line programs, list iterators). All decoding below
//! the unit-header scan is lazy and driven by queries. A session is
//! single-threaded; independent sessions over different objects can live on
//! different threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use runic_common::{Arch, Endian, ObjectKind};

use crate::abbrev::AbbrevTable;
use crate::attr::AttrValue;
use crate::constants::*;
use crate::error::{Error, ErrorKind, HarmlessError, HarmlessRing, Result};
use crate::frame::FrameSection;
use crate::line::{LineProgram, LineStrings};
use crate::lists::{self, LoclistIter, RnglistIter};
use crate::object::Object;
use crate::reader::{string_at, Format, SectionReader};
use crate::registry::{GroupChoice, SectionId, SectionRegistry};
use crate::unit::{scan_units, Die, Unit, UnitRef};

/// The root handle over one object's DWARF data.
pub struct DwarfSession<'data> {
    registry: SectionRegistry<'data>,
    endian: Endian,
    kind: ObjectKind,
    arch: Arch,
    address_size: u8,
    info_units: Vec<Unit>,
    type_units: Vec<Unit>,
    abbrev_cache: RefCell<HashMap<u64, Arc<AbbrevTable>>>,
    tied: Option<Arc<DwarfSession<'data>>>,
    harmless: RefCell<HarmlessRing>,
}

impl<'data> DwarfSession<'data> {
    /// Builds a session over an already-loaded section registry.
    ///
    /// Unit headers in `.debug_info` and `.debug_types` are scanned
    /// eagerly; everything else stays lazy.
    pub fn from_sections(
        registry: SectionRegistry<'data>,
        endian: Endian,
        kind: ObjectKind,
        arch: Arch,
        address_size: u8,
    ) -> Result<Self> {
        let harmless = RefCell::new(HarmlessRing::default());

        let mut scan = |id: SectionId, is_info: bool| -> Result<Vec<Unit>> {
            match registry.data(id) {
                Some(data) => {
                    let reader = SectionReader::new(data, endian);
                    let (units, trailing) = scan_units(reader, is_info)?;
                    if let Some(trailing) = trailing {
                        harmless.borrow_mut().record(
                            ErrorKind::Truncated,
                            format!("{trailing} trailing bytes after the last unit in {id}"),
                        );
                    }
                    for unit in &units {
                        if unit.header().truncated {
                            harmless.borrow_mut().record(
                                ErrorKind::Truncated,
                                format!(
                                    "unit at {:#x} in {id} is longer than its section",
                                    unit.header().offset
                                ),
                            );
                        }
                    }
                    Ok(units)
                }
                None => Ok(Vec::new()),
            }
        };

        let info_units = scan(SectionId::DebugInfo, true)?;
        let type_units = scan(SectionId::DebugTypes, false)?;

        Ok(DwarfSession {
            registry,
            endian,
            kind,
            arch,
            address_size,
            info_units,
            type_units,
            abbrev_cache: RefCell::new(HashMap::new()),
            tied: None,
            harmless,
        })
    }

    /// Builds a session from a parsed object, honoring the group choice.
    pub fn from_object(object: &Object<'data>, group: GroupChoice) -> Result<Self> {
        let loaded = object.load_sections(group)?;
        let session = DwarfSession::from_sections(
            loaded.registry,
            object.endian(),
            object.kind(),
            object.arch(),
            object.pointer_size(),
        )?;
        for (kind, message) in loaded.anomalies {
            session.record_harmless(kind, message);
        }
        Ok(session)
    }

    /// Builds a session from a caller-supplied [`ObjectReader`].
    ///
    /// Section bytes are copied out of the reader, so the session does not
    /// borrow from it.
    pub fn from_reader(
        reader: &dyn crate::object::ObjectReader,
        group: GroupChoice,
    ) -> Result<DwarfSession<'static>> {
        let pointer_size = reader.pointer_size();
        if !matches!(pointer_size, 4 | 8) {
            return Err(Error::new(
                ErrorKind::OffsetSize,
                format!("pointer size {pointer_size}"),
            ));
        }

        let loaded = crate::object::load_sections_from_reader(reader, group)?;
        let arch = crate::object::machine_arch(reader.machine_type(), pointer_size == 8);
        let session = DwarfSession::from_sections(
            loaded.registry,
            reader.endianness(),
            ObjectKind::Other,
            arch,
            pointer_size,
        )?;
        for (kind, message) in loaded.anomalies {
            session.record_harmless(kind, message);
        }
        Ok(session)
    }

    /// The byte order of the underlying object.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The object kind the session was opened from.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The CPU architecture of the underlying object.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The section registry backing this session.
    pub fn registry(&self) -> &SectionRegistry<'data> {
        &self.registry
    }

    /// Whether the session has any compilation units.
    pub fn has_units(&self) -> bool {
        !self.info_units.is_empty() || !self.type_units.is_empty()
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    /// The number of units in `.debug_info`.
    pub fn unit_count(&self) -> usize {
        self.info_units.len()
    }

    /// The number of type units in `.debug_types`.
    pub fn type_unit_count(&self) -> usize {
        self.type_units.len()
    }

    /// A handle to the `.debug_info` unit at `index`.
    pub fn unit(&self, index: usize) -> Option<UnitRef<'_, 'data>> {
        (index < self.info_units.len()).then_some(UnitRef {
            session: self,
            index,
            is_info: true,
        })
    }

    /// A handle to the `.debug_types` unit at `index`.
    pub fn type_unit(&self, index: usize) -> Option<UnitRef<'_, 'data>> {
        (index < self.type_units.len()).then_some(UnitRef {
            session: self,
            index,
            is_info: false,
        })
    }

    /// Iterates all `.debug_info` units in section order.
    pub fn units(&self) -> impl Iterator<Item = UnitRef<'_, 'data>> {
        (0..self.info_units.len()).map(move |index| UnitRef {
            session: self,
            index,
            is_info: true,
        })
    }

    /// Iterates all `.debug_types` units in section order.
    pub fn type_units(&self) -> impl Iterator<Item = UnitRef<'_, 'data>> {
        (0..self.type_units.len()).map(move |index| UnitRef {
            session: self,
            index,
            is_info: false,
        })
    }

    pub(crate) fn unit_slot(&self, index: usize, is_info: bool) -> &Unit {
        if is_info {
            &self.info_units[index]
        } else {
            &self.type_units[index]
        }
    }

    pub(crate) fn unit_section_reader(&self, is_info: bool) -> Result<SectionReader<'_>> {
        let id = if is_info {
            SectionId::DebugInfo
        } else {
            SectionId::DebugTypes
        };
        self.section_reader(id)
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle, format!("{id} not loaded")))
    }

    /// A reader over a registered section.
    pub(crate) fn section_reader(&self, id: SectionId) -> Option<SectionReader<'_>> {
        self.registry
            .data(id)
            .map(|data| SectionReader::new(data, self.endian))
    }

    /// Section bytes with split-DWARF fallback: `.debug_addr`,
    /// `.debug_str` and `.debug_line_str` of a split object live in the
    /// tied object.
    fn section_data_or_tied(&self, id: SectionId) -> Option<(&[u8], Endian)> {
        if let Some(data) = self.registry.data(id) {
            return Some((data, self.endian));
        }
        let tied = self.tied.as_deref()?;
        tied.registry.data(id).map(|data| (data, tied.endian))
    }

    pub(crate) fn abbrev_table<'s>(&'s self, unit: &'s Unit) -> Result<&'s Arc<AbbrevTable>> {
        unit.state.abbrevs.get_or_try_init(|| {
            let offset = unit.header.abbrev_offset;
            if let Some(table) = self.abbrev_cache.borrow().get(&offset) {
                return Ok(Arc::clone(table));
            }

            let reader = self.section_reader(SectionId::DebugAbbrev).ok_or_else(|| {
                Error::new(ErrorKind::AbbrevMissing, "no .debug_abbrev section")
            })?;
            let table = Arc::new(AbbrevTable::parse(reader, offset)?);
            self.abbrev_cache
                .borrow_mut()
                .insert(offset, Arc::clone(&table));
            Ok(table)
        })
    }

    /// Finds the unit whose range contains a `.debug_info` (or
    /// `.debug_types`) section offset.
    pub fn find_unit_for_offset(
        &self,
        offset: usize,
        is_info: bool,
    ) -> Option<UnitRef<'_, 'data>> {
        let units = if is_info {
            &self.info_units
        } else {
            &self.type_units
        };

        let index = match units.binary_search_by_key(&offset, |unit| unit.header.offset) {
            Ok(index) => index,
            Err(0) => return None,
            Err(next) => next - 1,
        };

        (offset < units[index].header.end_offset).then_some(UnitRef {
            session: self,
            index,
            is_info,
        })
    }

    /// A DIE handle for a global section offset.
    pub fn die_at_offset(&self, offset: usize, is_info: bool) -> Result<Die<'_, 'data>> {
        let unit = self.find_unit_for_offset(offset, is_info).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidHandle,
                format!("offset {offset:#x} is not inside any unit"),
            )
        })?;
        unit.die_at_offset(offset)
    }

    /// Finds the type DIE for a `DW_FORM_ref_sig8` signature.
    ///
    /// DWARF 4 type units live in `.debug_types`; DWARF 5 moved them into
    /// `.debug_info`. Both are searched.
    pub fn die_for_signature(&self, signature: u64) -> Result<Option<Die<'_, 'data>>> {
        let matches = |unit: &UnitRef<'_, 'data>| {
            unit.header().type_signature == Some(signature)
        };

        for unit in self.type_units().chain(self.units()) {
            if matches(&unit) {
                return match unit.type_die()? {
                    Some(die) => Ok(Some(die)),
                    None => Ok(Some(unit.root_die())),
                };
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Attribute cooking
    // ------------------------------------------------------------------

    /// Resolves a string-class attribute value to its bytes.
    pub(crate) fn resolve_string<'s>(
        &'s self,
        unit: UnitRef<'s, 'data>,
        value: AttrValue<'s>,
    ) -> Result<Option<&'s [u8]>> {
        let resolved = match value {
            AttrValue::String(bytes) => Some(bytes),
            AttrValue::Strp(offset) => {
                let (data, _) = self.section_data_or_tied(SectionId::DebugStr).ok_or_else(
                    || Error::new(ErrorKind::Truncated, "strp without .debug_str"),
                )?;
                Some(string_at(data, offset)?)
            }
            AttrValue::LineStrp(offset) => {
                let (data, _) = self
                    .section_data_or_tied(SectionId::DebugLineStr)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Truncated, "line_strp without .debug_line_str")
                    })?;
                Some(string_at(data, offset)?)
            }
            AttrValue::StrpSup(offset) => {
                let tied = self.tied.as_deref().ok_or_else(|| {
                    Error::new(ErrorKind::MissingBase, "strp_sup without a tied session")
                })?;
                let data = tied.registry.data(SectionId::DebugStr).ok_or_else(|| {
                    Error::new(ErrorKind::Truncated, "tied session has no .debug_str")
                })?;
                Some(string_at(data, offset)?)
            }
            AttrValue::StrIndex(index) => Some(self.resolve_str_index(unit, index)?),
            _ => None,
        };
        Ok(resolved)
    }

    /// The effective string-offsets base for a unit, falling back to the
    /// post-header position that split units assume.
    fn effective_str_offsets_base(&self, unit: UnitRef<'_, 'data>) -> Result<u64> {
        if let Some(base) = unit.bases()?.str_offsets_base {
            return Ok(base);
        }
        Ok(match (unit.header().version >= 5, unit.header().format) {
            (true, Format::Dwarf32) => 8,
            (true, Format::Dwarf64) => 16,
            (false, _) => 0,
        })
    }

    fn resolve_str_index<'s>(
        &'s self,
        unit: UnitRef<'s, 'data>,
        index: u64,
    ) -> Result<&'s [u8]> {
        let (offsets, endian) = self
            .section_data_or_tied(SectionId::DebugStrOffsets)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::MissingBase,
                    format!("strx {index} without .debug_str_offsets"),
                )
            })?;

        let format = unit.header().format;
        let base = self.effective_str_offsets_base(unit)?;
        let word = u64::from(format.word_size());
        let slot = base
            .checked_add(
                index
                    .checked_mul(word)
                    .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?,
            )
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

        let mut reader = SectionReader::new(offsets, endian);
        reader
            .seek(usize::try_from(slot).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)
            .map_err(|_| Error::from(ErrorKind::AddrIndexOutOfRange))?;
        let offset = reader
            .read_offset(format)
            .map_err(|_| Error::from(ErrorKind::AddrIndexOutOfRange))?;

        let (strings, _) = self
            .section_data_or_tied(SectionId::DebugStr)
            .ok_or_else(|| Error::new(ErrorKind::Truncated, "strx without .debug_str"))?;
        string_at(strings, offset)
    }

    /// Resolves an `addrx` index against `.debug_addr`.
    ///
    /// The address base comes from the unit itself, or from the matching
    /// skeleton in the tied session for split units. A missing base is the
    /// `MissingBase` policy error; the caller still holds the raw index.
    pub(crate) fn resolve_addr_index(
        &self,
        unit: UnitRef<'_, 'data>,
        index: u64,
    ) -> Result<u64> {
        let (data, endian) = self
            .section_data_or_tied(SectionId::DebugAddr)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::MissingBase,
                    format!("addrx {index} without .debug_addr"),
                )
            })?;

        let base = match unit.bases()?.addr_base {
            Some(base) => base,
            None => self.tied_addr_base(unit)?.ok_or_else(|| {
                Error::new(
                    ErrorKind::MissingBase,
                    format!("addrx {index} without an address base"),
                )
            })?,
        };

        let address_size = unit.header().address_size;
        let slot = base
            .checked_add(
                index
                    .checked_mul(u64::from(address_size))
                    .ok_or(ErrorKind::AddrIndexOutOfRange)?,
            )
            .ok_or(ErrorKind::AddrIndexOutOfRange)?;

        let mut reader = SectionReader::new(data, endian);
        reader
            .seek(usize::try_from(slot).map_err(|_| ErrorKind::AddrIndexOutOfRange)?)
            .map_err(|_| Error::from(ErrorKind::AddrIndexOutOfRange))?;
        reader
            .read_address(address_size)
            .map_err(|_| Error::from(ErrorKind::AddrIndexOutOfRange))
    }

    /// The address base a split unit inherits from its skeleton.
    fn tied_addr_base(&self, unit: UnitRef<'_, 'data>) -> Result<Option<u64>> {
        let tied = match self.tied.as_deref() {
            Some(tied) => tied,
            None => return Ok(None),
        };
        let dwo_id = match unit.bases()?.dwo_id {
            Some(dwo_id) => dwo_id,
            None => return Ok(None),
        };

        for skeleton in tied.units() {
            if skeleton.dwo_id()? == Some(dwo_id) {
                // A skeleton without an explicit base contributes from the
                // start of its .debug_addr.
                return Ok(Some(skeleton.bases()?.addr_base.unwrap_or(0)));
            }
        }
        Ok(None)
    }

    /// Resolves a reference-class attribute value to a DIE handle.
    pub(crate) fn resolve_reference<'s>(
        &'s self,
        unit: UnitRef<'s, 'data>,
        value: AttrValue<'s>,
    ) -> Result<Option<Die<'s, 'data>>> {
        match value {
            AttrValue::UnitRef(rel) => {
                let offset = unit
                    .header()
                    .offset
                    .checked_add(usize::try_from(rel).map_err(|_| ErrorKind::InvalidHandle)?)
                    .ok_or(ErrorKind::InvalidHandle)?;
                unit.die_at_offset(offset).map(Some)
            }
            AttrValue::DebugInfoRef(offset) => {
                let offset = usize::try_from(offset).map_err(|_| ErrorKind::InvalidHandle)?;
                self.die_at_offset(offset, unit.is_info).map(Some)
            }
            AttrValue::Sig8(signature) => self.die_for_signature(signature),
            AttrValue::SupRef(offset) => {
                let tied = self.tied.as_deref().ok_or_else(|| {
                    Error::new(ErrorKind::MissingBase, "ref_sup without a tied session")
                })?;
                let offset = usize::try_from(offset).map_err(|_| ErrorKind::InvalidHandle)?;
                tied.die_at_offset(offset, true).map(Some)
            }
            _ => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Derived contexts
    // ------------------------------------------------------------------

    /// The line program referenced by a compilation unit DIE's
    /// `DW_AT_stmt_list`, if present.
    pub fn line_program(&self, die: &Die<'_, 'data>) -> Result<Option<LineProgram<'_>>> {
        let offset = match die.attr_value(DW_AT_stmt_list)? {
            Some(value) => match value.sec_offset() {
                Some(offset) => offset,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let mut reader = match self.section_reader(SectionId::DebugLine) {
            Some(reader) => reader,
            None => return Ok(None),
        };
        reader.seek(usize::try_from(offset).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)?;

        let unit = die.unit();
        let strings = LineStrings {
            debug_str: self.section_data_or_tied(SectionId::DebugStr).map(|(d, _)| d),
            debug_line_str: self
                .section_data_or_tied(SectionId::DebugLineStr)
                .map(|(d, _)| d),
            debug_str_offsets: self
                .section_data_or_tied(SectionId::DebugStrOffsets)
                .map(|(d, _)| d),
            str_offsets_base: Some(self.effective_str_offsets_base(unit)?),
            endian: self.endian,
        };

        LineProgram::parse(&mut reader, unit.header().address_size, &strings).map(Some)
    }

    /// An iterator over the range list an attribute value refers to.
    pub fn rnglist<'s>(
        &'s self,
        unit: UnitRef<'s, 'data>,
        value: AttrValue<'s>,
    ) -> Result<Option<RnglistIter<'s, 'data>>> {
        let (id, offset, v5) = match lists::locate_rnglist(unit, value)? {
            Some(located) => located,
            None => return Ok(None),
        };
        let mut reader = match self.section_reader(id) {
            Some(reader) => reader,
            None => return Ok(None),
        };
        reader.seek(usize::try_from(offset).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)?;
        RnglistIter::new(unit, reader, v5).map(Some)
    }

    /// An iterator over the location list an attribute value refers to.
    pub fn loclist<'s>(
        &'s self,
        unit: UnitRef<'s, 'data>,
        value: AttrValue<'s>,
    ) -> Result<Option<LoclistIter<'s, 'data>>> {
        let (id, offset, v5) = match lists::locate_loclist(unit, value)? {
            Some(located) => located,
            None => return Ok(None),
        };
        let mut reader = match self.section_reader(id) {
            Some(reader) => reader,
            None => return Ok(None),
        };
        reader.seek(usize::try_from(offset).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)?;
        LoclistIter::new(unit, reader, v5).map(Some)
    }

    /// The `.debug_frame` section of this session, if present.
    pub fn debug_frame(&self) -> Option<FrameSection<'_>> {
        self.registry.get(SectionId::DebugFrame).map(|section| {
            FrameSection::debug_frame(&section.data, self.endian, self.address_size)
        })
    }

    /// The `.eh_frame` section of this session, if present.
    pub fn eh_frame(&self) -> Option<FrameSection<'_>> {
        self.registry.get(SectionId::EhFrame).map(|section| {
            FrameSection::eh_frame(
                &section.data,
                self.endian,
                self.address_size,
                section.address,
            )
        })
    }

    // ------------------------------------------------------------------
    // Split-DWARF tying
    // ------------------------------------------------------------------

    /// Attaches the executable-side session a split (`.dwo`) session
    /// consults for `.debug_addr`, strings and skeleton bases.
    pub fn attach_tied(&mut self, tied: Arc<DwarfSession<'data>>) {
        self.tied = Some(tied);
    }

    /// Detaches and returns the tied session.
    pub fn detach_tied(&mut self) -> Option<Arc<DwarfSession<'data>>> {
        self.tied.take()
    }

    /// The tied session, if one is attached.
    pub fn tied(&self) -> Option<&DwarfSession<'data>> {
        self.tied.as_deref()
    }

    // ------------------------------------------------------------------
    // Harmless errors
    // ------------------------------------------------------------------

    /// Records a non-fatal anomaly in the bounded ring.
    pub(crate) fn record_harmless(&self, kind: ErrorKind, message: impl Into<String>) {
        self.harmless.borrow_mut().record(kind, message);
    }

    /// A snapshot of the recorded non-fatal anomalies, oldest first.
    pub fn harmless_errors(&self) -> Vec<HarmlessError> {
        self.harmless.borrow().snapshot()
    }
}

impl fmt::Debug for DwarfSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DwarfSession")
            .field("endian", &self.endian)
            .field("kind", &self.kind)
            .field("arch", &self.arch)
            .field("units", &self.info_units.len())
            .field("type_units", &self.type_units.len())
            .field("tied", &self.tied.is_some())
            .finish()
    }
}
