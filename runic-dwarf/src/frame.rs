//! Call frame information: CIE/FDE parsing, instruction expansion, and
//! unwind rows.
//!
//! Both `.debug_frame` and `.eh_frame` are supported; they share entry
//! shapes but differ in CIE markers, pointer encodings and relative CIE
//! references. Instruction operands are decoded with alignment factors
//! already applied, so an expanded `Offset` carries the byte offset a
//! consumer would use directly.

use fallible_iterator::FallibleIterator;
use smallvec::SmallVec;

use runic_common::Endian;

use crate::constants::eh_pe::*;
use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::reader::{Format, SectionReader};

/// Which frame section an entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `.debug_frame`, per the DWARF standard.
    DebugFrame,
    /// `.eh_frame`, per the Linux base ABI.
    EhFrame,
}

/// A frame section ready for entry iteration.
#[derive(Clone, Copy, Debug)]
pub struct FrameSection<'data> {
    data: &'data [u8],
    endian: Endian,
    kind: FrameKind,
    address_size: u8,
    /// Load address of the section, for `DW_EH_PE_pcrel` resolution.
    section_address: u64,
}

impl<'data> FrameSection<'data> {
    /// Wraps a `.debug_frame` section.
    pub fn debug_frame(data: &'data [u8], endian: Endian, address_size: u8) -> Self {
        FrameSection {
            data,
            endian,
            kind: FrameKind::DebugFrame,
            address_size,
            section_address: 0,
        }
    }

    /// Wraps an `.eh_frame` section loaded at `section_address`.
    pub fn eh_frame(
        data: &'data [u8],
        endian: Endian,
        address_size: u8,
        section_address: u64,
    ) -> Self {
        FrameSection {
            data,
            endian,
            kind: FrameKind::EhFrame,
            address_size,
            section_address,
        }
    }

    /// Which section this is.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    fn reader(&self) -> SectionReader<'data> {
        SectionReader::new(self.data, self.endian)
    }

    /// Iterates over all entries in the section.
    pub fn entries(&self) -> FrameEntryIter<'data> {
        FrameEntryIter {
            section: *self,
            offset: 0,
            done: false,
        }
    }

    /// Parses the CIE at the given section offset.
    pub fn cie_at(&self, offset: usize) -> Result<Cie<'data>> {
        let mut reader = self.reader();
        reader.seek(offset)?;
        match self.parse_entry(&mut reader)? {
            Some(FrameEntry::Cie(cie)) => Ok(cie),
            _ => Err(Error::new(
                ErrorKind::InvalidHandle,
                format!("no CIE at offset {offset:#x}"),
            )),
        }
    }

    /// Finds the FDE covering the given program counter.
    ///
    /// A PC outside every FDE is a valid absence.
    pub fn fde_for_pc(&self, pc: u64) -> Result<Option<Fde<'data>>> {
        let mut entries = self.entries();
        while let Some(entry) = entries.next()? {
            if let FrameEntry::Fde(fde) = entry {
                if fde.contains(pc) {
                    return Ok(Some(fde));
                }
            }
        }
        Ok(None)
    }

    /// Computes the unwind row covering `pc`, or `None` when no FDE covers
    /// it.
    pub fn unwind_row_for_pc(&self, pc: u64) -> Result<Option<UnwindRow<'data>>> {
        match self.fde_for_pc(pc)? {
            Some(fde) => fde.unwind_row_for_pc(self, pc),
            None => Ok(None),
        }
    }

    fn parse_entry(&self, reader: &mut SectionReader<'data>) -> Result<Option<FrameEntry<'data>>> {
        let offset = reader.pos();
        let (length, format) = reader.read_initial_length()?;
        if length == 0 {
            // The .eh_frame terminator entry.
            return Ok(None);
        }

        let length = usize::try_from(length).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        let end = reader
            .pos()
            .checked_add(length)
            .filter(|&end| end <= reader.limit())
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

        let id_offset = reader.pos();
        let id = reader.read_offset(format)?;

        let is_cie = match self.kind {
            FrameKind::DebugFrame => match format {
                Format::Dwarf32 => id == 0xffff_ffff,
                Format::Dwarf64 => id == u64::MAX,
            },
            FrameKind::EhFrame => id == 0,
        };

        let entry = if is_cie {
            FrameEntry::Cie(self.parse_cie(reader, offset, format, end)?)
        } else {
            let cie_offset = match self.kind {
                FrameKind::DebugFrame => {
                    usize::try_from(id).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?
                }
                FrameKind::EhFrame => id_offset
                    .checked_sub(usize::try_from(id).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)
                    .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?,
            };
            let cie = self.cie_at(cie_offset)?;
            FrameEntry::Fde(self.parse_fde(reader, offset, cie, end)?)
        };

        reader.seek(end)?;
        Ok(Some(entry))
    }

    fn parse_cie(
        &self,
        reader: &mut SectionReader<'data>,
        offset: usize,
        format: Format,
        end: usize,
    ) -> Result<Cie<'data>> {
        let version = reader.read_u8()?;
        if !matches!(version, 1 | 3 | 4) {
            return Err(Error::new(
                ErrorKind::VersionUnsupported,
                format!("CIE version {version}"),
            ));
        }

        let augmentation_bytes = reader.read_null_terminated()?;
        let augmentation = std::str::from_utf8(augmentation_bytes)
            .map_err(|_| Error::new(ErrorKind::BadTypeSize, "augmentation is not UTF-8"))?;

        // The GCC "eh" augmentation prefixes a native-size pointer.
        if augmentation.starts_with("eh") {
            reader.skip(self.address_size as usize)?;
        }

        let (address_size, segment_selector_size) = if version == 4 {
            (reader.read_u8()?, reader.read_u8()?)
        } else {
            (self.address_size, 0)
        };

        let code_alignment_factor = reader.read_uleb128()?;
        let data_alignment_factor = reader.read_sleb128()?;
        let return_address_register = if version == 1 {
            u64::from(reader.read_u8()?)
        } else {
            reader.read_uleb128()?
        };

        let mut cie = Cie {
            offset,
            format,
            version,
            augmentation,
            address_size,
            segment_selector_size,
            code_alignment_factor,
            data_alignment_factor,
            return_address_register,
            fde_pointer_encoding: None,
            lsda_encoding: None,
            personality: None,
            signal_frame: false,
            has_augmentation_data: false,
            initial_instructions: &[],
        };

        let aug = augmentation.strip_prefix("eh").unwrap_or(augmentation);
        if let Some(letters) = aug.strip_prefix('z') {
            cie.has_augmentation_data = true;
            let aug_len = reader.read_uleb128()?;
            let aug_len = usize::try_from(aug_len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
            let mut aug_reader = reader.split(aug_len)?;

            for letter in letters.chars() {
                match letter {
                    'L' => cie.lsda_encoding = Some(aug_reader.read_u8()?),
                    'P' => {
                        let encoding = aug_reader.read_u8()?;
                        let personality =
                            self.read_encoded_pointer(&mut aug_reader, encoding)?;
                        cie.personality = Some(personality);
                    }
                    'R' => cie.fde_pointer_encoding = Some(aug_reader.read_u8()?),
                    'S' => cie.signal_frame = true,
                    // Unknown letters make the rest of the data opaque, but
                    // the length prefix still lets us skip it.
                    _ => break,
                }
            }
        } else if !aug.is_empty() {
            return Err(Error::new(
                ErrorKind::VersionUnsupported,
                format!("unknown augmentation {augmentation:?}"),
            ));
        }

        let remaining = end
            .checked_sub(reader.pos())
            .ok_or(ErrorKind::Truncated)?;
        cie.initial_instructions = reader.take(remaining)?;
        Ok(cie)
    }

    fn parse_fde(
        &self,
        reader: &mut SectionReader<'data>,
        offset: usize,
        cie: Cie<'data>,
        end: usize,
    ) -> Result<Fde<'data>> {
        if cie.segment_selector_size > 0 {
            reader.skip(cie.segment_selector_size as usize)?;
        }

        let (initial_location, address_range) = match self.kind {
            FrameKind::DebugFrame => (
                reader.read_address(cie.address_size)?,
                reader.read_address(cie.address_size)?,
            ),
            FrameKind::EhFrame => {
                let encoding = cie.fde_pointer_encoding.unwrap_or(DW_EH_PE_absptr);
                let location = self.read_encoded_pointer(reader, encoding)?;
                // The range is a plain value: only the format bits apply.
                let range =
                    self.read_encoded_pointer(reader, encoding & DW_EH_PE_format_mask)?;
                (location, range)
            }
        };

        let mut lsda = None;
        if cie.has_augmentation_data {
            let aug_len = reader.read_uleb128()?;
            let aug_len = usize::try_from(aug_len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
            let mut aug_reader = reader.split(aug_len)?;
            if let Some(encoding) = cie.lsda_encoding {
                lsda = Some(self.read_encoded_pointer(&mut aug_reader, encoding)?);
            }
        }

        let remaining = end
            .checked_sub(reader.pos())
            .ok_or(ErrorKind::Truncated)?;
        let instructions = reader.take(remaining)?;

        Ok(Fde {
            offset,
            cie,
            initial_location,
            address_range,
            lsda,
            instructions,
        })
    }

    /// Reads a pointer with a `DW_EH_PE_*` encoding.
    ///
    /// The indirect bit is ignored: a file reader cannot chase pointers in
    /// target memory, so the stored value is surfaced as-is.
    fn read_encoded_pointer(
        &self,
        reader: &mut SectionReader<'data>,
        encoding: u8,
    ) -> Result<u64> {
        if encoding == DW_EH_PE_omit {
            return Ok(0);
        }

        let value_pos = reader.pos() as u64;
        let value = match encoding & DW_EH_PE_format_mask {
            DW_EH_PE_absptr => reader.read_address(self.address_size)?,
            DW_EH_PE_uleb128 => reader.read_uleb128()?,
            DW_EH_PE_udata2 => u64::from(reader.read_u16()?),
            DW_EH_PE_udata4 => u64::from(reader.read_u32()?),
            DW_EH_PE_udata8 => reader.read_u64()?,
            DW_EH_PE_sleb128 => reader.read_sleb128()? as u64,
            DW_EH_PE_sdata2 => reader.read_u16()? as i16 as i64 as u64,
            DW_EH_PE_sdata4 => reader.read_u32()? as i32 as i64 as u64,
            DW_EH_PE_sdata8 => reader.read_u64()?,
            other => {
                return Err(Error::new(
                    ErrorKind::UnknownOpcode,
                    format!("pointer encoding {other:#x}"),
                ))
            }
        };

        match encoding & DW_EH_PE_application_mask {
            0 => Ok(value),
            DW_EH_PE_pcrel => Ok(self
                .section_address
                .wrapping_add(value_pos)
                .wrapping_add(value)),
            DW_EH_PE_datarel => Ok(self.section_address.wrapping_add(value)),
            other => Err(Error::new(
                ErrorKind::UnknownOpcode,
                format!("pointer application {other:#x}"),
            )),
        }
    }
}

/// Either entry kind of a frame section.
#[derive(Clone, Debug)]
pub enum FrameEntry<'data> {
    /// A common information entry.
    Cie(Cie<'data>),
    /// A frame description entry, with its CIE resolved.
    Fde(Fde<'data>),
}

/// An iterator over the entries of a frame section.
pub struct FrameEntryIter<'data> {
    section: FrameSection<'data>,
    offset: usize,
    done: bool,
}

impl<'data> FallibleIterator for FrameEntryIter<'data> {
    type Item = FrameEntry<'data>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<FrameEntry<'data>>> {
        if self.done || self.offset >= self.section.data.len() {
            return Ok(None);
        }

        let mut reader = self.section.reader();
        reader.seek(self.offset)?;
        match self.section.parse_entry(&mut reader) {
            Ok(Some(entry)) => {
                self.offset = reader.pos();
                Ok(Some(entry))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}

/// A common information entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cie<'data> {
    /// Section offset of this CIE.
    pub offset: usize,
    /// Offset format of this entry.
    pub format: Format,
    /// CIE version: 1 (DWARF 2 / eh_frame), 3 or 4.
    pub version: u8,
    /// The augmentation string.
    pub augmentation: &'data str,
    /// Target address size for this CIE's FDEs.
    pub address_size: u8,
    /// Segment selector size (version 4).
    pub segment_selector_size: u8,
    /// Factor applied to advance-location deltas.
    pub code_alignment_factor: u64,
    /// Factor applied to offset operands.
    pub data_alignment_factor: i64,
    /// The column holding the return address.
    pub return_address_register: u64,
    /// Encoding of FDE location fields (`z...R`).
    pub fde_pointer_encoding: Option<u8>,
    /// Encoding of the LSDA pointer in FDEs (`z...L`).
    pub lsda_encoding: Option<u8>,
    /// The personality routine pointer (`z...P`).
    pub personality: Option<u64>,
    /// Whether FDEs of this CIE describe signal frames (`z...S`).
    pub signal_frame: bool,
    /// Whether FDEs of this CIE carry augmentation data (`z`).
    pub has_augmentation_data: bool,
    /// The instructions establishing the initial row.
    pub initial_instructions: &'data [u8],
}

impl<'data> Cie<'data> {
    /// Iterates the initial instructions of this CIE.
    pub fn instructions(&self, section: &FrameSection<'data>) -> InstructionIter<'data> {
        InstructionIter {
            reader: SectionReader::new(self.initial_instructions, section.endian),
            cie: self.clone(),
            section: *section,
        }
    }
}

/// A frame description entry, with its CIE already resolved.
#[derive(Clone, Debug)]
pub struct Fde<'data> {
    /// Section offset of this FDE.
    pub offset: usize,
    /// The CIE this FDE refers to.
    pub cie: Cie<'data>,
    /// First address covered.
    pub initial_location: u64,
    /// Number of bytes covered.
    pub address_range: u64,
    /// The language-specific data area pointer, if any.
    pub lsda: Option<u64>,
    /// The FDE's instruction stream.
    pub instructions: &'data [u8],
}

impl<'data> Fde<'data> {
    /// Whether this FDE covers the given PC.
    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.initial_location
            && pc - self.initial_location < self.address_range
    }

    /// One past the last address covered.
    pub fn end_location(&self) -> u64 {
        self.initial_location.wrapping_add(self.address_range)
    }

    /// Iterates this FDE's instructions.
    pub fn instructions(&self, section: &FrameSection<'data>) -> InstructionIter<'data> {
        InstructionIter {
            reader: SectionReader::new(self.instructions, section.endian),
            cie: self.cie.clone(),
            section: *section,
        }
    }

    /// Builds the unwind row covering `pc`.
    ///
    /// Runs the CIE's initial instructions, then this FDE's instructions
    /// until the current location advances past `pc`.
    pub fn unwind_row_for_pc(
        &self,
        section: &FrameSection<'data>,
        pc: u64,
    ) -> Result<Option<UnwindRow<'data>>> {
        if !self.contains(pc) {
            return Ok(None);
        }

        let mut row = UnwindRow {
            start_address: self.initial_location,
            end_address: self.end_location(),
            cfa: CfaRule::Undefined,
            registers: SmallVec::new(),
        };

        let mut initial = self.cie.instructions(section);
        while let Some(instruction) = initial.next()? {
            // Location advances make no sense in initial instructions and
            // are ignored if present.
            apply_rule_change(&mut row, &instruction, &[], &mut Vec::new());
        }
        let initial_registers = row.registers.clone();
        let mut state_stack = Vec::new();

        let mut loc = self.initial_location;
        let mut instructions = self.instructions(section);
        while let Some(instruction) = instructions.next()? {
            match instruction {
                CallFrameInstruction::AdvanceLoc { delta } => {
                    let next = loc.wrapping_add(delta);
                    if next > pc {
                        row.start_address = loc;
                        row.end_address = next.min(self.end_location());
                        return Ok(Some(row));
                    }
                    loc = next;
                }
                CallFrameInstruction::SetLoc { address } => {
                    if address > pc {
                        row.start_address = loc;
                        row.end_address = address.min(self.end_location());
                        return Ok(Some(row));
                    }
                    loc = address;
                }
                other => {
                    apply_rule_change(&mut row, &other, &initial_registers, &mut state_stack)
                }
            }
        }

        row.start_address = loc;
        row.end_address = self.end_location();
        Ok(Some(row))
    }
}

/// The rule computing the canonical frame address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CfaRule<'data> {
    /// No rule has been established.
    Undefined,
    /// CFA = register + offset.
    RegisterAndOffset {
        /// The base register.
        register: u64,
        /// The signed offset added to it.
        offset: i64,
    },
    /// CFA is the value of a DWARF expression.
    Expression(&'data [u8]),
}

/// The rule recovering one register's value in the previous frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegisterRule<'data> {
    /// The register's value is not recoverable.
    #[default]
    Undefined,
    /// The register was not modified.
    SameValue,
    /// Saved at CFA + offset.
    Offset(i64),
    /// The previous value is CFA + offset itself.
    ValOffset(i64),
    /// Stored in another register.
    Register(u64),
    /// Saved at the address an expression evaluates to.
    Expression(&'data [u8]),
    /// The previous value is what an expression evaluates to.
    ValExpression(&'data [u8]),
    /// Defined by the augmenter, outside the standard.
    Architectural,
}

/// One row of the virtual unwind table.
#[derive(Clone, Debug)]
pub struct UnwindRow<'data> {
    /// First PC this row applies to.
    pub start_address: u64,
    /// One past the last PC this row applies to.
    pub end_address: u64,
    /// The CFA computation rule.
    pub cfa: CfaRule<'data>,
    registers: SmallVec<[(u64, RegisterRule<'data>); 8]>,
}

impl<'data> UnwindRow<'data> {
    /// The rule for one register; unmentioned registers are undefined.
    pub fn register(&self, register: u64) -> RegisterRule<'data> {
        self.registers
            .iter()
            .find(|(reg, _)| *reg == register)
            .map(|(_, rule)| *rule)
            .unwrap_or_default()
    }

    /// All registers with explicit rules, in first-mention order.
    pub fn registers(&self) -> impl Iterator<Item = (u64, RegisterRule<'data>)> + '_ {
        self.registers.iter().copied()
    }

    fn set_register(&mut self, register: u64, rule: RegisterRule<'data>) {
        match self.registers.iter_mut().find(|(reg, _)| *reg == register) {
            Some(slot) => slot.1 = rule,
            None => self.registers.push((register, rule)),
        }
    }
}

type SavedState<'data> = (CfaRule<'data>, SmallVec<[(u64, RegisterRule<'data>); 8]>);

fn apply_rule_change<'data>(
    row: &mut UnwindRow<'data>,
    instruction: &CallFrameInstruction<'data>,
    initial_registers: &[(u64, RegisterRule<'data>)],
    state_stack: &mut Vec<SavedState<'data>>,
) {
    use CallFrameInstruction::*;

    match *instruction {
        Nop | AdvanceLoc { .. } | SetLoc { .. } => {}

        Offset { register, offset } => row.set_register(register, RegisterRule::Offset(offset)),
        ValOffset { register, offset } => {
            row.set_register(register, RegisterRule::ValOffset(offset))
        }
        Restore { register } => {
            let rule = initial_registers
                .iter()
                .find(|(reg, _)| *reg == register)
                .map(|(_, rule)| *rule)
                .unwrap_or_default();
            row.set_register(register, rule);
        }
        Undefined { register } => row.set_register(register, RegisterRule::Undefined),
        SameValue { register } => row.set_register(register, RegisterRule::SameValue),
        Register { dest, src } => row.set_register(dest, RegisterRule::Register(src)),
        Expression { register, expression } => {
            row.set_register(register, RegisterRule::Expression(expression))
        }
        ValExpression { register, expression } => {
            row.set_register(register, RegisterRule::ValExpression(expression))
        }

        RememberState => state_stack.push((row.cfa, row.registers.clone())),
        RestoreState => {
            if let Some((cfa, registers)) = state_stack.pop() {
                row.cfa = cfa;
                row.registers = registers;
            }
        }

        DefCfa { register, offset } => {
            row.cfa = CfaRule::RegisterAndOffset { register, offset }
        }
        DefCfaRegister { register } => {
            let offset = match row.cfa {
                CfaRule::RegisterAndOffset { offset, .. } => offset,
                _ => 0,
            };
            row.cfa = CfaRule::RegisterAndOffset { register, offset };
        }
        DefCfaOffset { offset } => {
            if let CfaRule::RegisterAndOffset { register, .. } = row.cfa {
                row.cfa = CfaRule::RegisterAndOffset { register, offset };
            }
        }
        DefCfaExpression { expression } => row.cfa = CfaRule::Expression(expression),

        // SPARC register-window save; the affected columns are defined by
        // the architecture, not by operands.
        GnuWindowSave => {
            for register in 16..32 {
                row.set_register(register, RegisterRule::Architectural);
            }
        }
        GnuArgsSize { .. } => {}
    }
}

/// A fully decoded call frame instruction.
///
/// Offsets are factored: `data_alignment_factor` and
/// `code_alignment_factor` have already been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallFrameInstruction<'data> {
    /// Advance the current location by a factored delta.
    AdvanceLoc {
        /// The delta in bytes.
        delta: u64,
    },
    /// Set the current location to an absolute address.
    SetLoc {
        /// The new location.
        address: u64,
    },
    /// Register saved at CFA + offset.
    Offset {
        /// The register column.
        register: u64,
        /// The factored byte offset.
        offset: i64,
    },
    /// Register's previous value is CFA + offset.
    ValOffset {
        /// The register column.
        register: u64,
        /// The factored byte offset.
        offset: i64,
    },
    /// Restore a register to its CIE-initial rule.
    Restore {
        /// The register column.
        register: u64,
    },
    /// The register's value is unrecoverable.
    Undefined {
        /// The register column.
        register: u64,
    },
    /// The register is unchanged.
    SameValue {
        /// The register column.
        register: u64,
    },
    /// The register is stored in another register.
    Register {
        /// The register column being described.
        dest: u64,
        /// The register holding its previous value.
        src: u64,
    },
    /// Register saved at the address of an expression.
    Expression {
        /// The register column.
        register: u64,
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// Register's previous value is an expression's value.
    ValExpression {
        /// The register column.
        register: u64,
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// Push the current row state.
    RememberState,
    /// Pop the last remembered row state.
    RestoreState,
    /// CFA = register + offset.
    DefCfa {
        /// The base register.
        register: u64,
        /// The unfactored (or factored, for `_sf`) offset.
        offset: i64,
    },
    /// Change only the CFA base register.
    DefCfaRegister {
        /// The base register.
        register: u64,
    },
    /// Change only the CFA offset.
    DefCfaOffset {
        /// The offset.
        offset: i64,
    },
    /// CFA is computed by an expression.
    DefCfaExpression {
        /// The DWARF expression.
        expression: &'data [u8],
    },
    /// SPARC register-window save.
    GnuWindowSave,
    /// Argument area size at the current location.
    GnuArgsSize {
        /// The size in bytes.
        size: u64,
    },
    /// No operation (also used for padding).
    Nop,
}

/// An iterator decoding a CIE's or FDE's instruction stream.
pub struct InstructionIter<'data> {
    reader: SectionReader<'data>,
    cie: Cie<'data>,
    section: FrameSection<'data>,
}

impl<'data> InstructionIter<'data> {
    fn factored_data(&self, value: i64) -> i64 {
        value.wrapping_mul(self.cie.data_alignment_factor)
    }

    fn factored_code(&self, value: u64) -> u64 {
        value.wrapping_mul(self.cie.code_alignment_factor)
    }

    fn parse(&mut self) -> Result<CallFrameInstruction<'data>> {
        use CallFrameInstruction as I;

        let opcode = self.reader.read_u8()?;
        let primary = opcode & 0xc0;
        let operand = u64::from(opcode & 0x3f);

        let instruction = match primary {
            0x40 => I::AdvanceLoc {
                delta: self.factored_code(operand),
            },
            0x80 => {
                let offset = self.reader.read_uleb128()?;
                I::Offset {
                    register: operand,
                    offset: self.factored_data(offset as i64),
                }
            }
            0xc0 => I::Restore { register: operand },
            _ => match DwCfa(opcode) {
                DW_CFA_nop => I::Nop,
                DW_CFA_set_loc => {
                    let address = match self.section.kind {
                        FrameKind::DebugFrame => {
                            self.reader.read_address(self.cie.address_size)?
                        }
                        FrameKind::EhFrame => {
                            let encoding =
                                self.cie.fde_pointer_encoding.unwrap_or(DW_EH_PE_absptr);
                            self.section.read_encoded_pointer(&mut self.reader, encoding)?
                        }
                    };
                    I::SetLoc { address }
                }
                DW_CFA_advance_loc1 => {
                    let delta = u64::from(self.reader.read_u8()?);
                    I::AdvanceLoc {
                        delta: self.factored_code(delta),
                    }
                }
                DW_CFA_advance_loc2 => {
                    let delta = u64::from(self.reader.read_u16()?);
                    I::AdvanceLoc {
                        delta: self.factored_code(delta),
                    }
                }
                DW_CFA_advance_loc4 => {
                    let delta = u64::from(self.reader.read_u32()?);
                    I::AdvanceLoc {
                        delta: self.factored_code(delta),
                    }
                }
                DW_CFA_MIPS_advance_loc8 => {
                    let delta = self.reader.read_u64()?;
                    I::AdvanceLoc {
                        delta: self.factored_code(delta),
                    }
                }
                DW_CFA_offset_extended => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_uleb128()?;
                    I::Offset {
                        register,
                        offset: self.factored_data(offset as i64),
                    }
                }
                DW_CFA_offset_extended_sf => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_sleb128()?;
                    I::Offset {
                        register,
                        offset: self.factored_data(offset),
                    }
                }
                DW_CFA_GNU_negative_offset_extended => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_uleb128()?;
                    I::Offset {
                        register,
                        offset: -self.factored_data(offset as i64),
                    }
                }
                DW_CFA_val_offset => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_uleb128()?;
                    I::ValOffset {
                        register,
                        offset: self.factored_data(offset as i64),
                    }
                }
                DW_CFA_val_offset_sf => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_sleb128()?;
                    I::ValOffset {
                        register,
                        offset: self.factored_data(offset),
                    }
                }
                DW_CFA_restore_extended => I::Restore {
                    register: self.reader.read_uleb128()?,
                },
                DW_CFA_undefined => I::Undefined {
                    register: self.reader.read_uleb128()?,
                },
                DW_CFA_same_value => I::SameValue {
                    register: self.reader.read_uleb128()?,
                },
                DW_CFA_register => I::Register {
                    dest: self.reader.read_uleb128()?,
                    src: self.reader.read_uleb128()?,
                },
                DW_CFA_remember_state => I::RememberState,
                DW_CFA_restore_state => I::RestoreState,
                DW_CFA_def_cfa => I::DefCfa {
                    register: self.reader.read_uleb128()?,
                    offset: self.reader.read_uleb128()? as i64,
                },
                DW_CFA_def_cfa_sf => {
                    let register = self.reader.read_uleb128()?;
                    let offset = self.reader.read_sleb128()?;
                    I::DefCfa {
                        register,
                        offset: self.factored_data(offset),
                    }
                }
                DW_CFA_def_cfa_register => I::DefCfaRegister {
                    register: self.reader.read_uleb128()?,
                },
                DW_CFA_def_cfa_offset => I::DefCfaOffset {
                    offset: self.reader.read_uleb128()? as i64,
                },
                DW_CFA_def_cfa_offset_sf => {
                    let offset = self.reader.read_sleb128()?;
                    I::DefCfaOffset {
                        offset: self.factored_data(offset),
                    }
                }
                DW_CFA_def_cfa_expression => {
                    let len = self.reader.read_uleb128()?;
                    let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
                    I::DefCfaExpression {
                        expression: self.reader.take(len)?,
                    }
                }
                DW_CFA_expression => {
                    let register = self.reader.read_uleb128()?;
                    let len = self.reader.read_uleb128()?;
                    let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
                    I::Expression {
                        register,
                        expression: self.reader.take(len)?,
                    }
                }
                DW_CFA_val_expression => {
                    let register = self.reader.read_uleb128()?;
                    let len = self.reader.read_uleb128()?;
                    let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
                    I::ValExpression {
                        register,
                        expression: self.reader.take(len)?,
                    }
                }
                DW_CFA_GNU_window_save => I::GnuWindowSave,
                DW_CFA_GNU_args_size => I::GnuArgsSize {
                    size: self.reader.read_uleb128()?,
                },
                unknown => {
                    return Err(Error::new(
                        ErrorKind::UnknownOpcode,
                        format!("{unknown}"),
                    ))
                }
            },
        };

        Ok(instruction)
    }
}

impl<'data> FallibleIterator for InstructionIter<'data> {
    type Item = CallFrameInstruction<'data>;
    type Error = Error;

    fn next(&mut self) -> Result<Option<CallFrameInstruction<'data>>> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        self.parse().map(Some)
    }
}
