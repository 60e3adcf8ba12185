//! The line number program: header, state machine, and row emission.
//!
//! A `.debug_line` contribution is a header describing directories, files
//! and opcode shapes, followed by a bytecode program. Running the program
//! produces the line matrix: ordered rows of (address, file, line, column,
//! flags). Rows are emitted in program order; sequences within a
//! contribution are not guaranteed to be sorted by address, so a sorted
//! sequence view is offered separately.

use fallible_iterator::FallibleIterator;

use crate::abbrev::AttributeSpec;
use crate::attr::{self, AttrValue, Encoding};
use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::reader::{string_at, Format, SectionReader};

/// The experimental two-level line table version marker.
///
/// Headers with this version are decoded structurally, but the semantics of
/// their logicals/actuals split are not interpreted; rows come from running
/// the standard state machine over the program bytes.
pub const EXPERIMENTAL_TWO_LEVEL_VERSION: u16 = 0xf006;

/// String sections a line program header may reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineStrings<'data> {
    /// `.debug_str`, for `DW_FORM_strp` paths.
    pub debug_str: Option<&'data [u8]>,
    /// `.debug_line_str`, for `DW_FORM_line_strp` paths.
    pub debug_line_str: Option<&'data [u8]>,
    /// `.debug_str_offsets`, for `DW_FORM_strx*` paths.
    pub debug_str_offsets: Option<&'data [u8]>,
    /// The unit's `DW_AT_str_offsets_base`.
    pub str_offsets_base: Option<u64>,
    /// Byte order of the offsets section.
    pub endian: runic_common::Endian,
}

/// A path string in a line program header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineString<'data> {
    /// The resolved bytes of the path.
    Bytes(&'data [u8]),
    /// An unresolved `strx` index; the string offsets base was missing.
    StrIndex(u64),
}

impl<'data> LineString<'data> {
    /// The path bytes, if resolved.
    pub fn bytes(&self) -> Option<&'data [u8]> {
        match *self {
            LineString::Bytes(bytes) => Some(bytes),
            LineString::StrIndex(_) => None,
        }
    }
}

/// One file entry in a line program header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileEntry<'data> {
    /// The file's path.
    pub path: LineString<'data>,
    /// Index of the directory the path is relative to.
    pub directory_index: u64,
    /// Modification timestamp, or 0.
    pub timestamp: u64,
    /// File size in bytes, or 0.
    pub size: u64,
    /// The MD5 digest of the file contents (DWARF 5 with `DW_LNCT_MD5`).
    pub md5: Option<[u8; 16]>,
}

/// A parsed line program header.
#[derive(Clone, Debug)]
pub struct LineProgramHeader<'data> {
    /// Section offset of this contribution.
    pub offset: usize,
    /// The version of the line number information.
    pub version: u16,
    /// The offset format of this contribution.
    pub format: Format,
    /// Target address size; from the header in v5, supplied by the unit
    /// before that.
    pub address_size: u8,
    /// Segment selector size (v5).
    pub segment_selector_size: u8,
    /// Size of the smallest target instruction.
    pub minimum_instruction_length: u8,
    /// Maximum operations per instruction (VLIW); 1 elsewhere.
    pub maximum_operations_per_instruction: u8,
    /// Initial value of the `is_stmt` register.
    pub default_is_stmt: bool,
    /// Parameter of the special opcode line advance.
    pub line_base: i8,
    /// Parameter of the special opcode line advance.
    pub line_range: u8,
    /// The first special opcode number.
    pub opcode_base: u8,
    /// Operand counts for standard opcodes 1..opcode_base.
    pub standard_opcode_lengths: Vec<u8>,
    /// The include directory table.
    pub include_directories: Vec<LineString<'data>>,
    /// The file name table.
    pub file_names: Vec<FileEntry<'data>>,
    /// Whether this header used the experimental two-level version.
    pub experimental: bool,
    program_offset: usize,
    end_offset: usize,
}

impl<'data> LineProgramHeader<'data> {
    /// The first valid file index: 0 in DWARF 5, 1 before.
    pub fn base_index(&self) -> u64 {
        if self.version >= 5 && !self.experimental {
            0
        } else {
            1
        }
    }

    /// One past the last valid file index in the header's table.
    pub fn end_index(&self) -> u64 {
        self.base_index() + self.file_names.len() as u64
    }

    /// Looks up a file entry by its program-visible index.
    pub fn file(&self, index: u64) -> Option<&FileEntry<'data>> {
        let slot = index.checked_sub(self.base_index())?;
        self.file_names.get(usize::try_from(slot).ok()?)
    }

    /// Looks up an include directory by index.
    ///
    /// Directory 0 is the compilation directory; before DWARF 5 it is
    /// implicit and this returns `None` for it.
    pub fn directory(&self, index: u64) -> Option<&LineString<'data>> {
        let index = usize::try_from(index).ok()?;
        if self.version >= 5 && !self.experimental {
            self.include_directories.get(index)
        } else {
            index
                .checked_sub(1)
                .and_then(|idx| self.include_directories.get(idx))
        }
    }

    /// Whether this header used the experimental two-level format.
    pub fn is_experimental(&self) -> bool {
        self.experimental
    }
}

/// One row of the line matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRow {
    /// The program counter of this row.
    pub address: u64,
    /// The VLIW operation index within the instruction at `address`.
    pub op_index: u64,
    /// The file index, interpreted against the header's file table.
    pub file: u64,
    /// The source line, 0 when unknown.
    pub line: u64,
    /// The source column, 0 when unknown.
    pub column: u64,
    /// Whether this is a recommended breakpoint location.
    pub is_stmt: bool,
    /// Whether this is the start of a basic block.
    pub basic_block: bool,
    /// Whether this row ends a sequence; its address is one past the last
    /// instruction.
    pub end_sequence: bool,
    /// Whether execution should stop here when entering the function.
    pub prologue_end: bool,
    /// Whether execution should stop here when leaving the function.
    pub epilogue_begin: bool,
    /// The instruction set architecture register.
    pub isa: u64,
    /// Distinguishes multiple blocks on the same source line.
    pub discriminator: u64,
}

impl LineRow {
    fn initial(header: &LineProgramHeader<'_>) -> Self {
        LineRow {
            address: 0,
            op_index: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: header.default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

/// A complete line program: header plus executable program bytes.
#[derive(Clone, Debug)]
pub struct LineProgram<'data> {
    header: LineProgramHeader<'data>,
    program: SectionReader<'data>,
}

impl<'data> LineProgram<'data> {
    /// Parses the contribution at `reader`'s position.
    ///
    /// `address_size_hint` supplies the unit's address size for versions
    /// before 5, which do not encode it in the header.
    pub fn parse(
        reader: &mut SectionReader<'data>,
        address_size_hint: u8,
        strings: &LineStrings<'data>,
    ) -> Result<LineProgram<'data>> {
        let offset = reader.pos();
        let (unit_length, format) = reader.read_initial_length()?;
        let length = usize::try_from(unit_length).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        let end_offset = reader
            .pos()
            .checked_add(length)
            .filter(|&end| end <= reader.limit())
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

        let raw_version = reader.read_u16()?;
        let experimental = raw_version == EXPERIMENTAL_TWO_LEVEL_VERSION;
        let version = if experimental { 4 } else { raw_version };
        if !(2..=5).contains(&version) {
            return Err(Error::new(
                ErrorKind::VersionUnsupported,
                format!("line table version {raw_version:#x}"),
            ));
        }

        let (address_size, segment_selector_size) = if version >= 5 {
            (reader.read_u8()?, reader.read_u8()?)
        } else {
            (address_size_hint, 0)
        };

        let header_length = reader.read_offset(format)?;
        let header_len = usize::try_from(header_length).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        let program_offset = reader
            .pos()
            .checked_add(header_len)
            .filter(|&off| off <= end_offset)
            .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;

        let minimum_instruction_length = reader.read_u8()?;
        let maximum_operations_per_instruction = if version >= 4 || experimental {
            reader.read_u8()?
        } else {
            1
        };
        let default_is_stmt = reader.read_u8()? != 0;
        let line_base = reader.read_i8()?;
        let line_range = reader.read_u8()?;
        let opcode_base = reader.read_u8()?;

        if line_range == 0 || minimum_instruction_length == 0 {
            return Err(Error::new(
                ErrorKind::BadTypeSize,
                "line_range and minimum_instruction_length must be non-zero",
            ));
        }

        let mut standard_opcode_lengths = Vec::with_capacity(opcode_base.saturating_sub(1) as usize);
        for _ in 1..opcode_base {
            standard_opcode_lengths.push(reader.read_u8()?);
        }

        let encoding = Encoding {
            version,
            format,
            address_size,
        };

        let (include_directories, file_names) = if version >= 5 {
            let dirs = parse_v5_directories(reader, encoding, strings)?;
            let files = parse_v5_files(reader, encoding, strings)?;
            (dirs, files)
        } else {
            parse_legacy_tables(reader)?
        };

        let header = LineProgramHeader {
            offset,
            version,
            format,
            address_size,
            segment_selector_size,
            minimum_instruction_length,
            maximum_operations_per_instruction: maximum_operations_per_instruction.max(1),
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
            include_directories,
            file_names,
            experimental,
            program_offset,
            end_offset,
        };

        let mut program = *reader;
        program.seek(program_offset)?;
        program.clamp(end_offset)?;

        // Position the caller's reader at the next contribution.
        reader.seek(end_offset)?;

        Ok(LineProgram { header, program })
    }

    /// The parsed header.
    pub fn header(&self) -> &LineProgramHeader<'data> {
        &self.header
    }

    /// Runs the program, yielding rows in program order.
    pub fn rows(&self) -> LineRows<'_, 'data> {
        LineRows {
            header: &self.header,
            reader: self.program,
            row: LineRow::initial(&self.header),
            defined_files: Vec::new(),
            done: false,
        }
    }

    /// Runs the program and groups its rows into address-sorted sequences.
    pub fn sequences(&self) -> Result<Vec<LineSequence>> {
        let mut sequences = Vec::new();
        let mut current: Vec<LineRow> = Vec::new();

        let mut rows = self.rows();
        while let Some(row) = rows.next()? {
            current.push(row);
            if row.end_sequence {
                sequences.push(LineSequence {
                    start: current.first().map(|r| r.address).unwrap_or(0),
                    end: row.address,
                    rows: std::mem::take(&mut current),
                });
            }
        }

        // An unterminated tail sequence still gets reported.
        if let Some(last) = current.last() {
            sequences.push(LineSequence {
                start: current[0].address,
                end: last.address,
                rows: current,
            });
        }

        dmsort::sort_by_key(&mut sequences, |seq| seq.start);
        Ok(sequences)
    }
}

/// A run of rows between a sequence start and its `end_sequence` row.
#[derive(Clone, Debug)]
pub struct LineSequence {
    /// Address of the first row.
    pub start: u64,
    /// Address one past the last instruction of the sequence.
    pub end: u64,
    /// The rows of the sequence, in emission order.
    pub rows: Vec<LineRow>,
}

fn resolve_line_string<'data>(
    value: AttrValue<'data>,
    strings: &LineStrings<'data>,
    format: Format,
) -> Result<LineString<'data>> {
    let resolved = match value {
        AttrValue::String(bytes) => LineString::Bytes(bytes),
        AttrValue::Strp(offset) => {
            let data = strings.debug_str.ok_or(ErrorKind::Truncated)?;
            LineString::Bytes(string_at(data, offset)?)
        }
        AttrValue::LineStrp(offset) => {
            let data = strings.debug_line_str.ok_or(ErrorKind::Truncated)?;
            LineString::Bytes(string_at(data, offset)?)
        }
        AttrValue::StrIndex(index) => {
            match (strings.debug_str_offsets, strings.str_offsets_base) {
                (Some(offsets), Some(base)) => {
                    let mut reader = SectionReader::new(offsets, strings.endian);
                    return resolve_strx(&mut reader, strings, base, index, format);
                }
                _ => LineString::StrIndex(index),
            }
        }
        _ => return Err(ErrorKind::UnknownForm.into()),
    };
    Ok(resolved)
}

// Only reached when both the offsets section and its base are known.
fn resolve_strx<'data>(
    reader: &mut SectionReader<'data>,
    strings: &LineStrings<'data>,
    base: u64,
    index: u64,
    format: Format,
) -> Result<LineString<'data>> {
    let word = u64::from(format.word_size());
    let pos = base
        .checked_add(index.checked_mul(word).ok_or(ErrorKind::SectionSizeOrOffsetLarge)?)
        .ok_or(ErrorKind::SectionSizeOrOffsetLarge)?;
    reader.seek(usize::try_from(pos).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?)?;
    let str_offset = reader.read_offset(format)?;
    let data = strings.debug_str.ok_or(ErrorKind::Truncated)?;
    Ok(LineString::Bytes(string_at(data, str_offset)?))
}

/// Parses the DWARF 5 directory table, keeping only the paths.
fn parse_v5_directories<'data>(
    reader: &mut SectionReader<'data>,
    encoding: Encoding,
    strings: &LineStrings<'data>,
) -> Result<Vec<LineString<'data>>> {
    let formats = parse_entry_formats(reader)?;
    let count = reader.read_uleb128()?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let mut path = None;
        for &(content, form) in &formats {
            let value = read_entry_value(reader, form, encoding)?;
            if content == DW_LNCT_path {
                path = Some(resolve_line_string(value, strings, encoding.format)?);
            }
        }
        entries.push(path.ok_or_else(|| {
            Error::new(ErrorKind::UnknownForm, "entry format without DW_LNCT_path")
        })?);
    }
    Ok(entries)
}

/// Parses the DWARF 5 file table with all content types.
fn parse_v5_files<'data>(
    reader: &mut SectionReader<'data>,
    encoding: Encoding,
    strings: &LineStrings<'data>,
) -> Result<Vec<FileEntry<'data>>> {
    let formats = parse_entry_formats(reader)?;
    let count = reader.read_uleb128()?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let mut entry = FileEntry {
            path: LineString::Bytes(b""),
            directory_index: 0,
            timestamp: 0,
            size: 0,
            md5: None,
        };
        for &(content, form) in &formats {
            let value = read_entry_value(reader, form, encoding)?;
            match content {
                DW_LNCT_path => {
                    entry.path = resolve_line_string(value, strings, encoding.format)?;
                }
                DW_LNCT_directory_index => {
                    entry.directory_index = value.udata().unwrap_or(0);
                }
                DW_LNCT_timestamp => entry.timestamp = value.udata().unwrap_or(0),
                DW_LNCT_size => entry.size = value.udata().unwrap_or(0),
                DW_LNCT_MD5 => {
                    if let AttrValue::Block(block) = value {
                        entry.md5 = block.try_into().ok();
                    }
                }
                _ => {} // vendor content types carry no meaning here
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_entry_formats(reader: &mut SectionReader<'_>) -> Result<Vec<(DwLnct, DwForm)>> {
    let count = reader.read_u8()?;
    let mut formats = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let content = reader.read_uleb128()?;
        let content = u16::try_from(content)
            .map(DwLnct)
            .map_err(|_| ErrorKind::UnknownForm)?;
        let form = reader.read_uleb128()?;
        let form = u16::try_from(form)
            .map(DwForm)
            .map_err(|_| ErrorKind::UnknownForm)?;
        formats.push((content, form));
    }
    Ok(formats)
}

fn read_entry_value<'data>(
    reader: &mut SectionReader<'data>,
    form: DwForm,
    encoding: Encoding,
) -> Result<AttrValue<'data>> {
    let spec = AttributeSpec {
        at: DW_AT_name,
        form,
        implicit_const: None,
    };
    attr::read_value(reader, spec, encoding)
}

/// Parses the pre-DWARF-5 directory and file tables.
#[allow(clippy::type_complexity)]
fn parse_legacy_tables<'data>(
    reader: &mut SectionReader<'data>,
) -> Result<(Vec<LineString<'data>>, Vec<FileEntry<'data>>)> {
    let mut directories = Vec::new();
    loop {
        let name = reader.read_null_terminated()?;
        if name.is_empty() {
            break;
        }
        directories.push(LineString::Bytes(name));
    }

    let mut files = Vec::new();
    loop {
        let name = reader.read_null_terminated()?;
        if name.is_empty() {
            break;
        }
        let directory_index = reader.read_uleb128()?;
        let timestamp = reader.read_uleb128()?;
        let size = reader.read_uleb128()?;
        files.push(FileEntry {
            path: LineString::Bytes(name),
            directory_index,
            timestamp,
            size,
            md5: None,
        });
    }

    Ok((directories, files))
}

/// The executing state machine, yielding one row per matrix entry.
pub struct LineRows<'h, 'data> {
    header: &'h LineProgramHeader<'data>,
    reader: SectionReader<'data>,
    row: LineRow,
    defined_files: Vec<FileEntry<'data>>,
    done: bool,
}

impl<'h, 'data> LineRows<'h, 'data> {
    /// Files added by `DW_LNE_define_file` during execution so far.
    pub fn defined_files(&self) -> &[FileEntry<'data>] {
        &self.defined_files
    }

    /// Looks up a file index against the header table and any files the
    /// program defined on the fly.
    pub fn file(&self, index: u64) -> Option<&FileEntry<'data>> {
        self.header.file(index).or_else(|| {
            let past_header = index.checked_sub(self.header.end_index())?;
            self.defined_files.get(usize::try_from(past_header).ok()?)
        })
    }

    fn advance_operation(&mut self, operation_advance: u64) {
        let max_ops = u64::from(self.header.maximum_operations_per_instruction);
        let min_len = u64::from(self.header.minimum_instruction_length);
        let total = self.row.op_index + operation_advance;
        self.row.address = self.row.address.wrapping_add(min_len * (total / max_ops));
        self.row.op_index = total % max_ops;
    }

    fn advance_line(&mut self, delta: i64) {
        self.row.line = self.row.line.wrapping_add(delta as u64);
    }

    fn emit(&mut self) -> LineRow {
        let emitted = self.row;
        self.row.basic_block = false;
        self.row.prologue_end = false;
        self.row.epilogue_begin = false;
        self.row.discriminator = 0;
        emitted
    }

    fn execute_special(&mut self, opcode: u8) -> LineRow {
        let adjusted = u64::from(opcode - self.header.opcode_base);
        let line_range = u64::from(self.header.line_range);
        let operation_advance = adjusted / line_range;
        self.advance_operation(operation_advance);
        let line_delta = i64::from(self.header.line_base) + (adjusted % line_range) as i64;
        self.advance_line(line_delta);
        self.emit()
    }

    fn step(&mut self) -> Result<Option<LineRow>> {
        loop {
            if self.reader.is_empty() {
                self.done = true;
                return Ok(None);
            }

            let opcode = self.reader.read_u8()?;

            if opcode >= self.header.opcode_base {
                return Ok(Some(self.execute_special(opcode)));
            }

            match DwLns(opcode) {
                DwLns(0) => {
                    // Extended opcode: length-prefixed.
                    let length = self.reader.read_uleb128()?;
                    let length =
                        usize::try_from(length).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
                    let mut operands = self.reader.split(length)?;
                    let sub = operands.read_u8()?;

                    match DwLne(sub) {
                        DW_LNE_end_sequence => {
                            self.row.end_sequence = true;
                            let row = self.row;
                            self.row = LineRow::initial(self.header);
                            return Ok(Some(row));
                        }
                        DW_LNE_set_address => {
                            self.row.address =
                                operands.read_address(self.header.address_size)?;
                            self.row.op_index = 0;
                        }
                        DW_LNE_define_file => {
                            let name = operands.read_null_terminated()?;
                            let directory_index = operands.read_uleb128()?;
                            let timestamp = operands.read_uleb128()?;
                            let size = operands.read_uleb128()?;
                            self.defined_files.push(FileEntry {
                                path: LineString::Bytes(name),
                                directory_index,
                                timestamp,
                                size,
                                md5: None,
                            });
                        }
                        DW_LNE_set_discriminator => {
                            self.row.discriminator = operands.read_uleb128()?;
                        }
                        // Vendor extensions are length-prefixed precisely so
                        // that consumers can step over them.
                        _ => {}
                    }
                }
                DW_LNS_copy => return Ok(Some(self.emit())),
                DW_LNS_advance_pc => {
                    let advance = self.reader.read_uleb128()?;
                    self.advance_operation(advance);
                }
                DW_LNS_advance_line => {
                    let delta = self.reader.read_sleb128()?;
                    self.advance_line(delta);
                }
                DW_LNS_set_file => self.row.file = self.reader.read_uleb128()?,
                DW_LNS_set_column => self.row.column = self.reader.read_uleb128()?,
                DW_LNS_negate_stmt => self.row.is_stmt = !self.row.is_stmt,
                DW_LNS_set_basic_block => self.row.basic_block = true,
                DW_LNS_const_add_pc => {
                    let adjusted = u64::from(255 - self.header.opcode_base);
                    let advance = adjusted / u64::from(self.header.line_range);
                    self.advance_operation(advance);
                }
                DW_LNS_fixed_advance_pc => {
                    let advance = self.reader.read_u16()?;
                    self.row.address = self.row.address.wrapping_add(u64::from(advance));
                    self.row.op_index = 0;
                }
                DW_LNS_set_prologue_end => self.row.prologue_end = true,
                DW_LNS_set_epilogue_begin => self.row.epilogue_begin = true,
                DW_LNS_set_isa => self.row.isa = self.reader.read_uleb128()?,
                unknown => {
                    // An unknown standard opcode advertises its operand
                    // count in the header; skip them by shape.
                    let operands = self
                        .header
                        .standard_opcode_lengths
                        .get(opcode as usize - 1)
                        .copied()
                        .ok_or_else(|| {
                            Error::new(ErrorKind::UnknownOpcode, format!("{unknown}"))
                        })?;
                    for _ in 0..operands {
                        self.reader.read_uleb128()?;
                    }
                }
            }
        }
    }
}

impl FallibleIterator for LineRows<'_, '_> {
    type Item = LineRow;
    type Error = Error;

    fn next(&mut self) -> Result<Option<LineRow>> {
        if self.done {
            return Ok(None);
        }
        match self.step() {
            Ok(row) => Ok(row),
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use runic_common::Endian;
    use similar_asserts::assert_eq;

    use super::*;

    /// Builds a minimal DWARF 4 line contribution around a program.
    fn v4_contribution(program: &[u8], files: &[&[u8]]) -> Vec<u8> {
        let mut header_tail = vec![
            0x01, // minimum_instruction_length
            0x01, // maximum_operations_per_instruction
            0x01, // default_is_stmt
            0xfb, // line_base = -5
            0x0e, // line_range = 14
            0x0d, // opcode_base = 13
            0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1, // standard opcode lengths
        ];
        header_tail.push(0); // empty include_directories
        for file in files {
            header_tail.extend_from_slice(file);
            header_tail.push(0);
            header_tail.extend_from_slice(&[0, 0, 0]); // dir, mtime, size
        }
        header_tail.push(0); // end of file table

        let header_length = header_tail.len() as u32;
        let unit_length = (2 + 4 + header_tail.len() + program.len()) as u32;

        let mut out = vec![];
        out.extend_from_slice(&unit_length.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&header_length.to_le_bytes());
        out.extend_from_slice(&header_tail);
        out.extend_from_slice(program);
        out
    }

    fn run(program: &[u8], files: &[&[u8]]) -> (LineProgram<'static>, Vec<LineRow>) {
        let data = v4_contribution(program, files).leak();
        let mut reader = SectionReader::new(data, Endian::Little);
        let parsed = LineProgram::parse(&mut reader, 8, &LineStrings::default()).unwrap();
        let rows = parsed.rows().collect::<Vec<_>>().unwrap();
        (parsed, rows)
    }

    #[test]
    fn test_header_fields() {
        let (program, _) = run(&[], &[b"a.c", b"b.c"]);
        let header = program.header();

        assert_eq!(header.version, 4);
        assert_eq!(header.line_base, -5);
        assert_eq!(header.line_range, 14);
        assert_eq!(header.opcode_base, 13);
        assert_eq!(header.base_index(), 1);
        assert_eq!(header.end_index(), 3);
        assert_eq!(header.file(1).unwrap().path.bytes(), Some(&b"a.c"[..]));
        assert_eq!(header.file(2).unwrap().path.bytes(), Some(&b"b.c"[..]));
        assert!(header.file(0).is_none());
        assert!(header.file(3).is_none());
    }

    #[test]
    fn test_set_file_advance_copy() {
        // set_file 2; advance_pc 0x10; copy; end_sequence
        let program = &[
            0x04, 0x02, // DW_LNS_set_file 2
            0x02, 0x10, // DW_LNS_advance_pc 0x10
            0x01, // DW_LNS_copy
            0x00, 0x01, 0x01, // DW_LNE_end_sequence
        ];
        let (_, rows) = run(program, &[b"a.c", b"b.c"]);

        assert_eq!(rows.len(), 2);
        let row = rows[0];
        assert_eq!(row.address, 0x10);
        assert_eq!(row.file, 2);
        assert_eq!(row.line, 1);
        assert!(row.is_stmt);
        assert!(!row.end_sequence);
        assert!(rows[1].end_sequence);
    }

    #[test]
    fn test_special_opcode_advance() {
        // Special opcode: opcode_base 13, line_base -5, line_range 14.
        // opcode 0x20 = 32: adjusted 19, advance 1, line += -5 + 5 = 0.
        let program = &[
            0x20, // special
            0x00, 0x01, 0x01, // end_sequence
        ];
        let (_, rows) = run(program, &[b"a.c"]);

        assert_eq!(rows[0].address, 1);
        assert_eq!(rows[0].line, 1);
    }

    #[test]
    fn test_negate_stmt_and_line_advance() {
        let program = &[
            0x06, // negate_stmt
            0x03, 0x05, // advance_line +5
            0x01, // copy
            0x00, 0x01, 0x01, // end_sequence
        ];
        let (_, rows) = run(program, &[b"a.c"]);

        assert!(!rows[0].is_stmt);
        assert_eq!(rows[0].line, 6);
    }

    #[test]
    fn test_set_address_and_fixed_advance() {
        let program = &[
            0x00, 0x09, 0x02, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, // set_address 0x1000
            0x09, 0x04, 0x00, // fixed_advance_pc 4
            0x01, // copy
            0x00, 0x01, 0x01, // end_sequence
        ];
        let (_, rows) = run(program, &[b"a.c"]);

        assert_eq!(rows[0].address, 0x1004);
    }

    #[test]
    fn test_define_file() {
        let program = &[
            0x00, 0x08, 0x03, b'x', b'.', b'c', 0x00, 0x00, 0x00, 0x00, // define_file "x.c"
            0x04, 0x02, // set_file 2 (the defined one)
            0x01, // copy
            0x00, 0x01, 0x01, // end_sequence
        ];
        let data = v4_contribution(program, &[b"a.c"]).leak();
        let mut reader = SectionReader::new(data, Endian::Little);
        let parsed = LineProgram::parse(&mut reader, 8, &LineStrings::default()).unwrap();

        let mut rows = parsed.rows();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.file, 2);
        assert_eq!(rows.file(2).unwrap().path.bytes(), Some(&b"x.c"[..]));
        assert_eq!(rows.defined_files().len(), 1);
    }

    #[test]
    fn test_end_sequence_resets_state() {
        let program = &[
            0x02, 0x20, // advance_pc 0x20
            0x00, 0x01, 0x01, // end_sequence
            0x01, // copy (fresh registers)
            0x00, 0x01, 0x01, // end_sequence
        ];
        let (_, rows) = run(program, &[b"a.c"]);

        assert_eq!(rows.len(), 4);
        assert!(rows[1].end_sequence);
        assert_eq!(rows[1].address, 0x20);
        assert_eq!(rows[2].address, 0);
        assert_eq!(rows[2].line, 1);
        assert!(rows.last().unwrap().end_sequence);
    }

    #[test]
    fn test_sequences_sorted() {
        let program = &[
            0x00, 0x09, 0x02, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, // set_address 0x2000
            0x01, // copy
            0x00, 0x01, 0x01, // end_sequence
            0x00, 0x09, 0x02, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, // set_address 0x1000
            0x01, // copy
            0x00, 0x01, 0x01, // end_sequence
        ];
        let (parsed, _) = run(program, &[b"a.c"]);
        let sequences = parsed.sequences().unwrap();

        assert_eq!(sequences.len(), 2);
        assert!(sequences[0].start < sequences[1].start);
    }

    #[test]
    fn test_truncated_program() {
        let program = &[0x02]; // advance_pc with no operand
        let data = v4_contribution(program, &[b"a.c"]);
        let mut reader = SectionReader::new(&data, Endian::Little);
        let parsed = LineProgram::parse(&mut reader, 8, &LineStrings::default()).unwrap();

        let err = parsed.rows().collect::<Vec<_>>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn test_experimental_two_level_marker() {
        let mut data = v4_contribution(&[0x00, 0x01, 0x01], &[b"a.c"]);
        // Patch the version to the experimental marker.
        data[4] = 0x06;
        data[5] = 0xf0;
        let mut reader = SectionReader::new(&data, Endian::Little);
        let parsed = LineProgram::parse(&mut reader, 8, &LineStrings::default()).unwrap();

        assert!(parsed.header().is_experimental());
        assert_eq!(parsed.header().base_index(), 1);
        let rows = parsed.rows().collect::<Vec<_>>().unwrap();
        assert!(rows.last().unwrap().end_sequence);
    }
}
