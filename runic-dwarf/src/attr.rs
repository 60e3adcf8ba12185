//! Decoding attribute values according to their form.
//!
//! A form describes the wire encoding of one attribute value. Decoding
//! yields an [`AttrValue`], which is deliberately *uncooked*: indexed forms
//! (`addrx`, `strx`, `loclistx`, `rnglistx`) and string references keep
//! their raw index or offset here and are resolved against the relevant
//! sections by the session, which knows about base attributes and the tied
//! object.

use crate::abbrev::AttributeSpec;
use crate::constants::*;
use crate::error::{Error, ErrorKind, Result};
use crate::reader::{Format, SectionReader};

/// The decoding parameters fixed by a unit (or standalone) header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoding {
    /// The DWARF version of the contribution.
    pub version: u16,
    /// The offset format of the contribution.
    pub format: Format,
    /// The size of a target address in bytes.
    pub address_size: u8,
}

/// A decoded, uncooked attribute value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrValue<'data> {
    /// A target address (`DW_FORM_addr`).
    Addr(u64),
    /// An index into `.debug_addr`, relative to `DW_AT_addr_base`.
    AddrIndex(u64),
    /// A raw byte block.
    Block(&'data [u8]),
    /// A DWARF expression.
    Exprloc(&'data [u8]),
    /// An unsigned constant.
    Udata(u64),
    /// A signed constant (`sdata` or `implicit_const`).
    Sdata(i64),
    /// A boolean flag.
    Flag(bool),
    /// An inline NUL-terminated string.
    String(&'data [u8]),
    /// An offset into `.debug_str`.
    Strp(u64),
    /// An offset into `.debug_line_str`.
    LineStrp(u64),
    /// An offset into the supplementary object's `.debug_str`.
    StrpSup(u64),
    /// An index into `.debug_str_offsets`, relative to
    /// `DW_AT_str_offsets_base`.
    StrIndex(u64),
    /// A unit-relative reference to another DIE in the same unit.
    UnitRef(u64),
    /// A `.debug_info` section offset of a DIE in any unit.
    DebugInfoRef(u64),
    /// A type-unit signature (`DW_FORM_ref_sig8`).
    Sig8(u64),
    /// A reference into the supplementary object's `.debug_info`.
    SupRef(u64),
    /// An offset into some non-`.debug_info` section; its meaning depends
    /// on the attribute.
    SecOffset(u64),
    /// An index into the `.debug_loclists` offset array.
    LoclistIndex(u64),
    /// An index into the `.debug_rnglists` offset array.
    RnglistIndex(u64),
}

impl<'data> AttrValue<'data> {
    /// Returns the value as an unsigned constant, if it is one.
    pub fn udata(&self) -> Option<u64> {
        match *self {
            AttrValue::Udata(value) => Some(value),
            AttrValue::Sdata(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a signed constant, if it is one.
    pub fn sdata(&self) -> Option<i64> {
        match *self {
            AttrValue::Sdata(value) => Some(value),
            AttrValue::Udata(value) => i64::try_from(value).ok(),
            _ => None,
        }
    }

    /// Returns the value as a section offset, if it is one.
    ///
    /// DWARF 2 and 3 producers used `data4`/`data8` where later versions
    /// use `sec_offset`, so plain constants are accepted here too.
    pub fn sec_offset(&self) -> Option<u64> {
        match *self {
            AttrValue::SecOffset(value) | AttrValue::Udata(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the value as a flag, if it is one.
    pub fn flag(&self) -> Option<bool> {
        match *self {
            AttrValue::Flag(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the value as an expression block, if it is one.
    pub fn exprloc(&self) -> Option<&'data [u8]> {
        match *self {
            AttrValue::Exprloc(block) => Some(block),
            AttrValue::Block(block) => Some(block),
            _ => None,
        }
    }
}

/// A decoded attribute: its name, form, and uncooked value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attr<'data> {
    /// The attribute name.
    pub at: DwAt,
    /// The form the value was encoded with.
    pub form: DwForm,
    /// The decoded value.
    pub value: AttrValue<'data>,
}

/// Reads one attribute value according to its specification.
///
/// On any error the reader is left positioned where decoding began for that
/// value; callers abort the surrounding DIE, never resynchronize inside one.
pub(crate) fn read_value<'data>(
    reader: &mut SectionReader<'data>,
    spec: AttributeSpec,
    encoding: Encoding,
) -> Result<AttrValue<'data>> {
    let start = reader.pos();
    match read_value_for_form(reader, spec.form, spec.implicit_const, encoding, 0) {
        Ok(value) => Ok(value),
        Err(err) => {
            reader.seek(start).ok();
            Err(err)
        }
    }
}

fn read_value_for_form<'data>(
    reader: &mut SectionReader<'data>,
    form: DwForm,
    implicit_const: Option<i64>,
    encoding: Encoding,
    indirect_depth: u8,
) -> Result<AttrValue<'data>> {
    let value = match form {
        DW_FORM_addr => AttrValue::Addr(reader.read_address(encoding.address_size)?),
        DW_FORM_addrx | DW_FORM_GNU_addr_index => AttrValue::AddrIndex(reader.read_uleb128()?),
        DW_FORM_addrx1 => AttrValue::AddrIndex(reader.read_u8()?.into()),
        DW_FORM_addrx2 => AttrValue::AddrIndex(reader.read_u16()?.into()),
        DW_FORM_addrx3 => AttrValue::AddrIndex(read_u24(reader)?),
        DW_FORM_addrx4 => AttrValue::AddrIndex(reader.read_u32()?.into()),

        DW_FORM_block1 => {
            let len = reader.read_u8()? as usize;
            AttrValue::Block(reader.take(len)?)
        }
        DW_FORM_block2 => {
            let len = reader.read_u16()? as usize;
            AttrValue::Block(reader.take(len)?)
        }
        DW_FORM_block4 => {
            let len = reader.read_u32()? as usize;
            AttrValue::Block(reader.take(len)?)
        }
        DW_FORM_block => {
            let len = reader.read_uleb128()?;
            let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
            AttrValue::Block(reader.take(len)?)
        }
        DW_FORM_data16 => AttrValue::Block(reader.take(16)?),

        DW_FORM_data1 => AttrValue::Udata(reader.read_u8()?.into()),
        DW_FORM_data2 => AttrValue::Udata(reader.read_u16()?.into()),
        DW_FORM_data4 => AttrValue::Udata(reader.read_u32()?.into()),
        DW_FORM_data8 => AttrValue::Udata(reader.read_u64()?),
        DW_FORM_udata => AttrValue::Udata(reader.read_uleb128()?),
        DW_FORM_sdata => AttrValue::Sdata(reader.read_sleb128()?),
        DW_FORM_implicit_const => {
            AttrValue::Sdata(implicit_const.ok_or(ErrorKind::UnknownForm)?)
        }

        DW_FORM_string => AttrValue::String(reader.read_null_terminated()?),
        DW_FORM_strp => AttrValue::Strp(reader.read_offset(encoding.format)?),
        DW_FORM_line_strp => AttrValue::LineStrp(reader.read_offset(encoding.format)?),
        DW_FORM_strp_sup | DW_FORM_GNU_strp_alt => {
            AttrValue::StrpSup(reader.read_offset(encoding.format)?)
        }
        DW_FORM_strx | DW_FORM_GNU_str_index => AttrValue::StrIndex(reader.read_uleb128()?),
        DW_FORM_strx1 => AttrValue::StrIndex(reader.read_u8()?.into()),
        DW_FORM_strx2 => AttrValue::StrIndex(reader.read_u16()?.into()),
        DW_FORM_strx3 => AttrValue::StrIndex(read_u24(reader)?),
        DW_FORM_strx4 => AttrValue::StrIndex(reader.read_u32()?.into()),

        DW_FORM_flag => AttrValue::Flag(reader.read_u8()? != 0),
        DW_FORM_flag_present => AttrValue::Flag(true),

        DW_FORM_ref1 => AttrValue::UnitRef(reader.read_u8()?.into()),
        DW_FORM_ref2 => AttrValue::UnitRef(reader.read_u16()?.into()),
        DW_FORM_ref4 => AttrValue::UnitRef(reader.read_u32()?.into()),
        DW_FORM_ref8 => AttrValue::UnitRef(reader.read_u64()?),
        DW_FORM_ref_udata => AttrValue::UnitRef(reader.read_uleb128()?),
        DW_FORM_ref_addr => {
            // DWARF 2 encoded ref_addr with the address size; DWARF 3
            // changed it to the offset size.
            let offset = if encoding.version == 2 {
                reader.read_address(encoding.address_size)?
            } else {
                reader.read_offset(encoding.format)?
            };
            AttrValue::DebugInfoRef(offset)
        }
        DW_FORM_ref_sig8 => AttrValue::Sig8(reader.read_u64()?),
        DW_FORM_ref_sup4 => AttrValue::SupRef(reader.read_u32()?.into()),
        DW_FORM_ref_sup8 => AttrValue::SupRef(reader.read_u64()?),
        DW_FORM_GNU_ref_alt => AttrValue::SupRef(reader.read_offset(encoding.format)?),

        DW_FORM_sec_offset => AttrValue::SecOffset(reader.read_offset(encoding.format)?),
        DW_FORM_exprloc => {
            let len = reader.read_uleb128()?;
            let len = usize::try_from(len).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
            AttrValue::Exprloc(reader.take(len)?)
        }
        DW_FORM_loclistx => AttrValue::LoclistIndex(reader.read_uleb128()?),
        DW_FORM_rnglistx => AttrValue::RnglistIndex(reader.read_uleb128()?),

        DW_FORM_indirect => {
            if indirect_depth > 0 {
                return Err(Error::new(
                    ErrorKind::UnknownForm,
                    "DW_FORM_indirect nested in itself",
                ));
            }
            let nested = reader.read_uleb128()?;
            let nested = u16::try_from(nested)
                .map(DwForm)
                .map_err(|_| ErrorKind::UnknownForm)?;
            return read_value_for_form(reader, nested, None, encoding, indirect_depth + 1);
        }

        unknown => {
            return Err(Error::new(
                ErrorKind::UnknownForm,
                format!("{unknown:?}"),
            ))
        }
    };

    Ok(value)
}

/// Skips one attribute value without materializing it.
pub(crate) fn skip_value(
    reader: &mut SectionReader<'_>,
    spec: AttributeSpec,
    encoding: Encoding,
) -> Result<()> {
    read_value(reader, spec, encoding).map(|_| ())
}

fn read_u24(reader: &mut SectionReader<'_>) -> Result<u64> {
    let bytes = reader.take(3)?;
    let value = match reader.endian() {
        runic_common::Endian::Little => {
            u64::from(bytes[0]) | u64::from(bytes[1]) << 8 | u64::from(bytes[2]) << 16
        }
        runic_common::Endian::Big => {
            u64::from(bytes[0]) << 16 | u64::from(bytes[1]) << 8 | u64::from(bytes[2])
        }
    };
    Ok(value)
}

/// The class of values a form can take, per DWARF 5 §7.5.5.
///
/// Offset-bearing forms are ambiguous on their own (`sec_offset` appears in
/// six classes); the attribute decides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormClass {
    /// A machine address.
    Address,
    /// A block of bytes.
    Block,
    /// An integer constant.
    Constant,
    /// A DWARF expression.
    Exprloc,
    /// A boolean.
    Flag,
    /// An offset into `.debug_line`.
    LinePtr,
    /// A location list (offset or index).
    Loclist,
    /// An offset into the loclists offset array.
    LoclistsPtr,
    /// An offset into `.debug_macro` or `.debug_macinfo`.
    MacPtr,
    /// A range list (offset or index).
    Rnglist,
    /// An offset into the rnglists offset array.
    RnglistsPtr,
    /// A reference to another DIE.
    Reference,
    /// A string.
    String,
    /// An offset into the string offsets table.
    StrOffsetsPtr,
    /// An offset into `.debug_addr`.
    AddrPtr,
}

/// Classifies a (version, attribute, form) combination.
pub fn form_class(encoding: Encoding, at: DwAt, form: DwForm) -> Option<FormClass> {
    let class = match form {
        DW_FORM_addr | DW_FORM_addrx | DW_FORM_addrx1 | DW_FORM_addrx2 | DW_FORM_addrx3
        | DW_FORM_addrx4 | DW_FORM_GNU_addr_index => FormClass::Address,
        DW_FORM_block | DW_FORM_block1 | DW_FORM_block2 | DW_FORM_block4 | DW_FORM_data16 => {
            FormClass::Block
        }
        DW_FORM_data1 | DW_FORM_data2 | DW_FORM_sdata | DW_FORM_udata | DW_FORM_implicit_const => {
            FormClass::Constant
        }
        DW_FORM_exprloc => FormClass::Exprloc,
        DW_FORM_flag | DW_FORM_flag_present => FormClass::Flag,
        DW_FORM_string | DW_FORM_strp | DW_FORM_line_strp | DW_FORM_strp_sup | DW_FORM_strx
        | DW_FORM_strx1 | DW_FORM_strx2 | DW_FORM_strx3 | DW_FORM_strx4
        | DW_FORM_GNU_str_index | DW_FORM_GNU_strp_alt => FormClass::String,
        DW_FORM_ref1 | DW_FORM_ref2 | DW_FORM_ref4 | DW_FORM_ref8 | DW_FORM_ref_udata
        | DW_FORM_ref_addr | DW_FORM_ref_sig8 | DW_FORM_ref_sup4 | DW_FORM_ref_sup8
        | DW_FORM_GNU_ref_alt => FormClass::Reference,
        DW_FORM_loclistx => FormClass::Loclist,
        DW_FORM_rnglistx => FormClass::Rnglist,

        // Before DWARF 4, data4/data8 doubled as section offsets.
        DW_FORM_data4 | DW_FORM_data8 if encoding.version < 4 => {
            sec_offset_class(at).unwrap_or(FormClass::Constant)
        }
        DW_FORM_data4 | DW_FORM_data8 => FormClass::Constant,

        DW_FORM_sec_offset => sec_offset_class(at)?,
        _ => return None,
    };
    Some(class)
}

fn sec_offset_class(at: DwAt) -> Option<FormClass> {
    let class = match at {
        DW_AT_stmt_list => FormClass::LinePtr,
        DW_AT_ranges | DW_AT_start_scope => FormClass::Rnglist,
        DW_AT_rnglists_base | DW_AT_GNU_ranges_base => FormClass::RnglistsPtr,
        DW_AT_loclists_base => FormClass::LoclistsPtr,
        DW_AT_location
        | DW_AT_string_length
        | DW_AT_return_addr
        | DW_AT_data_member_location
        | DW_AT_frame_base
        | DW_AT_segment
        | DW_AT_static_link
        | DW_AT_use_location
        | DW_AT_vtable_elem_location => FormClass::Loclist,
        DW_AT_macros | DW_AT_macro_info => FormClass::MacPtr,
        DW_AT_str_offsets_base => FormClass::StrOffsetsPtr,
        DW_AT_addr_base | DW_AT_GNU_addr_base => FormClass::AddrPtr,
        _ => return None,
    };
    Some(class)
}

#[cfg(test)]
mod tests {
    use runic_common::Endian;
    use similar_asserts::assert_eq;

    use super::*;

    const ENCODING: Encoding = Encoding {
        version: 4,
        format: Format::Dwarf32,
        address_size: 8,
    };

    fn spec(form: DwForm) -> AttributeSpec {
        AttributeSpec {
            at: DW_AT_name,
            form,
            implicit_const: None,
        }
    }

    fn decode<'d>(data: &'d [u8], form: DwForm) -> AttrValue<'d> {
        let mut reader = SectionReader::new(data, Endian::Little);
        read_value(&mut reader, spec(form), ENCODING).unwrap()
    }

    #[test]
    fn test_scalar_forms() {
        assert_eq!(
            decode(&[0x00, 0x04, 0x40, 0, 0, 0, 0, 0], DW_FORM_addr),
            AttrValue::Addr(0x40_0400)
        );
        assert_eq!(decode(&[0x2a], DW_FORM_data1), AttrValue::Udata(42));
        assert_eq!(decode(&[0x7f], DW_FORM_sdata), AttrValue::Sdata(-1));
        assert_eq!(decode(&[0x01], DW_FORM_flag), AttrValue::Flag(true));
        assert_eq!(decode(&[], DW_FORM_flag_present), AttrValue::Flag(true));
        assert_eq!(
            decode(b"main\0", DW_FORM_string),
            AttrValue::String(b"main")
        );
    }

    #[test]
    fn test_reference_forms() {
        assert_eq!(decode(&[0x18], DW_FORM_ref1), AttrValue::UnitRef(0x18));
        assert_eq!(
            decode(&[0x44, 0x00, 0x00, 0x00], DW_FORM_ref_addr),
            AttrValue::DebugInfoRef(0x44)
        );

        // DWARF 2 reads ref_addr with the address size.
        let mut reader = SectionReader::new(&[1, 0, 0, 0, 0, 0, 0, 0], Endian::Little);
        let encoding = Encoding {
            version: 2,
            ..ENCODING
        };
        let value = read_value(&mut reader, spec(DW_FORM_ref_addr), encoding).unwrap();
        assert_eq!(value, AttrValue::DebugInfoRef(1));
        assert_eq!(reader.pos(), 8);
    }

    #[test]
    fn test_block_and_exprloc() {
        assert_eq!(
            decode(&[0x02, 0x91, 0x10], DW_FORM_exprloc),
            AttrValue::Exprloc(&[0x91, 0x10])
        );
        assert_eq!(
            decode(&[0x03, 1, 2, 3], DW_FORM_block1),
            AttrValue::Block(&[1, 2, 3])
        );
    }

    #[test]
    fn test_indexed_forms() {
        assert_eq!(decode(&[0x07], DW_FORM_addrx), AttrValue::AddrIndex(7));
        assert_eq!(
            decode(&[0x01, 0x02, 0x03], DW_FORM_strx3),
            AttrValue::StrIndex(0x030201)
        );
        assert_eq!(decode(&[0x05], DW_FORM_rnglistx), AttrValue::RnglistIndex(5));
    }

    #[test]
    fn test_implicit_const_needs_abbrev_value() {
        let mut reader = SectionReader::new(&[], Endian::Little);
        let spec = AttributeSpec {
            at: DW_AT_decl_line,
            form: DW_FORM_implicit_const,
            implicit_const: Some(17),
        };
        assert_eq!(
            read_value(&mut reader, spec, ENCODING).unwrap(),
            AttrValue::Sdata(17)
        );
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn test_indirect() {
        // indirect -> data2 -> 0xbeef
        let mut reader = SectionReader::new(&[0x05, 0xef, 0xbe], Endian::Little);
        let value = read_value(&mut reader, spec(DW_FORM_indirect), ENCODING).unwrap();
        assert_eq!(value, AttrValue::Udata(0xbeef));

        // indirect -> indirect is malformed
        let mut reader = SectionReader::new(&[0x16, 0x16, 0x0b, 0x00], Endian::Little);
        let err = read_value(&mut reader, spec(DW_FORM_indirect), ENCODING).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownForm);
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn test_unknown_form_resets_cursor() {
        let mut reader = SectionReader::new(&[0xaa, 0xbb], Endian::Little);
        let err = read_value(&mut reader, spec(DwForm(0x6666)), ENCODING).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownForm);
        assert_eq!(reader.pos(), 0);
    }

    #[test]
    fn test_form_classes() {
        assert_eq!(
            form_class(ENCODING, DW_AT_stmt_list, DW_FORM_sec_offset),
            Some(FormClass::LinePtr)
        );
        assert_eq!(
            form_class(ENCODING, DW_AT_ranges, DW_FORM_sec_offset),
            Some(FormClass::Rnglist)
        );
        assert_eq!(
            form_class(ENCODING, DW_AT_location, DW_FORM_exprloc),
            Some(FormClass::Exprloc)
        );

        // DWARF 3 stmt_list as data4 is still a lineptr.
        let v3 = Encoding {
            version: 3,
            ..ENCODING
        };
        assert_eq!(
            form_class(v3, DW_AT_stmt_list, DW_FORM_data4),
            Some(FormClass::LinePtr)
        );
        assert_eq!(
            form_class(ENCODING, DW_AT_byte_size, DW_FORM_data4),
            Some(FormClass::Constant)
        );
    }
}
