//! Abbreviation tables from `.debug_abbrev`.
//!
//! Every DIE starts with an abbreviation code that selects a declaration
//! from the table at its unit's abbreviation offset. Tables are parsed once
//! per offset and cached on the session, since split-DWARF producers
//! routinely point many units at the same table.

use smallvec::SmallVec;

use crate::constants::{DwAt, DwForm, DwTag, DW_CHILDREN_no, DW_CHILDREN_yes, DW_FORM_implicit_const};
use crate::error::{Error, ErrorKind, Result};
use crate::reader::SectionReader;

/// One attribute specification inside an abbreviation declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeSpec {
    /// The attribute name.
    pub at: DwAt,
    /// The form of the attribute's value.
    pub form: DwForm,
    /// The value stored in the abbreviation itself for
    /// `DW_FORM_implicit_const`.
    pub implicit_const: Option<i64>,
}

/// A single abbreviation declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abbreviation {
    code: u64,
    tag: DwTag,
    has_children: bool,
    attributes: SmallVec<[AttributeSpec; 8]>,
}

impl Abbreviation {
    /// The abbreviation code DIEs use to select this declaration.
    pub fn code(&self) -> u64 {
        self.code
    }

    /// The tag of DIEs using this declaration.
    pub fn tag(&self) -> DwTag {
        self.tag
    }

    /// Whether DIEs using this declaration have children.
    pub fn has_children(&self) -> bool {
        self.has_children
    }

    /// The ordered attribute specifications of this declaration.
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }
}

/// The abbreviation table of one unit.
///
/// Codes are usually handed out consecutively starting at 1, so lookups hit
/// a dense vector; tables with holes fall back to a sorted overflow list.
#[derive(Clone, Debug, Default)]
pub struct AbbrevTable {
    dense: Vec<Abbreviation>,
    sparse: Vec<Abbreviation>,
}

impl AbbrevTable {
    /// Parses the table starting at `offset` of `.debug_abbrev`.
    ///
    /// Parsing stops at the terminating zero code. An offset outside the
    /// section is an error; an empty table is not.
    pub fn parse(debug_abbrev: SectionReader<'_>, offset: u64) -> Result<Self> {
        let mut reader = debug_abbrev;
        let offset = usize::try_from(offset).map_err(|_| ErrorKind::SectionSizeOrOffsetLarge)?;
        reader.seek(offset)?;

        let mut table = AbbrevTable::default();

        loop {
            let code = reader.read_uleb128()?;
            if code == 0 {
                break;
            }

            let tag = reader.read_uleb128()?;
            let tag = u16::try_from(tag)
                .map(DwTag)
                .map_err(|_| Error::new(ErrorKind::BadTypeSize, format!("tag {tag:#x}")))?;

            let has_children = match reader.read_u8()? {
                c if c == DW_CHILDREN_no.0 => false,
                c if c == DW_CHILDREN_yes.0 => true,
                c => {
                    return Err(Error::new(
                        ErrorKind::BadTypeSize,
                        format!("children flag {c:#x}"),
                    ))
                }
            };

            let mut attributes = SmallVec::new();
            loop {
                let at = reader.read_uleb128()?;
                let form = reader.read_uleb128()?;
                if at == 0 && form == 0 {
                    break;
                }

                let at = u16::try_from(at)
                    .map(DwAt)
                    .map_err(|_| Error::new(ErrorKind::BadTypeSize, format!("attribute {at:#x}")))?;
                let form = u16::try_from(form)
                    .map(DwForm)
                    .map_err(|_| ErrorKind::UnknownForm)?;

                let implicit_const = if form == DW_FORM_implicit_const {
                    Some(reader.read_sleb128()?)
                } else {
                    None
                };

                attributes.push(AttributeSpec {
                    at,
                    form,
                    implicit_const,
                });
            }

            table.insert(Abbreviation {
                code,
                tag,
                has_children,
                attributes,
            });
        }

        Ok(table)
    }

    fn insert(&mut self, abbrev: Abbreviation) {
        if abbrev.code as usize == self.dense.len() + 1 && self.sparse.is_empty() {
            self.dense.push(abbrev);
        } else if self.get(abbrev.code).is_none() {
            let pos = self
                .sparse
                .partition_point(|existing| existing.code < abbrev.code);
            self.sparse.insert(pos, abbrev);
        }
    }

    /// Looks up the declaration for a non-zero abbreviation code.
    pub fn get(&self, code: u64) -> Option<&Abbreviation> {
        if code == 0 {
            return None;
        }
        if let Some(abbrev) = self.dense.get(code as usize - 1) {
            return Some(abbrev);
        }
        self.sparse
            .binary_search_by_key(&code, |a| a.code)
            .ok()
            .map(|idx| &self.sparse[idx])
    }

    /// The number of declarations in the table.
    pub fn len(&self) -> usize {
        self.dense.len() + self.sparse.len()
    }

    /// Whether the table has no declarations.
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty() && self.sparse.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use runic_common::Endian;
    use similar_asserts::assert_eq;

    use crate::constants::*;

    use super::*;

    /// DW_TAG_compile_unit with children, name:string + stmt_list:sec_offset;
    /// DW_TAG_subprogram without children, name:strp + low_pc:addr.
    const TWO_DECLS: &[u8] = &[
        0x01, 0x11, 0x01, 0x03, 0x08, 0x10, 0x17, 0x00, 0x00, // decl 1
        0x02, 0x2e, 0x00, 0x03, 0x0e, 0x11, 0x01, 0x00, 0x00, // decl 2
        0x00, // table terminator
    ];

    #[test]
    fn test_parse_table() {
        let reader = SectionReader::new(TWO_DECLS, Endian::Little);
        let table = AbbrevTable::parse(reader, 0).unwrap();

        assert_eq!(table.len(), 2);

        let cu = table.get(1).unwrap();
        assert_eq!(cu.tag(), DW_TAG_compile_unit);
        assert!(cu.has_children());
        assert_eq!(
            cu.attributes(),
            &[
                AttributeSpec {
                    at: DW_AT_name,
                    form: DW_FORM_string,
                    implicit_const: None
                },
                AttributeSpec {
                    at: DW_AT_stmt_list,
                    form: DW_FORM_sec_offset,
                    implicit_const: None
                },
            ]
        );

        let sub = table.get(2).unwrap();
        assert_eq!(sub.tag(), DW_TAG_subprogram);
        assert!(!sub.has_children());

        assert!(table.get(0).is_none());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_implicit_const() {
        // code 1, DW_TAG_variable, no children, decl_line implicit_const -5.
        let data = &[0x01, 0x34, 0x00, 0x3b, 0x21, 0x7b, 0x00, 0x00, 0x00];
        let table = AbbrevTable::parse(SectionReader::new(data, Endian::Little), 0).unwrap();

        let decl = table.get(1).unwrap();
        assert_eq!(decl.attributes()[0].implicit_const, Some(-5));
    }

    #[test]
    fn test_sparse_codes() {
        // Codes 1 and 9: the second lands in the overflow list.
        let data = &[
            0x01, 0x11, 0x00, 0x00, 0x00, // code 1
            0x09, 0x2e, 0x00, 0x00, 0x00, // code 9
            0x00,
        ];
        let table = AbbrevTable::parse(SectionReader::new(data, Endian::Little), 0).unwrap();

        assert_eq!(table.get(1).unwrap().tag(), DW_TAG_compile_unit);
        assert_eq!(table.get(9).unwrap().tag(), DW_TAG_subprogram);
        assert!(table.get(5).is_none());
    }

    #[test]
    fn test_truncated_table() {
        let data = &[0x01, 0x11, 0x01, 0x03];
        let err = AbbrevTable::parse(SectionReader::new(data, Endian::Little), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn test_offset_out_of_bounds() {
        let err = AbbrevTable::parse(SectionReader::new(&[0x00], Endian::Little), 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }
}
