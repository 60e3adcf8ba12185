//! The section registry: canonical DWARF section identities, alternate
//! names, and the section-group partition.
//!
//! Object files spell the same section three ways (`.debug_info`,
//! `.zdebug_info`, `__debug_info`) and split DWARF adds a fourth
//! (`.debug_info.dwo`). The registry normalizes all of them to a
//! [`SectionId`] at load time so the rest of the pipeline never sees raw
//! names. Every DWARF-bearing section belongs to exactly one group; the
//! caller picks a group when opening and only that group's sections are
//! registered.

use std::borrow::Cow;
use std::fmt;

/// Well-known group numbers.
///
/// Groups 1 and 2 always exist conceptually; named COMDAT groups are
/// numbered from 3 in section-table order.
pub mod group {
    /// Match sections of every group.
    pub const ANY: u32 = 0;
    /// The base group: sections of the executable proper.
    pub const BASE: u32 = 1;
    /// The split-DWARF group: sections named `*.dwo`.
    pub const DWO: u32 = 2;
}

/// The caller's choice of section group when opening a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupChoice {
    /// Expose every DWARF section regardless of group.
    #[default]
    Any,
    /// Expose only base-group sections.
    Base,
    /// Expose only split-DWARF (`.dwo`) sections.
    Dwo,
    /// Expose only the COMDAT group with this number (3 or higher).
    Numbered(u32),
}

impl GroupChoice {
    /// Returns whether a section assigned to `group` is admitted.
    pub fn admits(self, group: u32) -> bool {
        match self {
            GroupChoice::Any => true,
            GroupChoice::Base => group == group::BASE,
            GroupChoice::Dwo => group == group::DWO,
            GroupChoice::Numbered(n) => group == n,
        }
    }

    /// Returns the group number this choice selects, if it is specific.
    pub fn number(self) -> Option<u32> {
        match self {
            GroupChoice::Any => None,
            GroupChoice::Base => Some(group::BASE),
            GroupChoice::Dwo => Some(group::DWO),
            GroupChoice::Numbered(n) => Some(n),
        }
    }
}

/// Canonical identity of a DWARF-bearing section.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionId {
    /// `.debug_abbrev`
    DebugAbbrev,
    /// `.debug_addr`
    DebugAddr,
    /// `.debug_aranges`
    DebugAranges,
    /// `.debug_cu_index`
    DebugCuIndex,
    /// `.debug_frame`
    DebugFrame,
    /// `.debug_info`
    DebugInfo,
    /// `.debug_line`
    DebugLine,
    /// `.debug_line_str`
    DebugLineStr,
    /// `.debug_loc`
    DebugLoc,
    /// `.debug_loclists`
    DebugLocLists,
    /// `.debug_macinfo`
    DebugMacinfo,
    /// `.debug_macro`
    DebugMacro,
    /// `.debug_names`
    DebugNames,
    /// `.debug_ranges`
    DebugRanges,
    /// `.debug_rnglists`
    DebugRngLists,
    /// `.debug_str`
    DebugStr,
    /// `.debug_str_offsets`
    DebugStrOffsets,
    /// `.debug_tu_index`
    DebugTuIndex,
    /// `.debug_types`
    DebugTypes,
    /// `.eh_frame`
    EhFrame,
}

impl SectionId {
    /// All section identities, in registry order.
    pub(crate) const ALL: &'static [SectionId] = &[
        SectionId::DebugAbbrev,
        SectionId::DebugAddr,
        SectionId::DebugAranges,
        SectionId::DebugCuIndex,
        SectionId::DebugFrame,
        SectionId::DebugInfo,
        SectionId::DebugLine,
        SectionId::DebugLineStr,
        SectionId::DebugLoc,
        SectionId::DebugLocLists,
        SectionId::DebugMacinfo,
        SectionId::DebugMacro,
        SectionId::DebugNames,
        SectionId::DebugRanges,
        SectionId::DebugRngLists,
        SectionId::DebugStr,
        SectionId::DebugStrOffsets,
        SectionId::DebugTuIndex,
        SectionId::DebugTypes,
        SectionId::EhFrame,
    ];

    /// The canonical ELF name of this section.
    pub fn name(self) -> &'static str {
        match self {
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugAddr => ".debug_addr",
            SectionId::DebugAranges => ".debug_aranges",
            SectionId::DebugCuIndex => ".debug_cu_index",
            SectionId::DebugFrame => ".debug_frame",
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugLine => ".debug_line",
            SectionId::DebugLineStr => ".debug_line_str",
            SectionId::DebugLoc => ".debug_loc",
            SectionId::DebugLocLists => ".debug_loclists",
            SectionId::DebugMacinfo => ".debug_macinfo",
            SectionId::DebugMacro => ".debug_macro",
            SectionId::DebugNames => ".debug_names",
            SectionId::DebugRanges => ".debug_ranges",
            SectionId::DebugRngLists => ".debug_rnglists",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugStrOffsets => ".debug_str_offsets",
            SectionId::DebugTuIndex => ".debug_tu_index",
            SectionId::DebugTypes => ".debug_types",
            SectionId::EhFrame => ".eh_frame",
        }
    }

    /// Resolves a section name, in any container's spelling, to its
    /// identity.
    ///
    /// Returns the identity, whether the name carried the `.zdebug`
    /// compression prefix, and whether it carried the `.dwo` suffix.
    pub fn from_object_name(name: &str) -> Option<(SectionId, bool, bool)> {
        // Mach-O spells sections `__debug_info` inside the `__DWARF`
        // segment; normalize to the ELF dot form first.
        let (name, compressed) = if let Some(rest) = name.strip_prefix("__") {
            (Cow::Owned(format!(".{rest}")), false)
        } else if let Some(rest) = name.strip_prefix(".z") {
            (Cow::Owned(format!(".{rest}")), true)
        } else {
            (Cow::Borrowed(name), false)
        };

        let (name, dwo) = match name.strip_suffix(".dwo") {
            Some(stripped) => (stripped, true),
            None => (name.as_ref(), false),
        };

        SectionId::ALL
            .iter()
            .find(|id| id.name() == name)
            .map(|&id| (id, compressed, dwo))
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One loaded DWARF section.
///
/// Immutable after load: decompression and relocation application both
/// happen while the registry is built.
pub struct Section<'data> {
    /// The canonical identity of this section.
    pub id: SectionId,
    /// The section bytes, owned if decompression or relocation produced
    /// them.
    pub data: Cow<'data, [u8]>,
    /// The load address of the section, if the container assigns one.
    pub address: u64,
    /// The group this section belongs to.
    pub group: u32,
    /// Whether the stored bytes were produced by decompression.
    pub compressed: bool,
    /// The size declared by the compression header, if compressed.
    pub uncompressed_size: Option<u64>,
}

impl fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("len()", &self.data.len())
            .field("address", &format_args!("{:#x}", self.address))
            .field("group", &self.group)
            .field("compressed", &self.compressed)
            .finish()
    }
}

/// All DWARF sections admitted by the caller's group choice.
#[derive(Debug, Default)]
pub struct SectionRegistry<'data> {
    sections: Vec<Section<'data>>,
}

impl<'data> SectionRegistry<'data> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        SectionRegistry::default()
    }

    /// Inserts a loaded section.
    ///
    /// The first section of a given identity wins; containers with
    /// duplicate DWARF sections in the same group are pathological and the
    /// duplicate is ignored.
    pub fn insert(&mut self, section: Section<'data>) {
        if self.get(section.id).is_none() {
            self.sections.push(section);
        }
    }

    /// Returns the section with the given identity, if present.
    pub fn get(&self, id: SectionId) -> Option<&Section<'data>> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Returns the bytes of the section with the given identity.
    pub fn data(&self, id: SectionId) -> Option<&[u8]> {
        self.get(id).map(|s| s.data.as_ref())
    }

    /// Returns an iterator over all registered sections, in object order.
    pub fn iter(&self) -> impl Iterator<Item = &Section<'data>> {
        self.sections.iter()
    }

    /// Returns whether any section is registered.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Returns whether the registry contains compilation unit data.
    pub fn has_debug_info(&self) -> bool {
        self.get(SectionId::DebugInfo).is_some()
    }

    /// Copies all borrowed section data, detaching the registry from its
    /// backing buffer.
    pub fn into_owned(self) -> SectionRegistry<'static> {
        SectionRegistry {
            sections: self
                .sections
                .into_iter()
                .map(|section| Section {
                    id: section.id,
                    data: Cow::Owned(section.data.into_owned()),
                    address: section.address,
                    group: section.group,
                    compressed: section.compressed,
                    uncompressed_size: section.uncompressed_size,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_name_normalization() {
        assert_eq!(
            SectionId::from_object_name(".debug_info"),
            Some((SectionId::DebugInfo, false, false))
        );
        assert_eq!(
            SectionId::from_object_name(".zdebug_info"),
            Some((SectionId::DebugInfo, true, false))
        );
        assert_eq!(
            SectionId::from_object_name("__debug_line"),
            Some((SectionId::DebugLine, false, false))
        );
        assert_eq!(
            SectionId::from_object_name(".debug_str_offsets.dwo"),
            Some((SectionId::DebugStrOffsets, false, true))
        );
        assert_eq!(SectionId::from_object_name(".text"), None);
        assert_eq!(SectionId::from_object_name(".gnu_debuglink"), None);
    }

    #[test]
    fn test_group_choice() {
        assert!(GroupChoice::Any.admits(group::BASE));
        assert!(GroupChoice::Any.admits(7));
        assert!(GroupChoice::Base.admits(group::BASE));
        assert!(!GroupChoice::Base.admits(group::DWO));
        assert!(GroupChoice::Dwo.admits(group::DWO));
        assert!(GroupChoice::Numbered(3).admits(3));
        assert!(!GroupChoice::Numbered(3).admits(group::BASE));
    }

    #[test]
    fn test_registry_first_section_wins() {
        let mut registry = SectionRegistry::new();
        registry.insert(Section {
            id: SectionId::DebugStr,
            data: b"first\0".as_ref().into(),
            address: 0,
            group: group::BASE,
            compressed: false,
            uncompressed_size: None,
        });
        registry.insert(Section {
            id: SectionId::DebugStr,
            data: b"second\0".as_ref().into(),
            address: 0,
            group: group::BASE,
            compressed: false,
            uncompressed_size: None,
        });

        assert_eq!(registry.data(SectionId::DebugStr), Some(&b"first\0"[..]));
    }
}
