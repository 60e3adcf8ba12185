//! End-to-end tests over synthetic objects assembled in memory.

use std::sync::Arc;

use fallible_iterator::FallibleIterator;
use similar_asserts::assert_eq;

use runic_dwarf::{
    Arch, AttrValue, DwarfSession, Endian, ErrorKind, FileSession, GroupChoice, Object,
    ObjectKind, ObjectReader, OpenOptions, PathSource, RegisterRule, RelocEntry, Section,
    SectionId, SectionInfo, SectionRegistry, DW_AT_low_pc, DW_AT_name, DW_AT_ranges,
    DW_AT_sibling, DW_TAG_compile_unit, DW_TAG_subprogram,
};

// ---------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------

/// Assembles a minimal 64-bit little-endian ELF with the given sections.
fn build_elf64(sections: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offsets = vec![];
    for (name, _) in sections {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(name.as_bytes());
        shstrtab.push(0);
    }
    let shstr_name = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab\0");

    let mut body = vec![];
    let mut offsets = vec![];
    let mut pos = 64usize;
    for (_, data) in sections {
        offsets.push(pos);
        body.extend_from_slice(data);
        pos += data.len();
    }
    let shstr_offset = pos;
    body.extend_from_slice(&shstrtab);
    pos += shstrtab.len();
    while pos % 8 != 0 {
        body.push(0);
        pos += 1;
    }
    let shoff = pos;
    let shnum = sections.len() + 2;

    let mut out = vec![];
    out.extend_from_slice(b"\x7fELF\x02\x01\x01\x00");
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&(shoff as u64).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&(shnum as u16).to_le_bytes());
    out.extend_from_slice(&((shnum - 1) as u16).to_le_bytes());

    out.extend_from_slice(&body);

    let shdr = |name: u32, sh_type: u32, offset: usize, size: usize| {
        let mut header = vec![];
        header.extend_from_slice(&name.to_le_bytes());
        header.extend_from_slice(&sh_type.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        header.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        header.extend_from_slice(&(offset as u64).to_le_bytes());
        header.extend_from_slice(&(size as u64).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        header.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        header.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
        header.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
        header
    };

    out.extend_from_slice(&[0u8; 64]);
    for (index, (_, data)) in sections.iter().enumerate() {
        out.extend_from_slice(&shdr(name_offsets[index], 1, offsets[index], data.len()));
    }
    out.extend_from_slice(&shdr(shstr_name, 3, shstr_offset, shstrtab.len()));
    out
}

/// Builds a session straight from section contents, bypassing containers.
fn session_over(sections: Vec<(SectionId, Vec<u8>)>) -> DwarfSession<'static> {
    let mut registry = SectionRegistry::new();
    for (id, data) in sections {
        registry.insert(Section {
            id,
            data: data.into(),
            address: 0,
            group: runic_dwarf::group::BASE,
            compressed: false,
            uncompressed_size: None,
        });
    }
    DwarfSession::from_sections(registry, Endian::Little, ObjectKind::Debug, Arch::Amd64, 8)
        .unwrap()
}

/// The S1 fixture: one DWARF 4 compile unit with a `main` subprogram.
fn two_die_sections() -> (Vec<u8>, Vec<u8>) {
    let abbrev = vec![
        0x01, 0x11, 0x01, 0x03, 0x08, 0x00, 0x00, // CU: name=string, children
        0x02, 0x2e, 0x00, 0x03, 0x08, 0x00, 0x00, // subprogram: name=string
        0x00,
    ];
    let mut info = vec![
        0x16, 0x00, 0x00, 0x00, // unit_length = 22
        0x04, 0x00, // version 4
        0x00, 0x00, 0x00, 0x00, // abbrev offset
        0x08, // address size
    ];
    info.push(0x01);
    info.extend_from_slice(b"test.c\0");
    info.push(0x02);
    info.extend_from_slice(b"main\0");
    info.push(0x00);
    (abbrev, info)
}

// ---------------------------------------------------------------------
// S1: ELF with one compile unit and two DIEs
// ---------------------------------------------------------------------

#[test]
fn test_elf_compile_unit_and_subprogram() {
    let (abbrev, info) = two_die_sections();
    let elf = build_elf64(&[(".debug_abbrev", abbrev), (".debug_info", info)]);

    let object = Object::parse(&elf).unwrap();
    assert_eq!(object.endian(), Endian::Little);
    assert_eq!(object.arch(), Arch::Amd64);
    assert!(object.has_debug_info());

    let session = DwarfSession::from_object(&object, GroupChoice::Any).unwrap();
    assert_eq!(session.unit_count(), 1);

    let unit = session.unit(0).unwrap();
    assert_eq!(unit.header().version, 4);

    let root = unit.root_die();
    assert_eq!(root.tag().unwrap(), Some(DW_TAG_compile_unit));
    assert_eq!(root.tag().unwrap().unwrap().0, 17);
    assert_eq!(root.attr_string(DW_AT_name).unwrap(), Some(&b"test.c"[..]));

    let child = root.child().unwrap().unwrap();
    assert_eq!(child.tag().unwrap(), Some(DW_TAG_subprogram));
    assert_eq!(child.tag().unwrap().unwrap().0, 46);
    assert_eq!(child.attr_string(DW_AT_name).unwrap(), Some(&b"main"[..]));

    assert!(child.child().unwrap().is_none());
    assert!(child.sibling().unwrap().is_none());
    assert!(root.sibling().unwrap().is_none());
}

#[test]
fn test_file_session_open() {
    let (abbrev, info) = two_die_sections();
    let elf = build_elf64(&[(".debug_abbrev", abbrev), (".debug_info", info)]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.elf");
    std::fs::write(&path, &elf).unwrap();

    let opened = FileSession::open(&path, &OpenOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(opened.resolved_path().source, PathSource::Original);
    assert_eq!(opened.session().unit_count(), 1);
}

// ---------------------------------------------------------------------
// S5: truncated .debug_info fails at the cut attribute
// ---------------------------------------------------------------------

#[test]
fn test_truncated_debug_info() {
    let (abbrev, mut info) = two_die_sections();
    info.truncate(info.len() - 3);

    let session = session_over(vec![
        (SectionId::DebugAbbrev, abbrev),
        (SectionId::DebugInfo, info),
    ]);

    // The unit still scans; the anomaly is on record.
    assert_eq!(session.unit_count(), 1);
    assert!(session
        .harmless_errors()
        .iter()
        .any(|entry| entry.kind == ErrorKind::Truncated));

    // The root decodes fine; the cut subprogram fails with Truncated.
    let root = session.unit(0).unwrap().root_die();
    assert_eq!(root.attr_string(DW_AT_name).unwrap(), Some(&b"test.c"[..]));

    let child = root.child().unwrap().unwrap();
    let err = child.attr_string(DW_AT_name).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Truncated);
}

// ---------------------------------------------------------------------
// S2: split DWARF pair tied together
// ---------------------------------------------------------------------

#[test]
fn test_split_dwarf_addrx_through_tied_session() {
    // The executable side: a DWARF 5 skeleton with a dwo id and addr base.
    let skeleton_abbrev = vec![
        0x01, 0x4a, 0x00, // skeleton_unit, no children
        0x73, 0x17, // addr_base: sec_offset
        0x00, 0x00, 0x00,
    ];
    let mut skeleton_info = vec![
        0x15, 0x00, 0x00, 0x00, // unit_length = 21
        0x05, 0x00, // version 5
        0x04, // DW_UT_skeleton
        0x08, // address size
        0x00, 0x00, 0x00, 0x00, // abbrev offset
    ];
    skeleton_info.extend_from_slice(&0xabcdu64.to_le_bytes()); // dwo id
    skeleton_info.push(0x01);
    skeleton_info.extend_from_slice(&8u32.to_le_bytes()); // addr_base = 8

    let mut debug_addr = vec![0u8; 8]; // header filler up to the base
    debug_addr.extend_from_slice(&0x40_0400u64.to_le_bytes());

    let tied = session_over(vec![
        (SectionId::DebugAbbrev, skeleton_abbrev),
        (SectionId::DebugInfo, skeleton_info),
        (SectionId::DebugAddr, debug_addr),
    ]);

    // The .dwo side: a split compile unit using addrx(0).
    let dwo_abbrev = vec![
        0x01, 0x11, 0x00, // compile_unit, no children
        0x11, 0x1b, // low_pc: addrx
        0x00, 0x00, 0x00,
    ];
    let mut dwo_info = vec![
        0x12, 0x00, 0x00, 0x00, // unit_length = 18
        0x05, 0x00, // version 5
        0x05, // DW_UT_split_compile
        0x08, // address size
        0x00, 0x00, 0x00, 0x00, // abbrev offset
    ];
    dwo_info.extend_from_slice(&0xabcdu64.to_le_bytes()); // dwo id
    dwo_info.push(0x01);
    dwo_info.push(0x00); // addrx index 0

    let mut dwo = session_over(vec![
        (SectionId::DebugAbbrev, dwo_abbrev),
        (SectionId::DebugInfo, dwo_info),
    ]);

    let unit = dwo.unit(0).unwrap();
    assert!(unit.header().is_split());
    assert_eq!(unit.dwo_id().unwrap(), Some(0xabcd));

    // Without the tied session the index cannot resolve.
    let err = dwo
        .unit(0)
        .unwrap()
        .root_die()
        .attr_address(DW_AT_low_pc)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingBase);

    // With it, addrx(0) lands on the skeleton's .debug_addr contribution.
    dwo.attach_tied(Arc::new(tied));
    let low_pc = dwo
        .unit(0)
        .unwrap()
        .root_die()
        .attr_address(DW_AT_low_pc)
        .unwrap();
    assert_eq!(low_pc, Some(0x40_0400));

    assert!(dwo.detach_tied().is_some());
    assert!(dwo.tied().is_none());
}

// ---------------------------------------------------------------------
// S3: line program through the session
// ---------------------------------------------------------------------

#[test]
fn test_line_program_from_stmt_list() {
    let abbrev = vec![
        0x01, 0x11, 0x00, // compile_unit, no children
        0x10, 0x17, // stmt_list: sec_offset
        0x00, 0x00, 0x00,
    ];
    let info = vec![
        0x0c, 0x00, 0x00, 0x00, // unit_length = 12
        0x04, 0x00, // version 4
        0x00, 0x00, 0x00, 0x00, // abbrev offset
        0x08, // address size
        0x01, // root DIE
        0x00, 0x00, 0x00, 0x00, // stmt_list = 0
    ];

    // A DWARF 4 line contribution with files a.c and b.c.
    let mut header_tail = vec![
        0x01, // minimum_instruction_length
        0x01, // maximum_operations_per_instruction
        0x01, // default_is_stmt
        0xfb, // line_base = -5
        0x0e, // line_range = 14
        0x0d, // opcode_base = 13
        0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1, // standard opcode lengths
        0x00, // no include directories
    ];
    for file in [&b"a.c"[..], &b"b.c"[..]] {
        header_tail.extend_from_slice(file);
        header_tail.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    }
    header_tail.push(0x00);

    let program: &[u8] = &[
        0x04, 0x02, // set_file 2
        0x02, 0x10, // advance_pc 0x10
        0x01, // copy
        0x00, 0x01, 0x01, // end_sequence
    ];

    let mut line = vec![];
    line.extend_from_slice(&((2 + 4 + header_tail.len() + program.len()) as u32).to_le_bytes());
    line.extend_from_slice(&4u16.to_le_bytes());
    line.extend_from_slice(&(header_tail.len() as u32).to_le_bytes());
    line.extend_from_slice(&header_tail);
    line.extend_from_slice(program);

    let session = session_over(vec![
        (SectionId::DebugAbbrev, abbrev),
        (SectionId::DebugInfo, info),
        (SectionId::DebugLine, line),
    ]);

    let root = session.unit(0).unwrap().root_die();
    let program = session.line_program(&root).unwrap().unwrap();

    assert_eq!(program.header().base_index(), 1);
    assert_eq!(
        program.header().file(2).unwrap().path.bytes(),
        Some(&b"b.c"[..])
    );

    let rows = program.rows().collect::<Vec<_>>().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].address, 0x10);
    assert_eq!(rows[0].file, 2);
    assert_eq!(rows[0].line, 1);
    assert!(rows[0].is_stmt);
    assert!(rows[1].end_sequence);

    // Replays are stable.
    let again = program.rows().collect::<Vec<_>>().unwrap();
    assert_eq!(rows, again);
}

// ---------------------------------------------------------------------
// S4: frame rows through the session
// ---------------------------------------------------------------------

#[test]
fn test_frame_row_through_session() {
    let mut frame = vec![];
    let cie_tail: &[u8] = &[
        0x04, // version
        0x00, // augmentation ""
        0x08, // address size
        0x00, // segment selector size
        0x01, // code_alignment_factor = 1
        0x78, // data_alignment_factor = -8
        0x10, // return_address_register = 16
    ];
    frame.extend_from_slice(&((4 + cie_tail.len()) as u32).to_le_bytes());
    frame.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    frame.extend_from_slice(cie_tail);

    let instructions: &[u8] = &[0x44, 0x87, 0x02]; // advance_loc 4; offset r7, 2
    frame.extend_from_slice(&((4 + 8 + 8 + instructions.len()) as u32).to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&0x1000u64.to_le_bytes());
    frame.extend_from_slice(&0x20u64.to_le_bytes());
    frame.extend_from_slice(instructions);

    let session = session_over(vec![(SectionId::DebugFrame, frame)]);
    let frame = session.debug_frame().unwrap();

    let row = frame.unwind_row_for_pc(0x1004).unwrap().unwrap();
    assert_eq!(row.register(7), RegisterRule::Offset(-16));
    assert!(frame.unwind_row_for_pc(0x1020).unwrap().is_none());
}

// ---------------------------------------------------------------------
// S6: rnglist with base_addressx
// ---------------------------------------------------------------------

#[test]
fn test_rnglist_base_addressx() {
    let abbrev = vec![
        0x01, 0x11, 0x00, // compile_unit, no children
        0x73, 0x17, // addr_base: sec_offset
        0x55, 0x17, // ranges: sec_offset
        0x00, 0x00, 0x00,
    ];
    let info = vec![
        0x11, 0x00, 0x00, 0x00, // unit_length = 17
        0x05, 0x00, // version 5
        0x01, // DW_UT_compile
        0x08, // address size
        0x00, 0x00, 0x00, 0x00, // abbrev offset
        0x01, // root DIE
        0x08, 0x00, 0x00, 0x00, // addr_base = 8
        0x00, 0x00, 0x00, 0x00, // ranges = offset 0
    ];

    let rnglists = vec![
        0x01, 0x01, // base_addressx(1)
        0x04, 0x10, 0x20, // offset_pair(0x10, 0x20)
        0x00, // end_of_list
    ];

    let mut debug_addr = vec![0u8; 8];
    debug_addr.extend_from_slice(&0u64.to_le_bytes()); // [0]
    debug_addr.extend_from_slice(&0x8000u64.to_le_bytes()); // [1]

    let session = session_over(vec![
        (SectionId::DebugAbbrev, abbrev),
        (SectionId::DebugInfo, info),
        (SectionId::DebugRngLists, rnglists),
        (SectionId::DebugAddr, debug_addr),
    ]);

    let unit = session.unit(0).unwrap();
    let ranges_attr = unit.root_die().attr_value(DW_AT_ranges).unwrap().unwrap();
    assert_eq!(ranges_attr, AttrValue::SecOffset(0));

    let ranges = session
        .rnglist(unit, ranges_attr)
        .unwrap()
        .unwrap()
        .collect::<Vec<_>>()
        .unwrap();

    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].begin, 0x8010);
    assert_eq!(ranges[0].end, 0x8020);
    assert!(!ranges[0].debug_addr_unavailable);
}

#[test]
fn test_session_debug_snapshot() {
    let (abbrev, info) = two_die_sections();
    let session = session_over(vec![
        (SectionId::DebugAbbrev, abbrev),
        (SectionId::DebugInfo, info),
    ]);

    insta::assert_debug_snapshot!(session, @r###"
    DwarfSession {
        endian: Little,
        kind: Debug,
        arch: Amd64,
        units: 1,
        type_units: 0,
        tied: false,
    }
    "###);
}

// ---------------------------------------------------------------------
// Traversal completeness and sibling consistency
// ---------------------------------------------------------------------

#[test]
fn test_traversal_and_sibling_consistency() {
    let abbrev = vec![
        0x01, 0x11, 0x01, 0x00, 0x00, // CU, children, no attrs
        0x02, 0x2e, 0x01, 0x01, 0x13, 0x00, 0x00, // subprogram, children, sibling: ref4
        0x03, 0x34, 0x00, 0x00, 0x00, // variable, no children, no attrs
        0x00,
    ];
    let mut info = vec![
        0x12, 0x00, 0x00, 0x00, // unit_length = 18
        0x04, 0x00, // version 4
        0x00, 0x00, 0x00, 0x00, // abbrev offset
        0x08, // address size
    ];
    info.push(0x01); // root @11
    info.push(0x02); // A @12
    info.extend_from_slice(&20u32.to_le_bytes()); // DW_AT_sibling -> B @20
    info.push(0x03); // A1 @17
    info.push(0x03); // A2 @18
    info.push(0x00); // end of A's children
    info.push(0x03); // B @20
    info.push(0x00); // end of root's children

    let session = session_over(vec![
        (SectionId::DebugAbbrev, abbrev),
        (SectionId::DebugInfo, info),
    ]);
    let unit = session.unit(0).unwrap();

    // Depth-first traversal visits each of the five DIEs exactly once.
    let entries = unit.entries().collect::<Vec<_>>().unwrap();
    let visited: Vec<(isize, usize)> = entries
        .iter()
        .map(|(depth, die)| (*depth, die.offset()))
        .collect();
    assert_eq!(visited, vec![(0, 11), (1, 12), (2, 17), (2, 18), (1, 20)]);

    // The sibling attribute and the child walk agree.
    let root = unit.root_die();
    let a = root.child().unwrap().unwrap();
    assert_eq!(a.offset(), 12);

    let b_via_attr = a.sibling().unwrap().unwrap();
    assert_eq!(b_via_attr.offset(), 20);
    assert_eq!(b_via_attr, unit.die_at_offset(20).unwrap());

    let a1 = a.child().unwrap().unwrap();
    let a2 = a1.sibling().unwrap().unwrap();
    assert_eq!((a1.offset(), a2.offset()), (17, 18));
    assert!(a2.sibling().unwrap().is_none());
    assert!(b_via_attr.sibling().unwrap().is_none());

    // The sibling attribute is present on A's abbreviation.
    assert_eq!(
        a.attr_value(DW_AT_sibling).unwrap(),
        Some(AttrValue::UnitRef(20))
    );
}

// ---------------------------------------------------------------------
// Memory form: a caller-supplied object reader
// ---------------------------------------------------------------------

struct MemoryReader {
    pointer_size: u8,
    sections: Vec<(SectionInfo, Vec<u8>)>,
}

impl ObjectReader for MemoryReader {
    fn object_size(&self) -> u64 {
        self.sections.iter().map(|(_, data)| data.len() as u64).sum()
    }
    fn read_at(&self, _offset: u64, _len: usize) -> runic_dwarf::Result<Vec<u8>> {
        Ok(Vec::new())
    }
    fn endianness(&self) -> Endian {
        Endian::Little
    }
    fn pointer_size(&self) -> u8 {
        self.pointer_size
    }
    fn machine_type(&self) -> u16 {
        62 // EM_X86_64
    }
    fn section_count(&self) -> usize {
        self.sections.len()
    }
    fn section_info(&self, index: usize) -> runic_dwarf::Result<SectionInfo> {
        Ok(self.sections[index].0.clone())
    }
    fn load_section(&self, index: usize) -> runic_dwarf::Result<Vec<u8>> {
        Ok(self.sections[index].1.clone())
    }
    fn relocations_for(&self, _index: usize) -> runic_dwarf::Result<Vec<RelocEntry>> {
        Ok(Vec::new())
    }
}

#[test]
fn test_session_from_custom_reader() {
    let (abbrev, info) = two_die_sections();
    let section = |name: &str, data: Vec<u8>| {
        (
            SectionInfo {
                name: name.into(),
                size: data.len() as u64,
                address: 0,
                link: 0,
                flags: 0,
                entry_size: 0,
            },
            data,
        )
    };

    let reader = MemoryReader {
        pointer_size: 8,
        sections: vec![
            section(".debug_abbrev", abbrev),
            section(".debug_info", info),
        ],
    };

    let session = DwarfSession::from_reader(&reader, GroupChoice::Any).unwrap();
    assert_eq!(session.unit_count(), 1);
    assert_eq!(session.arch(), Arch::Amd64);

    let root = session.unit(0).unwrap().root_die();
    assert_eq!(root.attr_string(DW_AT_name).unwrap(), Some(&b"test.c"[..]));
}

#[test]
fn test_custom_reader_rejects_bad_pointer_size() {
    let reader = MemoryReader {
        pointer_size: 3,
        sections: vec![],
    };
    let err = DwarfSession::from_reader(&reader, GroupChoice::Any).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OffsetSize);
}

// ---------------------------------------------------------------------
// Group selection end to end
// ---------------------------------------------------------------------

#[test]
fn test_group_selection_on_elf() {
    let (abbrev, info) = two_die_sections();
    let elf = build_elf64(&[
        (".debug_abbrev", abbrev.clone()),
        (".debug_info", info.clone()),
        (".debug_abbrev.dwo", abbrev),
        (".debug_info.dwo", info),
    ]);
    let object = Object::parse(&elf).unwrap();

    let base = DwarfSession::from_object(&object, GroupChoice::Base).unwrap();
    assert_eq!(base.unit_count(), 1);

    let dwo = DwarfSession::from_object(&object, GroupChoice::Dwo).unwrap();
    assert_eq!(dwo.unit_count(), 1);

    // With ANY, the base group's sections win the registry slots but both
    // groups' members were admitted.
    let any = DwarfSession::from_object(&object, GroupChoice::Any).unwrap();
    assert!(any.has_units());

    let nothing = DwarfSession::from_object(&object, GroupChoice::Numbered(9)).unwrap();
    assert_eq!(nothing.unit_count(), 0);
}
