//! Constants defined by the DWARF standard, with their standard spellings.
//!
//! Each constant namespace is a thin newtype over its wire representation.
//! Unknown values coming out of an object file are preserved rather than
//! rejected; consumers match on the known constants and treat the rest as
//! vendor extensions.

#![allow(non_upper_case_globals)]
#![allow(missing_docs)]

use std::fmt;

macro_rules! dw_constants {
    (
        $(#[$meta:meta])*
        $name:ident($ty:ty) {
            $($const_name:ident = $value:expr;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $ty);

        $(
            pub const $const_name: $name = $name($value);
        )+

        impl $name {
            /// Returns the standard spelling of this constant, if it is known.
            pub fn static_string(self) -> Option<&'static str> {
                match self {
                    $($const_name => Some(stringify!($const_name)),)+
                    _ => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.static_string() {
                    Some(s) => f.write_str(s),
                    None => write!(f, concat!(stringify!($name), "({:#x})"), self.0),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

dw_constants! {
    /// The unit type in a DWARF 5 unit header.
    DwUt(u8) {
        DW_UT_compile = 0x01;
        DW_UT_type = 0x02;
        DW_UT_partial = 0x03;
        DW_UT_skeleton = 0x04;
        DW_UT_split_compile = 0x05;
        DW_UT_split_type = 0x06;
        DW_UT_lo_user = 0x80;
    }
}

dw_constants! {
    /// The `DW_CHILDREN` flag in an abbreviation declaration.
    DwChildren(u8) {
        DW_CHILDREN_no = 0x00;
        DW_CHILDREN_yes = 0x01;
    }
}

dw_constants! {
    /// The tag of a debugging information entry.
    DwTag(u16) {
        DW_TAG_array_type = 0x01;
        DW_TAG_class_type = 0x02;
        DW_TAG_entry_point = 0x03;
        DW_TAG_enumeration_type = 0x04;
        DW_TAG_formal_parameter = 0x05;
        DW_TAG_imported_declaration = 0x08;
        DW_TAG_label = 0x0a;
        DW_TAG_lexical_block = 0x0b;
        DW_TAG_member = 0x0d;
        DW_TAG_pointer_type = 0x0f;
        DW_TAG_reference_type = 0x10;
        DW_TAG_compile_unit = 0x11;
        DW_TAG_string_type = 0x12;
        DW_TAG_structure_type = 0x13;
        DW_TAG_subroutine_type = 0x15;
        DW_TAG_typedef = 0x16;
        DW_TAG_union_type = 0x17;
        DW_TAG_unspecified_parameters = 0x18;
        DW_TAG_variant = 0x19;
        DW_TAG_common_block = 0x1a;
        DW_TAG_common_inclusion = 0x1b;
        DW_TAG_inheritance = 0x1c;
        DW_TAG_inlined_subroutine = 0x1d;
        DW_TAG_module = 0x1e;
        DW_TAG_ptr_to_member_type = 0x1f;
        DW_TAG_set_type = 0x20;
        DW_TAG_subrange_type = 0x21;
        DW_TAG_with_stmt = 0x22;
        DW_TAG_access_declaration = 0x23;
        DW_TAG_base_type = 0x24;
        DW_TAG_catch_block = 0x25;
        DW_TAG_const_type = 0x26;
        DW_TAG_constant = 0x27;
        DW_TAG_enumerator = 0x28;
        DW_TAG_file_type = 0x29;
        DW_TAG_friend = 0x2a;
        DW_TAG_namelist = 0x2b;
        DW_TAG_namelist_item = 0x2c;
        DW_TAG_packed_type = 0x2d;
        DW_TAG_subprogram = 0x2e;
        DW_TAG_template_type_parameter = 0x2f;
        DW_TAG_template_value_parameter = 0x30;
        DW_TAG_thrown_type = 0x31;
        DW_TAG_try_block = 0x32;
        DW_TAG_variant_part = 0x33;
        DW_TAG_variable = 0x34;
        DW_TAG_volatile_type = 0x35;
        DW_TAG_dwarf_procedure = 0x36;
        DW_TAG_restrict_type = 0x37;
        DW_TAG_interface_type = 0x38;
        DW_TAG_namespace = 0x39;
        DW_TAG_imported_module = 0x3a;
        DW_TAG_unspecified_type = 0x3b;
        DW_TAG_partial_unit = 0x3c;
        DW_TAG_imported_unit = 0x3d;
        DW_TAG_condition = 0x3f;
        DW_TAG_shared_type = 0x40;
        DW_TAG_type_unit = 0x41;
        DW_TAG_rvalue_reference_type = 0x42;
        DW_TAG_template_alias = 0x43;
        DW_TAG_coarray_type = 0x44;
        DW_TAG_generic_subrange = 0x45;
        DW_TAG_dynamic_type = 0x46;
        DW_TAG_atomic_type = 0x47;
        DW_TAG_call_site = 0x48;
        DW_TAG_call_site_parameter = 0x49;
        DW_TAG_skeleton_unit = 0x4a;
        DW_TAG_immutable_type = 0x4b;
        DW_TAG_lo_user = 0x4080;
        DW_TAG_GNU_call_site = 0x4109;
        DW_TAG_GNU_call_site_parameter = 0x410a;
        DW_TAG_hi_user = 0xffff;
    }
}

dw_constants! {
    /// The attribute name in an abbreviation declaration.
    DwAt(u16) {
        DW_AT_sibling = 0x01;
        DW_AT_location = 0x02;
        DW_AT_name = 0x03;
        DW_AT_ordering = 0x09;
        DW_AT_byte_size = 0x0b;
        DW_AT_bit_offset = 0x0c;
        DW_AT_bit_size = 0x0d;
        DW_AT_stmt_list = 0x10;
        DW_AT_low_pc = 0x11;
        DW_AT_high_pc = 0x12;
        DW_AT_language = 0x13;
        DW_AT_discr = 0x15;
        DW_AT_discr_value = 0x16;
        DW_AT_visibility = 0x17;
        DW_AT_import = 0x18;
        DW_AT_string_length = 0x19;
        DW_AT_common_reference = 0x1a;
        DW_AT_comp_dir = 0x1b;
        DW_AT_const_value = 0x1c;
        DW_AT_containing_type = 0x1d;
        DW_AT_default_value = 0x1e;
        DW_AT_inline = 0x20;
        DW_AT_is_optional = 0x21;
        DW_AT_lower_bound = 0x22;
        DW_AT_producer = 0x25;
        DW_AT_prototyped = 0x27;
        DW_AT_return_addr = 0x2a;
        DW_AT_start_scope = 0x2c;
        DW_AT_bit_stride = 0x2e;
        DW_AT_upper_bound = 0x2f;
        DW_AT_abstract_origin = 0x31;
        DW_AT_accessibility = 0x32;
        DW_AT_address_class = 0x33;
        DW_AT_artificial = 0x34;
        DW_AT_base_types = 0x35;
        DW_AT_calling_convention = 0x36;
        DW_AT_count = 0x37;
        DW_AT_data_member_location = 0x38;
        DW_AT_decl_column = 0x39;
        DW_AT_decl_file = 0x3a;
        DW_AT_decl_line = 0x3b;
        DW_AT_declaration = 0x3c;
        DW_AT_discr_list = 0x3d;
        DW_AT_encoding = 0x3e;
        DW_AT_external = 0x3f;
        DW_AT_frame_base = 0x40;
        DW_AT_friend = 0x41;
        DW_AT_identifier_case = 0x42;
        DW_AT_macro_info = 0x43;
        DW_AT_namelist_item = 0x44;
        DW_AT_priority = 0x45;
        DW_AT_segment = 0x46;
        DW_AT_specification = 0x47;
        DW_AT_static_link = 0x48;
        DW_AT_type = 0x49;
        DW_AT_use_location = 0x4a;
        DW_AT_variable_parameter = 0x4b;
        DW_AT_virtuality = 0x4c;
        DW_AT_vtable_elem_location = 0x4d;
        DW_AT_allocated = 0x4e;
        DW_AT_associated = 0x4f;
        DW_AT_data_location = 0x50;
        DW_AT_byte_stride = 0x51;
        DW_AT_entry_pc = 0x52;
        DW_AT_use_UTF8 = 0x53;
        DW_AT_extension = 0x54;
        DW_AT_ranges = 0x55;
        DW_AT_trampoline = 0x56;
        DW_AT_call_column = 0x57;
        DW_AT_call_file = 0x58;
        DW_AT_call_line = 0x59;
        DW_AT_description = 0x5a;
        DW_AT_binary_scale = 0x5b;
        DW_AT_decimal_scale = 0x5c;
        DW_AT_small = 0x5d;
        DW_AT_decimal_sign = 0x5e;
        DW_AT_digit_count = 0x5f;
        DW_AT_picture_string = 0x60;
        DW_AT_mutable = 0x61;
        DW_AT_threads_scaled = 0x62;
        DW_AT_explicit = 0x63;
        DW_AT_object_pointer = 0x64;
        DW_AT_endianity = 0x65;
        DW_AT_elemental = 0x66;
        DW_AT_pure = 0x67;
        DW_AT_recursive = 0x68;
        DW_AT_signature = 0x69;
        DW_AT_main_subprogram = 0x6a;
        DW_AT_data_bit_offset = 0x6b;
        DW_AT_const_expr = 0x6c;
        DW_AT_enum_class = 0x6d;
        DW_AT_linkage_name = 0x6e;
        DW_AT_string_length_bit_size = 0x6f;
        DW_AT_string_length_byte_size = 0x70;
        DW_AT_rank = 0x71;
        DW_AT_str_offsets_base = 0x72;
        DW_AT_addr_base = 0x73;
        DW_AT_rnglists_base = 0x74;
        DW_AT_dwo_name = 0x76;
        DW_AT_reference = 0x77;
        DW_AT_rvalue_reference = 0x78;
        DW_AT_macros = 0x79;
        DW_AT_call_all_calls = 0x7a;
        DW_AT_call_all_source_calls = 0x7b;
        DW_AT_call_all_tail_calls = 0x7c;
        DW_AT_call_return_pc = 0x7d;
        DW_AT_call_value = 0x7e;
        DW_AT_call_origin = 0x7f;
        DW_AT_call_parameter = 0x80;
        DW_AT_call_pc = 0x81;
        DW_AT_call_tail_call = 0x82;
        DW_AT_call_target = 0x83;
        DW_AT_call_target_clobbered = 0x84;
        DW_AT_call_data_location = 0x85;
        DW_AT_call_data_value = 0x86;
        DW_AT_noreturn = 0x87;
        DW_AT_alignment = 0x88;
        DW_AT_export_symbols = 0x89;
        DW_AT_deleted = 0x8a;
        DW_AT_defaulted = 0x8b;
        DW_AT_loclists_base = 0x8c;
        DW_AT_lo_user = 0x2000;
        DW_AT_MIPS_linkage_name = 0x2007;
        DW_AT_GNU_dwo_name = 0x2130;
        DW_AT_GNU_dwo_id = 0x2131;
        DW_AT_GNU_ranges_base = 0x2132;
        DW_AT_GNU_addr_base = 0x2133;
        DW_AT_GNU_pubnames = 0x2134;
        DW_AT_GNU_pubtypes = 0x2135;
        DW_AT_hi_user = 0x3fff;
    }
}

dw_constants! {
    /// The form (value encoding) of an attribute.
    DwForm(u16) {
        DW_FORM_addr = 0x01;
        DW_FORM_block2 = 0x03;
        DW_FORM_block4 = 0x04;
        DW_FORM_data2 = 0x05;
        DW_FORM_data4 = 0x06;
        DW_FORM_data8 = 0x07;
        DW_FORM_string = 0x08;
        DW_FORM_block = 0x09;
        DW_FORM_block1 = 0x0a;
        DW_FORM_data1 = 0x0b;
        DW_FORM_flag = 0x0c;
        DW_FORM_sdata = 0x0d;
        DW_FORM_strp = 0x0e;
        DW_FORM_udata = 0x0f;
        DW_FORM_ref_addr = 0x10;
        DW_FORM_ref1 = 0x11;
        DW_FORM_ref2 = 0x12;
        DW_FORM_ref4 = 0x13;
        DW_FORM_ref8 = 0x14;
        DW_FORM_ref_udata = 0x15;
        DW_FORM_indirect = 0x16;
        DW_FORM_sec_offset = 0x17;
        DW_FORM_exprloc = 0x18;
        DW_FORM_flag_present = 0x19;
        DW_FORM_strx = 0x1a;
        DW_FORM_addrx = 0x1b;
        DW_FORM_ref_sup4 = 0x1c;
        DW_FORM_strp_sup = 0x1d;
        DW_FORM_data16 = 0x1e;
        DW_FORM_line_strp = 0x1f;
        DW_FORM_ref_sig8 = 0x20;
        DW_FORM_implicit_const = 0x21;
        DW_FORM_loclistx = 0x22;
        DW_FORM_rnglistx = 0x23;
        DW_FORM_ref_sup8 = 0x24;
        DW_FORM_strx1 = 0x25;
        DW_FORM_strx2 = 0x26;
        DW_FORM_strx3 = 0x27;
        DW_FORM_strx4 = 0x28;
        DW_FORM_addrx1 = 0x29;
        DW_FORM_addrx2 = 0x2a;
        DW_FORM_addrx3 = 0x2b;
        DW_FORM_addrx4 = 0x2c;
        DW_FORM_GNU_addr_index = 0x1f01;
        DW_FORM_GNU_str_index = 0x1f02;
        DW_FORM_GNU_ref_alt = 0x1f20;
        DW_FORM_GNU_strp_alt = 0x1f21;
    }
}

dw_constants! {
    /// A standard opcode in a line number program.
    DwLns(u8) {
        DW_LNS_copy = 0x01;
        DW_LNS_advance_pc = 0x02;
        DW_LNS_advance_line = 0x03;
        DW_LNS_set_file = 0x04;
        DW_LNS_set_column = 0x05;
        DW_LNS_negate_stmt = 0x06;
        DW_LNS_set_basic_block = 0x07;
        DW_LNS_const_add_pc = 0x08;
        DW_LNS_fixed_advance_pc = 0x09;
        DW_LNS_set_prologue_end = 0x0a;
        DW_LNS_set_epilogue_begin = 0x0b;
        DW_LNS_set_isa = 0x0c;
    }
}

dw_constants! {
    /// An extended opcode in a line number program.
    DwLne(u8) {
        DW_LNE_end_sequence = 0x01;
        DW_LNE_set_address = 0x02;
        DW_LNE_define_file = 0x03;
        DW_LNE_set_discriminator = 0x04;
        DW_LNE_lo_user = 0x80;
        DW_LNE_hi_user = 0xff;
    }
}

dw_constants! {
    /// A content type code in a DWARF 5 line program header.
    DwLnct(u16) {
        DW_LNCT_path = 0x01;
        DW_LNCT_directory_index = 0x02;
        DW_LNCT_timestamp = 0x03;
        DW_LNCT_size = 0x04;
        DW_LNCT_MD5 = 0x05;
        DW_LNCT_lo_user = 0x2000;
        DW_LNCT_hi_user = 0x3fff;
    }
}

dw_constants! {
    /// A call frame instruction opcode.
    ///
    /// The three primary opcodes carry an operand in their low six bits; only
    /// the high two bits are stored here for those.
    DwCfa(u8) {
        DW_CFA_nop = 0x00;
        DW_CFA_set_loc = 0x01;
        DW_CFA_advance_loc1 = 0x02;
        DW_CFA_advance_loc2 = 0x03;
        DW_CFA_advance_loc4 = 0x04;
        DW_CFA_offset_extended = 0x05;
        DW_CFA_restore_extended = 0x06;
        DW_CFA_undefined = 0x07;
        DW_CFA_same_value = 0x08;
        DW_CFA_register = 0x09;
        DW_CFA_remember_state = 0x0a;
        DW_CFA_restore_state = 0x0b;
        DW_CFA_def_cfa = 0x0c;
        DW_CFA_def_cfa_register = 0x0d;
        DW_CFA_def_cfa_offset = 0x0e;
        DW_CFA_def_cfa_expression = 0x0f;
        DW_CFA_expression = 0x10;
        DW_CFA_offset_extended_sf = 0x11;
        DW_CFA_def_cfa_sf = 0x12;
        DW_CFA_def_cfa_offset_sf = 0x13;
        DW_CFA_val_offset = 0x14;
        DW_CFA_val_offset_sf = 0x15;
        DW_CFA_val_expression = 0x16;
        DW_CFA_advance_loc = 0x40;
        DW_CFA_offset = 0x80;
        DW_CFA_restore = 0xc0;
        DW_CFA_MIPS_advance_loc8 = 0x1d;
        DW_CFA_GNU_window_save = 0x2d;
        DW_CFA_GNU_args_size = 0x2e;
        DW_CFA_GNU_negative_offset_extended = 0x2f;
    }
}

dw_constants! {
    /// A range list entry kind in `.debug_rnglists`.
    DwRle(u8) {
        DW_RLE_end_of_list = 0x00;
        DW_RLE_base_addressx = 0x01;
        DW_RLE_startx_endx = 0x02;
        DW_RLE_startx_length = 0x03;
        DW_RLE_offset_pair = 0x04;
        DW_RLE_base_address = 0x05;
        DW_RLE_start_end = 0x06;
        DW_RLE_start_length = 0x07;
    }
}

dw_constants! {
    /// A location list entry kind in `.debug_loclists`.
    DwLle(u8) {
        DW_LLE_end_of_list = 0x00;
        DW_LLE_base_addressx = 0x01;
        DW_LLE_startx_endx = 0x02;
        DW_LLE_startx_length = 0x03;
        DW_LLE_offset_pair = 0x04;
        DW_LLE_default_location = 0x05;
        DW_LLE_base_address = 0x06;
        DW_LLE_start_end = 0x07;
        DW_LLE_start_length = 0x08;
    }
}

/// Pointer encodings used by `.eh_frame` augmentation data.
///
/// These combine a value format in the low nibble with an application
/// modifier in the high nibble, so they are plain bit constants rather than
/// an exhaustive namespace.
pub mod eh_pe {
    pub const DW_EH_PE_absptr: u8 = 0x00;
    pub const DW_EH_PE_uleb128: u8 = 0x01;
    pub const DW_EH_PE_udata2: u8 = 0x02;
    pub const DW_EH_PE_udata4: u8 = 0x03;
    pub const DW_EH_PE_udata8: u8 = 0x04;
    pub const DW_EH_PE_sleb128: u8 = 0x09;
    pub const DW_EH_PE_sdata2: u8 = 0x0a;
    pub const DW_EH_PE_sdata4: u8 = 0x0b;
    pub const DW_EH_PE_sdata8: u8 = 0x0c;

    pub const DW_EH_PE_pcrel: u8 = 0x10;
    pub const DW_EH_PE_textrel: u8 = 0x20;
    pub const DW_EH_PE_datarel: u8 = 0x30;
    pub const DW_EH_PE_funcrel: u8 = 0x40;
    pub const DW_EH_PE_aligned: u8 = 0x50;

    pub const DW_EH_PE_indirect: u8 = 0x80;
    pub const DW_EH_PE_omit: u8 = 0xff;

    /// Mask selecting the value format bits.
    pub const DW_EH_PE_format_mask: u8 = 0x0f;
    /// Mask selecting the application modifier bits.
    pub const DW_EH_PE_application_mask: u8 = 0x70;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_strings() {
        assert_eq!(
            DW_TAG_compile_unit.static_string(),
            Some("DW_TAG_compile_unit")
        );
        assert_eq!(DwTag(0x7777).static_string(), None);
        assert_eq!(format!("{}", DW_FORM_strx3), "DW_FORM_strx3");
        assert_eq!(format!("{:?}", DwAt(0x2fff)), "DwAt(0x2fff)");
    }

    #[test]
    fn test_known_values() {
        assert_eq!(DW_TAG_compile_unit.0, 0x11);
        assert_eq!(DW_TAG_subprogram.0, 0x2e);
        assert_eq!(DW_FORM_implicit_const.0, 0x21);
        assert_eq!(DW_UT_split_compile.0, 0x05);
    }
}
