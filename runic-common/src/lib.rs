//! Foundational types for the `runic` debug-info crates.
//!
//! This crate carries the pieces that are independent of any particular
//! container or debug format:
//!
//!  - [`ByteView`], a smart pointer over binary data that can be backed by a
//!    borrowed slice, an owned buffer, or a memory mapped file.
//!  - [`SelfCell`] and [`AsSelf`], the machinery that lets a parsed structure
//!    live alongside the buffer it borrows from in a single movable value.
//!  - Plain descriptive enums ([`Arch`], [`Endian`], [`FileFormat`],
//!    [`ObjectKind`]) used across the object front ends.

#![warn(missing_docs)]

mod byteview;
mod cell;
mod types;

pub use crate::byteview::*;
pub use crate::cell::*;
pub use crate::types::*;
