use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;

use dasm_services::{ContentHash, DbgiKey};

use crate::chunklist::InstArray;

/// Instruction-set architecture of a byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Arch {
    X86,
    #[default]
    X64,
}

impl Arch {
    /// Decoder bitness.
    pub fn bit_size(self) -> u32 {
        match self {
            Arch::X86 => 32,
            Arch::X64 => 64,
        }
    }

    pub(crate) fn to_u32(self) -> u32 {
        match self {
            Arch::X86 => 0,
            Arch::X64 => 1,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Option<Arch> {
        match value {
            0 => Some(Arch::X86),
            1 => Some(Arch::X64),
            _ => None,
        }
    }
}

/// Assembly syntax the rendered text uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Syntax {
    #[default]
    Intel,
    Att,
}

impl Syntax {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            Syntax::Intel => 0,
            Syntax::Att => 1,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Option<Syntax> {
        match value {
            0 => Some(Syntax::Intel),
            1 => Some(Syntax::Att),
            _ => None,
        }
    }
}

bitflags! {
    /// Which optional parts a rendered listing interleaves with the
    /// decoder's own mnemonic/operand text.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct StyleFlags: u32 {
        /// A 16-digit upper-case hex address column.
        const ADDRESSES = 1 << 0;
        /// The raw instruction bytes, brace-wrapped and padded.
        const CODE_BYTES = 1 << 1;
        /// A `> path` pseudo-instruction whenever the source file changes.
        const SOURCE_FILE_NAMES = 1 << 2;
        /// A `> text` pseudo-instruction whenever the source line changes.
        const SOURCE_LINES = 1 << 3;
        /// ` (procedure)` suffixes on resolved jump targets.
        const SYMBOL_NAMES = 1 << 4;
    }
}

/// Decoding parameters; together with the content hash they form a cache
/// identity. Equality is structural over every field, including byte
/// equality of the debug-info path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Params {
    /// Virtual address the byte stream is considered to begin at.
    pub vaddr: u64,
    pub arch: Arch,
    pub style_flags: StyleFlags,
    pub syntax: Syntax,
    /// Image base used to convert `vaddr + off` into a debug-info virtual
    /// offset.
    pub base_vaddr: u64,
    pub dbgi_key: DbgiKey,
}

/// One decoded instruction, or a pseudo-instruction carrying a source
/// annotation line.
///
/// `text_range` indexes into the listing's text blob in the hash store.
/// Pseudo-instructions keep all fields zero; their text line still takes a
/// slot in the blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inst {
    pub code_off: u64,
    pub jump_dst_vaddr: u64,
    pub text_range: Range<u32>,
}

/// A fully decoded listing.
///
/// `text_key` is the hash-store key the newline-joined rendering was
/// submitted under; the bytes themselves live in the hash store. Immutable
/// once published; clones share the instruction array.
#[derive(Debug, Clone, Default)]
pub struct Info {
    pub text_key: ContentHash,
    pub insts: Arc<InstArray>,
}

impl Info {
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}
