//! The collaborator services composed by the disassembly cache.
//!
//! The cache core never talks to the file system, a debug-info parser, or a
//! content store directly. It consumes the narrow trait surfaces defined
//! here, and the worker pipeline composes them into a decoding job. Each
//! trait ships with an in-process, in-memory implementation which is what
//! embedders wire up by default and what the test suites build fixtures
//! from.

mod debuginfo;
mod hash;
mod store;
mod text;
mod watch;

pub use debuginfo::{
    DbgiKey, DebugInfo, DebugInfoService, LineEntry, LineRef, MemoryDebugInfoService, Procedure,
    SourceFile, Unit,
};
pub use hash::ContentHash;
pub use store::{Blob, HashStore, MemoryHashStore};
pub use text::{LangKind, MemoryTextService, TextInfo, TextService};
pub use watch::{FileWatcher, MemoryFileWatcher};
