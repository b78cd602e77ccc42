use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Identifies one revision of a debug-info artifact: the path it was
/// produced from, and the minimum producer timestamp that is acceptable.
///
/// Equality is structural, including byte-equality of the path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DbgiKey {
    pub path: String,
    pub min_timestamp: u64,
}

impl DbgiKey {
    pub fn new(path: impl Into<String>, min_timestamp: u64) -> Self {
        DbgiKey {
            path: path.into(),
            min_timestamp,
        }
    }
}

/// One compilation unit: the virtual-offset range it covers and its line
/// table, sorted by ascending `voff_range.start`.
#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub voff_range: Range<u64>,
    pub lines: Vec<LineEntry>,
}

/// One line-table row: the instruction offsets it spans, and the source
/// coordinate they map to. `line_num` is 1-based.
#[derive(Debug, Clone)]
pub struct LineEntry {
    pub voff_range: Range<u64>,
    pub file_idx: u32,
    pub line_num: u32,
}

/// A source file referenced by line tables. The path may be empty when the
/// producer could not normalize one.
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub path: String,
}

/// A named procedure covering a virtual-offset range.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: String,
    pub voff_range: Range<u64>,
}

/// A resolved line lookup. The index pair identifies the line-table row, so
/// two lookups landing on the same row compare equal even when consecutive
/// instructions share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRef {
    pub unit_idx: u32,
    pub line_idx: u32,
    pub file_idx: u32,
    pub line_num: u32,
}

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// A parsed debug-info artifact: unit/line/procedure tables addressable by
/// virtual offset.
///
/// Parses are immutable and shared; `identity` is unique per parse and is
/// what derived artifacts mix into their cache keys to tell two parses of
/// the same path apart.
#[derive(Debug)]
pub struct DebugInfo {
    identity: u64,
    units: Vec<Unit>,
    source_files: Vec<SourceFile>,
    procedures: Vec<Procedure>,
}

impl DebugInfo {
    pub fn new(units: Vec<Unit>, source_files: Vec<SourceFile>, procedures: Vec<Procedure>) -> Self {
        DebugInfo {
            identity: NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed),
            units,
            source_files,
            procedures,
        }
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    /// Resolves a virtual offset to its line-table row, if any unit covers
    /// it.
    pub fn line_for_voff(&self, voff: u64) -> Option<LineRef> {
        let (unit_idx, unit) = self
            .units
            .iter()
            .enumerate()
            .find(|(_, u)| u.voff_range.contains(&voff))?;
        let (line_idx, line) = unit
            .lines
            .iter()
            .enumerate()
            .find(|(_, l)| l.voff_range.contains(&voff))?;
        Some(LineRef {
            unit_idx: unit_idx as u32,
            line_idx: line_idx as u32,
            file_idx: line.file_idx,
            line_num: line.line_num,
        })
    }

    /// The normalized path of a source file, or `""` when the index is out
    /// of range or the producer recorded none.
    pub fn file_path(&self, file_idx: u32) -> &str {
        self.source_files
            .get(file_idx as usize)
            .map(|f| f.path.as_str())
            .unwrap_or("")
    }

    /// The name of the procedure covering a virtual offset. Nameless
    /// procedures resolve to `None`.
    pub fn procedure_for_voff(&self, voff: u64) -> Option<&str> {
        self.procedures
            .iter()
            .find(|p| p.voff_range.contains(&voff))
            .map(|p| p.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Maps a [`DbgiKey`] to a parsed debug-info artifact.
///
/// `None` is the nil parse: the artifact does not exist, is not ready, or
/// did not parse. Consumers degrade their annotations silently in that
/// case.
pub trait DebugInfoService: Send + Sync + 'static {
    fn rdi_from_key(&self, key: &DbgiKey, deadline: Option<Instant>) -> Option<Arc<DebugInfo>>;
}

/// The in-process [`DebugInfoService`]: a keyed table of pre-parsed
/// artifacts, populated by the embedder.
#[derive(Default)]
pub struct MemoryDebugInfoService {
    parses: Mutex<HashMap<DbgiKey, Arc<DebugInfo>>>,
}

impl MemoryDebugInfoService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: DbgiKey, parse: Arc<DebugInfo>) {
        self.parses.lock().insert(key, parse);
    }

    pub fn remove(&self, key: &DbgiKey) {
        self.parses.lock().remove(key);
    }
}

impl DebugInfoService for MemoryDebugInfoService {
    fn rdi_from_key(&self, key: &DbgiKey, _deadline: Option<Instant>) -> Option<Arc<DebugInfo>> {
        self.parses.lock().get(key).cloned()
    }
}
