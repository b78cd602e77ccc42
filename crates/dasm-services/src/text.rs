use std::collections::HashMap;
use std::ops::Range;

use parking_lot::Mutex;

use crate::hash::ContentHash;

/// Source language of a tokenized file. Decoders only pass this through;
/// it selects tokenization rules inside the text service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LangKind {
    #[default]
    Unknown,
    C,
    Cpp,
    Rust,
}

/// Per-line byte ranges of a tokenized source file, indexing into the
/// file's blob in the hash store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInfo {
    pub lines_count: u64,
    pub lines_ranges: Vec<Range<u64>>,
}

impl TextInfo {
    /// Tokenizes a file into newline-separated line ranges.
    pub fn from_source(data: &[u8]) -> Self {
        let mut ranges = Vec::new();
        let mut start = 0u64;
        for (idx, byte) in data.iter().enumerate() {
            if *byte == b'\n' {
                ranges.push(start..idx as u64);
                start = idx as u64 + 1;
            }
        }
        ranges.push(start..data.len() as u64);
        TextInfo {
            lines_count: ranges.len() as u64,
            lines_ranges: ranges,
        }
    }

    /// The byte range of a 1-based line number, when in bounds.
    pub fn line_range(&self, line_num: u64) -> Option<Range<u64>> {
        if line_num == 0 || line_num >= self.lines_count {
            return None;
        }
        self.lines_ranges.get(line_num as usize - 1).cloned()
    }
}

/// Tokenized views of source files, keyed by file-system key.
///
/// `text_info_from_key_lang` returns `None` while a file has not been
/// loaded and tokenized yet; callers poll, bounded by their own patience.
pub trait TextService: Send + Sync + 'static {
    fn text_info_from_key_lang(
        &self,
        key: ContentHash,
        lang: LangKind,
    ) -> Option<(ContentHash, TextInfo)>;

    /// The stable key a path's content is filed under.
    fn fs_key_from_path(&self, path: &str) -> ContentHash {
        ContentHash::of(path.as_bytes())
    }

    fn lang_kind_from_extension(&self, path: &str) -> LangKind {
        match path.rsplit_once('.').map(|(_, ext)| ext) {
            Some("c") | Some("h") => LangKind::C,
            Some("cc") | Some("cpp") | Some("cxx") | Some("hpp") => LangKind::Cpp,
            Some("rs") => LangKind::Rust,
            _ => LangKind::Unknown,
        }
    }
}

/// The in-process [`TextService`]: a keyed table of (content hash, line
/// ranges), populated by the embedder alongside the hash store.
#[derive(Default)]
pub struct MemoryTextService {
    files: Mutex<HashMap<ContentHash, (ContentHash, TextInfo)>>,
}

impl MemoryTextService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tokenized file under its file-system key.
    pub fn insert(&self, key: ContentHash, hash: ContentHash, info: TextInfo) {
        self.files.lock().insert(key, (hash, info));
    }
}

impl TextService for MemoryTextService {
    fn text_info_from_key_lang(
        &self,
        key: ContentHash,
        _lang: LangKind,
    ) -> Option<(ContentHash, TextInfo)> {
        self.files.lock().get(&key).cloned()
    }
}
