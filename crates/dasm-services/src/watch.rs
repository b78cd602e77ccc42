use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// The file-system change feed.
///
/// `change_gen` is a monotonic counter bumped on any observed mutation;
/// two equal readings mean no relevant change happened in between.
pub trait FileWatcher: Send + Sync + 'static {
    fn change_gen(&self) -> u64;

    /// Modification time of a path in microseconds, 0 when the file does
    /// not exist.
    fn file_modified_us(&self, path: &str) -> u64;
}

/// The in-process [`FileWatcher`], driven by the embedder.
pub struct MemoryFileWatcher {
    change_gen: AtomicU64,
    files: Mutex<HashMap<String, u64>>,
}

impl Default for MemoryFileWatcher {
    fn default() -> Self {
        MemoryFileWatcher {
            change_gen: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryFileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observed file-system mutation.
    pub fn bump_change_gen(&self) -> u64 {
        self.change_gen.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_file_modified(&self, path: impl Into<String>, modified_us: u64) {
        self.files.lock().insert(path.into(), modified_us);
    }
}

impl FileWatcher for MemoryFileWatcher {
    fn change_gen(&self) -> u64 {
        self.change_gen.load(Ordering::SeqCst)
    }

    fn file_modified_us(&self, path: &str) -> u64 {
        self.files.lock().get(path).copied().unwrap_or(0)
    }
}
