use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hash::ContentHash;

/// A reference-counted byte blob handed out by the hash store.
///
/// Holding a clone keeps the bytes alive for as long as the caller needs
/// them; there is no separate scope object to close.
pub type Blob = Arc<[u8]>;

/// The content-addressed store the cache reads machine code from and
/// submits rendered disassembly text to.
///
/// Keys are stable identifiers chosen by producers; each key remembers its
/// current and its previous content hash so that consumers can fall back to
/// a one-revision-stale blob while a fresh one is still materializing.
pub trait HashStore: Send + Sync + 'static {
    /// Fingerprints `data` without storing it.
    fn hash_from_data(&self, data: &[u8]) -> ContentHash;

    /// Returns the blob stored under `hash`, if any.
    fn data_from_hash(&self, hash: ContentHash) -> Option<Blob>;

    /// Resolves a key to one of its hash revisions.
    ///
    /// `rewind_idx` 0 is the current revision, 1 the previous one. Returns
    /// [`ContentHash::ZERO`] when the key has no such revision.
    fn hash_from_key(&self, key: ContentHash, rewind_idx: usize) -> ContentHash;

    /// Stores `data` under `key`, returning the content hash it was filed
    /// under. Takes the bytes by value; the previous revision of the key
    /// remains reachable via `rewind_idx == 1`.
    fn submit_data(&self, key: ContentHash, data: Vec<u8>) -> ContentHash;
}

/// How many hash revisions a key retains.
const KEY_HISTORY: usize = 2;

#[derive(Default)]
struct StoreInner {
    blobs: HashMap<ContentHash, Blob>,
    keys: HashMap<ContentHash, [ContentHash; KEY_HISTORY]>,
    submits: u64,
}

/// The in-process [`HashStore`].
#[derive(Default)]
pub struct MemoryHashStore {
    inner: Mutex<StoreInner>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `submit_data` calls served so far.
    pub fn submit_count(&self) -> u64 {
        self.inner.lock().submits
    }
}

impl HashStore for MemoryHashStore {
    fn hash_from_data(&self, data: &[u8]) -> ContentHash {
        ContentHash::of(data)
    }

    fn data_from_hash(&self, hash: ContentHash) -> Option<Blob> {
        self.inner.lock().blobs.get(&hash).cloned()
    }

    fn hash_from_key(&self, key: ContentHash, rewind_idx: usize) -> ContentHash {
        let inner = self.inner.lock();
        match inner.keys.get(&key) {
            Some(history) => history.get(rewind_idx).copied().unwrap_or(ContentHash::ZERO),
            None => ContentHash::ZERO,
        }
    }

    fn submit_data(&self, key: ContentHash, data: Vec<u8>) -> ContentHash {
        let hash = ContentHash::of(&data);
        let mut inner = self.inner.lock();
        inner.blobs.insert(hash, data.into());
        let history = inner.keys.entry(key).or_default();
        if history[0] != hash {
            history[1] = history[0];
            history[0] = hash;
        }
        inner.submits += 1;
        hash
    }
}
