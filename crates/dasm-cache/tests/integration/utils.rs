use std::sync::Arc;
use std::time::{Duration, Instant};

use dasm_cache::{CacheConfig, DasmCache, Info, Params, Services};
use dasm_services::{
    ContentHash, HashStore, MemoryDebugInfoService, MemoryFileWatcher, MemoryHashStore,
    MemoryTextService,
};

/// The byte pattern used across scenarios: `nop`, `nop`, `ret`.
pub const NOP_NOP_RET: &[u8] = &[0x90, 0x90, 0xC3];

/// A cache wired to in-memory collaborators, with the concrete service
/// handles kept around so tests can drive them.
pub struct TestCache {
    pub cache: DasmCache,
    pub hash_store: Arc<MemoryHashStore>,
    pub debug_info: Arc<MemoryDebugInfoService>,
    pub text: Arc<MemoryTextService>,
    pub watcher: Arc<MemoryFileWatcher>,
}

pub fn test_cache(config: CacheConfig) -> TestCache {
    let hash_store = Arc::new(MemoryHashStore::new());
    let debug_info = Arc::new(MemoryDebugInfoService::new());
    let text = Arc::new(MemoryTextService::new());
    let watcher = Arc::new(MemoryFileWatcher::new());
    let cache = DasmCache::new(
        config,
        Services {
            hash_store: hash_store.clone(),
            debug_info: debug_info.clone(),
            text: text.clone(),
            watcher: watcher.clone(),
        },
    )
    .unwrap();
    TestCache {
        cache,
        hash_store,
        debug_info,
        text,
        watcher,
    }
}

impl TestCache {
    /// Submits machine code to the hash store, keyed by `name`.
    pub fn submit_code(&self, name: &str, code: &[u8]) -> ContentHash {
        self.hash_store
            .submit_data(ContentHash::of(name.as_bytes()), code.to_vec())
    }

    /// Polls the cache until the listing for `(hash, params)` is
    /// published, or panics after `timeout`.
    pub fn wait_for_info(&self, hash: ContentHash, params: &Params, timeout: Duration) -> Info {
        let deadline = Instant::now() + timeout;
        loop {
            let mut scope = self.cache.open_scope();
            let info = self.cache.info_from_hash_params(&mut scope, hash, params);
            scope.close();
            if !info.is_empty() {
                return info;
            }
            assert!(
                Instant::now() < deadline,
                "listing for {hash} was not published within {timeout:?}"
            );
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// The rendered text a published listing refers to.
    pub fn listing_text(&self, info: &Info) -> String {
        let hash = self.hash_store.hash_from_key(info.text_key, 0);
        let blob = self
            .hash_store
            .data_from_hash(hash)
            .expect("listing text was submitted to the hash store");
        String::from_utf8(blob.to_vec()).unwrap()
    }

    /// Waits until `cond` holds, or panics after `timeout`.
    pub fn wait_until(&self, timeout: Duration, cond: impl Fn() -> bool, what: &str) {
        let deadline = Instant::now() + timeout;
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
