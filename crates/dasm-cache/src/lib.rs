//! # Concurrent evicting disassembly cache
//!
//! This crate caches disassembled machine-code listings keyed by
//! `(content hash, decode params)`. Lookups never wait on a decode: a miss
//! creates a placeholder node, enqueues a work order for the worker pool,
//! and returns an empty [`Info`]; callers poll on their next pass and pick
//! up the published listing once a worker has materialized it.
//!
//! ## Anatomy
//!
//! - A striped index shards a fixed slot array over one read-write lock
//!   per logical CPU. Hits only take a read lock.
//! - A [`Scope`] pins every node it returned a hit from. The background
//!   evictor never reclaims a pinned node, so an `Info` captured from a
//!   hit stays valid for the life of the scope.
//! - A bounded byte ring carries variable-length work orders from
//!   requesters to the worker pool.
//! - Workers compose the collaborator services (content store, debug-info
//!   parser, file watcher, text service) into a decode job and publish
//!   the result into the owning node.
//! - The evictor reclaims entries that have been idle on both the wall
//!   clock and the user clock, and re-requests entries whose source
//!   annotations went stale under file-system changes.
//!
//! Decode problems are never surfaced to lookup callers: a failed or
//! partial decode publishes a shorter (possibly empty) listing, and
//! missing debug info just degrades the annotations.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dasm_cache::{CacheConfig, DasmCache, Params, Services, StyleFlags};
//! use dasm_services::{
//!     ContentHash, HashStore, MemoryDebugInfoService, MemoryFileWatcher, MemoryHashStore,
//!     MemoryTextService,
//! };
//!
//! let hash_store = Arc::new(MemoryHashStore::new());
//! let code = hash_store.submit_data(ContentHash::of(b"module"), vec![0x90, 0xC3]);
//! let cache = DasmCache::new(
//!     CacheConfig::default(),
//!     Services {
//!         hash_store,
//!         debug_info: Arc::new(MemoryDebugInfoService::new()),
//!         text: Arc::new(MemoryTextService::new()),
//!         watcher: Arc::new(MemoryFileWatcher::new()),
//!     },
//! )
//! .unwrap();
//!
//! let mut scope = cache.open_scope();
//! let params = Params {
//!     vaddr: 0x1000,
//!     style_flags: StyleFlags::ADDRESSES,
//!     ..Default::default()
//! };
//! let info = cache.info_from_hash_params(&mut scope, code, &params);
//! assert!(info.is_empty()); // first call misses; poll again later
//! ```

mod chunklist;
pub mod config;
mod evictor;
mod index;
pub mod logging;
mod ring;
mod scope;
mod types;
mod utils;
mod worker;

pub use chunklist::{InstArray, InstChunkList};
pub use config::CacheConfig;
pub use scope::Scope;
pub use types::{Arch, Info, Inst, Params, StyleFlags, Syntax};

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use dasm_services::{ContentHash, DebugInfoService, FileWatcher, HashStore, TextService};

use crate::index::CacheIndex;
use crate::ring::{WorkQueue, MIN_RING_SIZE};

/// The collaborator services a cache composes into decode jobs.
#[derive(Clone)]
pub struct Services {
    pub hash_store: Arc<dyn HashStore>,
    pub debug_info: Arc<dyn DebugInfoService>,
    pub text: Arc<dyn TextService>,
    pub watcher: Arc<dyn FileWatcher>,
}

/// Construction-time failures. Lookups themselves are infallible.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("slots_count must be non-zero")]
    NoSlots,
    #[error("workers must be non-zero")]
    NoWorkers,
    #[error("ring_size must be at least {MIN_RING_SIZE} bytes, got {0}")]
    RingTooSmall(usize),
    #[error("failed to spawn cache thread")]
    ThreadSpawn(#[source] io::Error),
}

/// State shared between the cache handle, the worker pool, and the
/// evictor.
pub(crate) struct Shared {
    pub(crate) config: CacheConfig,
    pub(crate) services: Services,
    pub(crate) index: CacheIndex,
    pub(crate) queue: WorkQueue,
    pub(crate) user_clock: AtomicU64,
}

/// Point-in-time occupancy counters, mostly useful for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Nodes currently linked into the index.
    pub live_nodes: usize,
    /// Reclaimed node shells waiting on stripe free-lists.
    pub free_shells: usize,
    pub stripes: usize,
}

/// The cache handle.
///
/// Construction spawns the worker pool and the evictor; the handle, the
/// threads, and every open [`Scope`] share one set of structures.
pub struct DasmCache {
    shared: Arc<Shared>,
}

impl DasmCache {
    pub fn new(config: CacheConfig, services: Services) -> Result<DasmCache, CacheError> {
        if config.slots_count == 0 {
            return Err(CacheError::NoSlots);
        }
        if config.workers == 0 {
            return Err(CacheError::NoWorkers);
        }
        if config.ring_size < MIN_RING_SIZE {
            return Err(CacheError::RingTooSmall(config.ring_size));
        }

        let stripes_count = config.stripes_count();
        let shared = Arc::new(Shared {
            index: CacheIndex::new(config.slots_count, stripes_count),
            queue: WorkQueue::new(config.ring_size),
            user_clock: AtomicU64::new(0),
            services,
            config,
        });

        for idx in 0..shared.config.workers {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("dasm-worker-{idx}"))
                .spawn(move || worker::run(shared))
                .map_err(CacheError::ThreadSpawn)?;
        }
        {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("dasm-evictor".into())
                .spawn(move || evictor::run(shared))
                .map_err(CacheError::ThreadSpawn)?;
        }

        tracing::info!(
            slots = shared.config.slots_count,
            stripes = stripes_count,
            workers = shared.config.workers,
            "disassembly cache started"
        );
        Ok(DasmCache { shared })
    }

    /// Opens an access region. Hits made through it stay valid until it is
    /// closed or dropped.
    pub fn open_scope(&self) -> Scope<'_> {
        Scope::new(&self.shared)
    }

    /// Advances the activity-based age axis; typically called once per UI
    /// frame.
    pub fn user_clock_tick(&self) {
        self.shared.user_clock.fetch_add(1, Ordering::SeqCst);
    }

    pub fn user_clock_idx(&self) -> u64 {
        self.shared.user_clock.load(Ordering::SeqCst)
    }

    /// Looks up the listing for `(hash, params)`.
    ///
    /// A hit returns the published [`Info`] and pins its node on `scope`.
    /// A miss creates a placeholder, submits a work order, and returns an
    /// empty `Info`; poll again once the worker pool has had a chance to
    /// run. The zero hash always resolves to an empty `Info`.
    pub fn info_from_hash_params(
        &self,
        scope: &mut Scope<'_>,
        hash: ContentHash,
        params: &Params,
    ) -> Info {
        if hash.is_zero() {
            return Info::default();
        }
        let (stripe, local_slot) = self.shared.index.stripe_for_hash(hash);

        let mut info = Info::default();
        let mut found = false;
        {
            let state = stripe.state.read();
            if let Some(idx) = state.find(local_slot, hash, params) {
                let node = state.node(idx);
                if let Some(node_info) = &node.info {
                    info = node_info.clone();
                }
                scope.touch(node);
                found = true;
            }
        }

        let mut node_is_new = false;
        if !found {
            let mut state = stripe.state.write();
            if state.find(local_slot, hash, params).is_none() {
                tracing::debug!(
                    %hash,
                    vaddr = params.vaddr,
                    arch = ?params.arch,
                    style_flags = ?params.style_flags,
                    syntax = ?params.syntax,
                    base_vaddr = params.base_vaddr,
                    dbgi_path = %params.dbgi_key.path,
                    dbgi_min_timestamp = params.dbgi_key.min_timestamp,
                    "cache miss, creating node"
                );
                state.insert(local_slot, hash, params.clone());
                node_is_new = true;
            }
        }
        if node_is_new {
            self.shared.queue.enqueue(hash, params, None);
        }
        info
    }

    /// Key-based lookup: resolves `key` through the hash store's revision
    /// history (current, then one back) and returns the first revision
    /// with a non-empty listing. The matching hash is written to
    /// `out_hash`.
    pub fn info_from_key_params(
        &self,
        scope: &mut Scope<'_>,
        key: ContentHash,
        params: &Params,
        mut out_hash: Option<&mut ContentHash>,
    ) -> Info {
        let mut info = Info::default();
        for rewind_idx in 0..2 {
            let hash = self
                .shared
                .services
                .hash_store
                .hash_from_key(key, rewind_idx);
            info = self.info_from_hash_params(scope, hash, params);
            if !info.is_empty() {
                if let Some(out) = out_hash.as_deref_mut() {
                    *out = hash;
                }
                break;
            }
        }
        info
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            stripes: self.shared.index.stripes().len(),
            ..Default::default()
        };
        for stripe in self.shared.index.stripes() {
            let state = stripe.state.read();
            stats.live_nodes += state.live_count();
            stats.free_shells += state.free_count();
        }
        stats
    }
}
