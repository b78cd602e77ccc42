use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use dasm_services::ContentHash;

use crate::types::{Info, Params};

/// One cache entry.
///
/// Identity is `(hash, params)`; two nodes with equal identity never
/// coexist. `info` and `change_gen` are written only under the owning
/// stripe's write lock. The atomic fields are updated by readers holding
/// only the read lock, so concurrent hits on one node never block each
/// other.
pub(crate) struct Node {
    pub hash: ContentHash,
    pub params: Params,
    pub info: Option<Info>,
    pub change_gen: u64,
    prev: Option<u32>,
    next: Option<u32>,
    pub is_working: AtomicBool,
    pub scope_ref_count: AtomicU64,
    pub load_count: AtomicU64,
    pub last_time_touched_us: AtomicU64,
    pub last_user_clock_idx_touched: AtomicU64,
    pub last_time_requested_us: AtomicU64,
    pub last_user_clock_idx_requested: AtomicU64,
}

impl Node {
    fn empty() -> Self {
        Node {
            hash: ContentHash::ZERO,
            params: Params::default(),
            info: None,
            change_gen: 0,
            prev: None,
            next: None,
            is_working: AtomicBool::new(false),
            scope_ref_count: AtomicU64::new(0),
            load_count: AtomicU64::new(0),
            last_time_touched_us: AtomicU64::new(0),
            last_user_clock_idx_touched: AtomicU64::new(0),
            last_time_requested_us: AtomicU64::new(0),
            last_user_clock_idx_requested: AtomicU64::new(0),
        }
    }

    fn reset(&mut self, hash: ContentHash, params: Params) {
        self.hash = hash;
        self.params = params;
        self.info = None;
        self.change_gen = 0;
        self.prev = None;
        self.next = None;
        self.is_working.store(false, Ordering::SeqCst);
        self.scope_ref_count.store(0, Ordering::SeqCst);
        self.load_count.store(0, Ordering::SeqCst);
        self.last_time_touched_us.store(0, Ordering::Relaxed);
        self.last_user_clock_idx_touched.store(0, Ordering::Relaxed);
        self.last_time_requested_us.store(0, Ordering::Relaxed);
        self.last_user_clock_idx_requested.store(0, Ordering::Relaxed);
    }
}

/// A doubly-linked list of node indices, one per slot.
#[derive(Debug, Clone, Copy, Default)]
struct SlotList {
    first: Option<u32>,
    last: Option<u32>,
}

/// The state guarded by one stripe lock: a slab of node shells, the
/// free-list of reclaimed shells, and the slot lists mapped to this
/// stripe. Nodes link to each other by slab index only.
pub(crate) struct StripeState {
    nodes: Vec<Node>,
    free: Vec<u32>,
    slots: Vec<SlotList>,
}

impl StripeState {
    fn new(local_slots: usize) -> Self {
        StripeState {
            nodes: Vec::new(),
            free: Vec::new(),
            slots: vec![SlotList::default(); local_slots],
        }
    }

    pub fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_mut(&mut self, idx: u32) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    /// Walks a slot head-to-tail; the first identity match wins.
    pub fn find(&self, local_slot: usize, hash: ContentHash, params: &Params) -> Option<u32> {
        let mut cursor = self.slots[local_slot].first;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            if node.hash == hash && node.params == *params {
                return Some(idx);
            }
            cursor = node.next;
        }
        None
    }

    /// All node indices currently linked into a slot.
    pub fn slot_nodes(&self, local_slot: usize) -> Vec<u32> {
        let mut indices = Vec::new();
        let mut cursor = self.slots[local_slot].first;
        while let Some(idx) = cursor {
            indices.push(idx);
            cursor = self.node(idx).next;
        }
        indices
    }

    /// Takes a shell from the free-list (or grows the slab), resets it for
    /// the given identity, and appends it at the slot's tail.
    pub fn insert(&mut self, local_slot: usize, hash: ContentHash, params: Params) -> u32 {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.nodes.push(Node::empty());
                (self.nodes.len() - 1) as u32
            }
        };
        self.nodes[idx as usize].reset(hash, params);

        let slot = &mut self.slots[local_slot];
        match slot.last {
            Some(last) => {
                self.nodes[last as usize].next = Some(idx);
                self.nodes[idx as usize].prev = Some(last);
            }
            None => slot.first = Some(idx),
        }
        slot.last = Some(idx);
        idx
    }

    /// Unlinks a node, drops its published listing, and returns the shell
    /// to the free-list.
    pub fn remove(&mut self, local_slot: usize, idx: u32) {
        let (prev, next) = {
            let node = &mut self.nodes[idx as usize];
            node.info = None;
            (node.prev.take(), node.next.take())
        };

        let slot = &mut self.slots[local_slot];
        match prev {
            Some(prev) => self.nodes[prev as usize].next = next,
            None => slot.first = next,
        }
        match next {
            Some(next) => self.nodes[next as usize].prev = prev,
            None => slot.last = prev,
        }
        self.free.push(idx);
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

/// The shared locking context for a group of slots.
pub(crate) struct Stripe {
    pub state: RwLock<StripeState>,
}

/// A fixed array of slots, sharded over `stripes_count` stripes.
///
/// Slot index is `hash.hi() % slots_count`; stripe index is
/// `slot_idx % stripes_count`. Lookups on distinct stripes never contend.
pub(crate) struct CacheIndex {
    slots_count: usize,
    stripes: Vec<Stripe>,
}

impl CacheIndex {
    pub fn new(slots_count: usize, stripes_count: usize) -> Self {
        let local_slots = slots_count.div_ceil(stripes_count);
        let stripes = (0..stripes_count)
            .map(|_| Stripe {
                state: RwLock::new(StripeState::new(local_slots)),
            })
            .collect();
        CacheIndex {
            slots_count,
            stripes,
        }
    }

    pub fn slots_count(&self) -> usize {
        self.slots_count
    }

    pub fn stripes(&self) -> &[Stripe] {
        &self.stripes
    }

    pub fn slot_of(&self, hash: ContentHash) -> usize {
        (hash.hi() % self.slots_count as u64) as usize
    }

    pub fn stripe_for_slot(&self, slot_idx: usize) -> (&Stripe, usize) {
        let stripe_idx = slot_idx % self.stripes.len();
        let local_slot = slot_idx / self.stripes.len();
        (&self.stripes[stripe_idx], local_slot)
    }

    pub fn stripe_for_hash(&self, hash: ContentHash) -> (&Stripe, usize) {
        self.stripe_for_slot(self.slot_of(hash))
    }
}
