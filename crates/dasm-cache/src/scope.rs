use std::sync::atomic::Ordering;

use dasm_services::ContentHash;

use crate::index::Node;
use crate::types::Params;
use crate::utils::now_us;
use crate::Shared;

/// A weak back-reference to a touched node: identity only, re-resolved at
/// close time.
struct Touch {
    hash: ContentHash,
    params: Params,
}

/// A caller-held access region.
///
/// Every cache hit made through a scope pins the node it returned: the
/// evictor refuses to reclaim a node while any scope still references it,
/// so the `Info` captured from a hit stays valid until the scope ends.
/// Dropping the scope releases all pins.
pub struct Scope<'a> {
    shared: &'a Shared,
    touches: Vec<Touch>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(shared: &'a Shared) -> Self {
        Scope {
            shared,
            touches: Vec::new(),
        }
    }

    /// Records a hit. Caller holds the node's stripe read lock.
    pub(crate) fn touch(&mut self, node: &Node) {
        node.scope_ref_count.fetch_add(1, Ordering::SeqCst);
        node.last_time_touched_us.store(now_us(), Ordering::Relaxed);
        node.last_user_clock_idx_touched.store(
            self.shared.user_clock.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.touches.push(Touch {
            hash: node.hash,
            params: node.params.clone(),
        });
    }

    /// Ends the region, releasing every touched node.
    pub fn close(self) {}
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        for touch in self.touches.drain(..) {
            let (stripe, local_slot) = self.shared.index.stripe_for_hash(touch.hash);
            let state = stripe.state.read();
            // A missing node here would mean the evictor reclaimed a
            // referenced entry; skipping keeps close infallible.
            if let Some(idx) = state.find(local_slot, touch.hash, &touch.params) {
                state.node(idx).scope_ref_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
