use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::index::Node;
use crate::utils::now_us;
use crate::Shared;

struct Sweep {
    change_gen: u64,
    now_us: u64,
    now_user_clock: u64,
    evict_idle_us: u64,
    evict_idle_user_clocks: u64,
    retry_stale_us: u64,
    retry_stale_user_clocks: u64,
}

impl Sweep {
    /// An entry may be reclaimed once nothing references it, both age axes
    /// have passed their thresholds, it has published at least once, and
    /// no worker is on it.
    fn evictable(&self, node: &Node) -> bool {
        node.scope_ref_count.load(Ordering::SeqCst) == 0
            && node.last_time_touched_us.load(Ordering::Relaxed) + self.evict_idle_us <= self.now_us
            && node.last_user_clock_idx_touched.load(Ordering::Relaxed)
                + self.evict_idle_user_clocks
                <= self.now_user_clock
            && node.load_count.load(Ordering::SeqCst) != 0
            && !node.is_working.load(Ordering::SeqCst)
    }

    /// An annotated entry whose inputs changed since it was decoded is
    /// re-submitted, rate-limited on both age axes.
    fn stale(&self, node: &Node) -> bool {
        node.change_gen != 0
            && node.change_gen != self.change_gen
            && node.last_time_requested_us.load(Ordering::Relaxed) + self.retry_stale_us
                <= self.now_us
            && node.last_user_clock_idx_requested.load(Ordering::Relaxed)
                + self.retry_stale_user_clocks
                <= self.now_user_clock
    }
}

/// The evictor/detector thread body: periodic sweeps over every slot.
pub(crate) fn run(shared: Arc<Shared>) {
    loop {
        sweep(&shared);
        std::thread::sleep(shared.config.sweep_interval);
    }
}

fn sweep(shared: &Shared) {
    let sweep = Sweep {
        change_gen: shared.services.watcher.change_gen(),
        now_us: now_us(),
        now_user_clock: shared.user_clock.load(Ordering::Relaxed),
        evict_idle_us: shared.config.evict_idle_for.as_micros() as u64,
        evict_idle_user_clocks: shared.config.evict_idle_user_clocks,
        retry_stale_us: shared.config.retry_stale_after.as_micros() as u64,
        retry_stale_user_clocks: shared.config.retry_stale_user_clocks,
    };

    for slot_idx in 0..shared.index.slots_count() {
        let (stripe, local_slot) = shared.index.stripe_for_slot(slot_idx);

        // Cheap read-locked probe first; most slots need nothing.
        let slot_has_work = {
            let state = stripe.state.read();
            state
                .slot_nodes(local_slot)
                .iter()
                .any(|&idx| sweep.evictable(state.node(idx)) || sweep.stale(state.node(idx)))
        };
        if !slot_has_work {
            continue;
        }

        let mut state = stripe.state.write();
        for idx in state.slot_nodes(local_slot) {
            if sweep.evictable(state.node(idx)) {
                tracing::debug!(hash = %state.node(idx).hash, "evicting idle listing");
                state.remove(local_slot, idx);
                continue;
            }
            if sweep.stale(state.node(idx)) {
                let node = state.node(idx);
                let enqueued =
                    shared
                        .queue
                        .enqueue(node.hash, &node.params, Some(Instant::now()));
                if enqueued {
                    tracing::debug!(hash = %node.hash, "re-requesting stale listing");
                    node.last_time_requested_us.store(now_us(), Ordering::Relaxed);
                    node.last_user_clock_idx_requested
                        .store(sweep.now_user_clock, Ordering::Relaxed);
                }
            }
        }
    }
}
