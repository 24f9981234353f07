//! Concurrency primitives shared across the engine.
//!
//! The engine never spawns its own threads (spec §5); it only needs
//! short-held locks for the slow paths of otherwise lock-free structures.
//! `spin` is the teacher's own choice for this (`ostd` depends on
//! `spin = "0.9.4"` and uses `spin::Mutex`/`spin::Once` throughout, e.g.
//! `ostd/src/smp.rs`), and the spec itself calls these "spin locks."

pub use spin::{Mutex, MutexGuard, Once};

/// A fixed-size stripe of spin locks, indexed by hashing an ID.
///
/// Spec §5: "Property atomic add: a small stripe of spin locks, chosen by
/// hashing the node or edge ID, serializes read-modify-write to single
/// entries." Also used by the soft-deletion mark
/// (`update_max_visible_level_lower_only`).
pub struct LockStripe<const N: usize> {
    locks: [Mutex<()>; N],
}

impl<const N: usize> LockStripe<N> {
    pub fn new() -> Self {
        Self {
            locks: core::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// Acquires the stripe lock covering `id`, returning a guard whose
    /// lifetime serializes any other `lock_for` call that hashes to the
    /// same stripe.
    pub fn lock_for(&self, id: i64) -> MutexGuard<'_, ()> {
        let idx = (id as u64 as usize) % N;
        self.locks[idx].lock()
    }
}

impl<const N: usize> Default for LockStripe<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of stripes used for property atomic-add and soft-deletion
/// stripe locks. Matches the teacher's habit of picking a small, fixed,
/// named constant rather than scaling with CPU count (contention here is
/// rare: single-writer checkpoints).
pub const DEFAULT_STRIPE_COUNT: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_maps_to_same_stripe() {
        let stripe = LockStripe::<DEFAULT_STRIPE_COUNT>::new();
        let _g1 = stripe.lock_for(42);
        drop(_g1);
        let _g2 = stripe.lock_for(42 + DEFAULT_STRIPE_COUNT as i64);
        // Different IDs hashing to the same stripe still serialize through
        // the same underlying lock; this just exercises both without
        // deadlocking (they're taken sequentially, not concurrently).
    }
}
