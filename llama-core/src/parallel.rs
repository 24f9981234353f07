//! The work-stealing parallel-for capability the engine assumes is
//! available, per spec §1 ("Thread pools: the core assumes a work-stealing
//! parallel-for primitive is available") and §5 ("the engine never spawns
//! its own long-lived threads").

use std::ops::Range;

/// A fork-join "run this over a range, possibly in parallel" capability.
///
/// Implementors own however many worker threads they like; the engine
/// only ever calls `run` and blocks until it returns, matching spec §5's
/// "suspension points: none... blocks only on lock acquisition."
pub trait ParallelFor: Send + Sync {
    fn run(&self, range: Range<usize>, body: &(dyn Fn(usize) + Sync));
}

/// Runs the range on the calling thread. Used for `no-default-features`
/// builds, tests, and deterministic reproduction of a checkpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialFor;

impl ParallelFor for SequentialFor {
    fn run(&self, range: Range<usize>, body: &(dyn Fn(usize) + Sync)) {
        for i in range {
            body(i);
        }
    }
}

/// Dispatches onto rayon's global work-stealing thread pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonParallelFor;

#[cfg(feature = "parallel")]
impl ParallelFor for RayonParallelFor {
    fn run(&self, range: Range<usize>, body: &(dyn Fn(usize) + Sync)) {
        use rayon::prelude::*;
        range.into_par_iter().for_each(body);
    }
}

/// The engine's default parallel-for: rayon when the `parallel` feature is
/// enabled (the default), sequential otherwise.
#[cfg(feature = "parallel")]
pub fn default_parallel_for() -> impl ParallelFor {
    RayonParallelFor
}

#[cfg(not(feature = "parallel"))]
pub fn default_parallel_for() -> impl ParallelFor {
    SequentialFor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sequential_visits_every_index_once() {
        let seen = AtomicUsize::new(0);
        SequentialFor.run(0..100, &|_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(seen.load(Ordering::Relaxed), 100);
    }
}
