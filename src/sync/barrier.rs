//! # Reusable Phase Barrier
//!
//! Rendezvous point for a fixed set of cooperating threads. Every thread
//! calls [`PhaseBarrier::arrive`]; the last arriver gets a [`LeaderGuard`]
//! and runs phase-transition work (closing writers, filling a queue,
//! writing metadata) while the others stay parked. Dropping the guard
//! releases the phase and wakes everyone.
//!
//! The same barrier instance is reused for consecutive phases — the build
//! path crosses it twice, once entering the sort phase and once entering
//! finalization — with the expected count fixed at construction. No
//! arrival counter is ever compared against a mutable total.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    phase: u64,
}

#[derive(Debug)]
pub struct PhaseBarrier {
    expected: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl PhaseBarrier {
    pub fn new(expected: usize) -> Self {
        assert!(expected > 0, "barrier requires at least one participant");
        Self {
            expected,
            state: Mutex::new(BarrierState {
                arrived: 0,
                phase: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Blocks until all participants arrive. Exactly one caller per phase —
    /// the last to arrive — receives `Some(guard)` and keeps every other
    /// participant parked until the guard drops.
    pub fn arrive(&self) -> Option<LeaderGuard<'_>> {
        let mut state = self.state.lock();
        state.arrived += 1;

        if state.arrived == self.expected {
            state.arrived = 0;
            return Some(LeaderGuard { barrier: self });
        }

        let phase = state.phase;
        while state.phase == phase {
            self.released.wait(&mut state);
        }
        None
    }
}

/// Held by the last arriver of a phase; dropping it releases the phase.
#[must_use = "the phase stays blocked until the guard is dropped"]
#[derive(Debug)]
pub struct LeaderGuard<'a> {
    barrier: &'a PhaseBarrier,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.barrier.state.lock();
        state.phase += 1;
        self.barrier.released.notify_all();
    }
}
