//! Reusable stage barrier.

use parking_lot::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Barrier every worker and the submitter pass once per stage.
///
/// Reusable: the generation counter tells sleepers which round released them.
pub struct StageBarrier {
    state: Mutex<BarrierState>,
    cvar: Condvar,
    parties: usize,
}

impl StageBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cvar: Condvar::new(),
            parties: parties.max(1),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until every party of the current round arrived.
    ///
    /// Returns `true` for the party that released the round.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        let generation = state.generation;
        if Self::arrive_locked(&mut state, self.parties) {
            self.cvar.notify_all();
            return true;
        }
        while state.generation == generation {
            self.cvar.wait(&mut state);
        }
        false
    }

    /// Count a party that will not wait, such as a dead worker.
    pub fn arrive(&self) {
        let mut state = self.state.lock();
        if Self::arrive_locked(&mut state, self.parties) {
            self.cvar.notify_all();
        }
    }

    fn arrive_locked(state: &mut BarrierState, parties: usize) -> bool {
        state.arrived += 1;
        if state.arrived < parties {
            return false;
        }
        state.arrived = 0;
        state.generation = state.generation.wrapping_add(1);
        true
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
