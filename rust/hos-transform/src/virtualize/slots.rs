use rand::seq::SliceRandom;
use rand::Rng;

use hos_core::ir::LocalId;

/// Maps IR locals to VM slots through a per-build permutation. Scratch slots
/// (lazy-cell flags and caches, switch temporaries) follow the locals.
#[derive(Debug, Clone)]
pub struct SlotMap {
    locals: Vec<u32>,
    next: u32,
}

impl SlotMap {
    pub fn shuffled<R: Rng>(locals: usize, rng: &mut R) -> Self {
        let mut slots: Vec<u32> = (0..locals as u32).collect();
        slots.shuffle(rng);
        Self {
            locals: slots,
            next: locals as u32,
        }
    }

    pub fn local(&self, id: LocalId) -> Option<u32> {
        self.locals.get(id.index()).copied()
    }

    pub fn scratch(&mut self) -> u32 {
        let slot = self.next;
        self.next += 1;
        slot
    }
}
