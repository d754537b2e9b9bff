//! Deterministic per-file randomness.
//!
//! Output is a pure function of (IR, strategy, seed): every pass draws from a
//! generator seeded once per file from the user's genome and the file id.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use hos_core::crypto::{derive_master_secret, sha256};

/// Per-user randomness source ("genome").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seed {
    pub genome: u64,
}

impl Seed {
    pub fn new(genome: u64) -> Self {
        Self { genome }
    }

    pub fn file_rng(&self, file_id: &str) -> StdRng {
        let digest = sha256(&[b"hos.rng", &self.genome.to_le_bytes(), file_id.as_bytes()]);
        StdRng::from_seed(digest)
    }

    pub fn master_secret(&self, file_id: &str) -> [u8; 32] {
        derive_master_secret(self.genome, file_id)
    }
}

impl From<u64> for Seed {
    fn from(genome: u64) -> Self {
        Self::new(genome)
    }
}
