use crate::constants::{DIE_FACES, DIE_REJECT_THRESHOLD};
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use sha2::{Digest, Sha256};

// Dice for build-phase randomness. Each face comes from one uniformly distributed byte:
// bytes at or above 252 are thrown away so `byte % 6` carries no modulo bias.

pub struct DiceSource<R: RngCore> {
    rng: R,
    rejected: u64,
}

impl DiceSource<OsRng> {
    /// Dice backed by the operating system CSPRNG.
    pub fn secure() -> Self {
        Self::from_rng(OsRng)
    }
}

impl DiceSource<Pcg64Mcg> {
    /// Replayable dice for local simulations. Not for games with a real opponent.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(pcg_from_seed(seed))
    }
}

impl<R: RngCore> DiceSource<R> {
    pub fn from_rng(rng: R) -> Self {
        Self { rng, rejected: 0 }
    }

    /// One die in `1..=6`. Call once per logical die.
    pub fn roll(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        loop {
            self.rng.fill_bytes(&mut byte);
            if byte[0] < DIE_REJECT_THRESHOLD {
                return byte[0] % DIE_FACES + 1;
            }
            self.rejected += 1;
        }
    }

    pub fn roll_many(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.roll()).collect()
    }

    /// Raw bytes discarded so far by rejection sampling.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

pub fn derive_seed(base: u64, label: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(label.as_bytes());
    let hash = hasher.finalize();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed_bytes)
}

pub fn pcg_from_seed(seed: u64) -> Pcg64Mcg {
    // Expand the u64 into 16 bytes to seed the PCG generator deterministically.
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    let digest = hasher.finalize();
    let mut seed_bytes = [0u8; 16];
    seed_bytes.copy_from_slice(&digest[..16]);
    Pcg64Mcg::from_seed(seed_bytes)
}
