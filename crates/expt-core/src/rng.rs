//! Seeded randomness for orderings and section realization.
//!
//! An experiment stores one master seed. Each consumer (tree build,
//! realization, later edits) draws from its own numbered stream so that
//! reloading a snapshot and appending sections never replays the draws that
//! shaped the existing tree.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Random source handed to every shuffling ordering.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Handle seeded directly with `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Handle for stream `stream` of the experiment seeded with `master`.
    pub fn substream(master: u64, stream: u64) -> Self {
        Self::from_seed(stream_seed(master, stream))
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Seed of stream `stream` under `master`: SipHash-1-3 with zero keys over
/// both numbers, stable across platforms.
pub fn stream_seed(master: u64, stream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master);
    hasher.write_u64(stream);
    hasher.finish()
}

/// Fresh master seed for experiments created without one.
pub fn entropy_seed() -> u64 {
    rand::random()
}
