use std::sync::Mutex;

use rand::{rngs::StdRng, RngCore, SeedableRng};
use rand_core::OsRng;

/// Source of the random bytes behind every secret, code and token.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Deterministic randomness for tests and fixtures. Never use it to mint
/// real credentials.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.fill_bytes(dest);
    }
}

/// Number of random bytes in codes, tokens and secrets.
pub const TOKEN_BYTES: usize = 32;

/// `length` random bytes, hex encoded.
pub fn generate_token(random: &dyn RandomSource, length: usize) -> String {
    let mut bytes = vec![0u8; length];
    random.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn generate_client_id(random: &dyn RandomSource) -> String {
    format!("client_{}", generate_token(random, 16))
}
