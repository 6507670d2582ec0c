//! Cryptographic Utilities

use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Generate cryptographically secure random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a uniform f64 in [0, 1) from the OS CSPRNG
///
/// Uses the top 53 bits of a random u64 so every representable value
/// in the unit interval is equally likely. Never seeded, never
/// reproducible from client-observable state.
pub fn random_unit() -> f64 {
    let mut buf = [0u8; 8];
    OsRng.fill_bytes(&mut buf);
    (u64::from_le_bytes(buf) >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
