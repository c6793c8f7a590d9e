//! Hash Operations
//!
//! SHA-256 used to fingerprint session transcripts in logs and audit exports.

use sha2::{Digest, Sha256};

use crate::apdu::hexify;

/// Hash Operations
pub struct HashOperations;

impl HashOperations {
    /// Number of digest bytes shown in a fingerprint
    pub const FINGERPRINT_SIZE: usize = 8;

    /// Compute SHA-256 hash
    pub fn sha256(data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().to_vec()
    }

    /// Short hex fingerprint of `data`, safe to log
    pub fn fingerprint(data: &[u8]) -> String {
        hexify(&Self::sha256(data)[..Self::FINGERPRINT_SIZE])
    }
}
