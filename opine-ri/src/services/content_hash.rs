//! Content Hash Computer
//!
//! **[RI-HASH-010]** Hashes a canonical signature to the fixed-width digest
//! used as the duplicate grouping key.
//!
//! The digest is SHA-256 truncated to 16 hex characters (64 bits) for
//! storage and index compactness. Truncation raises the birthday-bound
//! collision probability; at the store's scale (low hundreds of thousands
//! of records per survey) the risk is accepted and documented rather than
//! ignored.

use sha2::{Digest, Sha256};

use super::signature::CanonicalSignature;

/// Bump on ANY change to the canonicalization formula so old and new
/// digests are never compared. Version 1 hashed a '|'-joined concatenation;
/// version 2 moved to length-prefixed fields. The sweep recomputes digests
/// whose stored version is stale.
pub const CONTENT_HASH_VERSION: i64 = 2;

/// Hex characters kept from the SHA-256 digest
pub const DIGEST_HEX_WIDTH: usize = 16;

/// A stored digest plus the formula version that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub hash: String,
    pub version: i64,
}

/// Content Hash Computer
pub struct ContentHashComputer;

impl ContentHashComputer {
    /// Hash a canonical signature to its truncated digest
    pub fn digest(signature: &CanonicalSignature) -> ContentDigest {
        let hash_bytes = Sha256::digest(signature.as_bytes());
        let mut hash_hex = format!("{:x}", hash_bytes);
        hash_hex.truncate(DIGEST_HEX_WIDTH);

        ContentDigest {
            hash: hash_hex,
            version: CONTENT_HASH_VERSION,
        }
    }

    /// Whether a stored (hash, version) pair needs recomputation
    pub fn is_stale(stored_hash: Option<&str>, stored_version: Option<i64>) -> bool {
        match (stored_hash, stored_version) {
            (Some(_), Some(version)) => version != CONTENT_HASH_VERSION,
            _ => true,
        }
    }
}
