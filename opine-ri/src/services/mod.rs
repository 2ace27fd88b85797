//! Core integrity services
//!
//! Pure computation: signature building, content hashing, duplicate group
//! resolution, abandonment detection, and reviewer-flag classification.
//! None of these touch the store; orchestration lives in the reconciler.

pub mod abandonment;
pub mod content_hash;
pub mod grouping;
pub mod review_flags;
pub mod signature;

pub use abandonment::{AbandonmentClassification, AbandonmentDetector};
pub use content_hash::{ContentDigest, ContentHashComputer, CONTENT_HASH_VERSION};
pub use grouping::{DuplicateGroup, DuplicateGroupResolver, Resolution};
pub use review_flags::{classify_review, ReviewCriteria, ReviewFlag};
pub use signature::{CanonicalSignature, CanonicalSignatureBuilder};
