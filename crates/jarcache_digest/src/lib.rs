#![deny(missing_docs)]

//! Hashing primitives shared by the jarcache crates.
//!
//! All hashes are 64-bit XXH3 digests. They are fast, deterministic across
//! platforms and runs, and order dependent, which is all the node index and
//! change detection need. They are **not** cryptographic.
//!
//! # Examples
//!
//! ```
//! use jarcache_digest::{hash_bytes, hash_path};
//!
//! let key = hash_path("com/example/Foo.class");
//! let digest = hash_bytes(b"\xCA\xFE\xBA\xBE");
//! assert_ne!(key, digest);
//! ```

use xxhash_rust::xxh3::xxh3_64;

/// A 64-bit hash of the bytes of an archive path. Used as the key of the node
/// index.
pub type PathHash = u64;

/// A 64-bit digest of some content.
pub type ContentDigest = u64;

/// Hashes the byte representation of a path.
///
/// The path is hashed exactly as given, callers are expected to normalize
/// separators first.
pub fn hash_path(path: &str) -> PathHash {
    xxh3_64(path.as_bytes())
}

/// Computes the digest of the specified bytes.
pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> ContentDigest {
    xxh3_64(bytes.as_ref())
}
