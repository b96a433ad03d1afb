#![deny(missing_docs)]

//! Binary node index for ABI archives.
//!
//! Every class file written into an ABI archive is accompanied by a small
//! node record (see [`record`]) describing the class for the incremental
//! dependency analyzer. The [`NodeIndex`] maps the hash of each class path to
//! the digest and location of that record, so a later run can find a node
//! without parsing the class file again.
//!
//! The serialized layout is:
//!
//! ```text
//! i32 format version (LE)
//! i32 entry count    (LE)
//! count x u64 key    (LE, sorted ascending)
//! count x (u64 digest, u64 offset << 32 | size) (LE, same order as the keys)
//! ```
//!
//! Keys are written sorted so that [`NodeIndexView`] can binary search the
//! serialized form directly.

mod index;
pub mod record;
mod view;

pub use index::{NodeIndex, NodeIndexEntry};
pub use view::NodeIndexView;

/// The version written at the start of a serialized [`NodeIndex`].
pub const NODE_INDEX_FORMAT_VERSION: i32 = 1;

/// Size of the fixed header of a serialized [`NodeIndex`].
pub(crate) const HEADER_LEN: usize = 8;

/// An error that can occur when (de)serializing a [`NodeIndex`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NodeIndexError {
    /// The index was written with a format this version cannot read.
    #[error("unsupported node index format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// The version this crate reads and writes.
        expected: i32,
        /// The version found in the data.
        found: i32,
    },

    /// The data ended before all declared entries could be read.
    #[error("node index is truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// The number of bytes the header declares.
        expected: usize,
        /// The number of bytes available.
        actual: usize,
    },

    /// The entry count in the header is negative.
    #[error("node index declares a negative entry count ({0})")]
    NegativeCount(i32),

    /// The index holds more entries than the format can describe.
    #[error("node index has too many entries ({0})")]
    TooManyEntries(usize),
}

/// Reads a little endian `i32` at `offset`. The caller guarantees the bounds.
pub(crate) fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(buf)
}

/// Reads a little endian `u64` at `offset`. The caller guarantees the bounds.
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

/// Validates the header of a serialized index and returns the entry count.
pub(crate) fn read_header(bytes: &[u8]) -> Result<usize, NodeIndexError> {
    if bytes.len() < HEADER_LEN {
        return Err(NodeIndexError::Truncated {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }

    let version = read_i32(bytes, 0);
    if version != NODE_INDEX_FORMAT_VERSION {
        return Err(NodeIndexError::UnsupportedVersion {
            expected: NODE_INDEX_FORMAT_VERSION,
            found: version,
        });
    }

    let count = read_i32(bytes, 4);
    let count = usize::try_from(count).map_err(|_| NodeIndexError::NegativeCount(count))?;

    // One key plus one (digest, offset/size) pair per entry.
    let expected = count
        .checked_mul(24)
        .and_then(|len| len.checked_add(HEADER_LEN))
        .unwrap_or(usize::MAX);
    if bytes.len() < expected {
        return Err(NodeIndexError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    Ok(count)
}
