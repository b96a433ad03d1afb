use std::collections::HashMap;

use jarcache_digest::{hash_bytes, ContentDigest, PathHash};

use crate::{read_header, read_u64, NodeIndexError, HEADER_LEN, NODE_INDEX_FORMAT_VERSION};

/// The location and digest of a single node record inside an archive.
///
/// On disk the offset and size share a single 64-bit field
/// (`offset << 32 | size`), which limits archives to 4 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndexEntry {
    /// Digest of the node record bytes.
    pub digest: ContentDigest,

    /// Offset of the record data within the archive file.
    pub offset: u32,

    /// Size of the record data in bytes.
    pub size: u32,
}

impl NodeIndexEntry {
    /// Returns the packed `offset << 32 | size` representation.
    pub fn offset_and_size(&self) -> u64 {
        (u64::from(self.offset) << 32) | u64::from(self.size)
    }

    /// Reconstructs an entry from its digest and packed location.
    pub fn from_packed(digest: ContentDigest, offset_and_size: u64) -> Self {
        Self {
            digest,
            offset: (offset_and_size >> 32) as u32,
            size: offset_and_size as u32,
        }
    }
}

/// A mapping from path hash to [`NodeIndexEntry`].
///
/// The index is built fresh for every ABI archive that is written and
/// serialized once at the end of the write. Hash collisions between different
/// paths are not resolved: the last `put` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIndex {
    entries: HashMap<PathHash, NodeIndexEntry>,
}

impl NodeIndex {
    /// Constructs a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a new empty index with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Records the node stored at `offset`/`size`, digesting `content`.
    pub fn put(&mut self, key: PathHash, content: &[u8], offset: u32, size: u32) {
        self.entries.insert(
            key,
            NodeIndexEntry {
                digest: hash_bytes(content),
                offset,
                size,
            },
        );
    }

    /// Moves an entry to a new offset, keeping the digest and size of
    /// `previous`.
    pub fn update_offset(&mut self, key: PathHash, new_offset: u32, previous: NodeIndexEntry) {
        self.entries.insert(
            key,
            NodeIndexEntry {
                offset: new_offset,
                ..previous
            },
        );
    }

    /// Returns the entry stored for `key`.
    pub fn get(&self, key: PathHash) -> Option<NodeIndexEntry> {
        self.entries.get(&key).copied()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (PathHash, NodeIndexEntry)> + '_ {
        self.entries.iter().map(|(key, entry)| (*key, *entry))
    }

    /// Returns all keys in ascending order.
    pub fn sorted_keys(&self) -> Vec<PathHash> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Serializes the index into its binary form.
    pub fn serialize(&self) -> Result<Vec<u8>, NodeIndexError> {
        let count = i32::try_from(self.entries.len())
            .map_err(|_| NodeIndexError::TooManyEntries(self.entries.len()))?;
        let keys = self.sorted_keys();

        let mut bytes = Vec::with_capacity(HEADER_LEN + keys.len() * 24);
        bytes.extend_from_slice(&NODE_INDEX_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        for key in &keys {
            bytes.extend_from_slice(&key.to_le_bytes());
        }
        for key in &keys {
            let entry = &self.entries[key];
            bytes.extend_from_slice(&entry.digest.to_le_bytes());
            bytes.extend_from_slice(&entry.offset_and_size().to_le_bytes());
        }
        Ok(bytes)
    }

    /// Reads an index previously written by [`NodeIndex::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, NodeIndexError> {
        let count = read_header(bytes)?;
        let values_start = HEADER_LEN + count * 8;

        let mut entries = HashMap::with_capacity(count);
        for i in 0..count {
            let key = read_u64(bytes, HEADER_LEN + i * 8);
            let digest = read_u64(bytes, values_start + i * 16);
            let offset_and_size = read_u64(bytes, values_start + i * 16 + 8);
            entries.insert(key, NodeIndexEntry::from_packed(digest, offset_and_size));
        }

        Ok(Self { entries })
    }
}

impl FromIterator<(PathHash, NodeIndexEntry)> for NodeIndex {
    fn from_iter<T: IntoIterator<Item = (PathHash, NodeIndexEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_offset_and_size_packing() {
        let entry = NodeIndexEntry {
            digest: 7,
            offset: 0xDEAD_BEEF,
            size: 0x1234,
        };
        assert_eq!(entry.offset_and_size(), 0xDEAD_BEEF_0000_1234);
        assert_eq!(NodeIndexEntry::from_packed(7, entry.offset_and_size()), entry);
    }

    #[test]
    fn test_put_overwrites_on_same_key() {
        let mut index = NodeIndex::new();
        index.put(1, b"first", 10, 5);
        index.put(1, b"second", 20, 6);
        assert_eq!(index.len(), 1);
        let entry = index.get(1).unwrap();
        assert_eq!(entry.digest, hash_bytes(b"second"));
        assert_eq!((entry.offset, entry.size), (20, 6));
    }

    #[test]
    fn test_update_offset_keeps_digest_and_size() {
        let mut index = NodeIndex::new();
        index.put(3, b"node", 0, 4);
        let previous = index.get(3).unwrap();
        index.update_offset(3, 4096, previous);
        let entry = index.get(3).unwrap();
        assert_eq!(entry.offset, 4096);
        assert_eq!(entry.size, 4);
        assert_eq!(entry.digest, previous.digest);
    }

    #[test]
    fn test_serialized_keys_are_sorted() {
        let mut index = NodeIndex::new();
        index.put(5, b"five", 50, 4);
        index.put(1, b"one", 10, 3);
        index.put(9, b"nine", 90, 4);

        let bytes = index.serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3 * 24);
        let keys: Vec<u64> = (0..3).map(|i| read_u64(&bytes, HEADER_LEN + i * 8)).collect();
        assert_eq!(keys, vec![1, 5, 9]);

        // The digest of the second key follows the key array.
        assert_eq!(read_u64(&bytes, HEADER_LEN + 3 * 8 + 16), hash_bytes(b"five"));

        let index = NodeIndex::deserialize(&bytes).unwrap();
        let entry = index.get(5).unwrap();
        assert_eq!(entry.digest, hash_bytes(b"five"));
        assert_eq!((entry.offset, entry.size), (50, 4));
    }

    #[test]
    fn test_empty_index() {
        let bytes = NodeIndex::new().serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(NodeIndex::deserialize(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = NodeIndex::new().serialize().unwrap();
        bytes[..4].copy_from_slice(&42i32.to_le_bytes());
        assert_matches!(
            NodeIndex::deserialize(&bytes),
            Err(NodeIndexError::UnsupportedVersion { found: 42, .. })
        );
    }

    #[test]
    fn test_rejects_truncated_data() {
        let mut index = NodeIndex::new();
        index.put(1, b"one", 10, 3);
        let bytes = index.serialize().unwrap();
        assert_matches!(
            NodeIndex::deserialize(&bytes[..bytes.len() - 1]),
            Err(NodeIndexError::Truncated { .. })
        );
        assert_matches!(
            NodeIndex::deserialize(&bytes[..3]),
            Err(NodeIndexError::Truncated { expected: 8, actual: 3 })
        );
    }

    #[test]
    fn test_rejects_negative_count() {
        let mut bytes = NodeIndex::new().serialize().unwrap();
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        assert_matches!(
            NodeIndex::deserialize(&bytes),
            Err(NodeIndexError::NegativeCount(-1))
        );
    }
}
