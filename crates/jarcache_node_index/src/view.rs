use jarcache_digest::PathHash;

use crate::{read_header, read_u64, NodeIndexEntry, NodeIndexError, HEADER_LEN};

/// A read-only view over a serialized [`NodeIndex`](crate::NodeIndex).
///
/// Lookups binary search the sorted key array in place, so a single node can
/// be located straight from a memory mapped archive without decoding the
/// whole index.
#[derive(Debug, Clone, Copy)]
pub struct NodeIndexView<'a> {
    keys: &'a [u8],
    values: &'a [u8],
    len: usize,
}

impl<'a> NodeIndexView<'a> {
    /// Validates the header of `bytes` and borrows the key and value arrays.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, NodeIndexError> {
        let len = read_header(bytes)?;
        let values_start = HEADER_LEN + len * 8;
        Ok(Self {
            keys: &bytes[HEADER_LEN..values_start],
            values: &bytes[values_start..values_start + len * 16],
            len,
        })
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn key_at(&self, index: usize) -> PathHash {
        read_u64(self.keys, index * 8)
    }

    fn entry_at(&self, index: usize) -> NodeIndexEntry {
        NodeIndexEntry::from_packed(
            read_u64(self.values, index * 16),
            read_u64(self.values, index * 16 + 8),
        )
    }

    /// Finds the entry for `key`.
    pub fn get(&self, key: PathHash) -> Option<NodeIndexEntry> {
        let (mut low, mut high) = (0, self.len);
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid).cmp(&key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.entry_at(mid)),
            }
        }
        None
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (PathHash, NodeIndexEntry)> + 'a {
        let view = *self;
        (0..view.len).map(move |i| (view.key_at(i), view.entry_at(i)))
    }
}
