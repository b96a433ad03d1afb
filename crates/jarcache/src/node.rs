//! Dependency graph nodes stored in the ABI archive.

use std::{path::Path, sync::Arc};

use jarcache_digest::{hash_bytes, hash_path, PathHash};
use jarcache_node_index::{
    record::{decode_record, NodeRecordError},
    NodeIndexEntry, NodeIndexError, NodeIndexView,
};

use crate::{
    archive::{ArchiveError, ArchiveHandle, INDEX_ENTRY_NAME},
    payload::ReusedEntry,
};

/// The error type returned by a [`NodeExtractor`].
pub type NodeExtractError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the dependency graph node of a class.
///
/// Archives are written from multiple threads, so implementations must be
/// shareable.
pub trait NodeExtractor: Send + Sync {
    /// Appends the encoded node of the class `class_bytes` to `out`.
    /// `node_id` is the stable hash of the class path.
    fn extract(
        &self,
        class_bytes: &[u8],
        node_id: PathHash,
        out: &mut Vec<u8>,
    ) -> Result<(), NodeExtractError>;
}

/// A [`NodeExtractor`] that records the node id, the digest and the size of
/// the class.
///
/// It carries no dependency information but is enough to detect whether a
/// class changed between two runs without opening the class itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestNodeExtractor;

impl DigestNodeExtractor {
    /// Size of an encoded node.
    pub const ENCODED_LEN: usize = 24;

    /// Decodes a node written by this extractor into
    /// `(node_id, digest, class_size)`.
    pub fn decode(node: &[u8]) -> Option<(PathHash, u64, u64)> {
        let node: &[u8; Self::ENCODED_LEN] = node.try_into().ok()?;
        let field = |i: usize| {
            let mut bytes = [0; 8];
            bytes.copy_from_slice(&node[i * 8..(i + 1) * 8]);
            u64::from_le_bytes(bytes)
        };
        Some((field(0), field(1), field(2)))
    }
}

impl NodeExtractor for DigestNodeExtractor {
    fn extract(
        &self,
        class_bytes: &[u8],
        node_id: PathHash,
        out: &mut Vec<u8>,
    ) -> Result<(), NodeExtractError> {
        out.extend_from_slice(&node_id.to_le_bytes());
        out.extend_from_slice(&hash_bytes(class_bytes).to_le_bytes());
        out.extend_from_slice(&(class_bytes.len() as u64).to_le_bytes());
        Ok(())
    }
}

/// An error that can occur when looking up a node.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum NodeLookupError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("{} has no node index", .0.display())]
    MissingIndex(std::path::PathBuf),

    #[error(transparent)]
    Index(#[from] NodeIndexError),

    #[error(transparent)]
    Record(#[from] NodeRecordError),

    #[error("the node record of '{0}' does not match its digest")]
    DigestMismatch(String),
}

/// Reads node records out of an ABI archive through its node index.
///
/// The index is searched in place, nothing is deserialized up front.
#[derive(Debug)]
pub struct NodeReader {
    handle: Arc<ArchiveHandle>,
    index: ReusedEntry,
}

impl NodeReader {
    /// Opens the ABI archive at `path`.
    pub fn open(path: &Path) -> Result<Self, NodeLookupError> {
        let (handle, entries) = ArchiveHandle::open(path)?;
        let index = entries
            .into_iter()
            .find(|entry| entry.name == INDEX_ENTRY_NAME)
            .map(|entry| entry.location)
            .ok_or_else(|| NodeLookupError::MissingIndex(path.to_path_buf()))?;

        // Fail early on an index we cannot read.
        NodeIndexView::parse(&handle.resolve(&index)?)?;

        Ok(Self { handle, index })
    }

    /// Returns the number of nodes in the archive.
    pub fn len(&self) -> Result<usize, NodeLookupError> {
        let bytes = self.handle.resolve(&self.index)?;
        Ok(NodeIndexView::parse(&bytes)?.len())
    }

    /// Returns the index entry of the class at `class_path`.
    pub fn lookup_entry(&self, class_path: &str) -> Result<Option<NodeIndexEntry>, NodeLookupError> {
        let bytes = self.handle.resolve(&self.index)?;
        Ok(NodeIndexView::parse(&bytes)?.get(hash_path(class_path)))
    }

    /// Returns the encoded node of the class at `class_path`, or `None` if the
    /// archive holds no node for it.
    pub fn lookup(&self, class_path: &str) -> Result<Option<Vec<u8>>, NodeLookupError> {
        let Some(entry) = self.lookup_entry(class_path)? else {
            return Ok(None);
        };

        let record = self.handle.resolve(&ReusedEntry {
            offset: u64::from(entry.offset),
            size: u64::from(entry.size),
        })?;
        if hash_bytes(&*record) != entry.digest {
            return Err(NodeLookupError::DigestMismatch(class_path.to_owned()));
        }
        Ok(Some(decode_record(&record)?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_digest_extractor_encoding() {
        let mut out = Vec::new();
        DigestNodeExtractor
            .extract(b"class", 42, &mut out)
            .unwrap();
        assert_eq!(out.len(), DigestNodeExtractor::ENCODED_LEN);
        assert_eq!(
            DigestNodeExtractor::decode(&out),
            Some((42, hash_bytes(b"class"), 5))
        );
        assert_eq!(DigestNodeExtractor::decode(&out[1..]), None);
    }

    #[test]
    fn test_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abi.jar");
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        writer
            .start_file(
                "a/B.class",
                zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Stored),
            )
            .unwrap();
        std::io::Write::write_all(&mut writer, b"class").unwrap();
        writer.finish().unwrap();

        assert_matches!(NodeReader::open(&path), Err(NodeLookupError::MissingIndex(_)));
    }
}
