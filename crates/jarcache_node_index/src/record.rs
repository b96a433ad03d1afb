//! Node records written next to every class file in an ABI archive.
//!
//! A record is stored at `<class path>.n` and consists of a little endian
//! `i32` format version followed by the opaque encoding of one dependency
//! graph node.

/// The version written at the start of every node record.
pub const NODE_RECORD_FORMAT_VERSION: i32 = 1;

/// Size of the header that precedes the node encoding.
pub const NODE_RECORD_HEADER_LEN: usize = 4;

/// Suffix appended to a class path to form the path of its node record.
pub const NODE_RECORD_SUFFIX: &str = ".n";

/// An error that can occur when decoding a node record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NodeRecordError {
    /// The record is shorter than its header.
    #[error("node record is truncated ({0} bytes)")]
    Truncated(usize),

    /// The record was written with an unknown format.
    #[error("unsupported node record format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// The version this crate writes.
        expected: i32,
        /// The version found in the record.
        found: i32,
    },
}

/// Returns the path under which the node record of `class_path` is stored.
pub fn record_path(class_path: &str) -> String {
    format!("{class_path}{NODE_RECORD_SUFFIX}")
}

/// A reusable scratch buffer for encoding node records.
///
/// The header region is reserved before the node is encoded and filled in
/// afterwards, so each record is produced in a single pass without copying
/// the node encoding.
#[derive(Debug, Default)]
pub struct NodeRecordWriter {
    buffer: Vec<u8>,
}

impl NodeRecordWriter {
    /// Constructs a writer whose buffer can hold `capacity` bytes without
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encodes one record. `encode` appends the node encoding to the buffer it
    /// is given. The returned slice borrows the scratch buffer and is
    /// overwritten by the next call.
    pub fn write_record<E>(
        &mut self,
        encode: impl FnOnce(&mut Vec<u8>) -> Result<(), E>,
    ) -> Result<&[u8], E> {
        self.buffer.clear();
        self.buffer.resize(NODE_RECORD_HEADER_LEN, 0);
        encode(&mut self.buffer)?;
        self.buffer[..NODE_RECORD_HEADER_LEN]
            .copy_from_slice(&NODE_RECORD_FORMAT_VERSION.to_le_bytes());
        Ok(&self.buffer)
    }
}

/// Validates the header of a record and returns the node encoding.
pub fn decode_record(record: &[u8]) -> Result<&[u8], NodeRecordError> {
    if record.len() < NODE_RECORD_HEADER_LEN {
        return Err(NodeRecordError::Truncated(record.len()));
    }
    let version = crate::read_i32(record, 0);
    if version != NODE_RECORD_FORMAT_VERSION {
        return Err(NodeRecordError::UnsupportedVersion {
            expected: NODE_RECORD_FORMAT_VERSION,
            found: version,
        });
    }
    Ok(&record[NODE_RECORD_HEADER_LEN..])
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_record_layout() {
        let mut writer = NodeRecordWriter::with_capacity(64);
        let record = writer
            .write_record(|buf| {
                buf.extend_from_slice(b"node");
                Ok::<_, std::convert::Infallible>(())
            })
            .unwrap()
            .to_vec();
        assert_eq!(&record[..4], &1i32.to_le_bytes());
        assert_eq!(&record[4..], b"node");
        assert_eq!(decode_record(&record).unwrap(), b"node");
    }

    #[test]
    fn test_buffer_is_reused() {
        let mut writer = NodeRecordWriter::default();
        let first_len = writer
            .write_record(|buf| {
                buf.extend_from_slice(&[1u8; 32]);
                Ok::<_, ()>(())
            })
            .unwrap()
            .len();
        let second = writer
            .write_record(|buf| {
                buf.push(2);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(first_len, 36);
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn test_encode_error_is_propagated() {
        let mut writer = NodeRecordWriter::default();
        assert_eq!(writer.write_record(|_| Err("broken")), Err("broken"));
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert_matches!(decode_record(&[1, 0]), Err(NodeRecordError::Truncated(2)));
        assert_matches!(
            decode_record(&[2, 0, 0, 0, 9]),
            Err(NodeRecordError::UnsupportedVersion { found: 2, .. })
        );
    }

    #[test]
    fn test_record_path() {
        assert_eq!(record_path("a/B.class"), "a/B.class.n");
    }
}
