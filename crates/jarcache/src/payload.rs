//! The values stored in an [`crate::OutputAccumulator`].

use std::ops::Deref;

use parking_lot::MappedRwLockReadGuard;

/// The compiler front-end that produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frontend {
    /// The Java compiler.
    Java,
    /// The Kotlin compiler. Its metadata files (for instance `.kotlin_module`)
    /// are treated specially by downstream consumers.
    Kotlin,
}

/// The location of an entry's data inside a previous archive.
///
/// This is a lightweight descriptor; the bytes are only read when the entry is
/// resolved against the [`crate::ArchiveHandle`] it was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReusedEntry {
    /// Offset of the entry data from the start of the archive file.
    pub offset: u64,
    /// Size of the entry data.
    pub size: u64,
}

/// The content registered for a single output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPayload {
    /// Bytes produced during this run.
    Fresh(Vec<u8>),

    /// An entry carried over unchanged from the previous archive.
    Reused(ReusedEntry),

    /// Bytes produced during this run by a specific front-end.
    FrontendTagged {
        /// The content of the output.
        bytes: Vec<u8>,
        /// The front-end that produced it.
        origin: Frontend,
    },
}

impl OutputPayload {
    /// Constructs a payload for freshly produced bytes.
    pub fn produced(bytes: Vec<u8>, origin: Option<Frontend>) -> Self {
        match origin {
            Some(origin) => OutputPayload::FrontendTagged { bytes, origin },
            None => OutputPayload::Fresh(bytes),
        }
    }

    /// Returns the front-end that produced this payload, if it was tagged.
    pub fn origin(&self) -> Option<Frontend> {
        match self {
            OutputPayload::FrontendTagged { origin, .. } => Some(*origin),
            OutputPayload::Fresh(_) | OutputPayload::Reused(_) => None,
        }
    }

    /// Returns true if the payload still refers to the previous archive.
    pub fn is_reused(&self) -> bool {
        matches!(self, OutputPayload::Reused(_))
    }
}

/// A single output produced by a compiler front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path of the output relative to the archive root.
    pub path: String,
    /// The complete content of the output.
    pub content: Vec<u8>,
    /// The front-end that produced the output, if it should be tagged.
    pub origin: Option<Frontend>,
}

impl OutputFile {
    /// Constructs an untagged output.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            origin: None,
        }
    }

    /// Tags the output with the front-end that produced it.
    pub fn with_origin(mut self, origin: Frontend) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Either bytes owned by the accumulator or a slice of a memory mapped
/// previous archive.
pub enum PayloadBytes<'a> {
    /// Bytes held in memory.
    Borrowed(&'a [u8]),
    /// Bytes read from the previous archive. The archive cannot be closed
    /// while this guard is alive.
    Mapped(MappedRwLockReadGuard<'a, [u8]>),
}

impl Deref for PayloadBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PayloadBytes::Borrowed(bytes) => bytes,
            PayloadBytes::Mapped(bytes) => &**bytes,
        }
    }
}

impl AsRef<[u8]> for PayloadBytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Normalizes an output path to forward slashes.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix("./") {
        Some(stripped) => stripped.trim_start_matches('/').to_owned(),
        None => path.trim_start_matches('/').to_owned(),
    }
}
