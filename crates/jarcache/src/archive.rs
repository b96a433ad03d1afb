//! Read-only access to a previously written archive.

use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use memmap2::Mmap;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use zip::CompressionMethod;

use crate::payload::ReusedEntry;

/// Name of the entry that holds the serialized node index of an ABI archive.
pub const INDEX_ENTRY_NAME: &str = "__index__";

/// An error that can occur when reading from a previous archive.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum ArchiveError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("entry '{0}' is compressed and cannot be reused")]
    UnsupportedCompressionMethod(String),

    #[error("entry at offset {offset} with size {size} lies outside of {}", .path.display())]
    OutOfBounds {
        path: PathBuf,
        offset: u64,
        size: u64,
    },

    #[error("the archive {} was closed before all reused entries were resolved", .0.display())]
    Closed(PathBuf),

    #[error("'{0}' refers to a previous archive but none is open")]
    MissingArchive(String),

    #[error("invalid node index")]
    NodeIndex(#[from] jarcache_node_index::NodeIndexError),
}

/// An entry listed in the central directory of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The name of the entry.
    pub name: String,
    /// Where the entry data lives in the archive file.
    pub location: ReusedEntry,
}

/// Either a memory mapped file or the complete contents of a file read to memory.
enum ArchiveData {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl ArchiveData {
    fn bytes(&self) -> &[u8] {
        match self {
            ArchiveData::Mmap(mmap) => mmap.as_ref(),
            ArchiveData::Bytes(bytes) => bytes.as_slice(),
        }
    }
}

/// A read-only view of an archive written by a previous run.
///
/// Entries are never copied eagerly; [`ArchiveHandle::resolve`] hands out
/// slices of the mapped file. The handle stays usable until
/// [`ArchiveHandle::close`] is called, after which every resolution fails
/// with [`ArchiveError::Closed`].
pub struct ArchiveHandle {
    path: PathBuf,
    data: RwLock<Option<ArchiveData>>,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ArchiveHandle {
    /// Opens the archive at `path` and lists its non-directory entries.
    ///
    /// Only uncompressed entries can be reused, an archive containing a
    /// compressed entry is rejected.
    pub fn open(path: &Path) -> Result<(Arc<Self>, Vec<ArchiveEntry>), ArchiveError> {
        let data = map_or_read_archive(path)?;
        let entries = list_entries(path, data.bytes())?;
        tracing::debug!("opened {} with {} entries", path.display(), entries.len());
        let handle = Arc::new(Self {
            path: path.to_path_buf(),
            data: RwLock::new(Some(data)),
        });
        Ok((handle, entries))
    }

    /// Returns the path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the bytes of an entry.
    ///
    /// The returned guard keeps the archive open, [`ArchiveHandle::close`]
    /// blocks until it is dropped.
    pub fn resolve(&self, entry: &ReusedEntry) -> Result<MappedRwLockReadGuard<'_, [u8]>, ArchiveError> {
        let out_of_bounds = || ArchiveError::OutOfBounds {
            path: self.path.clone(),
            offset: entry.offset,
            size: entry.size,
        };
        let start = usize::try_from(entry.offset).map_err(|_| out_of_bounds())?;
        let end = usize::try_from(entry.size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .ok_or_else(out_of_bounds)?;

        RwLockReadGuard::try_map(self.data.read(), |data| {
            data.as_ref()?.bytes().get(start..end)
        })
        .map_err(|data| {
            if data.is_none() {
                ArchiveError::Closed(self.path.clone())
            } else {
                out_of_bounds()
            }
        })
    }

    /// Returns the bytes of an entry as an owned buffer.
    pub fn read(&self, entry: &ReusedEntry) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.resolve(entry)?.to_vec())
    }

    /// Releases the mapping. Returns `false` if the handle was already closed.
    pub fn close(&self) -> bool {
        let was_open = self.data.write().take().is_some();
        if was_open {
            tracing::debug!("closed {}", self.path.display());
        }
        was_open
    }

    /// Returns true once [`ArchiveHandle::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.data.read().is_none()
    }
}

/// Memory maps the archive, falling back to reading it into memory when the
/// platform refuses the mapping.
#[allow(clippy::verbose_file_reads)]
fn map_or_read_archive(path: &Path) -> Result<ArchiveData, std::io::Error> {
    let mut file = fs_err::File::open(path)?;

    // SAFETY: archives are only ever replaced through an atomic rename, the
    // mapped file itself is never modified while it is open.
    let mmap = unsafe { Mmap::map(file.file()) };

    Ok(match mmap {
        Ok(memory) => ArchiveData::Mmap(memory),
        Err(err) => {
            tracing::warn!(
                "failed to memory map {}: {err}. Reading the file to memory instead.",
                path.display()
            );
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            ArchiveData::Bytes(bytes)
        }
    })
}

fn list_entries(path: &Path, data: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;
        if file.is_dir() {
            continue;
        }

        // Only stored entries can be sliced out of the archive as-is.
        if file.compression() != CompressionMethod::Stored {
            return Err(ArchiveError::UnsupportedCompressionMethod(file.name().to_owned()));
        }

        let location = ReusedEntry {
            offset: file.data_start().expect("data_start is set by by_index_raw"),
            size: file.size(),
        };
        if location.offset.saturating_add(location.size) > data.len() as u64 {
            return Err(ArchiveError::OutOfBounds {
                path: path.to_path_buf(),
                offset: location.offset,
                size: location.size,
            });
        }

        entries.push(ArchiveEntry {
            name: file.name().to_owned(),
            location,
        });
    }
    Ok(entries)
}
