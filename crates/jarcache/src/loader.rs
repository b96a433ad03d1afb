//! Seeding an [`OutputAccumulator`] from the archives of the previous run.

use std::path::{Path, PathBuf};

use jarcache_node_index::{record::NODE_RECORD_SUFFIX, NodeIndex};
use tracing::instrument;

use crate::{
    abi::CLASS_EXTENSION,
    accumulator::{OutputAccumulator, OutputMap},
    archive::{ArchiveEntry, ArchiveError, ArchiveHandle, INDEX_ENTRY_NAME},
};

/// An error that can occur when loading the previous archives.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("an ABI archive ({}) was given without a primary archive", .0.display())]
    UnpairedAbiArchive(PathBuf),

    #[error("the previous ABI archive is missing, a full rebuild is required")]
    AbiArchiveMissing(Option<PathBuf>),

    #[error("failed to load {}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },
}

impl LoadError {
    /// Returns true if the caller should discard the previous outputs and
    /// compile everything from scratch.
    pub fn requires_full_rebuild(&self) -> bool {
        matches!(self, LoadError::AbiArchiveMissing(_))
    }
}

/// Returns an accumulator that does not reuse anything.
pub fn load_empty(with_abi: bool) -> OutputAccumulator {
    OutputAccumulator::new(OutputMap::new(), with_abi.then(OutputMap::new))
}

/// Seeds an accumulator from the archives written by the previous run.
///
/// A missing or empty `previous` archive yields an empty accumulator. If
/// `with_abi` is set the previous ABI archive must exist as well, otherwise
/// [`LoadError::AbiArchiveMissing`] is returned and nothing is kept open.
#[instrument(skip_all, fields(previous = ?previous, with_abi = with_abi))]
pub fn load_from(
    previous: Option<&Path>,
    previous_abi: Option<&Path>,
    with_abi: bool,
) -> Result<OutputAccumulator, LoadError> {
    let Some(primary_path) = previous else {
        if let Some(abi_path) = previous_abi {
            return Err(LoadError::UnpairedAbiArchive(abi_path.to_path_buf()));
        }
        return Ok(load_empty(with_abi));
    };

    if !has_content(primary_path).map_err(|source| archive_error(primary_path, source))? {
        tracing::debug!("no previous archive at {}", primary_path.display());
        return Ok(load_empty(with_abi));
    }

    let primary =
        load_archive(primary_path, false).map_err(|source| archive_error(primary_path, source))?;
    if !with_abi {
        return Ok(OutputAccumulator::new(primary.map, None));
    }

    attach_abi(primary, previous_abi)
}

/// Loads the previous ABI archive next to an already loaded primary archive.
///
/// The primary archive is closed if the ABI archive cannot be loaded.
fn attach_abi(
    primary: LoadedArchive,
    previous_abi: Option<&Path>,
) -> Result<OutputAccumulator, LoadError> {
    let abi_path = match previous_abi {
        Some(path) => match has_content(path) {
            Ok(true) => path,
            Ok(false) => return Err(abi_missing(primary, Some(path))),
            Err(source) => {
                primary.close();
                return Err(archive_error(path, source));
            }
        },
        None => return Err(abi_missing(primary, None)),
    };

    let abi = match load_archive(abi_path, true) {
        Ok(abi) => abi,
        Err(source) => {
            primary.close();
            return Err(archive_error(abi_path, source));
        }
    };

    tracing::debug!(
        "reusing {} outputs and {} ABI outputs",
        primary.map.len(),
        abi.map.len()
    );
    Ok(OutputAccumulator::new(primary.map, Some(abi.map)).with_previous_node_index(abi.node_index))
}

fn archive_error(path: &Path, source: ArchiveError) -> LoadError {
    LoadError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

fn abi_missing(primary: LoadedArchive, path: Option<&Path>) -> LoadError {
    tracing::warn!("the previous ABI archive is missing, discarding the previous outputs");
    primary.close();
    LoadError::AbiArchiveMissing(path.map(Path::to_path_buf))
}

fn has_content(path: &Path) -> Result<bool, ArchiveError> {
    match fs_err::metadata(path) {
        Ok(metadata) => Ok(metadata.is_file() && metadata.len() > 0),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

struct LoadedArchive {
    map: OutputMap,
    node_index: Option<NodeIndex>,
}

impl LoadedArchive {
    fn close(&self) {
        if let Some(archive) = self.map.archive() {
            archive.close();
        }
    }
}

fn load_archive(path: &Path, abi: bool) -> Result<LoadedArchive, ArchiveError> {
    let (handle, entries) = ArchiveHandle::open(path)?;
    let mut map = OutputMap::with_archive(handle.clone());
    let result = seed(&handle, &mut map, entries, abi);
    match result {
        Ok(node_index) => Ok(LoadedArchive { map, node_index }),
        Err(err) => {
            handle.close();
            Err(err)
        }
    }
}

fn seed(
    handle: &ArchiveHandle,
    map: &mut OutputMap,
    entries: Vec<ArchiveEntry>,
    abi: bool,
) -> Result<Option<NodeIndex>, ArchiveError> {
    let mut node_index = None;
    for entry in entries {
        if entry.name == INDEX_ENTRY_NAME {
            if abi {
                node_index = Some(NodeIndex::deserialize(&handle.resolve(&entry.location)?)?);
            }
            continue;
        }
        if abi && is_node_record(&entry.name) {
            continue;
        }
        map.insert_reused(entry.name, entry.location);
    }
    Ok(node_index)
}

/// Node records are regenerated on every write.
fn is_node_record(name: &str) -> bool {
    name.strip_suffix(NODE_RECORD_SUFFIX)
        .is_some_and(|class_path| class_path.ends_with(CLASS_EXTENSION))
}
