//! Writing the accumulated outputs to new archives.
//!
//! An archive is first staged in a temporary file next to its target and
//! only promoted (atomically renamed) once it was written completely. The
//! previous archive is closed after the promotion, so entries reused from it
//! stay readable for the whole write.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use jarcache_digest::hash_path;
use jarcache_node_index::{
    record::{record_path, NodeRecordWriter, NODE_RECORD_SUFFIX},
    NodeIndex, NodeIndexError,
};
use tempfile::{NamedTempFile, PersistError};
use tracing::instrument;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::{
    abi::is_indexed_class,
    accumulator::{OutputAccumulator, OutputMap},
    archive::{ArchiveError, ArchiveHandle, INDEX_ENTRY_NAME},
    node::{NodeExtractError, NodeExtractor},
};

/// An error that can occur when writing an archive.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum WriteError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("failed to write the archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("failed to read a reused entry")]
    Resolve(#[from] ArchiveError),

    #[error("failed to extract the dependency node of '{path}'")]
    NodeExtraction {
        path: String,
        #[source]
        source: NodeExtractError,
    },

    #[error("the node record of '{0}' lies beyond the 4 GiB addressable by the node index")]
    ArchiveTooLarge(String),

    #[error(transparent)]
    NodeIndex(#[from] NodeIndexError),

    #[error("failed to move the archive into place")]
    Persist(#[from] PersistError),

    #[error("an ABI archive was requested but no ABI outputs are collected")]
    NoAbiOutputs,

    #[error("ABI outputs are collected but no ABI archive was requested")]
    MissingAbiTarget,
}

/// Options that control how archives are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Directory prefixes (ending in `/`) whose classes get no node record.
    pub reserved_dirs: Vec<String>,

    /// Write the primary and the ABI archive concurrently.
    pub parallel: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            reserved_dirs: vec!["META-INF/".to_string()],
            parallel: true,
        }
    }
}

/// Where [`OutputAccumulator::write_archives`] writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTargets {
    /// The primary archive.
    pub primary: PathBuf,
    /// The ABI archive, if one is produced.
    pub abi: Option<PathBuf>,
}

/// An archive that was written and promoted to its target.
#[derive(Debug)]
pub struct WrittenArchive {
    /// The path of the archive.
    pub path: PathBuf,
    /// The number of entries, including node records and the index.
    pub entry_count: usize,
    /// The node index, for ABI archives.
    pub node_index: Option<NodeIndex>,
}

/// The result of [`OutputAccumulator::write_archives`].
#[derive(Debug)]
pub struct WriteSummary {
    /// The primary archive.
    pub primary: WrittenArchive,
    /// The ABI archive, if one was written.
    pub abi: Option<WrittenArchive>,
}

/// A completely written archive that has not been moved to its target yet.
///
/// Dropping it removes the temporary file and leaves the target untouched.
#[derive(Debug)]
struct StagedArchive {
    temp_file: NamedTempFile,
    target: PathBuf,
    entry_count: usize,
    node_index: Option<NodeIndex>,
    previous: Option<Arc<ArchiveHandle>>,
}

impl StagedArchive {
    /// Moves the archive to its target and closes the previous archive.
    fn persist(self) -> Result<WrittenArchive, WriteError> {
        self.temp_file.persist(&self.target)?;
        if let Some(previous) = self.previous {
            previous.close();
        }
        tracing::debug!(
            "wrote {} entries to {}",
            self.entry_count,
            self.target.display()
        );
        Ok(WrittenArchive {
            path: self.target,
            entry_count: self.entry_count,
            node_index: self.node_index,
        })
    }
}

/// Node records to add while writing an ABI archive.
#[derive(Clone, Copy)]
struct NodeSink<'a> {
    extractor: &'a dyn NodeExtractor,
    reserved_dirs: &'a [String],
}

/// Writes the primary outputs to a temporary file next to `target`.
fn stage_primary(outputs: &OutputMap, target: &Path) -> Result<StagedArchive, WriteError> {
    stage(outputs, target, None)
}

/// Writes the ABI outputs to a temporary file next to `target`, adding a node
/// record for every indexed class and the node index as the last entry.
fn stage_abi(
    outputs: &OutputMap,
    target: &Path,
    extractor: &dyn NodeExtractor,
    options: &WriteOptions,
) -> Result<StagedArchive, WriteError> {
    stage(
        outputs,
        target,
        Some(NodeSink {
            extractor,
            reserved_dirs: &options.reserved_dirs,
        }),
    )
}

/// Every entry is stored uncompressed with a fixed timestamp so that the same
/// outputs always produce the same bytes and can be reused in place.
fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

#[instrument(skip_all, fields(target = %target.display(), entries = outputs.len()))]
fn stage(
    outputs: &OutputMap,
    target: &Path,
    nodes: Option<NodeSink<'_>>,
) -> Result<StagedArchive, WriteError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs_err::create_dir_all(dir)?;
    let mut temp_file = tempfile::Builder::new()
        .prefix(".jarcache-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let mut node_index = nodes.map(|_| NodeIndex::with_capacity(outputs.len()));
    let mut records = NodeRecordWriter::with_capacity(4096);
    let options = entry_options();
    let mut entry_count = 0;

    let mut writer = ZipWriter::new(temp_file.as_file_mut());
    for (path, payload) in outputs.iter() {
        let bytes = outputs.resolve(path, payload)?;
        writer.start_file(path.as_str(), options)?;
        writer.write_all(&bytes)?;
        entry_count += 1;

        let (Some(nodes), Some(node_index)) = (nodes, node_index.as_mut()) else {
            continue;
        };
        if !is_indexed_class(path, nodes.reserved_dirs) {
            continue;
        }

        let key = hash_path(path);
        let record = records
            .write_record(|out| nodes.extractor.extract(&bytes, key, out))
            .map_err(|source| WriteError::NodeExtraction {
                path: path.clone(),
                source,
            })?;
        let size =
            u32::try_from(record.len()).map_err(|_| WriteError::ArchiveTooLarge(path.clone()))?;
        writer.start_file(record_path(path), options)?;
        writer.write_all(record)?;
        // The offset is only known once the archive is finished.
        node_index.put(key, record, 0, size);
        entry_count += 1;
    }
    writer.finish()?;

    if let Some(node_index) = node_index.as_mut() {
        locate_records(temp_file.as_file_mut(), node_index)?;
        append_index(temp_file.as_file_mut(), node_index)?;
        entry_count += 1;
    }
    temp_file.as_file_mut().flush()?;
    tracing::debug!(
        "staged {entry_count} entries, {} nodes",
        node_index.as_ref().map_or(0, NodeIndex::len)
    );

    Ok(StagedArchive {
        temp_file,
        target: target.to_path_buf(),
        entry_count,
        node_index,
        previous: outputs.archive().cloned(),
    })
}

/// Points every index entry at the data of its node record.
fn locate_records(file: &mut File, node_index: &mut NodeIndex) -> Result<(), WriteError> {
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let Some(class_path) = entry.name().strip_suffix(NODE_RECORD_SUFFIX) else {
            continue;
        };
        let key = hash_path(class_path);
        let Some(previous) = node_index.get(key) else {
            continue;
        };
        let offset = u32::try_from(entry.data_start().expect("data_start is set by by_index_raw"))
            .map_err(|_| WriteError::ArchiveTooLarge(class_path.to_owned()))?;
        node_index.update_offset(key, offset, previous);
    }
    Ok(())
}

fn append_index(file: &mut File, node_index: &NodeIndex) -> Result<(), WriteError> {
    let bytes = node_index.serialize()?;
    let mut writer = ZipWriter::new_append(file)?;
    writer.start_file(INDEX_ENTRY_NAME, entry_options())?;
    writer.write_all(&bytes)?;
    writer.finish()?;
    Ok(())
}

impl OutputAccumulator {
    /// Writes the primary outputs to `target`.
    ///
    /// The outputs are cleared and the previous archive is closed once the
    /// new archive is in place. On failure the accumulator is left as it was.
    pub fn write_primary(&self, target: &Path) -> Result<WrittenArchive, WriteError> {
        let mut state = self.lock_state();
        let written = stage_primary(&state.primary, target)?.persist()?;
        state.primary.clear();
        Ok(written)
    }

    /// Writes the ABI outputs, their node records and the node index to
    /// `target`.
    pub fn write_abi(
        &self,
        target: &Path,
        extractor: &dyn NodeExtractor,
        options: &WriteOptions,
    ) -> Result<WrittenArchive, WriteError> {
        let mut state = self.lock_state();
        let outputs = state.abi.as_mut().ok_or(WriteError::NoAbiOutputs)?;
        let written = stage_abi(outputs, target, extractor, options)?.persist()?;
        outputs.clear();
        Ok(written)
    }

    /// Writes the primary archive and, if requested, the ABI archive.
    ///
    /// Both archives are staged first (concurrently if
    /// [`WriteOptions::parallel`] is set) and only promoted if both were
    /// written successfully. The accumulator is locked for the whole write
    /// and its outputs are cleared once they were promoted.
    pub fn write_archives(
        &self,
        targets: &ArchiveTargets,
        extractor: &dyn NodeExtractor,
        options: &WriteOptions,
    ) -> Result<WriteSummary, WriteError> {
        let mut state = self.lock_state();

        let (primary, abi) = {
            let abi = match (targets.abi.as_deref(), state.abi.as_ref()) {
                (Some(target), Some(outputs)) => Some((target, outputs)),
                (None, None) => None,
                (Some(_), None) => return Err(WriteError::NoAbiOutputs),
                (None, Some(_)) => return Err(WriteError::MissingAbiTarget),
            };
            let primary = &state.primary;

            let primary_job = || stage_primary(primary, &targets.primary);
            let abi_job = || {
                abi.map(|(target, outputs)| stage_abi(outputs, target, extractor, options))
                    .transpose()
            };
            let (primary, abi) = if options.parallel {
                rayon::join(primary_job, abi_job)
            } else {
                (primary_job(), abi_job())
            };
            (primary?, abi?)
        };

        let primary = primary.persist()?;
        state.primary.clear();

        let abi = match abi {
            Some(staged) => {
                let written = staged.persist()?;
                if let Some(outputs) = state.abi.as_mut() {
                    outputs.clear();
                }
                Some(written)
            }
            None => None,
        };

        Ok(WriteSummary { primary, abi })
    }
}
