//! The accumulator that collects everything that goes into the next archives.

use std::{collections::BTreeMap, sync::Arc};

use jarcache_node_index::NodeIndex;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    abi::{class_name, AbiOutcome, AbiTransformer, DeletedClasses, PassthroughAbi},
    archive::{ArchiveError, ArchiveHandle},
    payload::{normalize_path, Frontend, OutputFile, OutputPayload, PayloadBytes, ReusedEntry},
};

/// The outputs of one archive, ordered by path.
///
/// If any entry is [`OutputPayload::Reused`] the map also owns the handle of
/// the archive those entries live in.
#[derive(Debug, Default)]
pub struct OutputMap {
    entries: BTreeMap<String, OutputPayload>,
    archive: Option<Arc<ArchiveHandle>>,
}

impl OutputMap {
    /// Constructs an empty map that is not backed by a previous archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an empty map whose reused entries live in `archive`.
    pub fn with_archive(archive: Arc<ArchiveHandle>) -> Self {
        Self {
            entries: BTreeMap::new(),
            archive: Some(archive),
        }
    }

    /// Registers an entry of the backing archive.
    pub(crate) fn insert_reused(&mut self, path: String, entry: ReusedEntry) {
        self.entries.insert(path, OutputPayload::Reused(entry));
    }

    /// Returns the handle of the previous archive, if any.
    pub fn archive(&self) -> Option<&Arc<ArchiveHandle>> {
        self.archive.as_ref()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the payload registered for `path`.
    pub fn get(&self, path: &str) -> Option<&OutputPayload> {
        self.entries.get(path)
    }

    /// Iterates over all entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutputPayload)> {
        self.entries.iter()
    }

    /// Returns the bytes of a payload stored in this map.
    pub fn resolve<'a>(
        &'a self,
        path: &str,
        payload: &'a OutputPayload,
    ) -> Result<PayloadBytes<'a>, ArchiveError> {
        match payload {
            OutputPayload::Fresh(bytes) | OutputPayload::FrontendTagged { bytes, .. } => {
                Ok(PayloadBytes::Borrowed(bytes))
            }
            OutputPayload::Reused(entry) => {
                let archive = self
                    .archive
                    .as_ref()
                    .ok_or_else(|| ArchiveError::MissingArchive(path.to_owned()))?;
                Ok(PayloadBytes::Mapped(archive.resolve(entry)?))
            }
        }
    }

    /// Returns a copy of the bytes registered for `path`.
    pub fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match self.entries.get(path) {
            Some(payload) => Ok(Some(self.resolve(path, payload)?.to_vec())),
            None => Ok(None),
        }
    }

    /// Returns true if `payload` differs from the payload stored at `path`.
    fn differs(&self, path: &str, payload: &OutputPayload) -> Result<bool, ArchiveError> {
        let changed = match self.entries.get(path) {
            None => true,
            Some(previous) => *self.resolve(path, previous)? != *self.resolve(path, payload)?,
        };
        if changed {
            tracing::debug!("{path} differs from the previous run");
        }
        Ok(changed)
    }

    /// Drops every entry together with the handle of the backing archive.
    pub(crate) fn clear(&mut self) {
        *self = OutputMap::default();
    }

    fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }
}

#[derive(Debug, Default)]
pub(crate) struct AccumulatorState {
    pub(crate) primary: OutputMap,
    pub(crate) abi: Option<OutputMap>,
    deleted_classes: DeletedClasses,
    changed: bool,
}

impl AccumulatorState {
    fn mark_changed(&mut self, path: &str) {
        if !self.changed {
            tracing::debug!("first change detected at {path}");
            self.changed = true;
        }
    }
}

/// Stores `payload` in `map`, comparing it against the previous payload only
/// as long as no change has been seen. Nothing is stored if the comparison
/// fails.
fn upsert(
    map: &mut OutputMap,
    changed: &mut bool,
    path: String,
    payload: OutputPayload,
) -> Result<(), ArchiveError> {
    if !*changed {
        *changed = map.differs(&path, &payload)?;
    }
    map.entries.insert(path, payload);
    Ok(())
}

/// The single point of truth for what goes into the next archive(s).
///
/// Every producer (one per compiler front-end, plus ABI registration) shares
/// one accumulator. All mutations take the same lock, which covers the primary
/// outputs, the ABI outputs and the change flag, so the flag is always
/// updated together with the maps.
pub struct OutputAccumulator {
    state: Mutex<AccumulatorState>,
    abi_transformer: Arc<dyn AbiTransformer>,
    previous_node_index: Option<NodeIndex>,
}

impl std::fmt::Debug for OutputAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputAccumulator")
            .field("state", &self.state)
            .field("previous_node_index", &self.previous_node_index)
            .finish_non_exhaustive()
    }
}

impl OutputAccumulator {
    /// Constructs an accumulator from the primary outputs and, if an ABI
    /// archive is produced as well, the ABI outputs.
    pub fn new(primary: OutputMap, abi: Option<OutputMap>) -> Self {
        Self {
            state: Mutex::new(AccumulatorState {
                primary,
                abi,
                ..AccumulatorState::default()
            }),
            abi_transformer: Arc::new(PassthroughAbi),
            previous_node_index: None,
        }
    }

    /// Sets the transformer used by [`OutputAccumulator::register_abi_for`].
    #[must_use]
    pub fn with_abi_transformer(mut self, transformer: Arc<dyn AbiTransformer>) -> Self {
        self.abi_transformer = transformer;
        self
    }

    pub(crate) fn with_previous_node_index(mut self, index: Option<NodeIndex>) -> Self {
        self.previous_node_index = index;
        self
    }

    /// The node index of the ABI archive this accumulator was seeded from.
    pub fn previous_node_index(&self) -> Option<&NodeIndex> {
        self.previous_node_index.as_ref()
    }

    /// Returns true if ABI outputs are collected as well.
    pub fn has_abi(&self) -> bool {
        self.state.lock().abi.is_some()
    }

    /// Returns true if anything registered or removed so far differs from the
    /// state the accumulator was seeded with.
    pub fn is_changed(&self) -> bool {
        self.state.lock().changed
    }

    /// Returns the number of primary outputs.
    pub fn len(&self) -> usize {
        self.state.lock().primary.len()
    }

    /// Returns true if there are no primary outputs.
    pub fn is_empty(&self) -> bool {
        self.state.lock().primary.is_empty()
    }

    /// Returns true if a primary output is registered for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().primary.get(&normalize_path(path)).is_some()
    }

    /// Returns the content of the primary output at `path`.
    pub fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.state.lock().primary.read(&normalize_path(path))
    }

    /// Returns the content of the ABI output at `path`.
    pub fn read_abi(&self, path: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match &self.state.lock().abi {
            Some(abi) => abi.read(&normalize_path(path)),
            None => Ok(None),
        }
    }

    /// Returns the paths of all primary outputs tagged with `frontend`.
    pub fn paths_from(&self, frontend: Frontend) -> Vec<String> {
        self.state
            .lock()
            .primary
            .iter()
            .filter(|(_, payload)| payload.origin() == Some(frontend))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Returns the classes recorded as deleted so far.
    pub fn deleted_classes(&self) -> DeletedClasses {
        self.state.lock().deleted_classes.clone()
    }

    /// Registers a batch of outputs produced by a compiler front-end.
    ///
    /// Paths are normalized to forward slashes. Registering a path again
    /// replaces its payload; the accumulator is marked as changed if the new
    /// bytes differ from the replaced ones or the path is new.
    ///
    /// The batch is applied as a whole: if comparing against a previous
    /// payload fails, none of its outputs are stored.
    pub fn register_batch(
        &self,
        outputs: impl IntoIterator<Item = OutputFile>,
    ) -> Result<(), ArchiveError> {
        let outputs: Vec<_> = outputs
            .into_iter()
            .map(|output| {
                (
                    normalize_path(&output.path),
                    OutputPayload::produced(output.content, output.origin),
                )
            })
            .collect();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Compare everything first so a failure leaves the outputs untouched.
        let mut changed = state.changed;
        for (path, payload) in &outputs {
            if changed {
                break;
            }
            changed = state.primary.differs(path, payload)?;
        }

        state.changed = changed;
        state.primary.entries.extend(outputs);
        Ok(())
    }

    /// Reduces `raw` to its ABI and stores it as the ABI output at `path`.
    ///
    /// If the transformer declines, the raw bytes are stored. Returns `false`
    /// without doing anything if no ABI outputs are collected.
    pub fn register_abi_for(&self, path: &str, raw: &[u8]) -> Result<bool, ArchiveError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(abi) = state.abi.as_mut() else {
            return Ok(false);
        };

        let path = normalize_path(path);
        let bytes = match self
            .abi_transformer
            .transform(&path, raw, &mut state.deleted_classes)
        {
            AbiOutcome::Reduced(bytes) => bytes,
            AbiOutcome::Unchanged => raw.to_vec(),
        };
        upsert(abi, &mut state.changed, path, OutputPayload::Fresh(bytes))?;
        Ok(true)
    }

    /// Removes the output at `path` from both the primary and the ABI outputs.
    ///
    /// Returns true if anything was removed. A removed class is recorded in
    /// the deleted classes.
    pub fn remove(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let removed_primary = state.primary.remove(&path);
        let removed_abi = state.abi.as_mut().is_some_and(|abi| abi.remove(&path));
        if !(removed_primary || removed_abi) {
            return false;
        }

        if let Some(name) = class_name(&path) {
            state.deleted_classes.insert(name);
        }
        state.mark_changed(&path);
        true
    }

    /// Returns the primary outputs of a package.
    ///
    /// `package` is a dotted package name (`com.example`), the empty string
    /// selects the root package. Unless `recursive` is set, outputs of
    /// sub-packages are skipped. Only the matching paths are collected up
    /// front, bytes are resolved while iterating.
    pub fn iterate_package(&self, package: &str, recursive: bool) -> PackageEntries<'_> {
        let prefix = if package.is_empty() {
            String::new()
        } else {
            format!("{}/", package.replace('.', "/"))
        };

        let state = self.state.lock();
        let paths = state
            .primary
            .entries
            .range(prefix.clone()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(&prefix))
            .filter(|path| recursive || !path[prefix.len()..].contains('/'))
            .cloned()
            .collect();

        PackageEntries {
            accumulator: self,
            paths,
        }
    }

    /// Locks the accumulator for writing its outputs.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, AccumulatorState> {
        self.state.lock()
    }
}

/// The outputs of one package, see [`OutputAccumulator::iterate_package`].
///
/// The sequence can be iterated any number of times.
#[derive(Debug)]
pub struct PackageEntries<'a> {
    accumulator: &'a OutputAccumulator,
    paths: Vec<String>,
}

impl<'a> PackageEntries<'a> {
    /// Returns the paths in this package.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Iterates over `(path, bytes)` of the package. Outputs removed after
    /// the sequence was created are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Result<(String, Vec<u8>), ArchiveError>> + '_ {
        self.paths.iter().filter_map(move |path| {
            self.accumulator
                .read(path)
                .transpose()
                .map(|bytes| bytes.map(|bytes| (path.clone(), bytes)))
        })
    }
}
