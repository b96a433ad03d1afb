//! The boundary to the ABI reduction of class files.

use std::collections::BTreeSet;

/// The class file extension.
pub const CLASS_EXTENSION: &str = ".class";

/// Internal names (`com/example/Foo`) of classes that no longer exist.
///
/// The set lives for the whole process: once a class is known to be gone,
/// every later reduction can drop references to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedClasses {
    names: BTreeSet<String>,
}

impl DeletedClasses {
    /// Records a deleted class. Returns `false` if it was already known.
    pub fn insert(&mut self, internal_name: impl Into<String>) -> bool {
        self.names.insert(internal_name.into())
    }

    /// Returns true if the class is known to be deleted.
    pub fn contains(&self, internal_name: &str) -> bool {
        self.names.contains(internal_name)
    }

    /// Returns the number of deleted classes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no class has been deleted.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates over the deleted classes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// The result of reducing a class file to its ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiOutcome {
    /// The reduced class bytes.
    Reduced(Vec<u8>),
    /// The transformer declined, the raw bytes are used as they are.
    Unchanged,
}

/// Reduces class files to their externally visible signatures.
pub trait AbiTransformer: Send + Sync {
    /// Reduces the class stored at `path`. The transformer may record classes
    /// it considers gone in `deleted` and consult it to omit references to
    /// them.
    fn transform(&self, path: &str, class_bytes: &[u8], deleted: &mut DeletedClasses)
        -> AbiOutcome;
}

/// An [`AbiTransformer`] that always declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAbi;

impl AbiTransformer for PassthroughAbi {
    fn transform(&self, _path: &str, _class_bytes: &[u8], _deleted: &mut DeletedClasses) -> AbiOutcome {
        AbiOutcome::Unchanged
    }
}

/// Returns the internal class name for a class file path, or `None` if the
/// path is not a class file.
pub fn class_name(path: &str) -> Option<&str> {
    path.strip_suffix(CLASS_EXTENSION)
        .filter(|name| !name.is_empty())
}

/// Returns true if `path` is a class file outside of the reserved directories.
pub fn is_indexed_class(path: &str, reserved_dirs: &[String]) -> bool {
    class_name(path).is_some() && !reserved_dirs.iter().any(|dir| path.starts_with(dir.as_str()))
}
