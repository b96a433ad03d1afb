#![deny(missing_docs)]

//! An incremental build output cache for JVM compilation.
//!
//! The outputs of a compilation (class files and resources) are written to a
//! zip archive. On the next run the archive is loaded again and every entry is
//! registered as a reference into it, so entries that the compiler does not
//! produce again are copied over without being read into memory. Freshly
//! produced outputs replace their previous payload and the accumulator keeps
//! track of whether anything actually changed.
//!
//! Optionally a second archive holds the ABI (the externally visible
//! signatures) of every class, together with a dependency graph node per class
//! and a binary index over those nodes, see [`jarcache_node_index`].
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::path::Path;
//! use jarcache::{ArchiveTargets, DigestNodeExtractor, OutputFile, WriteOptions};
//!
//! let accumulator = jarcache::load_from(
//!     Some(Path::new("out/classes.jar")),
//!     Some(Path::new("out/classes-abi.jar")),
//!     true,
//! )?;
//! accumulator.register_batch([OutputFile::new("com/example/Foo.class", vec![0xCA, 0xFE])])?;
//! accumulator.register_abi_for("com/example/Foo.class", &[0xCA, 0xFE])?;
//!
//! if accumulator.is_changed() {
//!     let targets = ArchiveTargets {
//!         primary: "out/classes.jar".into(),
//!         abi: Some("out/classes-abi.jar".into()),
//!     };
//!     accumulator.write_archives(&targets, &DigestNodeExtractor, &WriteOptions::default())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod accumulator;
mod archive;
mod loader;
mod merge;
mod node;
mod payload;

pub use accumulator::{OutputAccumulator, OutputMap, PackageEntries};
pub use archive::{ArchiveEntry, ArchiveError, ArchiveHandle, INDEX_ENTRY_NAME};
pub use loader::{load_empty, load_from, LoadError};
pub use merge::{ArchiveTargets, WriteError, WriteOptions, WriteSummary, WrittenArchive};
pub use node::{DigestNodeExtractor, NodeExtractError, NodeExtractor, NodeLookupError, NodeReader};
pub use payload::{normalize_path, Frontend, OutputFile, OutputPayload, PayloadBytes, ReusedEntry};
