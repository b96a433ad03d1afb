//! Loading and merging `jarcache.toml` files.
//!
//! Several files can be layered on top of each other, values from later files
//! take priority over earlier ones:
//!
//! ```toml
//! [archive]
//! primary = "out/classes.jar"
//! abi = "out/classes-abi.jar"
//!
//! [abi]
//! enabled = true
//! reserved-dirs = ["META-INF/"]
//!
//! [write]
//! parallel = true
//! ```

pub mod config;

pub use config::{Config, JarcacheConfig, LoadError, MergeError, ValidationError};
