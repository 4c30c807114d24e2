//! Durable storage for rendered artifacts.
//!
//! Exports live as flat files in one directory. The store writes them
//! atomically, enumerates them newest-first and resolves download names
//! without letting a name escape the directory.

pub mod error;
pub mod fs_utils;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use fs_utils::{move_file, write_atomic};
pub use store::ArtifactStore;
