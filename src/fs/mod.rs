//! File System Module
//!
//! Virtual file system substrate for the shell interpreter.
//! Two implementations of the same contract:
//! - InMemoryFs: pure in-memory tree (default)
//! - BackendFs: adapter over an external engine's native API, e.g. HostFs

pub mod types;
pub mod path;
pub mod node;
pub mod walker;
pub mod in_memory_fs;
pub mod backend_adapter;
#[cfg(unix)]
pub mod host_fs;

pub use types::*;
pub use in_memory_fs::InMemoryFs;
pub use backend_adapter::{BackendFs, NativeFileType, NativeFs, NativeMetadata};
#[cfg(unix)]
pub use host_fs::HostFs;
pub use walker::{WalkSource, Walker};
