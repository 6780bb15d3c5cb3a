//! just-vfs - the virtual filesystem behind a simulated bash environment
//!
//! One [`fs::FileSystem`] contract with two implementations: an in-memory
//! tree and an adapter over an external engine such as a host directory.

pub mod config;
pub mod fs;

pub use config::{BackendKind, ConfigError, VfsConfig};
pub use fs::{BackendFs, FileSystem, FsError, FsErrorKind, InMemoryFs};
#[cfg(unix)]
pub use fs::HostFs;
