//! In-Memory File System Implementation
//!
//! A pure in-memory virtual file system. Every operation takes the tree lock
//! once and runs to completion synchronously, so a call is atomic with respect
//! to other calls on the same instance. Data is lost when the value is dropped.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use async_trait::async_trait;

use super::node::Tree;
use super::path::normalize_path;
use super::types::*;
use super::walker::{WalkSource, Walker};

/// In-memory virtual file system.
#[derive(Debug, Default)]
pub struct InMemoryFs {
    tree: RwLock<Tree>,
}

impl InMemoryFs {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with initial files. Parents are created as needed; an entry that
    /// cannot be placed (e.g. beneath another file) is reported as an error.
    pub fn with_files(files: &InitialFiles) -> Result<Self, FsError> {
        let fs = Self::new();
        {
            let mut tree = fs.write_tree();
            for (path, init) in files {
                let content = to_buffer(&init.content, BufferEncoding::Utf8)
                    .ok_or_else(|| FsError::invalid_argument("open", path))?;
                tree.insert_file(
                    &normalize_path(path),
                    content,
                    init.mode.unwrap_or(DEFAULT_FILE_MODE),
                    init.mtime.unwrap_or_else(SystemTime::now),
                )?;
            }
        }
        Ok(fs)
    }

    /// Synchronous `mkdir -p` for initialization.
    pub fn mkdir_sync(&self, path: &str) -> Result<(), FsError> {
        self.write_tree().mkdir(&normalize_path(path), true)
    }

    /// Synchronous write_file for initialization.
    pub fn write_file_sync(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        self.write_tree().write(&normalize_path(path), content)
    }

    // A poisoned lock only means another caller panicked; every mutation is
    // validated before it is applied, so the tree itself is still consistent.
    fn read_tree(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WalkSource for InMemoryFs {
    fn is_directory(&self, path: &str) -> Result<bool, FsError> {
        WalkSource::is_directory(self.read_tree().root(), path)
    }

    fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        WalkSource::list(self.read_tree().root(), path)
    }
}

// ============================================================================
// FileSystem trait implementation
// ============================================================================

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.read_tree().read(&normalize_path(path))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        self.write_tree().write(&normalize_path(path), content)
    }

    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        self.write_tree().append(&normalize_path(path), content)
    }

    async fn exists(&self, path: &str) -> bool {
        self.read_tree().exists(&normalize_path(path))
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        self.read_tree().stat(&normalize_path(path))
    }

    async fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        self.read_tree().lstat(&normalize_path(path))
    }

    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError> {
        self.write_tree().mkdir(&normalize_path(path), options.recursive)
    }

    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        self.read_tree().readdir(&normalize_path(path))
    }

    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError> {
        self.write_tree()
            .rm(&normalize_path(path), options.recursive, options.force)
    }

    async fn cp(&self, src: &str, dest: &str, options: &CpOptions) -> Result<(), FsError> {
        self.write_tree()
            .cp(&normalize_path(src), &normalize_path(dest), options.recursive)
    }

    async fn mv(&self, src: &str, dest: &str) -> Result<(), FsError> {
        self.write_tree().mv(&normalize_path(src), &normalize_path(dest))
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        self.write_tree().chmod(&normalize_path(path), mode)
    }

    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError> {
        self.write_tree().symlink(target, &normalize_path(link_path))
    }

    async fn link(&self, existing_path: &str, new_path: &str) -> Result<(), FsError> {
        self.write_tree()
            .link(&normalize_path(existing_path), &normalize_path(new_path))
    }

    async fn readlink(&self, path: &str) -> Result<String, FsError> {
        self.read_tree().readlink(&normalize_path(path))
    }

    async fn realpath(&self, path: &str) -> Result<String, FsError> {
        self.read_tree().realpath(&normalize_path(path))
    }

    async fn utimes(&self, path: &str, mtime: SystemTime) -> Result<(), FsError> {
        self.write_tree().utimes(&normalize_path(path), mtime)
    }

    /// Symlinked ancestors of `root` are resolved; a symlink as the root
    /// itself is walked as a leaf.
    fn walk(&self, root: &str) -> Walk<'_> {
        let resolved = self.read_tree().resolve(&normalize_path(root), false, "scandir");
        match resolved {
            Ok(resolved) => Box::new(Walker::new(self, &resolved)),
            Err(_) => Box::new(std::iter::empty()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
