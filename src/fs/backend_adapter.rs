//! Backend Adapter
//!
//! Implements [`FileSystem`] on top of an external engine's blocking native
//! API. The engine only has to store bytes and report metadata; everything
//! the contract adds on top (auto-created parents, recursive copy and
//! removal, symlink chasing, snapshot hard links, error classification) is
//! done here.
//!
//! Symlinks are chased by the adapter itself using `metadata` and
//! `read_link`, so absolute link targets stay inside the VFS namespace.

use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::path::{components, dirname, is_within, join, normalize_path, relative_to, resolve_links};
use super::types::*;
use super::walker::{WalkSource, Walker};

/// Entry type as reported by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFileType {
    File,
    Directory,
    Symlink,
}

/// Raw metadata in the engine's own shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMetadata {
    pub kind: NativeFileType,
    /// Full mode word, type bits included.
    pub mode: u64,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Blocking storage primitives of an external filesystem engine.
///
/// Paths are absolute and normalized. Implementations do not need to follow
/// symlinks anywhere except where the host would (e.g. `read` of a link).
pub trait NativeFs: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Create or truncate, then write.
    fn write(&self, path: &str, content: &[u8]) -> io::Result<()>;

    /// Create if missing, then append.
    fn append(&self, path: &str, content: &[u8]) -> io::Result<()>;

    /// lstat: does not follow a final symlink.
    fn metadata(&self, path: &str) -> io::Result<NativeMetadata>;

    /// Create a single directory; the parent must exist.
    fn create_dir(&self, path: &str) -> io::Result<()>;

    /// Names of the entries of a directory, in any order.
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>>;

    fn remove_file(&self, path: &str) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &str) -> io::Result<()>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Copy one regular file, replacing `to` if it exists.
    fn copy_file(&self, from: &str, to: &str) -> io::Result<()>;

    fn set_mode(&self, path: &str, mode: u64) -> io::Result<()>;

    fn set_modified(&self, path: &str, mtime: SystemTime) -> io::Result<()>;

    fn symlink(&self, target: &str, link_path: &str) -> io::Result<()>;

    fn read_link(&self, path: &str) -> io::Result<String>;
}

impl<T: NativeFs + ?Sized> NativeFs for Arc<T> {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }
    fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        (**self).write(path, content)
    }
    fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
        (**self).append(path, content)
    }
    fn metadata(&self, path: &str) -> io::Result<NativeMetadata> {
        (**self).metadata(path)
    }
    fn create_dir(&self, path: &str) -> io::Result<()> {
        (**self).create_dir(path)
    }
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        (**self).read_dir(path)
    }
    fn remove_file(&self, path: &str) -> io::Result<()> {
        (**self).remove_file(path)
    }
    fn remove_dir(&self, path: &str) -> io::Result<()> {
        (**self).remove_dir(path)
    }
    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        (**self).rename(from, to)
    }
    fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        (**self).copy_file(from, to)
    }
    fn set_mode(&self, path: &str, mode: u64) -> io::Result<()> {
        (**self).set_mode(path, mode)
    }
    fn set_modified(&self, path: &str, mtime: SystemTime) -> io::Result<()> {
        (**self).set_modified(path, mtime)
    }
    fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        (**self).symlink(target, link_path)
    }
    fn read_link(&self, path: &str) -> io::Result<String> {
        (**self).read_link(path)
    }
}

/// Contract-level filesystem over a native engine.
///
/// Several adapters may share one engine (e.g. through an `Arc`); they then
/// see each other's writes, last write wins.
#[derive(Debug)]
pub struct BackendFs<B> {
    native: B,
}

impl<B: NativeFs> BackendFs<B> {
    pub fn new(native: B) -> Self {
        Self { native }
    }

    pub fn native(&self) -> &B {
        &self.native
    }

    fn resolve(&self, path: &str, follow_last: bool, operation: &str) -> Result<String, FsError> {
        resolve_links(path, follow_last, operation, |p| match self.native.metadata(p) {
            Ok(meta) if meta.kind == NativeFileType::Symlink => self.native.read_link(p).ok(),
            _ => None,
        })
    }

    /// lstat that reports absence as `None`. A path running through a file
    /// counts as absent, as it does in the in-memory tree.
    fn probe(&self, path: &str, operation: &str) -> Result<Option<NativeMetadata>, FsError> {
        match self.native.metadata(path) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                Ok(None)
            }
            Err(e) => Err(FsError::from_io(&e, operation, path)),
        }
    }

    /// Create every missing ancestor of `path` as a directory.
    fn ensure_parent_dirs(&self, path: &str, operation: &str) -> Result<(), FsError> {
        let mut current = "/".to_string();
        for part in components(&dirname(path)) {
            current = join(&current, part);
            match self.probe(&current, operation)? {
                Some(meta) if meta.kind == NativeFileType::Directory => {}
                Some(_) => return Err(FsError::not_a_directory(operation, path)),
                None => {
                    tracing::debug!(path = %current, "creating missing parent directory");
                    self.native
                        .create_dir(&current)
                        .map_err(|e| FsError::from_io(&e, operation, path))?;
                }
            }
        }
        Ok(())
    }

    fn place_copy(&self, entry: &str, target: &str) -> Result<(), FsError> {
        let source = self
            .probe(entry, "cp")?
            .ok_or_else(|| FsError::not_found("cp", entry))?;
        let occupant = self.probe(target, "cp")?.map(|m| m.kind);
        let io_err = |e: io::Error| FsError::from_io(&e, "cp", target);

        match (source.kind, occupant) {
            (NativeFileType::Directory, Some(NativeFileType::Directory)) => return Ok(()),
            (NativeFileType::Directory, Some(_)) => return Err(FsError::already_exists("cp", target)),
            (_, Some(NativeFileType::Directory)) => return Err(FsError::is_a_directory("cp", target)),
            // `copy_file` replaces a file in place; a link on either side has
            // to go first so the copy does not write through it.
            (NativeFileType::Symlink, Some(_)) | (_, Some(NativeFileType::Symlink)) => {
                self.native.remove_file(target).map_err(io_err)?
            }
            _ => {}
        }

        self.ensure_parent_dirs(target, "cp")?;
        match source.kind {
            NativeFileType::Directory => {
                self.native.create_dir(target).map_err(io_err)?;
                self.native.set_mode(target, source.mode & 0o7777).map_err(io_err)
            }
            NativeFileType::File => self.native.copy_file(entry, target).map_err(io_err),
            NativeFileType::Symlink => {
                let link_target = self
                    .native
                    .read_link(entry)
                    .map_err(|e| FsError::from_io(&e, "cp", entry))?;
                self.native.symlink(&link_target, target).map_err(io_err)
            }
        }
    }

    /// Remove a subtree bottom-up: the walk is pre-order, so its reverse
    /// visits children before their parents.
    fn remove_tree(&self, root: &str, force: bool) -> Result<(), FsError> {
        let paths: Vec<String> = Walker::new(self, root).collect();
        for path in paths.iter().rev() {
            let removed = match self.native.metadata(path) {
                Ok(meta) if meta.kind == NativeFileType::Directory => self.native.remove_dir(path),
                Ok(_) => self.native.remove_file(path),
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => {}
                Err(e) if force => {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(path = %path, error = %e, "ignoring removal failure");
                    }
                }
                Err(e) => return Err(FsError::from_io(&e, "rm", path)),
            }
        }
        Ok(())
    }
}

fn to_stat(meta: &NativeMetadata) -> FsStat {
    let is_directory = meta.kind == NativeFileType::Directory;
    FsStat {
        is_file: meta.kind == NativeFileType::File,
        is_directory,
        is_symlink: meta.kind == NativeFileType::Symlink,
        mode: (meta.mode & u64::from(PERMISSION_MASK)) as u32,
        size: if is_directory { 0 } else { meta.len },
        mtime: meta.modified.unwrap_or(UNIX_EPOCH),
    }
}

impl<B: NativeFs> WalkSource for BackendFs<B> {
    fn is_directory(&self, path: &str) -> Result<bool, FsError> {
        self.native
            .metadata(path)
            .map(|meta| meta.kind == NativeFileType::Directory)
            .map_err(|e| FsError::from_io(&e, "lstat", path))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        let mut names = self
            .native
            .read_dir(path)
            .map_err(|e| FsError::from_io(&e, "scandir", path))?;
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl<B: NativeFs> FileSystem for BackendFs<B> {
    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "open")?;
        match self.probe(&resolved, "open")? {
            Some(meta) if meta.kind == NativeFileType::Directory => {
                Err(FsError::is_a_directory("read", &path))
            }
            Some(_) => self
                .native
                .read(&resolved)
                .map_err(|e| FsError::from_io(&e, "open", &path)),
            None => Err(FsError::not_found("open", &path)),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "open")?;
        if let Some(meta) = self.probe(&resolved, "open")? {
            if meta.kind == NativeFileType::Directory {
                return Err(FsError::is_a_directory("open", &path));
            }
        }
        self.ensure_parent_dirs(&resolved, "open")?;
        self.native
            .write(&resolved, content)
            .map_err(|e| FsError::from_io(&e, "open", &path))
    }

    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "open")?;
        if let Some(meta) = self.probe(&resolved, "open")? {
            if meta.kind == NativeFileType::Directory {
                return Err(FsError::is_a_directory("open", &path));
            }
        }
        self.ensure_parent_dirs(&resolved, "open")?;
        self.native
            .append(&resolved, content)
            .map_err(|e| FsError::from_io(&e, "open", &path))
    }

    async fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        match self.resolve(&path, true, "access") {
            Ok(resolved) => self.native.metadata(&resolved).is_ok(),
            Err(_) => false,
        }
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "stat")?;
        self.probe(&resolved, "stat")?
            .map(|meta| to_stat(&meta))
            .ok_or_else(|| FsError::not_found("stat", &path))
    }

    async fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, false, "lstat")?;
        self.probe(&resolved, "lstat")?
            .map(|meta| to_stat(&meta))
            .ok_or_else(|| FsError::not_found("lstat", &path))
    }

    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, false, "mkdir")?;
        if let Some(meta) = self.probe(&resolved, "mkdir")? {
            let is_dir = match meta.kind {
                NativeFileType::Directory => true,
                NativeFileType::Symlink => self.stat(&resolved).await.is_ok_and(|s| s.is_directory),
                NativeFileType::File => false,
            };
            if options.recursive && is_dir {
                return Ok(());
            }
            return Err(FsError::already_exists("mkdir", &path));
        }
        if options.recursive {
            self.ensure_parent_dirs(&resolved, "mkdir")?;
        }
        self.native
            .create_dir(&resolved)
            .map_err(|e| FsError::from_io(&e, "mkdir", &path))
    }

    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "scandir")?;
        match self.probe(&resolved, "scandir")? {
            Some(meta) if meta.kind == NativeFileType::Directory => {}
            Some(_) => return Err(FsError::not_a_directory("scandir", &path)),
            None => return Err(FsError::not_found("scandir", &path)),
        }
        let names = self.list(&resolved)?;
        Ok(names
            .into_iter()
            .filter_map(|name| {
                // Entries that vanish between listing and lstat are dropped.
                let meta = self.native.metadata(&join(&resolved, &name)).ok()?;
                Some(DirentEntry {
                    is_file: meta.kind == NativeFileType::File,
                    is_directory: meta.kind == NativeFileType::Directory,
                    is_symlink: meta.kind == NativeFileType::Symlink,
                    name,
                })
            })
            .collect())
    }

    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, false, "rm")?;
        let kind = match self.probe(&resolved, "rm") {
            Ok(Some(meta)) => meta.kind,
            Ok(None) if options.force => return Ok(()),
            Ok(None) => return Err(FsError::not_found("rm", &path)),
            Err(e) if options.force => {
                tracing::warn!(path = %path, error = %e, "ignoring removal failure");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if kind == NativeFileType::Directory && !options.recursive {
            return Err(FsError::is_a_directory("rm", &path));
        }
        if resolved == "/" {
            return Err(FsError::permission_denied("rm", &path));
        }
        if kind == NativeFileType::Directory {
            self.remove_tree(&resolved, options.force)?;
        } else if let Err(e) = self.native.remove_file(&resolved) {
            if !options.force {
                return Err(FsError::from_io(&e, "rm", &path));
            }
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path, error = %e, "ignoring removal failure");
            }
        }
        tracing::debug!(path = %resolved, "removed entry");
        Ok(())
    }

    async fn cp(&self, src: &str, dest: &str, options: &CpOptions) -> Result<(), FsError> {
        let src = normalize_path(src);
        let dest = normalize_path(dest);
        let src_resolved = self.resolve(&src, true, "cp")?;
        let src_is_dir = match self.probe(&src_resolved, "cp")? {
            Some(meta) => meta.kind == NativeFileType::Directory,
            None => return Err(FsError::not_found("cp", &src)),
        };
        if src_is_dir && !options.recursive {
            return Err(FsError::is_a_directory("cp", &src));
        }
        let dest_resolved = self.resolve(&dest, true, "cp")?;
        if src_is_dir && is_within(&dest_resolved, &src_resolved) {
            return Err(FsError::invalid_argument("cp", &dest));
        }
        if src_resolved == dest_resolved {
            return Ok(());
        }

        // Pre-order: each destination directory exists before its children.
        for entry in Walker::new(self, &src_resolved) {
            let target = match relative_to(&entry, &src_resolved) {
                Some("") | None => dest_resolved.clone(),
                Some(rel) => join(&dest_resolved, rel),
            };
            self.place_copy(&entry, &target)?;
        }
        Ok(())
    }

    async fn mv(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let src = normalize_path(src);
        let dest = normalize_path(dest);
        let src_resolved = self.resolve(&src, false, "rename")?;
        if src_resolved == "/" {
            return Err(FsError::permission_denied("rename", &src));
        }
        let src_is_dir = match self.probe(&src_resolved, "rename")? {
            Some(meta) => meta.kind == NativeFileType::Directory,
            None => return Err(FsError::not_found("rename", &src)),
        };
        let dest_resolved = self.resolve(&dest, false, "rename")?;
        if src_resolved == dest_resolved {
            return Ok(());
        }
        if src_is_dir && is_within(&dest_resolved, &src_resolved) {
            return Err(FsError::invalid_argument("rename", &dest));
        }
        match self.probe(&dest_resolved, "rename")?.map(|m| m.kind) {
            Some(NativeFileType::Directory) => return Err(FsError::is_a_directory("rename", &dest)),
            Some(_) if src_is_dir => return Err(FsError::not_a_directory("rename", &dest)),
            _ => {}
        }
        self.ensure_parent_dirs(&dest_resolved, "rename")?;
        self.native
            .rename(&src_resolved, &dest_resolved)
            .map_err(|e| FsError::from_io(&e, "rename", &src))?;
        tracing::debug!(from = %src_resolved, to = %dest_resolved, "moved entry");
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "chmod")?;
        if self.probe(&resolved, "chmod")?.is_none() {
            return Err(FsError::not_found("chmod", &path));
        }
        self.native
            .set_mode(&resolved, u64::from(mode & PERMISSION_MASK))
            .map_err(|e| FsError::from_io(&e, "chmod", &path))
    }

    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError> {
        let link_path = normalize_path(link_path);
        let resolved = self.resolve(&link_path, false, "symlink")?;
        if self.probe(&resolved, "symlink")?.is_some() {
            return Err(FsError::already_exists("symlink", &link_path));
        }
        self.ensure_parent_dirs(&resolved, "symlink")?;
        self.native
            .symlink(target, &resolved)
            .map_err(|e| FsError::from_io(&e, "symlink", &link_path))
    }

    async fn link(&self, existing_path: &str, new_path: &str) -> Result<(), FsError> {
        let existing_path = normalize_path(existing_path);
        let new_path = normalize_path(new_path);
        let existing = self.resolve(&existing_path, true, "link")?;
        match self.probe(&existing, "link")? {
            Some(meta) if meta.kind == NativeFileType::File => {}
            Some(_) => return Err(FsError::permission_denied("link", &existing_path)),
            None => return Err(FsError::not_found("link", &existing_path)),
        }
        let new = self.resolve(&new_path, false, "link")?;
        if self.probe(&new, "link")?.is_some() {
            return Err(FsError::already_exists("link", &new_path));
        }
        self.ensure_parent_dirs(&new, "link")?;
        self.native
            .copy_file(&existing, &new)
            .map_err(|e| FsError::from_io(&e, "link", &new_path))
    }

    async fn readlink(&self, path: &str) -> Result<String, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, false, "readlink")?;
        match self.probe(&resolved, "readlink")? {
            Some(meta) if meta.kind == NativeFileType::Symlink => self
                .native
                .read_link(&resolved)
                .map_err(|e| FsError::from_io(&e, "readlink", &path)),
            Some(_) => Err(FsError::invalid_argument("readlink", &path)),
            None => Err(FsError::not_found("readlink", &path)),
        }
    }

    async fn realpath(&self, path: &str) -> Result<String, FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "realpath")?;
        if self.probe(&resolved, "realpath")?.is_none() {
            return Err(FsError::not_found("realpath", &path));
        }
        Ok(resolved)
    }

    async fn utimes(&self, path: &str, mtime: SystemTime) -> Result<(), FsError> {
        let path = normalize_path(path);
        let resolved = self.resolve(&path, true, "utimes")?;
        if self.probe(&resolved, "utimes")?.is_none() {
            return Err(FsError::not_found("utimes", &path));
        }
        self.native
            .set_modified(&resolved, mtime)
            .map_err(|e| FsError::from_io(&e, "utimes", &path))
    }

    /// The root is resolved first (its final component is not followed), so
    /// the engine is never handed a path running through a symlink.
    fn walk(&self, root: &str) -> Walk<'_> {
        match self.resolve(&normalize_path(root), false, "scandir") {
            Ok(resolved) => Box::new(Walker::new(self, &resolved)),
            Err(_) => Box::new(std::iter::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Entry {
        File(Vec<u8>, u64),
        Dir(u64),
        Link(String),
    }

    /// Flat path-keyed engine with no POSIX checks of its own beyond what
    /// the adapter relies on. Paths listed in `broken` fail with an
    /// unclassifiable error, and so does every `rename` once `rename_fails`
    /// is set.
    #[derive(Default)]
    struct MapFs {
        entries: Mutex<BTreeMap<String, Entry>>,
        broken: Mutex<Vec<String>>,
        rename_fails: std::sync::atomic::AtomicBool,
    }

    impl MapFs {
        fn new() -> Self {
            let fs = Self::default();
            fs.entries.lock().unwrap().insert("/".into(), Entry::Dir(0o40755));
            fs
        }

        fn check(&self, path: &str) -> io::Result<()> {
            if self.broken.lock().unwrap().iter().any(|b| b == path) {
                return Err(io::Error::new(io::ErrorKind::Other, "device fault"));
            }
            Ok(())
        }

        fn get(&self, path: &str) -> io::Result<Entry> {
            self.check(path)?;
            self.entries
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn put(&self, path: &str, entry: Entry) -> io::Result<()> {
            self.check(path)?;
            let parent = dirname(path);
            match self.entries.lock().unwrap().get(&parent) {
                Some(Entry::Dir(_)) => {}
                Some(_) => return Err(io::Error::from(io::ErrorKind::NotADirectory)),
                None => return Err(io::Error::from(io::ErrorKind::NotFound)),
            }
            self.entries.lock().unwrap().insert(path.to_string(), entry);
            Ok(())
        }
    }

    impl NativeFs for MapFs {
        fn read(&self, path: &str) -> io::Result<Vec<u8>> {
            match self.get(path)? {
                Entry::File(data, _) => Ok(data),
                _ => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            }
        }
        fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
            let mode = match self.get(path) {
                Ok(Entry::File(_, mode)) => mode,
                _ => 0o100644,
            };
            self.put(path, Entry::File(content.to_vec(), mode))
        }
        fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
            let mut data = self.read(path).unwrap_or_default();
            data.extend_from_slice(content);
            self.write(path, &data)
        }
        fn metadata(&self, path: &str) -> io::Result<NativeMetadata> {
            let (kind, mode, len) = match self.get(path)? {
                Entry::File(data, mode) => (NativeFileType::File, mode, data.len() as u64),
                Entry::Dir(mode) => (NativeFileType::Directory, mode, 4096),
                Entry::Link(target) => (NativeFileType::Symlink, 0o120777, target.len() as u64),
            };
            Ok(NativeMetadata {
                kind,
                mode,
                len,
                modified: None,
            })
        }
        fn create_dir(&self, path: &str) -> io::Result<()> {
            if self.get(path).is_ok() {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            self.put(path, Entry::Dir(0o40755))
        }
        fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
            self.check(path)?;
            let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
                .collect())
        }
        fn remove_file(&self, path: &str) -> io::Result<()> {
            self.check(path)?;
            self.entries
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
        fn remove_dir(&self, path: &str) -> io::Result<()> {
            if !self.read_dir(path)?.is_empty() {
                return Err(io::Error::from(io::ErrorKind::DirectoryNotEmpty));
            }
            self.remove_file(path)
        }
        fn rename(&self, from: &str, to: &str) -> io::Result<()> {
            if self.rename_fails.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "device fault"));
            }
            let mut entries = self.entries.lock().unwrap();
            let moved: Vec<(String, Entry)> = entries
                .iter()
                .filter(|(k, _)| is_within(k, from))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, entry) in moved {
                entries.remove(&key);
                let rel = relative_to(&key, from).unwrap_or_default();
                let new_key = if rel.is_empty() { to.to_string() } else { join(to, rel) };
                entries.insert(new_key, entry);
            }
            Ok(())
        }
        fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
            let entry = self.get(from)?;
            self.put(to, entry)
        }
        fn set_mode(&self, path: &str, mode: u64) -> io::Result<()> {
            let updated = match self.get(path)? {
                Entry::File(data, old) => Entry::File(data, (old & !0o7777) | mode),
                Entry::Dir(old) => Entry::Dir((old & !0o7777) | mode),
                link => link,
            };
            self.entries.lock().unwrap().insert(path.to_string(), updated);
            Ok(())
        }
        fn set_modified(&self, path: &str, _mtime: SystemTime) -> io::Result<()> {
            self.get(path).map(|_| ())
        }
        fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
            self.put(link_path, Entry::Link(target.to_string()))
        }
        fn read_link(&self, path: &str) -> io::Result<String> {
            match self.get(path)? {
                Entry::Link(target) => Ok(target),
                _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
            }
        }
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let fs = BackendFs::new(MapFs::new());
        fs.write_file("/a/b/c.txt", b"deep").await.unwrap();
        assert!(fs.stat("/a/b").await.unwrap().is_directory);
        assert_eq!(fs.read_file("/a/b/c.txt").await.unwrap(), "deep");
    }

    #[tokio::test]
    async fn test_stat_is_normalized() {
        let fs = BackendFs::new(MapFs::new());
        fs.write_file("/f", b"12345").await.unwrap();
        fs.mkdir("/d", &MkdirOptions::default()).await.unwrap();

        let file = fs.stat("/f").await.unwrap();
        assert_eq!(file.mode, 0o644);
        assert_eq!(file.size, 5);
        assert_eq!(file.mtime, UNIX_EPOCH);

        let dir = fs.stat("/d").await.unwrap();
        assert_eq!(dir.mode, 0o755);
        assert_eq!(dir.size, 0);
    }

    #[tokio::test]
    async fn test_absolute_link_targets_stay_inside_vfs() {
        let fs = BackendFs::new(MapFs::new());
        fs.write_file("/etc/motd", b"inside").await.unwrap();
        fs.symlink("/etc", "/home/cfg").await.unwrap();
        assert_eq!(fs.read_file("/home/cfg/motd").await.unwrap(), "inside");
        assert_eq!(fs.realpath("/home/cfg/motd").await.unwrap(), "/etc/motd");
    }

    #[tokio::test]
    async fn test_unclassified_error_is_io() {
        let native = MapFs::new();
        native.write("/bad", b"x").unwrap();
        native.broken.lock().unwrap().push("/bad".into());
        let fs = BackendFs::new(native);
        let err = fs.read_file("/bad").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Io);
        assert!(err.to_string().contains("device fault"));
    }

    #[tokio::test]
    async fn test_rm_force_swallows_failures() {
        let native = MapFs::new();
        native.create_dir("/tree").unwrap();
        native.write("/tree/stuck", b"x").unwrap();
        native.write("/tree/free", b"y").unwrap();
        native.broken.lock().unwrap().push("/tree/stuck".into());
        let fs = BackendFs::new(native);

        let err = fs
            .rm("/tree", &RmOptions { recursive: true, force: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Io);

        fs.rm("/tree", &RmOptions { recursive: true, force: true }).await.unwrap();
        assert!(!fs.exists("/tree/free").await);
    }

    #[tokio::test]
    async fn test_recursive_cp_and_rm() {
        let fs = BackendFs::new(MapFs::new());
        fs.write_file("/src/a.txt", b"a").await.unwrap();
        fs.write_file("/src/sub/b.txt", b"b").await.unwrap();
        fs.symlink("../a.txt", "/src/sub/up").await.unwrap();
        fs.chmod("/src/sub", 0o700).await.unwrap();

        fs.cp("/src", "/dst", &CpOptions { recursive: true }).await.unwrap();
        assert_eq!(fs.read_file("/dst/sub/b.txt").await.unwrap(), "b");
        assert_eq!(fs.readlink("/dst/sub/up").await.unwrap(), "../a.txt");
        assert_eq!(fs.stat("/dst/sub").await.unwrap().mode, 0o700);

        fs.rm("/src", &RmOptions { recursive: true, force: false }).await.unwrap();
        assert!(!fs.exists("/src").await);
        assert_eq!(fs.read_file("/dst/a.txt").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_failed_mv_keeps_created_parents() {
        let native = MapFs::new();
        native.write("/a.txt", b"a").unwrap();
        native.rename_fails.store(true, std::sync::atomic::Ordering::SeqCst);
        let fs = BackendFs::new(native);

        let err = fs.mv("/a.txt", "/x/y/a.txt").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Io);
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), "a");
        assert!(fs.stat("/x/y").await.unwrap().is_directory);
        assert!(!fs.exists("/x/y/a.txt").await);
    }

    #[tokio::test]
    async fn test_link_is_snapshot_copy() {
        let fs = BackendFs::new(MapFs::new());
        fs.write_file("/orig", b"v1").await.unwrap();
        fs.link("/orig", "/deep/hard").await.unwrap();
        fs.write_file("/orig", b"v2").await.unwrap();
        assert_eq!(fs.read_file("/deep/hard").await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_shared_engine_has_no_isolation() {
        let engine = Arc::new(MapFs::new());
        let one = BackendFs::new(Arc::clone(&engine));
        let two = BackendFs::new(engine);
        one.write_file("/shared.txt", b"first").await.unwrap();
        two.write_file("/shared.txt", b"second").await.unwrap();
        assert_eq!(one.read_file("/shared.txt").await.unwrap(), "second");
    }
}
