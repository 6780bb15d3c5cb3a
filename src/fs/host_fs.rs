//! Host directory engine.
//!
//! A [`NativeFs`] over a real directory. VFS path `/a/b` maps to
//! `<root>/a/b`; paths are normalized before mapping, so `..` cannot climb
//! out of the root. Symlink targets are stored verbatim and interpreted by
//! the adapter, never by the host.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::backend_adapter::{NativeFileType, NativeFs, NativeMetadata};
use super::path::normalize_path;

#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    /// Engine rooted at `root`, which should be an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let normalized = normalize_path(path);
        match normalized.trim_start_matches('/') {
            "" => self.root.clone(),
            rel => self.root.join(rel),
        }
    }
}

impl NativeFs for HostFs {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.host_path(path))
    }

    fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        fs::write(self.host_path(path), content)
    }

    fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.host_path(path))?;
        file.write_all(content)
    }

    fn metadata(&self, path: &str) -> io::Result<NativeMetadata> {
        let meta = fs::symlink_metadata(self.host_path(path))?;
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            NativeFileType::Symlink
        } else if file_type.is_dir() {
            NativeFileType::Directory
        } else {
            NativeFileType::File
        };
        Ok(NativeMetadata {
            kind,
            mode: u64::from(meta.mode()),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn create_dir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.host_path(path))
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.host_path(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.host_path(path))
    }

    fn remove_dir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.host_path(path))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.host_path(from), self.host_path(to))
    }

    fn copy_file(&self, from: &str, to: &str) -> io::Result<()> {
        fs::copy(self.host_path(from), self.host_path(to)).map(|_| ())
    }

    fn set_mode(&self, path: &str, mode: u64) -> io::Result<()> {
        let mode = u32::try_from(mode).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        fs::set_permissions(self.host_path(path), Permissions::from_mode(mode))
    }

    fn set_modified(&self, path: &str, mtime: SystemTime) -> io::Result<()> {
        File::open(self.host_path(path))?.set_modified(mtime)
    }

    fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.host_path(link_path))
    }

    fn read_link(&self, path: &str) -> io::Result<String> {
        let target = fs::read_link(self.host_path(path))?;
        Ok(target.to_string_lossy().into_owned())
    }
}
