//! File System Types
//!
//! Core types and the `FileSystem` contract shared by every backend.

use std::collections::HashMap;
use std::io;
use std::str::FromStr;
use std::time::SystemTime;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Default permission bits for new regular files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default permission bits for new directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Permission bits reported for symlinks.
pub const SYMLINK_MODE: u32 = 0o777;
/// Mask selecting permission bits out of a full `st_mode`.
pub const PERMISSION_MASK: u32 = 0o7777;

/// File system errors
#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("ENOENT: no such file or directory, {operation} '{path}'")]
    NotFound { path: String, operation: String },

    #[error("EEXIST: file already exists, {operation} '{path}'")]
    AlreadyExists { path: String, operation: String },

    #[error("EISDIR: illegal operation on a directory, {operation} '{path}'")]
    IsADirectory { path: String, operation: String },

    #[error("ENOTDIR: not a directory, {operation} '{path}'")]
    NotADirectory { path: String, operation: String },

    #[error("EINVAL: invalid argument, {operation} '{path}'")]
    InvalidArgument { path: String, operation: String },

    #[error("ELOOP: too many levels of symbolic links, {operation} '{path}'")]
    SymlinkLoop { path: String, operation: String },

    #[error("EPERM: operation not permitted, {operation} '{path}'")]
    PermissionDenied { path: String, operation: String },

    #[error("EIO: {message}, {operation} '{path}'")]
    Io {
        path: String,
        operation: String,
        message: String,
    },
}

/// Classification of an [`FsError`], independent of the path and operation
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    InvalidArgument,
    PermissionDenied,
    /// Unclassifiable backend failure. Never produced by the in-memory backend.
    Io,
}

impl FsError {
    pub fn kind(&self) -> FsErrorKind {
        match self {
            FsError::NotFound { .. } => FsErrorKind::NotFound,
            FsError::AlreadyExists { .. } => FsErrorKind::AlreadyExists,
            FsError::IsADirectory { .. } => FsErrorKind::IsADirectory,
            FsError::NotADirectory { .. } => FsErrorKind::NotADirectory,
            FsError::InvalidArgument { .. } | FsError::SymlinkLoop { .. } => {
                FsErrorKind::InvalidArgument
            }
            FsError::PermissionDenied { .. } => FsErrorKind::PermissionDenied,
            FsError::Io { .. } => FsErrorKind::Io,
        }
    }

    /// Path the failing operation was applied to.
    pub fn path(&self) -> &str {
        match self {
            FsError::NotFound { path, .. }
            | FsError::AlreadyExists { path, .. }
            | FsError::IsADirectory { path, .. }
            | FsError::NotADirectory { path, .. }
            | FsError::InvalidArgument { path, .. }
            | FsError::SymlinkLoop { path, .. }
            | FsError::PermissionDenied { path, .. }
            | FsError::Io { path, .. } => path,
        }
    }

    pub fn not_found(operation: &str, path: &str) -> Self {
        FsError::NotFound {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn already_exists(operation: &str, path: &str) -> Self {
        FsError::AlreadyExists {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn is_a_directory(operation: &str, path: &str) -> Self {
        FsError::IsADirectory {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn not_a_directory(operation: &str, path: &str) -> Self {
        FsError::NotADirectory {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn invalid_argument(operation: &str, path: &str) -> Self {
        FsError::InvalidArgument {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn permission_denied(operation: &str, path: &str) -> Self {
        FsError::PermissionDenied {
            path: path.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Classify a native I/O error from an external backend.
    pub fn from_io(err: &io::Error, operation: &str, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::not_found(operation, path),
            io::ErrorKind::AlreadyExists => FsError::already_exists(operation, path),
            io::ErrorKind::IsADirectory => FsError::is_a_directory(operation, path),
            io::ErrorKind::NotADirectory => FsError::not_a_directory(operation, path),
            io::ErrorKind::PermissionDenied => FsError::permission_denied(operation, path),
            io::ErrorKind::InvalidInput => FsError::invalid_argument(operation, path),
            _ => FsError::Io {
                path: path.to_string(),
                operation: operation.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Supported buffer encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferEncoding {
    #[default]
    Utf8,
    Ascii,
    Binary,
    Base64,
    Hex,
    Latin1,
}

impl FromStr for BufferEncoding {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "ascii" => Ok(Self::Ascii),
            "binary" => Ok(Self::Binary),
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            "latin1" => Ok(Self::Latin1),
            _ => Err(FsError::invalid_argument("encoding", s)),
        }
    }
}

/// File content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        FileContent::Text(s)
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        FileContent::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(v: Vec<u8>) -> Self {
        FileContent::Binary(v)
    }
}

/// File status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub mode: u32,
    pub size: u64,
    pub mtime: SystemTime,
}

/// Directory entry with type information (similar to Node's Dirent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirentEntry {
    pub name: String,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
}

/// Options for mkdir operation
#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
    pub recursive: bool,
}

/// Options for rm operation
#[derive(Debug, Clone, Default)]
pub struct RmOptions {
    pub recursive: bool,
    pub force: bool,
}

/// Options for cp operation
#[derive(Debug, Clone, Default)]
pub struct CpOptions {
    pub recursive: bool,
}

/// Options for reading a file as text. No encoding means UTF-8.
#[derive(Debug, Clone, Default)]
pub struct ReadFileOptions {
    pub encoding: Option<BufferEncoding>,
}

/// Options for writing text content. No encoding means UTF-8.
#[derive(Debug, Clone, Default)]
pub struct WriteFileOptions {
    pub encoding: Option<BufferEncoding>,
}

/// Initial file specification with optional metadata
#[derive(Debug, Clone)]
pub struct FileInit {
    pub content: FileContent,
    pub mode: Option<u32>,
    pub mtime: Option<SystemTime>,
}

impl From<String> for FileInit {
    fn from(s: String) -> Self {
        FileInit {
            content: FileContent::Text(s),
            mode: None,
            mtime: None,
        }
    }
}

impl From<&str> for FileInit {
    fn from(s: &str) -> Self {
        FileInit::from(s.to_string())
    }
}

/// Initial files map type
pub type InitialFiles = HashMap<String, FileInit>;

/// Lazy depth-first sequence of paths produced by [`FileSystem::walk`].
pub type Walk<'a> = Box<dyn Iterator<Item = String> + Send + 'a>;

/// Abstract filesystem interface that can be implemented by different backends.
///
/// Paths may be relative; they are resolved against `/`. Callers holding a
/// working directory should go through [`FileSystem::resolve_path`] first.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read the contents of a file as a string (lossy utf8)
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let buf = self.read_file_buffer(path).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read the contents of a file as text in the requested encoding
    async fn read_file_with(
        &self,
        path: &str,
        options: &ReadFileOptions,
    ) -> Result<String, FsError> {
        let buf = self.read_file_buffer(path).await?;
        Ok(from_buffer(&buf, options.encoding.unwrap_or_default()))
    }

    /// Read the contents of a file as bytes (binary)
    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Write content to a file, creating it and its parents if needed
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError>;

    /// Write text or binary content, decoding text through the given encoding
    async fn write_file_with(
        &self,
        path: &str,
        content: &FileContent,
        options: &WriteFileOptions,
    ) -> Result<(), FsError> {
        let bytes = to_buffer(content, options.encoding.unwrap_or_default())
            .ok_or_else(|| FsError::invalid_argument("write", path))?;
        self.write_file(path, &bytes).await
    }

    /// Append content to a file, creating it and its parents if needed
    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError>;

    /// Check if a path exists (following symlinks)
    async fn exists(&self, path: &str) -> bool;

    /// Get file/directory information (follows symlinks)
    async fn stat(&self, path: &str) -> Result<FsStat, FsError>;

    /// Get file/directory information (does not follow symlinks)
    async fn lstat(&self, path: &str) -> Result<FsStat, FsError>;

    /// Create a directory
    async fn mkdir(&self, path: &str, options: &MkdirOptions) -> Result<(), FsError>;

    /// Read directory contents (returns entry names, sorted)
    async fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let entries = self.readdir_with_file_types(path).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    /// Read directory contents with file type information
    async fn readdir_with_file_types(&self, path: &str) -> Result<Vec<DirentEntry>, FsError>;

    /// Remove a file or directory
    async fn rm(&self, path: &str, options: &RmOptions) -> Result<(), FsError>;

    /// Copy a file or directory
    async fn cp(&self, src: &str, dest: &str, options: &CpOptions) -> Result<(), FsError>;

    /// Move/rename a file or directory
    async fn mv(&self, src: &str, dest: &str) -> Result<(), FsError>;

    /// Change file/directory permissions
    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError>;

    /// Create a symbolic link
    async fn symlink(&self, target: &str, link_path: &str) -> Result<(), FsError>;

    /// Create a hard link (a snapshot copy of the file's content)
    async fn link(&self, existing_path: &str, new_path: &str) -> Result<(), FsError>;

    /// Read the target of a symbolic link
    async fn readlink(&self, path: &str) -> Result<String, FsError>;

    /// Resolve all symlinks in a path to get the canonical physical path
    async fn realpath(&self, path: &str) -> Result<String, FsError>;

    /// Set modification time of a file
    async fn utimes(&self, path: &str, mtime: SystemTime) -> Result<(), FsError>;

    /// Resolve a relative path against a base path
    fn resolve_path(&self, base: &str, path: &str) -> String {
        super::path::resolve_path(base, path)
    }

    /// Depth-first, pre-order walk of every path under `root`
    fn walk(&self, root: &str) -> Walk<'_>;

    /// Get all paths in the filesystem (useful for glob matching)
    fn get_all_paths(&self) -> Vec<String> {
        self.walk("/").collect()
    }
}

// ============================================================================
// Encoding utilities
// ============================================================================

/// Convert content to bytes with encoding. `None` if text is not valid in it:
/// malformed base64 or hex, or a char above U+00FF for latin1/binary.
pub fn to_buffer(content: &FileContent, encoding: BufferEncoding) -> Option<Vec<u8>> {
    match content {
        FileContent::Binary(bytes) => Some(bytes.clone()),
        FileContent::Text(text) => match encoding {
            BufferEncoding::Base64 => {
                let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                STANDARD.decode(compact).ok()
            }
            BufferEncoding::Hex => hex_decode(text),
            BufferEncoding::Binary | BufferEncoding::Latin1 => {
                // One byte per char; anything above U+00FF has no byte.
                text.chars().map(|c| u8::try_from(c).ok()).collect()
            }
            BufferEncoding::Utf8 | BufferEncoding::Ascii => Some(text.as_bytes().to_vec()),
        },
    }
}

/// Convert bytes to string with encoding
pub fn from_buffer(buffer: &[u8], encoding: BufferEncoding) -> String {
    match encoding {
        BufferEncoding::Base64 => STANDARD.encode(buffer),
        BufferEncoding::Hex => hex_encode(buffer),
        BufferEncoding::Binary | BufferEncoding::Latin1 => {
            buffer.iter().map(|&b| b as char).collect()
        }
        BufferEncoding::Utf8 | BufferEncoding::Ascii => {
            String::from_utf8_lossy(buffer).into_owned()
        }
    }
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<char> = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16)?;
            let lo = pair[1].to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
