//! Directory Walker
//!
//! Lazy depth-first, pre-order enumeration of every path under a root.
//! Backends expose themselves to the walker through [`WalkSource`]; the
//! walker asks for one directory listing at a time, so nothing is held
//! between calls to `next`.

use super::path::join;
use super::types::FsError;

/// The two questions the walker asks of a backend. Both use lstat semantics:
/// a symlink to a directory is not a directory here.
pub trait WalkSource {
    fn is_directory(&self, path: &str) -> Result<bool, FsError>;

    /// Child names of a directory, in listing order.
    fn list(&self, path: &str) -> Result<Vec<String>, FsError>;
}

impl<T: WalkSource + ?Sized> WalkSource for &T {
    fn is_directory(&self, path: &str) -> Result<bool, FsError> {
        (**self).is_directory(path)
    }

    fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        (**self).list(path)
    }
}

struct Pending {
    path: String,
    is_root: bool,
}

/// Pre-order walk: each directory is yielded before its children.
///
/// A missing root yields nothing. A child that cannot be stat'ed is yielded
/// as a leaf, and a directory that cannot be listed is yielded without its
/// children.
pub struct Walker<S> {
    source: S,
    stack: Vec<Pending>,
}

impl<S: WalkSource> Walker<S> {
    pub fn new(source: S, root: &str) -> Self {
        Self {
            source,
            stack: vec![Pending {
                path: super::path::normalize_path(root),
                is_root: true,
            }],
        }
    }
}

impl<S: WalkSource> Iterator for Walker<S> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let Pending { path, is_root } = self.stack.pop()?;
        match self.source.is_directory(&path) {
            Ok(true) => {
                match self.source.list(&path) {
                    Ok(names) => {
                        for name in names.iter().rev() {
                            self.stack.push(Pending {
                                path: join(&path, name),
                                is_root: false,
                            });
                        }
                    }
                    Err(e) => tracing::trace!(path = %path, error = %e, "skipping unreadable directory"),
                }
                Some(path)
            }
            Ok(false) => Some(path),
            Err(_) if is_root => None,
            Err(e) => {
                tracing::trace!(path = %path, error = %e, "entry vanished after listing");
                Some(path)
            }
        }
    }
}
