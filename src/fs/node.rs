//! Node Store
//!
//! The in-memory tree behind [`InMemoryFs`](super::InMemoryFs). Directories
//! own their children by value, so the tree is acyclic by construction and
//! moving a subtree is a detach from one parent followed by an attach to
//! another. Symlinks are stored strings, never tree edges.
//!
//! All methods take paths that are already absolute; they are normalized
//! again here and link resolution happens per operation.

use std::collections::BTreeMap;
use std::time::SystemTime;

use super::path::{basename, components, dirname, is_within, join, relative_to, resolve_links};
use super::types::*;
use super::walker::{WalkSource, Walker};

/// One entry in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    File {
        content: Vec<u8>,
        mode: u32,
        mtime: SystemTime,
    },
    Directory {
        children: BTreeMap<String, Node>,
        mode: u32,
        mtime: SystemTime,
    },
    Symlink {
        target: String,
        mtime: SystemTime,
    },
}

impl Node {
    pub fn file(content: Vec<u8>) -> Self {
        Node::File {
            content,
            mode: DEFAULT_FILE_MODE,
            mtime: SystemTime::now(),
        }
    }

    pub fn directory() -> Self {
        Node::Directory {
            children: BTreeMap::new(),
            mode: DEFAULT_DIR_MODE,
            mtime: SystemTime::now(),
        }
    }

    pub fn symlink(target: &str) -> Self {
        Node::Symlink {
            target: target.to_string(),
            mtime: SystemTime::now(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Node::Symlink { .. })
    }

    pub fn mode(&self) -> u32 {
        match self {
            Node::File { mode, .. } | Node::Directory { mode, .. } => *mode,
            Node::Symlink { .. } => SYMLINK_MODE,
        }
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            Node::File { mtime, .. } | Node::Directory { mtime, .. } | Node::Symlink { mtime, .. } => {
                *mtime
            }
        }
    }

    /// Symlinks have no mode of their own; setting one is a no-op.
    pub fn set_mode(&mut self, mode: u32) {
        if let Node::File { mode: m, .. } | Node::Directory { mode: m, .. } = self {
            *m = mode & PERMISSION_MASK;
        }
    }

    pub fn set_mtime(&mut self, mtime: SystemTime) {
        match self {
            Node::File { mtime: m, .. }
            | Node::Directory { mtime: m, .. }
            | Node::Symlink { mtime: m, .. } => *m = mtime,
        }
    }

    /// Derived size: content length, 0 for directories, target length for links.
    pub fn size(&self) -> u64 {
        match self {
            Node::File { content, .. } => content.len() as u64,
            Node::Directory { .. } => 0,
            Node::Symlink { target, .. } => target.len() as u64,
        }
    }

    /// Stat record for this node itself (lstat view).
    pub fn stat(&self) -> FsStat {
        FsStat {
            is_file: self.is_file(),
            is_directory: self.is_directory(),
            is_symlink: self.is_symlink(),
            mode: self.mode(),
            size: self.size(),
            mtime: self.mtime(),
        }
    }

    fn dirent(&self, name: &str) -> DirentEntry {
        DirentEntry {
            name: name.to_string(),
            is_file: self.is_file(),
            is_directory: self.is_directory(),
            is_symlink: self.is_symlink(),
        }
    }

    /// Find a descendant by path relative to this node. Does not follow links.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let mut current = self;
        for part in components(path) {
            match current {
                Node::Directory { children, .. } => current = children.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut current = self;
        for part in components(path) {
            current = match current {
                Node::Directory { children, .. } => children.get_mut(part)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Copy of this node with a fresh mtime and, for directories, no children.
    fn shallow_copy(&self) -> Node {
        let mtime = SystemTime::now();
        match self {
            Node::File { content, mode, .. } => Node::File {
                content: content.clone(),
                mode: *mode,
                mtime,
            },
            Node::Directory { mode, .. } => Node::Directory {
                children: BTreeMap::new(),
                mode: *mode,
                mtime,
            },
            Node::Symlink { target, .. } => Node::Symlink {
                target: target.clone(),
                mtime,
            },
        }
    }
}

/// A detached node can be walked as if it were the root of its own tree.
impl WalkSource for Node {
    fn is_directory(&self, path: &str) -> Result<bool, FsError> {
        self.lookup(path)
            .map(Node::is_directory)
            .ok_or_else(|| FsError::not_found("lstat", path))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, FsError> {
        match self.lookup(path) {
            Some(Node::Directory { children, .. }) => Ok(children.keys().cloned().collect()),
            Some(_) => Err(FsError::not_a_directory("scandir", path)),
            None => Err(FsError::not_found("scandir", path)),
        }
    }
}

/// The rooted tree. The root is always a directory and cannot be removed.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Node::directory(),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.root.lookup(path)
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Node> {
        self.root.lookup_mut(path)
    }

    pub(crate) fn resolve(
        &self,
        path: &str,
        follow_last: bool,
        operation: &str,
    ) -> Result<String, FsError> {
        resolve_links(path, follow_last, operation, |p| match self.get(p) {
            Some(Node::Symlink { target, .. }) => Some(target.clone()),
            _ => None,
        })
    }

    /// Children map of the directory that holds `path`. With `create`, missing
    /// ancestors are created as directories.
    fn parent_children(
        &mut self,
        path: &str,
        create: bool,
        operation: &str,
    ) -> Result<&mut BTreeMap<String, Node>, FsError> {
        let parent = dirname(path);
        let mut current = &mut self.root;
        for part in components(&parent) {
            let children = match current {
                Node::Directory { children, .. } => children,
                _ => return Err(FsError::not_a_directory(operation, path)),
            };
            current = if create {
                children.entry(part.to_string()).or_insert_with(Node::directory)
            } else {
                children
                    .get_mut(part)
                    .ok_or_else(|| FsError::not_found(operation, path))?
            };
        }
        match current {
            Node::Directory { children, .. } => Ok(children),
            _ => Err(FsError::not_a_directory(operation, path)),
        }
    }

    /// Place `node` at `path`, creating parents and replacing any occupant.
    fn attach(&mut self, path: &str, node: Node, operation: &str) -> Result<(), FsError> {
        if path == "/" {
            return Err(FsError::already_exists(operation, path));
        }
        let name = basename(path);
        self.parent_children(path, true, operation)?.insert(name, node);
        Ok(())
    }

    fn detach(&mut self, path: &str, operation: &str) -> Result<Node, FsError> {
        if path == "/" {
            return Err(FsError::permission_denied(operation, path));
        }
        let name = basename(path);
        self.parent_children(path, false, operation)?
            .remove(&name)
            .ok_or_else(|| FsError::not_found(operation, path))
    }

    /// Seed a file with explicit metadata, creating parents.
    pub fn insert_file(
        &mut self,
        path: &str,
        content: Vec<u8>,
        mode: u32,
        mtime: SystemTime,
    ) -> Result<(), FsError> {
        let resolved = self.resolve(path, true, "open")?;
        if let Some(Node::Directory { .. }) = self.get(&resolved) {
            return Err(FsError::is_a_directory("open", path));
        }
        let node = Node::File {
            content,
            mode: mode & PERMISSION_MASK,
            mtime,
        };
        self.attach(&resolved, node, "open")
    }

    // ------------------------------------------------------------------------
    // Contract operations
    // ------------------------------------------------------------------------

    pub fn read(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let resolved = self.resolve(path, true, "open")?;
        match self.get(&resolved) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Directory { .. }) => Err(FsError::is_a_directory("read", path)),
            _ => Err(FsError::not_found("open", path)),
        }
    }

    pub fn write(&mut self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let resolved = self.resolve(path, true, "open")?;
        match self.get_mut(&resolved) {
            Some(Node::Directory { .. }) => Err(FsError::is_a_directory("open", path)),
            Some(Node::File {
                content: existing,
                mtime,
                ..
            }) => {
                *existing = content.to_vec();
                *mtime = SystemTime::now();
                Ok(())
            }
            _ => self.attach(&resolved, Node::file(content.to_vec()), "open"),
        }
    }

    pub fn append(&mut self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let resolved = self.resolve(path, true, "open")?;
        match self.get_mut(&resolved) {
            Some(Node::Directory { .. }) => Err(FsError::is_a_directory("open", path)),
            Some(Node::File {
                content: existing,
                mtime,
                ..
            }) => {
                existing.extend_from_slice(content);
                *mtime = SystemTime::now();
                Ok(())
            }
            _ => self.attach(&resolved, Node::file(content.to_vec()), "open"),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path, true, "access")
            .map(|resolved| self.get(&resolved).is_some())
            .unwrap_or(false)
    }

    pub fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let resolved = self.resolve(path, true, "stat")?;
        self.get(&resolved)
            .map(Node::stat)
            .ok_or_else(|| FsError::not_found("stat", path))
    }

    pub fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        let resolved = self.resolve(path, false, "lstat")?;
        self.get(&resolved)
            .map(Node::stat)
            .ok_or_else(|| FsError::not_found("lstat", path))
    }

    pub fn mkdir(&mut self, path: &str, recursive: bool) -> Result<(), FsError> {
        let resolved = self.resolve(path, false, "mkdir")?;
        match self.get(&resolved) {
            None => {}
            Some(Node::Directory { .. }) if recursive => return Ok(()),
            Some(Node::Symlink { .. })
                if recursive && self.stat(&resolved).is_ok_and(|s| s.is_directory) =>
            {
                return Ok(())
            }
            Some(_) => return Err(FsError::already_exists("mkdir", path)),
        }
        let name = basename(&resolved);
        self.parent_children(&resolved, recursive, "mkdir")?
            .insert(name, Node::directory());
        Ok(())
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirentEntry>, FsError> {
        let resolved = self.resolve(path, true, "scandir")?;
        match self.get(&resolved) {
            Some(Node::Directory { children, .. }) => Ok(children
                .iter()
                .map(|(name, node)| node.dirent(name))
                .collect()),
            Some(_) => Err(FsError::not_a_directory("scandir", path)),
            None => Err(FsError::not_found("scandir", path)),
        }
    }

    /// Removing a subtree is a single detach, so it never leaves a partial tree.
    pub fn rm(&mut self, path: &str, recursive: bool, force: bool) -> Result<(), FsError> {
        let resolved = self.resolve(path, false, "rm")?;
        match self.get(&resolved) {
            None if force => return Ok(()),
            None => return Err(FsError::not_found("rm", path)),
            Some(Node::Directory { .. }) if !recursive => {
                return Err(FsError::is_a_directory("rm", path))
            }
            Some(_) => {}
        }
        self.detach(&resolved, "rm")?;
        tracing::debug!(path = %resolved, "removed node");
        Ok(())
    }

    /// Copy `src` to `dest`. The source is snapshotted first, then walked
    /// depth-first so every directory exists before its children are placed.
    pub fn cp(&mut self, src: &str, dest: &str, recursive: bool) -> Result<(), FsError> {
        let src_resolved = self.resolve(src, true, "cp")?;
        let snapshot = self
            .get(&src_resolved)
            .cloned()
            .ok_or_else(|| FsError::not_found("cp", src))?;
        if snapshot.is_directory() && !recursive {
            return Err(FsError::is_a_directory("cp", src));
        }
        let dest_resolved = self.resolve(dest, true, "cp")?;
        if snapshot.is_directory() && is_within(&dest_resolved, &src_resolved) {
            return Err(FsError::invalid_argument("cp", dest));
        }

        for entry in Walker::new(&snapshot, "/") {
            let Some(node) = snapshot.lookup(&entry) else {
                continue;
            };
            let target = match relative_to(&entry, "/") {
                Some("") | None => dest_resolved.clone(),
                Some(rel) => join(&dest_resolved, rel),
            };
            self.place_copy(&target, node)?;
        }
        Ok(())
    }

    fn place_copy(&mut self, target: &str, source: &Node) -> Result<(), FsError> {
        let occupant_is_dir = self.get(target).map(Node::is_directory);
        match (source.is_directory(), occupant_is_dir) {
            (true, Some(true)) => Ok(()),
            (true, Some(false)) => Err(FsError::already_exists("cp", target)),
            (false, Some(true)) => Err(FsError::is_a_directory("cp", target)),
            _ => self.attach(target, source.shallow_copy(), "cp"),
        }
    }

    /// Rename: detach from the source parent, attach under the destination
    /// parent. Links are moved, not followed.
    pub fn mv(&mut self, src: &str, dest: &str) -> Result<(), FsError> {
        let src_resolved = self.resolve(src, false, "rename")?;
        if src_resolved == "/" {
            return Err(FsError::permission_denied("rename", src));
        }
        let src_is_dir = match self.get(&src_resolved) {
            Some(node) => node.is_directory(),
            None => return Err(FsError::not_found("rename", src)),
        };
        let dest_resolved = self.resolve(dest, false, "rename")?;
        if src_resolved == dest_resolved {
            return Ok(());
        }
        if src_is_dir && is_within(&dest_resolved, &src_resolved) {
            return Err(FsError::invalid_argument("rename", dest));
        }
        match self.get(&dest_resolved) {
            Some(Node::Directory { .. }) => return Err(FsError::is_a_directory("rename", dest)),
            Some(_) if src_is_dir => return Err(FsError::not_a_directory("rename", dest)),
            _ => {}
        }

        // Make sure the destination can hold the node before detaching it.
        self.parent_children(&dest_resolved, true, "rename")?;
        let node = self.detach(&src_resolved, "rename")?;
        self.attach(&dest_resolved, node, "rename")?;
        tracing::debug!(from = %src_resolved, to = %dest_resolved, "moved node");
        Ok(())
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<(), FsError> {
        let resolved = self.resolve(path, true, "chmod")?;
        match self.get_mut(&resolved) {
            Some(node) => {
                node.set_mode(mode);
                Ok(())
            }
            None => Err(FsError::not_found("chmod", path)),
        }
    }

    pub fn symlink(&mut self, target: &str, link_path: &str) -> Result<(), FsError> {
        let resolved = self.resolve(link_path, false, "symlink")?;
        if self.get(&resolved).is_some() {
            return Err(FsError::already_exists("symlink", link_path));
        }
        self.attach(&resolved, Node::symlink(target), "symlink")
    }

    /// Hard link as a snapshot: the new file gets a copy of the content.
    pub fn link(&mut self, existing_path: &str, new_path: &str) -> Result<(), FsError> {
        let existing = self.resolve(existing_path, true, "link")?;
        let snapshot = match self.get(&existing) {
            Some(node) if node.is_file() => node.clone(),
            Some(_) => return Err(FsError::permission_denied("link", existing_path)),
            None => return Err(FsError::not_found("link", existing_path)),
        };
        let new = self.resolve(new_path, false, "link")?;
        if self.get(&new).is_some() {
            return Err(FsError::already_exists("link", new_path));
        }
        self.attach(&new, snapshot, "link")
    }

    pub fn readlink(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.resolve(path, false, "readlink")?;
        match self.get(&resolved) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FsError::invalid_argument("readlink", path)),
            None => Err(FsError::not_found("readlink", path)),
        }
    }

    pub fn realpath(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.resolve(path, true, "realpath")?;
        if self.get(&resolved).is_none() {
            return Err(FsError::not_found("realpath", path));
        }
        Ok(resolved)
    }

    pub fn utimes(&mut self, path: &str, mtime: SystemTime) -> Result<(), FsError> {
        let resolved = self.resolve(path, true, "utimes")?;
        match self.get_mut(&resolved) {
            Some(node) => {
                node.set_mtime(mtime);
                Ok(())
            }
            None => Err(FsError::not_found("utimes", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.write("/src/a.txt", b"a").unwrap();
        tree.write("/src/sub/b.txt", b"b").unwrap();
        tree.symlink("../a.txt", "/src/sub/up").unwrap();
        tree
    }

    #[test]
    fn test_node_methods() {
        let file = Node::file(b"hello".to_vec());
        assert!(file.is_file());
        assert_eq!(file.mode(), DEFAULT_FILE_MODE);
        assert_eq!(file.size(), 5);

        let dir = Node::directory();
        assert!(dir.is_directory());
        assert_eq!(dir.size(), 0);

        let mut link = Node::symlink("/foo");
        assert!(link.is_symlink());
        assert_eq!(link.size(), 4);
        link.set_mode(0o600);
        assert_eq!(link.mode(), SYMLINK_MODE);
    }

    #[test]
    fn test_set_mode_keeps_permission_bits_only() {
        let mut file = Node::file(Vec::new());
        file.set_mode(0o100_755);
        assert_eq!(file.mode(), 0o755);
    }

    #[test]
    fn test_lookup_does_not_cross_files() {
        let tree = sample();
        assert!(tree.get("/src/sub/b.txt").is_some());
        assert!(tree.get("/src/a.txt/x").is_none());
        assert!(tree.get("/").is_some_and(Node::is_directory));
    }

    #[test]
    fn test_write_creates_parents() {
        let tree = sample();
        assert!(tree.get("/src/sub").is_some_and(Node::is_directory));
    }

    #[test]
    fn test_write_under_file_is_not_a_directory() {
        let mut tree = sample();
        let err = tree.write("/src/a.txt/child", b"x").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotADirectory);
    }

    #[test]
    fn test_write_keeps_mode() {
        let mut tree = sample();
        tree.chmod("/src/a.txt", 0o600).unwrap();
        tree.write("/src/a.txt", b"new").unwrap();
        assert_eq!(tree.stat("/src/a.txt").unwrap().mode, 0o600);
    }

    #[test]
    fn test_relative_symlink_resolves_against_link_dir() {
        let tree = sample();
        assert_eq!(tree.read("/src/sub/up").unwrap(), b"a");
        assert_eq!(tree.realpath("/src/sub/up").unwrap(), "/src/a.txt");
    }

    #[test]
    fn test_root_is_protected() {
        let mut tree = sample();
        let err = tree.rm("/", true, false).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
        let err = tree.mv("/", "/elsewhere").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
        assert!(tree.get("/src").is_some());
    }

    #[test]
    fn test_cp_recursive_preserves_links_verbatim() {
        let mut tree = sample();
        tree.cp("/src", "/dst", true).unwrap();
        assert_eq!(tree.readlink("/dst/sub/up").unwrap(), "../a.txt");
        assert_eq!(tree.read("/dst/sub/up").unwrap(), b"a");
        assert_eq!(tree.read("/dst/sub/b.txt").unwrap(), b"b");
    }

    #[test]
    fn test_cp_into_itself_is_rejected() {
        let mut tree = sample();
        let err = tree.cp("/src", "/src/sub/copy", true).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
        assert!(tree.get("/src/sub/copy").is_none());
    }

    #[test]
    fn test_cp_merges_into_existing_directory() {
        let mut tree = sample();
        tree.write("/dst/keep.txt", b"k").unwrap();
        tree.cp("/src", "/dst", true).unwrap();
        assert_eq!(tree.read("/dst/keep.txt").unwrap(), b"k");
        assert_eq!(tree.read("/dst/a.txt").unwrap(), b"a");
    }

    #[test]
    fn test_cp_file_onto_directory_fails() {
        let mut tree = sample();
        let err = tree.cp("/src/a.txt", "/src/sub", false).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::IsADirectory);
    }

    #[test]
    fn test_mv_moves_subtree() {
        let mut tree = sample();
        tree.mv("/src", "/moved/here").unwrap();
        assert!(tree.get("/src").is_none());
        assert_eq!(tree.read("/moved/here/sub/b.txt").unwrap(), b"b");
    }

    #[test]
    fn test_mv_moves_link_not_target() {
        let mut tree = sample();
        tree.mv("/src/sub/up", "/src/sub/up2").unwrap();
        assert_eq!(tree.readlink("/src/sub/up2").unwrap(), "../a.txt");
        assert_eq!(tree.read("/src/a.txt").unwrap(), b"a");
    }

    #[test]
    fn test_mv_rejections() {
        let mut tree = sample();
        let err = tree.mv("/src", "/src/sub/inner").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::InvalidArgument);
        let err = tree.mv("/src/a.txt", "/src/sub").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::IsADirectory);
        let err = tree.mv("/src/sub", "/src/a.txt").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotADirectory);
        let err = tree.mv("/src/a.txt/x", "/y").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotFound);
        assert!(tree.get("/src/a.txt").is_some());
    }

    #[test]
    fn test_mv_onto_itself_is_noop() {
        let mut tree = sample();
        tree.mv("/src/a.txt", "/src/./a.txt").unwrap();
        assert_eq!(tree.read("/src/a.txt").unwrap(), b"a");
    }

    #[test]
    fn test_mkdir_through_symlinked_directory() {
        let mut tree = sample();
        tree.symlink("/src/sub", "/alias").unwrap();
        tree.mkdir("/alias", true).unwrap();
        tree.mkdir("/alias/new", false).unwrap();
        assert!(tree.get("/src/sub/new").is_some_and(Node::is_directory));
        let err = tree.mkdir("/alias", false).unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AlreadyExists);
    }

    #[test]
    fn test_link_on_directory_is_denied() {
        let mut tree = sample();
        let err = tree.link("/src", "/hard").unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::PermissionDenied);
    }

    #[test]
    fn test_symlink_loop_is_reported() {
        let mut tree = Tree::new();
        tree.symlink("/b", "/a").unwrap();
        tree.symlink("/a", "/b").unwrap();
        let err = tree.read("/a").unwrap_err();
        assert!(matches!(err, FsError::SymlinkLoop { .. }));
        assert!(!tree.exists("/a"));
        assert!(tree.lstat("/a").unwrap().is_symlink);
    }

    #[test]
    fn test_walk_detached_node() {
        let tree = sample();
        let src = tree.get("/src").unwrap();
        let paths: Vec<String> = Walker::new(src, "/").collect();
        assert_eq!(paths, vec!["/", "/a.txt", "/sub", "/sub/b.txt", "/sub/up"]);
    }
}
