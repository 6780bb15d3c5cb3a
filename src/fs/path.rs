//! Path Resolution
//!
//! Lexical path normalization plus the symlink-chasing routine shared by
//! every backend. Nothing here touches storage directly: link lookups go
//! through a caller-supplied closure.

use super::types::FsError;

/// Maximum number of symlinks followed while resolving a single path.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Normalize a path: collapse `.`, resolve `..` lexically (never above root),
/// collapse repeated separators and drop trailing ones.
///
/// Relative input is treated as rooted at `/`.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    let mut resolved: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            _ => resolved.push(part),
        }
    }
    if resolved.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", resolved.join("/"))
    }
}

/// Resolve `path` against `base`. Absolute input ignores `base`.
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else if base.is_empty() || base == "/" {
        normalize_path(&format!("/{}", path))
    } else {
        normalize_path(&format!("{}/{}", base, path))
    }
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn dirname(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => normalized[..pos].to_string(),
    }
}

/// Final component of a path, or `/` for the root.
pub fn basename(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(pos) if normalized.len() > 1 => normalized[pos + 1..].to_string(),
        _ => "/".to_string(),
    }
}

/// Join a child name onto a normalized directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        normalize_path(&format!("/{}", name))
    } else {
        normalize_path(&format!("{}/{}", dir, name))
    }
}

/// Non-empty components of a path, root first.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty() && *p != ".")
}

/// True if `path` equals `ancestor` or lies beneath it. Both must be normalized.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" || path == ancestor {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Path of `path` relative to `ancestor`, without a leading separator.
/// Returns `""` when they are equal and `None` when `path` is outside.
pub fn relative_to<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    if path == ancestor {
        return Some("");
    }
    if ancestor == "/" {
        return path.strip_prefix('/');
    }
    path.strip_prefix(ancestor)?.strip_prefix('/')
}

/// Resolve a symlink target relative to the directory holding the link.
pub fn resolve_link_target(link_path: &str, target: &str) -> String {
    resolve_path(&dirname(link_path), target)
}

/// Resolve symlinks in `path`, component by component.
///
/// `lookup` returns the stored target when the given absolute path names a
/// symlink and `None` otherwise (including when nothing exists there). When a
/// link is met, its resolved target is spliced in front of the remaining
/// components and resolution restarts. With `follow_last` unset the final
/// component is returned as-is, which gives lstat/readlink semantics.
///
/// The returned path may not exist; callers decide what that means.
pub fn resolve_links<F>(
    path: &str,
    follow_last: bool,
    operation: &str,
    mut lookup: F,
) -> Result<String, FsError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut current = normalize_path(path);
    let mut hops = 0;

    'restart: loop {
        let parts: Vec<String> = components(&current).map(str::to_string).collect();
        let mut resolved = "/".to_string();

        for (i, part) in parts.iter().enumerate() {
            let candidate = join(&resolved, part);
            let is_last = i + 1 == parts.len();
            if is_last && !follow_last {
                return Ok(candidate);
            }
            if let Some(target) = lookup(&candidate) {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::SymlinkLoop {
                        path: path.to_string(),
                        operation: operation.to_string(),
                    });
                }
                let mut next = resolve_link_target(&candidate, &target);
                for rest in &parts[i + 1..] {
                    next = join(&next, rest);
                }
                current = next;
                continue 'restart;
            }
            resolved = candidate;
        }
        return Ok(resolved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/foo/bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/bar/"), "/foo/bar");
        assert_eq!(normalize_path("foo/bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/./bar"), "/foo/bar");
        assert_eq!(normalize_path("/foo/../bar"), "/bar");
        assert_eq!(normalize_path("/foo/bar/.."), "/foo");
        assert_eq!(normalize_path("/../.."), "/");
        assert_eq!(normalize_path("//a///b//"), "/a/b");
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("/home/user", "file.txt"), "/home/user/file.txt");
        assert_eq!(resolve_path("/home/user", "../other"), "/home/other");
        assert_eq!(resolve_path("/home/user", "/etc/passwd"), "/etc/passwd");
        assert_eq!(resolve_path("/", "a/./b"), "/a/b");
        assert_eq!(resolve_path("/a", "../../.."), "/");
        assert_eq!(resolve_path("", "x"), "/x");
    }

    #[test]
    fn test_dirname_and_basename() {
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/foo"), "/");
        assert_eq!(dirname("/foo/bar"), "/foo");
        assert_eq!(dirname("/foo/bar/baz"), "/foo/bar");
        assert_eq!(basename("/"), "/");
        assert_eq!(basename("/foo"), "foo");
        assert_eq!(basename("/foo/bar.txt"), "bar.txt");
    }

    #[test]
    fn test_within_and_relative() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a", "/a"));
        assert!(is_within("/anything", "/"));
        assert!(!is_within("/ab", "/a"));
        assert_eq!(relative_to("/a/b/c", "/a"), Some("b/c"));
        assert_eq!(relative_to("/a", "/a"), Some(""));
        assert_eq!(relative_to("/x/y", "/"), Some("x/y"));
        assert_eq!(relative_to("/ab", "/a"), None);
    }

    fn links(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_resolve_links_follows_intermediate_and_final() {
        let table = links(&[("/link", "/a"), ("/a/rel", "../b/file")]);
        let lookup = |p: &str| table.get(p).cloned();

        assert_eq!(resolve_links("/link/x", true, "stat", lookup).unwrap(), "/a/x");
        assert_eq!(resolve_links("/link/rel", true, "stat", lookup).unwrap(), "/b/file");
        assert_eq!(resolve_links("/link/rel", false, "lstat", lookup).unwrap(), "/a/rel");
        assert_eq!(resolve_links("/", true, "stat", lookup).unwrap(), "/");
    }

    #[test]
    fn test_resolve_links_detects_loops() {
        let table = links(&[("/a", "/b"), ("/b", "/a")]);
        let err = resolve_links("/a", true, "open", |p| table.get(p).cloned()).unwrap_err();
        assert!(matches!(err, FsError::SymlinkLoop { .. }));

        // lstat on the loop itself does not chase it
        let ok = resolve_links("/a", false, "lstat", |p| table.get(p).cloned()).unwrap();
        assert_eq!(ok, "/a");
    }
}
