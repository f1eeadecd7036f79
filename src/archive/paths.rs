//! Archive path normalization.
//!
//! Archive paths are always absolute, `/`-separated and lexically clean:
//! `.` components and repeated separators are dropped, `..` removes the
//! previous component and never climbs above the root.

use std::path::Path;

use crate::error::{Error, Result};

/// The archive root. Never written as an entry.
pub const ROOT: &str = "/";

/// Lexically clean `path` into an absolute archive path.
///
/// Relative inputs are taken relative to the root, so `etc/hostname` and
/// `/etc/./hostname` both become `/etc/hostname`.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return ROOT.to_string();
    }

    let mut out = String::with_capacity(path.len() + 1);
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Parent of a clean archive path. The parent of the root is the root.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

/// Every proper prefix of a clean path plus the path itself, root excluded,
/// in root-to-leaf order: `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub fn prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .skip(1)
        .map(move |(idx, _)| &path[..idx])
        .chain(Some(path).filter(|p| *p != ROOT))
}

/// Convert a filesystem path into a clean archive path.
pub fn from_fs(path: &Path) -> Result<String> {
    let text = path.to_str().ok_or_else(|| Error::InvalidPath {
        path: path.to_string_lossy().into_owned(),
        reason: "not valid UTF-8",
    })?;
    Ok(clean(text))
}

/// Join a path relative to a walk root onto an archive directory.
pub fn join(base: &str, relative: &Path) -> Result<String> {
    let rel = relative.to_str().ok_or_else(|| Error::InvalidPath {
        path: relative.to_string_lossy().into_owned(),
        reason: "not valid UTF-8",
    })?;
    Ok(clean(&format!("{}/{}", base, rel)))
}
