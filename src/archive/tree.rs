//! Filesystem tree copy.
//!
//! Walks a directory in lexicographic, parent-before-children order and
//! writes one archive entry per accepted node:
//! - directories keep their permission bits,
//! - regular files are streamed in untransformed,
//! - symbolic links are preserved (not followed).
//!
//! Anything else (device nodes, FIFOs, sockets) has no entry type here and is
//! handled according to [`BuilderOptions::on_unsupported_node`](crate::BuilderOptions).

use log::warn;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::builder::{node_kind, open_regular, permissions, ArchiveBuilder};
use super::newc::ArchiveSink;
use super::paths;
use crate::config::ErrorPolicy;
use crate::error::{Error, Result};

/// Decides which filesystem nodes a tree copy includes.
///
/// Returning `false` for a directory prunes its whole subtree. Filters
/// should be pure: they may be called in any order and more than once.
pub trait Filter {
    fn include(&self, path: &Path) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Path) -> bool,
{
    fn include(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Include everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct All;

impl Filter for All {
    fn include(&self, _path: &Path) -> bool {
        true
    }
}

/// Include everything except one path (and, if it is a directory, its subtree).
#[derive(Debug, Clone)]
pub struct Exclude {
    path: PathBuf,
}

impl Filter for Exclude {
    fn include(&self, path: &Path) -> bool {
        path != self.path
    }
}

/// Filter out exactly `path`, e.g. the archive being written when copying
/// its own parent directory.
///
/// Paths are compared as spelled, not canonicalized: `path` must be written
/// the way the walk produces it, i.e. prefixed by the walk root exactly as
/// given (a relative root never matches an absolute exclusion).
pub fn exclude(path: impl Into<PathBuf>) -> Exclude {
    Exclude { path: path.into() }
}

impl<S: ArchiveSink> ArchiveBuilder<S> {
    /// Copy the tree at `root` into the archive under the same path.
    pub fn copy_tree(&mut self, root: &Path) -> Result<()> {
        self.copy_tree_with_filter(root, All)
    }

    /// Copy the tree at `root` under the same path, keeping only nodes the
    /// filter accepts.
    pub fn copy_tree_with_filter<F: Filter>(&mut self, root: &Path, filter: F) -> Result<()> {
        let dst = paths::from_fs(root)?;
        self.copy_tree_into(root, &dst, filter)
    }

    /// Copy the tree at `root` so that `root` itself lands at archive path
    /// `dst` (e.g. a staging directory copied to `/`).
    ///
    /// The filter sees source filesystem paths.
    pub fn copy_tree_into<F: Filter>(&mut self, root: &Path, dst: &str, filter: F) -> Result<()> {
        let dst_root = paths::clean(dst);
        let walk_policy = self.options().on_walk_error;
        let node_policy = self.options().on_unsupported_node;

        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| filter.include(entry.path()));

        while let Some(item) = walker.next() {
            let entry = match item {
                Ok(entry) => entry,
                Err(source) => {
                    let err = Error::Walk {
                        root: root.to_path_buf(),
                        source,
                    };
                    skip_or_abort(walk_policy, err)?;
                    continue;
                }
            };

            let src = entry.path();
            let file_type = entry.file_type();
            let rel = src.strip_prefix(root).unwrap_or(src);
            let target = match paths::join(&dst_root, rel) {
                Ok(target) => target,
                Err(err) => {
                    skip_or_abort(walk_policy, err)?;
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            if file_type.is_dir() {
                let metadata = match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(source) => {
                        let err = Error::Walk {
                            root: root.to_path_buf(),
                            source,
                        };
                        skip_or_abort(walk_policy, err)?;
                        walker.skip_current_dir();
                        continue;
                    }
                };
                self.write_directory(&target, permissions(&metadata))?;
            } else if file_type.is_file() {
                self.claim(&target)?;
                let (mut file, metadata) = match open_regular(src) {
                    Ok(opened) => opened,
                    Err(err) => {
                        skip_or_abort(walk_policy, err)?;
                        continue;
                    }
                };
                self.write_stream(
                    &mut file,
                    src,
                    target,
                    permissions(&metadata),
                    metadata.len(),
                )?;
            } else if file_type.is_symlink() {
                let read = fs::symlink_metadata(src)
                    .and_then(|metadata| fs::read_link(src).map(|link| (metadata, link)));
                let (metadata, link) = match read {
                    Ok(read) => read,
                    Err(e) => {
                        skip_or_abort(walk_policy, Error::read(src, e))?;
                        continue;
                    }
                };
                self.write_symlink_raw(
                    link.as_os_str().as_bytes(),
                    &target,
                    permissions(&metadata),
                )?;
            } else {
                let err = Error::UnsupportedNodeType {
                    path: src.to_path_buf(),
                    kind: node_kind(&file_type),
                };
                skip_or_abort(node_policy, err)?;
            }
        }

        Ok(())
    }
}

fn skip_or_abort(policy: ErrorPolicy, err: Error) -> Result<()> {
    match policy {
        ErrorPolicy::Abort => Err(err),
        ErrorPolicy::Skip => {
            warn!("skipping: {}", err);
            Ok(())
        }
    }
}
