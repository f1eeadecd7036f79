//! Builder configuration.
//!
//! [`BuilderOptions`] controls the parts of archive construction that are
//! policy rather than mechanism: default directory permissions, header
//! ownership/timestamps, and what a tree copy does when it meets something it
//! cannot archive. Options can be built in code or loaded from TOML:
//!
//! ```toml
//! dir_mode = 0o755
//! on_walk_error = "skip"
//! on_unsupported_node = "abort"
//! mtime = 0
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default permission bits for implicitly materialized directories (`rwxr-xr-x`).
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// What a tree copy does with a node it cannot (or may not) archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the walk and return the error to the caller.
    #[default]
    Abort,
    /// Log a warning and continue with the next node.
    Skip,
}

/// Options for an [`ArchiveBuilder`](crate::ArchiveBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderOptions {
    /// Permission bits for directories the builder creates on its own.
    ///
    /// Default: 0o755
    pub dir_mode: u32,

    /// Policy for not-found / permission errors raised by the directory walk.
    pub on_walk_error: ErrorPolicy,

    /// Policy for device nodes, FIFOs and sockets found during a tree copy.
    pub on_unsupported_node: ErrorPolicy,

    /// Owner written to every header.
    pub uid: u32,

    /// Group written to every header.
    pub gid: u32,

    /// Modification time written to every header (seconds since the epoch).
    ///
    /// Fixed so that identical inputs produce identical archives.
    pub mtime: u32,

    /// Encode entry names without the leading `/` (`etc/hostname`), as GNU
    /// cpio and dracut do. Paths passed to the builder stay absolute.
    pub strip_leading_slash: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            on_walk_error: ErrorPolicy::Abort,
            on_unsupported_node: ErrorPolicy::Abort,
            uid: 0,
            gid: 0,
            mtime: 0,
            strip_leading_slash: true,
        }
    }
}

impl BuilderOptions {
    /// Parse options from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text).context("parsing builder options")?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading builder options '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("loading builder options '{}'", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.dir_mode & !0o7777 != 0 {
            anyhow::bail!(
                "invalid dir_mode {:o}: only permission bits (0o7777) are allowed",
                self.dir_mode
            );
        }
        Ok(())
    }
}
