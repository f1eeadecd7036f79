//! Incremental cpio archive construction for initramfs images.
//!
//! An [`ArchiveBuilder`] owns one output stream and appends entries to it in
//! call order: explicit directories, files, symlinks and character devices,
//! whole filesystem trees, and files whose content is decompressed on the way
//! in. Before any entry is written, every missing directory on its path is
//! written first, exactly once.
//!
//! ```text
//! caller ──write_*/copy_*──▶ ArchiveBuilder ──header + payload──▶ ArchiveSink (newc)
//!                                  │
//!                                  └── transform_file_to ──▶ Transform (identity/gzip/xz/zstd)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use initramfs_builder::{ArchiveBuilder, Decompressor};
//! use std::fs::File;
//! use std::path::Path;
//!
//! # fn main() -> initramfs_builder::Result<()> {
//! let out = File::create("initramfs.cpio").expect("create output");
//! let mut builder = ArchiveBuilder::new(out);
//!
//! builder.write_file("/etc/hostname", "box\n", 0o644)?;
//! builder.write_symlink("/bin/busybox", "/init", 0o777)?;
//! builder.write_char_device("/dev/console", 5, 1, 0o600)?;
//! builder.copy_tree(Path::new("/usr/share/udhcpc"))?;
//! builder.transform_file_to(
//!     Path::new("/lib/modules/6.6.0/kernel/fs/overlayfs/overlay.ko.xz"),
//!     "/lib/modules/overlay.ko",
//!     &Decompressor::Xz,
//! )?;
//!
//! builder.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod transform;

pub use archive::builder::ArchiveBuilder;
pub use archive::newc::{ArchiveSink, EntryKind, Header, NewcWriter};
pub use archive::tree::{exclude, All, Exclude, Filter};
pub use config::{BuilderOptions, ErrorPolicy};
pub use error::{Error, Result};
pub use transform::{Decompressor, Transform};
