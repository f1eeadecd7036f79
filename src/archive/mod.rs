//! cpio archive construction.
//!
//! - [`builder`] - [`ArchiveBuilder`](builder::ArchiveBuilder): entry writers and directory tracking
//! - [`tree`] - filesystem tree copy and [`Filter`](tree::Filter)s
//! - [`newc`] - the newc encoder behind the [`ArchiveSink`](newc::ArchiveSink) contract
//! - [`paths`] - archive path normalization

pub mod builder;
pub mod newc;
pub mod paths;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;
