//! Content transforms for transformed file copies.
//!
//! A [`Transform`] consumes one byte stream and produces another. The
//! builder only orchestrates the call; the decoding itself is delegated to
//! the compression crates. [`Decompressor`] is the fixed catalogue used for
//! kernel modules and firmware blobs shipped compressed on the host:
//!
//! | name | crate |
//! | --- | --- |
//! | `identity` | none, pass-through |
//! | `gzip` | `flate2` (multi-member) |
//! | `xz` | `lzma-rust2` |
//! | `zstd` | `zstd` |

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Stateless byte-stream to byte-stream function.
pub trait Transform {
    fn transform(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()>;
}

impl<F> Transform for F
where
    F: Fn(&mut dyn Read, &mut dyn Write) -> io::Result<()>,
{
    fn transform(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        self(src, dst)
    }
}

/// Copy input to output unchanged.
pub fn identity(src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
    io::copy(src, dst)?;
    Ok(())
}

/// Decompress gzip, including concatenated members.
pub fn gzip(src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
    let mut decoder = flate2::read::MultiGzDecoder::new(src);
    io::copy(&mut decoder, dst)?;
    Ok(())
}

/// Decompress an xz stream (concatenated streams allowed).
pub fn xz(src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
    let mut decoder = lzma_rust2::XzReader::new(src, true);
    io::copy(&mut decoder, dst)?;
    Ok(())
}

/// Decompress a zstd stream.
pub fn zstd(src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
    let mut decoder = zstd::stream::read::Decoder::new(src)?;
    io::copy(&mut decoder, dst)?;
    Ok(())
}

/// The supported decompressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decompressor {
    Identity,
    Gzip,
    Xz,
    Zstd,
}

impl Decompressor {
    pub const ALL: [Decompressor; 4] = [
        Decompressor::Identity,
        Decompressor::Gzip,
        Decompressor::Xz,
        Decompressor::Zstd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Decompressor::Identity => "identity",
            Decompressor::Gzip => "gzip",
            Decompressor::Xz => "xz",
            Decompressor::Zstd => "zstd",
        }
    }

    /// File extension this format is usually stored under, if any.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Decompressor::Identity => None,
            Decompressor::Gzip => Some("gz"),
            Decompressor::Xz => Some("xz"),
            Decompressor::Zstd => Some("zst"),
        }
    }

    /// Pick a decompressor from a file name: `e1000e.ko.xz` is xz,
    /// `e1000e.ko` is identity.
    pub fn for_path(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str());
        Self::ALL
            .into_iter()
            .find(|d| d.extension().is_some() && d.extension() == ext)
            .unwrap_or(Decompressor::Identity)
    }

    /// The archive name for a decompressed file: the compression suffix is
    /// dropped (`e1000e.ko.xz` -> `e1000e.ko`).
    pub fn strip_extension(self, name: &str) -> &str {
        match self.extension() {
            Some(ext) => name
                .strip_suffix(ext)
                .and_then(|rest| rest.strip_suffix('.'))
                .unwrap_or(name),
            None => name,
        }
    }
}

impl Transform for Decompressor {
    fn transform(&self, src: &mut dyn Read, dst: &mut dyn Write) -> io::Result<()> {
        match self {
            Decompressor::Identity => identity(src, dst),
            Decompressor::Gzip => gzip(src, dst),
            Decompressor::Xz => xz(src, dst),
            Decompressor::Zstd => zstd(src, dst),
        }
    }
}

impl fmt::Display for Decompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name given to [`Decompressor::from_str`] that matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown decompressor '{0}' (expected identity, gzip, xz or zstd)")]
pub struct UnknownDecompressor(pub String);

impl FromStr for Decompressor {
    type Err = UnknownDecompressor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" | "null" => Ok(Decompressor::Identity),
            "gzip" | "gz" => Ok(Decompressor::Gzip),
            "xz" => Ok(Decompressor::Xz),
            "zstd" | "zst" => Ok(Decompressor::Zstd),
            _ => Err(UnknownDecompressor(s.to_string())),
        }
    }
}
