//! Incremental archive construction.
//!
//! [`ArchiveBuilder`] appends entries to a single [`ArchiveSink`] in call
//! order and guarantees that every entry's parent directory chain is present
//! in the archive before the entry itself. Directories are written at most
//! once; the builder remembers every directory it has emitted.
//!
//! ```rust,ignore
//! use initramfs_builder::ArchiveBuilder;
//! use std::fs::File;
//!
//! let mut builder = ArchiveBuilder::new(File::create("initramfs.cpio")?);
//! builder.write_file("/etc/hostname", "box\n", 0o644)?;   // writes /etc first
//! builder.write_char_device("/dev/console", 5, 1, 0o600)?;
//! builder.copy_tree(Path::new("/usr/lib/modules/6.6.0"))?;
//! builder.finish()?;
//! ```

use log::{debug, trace};
use std::collections::HashSet;
use std::fs::{self, File, Metadata};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::newc::{ArchiveSink, Header, NewcWriter};
use super::paths::{self, ROOT};
use crate::config::BuilderOptions;
use crate::error::{Error, Result};
use crate::transform::Transform;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Builds one archive session over an owned sink.
///
/// Not synchronized: one builder per archive, driven by one caller.
#[derive(Debug)]
pub struct ArchiveBuilder<S: ArchiveSink> {
    sink: S,
    options: BuilderOptions,
    // directories present in the archive, root included
    known_dirs: HashSet<String>,
    // non-directory entries present in the archive
    entries: HashSet<String>,
}

impl<W: Write> ArchiveBuilder<NewcWriter<W>> {
    /// Build a newc archive into `out` with default options.
    pub fn new(out: W) -> Self {
        Self::with_options(out, BuilderOptions::default())
    }

    pub fn with_options(out: W, options: BuilderOptions) -> Self {
        let sink = NewcWriter::with_options(out, &options);
        Self::from_sink(sink, options)
    }
}

impl<S: ArchiveSink> ArchiveBuilder<S> {
    /// Build into an arbitrary sink.
    pub fn from_sink(sink: S, options: BuilderOptions) -> Self {
        Self {
            sink,
            options,
            known_dirs: HashSet::from([ROOT.to_string()]),
            entries: HashSet::new(),
        }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Whether a directory entry for `path` is already in the archive.
    pub fn has_directory(&self, path: &str) -> bool {
        self.known_dirs.contains(&paths::clean(path))
    }

    /// Whether any entry (directory or not) exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        let path = paths::clean(path);
        self.known_dirs.contains(&path) || self.entries.contains(&path)
    }

    /// Write the archive trailer, flush, and hand back the sink.
    pub fn finish(mut self) -> Result<S> {
        self.sink
            .finish()
            .map_err(|e| Error::io(super::newc::TRAILER_NAME, e))?;
        debug!(
            "finished archive: {} directories, {} other entries",
            self.known_dirs.len() - 1,
            self.entries.len()
        );
        Ok(self.sink)
    }

    /// Make sure `path` and all of its ancestors exist as directories,
    /// writing the missing ones root-to-leaf with the default directory mode.
    pub fn ensure_directory(&mut self, path: &str) -> Result<()> {
        let path = paths::clean(path);
        self.materialize(&path)
    }

    /// Write a directory entry. Its parents are materialized first.
    ///
    /// A directory that is already in the archive is left alone, so
    /// overlapping writes never produce a second header.
    pub fn write_directory(&mut self, path: &str, mode: u32) -> Result<()> {
        let path = paths::clean(path);
        if self.known_dirs.contains(&path) {
            trace!("directory {} already in archive", path);
            return Ok(());
        }
        if self.entries.contains(&path) {
            return Err(Error::DuplicateEntry { path });
        }

        self.materialize(paths::parent(&path))?;
        self.emit_directory(&path, mode)
    }

    /// Write a regular file with text content.
    pub fn write_file(&mut self, path: &str, content: &str, mode: u32) -> Result<()> {
        self.write_file_raw(path, content.as_bytes(), mode)
    }

    /// Write a regular file with the given bytes as content.
    pub fn write_file_raw(&mut self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        let path = paths::clean(path);
        self.claim(&path)?;
        self.materialize(paths::parent(&path))?;

        let header = Header::file(&path, mode, content.len() as u64);
        self.emit(&header, content)
    }

    /// Write a symbolic link at `link` pointing to `target`.
    pub fn write_symlink(&mut self, target: &str, link: &str, mode: u32) -> Result<()> {
        self.write_symlink_raw(target.as_bytes(), link, mode)
    }

    pub(super) fn write_symlink_raw(&mut self, target: &[u8], link: &str, mode: u32) -> Result<()> {
        let path = paths::clean(link);
        self.claim(&path)?;
        self.materialize(paths::parent(&path))?;

        let header = Header::symlink(&path, mode, target.len() as u64);
        self.emit(&header, target)
    }

    /// Write a character device node. Major/minor go in the header; there is
    /// no payload.
    pub fn write_char_device(&mut self, path: &str, major: u32, minor: u32, mode: u32) -> Result<()> {
        let path = paths::clean(path);
        self.claim(&path)?;
        self.materialize(paths::parent(&path))?;

        let header = Header::char_device(&path, mode, major, minor);
        self.emit(&header, &[])
    }

    /// Copy a file into the archive at its own path.
    pub fn copy_file(&mut self, src: &Path) -> Result<()> {
        let dst = paths::from_fs(src)?;
        self.copy_file_to(src, &dst)
    }

    /// Stream the content of `src` into a regular file entry at `dst`,
    /// keeping the source's permission bits.
    pub fn copy_file_to(&mut self, src: &Path, dst: &str) -> Result<()> {
        let dst = paths::clean(dst);
        self.claim(&dst)?;

        let (mut file, metadata) = open_regular(src)?;
        self.write_stream(&mut file, src, dst, permissions(&metadata), metadata.len())
    }

    /// Write a regular file entry whose payload is exactly `size` bytes read
    /// from `reader`. `dst` must be clean and already claimed.
    ///
    /// Fails with [`Error::SizeMismatch`] if the reader runs dry early; the
    /// header is out by then, so the archive is unusable.
    pub(super) fn write_stream(
        &mut self,
        reader: &mut impl Read,
        src: &Path,
        dst: String,
        mode: u32,
        size: u64,
    ) -> Result<()> {
        self.materialize(paths::parent(&dst))?;

        let header = Header::file(&dst, mode, size);
        self.sink
            .write_header(&header)
            .map_err(|e| Error::io(&dst, e))?;

        let copied = self.stream_payload(reader, src, &dst, size)?;
        if copied != size {
            return Err(Error::SizeMismatch {
                path: src.to_path_buf(),
                expected: size,
                actual: copied,
            });
        }

        debug!("copied {} -> {} ({} bytes)", src.display(), dst, size);
        self.entries.insert(dst);
        Ok(())
    }

    /// Write a regular file entry at `dst` whose content is `transform`
    /// applied to `src` (typically decompression).
    ///
    /// The transform runs into memory before anything is written, so a
    /// failing transform leaves no trace in the archive.
    pub fn transform_file_to<T>(&mut self, src: &Path, dst: &str, transform: &T) -> Result<()>
    where
        T: Transform + ?Sized,
    {
        let dst = paths::clean(dst);
        self.claim(&dst)?;

        let (content, mode) = {
            let (mut file, metadata) = open_regular(src)?;

            let mut staged = Vec::with_capacity(metadata.len() as usize);
            transform
                .transform(&mut file, &mut staged)
                .map_err(|source| Error::Transform {
                    path: src.to_path_buf(),
                    source,
                })?;
            (staged, permissions(&metadata))
        };

        self.materialize(paths::parent(&dst))?;
        let header = Header::file(&dst, mode, content.len() as u64);
        self.emit(&header, &content)
    }

    /// Write every missing directory along a clean path.
    fn materialize(&mut self, path: &str) -> Result<()> {
        if self.known_dirs.contains(path) {
            return Ok(());
        }

        for prefix in paths::prefixes(path) {
            if self.known_dirs.contains(prefix) {
                continue;
            }
            if self.entries.contains(prefix) {
                return Err(Error::NotADirectory {
                    path: prefix.to_string(),
                });
            }
            debug!("materializing parent directory {}", prefix);
            self.emit_directory(prefix, self.options.dir_mode)?;
        }
        Ok(())
    }

    fn emit_directory(&mut self, path: &str, mode: u32) -> Result<()> {
        let header = Header::directory(path, mode);
        self.sink
            .write_header(&header)
            .map_err(|e| Error::io(path, e))?;
        debug!("wrote directory {} ({:o})", path, header.mode);
        self.known_dirs.insert(path.to_string());
        Ok(())
    }

    /// Reserve a clean path for a non-directory entry.
    pub(super) fn claim(&self, path: &str) -> Result<()> {
        if path == ROOT {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "the archive root can only be a directory",
            });
        }
        if self.known_dirs.contains(path) || self.entries.contains(path) {
            return Err(Error::DuplicateEntry {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    fn emit(&mut self, header: &Header, payload: &[u8]) -> Result<()> {
        self.sink
            .write_header(header)
            .map_err(|e| Error::io(&header.path, e))?;
        self.sink
            .write_all(payload)
            .map_err(|e| Error::io(&header.path, e))?;
        debug!(
            "wrote {} {} ({:o}, {} bytes)",
            header.kind.as_str(),
            header.path,
            header.mode,
            header.size
        );
        self.entries.insert(header.path.clone());
        Ok(())
    }

    /// Copy at most `size` bytes of `reader` into the sink, returning the count.
    fn stream_payload(&mut self, reader: &mut impl Read, src: &Path, dst: &str, size: u64) -> Result<u64> {
        let mut limited = reader.take(size);
        let mut buf = vec![0u8; COPY_BUF_SIZE.min(size as usize).max(1)];
        let mut copied = 0u64;
        loop {
            let n = match limited.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::read(src, e)),
            };
            self.sink
                .write_all(&buf[..n])
                .map_err(|e| Error::io(dst, e))?;
            copied += n as u64;
        }
        Ok(copied)
    }
}

/// Permission bits of a node, file type stripped.
pub(super) fn permissions(metadata: &Metadata) -> u32 {
    metadata.permissions().mode() & 0o7777
}

/// Human name for a file type the archive cannot hold.
pub(super) fn node_kind(file_type: &fs::FileType) -> &'static str {
    use std::os::unix::fs::FileTypeExt;

    if file_type.is_char_device() {
        "character device"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_dir() {
        "directory"
    } else if file_type.is_symlink() {
        "symbolic link"
    } else {
        "unknown"
    }
}

/// Open a source file and check that it is a regular file. Nothing has been
/// written to the archive when this fails.
pub(super) fn open_regular(src: &Path) -> Result<(File, Metadata)> {
    let file = File::open(src).map_err(|e| Error::read(src, e))?;
    let metadata = file.metadata().map_err(|e| Error::read(src, e))?;
    if !metadata.is_file() {
        return Err(Error::UnsupportedNodeType {
            path: src.to_path_buf(),
            kind: node_kind(&metadata.file_type()),
        });
    }
    Ok((file, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::newc::EntryKind;
    use crate::archive::testing::{parse_newc, RecordingSink};
    use crate::transform::Decompressor;
    use std::io;
    use tempfile::TempDir;

    fn recorder() -> ArchiveBuilder<RecordingSink> {
        ArchiveBuilder::from_sink(RecordingSink::default(), BuilderOptions::default())
    }

    #[test]
    fn test_single_file_scenario() {
        let mut builder = recorder();
        builder.write_file("/etc/hostname", "box\n", 0o644).unwrap();

        let sink = builder.finish().unwrap();
        assert!(sink.finished);
        assert_eq!(sink.paths(), vec!["/etc", "/etc/hostname"]);

        let etc = &sink.entries[0].header;
        assert_eq!(etc.kind, EntryKind::Directory);
        assert_eq!(etc.mode, 0o755);

        let hostname = &sink.entries[1];
        assert_eq!(hostname.header.kind, EntryKind::RegularFile);
        assert_eq!(hostname.header.mode, 0o644);
        assert_eq!(hostname.header.size, 4);
        assert_eq!(hostname.data, b"box\n");
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let mut builder = recorder();
        builder.ensure_directory("/usr/lib/modules").unwrap();
        builder.ensure_directory("/usr/lib/modules").unwrap();
        builder.ensure_directory("/usr/lib/./modules/").unwrap();
        builder.ensure_directory("/usr/lib").unwrap();

        let sink = builder.sink();
        assert_eq!(sink.paths(), vec!["/usr", "/usr/lib", "/usr/lib/modules"]);
        assert!(sink.entries.iter().all(|e| e.header.mode == 0o755));
    }

    #[test]
    fn test_ancestors_precede_descendants() {
        let mut builder = recorder();
        builder.write_file("/a/b/c", "", 0o644).unwrap();
        builder.write_symlink("../c", "/a/x/y/link", 0o777).unwrap();

        let sink = builder.sink();
        let pos = |p| sink.position(p).unwrap();
        assert!(pos("/a") < pos("/a/b"));
        assert!(pos("/a/b") < pos("/a/b/c"));
        assert!(pos("/a/x") < pos("/a/x/y"));
        assert!(pos("/a/x/y") < pos("/a/x/y/link"));
        assert_eq!(sink.count("/a"), 1);
    }

    #[test]
    fn test_root_is_never_written() {
        let mut builder = recorder();
        builder.ensure_directory("/").unwrap();
        builder.write_directory("/", 0o700).unwrap();
        builder.write_file("/init", "#!/bin/sh\n", 0o755).unwrap();

        let sink = builder.sink();
        assert_eq!(sink.count("/"), 0);
        assert_eq!(sink.paths(), vec!["/init"]);
    }

    #[test]
    fn test_write_directory_materializes_parent_not_itself_twice() {
        let mut builder = recorder();
        builder.write_directory("/var/empty", 0o711).unwrap();
        builder.write_directory("/var/empty", 0o755).unwrap();
        builder.write_file("/var/empty/.keep", "", 0o644).unwrap();

        let sink = builder.sink();
        assert_eq!(sink.paths(), vec!["/var", "/var/empty", "/var/empty/.keep"]);
        assert_eq!(sink.find("/var").unwrap().header.mode, 0o755);
        assert_eq!(sink.find("/var/empty").unwrap().header.mode, 0o711);
        assert!(builder.has_directory("/var/empty"));
    }

    #[test]
    fn test_custom_dir_mode() {
        let options = BuilderOptions {
            dir_mode: 0o700,
            ..BuilderOptions::default()
        };
        let mut builder = ArchiveBuilder::from_sink(RecordingSink::default(), options);
        builder.write_file("/root/.profile", "", 0o600).unwrap();
        assert_eq!(builder.sink().find("/root").unwrap().header.mode, 0o700);
    }

    #[test]
    fn test_symlink_payload_is_target() {
        let mut builder = recorder();
        builder.write_symlink("usr/bin", "/bin", 0o777).unwrap();

        let link = builder.sink().find("/bin").unwrap().clone();
        assert_eq!(link.header.kind, EntryKind::Symlink);
        assert_eq!(link.header.size, 7);
        assert_eq!(std::str::from_utf8(&link.data).unwrap(), "usr/bin");
    }

    #[test]
    fn test_char_device_has_numbers_and_no_payload() {
        let mut builder = recorder();
        builder.write_char_device("/dev/console", 5, 1, 0o600).unwrap();

        let sink = builder.sink();
        assert_eq!(sink.paths(), vec!["/dev", "/dev/console"]);
        let console = sink.find("/dev/console").unwrap();
        assert_eq!(console.header.kind, EntryKind::CharDevice);
        assert_eq!((console.header.dev_major, console.header.dev_minor), (5, 1));
        assert_eq!(console.header.size, 0);
        assert!(console.data.is_empty());
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let mut builder = recorder();
        builder.write_file("/etc/hostname", "a\n", 0o644).unwrap();

        let err = builder.write_file("/etc//hostname", "b\n", 0o644).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry { ref path } if path == "/etc/hostname"));
        assert_eq!(builder.sink().count("/etc/hostname"), 1);

        // a directory over a file, or a file over a directory, is also a collision
        assert!(builder.write_directory("/etc/hostname", 0o755).is_err());
        assert!(builder.write_file("/etc", "", 0o644).is_err());
    }

    #[test]
    fn test_file_as_parent_rejected() {
        let mut builder = recorder();
        builder.write_file("/bin", "", 0o755).unwrap();

        let err = builder.write_file("/bin/sh", "", 0o755).unwrap_err();
        assert!(matches!(err, Error::NotADirectory { ref path } if path == "/bin"));
        assert_eq!(builder.sink().paths(), vec!["/bin"]);
    }

    #[test]
    fn test_root_as_file_rejected() {
        let mut builder = recorder();
        assert!(matches!(
            builder.write_file("/", "", 0o644),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_relative_paths_are_rooted() {
        let mut builder = recorder();
        builder.write_file("etc/motd", "hi\n", 0o644).unwrap();
        assert_eq!(builder.sink().paths(), vec!["/etc", "/etc/motd"]);
        assert!(builder.contains("/etc/motd"));
    }

    #[test]
    fn test_sink_failure_is_io_error() {
        let mut builder = ArchiveBuilder::from_sink(
            RecordingSink::failing_after(1),
            BuilderOptions::default(),
        );
        let err = builder.write_file("/etc/hostname", "box\n", 0o644).unwrap_err();
        assert!(matches!(err, Error::Io { ref path, .. } if path == "/etc/hostname"));
        // the parent made it out and stays known
        assert!(builder.has_directory("/etc"));
    }

    #[test]
    fn test_copy_file_to_streams_content_and_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("busybox");
        fs::write(&src, vec![0x7fu8; 100_000]).unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o4755)).unwrap();

        let mut builder = recorder();
        builder.copy_file_to(&src, "/bin/busybox").unwrap();

        let entry = builder.sink().find("/bin/busybox").unwrap();
        assert_eq!(entry.header.mode, 0o4755);
        assert_eq!(entry.header.size, 100_000);
        assert_eq!(entry.data.len(), 100_000);
    }

    #[test]
    fn test_copy_file_keeps_source_path() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("conf");
        fs::write(&src, "x=1\n").unwrap();

        let mut builder = recorder();
        builder.copy_file(&src).unwrap();

        let dst = paths::from_fs(&src).unwrap();
        let parent = paths::from_fs(temp.path()).unwrap();
        let sink = builder.sink();
        assert_eq!(sink.find(&dst).unwrap().data, b"x=1\n");
        assert!(sink.position(&parent).unwrap() < sink.position(&dst).unwrap());
    }

    #[test]
    fn test_short_read_is_size_mismatch() {
        let mut builder = recorder();
        let mut shrunk: &[u8] = b"trunc";

        let err = builder
            .write_stream(&mut shrunk, Path::new("/src/log"), "/var/log/boot".to_string(), 0o644, 10)
            .unwrap_err();
        match err {
            Error::SizeMismatch {
                path,
                expected,
                actual,
            } => {
                assert_eq!(path, Path::new("/src/log"));
                assert_eq!(expected, 10);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected error: {other}"),
        }

        // the header went out, but the path is not recorded as a complete entry
        assert!(!builder.contains("/var/log/boot"));
        assert_eq!(builder.sink().find("/var/log/boot").unwrap().data, b"trunc");
    }

    #[test]
    fn test_copy_missing_file_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut builder = recorder();

        let err = builder
            .copy_file_to(&temp.path().join("missing"), "/a/b")
            .unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(builder.sink().entries.is_empty());
    }

    #[test]
    fn test_copy_directory_as_file_rejected() {
        let temp = TempDir::new().unwrap();
        let mut builder = recorder();
        let err = builder.copy_file_to(temp.path(), "/x").unwrap_err();
        assert!(matches!(err, Error::UnsupportedNodeType { kind: "directory", .. }));
    }

    #[test]
    fn test_transform_file_to_writes_transformed_content() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("loop.ko.zst");
        let compressed = zstd::encode_all(&b"kernel module bytes"[..], 3).unwrap();
        fs::write(&src, compressed).unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o600)).unwrap();

        let mut builder = recorder();
        builder
            .transform_file_to(&src, "/lib/modules/loop.ko", &Decompressor::Zstd)
            .unwrap();

        let entry = builder.sink().find("/lib/modules/loop.ko").unwrap();
        assert_eq!(entry.data, b"kernel module bytes");
        assert_eq!(entry.header.size, 19);
        assert_eq!(entry.header.mode, 0o600);
    }

    #[test]
    fn test_failed_transform_leaves_no_entry() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good");
        let bad = temp.path().join("bad.gz");
        fs::write(&good, "fine").unwrap();
        fs::write(&bad, "definitely not gzip").unwrap();

        let mut builder = recorder();
        builder.copy_file_to(&good, "/good").unwrap();

        let err = builder
            .transform_file_to(&bad, "/lib/firmware/bad", &Decompressor::Gzip)
            .unwrap_err();
        assert!(matches!(err, Error::Transform { .. }));

        let sink = builder.sink();
        assert_eq!(sink.paths(), vec!["/good"]);
        assert_eq!(sink.find("/good").unwrap().data, b"fine");

        // the destination stays free for a retry
        assert!(!builder.contains("/lib/firmware/bad"));
    }

    #[test]
    fn test_closure_transform() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("motd");
        fs::write(&src, "welcome").unwrap();

        let upper = |src: &mut dyn Read, dst: &mut dyn Write| -> io::Result<()> {
            let mut text = String::new();
            src.read_to_string(&mut text)?;
            dst.write_all(text.to_uppercase().as_bytes())
        };

        let mut builder = recorder();
        builder.transform_file_to(&src, "/etc/motd", &upper).unwrap();
        assert_eq!(builder.sink().find("/etc/motd").unwrap().data, b"WELCOME");
    }

    #[test]
    fn test_newc_output_end_to_end() {
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder.write_file("/etc/hostname", "box\n", 0o644).unwrap();
        builder.write_symlink("/bin/busybox", "/sbin/init", 0o777).unwrap();

        let bytes = builder.finish().unwrap().into_inner();
        let entries = parse_newc(&bytes);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["etc", "etc/hostname", "sbin", "sbin/init", "TRAILER!!!"]
        );
        assert_eq!(entries[0].mode, 0o040755);
        assert_eq!(entries[1].data, b"box\n");
        assert_eq!(entries[3].data, b"/bin/busybox");
    }
}
