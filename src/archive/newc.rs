//! SVR4 "newc" cpio encoding.
//!
//! The builder talks to its output through [`ArchiveSink`]: one
//! [`write_header`](ArchiveSink::write_header) per entry followed by exactly
//! `header.size` payload bytes through [`std::io::Write`]. [`NewcWriter`] is
//! the sink that produces the on-disk format the Linux kernel unpacks as an
//! initramfs (`cpio -H newc`).
//!
//! Record layout: a 110 byte ASCII header (`070701` magic followed by
//! thirteen 8-digit hex fields), the NUL-terminated name padded to a 4 byte
//! boundary, then the payload, again padded to 4 bytes. The archive ends with
//! a `TRAILER!!!` record.

use std::io::{self, Write};

use crate::config::BuilderOptions;

pub const NEWC_MAGIC: &str = "070701";
pub const NEWC_HDR_LEN: u64 = 110;
pub const TRAILER_NAME: &str = "TRAILER!!!";

/// Names at or above this length are ignored by the kernel unpacker.
pub const PATH_MAX: usize = 4096;

const S_IFMT: u32 = libc::S_IFMT as u32;

/// The entry types the builder can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
}

impl EntryKind {
    /// File type bits (`S_IF*`) stored in the mode field.
    pub fn type_bits(self) -> u32 {
        let bits = match self {
            EntryKind::Directory => libc::S_IFDIR,
            EntryKind::RegularFile => libc::S_IFREG,
            EntryKind::Symlink => libc::S_IFLNK,
            EntryKind::CharDevice => libc::S_IFCHR,
        };
        bits as u32
    }

    /// Recover the kind from a full mode value.
    pub fn from_mode(mode: u32) -> Option<Self> {
        [
            EntryKind::Directory,
            EntryKind::RegularFile,
            EntryKind::Symlink,
            EntryKind::CharDevice,
        ]
        .into_iter()
        .find(|kind| kind.type_bits() == mode & S_IFMT)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::RegularFile => "regular file",
            EntryKind::Symlink => "symbolic link",
            EntryKind::CharDevice => "character device",
        }
    }
}

/// One archive record, minus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: EntryKind,
    /// Clean absolute archive path.
    pub path: String,
    /// Permission bits only; the type bits come from `kind`.
    pub mode: u32,
    /// Payload length in bytes.
    pub size: u64,
    pub dev_major: u32,
    pub dev_minor: u32,
}

impl Header {
    pub fn directory(path: &str, mode: u32) -> Self {
        Self::new(EntryKind::Directory, path, mode, 0)
    }

    pub fn file(path: &str, mode: u32, size: u64) -> Self {
        Self::new(EntryKind::RegularFile, path, mode, size)
    }

    /// A symlink's payload is its target, so `size` is the target length.
    pub fn symlink(path: &str, mode: u32, target_len: u64) -> Self {
        Self::new(EntryKind::Symlink, path, mode, target_len)
    }

    pub fn char_device(path: &str, mode: u32, major: u32, minor: u32) -> Self {
        Self {
            dev_major: major,
            dev_minor: minor,
            ..Self::new(EntryKind::CharDevice, path, mode, 0)
        }
    }

    fn new(kind: EntryKind, path: &str, mode: u32, size: u64) -> Self {
        Self {
            kind,
            path: path.to_string(),
            mode: mode & 0o7777,
            size,
            dev_major: 0,
            dev_minor: 0,
        }
    }
}

/// Destination for archive records.
///
/// Implementors receive a header, then the payload through `Write`, then the
/// next header. The builder never writes payload bytes beyond `header.size`.
pub trait ArchiveSink: Write {
    fn write_header(&mut self, header: &Header) -> io::Result<()>;

    /// Terminate the archive and flush. No records may follow.
    fn finish(&mut self) -> io::Result<()>;
}

/// Streaming newc encoder over any writer.
#[derive(Debug)]
pub struct NewcWriter<W: Write> {
    inner: W,
    uid: u32,
    gid: u32,
    mtime: u32,
    strip_leading_slash: bool,
    // next inode number; 0 is left to the trailer
    ino: u32,
    // bytes written so far, for alignment
    offset: u64,
    // payload bytes still owed by the current entry
    remaining: u64,
    finished: bool,
}

impl<W: Write> NewcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_options(inner, &BuilderOptions::default())
    }

    pub fn with_options(inner: W, options: &BuilderOptions) -> Self {
        Self {
            inner,
            uid: options.uid,
            gid: options.gid,
            mtime: options.mtime,
            strip_leading_slash: options.strip_leading_slash,
            ino: 1,
            offset: 0,
            remaining: 0,
            finished: false,
        }
    }

    /// Total bytes emitted, padding included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn encode_name<'a>(&self, path: &'a str) -> &'a str {
        if self.strip_leading_slash && path.len() > 1 {
            path.strip_prefix('/').unwrap_or(path)
        } else {
            path
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_record(
        &mut self,
        ino: u32,
        mode: u32,
        nlink: u32,
        filesize: u32,
        rmajor: u32,
        rminor: u32,
        name: &str,
    ) -> io::Result<()> {
        let namesize = name.len() + 1;
        if namesize >= PATH_MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("name too long for newc: {}", name),
            ));
        }

        write!(
            self.inner,
            "{magic}{ino:08X}{mode:08X}{uid:08X}{gid:08X}{nlink:08X}\
             {mtime:08X}{filesize:08X}{major:08X}{minor:08X}{rmajor:08X}\
             {rminor:08X}{namesize:08X}{chksum:08X}",
            magic = NEWC_MAGIC,
            ino = ino,
            mode = mode,
            uid = self.uid,
            gid = self.gid,
            nlink = nlink,
            mtime = self.mtime,
            filesize = filesize,
            major = 0,
            minor = 0,
            rmajor = rmajor,
            rminor = rminor,
            namesize = namesize,
            chksum = 0,
        )?;
        self.offset += NEWC_HDR_LEN;

        self.inner.write_all(name.as_bytes())?;
        self.inner.write_all(&[0])?;
        self.offset += namesize as u64;
        self.pad()
    }

    fn pad(&mut self) -> io::Result<()> {
        let len = padlen(self.offset, 4);
        if len > 0 {
            self.inner.write_all(&[0u8; 3][..len as usize])?;
            self.offset += len;
        }
        Ok(())
    }

    fn check_open(&self) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "archive already finished",
            ));
        }
        if self.remaining > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("previous entry is missing {} payload bytes", self.remaining),
            ));
        }
        Ok(())
    }
}

impl<W: Write> ArchiveSink for NewcWriter<W> {
    fn write_header(&mut self, header: &Header) -> io::Result<()> {
        self.check_open()?;

        let filesize = u32::try_from(header.size).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is too large for newc ({} bytes)", header.path, header.size),
            )
        })?;
        let nlink = match header.kind {
            EntryKind::Directory => 2,
            _ => 1,
        };
        let mode = header.kind.type_bits() | (header.mode & 0o7777);
        let ino = self.ino;
        let name = self.encode_name(&header.path);

        self.write_record(
            ino,
            mode,
            nlink,
            filesize,
            header.dev_major,
            header.dev_minor,
            name,
        )?;
        self.ino += 1;
        self.remaining = header.size;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.write_record(0, 0, 1, 0, 0, 0, TRAILER_NAME)?;
        self.finished = true;
        self.inner.flush()
    }
}

impl<W: Write> Write for NewcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload of {} bytes exceeds the {} bytes left in the entry",
                    buf.len(),
                    self.remaining
                ),
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.pad()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn padlen(off: u64, alignment: u64) -> u64 {
    (alignment - (off & (alignment - 1))) % alignment
}
