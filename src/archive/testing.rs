//! Test doubles: an in-memory recording sink and a newc parser.

use std::io::{self, Write};

use super::newc::{ArchiveSink, EntryKind, Header, NEWC_HDR_LEN, NEWC_MAGIC, TRAILER_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub header: Header,
    pub data: Vec<u8>,
}

/// Sink that keeps every header and payload in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub entries: Vec<Recorded>,
    pub finished: bool,
    /// Fail every header write once this many headers were accepted.
    pub fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn failing_after(headers: usize) -> Self {
        Self {
            fail_after: Some(headers),
            ..Self::default()
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.header.path.as_str()).collect()
    }

    pub fn find(&self, path: &str) -> Option<&Recorded> {
        self.entries.iter().find(|e| e.header.path == path)
    }

    pub fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.header.path == path)
    }

    pub fn count(&self, path: &str) -> usize {
        self.entries.iter().filter(|e| e.header.path == path).count()
    }

    pub fn kind_of(&self, path: &str) -> Option<EntryKind> {
        self.find(path).map(|e| e.header.kind)
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let entry = self
            .entries
            .last_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload before header"))?;
        entry.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArchiveSink for RecordingSink {
    fn write_header(&mut self, header: &Header) -> io::Result<()> {
        if self.fail_after.is_some_and(|limit| self.entries.len() >= limit) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.entries.push(Recorded {
            header: header.clone(),
            data: Vec::new(),
        });
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// A record decoded from newc bytes.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub data: Vec<u8>,
}

/// Decode a newc archive up to and including its trailer. Panics on malformed input.
pub fn parse_newc(bytes: &[u8]) -> Vec<ParsedEntry> {
    let hdr_len = NEWC_HDR_LEN as usize;
    let align = |off: usize| (off + 3) & !3;
    let field = |header: &[u8], idx: usize| {
        let start = 6 + idx * 8;
        let text = std::str::from_utf8(&header[start..start + 8]).unwrap();
        u32::from_str_radix(text, 16).unwrap()
    };

    let mut entries = Vec::new();
    let mut off = 0;
    loop {
        let header = &bytes[off..off + hdr_len];
        assert_eq!(&header[..6], NEWC_MAGIC.as_bytes(), "bad magic at {}", off);

        let filesize = field(header, 6) as usize;
        let namesize = field(header, 11) as usize;
        let name_start = off + hdr_len;
        let name = std::str::from_utf8(&bytes[name_start..name_start + namesize - 1])
            .unwrap()
            .to_string();
        assert_eq!(bytes[name_start + namesize - 1], 0, "name not NUL terminated");

        let data_start = align(name_start + namesize);
        let data = bytes[data_start..data_start + filesize].to_vec();
        off = align(data_start + filesize);

        let done = name == TRAILER_NAME;
        entries.push(ParsedEntry {
            name,
            mode: field(header, 1),
            uid: field(header, 2),
            gid: field(header, 3),
            nlink: field(header, 4),
            mtime: field(header, 5),
            rdev_major: field(header, 9),
            rdev_minor: field(header, 10),
            data,
        });
        if done {
            assert_eq!(off, bytes.len(), "bytes after trailer");
            return entries;
        }
    }
}
