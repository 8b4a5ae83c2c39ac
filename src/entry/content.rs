use bytes::Bytes;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;

/// The byte stream behind a [`FileEntry`](super::FileEntry).
///
/// Content is exclusively owned and never cloned. Spooled content lives in
/// memory until it outgrows the configured threshold and then moves to an
/// anonymous temporary file that the OS reclaims when the value is dropped.
pub struct Content {
    inner: Backing,
    len: u64,
}

enum Backing {
    Memory(Cursor<Bytes>),
    Spooled(SpooledTempFile),
    File(File),
}

impl Content {
    /// Wrap bytes that are already in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Content {
            inner: Backing::Memory(Cursor::new(bytes)),
            len,
        }
    }

    /// Wrap an open file. Its length is taken from metadata and the read
    /// position is left where the caller put it.
    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Content {
            inner: Backing::File(file),
            len,
        })
    }

    /// Drain `reader` into a new scoped temporary resource.
    ///
    /// The returned content is rewound to position 0.
    pub fn spool<R: Read + ?Sized>(reader: &mut R, threshold: usize) -> io::Result<Self> {
        let mut spooled = SpooledTempFile::new(threshold);
        let len = io::copy(reader, &mut spooled)?;
        spooled.flush()?;
        spooled.seek(SeekFrom::Start(0))?;
        Ok(Content {
            inner: Backing::Spooled(spooled),
            len,
        })
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the bytes live on disk (an input file or a rolled-over spool).
    pub fn is_on_disk(&self) -> bool {
        match &self.inner {
            Backing::Memory(_) => false,
            Backing::Spooled(s) => s.is_rolled(),
            Backing::File(_) => true,
        }
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    /// Bytes between the current position and the end.
    pub fn remaining(&mut self) -> io::Result<u64> {
        let pos = self.stream_position()?;
        Ok(self.len.saturating_sub(pos))
    }

    pub fn rewind_to_start(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Read everything from position 0 without disturbing the current position.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let saved = self.stream_position()?;
        self.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.len.min(64 * 1024 * 1024) as usize);
        let result = self.read_to_end(&mut buf);
        self.seek(SeekFrom::Start(saved))?;
        result.map(|_| buf)
    }

    /// Fill `buf` from `offset`, returning how many bytes were available.
    /// The stream position is unchanged on return.
    pub fn peek_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let saved = self.stream_position()?;
        let result = self.read_at(offset, buf);
        self.seek(SeekFrom::Start(saved))?;
        result
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        self.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Read for Content {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Backing::Memory(c) => c.read(buf),
            Backing::Spooled(s) => s.read(buf),
            Backing::File(f) => f.read(buf),
        }
    }
}

impl Seek for Content {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.len.checked_add_signed(offset),
            SeekFrom::Current(offset) => {
                let current = self.stream_position()?;
                current.checked_add_signed(offset)
            }
        };

        let new_pos = new_pos.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Seek before start of content")
        })?;

        match &mut self.inner {
            Backing::Memory(c) => c.seek(SeekFrom::Start(new_pos)),
            Backing::Spooled(s) => s.seek(SeekFrom::Start(new_pos)),
            Backing::File(f) => f.seek(SeekFrom::Start(new_pos)),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        match &mut self.inner {
            Backing::Memory(c) => Ok(c.position()),
            Backing::Spooled(s) => s.stream_position(),
            Backing::File(f) => f.stream_position(),
        }
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            Backing::Memory(_) => "memory",
            Backing::Spooled(_) => "spooled",
            Backing::File(_) => "file",
        };
        f.debug_struct("Content")
            .field("backing", &kind)
            .field("len", &self.len)
            .finish()
    }
}
