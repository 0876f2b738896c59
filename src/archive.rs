//! KIWAD archive reader.
//!
//! Game content ships in `KIWAD` archives: a header, a directory of entries,
//! and the concatenated entry data, optionally zlib-compressed per entry.
//! [`Archive`] keeps the file open and hands out a streaming reader per
//! entry, inflating compressed entries lazily.
//!
//! The underlying file has a single seek cursor, so entry readers borrow the
//! archive mutably; read one entry at a time.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Take};
use std::path::Path;

use flate2::read::ZlibDecoder;

use crate::error::{Result, SpiralError};

/// Magic bytes at the start of every archive.
pub const ARCHIVE_MAGIC: &[u8; 5] = b"KIWAD";

/// A directory entry describing one archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Byte offset of the entry data from the start of the archive.
    pub offset: u32,
    /// Uncompressed size in bytes.
    pub size: u32,
    /// Stored size in bytes when compressed.
    pub compressed_size: u32,
    /// Whether the entry data is zlib-compressed.
    pub compressed: bool,
    /// CRC of the entry data.
    pub checksum: u32,
    /// Archive-relative path, trailing NULs trimmed.
    pub path: String,
}

impl Entry {
    /// Size of the entry as stored in the archive.
    fn stored_size(&self) -> u32 {
        if self.compressed {
            self.compressed_size
        } else {
            self.size
        }
    }
}

/// An open archive: the parsed directory plus the owned file handle.
pub struct Archive {
    file: File,
    version: u32,
    entries: Vec<Entry>,
}

impl Archive {
    /// Open an archive by path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Parse an archive from an already-open file.
    pub fn from_file(mut file: File) -> Result<Self> {
        let (version, count) = read_header(&mut file)?;

        let mut entries = Vec::new();
        for _ in 0..count {
            entries.push(read_entry(&mut file)?);
        }

        Ok(Self {
            file,
            version,
            entries,
        })
    }

    /// Archive format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The archive directory.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Look up a directory entry by path.
    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Get a streaming reader over one entry's data.
    ///
    /// The reader yields exactly [`Entry::size`] bytes, inflating on the fly
    /// when the entry is compressed. It borrows the archive's seek cursor,
    /// so only one entry can be read at a time.
    ///
    /// # Errors
    ///
    /// Returns [`SpiralError::InvalidFormat`] if the entry's data extends
    /// past the end of the file.
    pub fn entry_reader(&mut self, entry: &Entry) -> Result<EntryReader<'_>> {
        let stored = u64::from(entry.stored_size());
        let file_len = self.file.metadata()?.len();
        if u64::from(entry.offset) + stored > file_len {
            return Err(SpiralError::InvalidFormat(format!(
                "entry {} extends past end of archive",
                entry.path
            )));
        }

        self.file.seek(SeekFrom::Start(u64::from(entry.offset)))?;
        let section = (&mut self.file).take(stored);

        Ok(if entry.compressed {
            EntryReader::Deflated(ZlibDecoder::new(section))
        } else {
            EntryReader::Stored(section)
        })
    }
}

/// Streaming reader over one entry's data.
pub enum EntryReader<'a> {
    /// Entry stored verbatim.
    Stored(Take<&'a mut File>),
    /// Entry inflated from zlib on the fly.
    Deflated(ZlibDecoder<Take<&'a mut File>>),
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(reader) => reader.read(buf),
            Self::Deflated(reader) => reader.read(buf),
        }
    }
}

fn read_header(file: &mut File) -> Result<(u32, u32)> {
    let mut magic = [0u8; 5];
    read_exact(file, &mut magic, "archive magic")?;
    if &magic != ARCHIVE_MAGIC {
        return Err(SpiralError::InvalidFormat(
            "missing KIWAD magic bytes".to_string(),
        ));
    }

    let version = read_u32(file, "archive header")?;
    let count = read_u32(file, "archive header")?;

    if version >= 2 {
        let mut discard = [0u8; 1];
        read_exact(file, &mut discard, "archive header")?;
    }

    Ok((version, count))
}

fn read_entry(file: &mut File) -> Result<Entry> {
    let offset = read_u32(file, "archive entry")?;
    let size = read_u32(file, "archive entry")?;
    let compressed_size = read_u32(file, "archive entry")?;

    let mut flag = [0u8; 1];
    read_exact(file, &mut flag, "archive entry")?;
    let compressed = flag[0] != 0;

    let checksum = read_u32(file, "archive entry")?;

    let path_len = read_u32(file, "archive entry")? as usize;
    let mut path_buf = vec![0u8; path_len];
    read_exact(file, &mut path_buf, "archive entry path")?;

    let path = String::from_utf8_lossy(&path_buf)
        .trim_end_matches('\0')
        .to_string();

    Ok(Entry {
        offset,
        size,
        compressed_size,
        compressed,
        checksum,
        path,
    })
}

fn read_exact(file: &mut File, buf: &mut [u8], what: &str) -> Result<()> {
    file.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => SpiralError::Truncated(what.to_string()),
        _ => SpiralError::Transport(err),
    })
}

fn read_u32(file: &mut File, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(file, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}
