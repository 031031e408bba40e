//! File transports.
//!
//! The engine itself only needs a `Write` sink and a `BufRead` source. This
//! module supplies the file-backed ones: [`create`] opens a buffered sink,
//! optionally wrapped in an LZ4 frame encoder (feature `lz4_flex`), and
//! [`open`] memory-maps a file and transparently decodes LZ4 frames,
//! detected by their magic number.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::error::{PersistError, Result};

/// Magic number opening every LZ4 frame.
pub const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// Compression applied by [`create`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain text stream.
    #[default]
    None,
    /// LZ4 frame format. Requires the `lz4_flex` feature.
    Lz4,
}

/// A file sink returned by [`create`].
pub enum FileSink {
    /// Uncompressed.
    Plain(BufWriter<File>),
    /// LZ4 frame encoder.
    #[cfg(feature = "lz4_flex")]
    Lz4(lz4_flex::frame::FrameEncoder<BufWriter<File>>),
}

impl FileSink {
    /// Completes the file: writes the frame trailer if compressing and
    /// flushes everything to disk.
    pub fn finish(self) -> Result<()> {
        let mut file = match self {
            Self::Plain(writer) => writer,
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(encoder) => encoder
                .finish()
                .map_err(|e| PersistError::SinkFailure(Arc::new(io::Error::other(e.to_string()))))?,
        };
        file.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("FileSink::Plain"),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(_) => f.write_str("FileSink::Lz4"),
        }
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(w) => w.flush(),
        }
    }
}

/// Creates (or truncates) `path` for writing.
///
/// # Errors
/// [`PersistError::SinkFailure`] if the file cannot be created, and
/// [`PersistError::Internal`] if `compression` is not compiled in.
pub fn create<P: AsRef<Path>>(path: P, compression: Compression) -> Result<FileSink> {
    let path = path.as_ref();
    let file = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, File::create(path)?);
    debug!(path = %path.display(), ?compression, "created stream file");
    match compression {
        Compression::None => Ok(FileSink::Plain(file)),
        #[cfg(feature = "lz4_flex")]
        Compression::Lz4 => Ok(FileSink::Lz4(lz4_flex::frame::FrameEncoder::new(file))),
        #[cfg(not(feature = "lz4_flex"))]
        Compression::Lz4 => Err(PersistError::Internal(
            "LZ4 compression requires the `lz4_flex` feature".into(),
        )),
    }
}

/// A file source returned by [`open`].
pub enum FileSource {
    /// Zero-length file.
    Empty(io::Empty),
    /// Uncompressed, read straight from the mapping.
    Mapped(Cursor<Mmap>),
    /// LZ4 frame decoded from the mapping.
    #[cfg(feature = "lz4_flex")]
    Lz4(io::BufReader<lz4_flex::frame::FrameDecoder<Cursor<Mmap>>>),
}

impl FileSource {
    /// True if the file is LZ4 compressed.
    pub fn is_compressed(&self) -> bool {
        #[cfg(feature = "lz4_flex")]
        if let Self::Lz4(_) = self {
            return true;
        }
        false
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty(_) => f.write_str("FileSource::Empty"),
            Self::Mapped(c) => write!(f, "FileSource::Mapped({} bytes)", c.get_ref().len()),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(_) => f.write_str("FileSource::Lz4"),
        }
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Empty(r) => r.read(buf),
            Self::Mapped(r) => r.read(buf),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(r) => r.read(buf),
        }
    }
}

impl BufRead for FileSource {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Self::Empty(r) => r.fill_buf(),
            Self::Mapped(r) => r.fill_buf(),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Self::Empty(r) => r.consume(amt),
            Self::Mapped(r) => r.consume(amt),
            #[cfg(feature = "lz4_flex")]
            Self::Lz4(r) => r.consume(amt),
        }
    }
}

/// Opens `path` for reading.
///
/// # Errors
/// [`PersistError::ReadFailure`] if the file cannot be opened or mapped, or
/// if it is compressed and LZ4 support is not compiled in.
pub fn open<P: AsRef<Path>>(path: P) -> Result<FileSource> {
    let path = path.as_ref();
    let open_failure = |e: io::Error| {
        PersistError::read_failure(0, format!("cannot open {}: {e}", path.display()))
    };
    let file = File::open(path).map_err(open_failure)?;
    let len = file.metadata().map_err(open_failure)?.len();
    if len == 0 {
        return Ok(FileSource::Empty(io::empty()));
    }

    // Safety: the mapping is only valid while no other process truncates or
    // rewrites the file; stream files are treated as immutable once written.
    #[allow(unsafe_code)]
    let mmap = unsafe { Mmap::map(&file) }.map_err(open_failure)?;

    let compressed = mmap.get(..LZ4_FRAME_MAGIC.len()) == Some(&LZ4_FRAME_MAGIC[..]);
    debug!(path = %path.display(), bytes = len, compressed, "opened stream file");
    if !compressed {
        return Ok(FileSource::Mapped(Cursor::new(mmap)));
    }

    #[cfg(feature = "lz4_flex")]
    {
        let decoder = lz4_flex::frame::FrameDecoder::new(Cursor::new(mmap));
        Ok(FileSource::Lz4(io::BufReader::with_capacity(
            DEFAULT_BUFFER_SIZE,
            decoder,
        )))
    }
    #[cfg(not(feature = "lz4_flex"))]
    {
        Err(PersistError::read_failure(
            0,
            "file is LZ4 compressed but the `lz4_flex` feature is disabled",
        ))
    }
}
