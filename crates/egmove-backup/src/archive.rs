use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use egmove_relocator::LocationField;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BackupError;

pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// First entry of every archive.
pub const METADATA_ENTRY: &str = "egmove-backup.json";
pub const PAYLOAD_DIR: &str = "payload";
pub const MANIFEST_DIR: &str = "manifest";
pub const EXTERNAL_DIR: &str = "external";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

/// Stream compression wrapped around the tar archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveCompression {
    #[default]
    Gzip,
    /// LZ4 frame format; faster and larger than gzip.
    Lz4,
}

impl ArchiveCompression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lz4 => "lz4",
        }
    }

    /// Recognizes the compression from an archive's leading bytes.
    pub fn detect(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(&LZ4_FRAME_MAGIC) {
            Some(Self::Lz4)
        } else if prefix.starts_with(&GZIP_MAGIC) {
            Some(Self::Gzip)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// A manifest path outside the install tree, archived under `external/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEntry {
    pub field: LocationField,
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: u32,
    pub app_id: String,
    pub display_name: String,
    pub install_location: String,
    /// File name of the `.item` manifest under `manifest/`.
    pub manifest_file: String,
    /// The application's install registry entry as it was stored.
    pub registry_entry: Value,
    #[serde(default)]
    pub external: Vec<ExternalEntry>,
    pub created_at_unix: u64,
}

enum Encoder<W: Write> {
    Gzip(GzEncoder<W>),
    Lz4(FrameEncoder<W>),
}

impl<W: Write> Encoder<W> {
    fn new(inner: W, compression: ArchiveCompression) -> Self {
        match compression {
            ArchiveCompression::Gzip => {
                Self::Gzip(GzEncoder::new(inner, flate2::Compression::default()))
            }
            ArchiveCompression::Lz4 => Self::Lz4(FrameEncoder::new(inner)),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Self::Gzip(encoder) => encoder.finish(),
            Self::Lz4(encoder) => encoder.finish().map_err(io::Error::other),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(encoder) => encoder.write(buf),
            Self::Lz4(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(encoder) => encoder.flush(),
            Self::Lz4(encoder) => encoder.flush(),
        }
    }
}

pub(crate) enum Decoder<R: Read> {
    Gzip(GzDecoder<R>),
    Lz4(FrameDecoder<R>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(decoder) => decoder.read(buf),
            Self::Lz4(decoder) => decoder.read(buf),
        }
    }
}

/// Tar writer over a compressed file. Symlinks are stored as links.
pub(crate) struct ArchiveWriter {
    builder: tar::Builder<Encoder<BufWriter<File>>>,
    mtime: u64,
}

impl ArchiveWriter {
    pub(crate) fn create(
        path: &Path,
        compression: ArchiveCompression,
        mtime: u64,
    ) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut builder = tar::Builder::new(Encoder::new(BufWriter::new(file), compression));
        builder.follow_symlinks(false);
        Ok(Self { builder, mtime })
    }

    pub(crate) fn append_bytes(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.builder.append_data(&mut header, name, data)
    }

    pub(crate) fn append_file(&mut self, name: &str, path: &Path) -> io::Result<()> {
        self.builder.append_path_with_name(path, name)
    }

    pub(crate) fn append_dir_all(&mut self, name: &str, path: &Path) -> io::Result<()> {
        self.builder.append_dir_all(name, path)
    }

    pub(crate) fn finish(self) -> io::Result<()> {
        let mut writer = self.builder.into_inner()?.finish()?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()
    }
}

pub(crate) type ArchiveReader = tar::Archive<Decoder<BufReader<File>>>;

pub(crate) fn open_archive(
    path: &Path,
) -> Result<(ArchiveCompression, ArchiveReader), BackupError> {
    let read_failed = |error| BackupError::ArchiveRead {
        path: path.to_path_buf(),
        error,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_failed)?);
    let compression = ArchiveCompression::detect(reader.fill_buf().map_err(read_failed)?)
        .ok_or_else(|| BackupError::InvalidArchive {
            path: path.to_path_buf(),
            reason: "neither gzip nor lz4 compressed".to_string(),
        })?;

    let decoder = match compression {
        ArchiveCompression::Gzip => Decoder::Gzip(GzDecoder::new(reader)),
        ArchiveCompression::Lz4 => Decoder::Lz4(FrameDecoder::new(reader)),
    };
    Ok((compression, tar::Archive::new(decoder)))
}

pub(crate) type ArchiveEntries<'a> = tar::Entries<'a, Decoder<BufReader<File>>>;

/// Reads the metadata entry without unpacking the rest of the archive.
pub fn read_backup_metadata(path: &Path) -> Result<BackupMetadata, BackupError> {
    let (_, mut archive) = open_archive(path)?;
    let mut entries = archive.entries().map_err(|error| BackupError::ArchiveRead {
        path: path.to_path_buf(),
        error,
    })?;
    read_metadata_entry(path, &mut entries)
}

/// Consumes the first entry, which must be the metadata document.
pub(crate) fn read_metadata_entry(
    path: &Path,
    entries: &mut ArchiveEntries<'_>,
) -> Result<BackupMetadata, BackupError> {
    let read_failed = |error| BackupError::ArchiveRead {
        path: path.to_path_buf(),
        error,
    };
    let invalid = |reason: String| BackupError::InvalidArchive {
        path: path.to_path_buf(),
        reason,
    };

    let mut first = entries
        .next()
        .ok_or_else(|| invalid("archive is empty".to_string()))?
        .map_err(read_failed)?;
    if first.path().map_err(read_failed)?.as_ref() != Path::new(METADATA_ENTRY) {
        return Err(invalid(format!("first entry is not {METADATA_ENTRY}")));
    }

    let mut raw = String::new();
    first.read_to_string(&mut raw).map_err(read_failed)?;
    let metadata: BackupMetadata = serde_json::from_str(&raw)
        .map_err(|err| invalid(format!("unreadable {METADATA_ENTRY}: {err}")))?;
    if metadata.version != BACKUP_FORMAT_VERSION {
        return Err(invalid(format!(
            "unsupported backup version {}",
            metadata.version
        )));
    }
    Ok(metadata)
}
