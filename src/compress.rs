//! Artifact I/O with transparent compression.
//!
//! The codec is decided by the file suffix: `.xz` is written and read,
//! `.zst` is read only, anything else is plain. Readers decode on the fly;
//! writers serialize JSON, optionally compress it, and move the result into
//! place in one rename.

use crate::run_dir::{self, COMPRESSED_SUFFIX, ZSTD_SUFFIX};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// On-disk encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Xz,
    Zstd,
}

impl Codec {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext == COMPRESSED_SUFFIX => Codec::Xz,
            Some(ext) if ext == ZSTD_SUFFIX => Codec::Zstd,
            _ => Codec::Plain,
        }
    }
}

/// True when `path` names a compressed artifact.
pub fn is_compressed(path: &Path) -> bool {
    Codec::for_path(path) != Codec::Plain
}

/// Open `path` for line-oriented reading, decompressing if needed.
pub fn open_readable(path: &Path) -> std::io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    Ok(match Codec::for_path(path) {
        Codec::Plain => Box::new(BufReader::new(file)),
        Codec::Xz => Box::new(BufReader::new(xz2::read::XzDecoder::new(file))),
        Codec::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?)),
    })
}

/// Load a JSON document from `path`, decompressing if needed.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let reader = open_readable(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(reader).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn encode(json: Vec<u8>, codec: Codec, level: i32) -> std::io::Result<Vec<u8>> {
    match codec {
        Codec::Plain => Ok(json),
        Codec::Xz => {
            // xz presets run 0..=9
            let preset = level.clamp(0, 9) as u32;
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), preset);
            encoder.write_all(&json)?;
            encoder.finish()
        }
        Codec::Zstd => zstd::encode_all(json.as_slice(), level),
    }
}

/// Write `value` as pretty JSON to `path`, compressed at `level` when `path`
/// carries a compressed suffix. Parent directories are created.
///
/// The bytes go to a temp file in the destination directory first, so a
/// reader never sees a partially written artifact.
pub fn dump_json<T: Serialize>(value: &T, path: &Path, level: i32) -> Result<(), WriteError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|source| WriteError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let json = serde_json::to_vec_pretty(value).map_err(|source| WriteError::Serialize { source })?;
    let bytes = encode(json, Codec::for_path(path), level)
        .map_err(|source| WriteError::Compress { source })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| WriteError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    tmp.write_all(&bytes).map_err(|source| WriteError::Write {
        path: tmp.path().to_path_buf(),
        source,
    })?;
    tmp.persist(path).map_err(|e| WriteError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Remove every other encoding of `written` (plain, `.xz`, `.zst`) so a
/// later plain-first lookup cannot pick up a stale artifact. Returns the
/// paths that were removed.
pub fn remove_stale_variants(written: &Path) -> Vec<PathBuf> {
    let base = if is_compressed(written) {
        written.with_extension("")
    } else {
        written.to_path_buf()
    };

    let mut removed = Vec::new();
    for stale in run_dir::variants(&base) {
        if stale == written || !stale.exists() {
            continue;
        }
        match std::fs::remove_file(&stale) {
            Ok(()) => {
                tracing::debug!(file = %stale.display(), "removed stale artifact variant");
                removed.push(stale);
            }
            Err(e) => tracing::warn!(
                error = %e,
                file = %stale.display(),
                "failed to remove stale artifact variant"
            ),
        }
    }
    removed
}

/// Errors from loading a JSON artifact.
#[derive(Debug)]
pub enum LoadError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            LoadError::Json { path, source } => {
                write!(f, "invalid JSON in {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Json { source, .. } => Some(source),
        }
    }
}

/// Errors from writing a JSON artifact.
#[derive(Debug)]
pub enum WriteError {
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Compress {
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::CreateDir { path, source } => {
                write!(f, "failed to create directory {}: {source}", path.display())
            }
            WriteError::Serialize { source } => write!(f, "failed to serialize JSON: {source}"),
            WriteError::Compress { source } => write!(f, "failed to compress artifact: {source}"),
            WriteError::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
            WriteError::Persist { path, source } => {
                write!(f, "failed to move artifact into {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::CreateDir { source, .. } => Some(source),
            WriteError::Serialize { source } => Some(source),
            WriteError::Compress { source } => Some(source),
            WriteError::Write { source, .. } => Some(source),
            WriteError::Persist { source, .. } => Some(source),
        }
    }
}
