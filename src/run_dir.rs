use crate::config::FilesConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix of the compressed variant of any artifact (xz).
pub const COMPRESSED_SUFFIX: &str = "xz";

/// zstd-compressed variants are accepted as input, never written.
pub const ZSTD_SUFFIX: &str = "zst";

/// Well-known paths under a simulation run's prefix directory.
///
/// Both pipeline stages locate their inputs and outputs through this struct,
/// so a config change to a file name applies to both sides of the exchange.
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
    files: FilesConfig,
}

impl RunDir {
    /// Create a new RunDir referencing the given prefix.
    pub fn new(root: impl Into<PathBuf>, files: &FilesConfig) -> Self {
        Self {
            root: root.into(),
            files: files.clone(),
        }
    }

    /// The run prefix itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw memory log (e.g. `free.log`), uncompressed name.
    pub fn free_log(&self) -> PathBuf {
        self.root.join(&self.files.free_log)
    }

    /// Parsed sample series (e.g. `free.json`), uncompressed name.
    pub fn parsed(&self) -> PathBuf {
        self.root.join(&self.files.parsed)
    }

    /// Where the parser writes the sample series.
    pub fn parsed_output(&self, compress: bool) -> PathBuf {
        if compress {
            compressed_variant(&self.parsed())
        } else {
            self.parsed()
        }
    }

    /// Directory holding plot-ready summaries.
    pub fn plot_dir(&self) -> PathBuf {
        self.root.join(&self.files.plot_dir)
    }

    /// Path to the usage summary (e.g. `plot.data/resource_usage.json`).
    pub fn summary(&self) -> PathBuf {
        self.plot_dir().join(&self.files.summary)
    }
}

/// `path` with the compressed suffix appended (`free.log` -> `free.log.xz`).
pub fn compressed_variant(path: &Path) -> PathBuf {
    with_suffix(path, COMPRESSED_SUFFIX)
}

/// `path` with the zstd suffix appended (`free.log` -> `free.log.zst`).
pub fn zstd_variant(path: &Path) -> PathBuf {
    with_suffix(path, ZSTD_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Every on-disk encoding of `path`, in lookup order: plain, xz, zstd.
pub fn variants(path: &Path) -> [PathBuf; 3] {
    [path.to_path_buf(), compressed_variant(path), zstd_variant(path)]
}

/// Resolve an input artifact: the plain path if it exists, otherwise its
/// xz variant, otherwise its zstd variant. `None` when none is on disk.
pub fn resolve_input(path: &Path) -> Option<PathBuf> {
    variants(path).into_iter().find(|p| p.exists())
}
