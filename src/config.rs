use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from rusage.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct RusageConfig {
    pub files: FilesConfig,
    pub storage: StorageConfig,
}

/// File and directory names, relative to the run prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub free_log: String,
    pub parsed: String,
    pub plot_dir: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub compress_parsed: bool,
    pub compress_level: i32,
}

/// Per-invocation input shared by both stages.
#[derive(Debug, Clone, clap::Args)]
pub struct StageArgs {
    /// Run directory holding free.log and receiving the artifacts
    #[arg(short, long)]
    pub prefix: PathBuf,
}

// --- Default implementations ---

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            free_log: "free.log".to_string(),
            parsed: "free.json".to_string(),
            plot_dir: "plot.data".to_string(),
            summary: "resource_usage.json".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compress_parsed: true,
            compress_level: 6,
        }
    }
}

impl RusageConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Errors from loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = RusageConfig::load(&dir.path().join("rusage.toml")).unwrap();
        assert_eq!(cfg.files.free_log, "free.log");
        assert_eq!(cfg.files.parsed, "free.json");
        assert_eq!(cfg.files.plot_dir, "plot.data");
        assert_eq!(cfg.files.summary, "resource_usage.json");
        assert!(cfg.storage.compress_parsed);
        assert_eq!(cfg.storage.compress_level, 6);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rusage.toml");
        std::fs::write(&path, "[storage]\ncompress_parsed = false\n").unwrap();

        let cfg = RusageConfig::load(&path).unwrap();
        assert!(!cfg.storage.compress_parsed);
        assert_eq!(cfg.storage.compress_level, 6);
        assert_eq!(cfg.files.free_log, "free.log");
    }

    #[test]
    fn file_names_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rusage.toml");
        std::fs::write(
            &path,
            "[files]\nfree_log = \"mem.log\"\nplot_dir = \"plots\"\n",
        )
        .unwrap();

        let cfg = RusageConfig::load(&path).unwrap();
        assert_eq!(cfg.files.free_log, "mem.log");
        assert_eq!(cfg.files.plot_dir, "plots");
        assert_eq!(cfg.files.summary, "resource_usage.json");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rusage.toml");
        std::fs::write(&path, "[storage\ncompress_level = ").unwrap();

        let err = RusageConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("rusage.toml"));
    }
}
