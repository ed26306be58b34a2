//! Mount configuration.
//!
//! Loaded from a RON file; command-line flags are applied on top by the
//! binary.
//!
//! ```ron
//! (
//!     sources: ["/data/backup.tar"],
//!     mount_point: Some("/mnt/backup"),
//!     recursive: true,
//!     pool: (max_idle: 4),
//!     dispatch: single,
//! )
//! ```

use ratarmount_index::PoolConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime flavour that drives the engine.
///
/// The FUSE session always delivers callbacks from a single thread, so this
/// never makes kernel requests concurrent. It decides whether engine work
/// spawned from those callbacks, and the inspection commands, run on one
/// worker or several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// Current-thread runtime.
    #[default]
    Single,
    /// Multi-thread runtime. FUSE callbacks still arrive one at a time.
    Multi,
}

/// Everything needed to mount one or more archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Archive files to serve.
    pub sources: Vec<PathBuf>,
    /// Where to mount. Only needed for a kernel mount.
    pub mount_point: Option<PathBuf>,
    /// Explicit index file. Only valid with a single source.
    pub index: Option<PathBuf>,
    /// Expose nested archives as directories.
    pub recursive: bool,
    pub pool: PoolConfig,
    pub dispatch: Dispatch,
    /// Stay attached to the terminal.
    pub foreground: bool,
    /// Log verbosity, 0 (errors only) to 3 (trace).
    pub debug: u8,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            mount_point: None,
            index: None,
            recursive: true,
            pool: PoolConfig::default(),
            dispatch: Dispatch::default(),
            foreground: false,
            debug: 1,
        }
    }
}

impl MountConfig {
    /// Load a RON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron(&text)?;
        tracing::debug!(path = %path.display(), sources = config.sources.len(), "loaded config");
        Ok(config)
    }

    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Check that the configuration can be mounted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no archive given".into()));
        }
        if self.index.is_some() && self.sources.len() > 1 {
            return Err(ConfigError::Invalid(
                "an explicit index requires exactly one archive".into(),
            ));
        }
        self.layout().map(|_| ())
    }

    /// Mount path of every source.
    ///
    /// A single source is served at `/`. Several sources are each served at
    /// `/<file name>`, which must then be unique.
    pub fn layout(&self) -> Result<Vec<(PathBuf, PathBuf)>, ConfigError> {
        if let [source] = self.sources.as_slice() {
            return Ok(vec![(PathBuf::from("/"), source.clone())]);
        }

        let mut seen = HashSet::new();
        self.sources
            .iter()
            .map(|source| {
                let name = source.file_name().ok_or_else(|| {
                    ConfigError::Invalid(format!("{} has no file name", source.display()))
                })?;
                if !seen.insert(name.to_os_string()) {
                    return Err(ConfigError::Invalid(format!(
                        "two archives named {}",
                        name.to_string_lossy()
                    )));
                }
                Ok((Path::new("/").join(name), source.clone()))
            })
            .collect()
    }
}
