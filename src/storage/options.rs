use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of rows per vector.
pub const DEFAULT_VECTOR_SIZE: usize = 1024;
/// Default number of vectors in a transient segment.
pub const DEFAULT_VECTORS_PER_SEGMENT: usize = 16;

/// Configuration shared by every table and column of a database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageOptions {
    /// Rows per vector; scans, updates and version chunks use this unit.
    pub vector_size: usize,
    /// Vectors per transient segment; capacity is `vector_size * vectors_per_segment`.
    pub vectors_per_segment: usize,
    /// Whether committed update chains are pruned after each commit.
    pub prune_on_commit: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            vector_size: DEFAULT_VECTOR_SIZE,
            vectors_per_segment: DEFAULT_VECTORS_PER_SEGMENT,
            prune_on_commit: true,
        }
    }
}

impl StorageOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rows per vector.
    pub fn vector_size(mut self, rows: usize) -> Self {
        self.vector_size = rows;
        self
    }

    /// Sets the number of vectors in a transient segment.
    pub fn vectors_per_segment(mut self, vectors: usize) -> Self {
        self.vectors_per_segment = vectors;
        self
    }

    /// Enables or disables update-chain pruning at commit.
    pub fn prune_on_commit(mut self, enabled: bool) -> Self {
        self.prune_on_commit = enabled;
        self
    }

    /// Row capacity of a freshly created transient segment.
    pub fn segment_capacity(&self) -> usize {
        self.vector_size.saturating_mul(self.vectors_per_segment)
    }

    /// Rejects settings the storage layer cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_size == 0 {
            return Err(ConfigError::Invalid {
                field: "vector_size",
                reason: "must be greater than zero",
            });
        }
        if self.vector_size > u32::MAX as usize {
            return Err(ConfigError::Invalid {
                field: "vector_size",
                reason: "must fit in 32 bits",
            });
        }
        if self.vectors_per_segment == 0 {
            return Err(ConfigError::Invalid {
                field: "vectors_per_segment",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Parses and validates options from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let options: StorageOptions =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: StorageOptions = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }
}

/// Errors raised while loading [`StorageOptions`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read storage config {path}: {source}")]
    Read {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration text is not valid TOML for these options.
    #[error("failed to parse storage config {}: {source}", display_path(.path))]
    Parse {
        /// File being parsed, if any.
        path: Option<PathBuf>,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A field holds a value outside its supported range.
    #[error("invalid storage option {field}: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<inline>".to_owned())
}
