//! Error types for configuration operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationError;

/// File operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    /// Reading a config file.
    Read,
    /// Writing a config file.
    Write,
    /// Creating the directory a config file lives in.
    CreateDir,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::CreateDir => "create directory",
        })
    }
}

/// Errors from loading, saving, or checking a [`ThreadConfig`](crate::ThreadConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The filesystem refused an operation on a config path.
    #[error("cannot {op} {}: {source}", path.display())]
    Io {
        /// What was being done.
        op: FileOp,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid thread config.
    #[error("invalid thread config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be encoded as TOML.
    #[error("cannot encode thread config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A tunable is out of range.
    #[error("thread config rejected: {0}")]
    Validation(#[from] ValidationError),
}

impl ConfigError {
    fn io(op: FileOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Reading `path` failed.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::io(FileOp::Read, path, source)
    }

    /// Writing `path` failed.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::io(FileOp::Write, path, source)
    }

    /// Creating the directory `path` failed.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::io(FileOp::CreateDir, path, source)
    }

    /// Whether the error only means the file does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConfigError::Io { op: FileOp::Read, source, .. }
                if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
