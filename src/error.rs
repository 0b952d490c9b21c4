//! Error types shared by the tree builder and the compile scheduler.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem failure with the path that triggered it.
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A generator command exited non-zero or could not be spawned.
    #[error("generator failed for {input}: {message}")]
    Generator { input: PathBuf, message: String },

    /// A compile or link command exited non-zero or could not be spawned.
    #[error("compiler failed for {file}: {message}")]
    Compiler { file: PathBuf, message: String },

    /// An invalid glob pattern or rename regex.
    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}

impl Error {
    /// Wrap an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn pattern(pattern: impl Into<String>, message: impl ToString) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path() {
        let err = Error::io(
            "/some/file.cc",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/some/file.cc"));
    }
}
