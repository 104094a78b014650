use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("given directory does not exist: {0}")]
    InvalidRoot(PathBuf),
    #[error("cannot read image metadata from {path}: {reason}")]
    UnreadableMetadata { path: PathBuf, reason: String },
    #[error("tag {tag} holds a {kind} value, which is neither a string nor a number")]
    UnsupportedTagValue { tag: String, kind: &'static str },
    #[error("no free file name found in {dir} after {attempts} attempts")]
    NameCollisionExhausted { dir: PathBuf, attempts: usize },
    #[error("classification level {level} moved {parent} to {destination}, adding more than one folder level")]
    DepthInvariant {
        level: usize,
        parent: PathBuf,
        destination: PathBuf,
    },
    #[error("filesystem operation failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl ToString) -> Self {
        Self::UnreadableMetadata {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Errors that concern the run as a whole rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRoot(_) | Self::DepthInvariant { .. })
    }
}

/// Attaches the offending path to an `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> EngineResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> EngineResult<T> {
        self.map_err(|err| EngineError::io(path, err))
    }
}
