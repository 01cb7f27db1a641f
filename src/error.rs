/// Error taxonomy shared by every codec
/// Structural errors abort the enclosing operation; per-entry errors are
/// caught by the batch loops and counted instead
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Bad magic or a structure that cannot be parsed
    #[error("invalid archive {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Recognized container, but a subtype this codec does not handle
    #[error("unsupported archive {path:?}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("no files added to archive")]
    EmptyArchive,

    /// Single-entry decode failure inside an archive
    #[error("failed to decompress {entry}: {reason}")]
    Compression { entry: String, reason: String },

    /// Builder used out of order (e.g. adding after build without clear)
    #[error("invalid builder state: {0}")]
    InvalidState(&'static str),

    /// I/O failure while reading or writing a named file
    #[error("{path:?}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn compression(entry: impl Into<String>, reason: impl ToString) -> Self {
        Self::Compression {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }

    /// Attach a path to a bare I/O error, mapping missing files to `NotFound`
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::File {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
