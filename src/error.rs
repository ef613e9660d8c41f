//! Error types for the work-item tree, retrieval and packaging layers.
//!
//! Library code returns these typed errors; the pipeline and the binary wrap
//! them with `anyhow` context.

use std::path::PathBuf;

/// Failure to build a work-item tree from a persisted record.
#[derive(Debug, thiserror::Error)]
pub enum FicError {
    /// A story declared neither chapters nor sub-stories.
    #[error("fic {title:?} is missing any chapters")]
    MissingChapters { title: String },

    /// The record itself could not be decoded.
    #[error("invalid fic record: {0}")]
    Record(#[from] serde_json::Error),
}

/// Failure to retrieve a single chapter or asset.
///
/// Retrieval errors are recovered per item: the scheduler logs them and
/// drops the item. They are `Clone` because one memoized page fetch may be
/// shared by several descriptors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    /// The link did not parse as an absolute URL.
    #[error("invalid link {link:?}: {message}")]
    InvalidLink { link: String, message: String },

    /// No registered site handler matches the link.
    #[error("no site handler for {0}")]
    NoSite(String),

    /// Transport failure or non-success HTTP status.
    #[error("network error fetching {link}: {message}")]
    Network { link: String, message: String },

    /// The page loaded but holds no chapter where one was expected.
    #[error("no chapter found at {0}")]
    NotFound(String),

    /// The page itself reports an error.
    #[error("error fetching {link}: {message}")]
    SiteError { link: String, message: String },
}

impl RetrievalError {
    pub fn network(link: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            link: link.into(),
            message: message.to_string(),
        }
    }
}

/// Failure while writing the packaged artifact.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("duplicate package entry: {0}")]
    DuplicateEntry(String),

    #[error("package output already exists: {0:?}")]
    AlreadyExists(PathBuf),
}

impl PackageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
