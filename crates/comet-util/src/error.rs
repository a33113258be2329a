//! Error types for comet-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A download failed.
    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    /// A version string contains unsafe characters.
    #[error("invalid version \"{version}\": only alphanumeric characters, dots, hyphens, and underscores are allowed")]
    InvalidVersion { version: String },

    /// An archive could not be read or written.
    #[error("archive error at {path}: {message}")]
    Archive { path: String, message: String },

    /// An archive entry would be placed outside the extraction root.
    #[error("archive entry `{entry}` escapes the extraction directory {root}")]
    ArchiveEscape { entry: String, root: String },
}
