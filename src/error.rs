use std::io;

/// Failure kinds surfaced by the update engine.
///
/// An update check is best-effort and unattended: any of these aborts the
/// remainder of the current run, gets logged with context, and is retried
/// only on the next application launch.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Could not create the updates working directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Could not stage the bundled relauncher executable to disk.
    #[error("failed to extract relauncher to {path}: {source}")]
    ResourceExtraction {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Manifest or package transfer failed.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed version string or manifest document.
    #[error("parse error: {0}")]
    Parse(String),

    /// The relauncher process could not be started or died on launch.
    #[error("failed to spawn relauncher: {0}")]
    ProcessSpawn(String),

    /// Local file operation on config or backup files failed.
    #[error("file I/O error: {0}")]
    FileIo(#[from] io::Error),
}
