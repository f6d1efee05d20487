use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a pipeline run
#[derive(Error, Debug)]
pub enum Error {
    /// Settings could not be read or are unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// A checkout job failed; names the offending version
    #[error("version `{version}` (selector `{selector}`): {source}")]
    Vcs {
        version: String,
        selector: String,
        #[source]
        source: VcsError,
    },

    /// The overall checkout deadline expired before every job finished
    #[error("checkout deadline of {0:?} expired")]
    DeadlineExceeded(Duration),

    /// A document reached the grouping stage without its grouping key
    #[error("document {document} has no `{key}` metadata")]
    MissingGroupKey { key: String, document: String },

    /// A revision group did not hold exactly one revision marker
    #[error("group `{group}` has {markers} revision markers, expected exactly one")]
    GroupMarkers { group: String, markers: usize },

    /// Analyzer collaborator failure
    #[error("analysis failed: {0}")]
    Analysis(String),

    /// Persisted cache entry could not be read or written
    #[error("cache store error at {path}: {message}")]
    CacheStore { path: PathBuf, message: String },

    /// Invalid source file glob
    #[error("invalid glob pattern `{pattern}`: {message}")]
    Glob { pattern: String, message: String },

    /// A spawned task panicked or was cancelled
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a single VCS client invocation
#[derive(Error, Debug)]
pub enum VcsError {
    /// The executable could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The client exited with a non-zero status
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Metadata query output was not `<hash> <epoch-seconds>`
    #[error("unparsable revision metadata {output:?}: {reason}")]
    Metadata { output: String, reason: String },
}
