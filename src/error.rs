use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

/// Failures that can occur while watching a directory.
///
/// None of these stop monitoring: [`crate::Watcher::poll`] folds them into the
/// cycle's report and the next scheduled poll runs as usual.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watched directory is missing or can't be read at listing time.
    #[error("Can not access {}, or it does not exist.", .0.display())]
    DirectoryUnavailable(PathBuf),

    /// A file couldn't be opened before the retry budget ran out.
    #[error("Unable to open file {} for {timeout:?}: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        timeout: Duration,
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure while listing or counting.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two files whose names differ only in case; `path` is ignored in
    /// favour of `kept`.
    #[error("{} differs only in case from {}; ignoring it", path.display(), kept.display())]
    NameCollision { path: PathBuf, kept: PathBuf },

    #[error("Invalid file pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Another poll cycle is still in flight; this request was dropped.
    #[error("A poll cycle is already in progress")]
    Busy,
}
