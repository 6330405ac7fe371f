//! Polls a directory for text files and reports, each cycle, which files were
//! created, modified or deleted along with how their line counts changed.
//!
//! Changed files are counted on worker threads so one huge or locked file
//! doesn't hold up the others; a file that can't be opened is retried every
//! 500 ms for up to 5 seconds before it's reported as unavailable.

mod watcher;
pub use watcher::{PollReport, PollState, ReportLine, Watcher};

mod classifier;
pub use classifier::{classify, Classification, ListedFile};

mod counter;
pub use counter::{count_lines, count_lines_with, count_reader, open_with_retry, RetryPolicy};

mod error;
pub use error::{Result, WatchError};

mod format;
pub use format::{format_result, FileStatus};

mod settings;
pub use settings::{normalize_pattern, resolve_directory, DEFAULT_PATTERN};

mod snapshot;
pub use snapshot::{FileKey, SnapshotStore, TrackedFile};

mod processor;

use std::{
    path::Path,
    time::{Duration, SystemTime},
};

/// Specifies how [`Watcher::run`] will stop polling
#[derive(Clone, Copy, Debug)]
pub enum StopCondition {
    /// Polls once to record the files already present, then stops
    Once,

    /// Stops after the specified number of polls have been requested, counting the first
    Polls(usize),

    /// Continues polling until the specified duration of time has elapsed
    Elapsed(Duration),

    /// Never stops
    Forever,
}

/// Result flattening [is unstable](https://github.com/rust-lang/rust/issues/70142),
/// so this function simplifies getting the system time from a file.
///
/// Returns `Ok(None)` for anything that isn't a regular file.
fn modification_time(path: &Path) -> std::io::Result<Option<SystemTime>> {
    let metadata = path.metadata()?;
    if !metadata.is_file() {
        return Ok(None);
    }

    let modified = metadata.modified()?;
    Ok(Some(modified))
}
