use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    thread,
    time::Duration,
};

use tracing::{trace, warn};

use crate::error::{Result, WatchError};

/// Read buffer for counting; large enough that multi-gigabyte files don't
/// spend their time in syscalls.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long to keep trying to open a file another process has locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between failed attempts. Default is 500 ms.
    pub interval: Duration,

    /// Total time to keep trying. Default is 5 seconds.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        RetryPolicy { interval, timeout }
    }

    /// Number of open attempts this policy allows; never less than one.
    pub fn attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }

        let n = self.timeout.as_nanos() / self.interval.as_nanos();
        u32::try_from(n).unwrap_or(u32::MAX).max(1)
    }
}

/// Calls `open` until it succeeds, sleeping `policy.interval` after every
/// failure, for at most [`RetryPolicy::attempts`] tries.
///
/// The last error is returned inside [`WatchError::FileUnavailable`].
pub fn open_with_retry<T, F>(path: &Path, policy: &RetryPolicy, mut open: F) -> Result<T>
where
    F: FnMut(&Path) -> io::Result<T>,
{
    let attempts = policy.attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match open(path) {
            Ok(t) => return Ok(t),
            Err(e) => {
                trace!("attempt {attempt}/{attempts} to open {} failed: {e}", path.display());
                last_error = Some(e);
                thread::sleep(policy.interval);
            }
        }
    }

    let source = last_error.unwrap_or_else(|| io::Error::other("no open attempt was made"));
    warn!(
        "unable to open {} for {:?}: {source}",
        path.display(),
        policy.timeout
    );

    Err(WatchError::FileUnavailable {
        path: path.to_path_buf(),
        timeout: policy.timeout,
        source,
    })
}

/// Counts the lines in `path`, retrying the open per `policy`.
pub fn count_lines(path: &Path, policy: &RetryPolicy) -> Result<u64> {
    count_lines_with(path, policy, |p| File::open(p))
}

/// Like [`count_lines`], but opens the file with `open`.
pub fn count_lines_with<F>(path: &Path, policy: &RetryPolicy, open: F) -> Result<u64>
where
    F: FnMut(&Path) -> io::Result<File>,
{
    let file = open_with_retry(path, policy, open)?;
    count_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file)).map_err(|source| {
        WatchError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Counts `\n`-terminated records in a stream. A final record with no
/// terminator still counts as a line; an empty stream has none.
///
/// Reads one buffer at a time, so memory use doesn't depend on file size.
pub fn count_reader<R: BufRead>(mut reader: R) -> io::Result<u64> {
    let mut count = 0u64;
    let mut in_partial_line = false;

    loop {
        let consumed = {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if buf.is_empty() {
                break;
            }

            count += buf.iter().filter(|&&b| b == b'\n').count() as u64;
            in_partial_line = buf.last() != Some(&b'\n');
            buf.len()
        };

        reader.consume(consumed);
    }

    if in_partial_line {
        count += 1;
    }

    Ok(count)
}
