use std::{
    collections::HashMap,
    fmt,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};

use crate::{
    classifier::{classify, Classification, ListedFile},
    counter::RetryPolicy,
    error::{Result, WatchError},
    format::{format_result, FileStatus},
    processor::{count_all, CountJob, Opener},
    settings::{normalize_pattern, resolve_directory},
    snapshot::{FileKey, SnapshotStore},
    StopCondition,
};

/// Upper bound on counting threads per cycle unless overridden.
const DEFAULT_MAX_WORKERS: usize = 64;

/// File names are matched without regard to case.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Where a poll cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollState {
    Idle = 0,
    Listing = 1,
    Dispatching = 2,
    AwaitingCounts = 3,
    Reconciling = 4,
}

impl PollState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PollState::Listing,
            2 => PollState::Dispatching,
            3 => PollState::AwaitingCounts,
            4 => PollState::Reconciling,
            _ => PollState::Idle,
        }
    }
}

/// Holds the watcher out of [`PollState::Idle`] for the length of one cycle
/// and puts it back when dropped, including on early return.
struct CycleGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> CycleGuard<'a> {
    fn begin(state: &'a AtomicU8) -> Result<Self> {
        state
            .compare_exchange(
                PollState::Idle as u8,
                PollState::Listing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| CycleGuard { state })
            .map_err(|_| WatchError::Busy)
    }

    fn advance(&self, next: PollState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.store(PollState::Idle as u8, Ordering::Release);
    }
}

/// One line of a cycle's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    Change {
        status: FileStatus,
        name: String,
        old_count: u64,
        new_count: u64,
    },
    Error(String),
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportLine::Change {
                status,
                name,
                old_count,
                new_count,
            } => f.write_str(&format_result(*status, name, *old_count, *new_count)),
            ReportLine::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Everything one poll cycle found.
///
/// Displays as one line per entry, each terminated by a newline; an empty
/// report displays as nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub lines: Vec<ReportLine>,

    /// How many files were handed to a line counter this cycle.
    pub dispatched: usize,
}

impl PollReport {
    fn from_error(error: &WatchError) -> Self {
        PollReport {
            lines: vec![ReportLine::Error(error.to_string())],
            dispatched: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The report rendered line by line, without terminators.
    pub fn to_lines(&self) -> Vec<String> {
        self.lines.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for PollReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// A directory listing plus whatever went wrong producing it.
struct Listing {
    files: Vec<ListedFile>,
    errors: Vec<WatchError>,
}

/// Polls one directory for files matching a glob and reports what was
/// created, modified or deleted since the previous poll, with line counts.
///
/// Polling goes through a shared reference so the watcher can sit in an
/// [`Arc`] and be polled from a timer thread. Only one cycle runs at a time;
/// a poll that arrives mid-cycle is dropped (see [`Watcher::try_poll`]).
pub struct Watcher {
    directory: PathBuf,

    /// The normalized glob, as given to [`Pattern::new`].
    pattern: String,
    matcher: Pattern,

    /// The duration between each poll when driven by [`Watcher::run`]. Default
    /// is 10 seconds.
    check_interval: Duration,

    /// How long to keep retrying a file that can't be opened.
    retry: RetryPolicy,

    /// Most counting threads used in one cycle. Default is 64.
    max_workers: usize,

    /// How counting workers open files.
    opener: Box<Opener>,

    /// Whether [`Watcher::run`] hands the baseline poll to its sink. Default
    /// is `false`.
    report_baseline: bool,

    state: AtomicU8,

    /// Only locked by the cycle holding the [`CycleGuard`], so never contended.
    store: Mutex<SnapshotStore>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("directory", &self.directory)
            .field("pattern", &self.pattern)
            .field("check_interval", &self.check_interval)
            .field("retry", &self.retry)
            .field("state", &self.state())
            .finish()
    }
}

impl Watcher {
    /// Creates a watcher for `directory` and `pattern`, both as typed on the
    /// command line.
    ///
    /// An empty directory means the current one and a bare name is relative to
    /// it; the pattern is normalized by [`normalize_pattern`].
    pub fn new<D: AsRef<str>, P: AsRef<str>>(directory: D, pattern: P) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|source| WatchError::Io {
            path: PathBuf::from("."),
            source,
        })?;

        let directory = resolve_directory(directory.as_ref(), &cwd);
        Self::with_directory(directory, pattern.as_ref())
    }

    /// Creates a watcher for an already-resolved directory.
    pub fn with_directory<D: Into<PathBuf>>(directory: D, pattern: &str) -> Result<Self> {
        let pattern = normalize_pattern(pattern);
        let matcher = Pattern::new(&pattern).map_err(|source| WatchError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        Ok(Watcher {
            directory: directory.into(),
            pattern,
            matcher,
            check_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            opener: Box::new(|path: &Path| File::open(path)),
            report_baseline: false,
            state: AtomicU8::new(PollState::Idle as u8),
            store: Mutex::new(SnapshotStore::new()),
        })
    }

    /// Sets the [Duration] between polls made by [`Watcher::run`].
    ///
    /// Note that a poll that is still running when the next one is due causes
    /// that next one to be skipped, not queued.
    pub fn check_duration(mut self, duration: Duration) -> Self {
        self.check_interval = duration;
        self
    }

    /// Sets the duration in seconds between polls made by [`Watcher::run`].
    pub fn check_duration_secs(mut self, secs: f64) -> Self {
        self.check_interval = Duration::from_secs_f64(secs);
        self
    }

    /// Sets how long a file that can't be opened is retried before it's
    /// reported as unavailable.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Caps the number of counting threads in one cycle.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Replaces how files are opened for counting. Every attempt of the retry
    /// loop goes through `open`.
    pub fn opener<O>(mut self, open: O) -> Self
    where
        O: Fn(&Path) -> io::Result<File> + Send + Sync + 'static,
    {
        self.opener = Box::new(open);
        self
    }

    /// Specifies whether [`Watcher::run`] reports the files already present
    /// when it starts.
    pub fn report_baseline(mut self, report: bool) -> Self {
        self.report_baseline = report;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn state(&self) -> PollState {
        PollState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of files currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock_store().len()
    }

    /// Runs one poll cycle, folding every failure into the report.
    ///
    /// A request made while another cycle is running yields an empty report.
    pub fn poll(&self) -> PollReport {
        match self.try_poll() {
            Ok(report) => report,
            Err(WatchError::Busy) => {
                debug!(
                    "poll of {} dropped: previous cycle still running",
                    self.directory.display()
                );
                PollReport::default()
            }
            Err(e) => {
                warn!("{e}");
                PollReport::from_error(&e)
            }
        }
    }

    /// Runs one poll cycle.
    ///
    /// Fails with [`WatchError::Busy`] if a cycle is already in flight and
    /// with [`WatchError::DirectoryUnavailable`] if the directory can't be
    /// listed; neither touches the snapshot. Per-file failures don't fail
    /// the cycle, they become [`ReportLine::Error`] entries.
    pub fn try_poll(&self) -> Result<PollReport> {
        let guard = CycleGuard::begin(&self.state)?;

        let Listing { files, errors } = self.list()?;

        guard.advance(PollState::Dispatching);
        let classified = classify(&files, &mut self.lock_store());

        let jobs = classified
            .iter()
            .enumerate()
            .filter_map(|(index, c)| match c {
                Classification::New { path, .. } | Classification::Modified { path, .. } => {
                    Some(CountJob {
                        index,
                        path: path.clone(),
                    })
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        let dispatched = jobs.len();

        guard.advance(PollState::AwaitingCounts);
        let mut counts = count_all(jobs, &*self.opener, self.retry, self.max_workers)
            .into_iter()
            .map(|(job, result)| (job.index, result))
            .collect::<HashMap<_, _>>();

        guard.advance(PollState::Reconciling);
        let mut store = self.lock_store();
        let mut lines = errors
            .iter()
            .map(|e| ReportLine::Error(e.to_string()))
            .collect::<Vec<_>>();

        for (index, classification) in classified.into_iter().enumerate() {
            match classification {
                Classification::Unchanged { .. } => {}
                Classification::Deleted { key, counted: false, .. } => {
                    store.remove(&key);
                }
                Classification::Deleted {
                    key, display_name, ..
                } => {
                    store.remove(&key);
                    lines.push(ReportLine::Change {
                        status: FileStatus::Deleted,
                        name: display_name,
                        old_count: 0,
                        new_count: 0,
                    });
                }
                Classification::New {
                    key,
                    path,
                    display_name,
                } => lines.extend(Self::reconcile(
                    &mut store,
                    &key,
                    &path,
                    display_name,
                    None,
                    counts.remove(&index),
                )),
                Classification::Modified {
                    key,
                    path,
                    display_name,
                    old_count,
                } => lines.extend(Self::reconcile(
                    &mut store,
                    &key,
                    &path,
                    display_name,
                    Some(old_count),
                    counts.remove(&index),
                )),
            }
        }

        drop(store);
        drop(guard);

        info!(
            "polled {}: {} listed, {} counted, {} reported",
            self.directory.display(),
            files.len(),
            dispatched,
            lines.len()
        );

        Ok(PollReport { lines, dispatched })
    }

    /// Applies one finished count to the snapshot and produces its line.
    ///
    /// A failed count leaves the record's line count alone and keeps it
    /// flagged, so the next cycle counts it again.
    fn reconcile(
        store: &mut SnapshotStore,
        key: &FileKey,
        path: &Path,
        display_name: String,
        old_count: Option<u64>,
        result: Option<Result<u64>>,
    ) -> Option<ReportLine> {
        let Some(result) = result else {
            warn!("no count came back for {}", path.display());
            return None;
        };

        let new_count = match result {
            Ok(n) => n,
            Err(e) => {
                warn!("{} not counted this cycle: {e}", path.display());
                return Some(ReportLine::Error(e.to_string()));
            }
        };

        if let Some(record) = store.lookup_mut(key) {
            record.last_line_count = Some(new_count);
            record.needs_recount = false;
        }

        Some(match old_count {
            None => ReportLine::Change {
                status: FileStatus::New,
                name: display_name,
                old_count: 0,
                new_count,
            },
            Some(old_count) => ReportLine::Change {
                status: FileStatus::Existing,
                name: display_name,
                old_count,
                new_count,
            },
        })
    }

    /// Lists the regular files directly inside the directory whose names match
    /// the pattern, sorted by name.
    fn list(&self) -> Result<Listing> {
        let unavailable = || WatchError::DirectoryUnavailable(self.directory.clone());

        if !self.directory.is_dir() {
            return Err(unavailable());
        }

        let entries = fs::read_dir(&self.directory).map_err(|e| {
            debug!("read_dir {}: {e}", self.directory.display());
            unavailable()
        })?;

        let mut files = Vec::new();
        let mut errors = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    errors.push(WatchError::Io {
                        path: self.directory.clone(),
                        source,
                    });
                    continue;
                }
            };

            let name = entry.file_name();
            if !self
                .matcher
                .matches_with(&name.to_string_lossy(), MATCH_OPTIONS)
            {
                continue;
            }

            let path = entry.path();
            match crate::modification_time(&path) {
                Ok(Some(modified)) => files.push(ListedFile::new(path, Some(modified))),
                Ok(None) => {} // not a regular file
                Err(source) => {
                    // Couldn't get metadata->modified time; keep the file so it
                    // isn't mistaken for deleted.
                    files.push(ListedFile::new(path.clone(), None));
                    errors.push(WatchError::Io { path, source });
                }
            }
        }

        files.sort_by(|a, b| a.display_name.cmp(&b.display_name));

        // Names differing only in case share a key; track the first of them.
        let mut kept = HashMap::<FileKey, PathBuf>::new();
        let mut unique = Vec::with_capacity(files.len());
        for file in files {
            match kept.get(&file.key) {
                Some(first) => errors.push(WatchError::NameCollision {
                    path: file.path,
                    kept: first.clone(),
                }),
                None => {
                    kept.insert(file.key.clone(), file.path.clone());
                    unique.push(file);
                }
            }
        }

        Ok(Listing {
            files: unique,
            errors,
        })
    }

    fn lock_store(&self) -> MutexGuard<'_, SnapshotStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Polls until `condition` is met, handing each non-empty report to `sink`.
    ///
    /// The first poll runs inline to record what's already there. After that a
    /// poll is started on its own thread every check interval, so a cycle that
    /// runs long makes the next requests get dropped instead of piling up.
    /// Returns once the condition holds and every started poll has finished.
    pub fn run<S>(self: Arc<Self>, condition: StopCondition, sink: S)
    where
        S: Fn(&PollReport) + Send + Sync + 'static,
    {
        let sink = Arc::new(sink);
        let start_time = Instant::now();

        let baseline = self.poll();
        if self.report_baseline && !baseline.is_empty() {
            sink(&baseline);
        }

        let mut requests = 1usize;
        let mut in_flight = Vec::<thread::JoinHandle<()>>::new();

        loop {
            match condition {
                StopCondition::Once => break,
                StopCondition::Polls(n) if requests >= n => {
                    info!("Watching halted: {n} polls requested.");
                    break;
                }
                StopCondition::Elapsed(d) if start_time.elapsed() >= d => {
                    info!("Watching halted: {d:?} elapsed since watching started.");
                    break;
                }
                _ => {}
            }

            thread::sleep(self.check_interval);
            requests += 1;

            let watcher = Arc::clone(&self);
            let sink = Arc::clone(&sink);
            let spawned = thread::Builder::new()
                .name(format!("poll-{requests}"))
                .spawn(move || {
                    let report = watcher.poll();
                    if !report.is_empty() {
                        sink(&report);
                    }
                });

            match spawned {
                Ok(handle) => in_flight.push(handle),
                Err(e) => warn!("couldn't start poll {requests}: {e}"),
            }

            in_flight.retain(|handle| !handle.is_finished());
        }

        for handle in in_flight {
            handle.join().ok();
        }
    }
}
