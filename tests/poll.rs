use std::{
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, SystemTime},
};

use line_watch::{PollState, ReportLine, RetryPolicy, StopCondition, WatchError, Watcher};
use tempfile::TempDir;

const LINE: &str = "00000000000000000000000000000000";

/// Writes `lines` CRLF-terminated lines and pins the modification time to
/// `stamp`, so rewrites get distinct timestamps whatever the filesystem's
/// resolution.
fn write_lines(path: &Path, lines: usize, stamp: u64) {
    let mut f = File::create(path).unwrap();
    for _ in 0..lines {
        write!(f, "{LINE}\r\n").unwrap();
    }
    f.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + stamp))
        .unwrap();
}

fn append_line(path: &Path, stamp: u64) {
    let mut f = OpenOptions::new().append(true).open(path).unwrap();
    write!(f, "{LINE}\r\n").unwrap();
    f.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + stamp))
        .unwrap();
}

fn watcher(dir: &TempDir) -> Watcher {
    Watcher::with_directory(dir.path(), "*.txt").unwrap()
}

fn file(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

/// A watcher that can't open `name` while `locked` is set, and gives up on it
/// after 50 ms.
fn watcher_with_lock(dir: &TempDir, name: &'static str, locked: &Arc<AtomicBool>) -> Watcher {
    let locked = Arc::clone(locked);
    watcher(dir)
        .retry_policy(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
        .opener(move |path| {
            if locked.load(Ordering::SeqCst) && path.file_name() == Some(OsStr::new(name)) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
            } else {
                File::open(path)
            }
        })
}

fn is_error_about(line: &ReportLine, name: &str) -> bool {
    matches!(line, ReportLine::Error(m) if m.contains(name))
}

#[test]
fn create_grow_shrink_delete() {
    let dir = TempDir::new().unwrap();
    let w = watcher(&dir);
    assert!(w.poll().is_empty());

    let a = file(&dir, "a.txt");
    write_lines(&a, 400, 1);
    assert_eq!(vec!["a.txt 400"], w.poll().to_lines());

    append_line(&a, 2);
    assert_eq!(vec!["a.txt +1"], w.poll().to_lines());

    write_lines(&a, 391, 3);
    assert_eq!(vec!["a.txt -10"], w.poll().to_lines());

    write_lines(&a, 391, 4);
    assert_eq!(vec!["a.txt 0"], w.poll().to_lines());

    fs::remove_file(&a).unwrap();
    assert_eq!(vec!["a.txt"], w.poll().to_lines());
    assert_eq!(0, w.tracked());

    // Gone for good: nothing more to say.
    assert!(w.poll().is_empty());
}

#[test]
fn quiet_directory_gives_empty_reports_without_counting() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 3, 1);
    write_lines(&file(&dir, "b.txt"), 5, 1);

    let w = watcher(&dir);
    let first = w.poll();
    assert_eq!(2, first.dispatched);
    assert_eq!(vec!["a.txt 3", "b.txt 5"], first.to_lines());

    for _ in 0..3 {
        let report = w.poll();
        assert!(report.is_empty());
        assert_eq!(0, report.dispatched);
    }
}

#[test]
fn only_changed_files_are_counted() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 3, 1);
    write_lines(&file(&dir, "b.txt"), 5, 1);

    let w = watcher(&dir);
    w.poll();

    append_line(&file(&dir, "b.txt"), 2);
    let report = w.poll();
    assert_eq!(1, report.dispatched);
    assert_eq!(vec!["b.txt +1"], report.to_lines());
}

#[test]
fn simultaneous_changes_are_attributed_correctly() {
    let dir = TempDir::new().unwrap();
    let w = watcher(&dir).max_workers(4);
    w.poll();

    // Sizes vary widely so the workers finish out of order.
    let sizes = [50_000, 3, 20_000, 0, 7, 100_000, 1, 12];
    for (i, n) in sizes.iter().enumerate() {
        write_lines(&file(&dir, &format!("f{i}.txt")), *n, 1);
    }

    let report = w.poll();
    assert_eq!(sizes.len(), report.dispatched);

    let expected = sizes
        .iter()
        .enumerate()
        .map(|(i, n)| format!("f{i}.txt {n}"))
        .collect::<Vec<_>>();
    assert_eq!(expected, report.to_lines());
}

#[test]
fn deleted_lines_follow_changes() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 1, 1);
    write_lines(&file(&dir, "b.txt"), 1, 1);
    let w = watcher(&dir);
    w.poll();

    fs::remove_file(file(&dir, "a.txt")).unwrap();
    append_line(&file(&dir, "b.txt"), 2);
    write_lines(&file(&dir, "c.txt"), 2, 1);

    assert_eq!(vec!["b.txt +1", "c.txt 2", "a.txt"], w.poll().to_lines());
    assert_eq!(2, w.tracked());
}

#[test]
fn names_are_case_insensitive_and_shown_as_on_disk() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "Report.TXT"), 2, 1);
    write_lines(&file(&dir, "notes.csv"), 2, 1);

    let w = watcher(&dir);
    assert_eq!(vec!["Report.TXT 2"], w.poll().to_lines());
}

#[test]
fn subdirectories_are_not_watched() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(file(&dir, "nested.txt")).unwrap();
    write_lines(&dir.path().join("nested.txt").join("inner.txt"), 4, 1);

    let w = watcher(&dir);
    assert!(w.poll().is_empty());
}

#[test]
fn missing_directory_is_reported_and_recovers() {
    let dir = TempDir::new().unwrap();
    let watched = dir.path().join("later");
    let w = Watcher::with_directory(&watched, "txt").unwrap();

    assert!(matches!(
        w.try_poll(),
        Err(WatchError::DirectoryUnavailable(_))
    ));

    let report = w.poll();
    assert_eq!(1, report.lines.len());
    assert!(matches!(&report.lines[0], ReportLine::Error(m) if m.contains("Can not access")));
    assert_eq!(PollState::Idle, w.state());

    fs::create_dir(&watched).unwrap();
    write_lines(&watched.join("x.txt"), 9, 1);
    assert_eq!(vec!["x.txt 9"], w.poll().to_lines());
}

#[test]
fn empty_pattern_means_txt() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 1, 1);
    write_lines(&file(&dir, "a.log"), 1, 1);

    let w = Watcher::with_directory(dir.path(), "").unwrap();
    assert_eq!("*.txt", w.pattern());
    assert_eq!(vec!["a.txt 1"], w.poll().to_lines());

    let w = Watcher::with_directory(dir.path(), "log").unwrap();
    assert_eq!("*.log", w.pattern());
    assert_eq!(vec!["a.log 1"], w.poll().to_lines());
}

#[test]
fn run_reports_every_cycle_to_the_sink() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 2, 1);

    let w = Arc::new(
        watcher(&dir)
            .check_duration(Duration::from_millis(200))
            .report_baseline(true),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);

    let path = file(&dir, "a.txt");
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        append_line(&path, 2);
    });

    w.run(StopCondition::Polls(3), move |report| {
        sink_seen.lock().unwrap().extend(report.to_lines());
    });
    writer.join().unwrap();

    assert_eq!(vec!["a.txt 2", "a.txt +1"], *seen.lock().unwrap());
}

#[test]
fn baseline_is_silent_by_default() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 2, 1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);

    Arc::new(watcher(&dir)).run(StopCondition::Once, move |report| {
        sink_seen.lock().unwrap().extend(report.to_lines());
    });

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn locked_file_is_reported_alone_and_counted_once_released() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 3, 1);
    write_lines(&file(&dir, "b.txt"), 5, 1);
    write_lines(&file(&dir, "c.txt"), 7, 1);

    let locked = Arc::new(AtomicBool::new(true));
    let w = watcher_with_lock(&dir, "b.txt", &locked);

    let first = w.poll();
    assert_eq!(3, first.dispatched);
    assert_eq!(3, first.lines.len());
    assert_eq!("a.txt 3", first.lines[0].to_string());
    assert!(is_error_about(&first.lines[1], "b.txt"));
    assert!(first.lines[1].to_string().starts_with("Error: Unable to open file"));
    assert_eq!("c.txt 7", first.lines[2].to_string());

    // Nothing changed on disk, but the failed file is tried again.
    let second = w.poll();
    assert_eq!(1, second.dispatched);
    assert!(matches!(&second.lines[..], [line] if is_error_about(line, "b.txt")));

    locked.store(false, Ordering::SeqCst);
    assert_eq!(vec!["b.txt 5"], w.poll().to_lines());
    assert!(w.poll().is_empty());

    // A modification that can't be counted keeps the last good count for the delta.
    locked.store(true, Ordering::SeqCst);
    append_line(&file(&dir, "b.txt"), 2);
    let report = w.poll();
    assert!(matches!(&report.lines[..], [line] if is_error_about(line, "b.txt")));

    locked.store(false, Ordering::SeqCst);
    assert_eq!(vec!["b.txt +1"], w.poll().to_lines());
    assert!(w.poll().is_empty());
}

#[test]
fn file_that_was_never_counted_is_dropped_silently() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "a.txt"), 3, 1);

    let locked = Arc::new(AtomicBool::new(true));
    let w = watcher_with_lock(&dir, "a.txt", &locked);

    let first = w.poll();
    assert!(matches!(&first.lines[..], [line] if is_error_about(line, "a.txt")));
    assert_eq!(1, w.tracked());

    fs::remove_file(file(&dir, "a.txt")).unwrap();
    assert!(w.poll().is_empty());
    assert_eq!(0, w.tracked());
}

#[test]
fn names_differing_only_in_case_track_the_first() {
    let dir = TempDir::new().unwrap();
    write_lines(&file(&dir, "A.txt"), 3, 1);
    write_lines(&file(&dir, "a.txt"), 7, 2);

    if fs::read_dir(dir.path()).unwrap().count() < 2 {
        // Case-insensitive filesystem: there's only one file.
        return;
    }

    let w = watcher(&dir);
    let first = w.poll();
    assert_eq!(1, first.dispatched);
    assert_eq!(2, first.lines.len());
    assert!(is_error_about(&first.lines[0], "differs only in case"));
    assert_eq!("A.txt 3", first.lines[1].to_string());
    assert_eq!(1, w.tracked());

    for _ in 0..3 {
        let report = w.poll();
        assert_eq!(0, report.dispatched);
        assert!(report
            .lines
            .iter()
            .all(|line| matches!(line, ReportLine::Error(_))));
    }
}
