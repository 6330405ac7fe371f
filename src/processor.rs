use std::{
    collections::VecDeque,
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::{mpsc, Mutex},
    thread,
};

use tracing::{debug, warn};

use crate::{
    counter::{count_lines_with, RetryPolicy},
    error::{Result, WatchError},
};

/// How counting workers open files. Plain [`File::open`] unless overridden.
pub(crate) type Opener = dyn Fn(&Path) -> io::Result<File> + Send + Sync;

/// A file to count, tagged with its position in the cycle's discovery order.
#[derive(Debug, Clone)]
pub(crate) struct CountJob {
    pub index: usize,
    pub path: PathBuf,
}

/// Handles counting within one worker thread.
///
/// Processing is handled in a loop that is conceptually:
/// ```text
/// while `queue` has a job:
///    acquire lock on `queue`
///    remove job from queue
///    drop lock
///    count lines in the job's file
///    send (slot, result) back to the orchestrator
/// ```
/// Workers never touch the snapshot; the orchestrator applies their results.
struct Processor<'a, 'j> {
    /// The jobs still waiting for a worker, each with its position in the
    /// job list
    queue: &'a Mutex<VecDeque<(usize, &'j CountJob)>>,

    /// Where results go, tagged with the job's position
    results: mpsc::Sender<(usize, Result<u64>)>,

    opener: &'a Opener,

    policy: RetryPolicy,
}

impl Processor<'_, '_> {
    fn process(self) {
        loop {
            // Hold the lock only long enough to take one job.
            let (slot, job) = {
                let Ok(mut queue) = self.queue.lock() else {
                    return;
                };

                match queue.pop_front() {
                    Some(next) => next,
                    None => return,
                }
            };

            let result = count_lines_with(&job.path, &self.policy, |p| (self.opener)(p));
            if let Err(e) = &result {
                debug!("counting {} failed: {e}", job.path.display());
            }

            if self.results.send((slot, result)).is_err() {
                // Receiver is gone; nobody wants the rest either.
                return;
            }
        }
    }
}

/// Counts every job concurrently on up to `max_workers` threads and blocks
/// until all of them are done.
///
/// Results come back in the same order as `jobs`, whatever order the workers
/// finished in.
pub(crate) fn count_all(
    jobs: Vec<CountJob>,
    opener: &Opener,
    policy: RetryPolicy,
    max_workers: usize,
) -> Vec<(CountJob, Result<u64>)> {
    if jobs.is_empty() {
        return Vec::new();
    }

    let num_workers = jobs.len().min(max_workers.max(1));
    let queue = Mutex::new(jobs.iter().enumerate().collect::<VecDeque<_>>());
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for n in 0..num_workers {
            let processor = Processor {
                queue: &queue,
                results: tx.clone(),
                opener,
                policy,
            };

            let spawned = thread::Builder::new()
                .name(format!("line-counter-{n}"))
                .spawn_scoped(scope, move || processor.process());

            if let Err(e) = spawned {
                // The workers that did start drain the queue.
                warn!("couldn't start counting worker {n}: {e}");
            }
        }
    });
    drop(tx);
    drop(queue);

    let mut slots: Vec<Option<Result<u64>>> = jobs.iter().map(|_| None).collect();
    for (slot, result) in rx {
        if let Some(entry) = slots.get_mut(slot) {
            *entry = Some(result);
        }
    }

    jobs.into_iter()
        .zip(slots)
        .map(|(job, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(WatchError::Io {
                    path: job.path.clone(),
                    source: std::io::Error::other("no counting worker could be started"),
                })
            });
            (job, result)
        })
        .collect()
}
