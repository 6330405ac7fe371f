use std::{collections::HashSet, path::PathBuf, time::SystemTime};

use tracing::debug;

use crate::snapshot::{FileKey, SnapshotStore, TrackedFile};

/// One file from a directory listing.
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub path: PathBuf,
    pub key: FileKey,
    pub display_name: String,

    /// `None` when the file's metadata couldn't be read. Such a file still
    /// counts as present, but its record is left alone for this cycle.
    pub modified: Option<SystemTime>,
}

impl ListedFile {
    pub fn new(path: PathBuf, modified: Option<SystemTime>) -> Self {
        let key = FileKey::from_path(&path);
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        ListedFile {
            path,
            key,
            display_name,
            modified,
        }
    }
}

/// What a poll cycle decided about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Never counted before; needs counting.
    New {
        key: FileKey,
        path: PathBuf,
        display_name: String,
    },

    /// Counted before and changed since; needs counting. `old_count` is the
    /// last successful count, used for the delta.
    Modified {
        key: FileKey,
        path: PathBuf,
        display_name: String,
        old_count: u64,
    },

    /// Nothing to do.
    Unchanged { key: FileKey },

    /// Tracked but absent from the listing. `counted` is false when no count
    /// of the file ever succeeded, so it was never reported in the first place.
    Deleted {
        key: FileKey,
        display_name: String,
        counted: bool,
    },
}

impl Classification {
    /// Whether this file has to be handed to a line counter.
    pub fn needs_count(&self) -> bool {
        matches!(
            self,
            Classification::New { .. } | Classification::Modified { .. }
        )
    }
}

/// Compares a listing against the snapshot.
///
/// New files are inserted into `store` immediately and modified files get
/// their new modification time right away, so a later cycle racing a slow
/// count doesn't see the same change twice. Line counts are never touched
/// here. Deleted records are reported but not removed; that happens once the
/// cycle's counts are in.
///
/// Output order is the listing order followed by deleted files in store order.
pub fn classify(listing: &[ListedFile], store: &mut SnapshotStore) -> Vec<Classification> {
    let mut result = Vec::with_capacity(listing.len());
    let mut present = HashSet::with_capacity(listing.len());

    for file in listing {
        present.insert(file.key.clone());

        // Metadata unavailable: keep whatever we knew.
        let Some(modified) = file.modified else {
            continue;
        };

        let Some(record) = store.lookup_mut(&file.key) else {
            debug!("new file {}", file.path.display());
            store.upsert(
                file.key.clone(),
                TrackedFile::first_seen(file.display_name.clone(), modified),
            );
            result.push(Classification::New {
                key: file.key.clone(),
                path: file.path.clone(),
                display_name: file.display_name.clone(),
            });
            continue;
        };

        if record.last_modified != modified {
            debug!("modified file {}", file.path.display());
            record.last_modified = modified;
            record.needs_recount = true;
        }

        // The name may have been re-cased on disk.
        record.display_name.clone_from(&file.display_name);

        if !record.needs_recount {
            result.push(Classification::Unchanged {
                key: file.key.clone(),
            });
            continue;
        }

        result.push(match record.last_line_count {
            None => Classification::New {
                key: file.key.clone(),
                path: file.path.clone(),
                display_name: file.display_name.clone(),
            },
            Some(old_count) => Classification::Modified {
                key: file.key.clone(),
                path: file.path.clone(),
                display_name: file.display_name.clone(),
                old_count,
            },
        });
    }

    for (key, record) in store.iter() {
        if !present.contains(key) {
            debug!("deleted file {}", record.display_name);
            result.push(Classification::Deleted {
                key: key.clone(),
                display_name: record.display_name.clone(),
                counted: record.last_line_count.is_some(),
            });
        }
    }

    result
}
