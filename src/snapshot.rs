use std::{
    collections::BTreeMap,
    path::Path,
    time::SystemTime,
};

/// Case-insensitive identity of a watched file.
///
/// Built from the full path, lowercased. Never shown to the user; see
/// [`TrackedFile::display_name`] for that.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileKey(String);

impl FileKey {
    pub fn from_path(path: &Path) -> Self {
        FileKey(path.to_string_lossy().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Last known state of a file that exists in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// File name in its on-disk casing.
    pub display_name: String,

    /// Modification time seen the last time the file was listed.
    pub last_modified: SystemTime,

    /// Line count from the last successful count. `None` until one succeeds.
    pub last_line_count: Option<u64>,

    /// Set when a count has been scheduled but hasn't succeeded yet. A record
    /// with this flag is counted again on the next cycle even if its
    /// modification time hasn't moved.
    pub needs_recount: bool,
}

impl TrackedFile {
    /// A record for a file seen for the first time; its lines are still unknown.
    pub fn first_seen(display_name: String, modified: SystemTime) -> Self {
        TrackedFile {
            display_name,
            last_modified: modified,
            last_line_count: None,
            needs_recount: true,
        }
    }
}

/// In-memory map from [`FileKey`] to [`TrackedFile`].
///
/// Not synchronized; the poll orchestrator is the only writer and only touches
/// it after every counting task of a cycle has finished. Iteration is ordered
/// by key so deleted files are reported deterministically.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    files: BTreeMap<FileKey, TrackedFile>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &FileKey) -> Option<&TrackedFile> {
        self.files.get(key)
    }

    pub fn lookup_mut(&mut self, key: &FileKey) -> Option<&mut TrackedFile> {
        self.files.get_mut(key)
    }

    pub fn upsert(&mut self, key: FileKey, record: TrackedFile) {
        self.files.insert(key, record);
    }

    pub fn remove(&mut self, key: &FileKey) -> Option<TrackedFile> {
        self.files.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FileKey> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileKey, &TrackedFile)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
