/// How a file is reported for a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// First time the file has been counted.
    New,
    /// The file was counted before and its modification time moved.
    Existing,
    /// The file disappeared from the directory listing.
    Deleted,
}

/// Renders one report line.
///
/// * `New` → `"<name> <new>"`
/// * `Existing` → `"<name> <delta>"`, with a `+` only when the delta is positive
/// * `Deleted` → `"<name>"`
pub fn format_result(status: FileStatus, name: &str, old_count: u64, new_count: u64) -> String {
    match status {
        FileStatus::New => format!("{name} {new_count}"),
        FileStatus::Existing => {
            let delta = i128::from(new_count) - i128::from(old_count);
            let sign = if delta > 0 { "+" } else { "" };
            format!("{name} {sign}{delta}")
        }
        FileStatus::Deleted => name.to_string(),
    }
}
