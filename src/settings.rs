use std::path::{Path, PathBuf};

/// Pattern used when none is given.
pub const DEFAULT_PATTERN: &str = "*.txt";

/// Resolves the directory argument.
///
/// Empty means the current directory. A bare name, with no path separator and
/// no drive designator, is taken relative to `cwd`. Anything else (absolute,
/// nested relative or UNC) is used as given.
pub fn resolve_directory(directory: &str, cwd: &Path) -> PathBuf {
    if directory.is_empty() {
        return cwd.to_path_buf();
    }

    let bare = !directory.contains(&['/', '\\', ':'][..]);
    if bare {
        cwd.join(directory)
    } else {
        PathBuf::from(directory)
    }
}

/// Turns the pattern argument into a glob.
///
/// Empty means `*.txt`; a pattern without a `.` gets one prepended, then a
/// pattern without a `*` gets one prepended. So `txt`, `.txt` and `*.txt` are
/// all the same glob.
pub fn normalize_pattern(pattern: &str) -> String {
    if pattern.is_empty() {
        return DEFAULT_PATTERN.to_string();
    }

    let mut pattern = pattern.to_string();
    if !pattern.contains('.') {
        pattern.insert(0, '.');
    }
    if !pattern.contains('*') {
        pattern.insert(0, '*');
    }

    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_become_globs() {
        assert_eq!("*.txt", normalize_pattern(""));
        assert_eq!("*.txt", normalize_pattern("txt"));
        assert_eq!("*.txt", normalize_pattern(".txt"));
        assert_eq!("*.txt", normalize_pattern("*.txt"));
        assert_eq!("*.csv", normalize_pattern("*.csv"));
        assert_eq!("*log.txt", normalize_pattern("log.txt"));
        assert_eq!("data*.log", normalize_pattern("data*.log"));
    }

    #[test]
    fn directories_resolve_against_cwd() {
        let cwd = Path::new("/home/koala");

        assert_eq!(PathBuf::from("/home/koala"), resolve_directory("", cwd));
        assert_eq!(
            PathBuf::from("/home/koala/files"),
            resolve_directory("files", cwd)
        );
        assert_eq!(PathBuf::from("/var/data"), resolve_directory("/var/data", cwd));
        assert_eq!(
            PathBuf::from(r"\\server\share"),
            resolve_directory(r"\\server\share", cwd)
        );
        assert_eq!(PathBuf::from(r"C:\data"), resolve_directory(r"C:\data", cwd));
    }
}
