use std::path::{Component, Path, PathBuf};

/// Characters removed from every generated folder or file name.
const BANNED_CHARS: &[char] = &[
    '[', '^', '\\', '~', '!', '@', '#', '$', '%', '&', '(', ')', '<', '>', '{', '}', ']', '*',
];

/// Separators inside a single tag value that become `_`.
const VALUE_SEPARATORS: &[char] = &['^', '.', ' ', '-', '/'];

/// Normalizes one resolved tag value before it joins a name.
pub fn sanitize_value(value: &str) -> String {
    let joined: String = value
        .chars()
        .map(|ch| if VALUE_SEPARATORS.contains(&ch) { '_' } else { ch })
        .collect();
    sanitize_string(&joined)
}

/// Strips banned characters. Idempotent.
pub fn sanitize_string(value: &str) -> String {
    value.chars().filter(|ch| !is_banned(*ch)).collect()
}

/// Sanitizes a name that must stay a single path segment.
pub fn sanitize_file_name(value: &str) -> String {
    sanitize_string(value)
        .chars()
        .map(|ch| if ch == '/' || ch.is_control() { '_' } else { ch })
        .collect()
}

/// Normalizes a directory path: backslashes become separators, and empty or
/// `.` segments disappear, so `a//b/./c/` and `a\b\c` both become `a/b/c`.
pub fn sanitize_dir(path: &Path) -> PathBuf {
    let unified = path.to_string_lossy().replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

pub fn is_banned(ch: char) -> bool {
    BANNED_CHARS.contains(&ch)
}

/// Number of normal segments in `path`, used for depth bookkeeping.
pub fn segment_count(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_separators_become_underscores() {
        assert_eq!(sanitize_value("T1 MPRAGE"), "T1_MPRAGE");
        assert_eq!(sanitize_value("Doe^Jane"), "Doe_Jane");
        assert_eq!(sanitize_value("ep2d-diff.b1000"), "ep2d_diff_b1000");
        assert_eq!(sanitize_value("T1/T2"), "T1_T2");
    }

    #[test]
    fn banned_chars_are_stripped() {
        assert_eq!(sanitize_string("[a]{b}(c)<d>*e!f@g#h$i%j&k~l\\m"), "abcdefghijklm");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["T1 MPRAGE (sag)", "a^b^c", "**weird** name {x}", "plain"] {
            let once = sanitize_value(input);
            assert_eq!(sanitize_string(&once), once);
            assert!(!once.chars().any(is_banned));
        }
    }

    #[test]
    fn sanitize_dir_collapses_duplicate_separators() {
        assert_eq!(sanitize_dir(Path::new("/data//study/./series/")), PathBuf::from("/data/study/series"));
        assert_eq!(sanitize_dir(Path::new("data\\study")), PathBuf::from("data/study"));
        assert_eq!(sanitize_dir(Path::new("")), PathBuf::from("."));
    }

    #[test]
    fn file_names_never_contain_separators() {
        assert_eq!(sanitize_file_name("a/b\\c"), "a_bc");
    }

    #[test]
    fn segment_count_ignores_root_and_trailing_separator() {
        assert_eq!(segment_count(Path::new("/data/study/")), 2);
        assert_eq!(segment_count(Path::new("data")), 1);
    }
}
