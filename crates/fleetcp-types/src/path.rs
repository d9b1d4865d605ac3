//! Path translation between POSIX, Windows, and Cygwin-style forms
//!
//! Remote paths are plain strings: an engine running on a POSIX control
//! host routinely handles `C:\Users\ops` spellings that `PathBuf` would
//! mangle. Every function here is total, pure, and independent of the
//! local filesystem.
//!
//! Conversions covered:
//!
//! - Windows absolute → `/cygdrive/<drive>/...` for POSIX tools (rsync over
//!   SSH) running against Windows hosts, and back.
//! - Shell normalization: the separator style a native shell on the host
//!   expects, including the bare drive root edge case (`C:` → `C:/`).
//! - Candidate spellings for Windows SFTP servers, which disagree on
//!   whether they want `C:/...`, `/C:/...`, or raw backslashes.

use crate::types::OsKind;

/// Split `C:`-style prefixes: returns (drive letter, rest) for an absolute
/// Windows path, with the rest free of its leading separator.
fn split_drive(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    let rest = &path[2..];
    match rest.chars().next() {
        None => Some((drive, "")),
        Some('/') | Some('\\') => Some((drive, &rest[1..])),
        Some(_) => None,
    }
}

/// Whether the string is an absolute Windows path (`C:`, `C:\x`, `C:/x`)
pub fn is_windows_absolute(path: &str) -> bool {
    split_drive(path).is_some()
}

/// Convert a path to the form a POSIX copy tool on the given host expects.
///
/// Windows absolute paths become `/cygdrive/<drive>/...`; everything else
/// (POSIX paths, UNC `//server/...` forms) passes through unchanged.
pub fn to_remote_tool_path(path: &str, os: OsKind) -> String {
    if os.is_windows() {
        if let Some((drive, rest)) = split_drive(path) {
            let rest = rest.replace('\\', "/");
            return if rest.is_empty() {
                format!("/cygdrive/{}", drive.to_ascii_lowercase())
            } else {
                format!("/cygdrive/{}/{}", drive.to_ascii_lowercase(), rest)
            };
        }
    }
    path.to_string()
}

/// Inverse of [`to_remote_tool_path`]: `/cygdrive/c/...` back to `C:/...`.
/// Non-cygdrive paths pass through unchanged.
pub fn from_remote_tool_path(path: &str) -> String {
    let Some(rest) = path.strip_prefix("/cygdrive/") else {
        return path.to_string();
    };
    let mut chars = rest.chars();
    let Some(drive) = chars.next() else {
        return path.to_string();
    };
    if !drive.is_ascii_alphabetic() {
        return path.to_string();
    }
    match chars.next() {
        None => format!("{}:/", drive.to_ascii_uppercase()),
        Some('/') => {
            let tail: String = chars.collect();
            if tail.is_empty() {
                format!("{}:/", drive.to_ascii_uppercase())
            } else {
                format!("{}:/{}", drive.to_ascii_uppercase(), tail)
            }
        }
        Some(_) => path.to_string(),
    }
}

/// Normalize a Windows path to forward-slash form: strips a stray leading
/// `/` in front of the drive (an SFTP artifact), maps `\` to `/`, and
/// gives a bare drive root its trailing separator. UNC `//server/...`
/// paths are left untouched.
pub fn normalize_windows_path(path: &str) -> String {
    if path.starts_with("//") || path.starts_with("\\\\") {
        return path.to_string();
    }
    let trimmed = match path.strip_prefix('/') {
        Some(rest) if is_windows_absolute(&rest.replace('\\', "/")) => rest,
        _ => path,
    };
    let forward = trimmed.replace('\\', "/");
    match split_drive(&forward) {
        Some((drive, "")) => format!("{}:/", drive.to_ascii_uppercase()),
        Some((drive, rest)) => format!("{}:/{}", drive.to_ascii_uppercase(), rest),
        None => forward,
    }
}

/// Produce the separator form a native shell on the host expects:
/// backslashes for Windows `cmd`/PowerShell, forward slashes otherwise.
pub fn normalize_for_shell(path: &str, os: OsKind) -> String {
    match os {
        OsKind::Windows => {
            let normalized = normalize_windows_path(path);
            if normalized.starts_with("//") {
                normalized
            } else {
                normalized.replace('/', "\\")
            }
        }
        OsKind::Posix => path.replace('\\', "/"),
    }
}

/// Ordered path spellings to try against a Windows SFTP server.
///
/// Servers differ on how they root drive paths, so callers try each in
/// order until one succeeds; every call is independent and idempotent.
/// Non-Windows paths yield themselves as the only candidate.
pub fn candidate_paths(path: &str) -> Vec<String> {
    let normalized = normalize_windows_path(path);
    if !is_windows_absolute(&normalized) {
        return vec![path.to_string()];
    }
    let mut candidates = vec![
        normalized.clone(),
        format!("/{}", normalized),
        normalized.replace('/', "\\"),
    ];
    candidates.dedup();
    candidates
}

/// Parent directory of a path under the host's own conventions.
///
/// A parent that collapses to a bare drive keeps its root separator, so
/// the result is always usable as a destination or listing path.
pub fn parent_dir(path: &str, os: OsKind) -> String {
    let (normalized, sep) = match os {
        OsKind::Windows => (normalize_windows_path(path), '/'),
        OsKind::Posix => (path.replace('\\', "/"), '/'),
    };
    let trimmed = if normalized.len() > 1 {
        normalized.trim_end_matches(sep)
    } else {
        normalized.as_str()
    };
    let parent = match trimmed.rfind(sep) {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    };
    if os.is_windows() {
        match split_drive(parent) {
            Some((drive, "")) => format!("{}:/", drive.to_ascii_uppercase()),
            _ => parent.to_string(),
        }
    } else {
        parent.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_windows_to_cygwin() {
        assert_eq!(
            to_remote_tool_path("C:\\Users\\ops\\data", OsKind::Windows),
            "/cygdrive/c/Users/ops/data"
        );
        assert_eq!(
            to_remote_tool_path("D:/builds/v1", OsKind::Windows),
            "/cygdrive/d/builds/v1"
        );
        assert_eq!(to_remote_tool_path("C:", OsKind::Windows), "/cygdrive/c");
    }

    #[test]
    fn test_posix_passes_through() {
        assert_eq!(to_remote_tool_path("/srv/data", OsKind::Posix), "/srv/data");
        assert_eq!(to_remote_tool_path("/srv/data", OsKind::Windows), "/srv/data");
    }

    #[test]
    fn test_unc_left_untouched() {
        assert_eq!(
            to_remote_tool_path("//nas01/share/x", OsKind::Windows),
            "//nas01/share/x"
        );
        assert_eq!(normalize_windows_path("//nas01/share/x"), "//nas01/share/x");
    }

    #[test]
    fn test_cygwin_round_trip() {
        for path in ["C:\\Users\\ops\\file.txt", "C:/tmp", "E:\\a b\\c", "C:"] {
            let there = to_remote_tool_path(path, OsKind::Windows);
            assert_eq!(from_remote_tool_path(&there), normalize_windows_path(path));
        }
    }

    #[rstest]
    #[case("/C:/Users/ops", "C:/Users/ops")]
    #[case("C:", "C:/")]
    #[case("c:\\mixed/seps\\here", "C:/mixed/seps/here")]
    #[case("C:/already/clean", "C:/already/clean")]
    #[case("/srv/data", "/srv/data")]
    fn test_normalize_windows_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_windows_path(input), expected);
    }

    proptest! {
        #[test]
        fn prop_cygwin_round_trip(
            drive in proptest::char::range('A', 'Z'),
            segments in proptest::collection::vec("[a-z0-9]{1,8}", 0..4),
        ) {
            let path = if segments.is_empty() {
                format!("{}:", drive)
            } else {
                format!("{}:/{}", drive, segments.join("/"))
            };
            let there = to_remote_tool_path(&path, OsKind::Windows);
            prop_assert!(there.starts_with("/cygdrive/"));
            prop_assert_eq!(from_remote_tool_path(&there), normalize_windows_path(&path));
        }
    }

    #[test]
    fn test_shell_normalization() {
        assert_eq!(
            normalize_for_shell("C:/Users/ops", OsKind::Windows),
            "C:\\Users\\ops"
        );
        assert_eq!(normalize_for_shell("C:", OsKind::Windows), "C:\\");
        assert_eq!(normalize_for_shell("/srv/data", OsKind::Posix), "/srv/data");
    }

    #[test]
    fn test_candidate_paths_order() {
        let candidates = candidate_paths("C:\\Users\\ops");
        assert_eq!(
            candidates,
            vec!["C:/Users/ops", "/C:/Users/ops", "C:\\Users\\ops"]
        );
        assert_eq!(candidate_paths("/srv/data"), vec!["/srv/data"]);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/srv/data/file.txt", OsKind::Posix), "/srv/data");
        assert_eq!(parent_dir("/srv", OsKind::Posix), "/");
        assert_eq!(parent_dir("C:/Users/ops", OsKind::Windows), "C:/Users");
        assert_eq!(parent_dir("C:/Users", OsKind::Windows), "C:/");
        assert_eq!(parent_dir("/srv/data/", OsKind::Posix), "/srv");
    }
}
