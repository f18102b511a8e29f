//! Pure path checks used by intake.

use std::path::{Component, Path};

pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}

/// True if any component of `path` is `..`.
///
/// Component-based so names such as `a..b` are not mistaken for traversal.
pub fn has_parent_traversal(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::ParentDir))
}

/// Key under which two canonical paths count as the same entry.
///
/// Case-insensitive so hosts with case-insensitive filesystems never see
/// `Report.docx` and `report.DOCX` as two inputs.
pub fn dedup_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Strip the `\\?\` prefix that Windows canonicalization adds to drive paths.
///
/// UNC verbatim paths (`\\?\UNC\...`) are left untouched.
pub fn strip_verbatim_prefix(path: &str) -> &str {
    match path.strip_prefix(r"\\?\") {
        Some(rest) if is_drive_path(rest) => rest,
        _ => path,
    }
}

fn is_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_covers_whitespace() {
        assert!(is_blank(""));
        assert!(is_blank("  \t\n"));
        assert!(!is_blank(" a "));
    }

    #[test]
    fn traversal_detects_parent_segments() {
        assert!(has_parent_traversal(Path::new("../../etc")));
        assert!(has_parent_traversal(Path::new("docs/../secrets")));
        assert!(!has_parent_traversal(Path::new("docs/a..b/file.txt")));
        assert!(!has_parent_traversal(Path::new("./docs")));
    }

    #[test]
    fn dedup_key_folds_case() {
        assert_eq!(
            dedup_key(Path::new("/Data/Report.DOCX")),
            dedup_key(Path::new("/data/report.docx"))
        );
    }

    #[test]
    fn verbatim_prefix_stripped_only_for_drives() {
        assert_eq!(strip_verbatim_prefix(r"\\?\C:\Users\me"), r"C:\Users\me");
        assert_eq!(
            strip_verbatim_prefix(r"\\?\UNC\server\share"),
            r"\\?\UNC\server\share"
        );
        assert_eq!(strip_verbatim_prefix("/home/me"), "/home/me");
    }
}
