//! Validation and classification of candidate paths.
//!
//! Turns raw strings from a host (drag-and-drop, CLI arguments) into a
//! deduplicated [`PathBatch`]. Only `stat`-style filesystem reads happen here.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::path_rules::{dedup_key, has_parent_traversal, is_blank, strip_verbatim_prefix};
use crate::core::types::{PathBatch, PathEntry, PathKind, RejectReason};
use crate::sink::LogSink;

/// Classify every input and collect accepted paths into a batch.
///
/// Rejected inputs are logged and recorded in [`PathBatch::rejected`]; they never
/// abort the batch.
pub fn classify<S: AsRef<str>>(paths: &[S], sink: &dyn LogSink) -> PathBatch {
    let mut batch = PathBatch::default();
    let mut seen = HashSet::new();

    for raw in paths {
        let raw = raw.as_ref();
        let entry = classify_entry(raw);
        match (entry.kind, entry.resolved) {
            (PathKind::File | PathKind::Directory, Some(resolved)) => {
                if !seen.insert(dedup_key(&resolved)) {
                    debug!(path = %resolved.display(), "duplicate path skipped");
                    sink.log(&format!("Duplicate path skipped: {raw}"));
                    batch.count_duplicate();
                    continue;
                }
                if entry.kind == PathKind::File {
                    batch.push_file(resolved);
                } else {
                    batch.push_directory(resolved);
                }
            }
            _ => {
                let reason = entry
                    .reason
                    .clone()
                    .unwrap_or(RejectReason::UnsupportedType);
                sink.log(&format!("Invalid path rejected: {raw} ({reason})"));
                batch.push_rejected(PathEntry::rejected(raw, reason));
            }
        }
    }

    debug!(
        files = batch.files().len(),
        directories = batch.directories().len(),
        rejected = batch.rejected().len(),
        duplicates = batch.duplicates(),
        "classified paths"
    );
    batch
}

/// Classify a single input. Symlinks are followed; the target decides the kind.
pub fn classify_entry(raw: &str) -> PathEntry {
    if is_blank(raw) {
        return PathEntry::rejected(raw, RejectReason::Blank);
    }
    let candidate = Path::new(raw);
    if has_parent_traversal(candidate) {
        return PathEntry::rejected(raw, RejectReason::ParentTraversal);
    }

    let canonical = match canonicalize(candidate) {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return PathEntry::rejected(raw, RejectReason::NotFound);
        }
        Err(err) => return PathEntry::rejected(raw, RejectReason::Canonicalize(err.to_string())),
    };
    if canonical.to_str().is_none() {
        return PathEntry::rejected(raw, RejectReason::NotUnicode);
    }
    if !canonical.is_absolute() {
        return PathEntry::rejected(raw, RejectReason::NotAbsolute);
    }
    if has_parent_traversal(&canonical) {
        return PathEntry::rejected(raw, RejectReason::ParentTraversal);
    }

    match fs::metadata(&canonical) {
        Ok(meta) if meta.is_file() => PathEntry::accepted(raw, canonical, PathKind::File),
        Ok(meta) if meta.is_dir() => PathEntry::accepted(raw, canonical, PathKind::Directory),
        Ok(_) => PathEntry::rejected(raw, RejectReason::UnsupportedType),
        Err(_) => PathEntry::rejected(raw, RejectReason::NotFound),
    }
}

fn canonicalize(path: &Path) -> io::Result<PathBuf> {
    let canonical = fs::canonicalize(path)?;
    Ok(match canonical.to_str() {
        Some(text) => PathBuf::from(strip_verbatim_prefix(text)),
        None => canonical,
    })
}
