// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Shared path containment for the built-in filesystem tools: every
//! read/write is resolved relative to a configured working-directory root
//! and rejected if it would escape that root.

use std::path::{Path, PathBuf};

/// Resolve `requested` against `root`, rejecting any path that would land
/// outside `root` once symlinks and `..` components are resolved.
///
/// `requested` may be absolute or relative; a relative path is joined to
/// `root` first. The existing-ancestor directory is canonicalized (so a
/// not-yet-created file can still be validated) and the result re-joined
/// with the remaining, not-yet-existing tail.
pub fn resolve_within(root: &Path, requested: &str) -> Result<PathBuf, String> {
    let candidate = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        root.join(requested)
    };

    let root_real = root
        .canonicalize()
        .map_err(|e| format!("working directory root is invalid: {e}"))?;

    let (existing_ancestor, tail) = split_at_existing_ancestor(&candidate);
    let ancestor_real = existing_ancestor
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", existing_ancestor.display()))?;

    if !ancestor_real.starts_with(&root_real) {
        return Err(format!(
            "path {:?} escapes the working directory root {:?}",
            requested,
            root.display()
        ));
    }

    Ok(match tail {
        Some(t) => ancestor_real.join(t),
        None => ancestor_real,
    })
}

/// Walk up `path` until an ancestor that exists on disk is found, returning
/// that ancestor plus the remaining path components as a single `PathBuf`
/// tail (or `None` if `path` itself exists).
fn split_at_existing_ancestor(path: &Path) -> (PathBuf, Option<PathBuf>) {
    if path.exists() {
        return (path.to_path_buf(), None);
    }
    let mut tail_parts: Vec<std::ffi::OsString> = Vec::new();
    let mut cur = path.to_path_buf();
    loop {
        let file_name = match cur.file_name() {
            Some(n) => n.to_os_string(),
            None => break, // reached root without finding an existing ancestor
        };
        tail_parts.push(file_name);
        cur.pop();
        if cur.exists() || cur.as_os_str().is_empty() {
            break;
        }
    }
    tail_parts.reverse();
    let tail: PathBuf = tail_parts.into_iter().collect();
    (cur, if tail.as_os_str().is_empty() { None } else { Some(tail) })
}
