//! Normalized path handling.
//!
//! Every path that reaches the metadata cache is normalized: forward-slash
//! separated, no leading or trailing slash, no `.` or `..` components. The
//! empty string denotes the root directory.

use thiserror::Error;

/// The normalized path of the root directory.
pub const ROOT: &str = "";

/// Returned when a path resolves above the root directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path is outside of the defined root: {0}")]
pub struct PathOutsideRoot(pub String);

/// Normalize a caller-supplied path.
///
/// Backslashes are treated as separators, empty and `.` components are
/// dropped and `..` pops the previous component. A `..` that would climb
/// above the root is an error rather than being clamped.
pub fn normalize(path: &str) -> Result<String, PathOutsideRoot> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(PathOutsideRoot(path.to_owned()));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Returns `true` if `path` is the root directory.
#[must_use]
pub fn is_root(path: &str) -> bool {
    path.is_empty()
}

/// The normalized parent of `path`. The parent of a top-level entry, and of
/// the root itself, is the root.
#[must_use]
pub fn dirname(path: &str) -> &str {
    path.rfind('/').map_or(ROOT, |idx| &path[..idx])
}

/// The final component of `path`.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rfind('/').map_or(path, |idx| &path[idx + 1..])
}

/// The extension of the final component, without the dot.
///
/// Dotfiles such as `.gitignore` have no extension.
#[must_use]
pub fn extension(path: &str) -> Option<&str> {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Join a normalized directory and a normalized relative path.
#[must_use]
pub fn join(dir: &str, rest: &str) -> String {
    match (dir.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_owned(),
        (false, true) => dir.to_owned(),
        (false, false) => format!("{dir}/{rest}"),
    }
}

/// Returns `true` if `path` lies strictly beneath `dir`.
///
/// Every non-root path lies beneath the root.
#[must_use]
pub fn is_descendant(dir: &str, path: &str) -> bool {
    if dir.is_empty() {
        return !path.is_empty();
    }
    path.len() > dir.len() + 1 && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Iterate the strict ancestors of `path`, nearest first, ending with the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut current = (!path.is_empty()).then_some(path);
    std::iter::from_fn(move || {
        let parent = dirname(current?);
        current = (!parent.is_empty()).then_some(parent);
        Some(parent)
    })
}

/// Re-root `path` from beneath `from` to beneath `to`.
///
/// `path` must be `from` itself or one of its descendants.
#[must_use]
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_owned();
    }
    let rest = if from.is_empty() {
        path
    } else {
        &path[from.len() + 1..]
    };
    join(to, rest)
}
