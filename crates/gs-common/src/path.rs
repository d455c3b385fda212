//! Resource path helpers
//!
//! Paths always start with `/` and never end with `/`, except the root.

pub const ROOT: &str = "/";

/// Normalize a declared path: prefix `/`, drop trailing and repeated separators.
///
/// Returns `None` for an empty declaration.
pub fn normalize(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let segments: Vec<&str> = segments(raw).collect();
    if segments.is_empty() {
        return Some(ROOT.to_string());
    }
    Some(format!("/{}", segments.join("/")))
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split a normalized non-root path into its parent path and last segment
pub fn split_last(path: &str) -> Option<(&str, &str)> {
    if path == ROOT {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Every proper ancestor of a normalized path, nearest first, root excluded
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some((parent, _)) = split_last(current) {
        if parent == ROOT {
            break;
        }
        out.push(parent.to_string());
        current = parent;
    }
    out
}

pub fn join(parent: &str, segment: &str) -> String {
    if parent == ROOT {
        format!("/{}", segment)
    } else {
        format!("{}/{}", parent, segment)
    }
}
