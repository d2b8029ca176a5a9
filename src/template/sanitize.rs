//! Filesystem-safe values and path segments.
//!
//! Two levels of cleanup:
//!
//! - [`sanitize_value`] runs on every substituted placeholder value before it
//!   joins the rendered string, so metadata can never introduce a path
//!   separator or a character Windows/macOS would reject.
//! - [`clean_dir_segment`] / [`clean_file_name`] run on the rendered string
//!   once it is split into segments, removing the dangling separators left
//!   behind by empty placeholders.

use crate::naming::SEPARATORS;

const ILLEGAL: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Strip separators and illegal characters from a value and replace
/// whitespace runs with `whitespace_sub`.
pub fn sanitize_value(value: &str, whitespace_sub: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars() {
        if ILLEGAL.contains(&c) || (c.is_control() && !c.is_whitespace()) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push_str(whitespace_sub);
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Clean one directory segment. Returns `None` when nothing usable remains.
pub fn clean_dir_segment(segment: &str) -> Option<String> {
    let cleaned = segment.trim_matches(SEPARATORS).trim_end_matches('.');
    match cleaned {
        "" | "." | ".." => None,
        s => Some(s.to_string()),
    }
}

/// Clean the filename segment.
///
/// Leading dots survive so the caller can detect a name that would render
/// as a hidden file.
pub fn clean_file_name(name: &str) -> String {
    let leading_dots = name.len() - name.trim_start_matches('.').len();
    let body = name[leading_dots..]
        .trim_matches(|c| SEPARATORS.contains(&c) && c != '.')
        .trim_end_matches('.');
    format!("{}{}", &name[..leading_dots], body)
}
