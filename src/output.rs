//! CLI output formatting.
//!
//! Output is one line per file as the run progresses, then a summary. The
//! leading word says what happened; paths follow, source first.
//!
//! # Output Format
//!
//! ## Per-file events
//!
//! ```text
//! Processing 3 files
//! moved      /inbox/img_3900.jpg → 2015/06-Jun-California/20150629-163414-img_3900.jpg
//! moved      /inbox/b/img.jpg → 2015/06-Jun/img_1.jpg (renamed)
//! present    /inbox/c/img.jpg = 2015/06-Jun/img.jpg
//! failed     /inbox/broken.jpg: exiftool failed on /inbox/broken.jpg: ...
//! ```
//!
//! ## Run summary
//!
//! ```text
//! Errors
//!     /inbox/broken.jpg: exiftool failed on /inbox/broken.jpg: ...
//!
//! 2 succeeded, 1 skipped, 1 conflicts, 1 errors
//! ```
//!
//! ## Check
//!
//! ```text
//! Corrupted
//!     2015/06-Jun/img.jpg
//!         expected: 5e8ff9bf55ba
//!         actual:   0b3f43c7a1d2
//!
//! 41 ok, 1 corrupted, 0 unreadable
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::organize::OrganizeEvent;
use crate::store::CheckReport;
use crate::summary::{Action, FileOutcome, RunSummary};
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// First 12 hex digits of a checksum.
fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Path relative to `root` when it lies inside, else as given.
fn display_path(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|r| path.strip_prefix(r).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

fn action_label(action: &Action) -> &'static str {
    match action {
        Action::Moved => "moved",
        Action::Copied => "copied",
        Action::Recorded => "recorded",
        Action::DuplicateRouted => "duplicate",
        Action::Removed => "removed",
        Action::Relocated => "relocated",
        Action::Deleted => "deleted",
        Action::Updated => "updated",
        Action::AlreadyOrganized => "ok",
        Action::AlreadyPresent => "present",
        Action::ChecksumMismatch { .. } => "mismatch",
        Action::Failed(_) => "failed",
    }
}

/// One line for a finished file. Destinations are shown relative to `root`.
pub fn format_outcome(outcome: &FileOutcome, root: Option<&Path>) -> String {
    let label = format!("{:<10}", action_label(&outcome.action));
    let source = display_path(&outcome.source, root);
    let line = match (&outcome.action, &outcome.destination) {
        (Action::Failed(message), _) => format!("{label} {source}: {message}"),
        (Action::ChecksumMismatch { expected, actual }, _) => format!(
            "{label} {source} (expected {}, found {})",
            short_hash(expected),
            short_hash(actual)
        ),
        (Action::AlreadyPresent, Some(dest)) => {
            format!("{label} {source} = {}", display_path(dest, root))
        }
        (_, Some(dest)) if dest != &outcome.source => {
            format!("{label} {source} → {}", display_path(dest, root))
        }
        _ => format!("{label} {source}"),
    };
    if outcome.conflict {
        format!("{line} (renamed)")
    } else {
        line
    }
}

pub fn format_event(event: &OrganizeEvent, root: Option<&Path>) -> Vec<String> {
    match event {
        OrganizeEvent::Started { total } => {
            vec![format!("Processing {total} file{}", if *total == 1 { "" } else { "s" })]
        }
        OrganizeEvent::Outcome(outcome) => vec![format_outcome(outcome, root)],
    }
}

/// Error recap and totals. Per-file lines were already printed as events.
pub fn format_run_summary(summary: &RunSummary, dry_run: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let failures: Vec<&FileOutcome> = summary
        .outcomes
        .iter()
        .filter(|o| o.action.is_error())
        .collect();
    if !failures.is_empty() {
        lines.push("Errors".to_string());
        for outcome in failures {
            let detail = match &outcome.action {
                Action::Failed(message) => message.clone(),
                Action::ChecksumMismatch { .. } => "content changed since it was recorded".into(),
                _ => String::new(),
            };
            lines.push(format!("{}{}: {detail}", indent(1), outcome.source.display()));
        }
        lines.push(String::new());
    }
    lines.push(summary.to_string());
    if dry_run {
        lines.push("Dry run: nothing was changed".to_string());
    }
    lines
}

pub fn print_run_summary(summary: &RunSummary, dry_run: bool) {
    for line in format_run_summary(summary, dry_run) {
        println!("{}", line);
    }
}

pub fn format_check_report(report: &CheckReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.corrupted.is_empty() {
        lines.push("Corrupted".to_string());
        for c in &report.corrupted {
            lines.push(format!("{}{}", indent(1), c.path));
            lines.push(format!("{}expected: {}", indent(2), short_hash(&c.expected)));
            lines.push(format!("{}actual:   {}", indent(2), short_hash(&c.actual)));
        }
        lines.push(String::new());
    }
    if !report.errors.is_empty() {
        lines.push("Unreadable".to_string());
        for (path, message) in &report.errors {
            lines.push(format!("{}{path}: {message}", indent(1)));
        }
        lines.push(String::new());
    }
    let mut totals = format!(
        "{} ok, {} corrupted, {} unreadable",
        report.ok.len(),
        report.corrupted.len(),
        report.errors.len()
    );
    if report.skipped > 0 {
        totals.push_str(&format!(", {} not checked (cancelled)", report.skipped));
    }
    lines.push(totals);
    lines
}

pub fn print_check_report(report: &CheckReport) {
    for line in format_check_report(report) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Corruption;
    use std::path::PathBuf;

    fn outcome(action: Action, dest: Option<&str>) -> FileOutcome {
        FileOutcome::new(
            PathBuf::from("/inbox/img.jpg"),
            dest.map(|d| PathBuf::from("/photos").join(d)),
            action,
        )
    }

    // =========================================================================
    // Per-file lines
    // =========================================================================

    #[test]
    fn moved_shows_relative_destination() {
        let o = outcome(Action::Moved, Some("2015/img.jpg"));
        let line = format_outcome(&o, Some(Path::new("/photos")));
        assert_eq!(line, "moved      /inbox/img.jpg → 2015/img.jpg");
    }

    #[test]
    fn conflict_is_flagged() {
        let o = outcome(Action::Moved, Some("2015/img_1.jpg")).with_conflict(true);
        assert!(format_outcome(&o, None).ends_with("(renamed)"));
    }

    #[test]
    fn already_present_uses_equals() {
        let o = outcome(Action::AlreadyPresent, Some("a.jpg"));
        let line = format_outcome(&o, Some(Path::new("/photos")));
        assert_eq!(line, "present    /inbox/img.jpg = a.jpg");
    }

    #[test]
    fn relocated_and_deleted_lines() {
        let root = Some(Path::new("/photos"));
        let moved = FileOutcome::new(
            "/photos/old/a.jpg".into(),
            Some("/photos/new/a.jpg".into()),
            Action::Relocated,
        );
        assert_eq!(format_outcome(&moved, root), "relocated  old/a.jpg → new/a.jpg");
        let gone = FileOutcome::new("/photos/empty".into(), None, Action::Deleted);
        assert_eq!(format_outcome(&gone, root), "deleted    empty");
    }

    #[test]
    fn in_place_outcome_has_no_arrow() {
        let o = FileOutcome::new(
            "/photos/a.jpg".into(),
            Some("/photos/a.jpg".into()),
            Action::Recorded,
        );
        assert_eq!(format_outcome(&o, Some(Path::new("/photos"))), "recorded   a.jpg");
    }

    #[test]
    fn failure_carries_message() {
        let o = FileOutcome::failed("/inbox/img.jpg".into(), "exiftool exited with 1");
        assert_eq!(
            format_outcome(&o, None),
            "failed     /inbox/img.jpg: exiftool exited with 1"
        );
    }

    #[test]
    fn mismatch_shows_short_hashes() {
        let o = outcome(
            Action::ChecksumMismatch {
                expected: "a".repeat(64),
                actual: "b".repeat(64),
            },
            None,
        );
        assert_eq!(
            format_outcome(&o, None),
            "mismatch   /inbox/img.jpg (expected aaaaaaaaaaaa, found bbbbbbbbbbbb)"
        );
    }

    #[test]
    fn started_event_pluralizes() {
        let started = |total| format_event(&OrganizeEvent::Started { total }, None);
        assert_eq!(started(1), vec!["Processing 1 file"]);
        assert_eq!(started(3), vec!["Processing 3 files"]);
    }

    // =========================================================================
    // Summaries
    // =========================================================================

    #[test]
    fn clean_summary_is_one_line() {
        let mut s = RunSummary::default();
        s.record(outcome(Action::Moved, Some("a.jpg")));
        assert_eq!(
            format_run_summary(&s, false),
            vec!["1 succeeded, 0 skipped, 0 conflicts, 0 errors"]
        );
    }

    #[test]
    fn summary_recaps_errors_and_dry_run() {
        let mut s = RunSummary::default();
        s.record(FileOutcome::failed("/inbox/bad.jpg".into(), "unreadable"));
        let lines = format_run_summary(&s, true);
        assert_eq!(lines[0], "Errors");
        assert_eq!(lines[1], "    /inbox/bad.jpg: unreadable");
        assert_eq!(lines.last().unwrap(), "Dry run: nothing was changed");
    }

    #[test]
    fn check_report_lists_corruption() {
        let report = CheckReport {
            ok: vec!["a.jpg".into()],
            corrupted: vec![Corruption {
                path: "b.jpg".into(),
                expected: "0123456789abcdef".into(),
                actual: "fedcba9876543210".into(),
            }],
            errors: vec![],
            skipped: 0,
        };
        let lines = format_check_report(&report);
        assert_eq!(lines[0], "Corrupted");
        assert_eq!(lines[1], "    b.jpg");
        assert_eq!(lines[2], "        expected: 0123456789ab");
        assert_eq!(lines.last().unwrap(), "1 ok, 1 corrupted, 0 unreadable");
    }

    #[test]
    fn clean_check_is_totals_only() {
        let report = CheckReport {
            ok: vec!["a.jpg".into()],
            ..Default::default()
        };
        assert_eq!(format_check_report(&report), vec!["1 ok, 0 corrupted, 0 unreadable"]);
    }
}
