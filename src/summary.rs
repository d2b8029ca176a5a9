//! Structured outcome of a mutating run.
//!
//! Every file the organizer touches, or decides not to touch, produces one
//! [`FileOutcome`]. The counters are derived from the outcomes as they are
//! recorded, so the summary is the single account of what happened; a dry
//! run produces the same outcomes as the real run would.

use std::fmt;
use std::path::PathBuf;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Moved into place (import in move mode, sort, edit).
    Moved,
    /// Copied into place, source kept.
    Copied,
    /// Recorded where it already was.
    Recorded,
    /// Routed to the duplicates area as a near-duplicate of the occupant.
    DuplicateRouted,
    /// Record dropped from the store.
    Removed,
    /// Record followed a file moved outside mediasort.
    Relocated,
    /// File or empty directory deleted from disk.
    Deleted,
    /// Snapshot changed, path unchanged.
    Updated,
    /// Already at its rendered destination.
    AlreadyOrganized,
    /// Identical content already sits at the destination.
    AlreadyPresent,
    /// Content no longer matches the stored checksum; file left untouched.
    ChecksumMismatch { expected: String, actual: String },
    Failed(String),
}

impl Action {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Action::Moved
                | Action::Copied
                | Action::Recorded
                | Action::DuplicateRouted
                | Action::Removed
                | Action::Relocated
                | Action::Deleted
                | Action::Updated
        )
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Action::AlreadyOrganized | Action::AlreadyPresent)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Action::ChecksumMismatch { .. } | Action::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub action: Action,
    /// The rendered destination was taken and a suffix (or the duplicates
    /// area) was used instead.
    pub conflict: bool,
}

impl FileOutcome {
    pub fn new(source: PathBuf, destination: Option<PathBuf>, action: Action) -> Self {
        Self {
            source,
            destination,
            action,
            conflict: false,
        }
    }

    pub fn failed(source: PathBuf, message: impl Into<String>) -> Self {
        Self::new(source, None, Action::Failed(message.into()))
    }

    pub fn with_conflict(mut self, conflict: bool) -> Self {
        self.conflict = conflict;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: usize,
    pub outcomes: Vec<FileOutcome>,
    /// The run stopped early; outcomes cover only the completed files.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: FileOutcome) {
        if outcome.action.is_success() {
            self.succeeded += 1;
        } else if outcome.action.is_skip() {
            self.skipped += 1;
        } else if outcome.action.is_error() {
            self.errors += 1;
        }
        if outcome.conflict {
            self.conflicts += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Every processed file failed.
    pub fn is_fatal(&self) -> bool {
        self.errors > 0 && self.succeeded == 0 && self.skipped == 0
    }

    /// Order outcomes by source path.
    pub fn sort(&mut self) {
        self.outcomes.sort_by(|a, b| a.source.cmp(&b.source));
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} conflicts, {} errors",
            self.succeeded, self.skipped, self.conflicts, self.errors
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
