//! File transfers and directory cleanup.

use crate::config::STATE_DIR;
use crate::store::sha256_file;
use log::{debug, warn};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Move `from` to `to`, creating parent directories.
///
/// Tries a rename first. Across filesystems it falls back to copy, verify
/// the copy against `checksum`, then remove the source; a copy that does
/// not verify is deleted and the source is left alone.
pub fn move_file(from: &Path, to: &Path, checksum: &str) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("rename across devices, copying {}", from.display());
            copy_file(from, to, checksum)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Copy `from` to `to` and verify the copy against `checksum`.
pub fn copy_file(from: &Path, to: &Path, checksum: &str) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    let actual = sha256_file(to)?;
    if actual != checksum {
        let _ = fs::remove_file(to);
        return Err(io::Error::other(format!(
            "copy of {} does not match its source checksum",
            from.display()
        )));
    }
    Ok(())
}

/// Remove `dir` and its ancestors while they are empty, stopping at `stop`.
pub fn prune_empty_dirs(dir: &Path, stop: &Path) {
    let mut current: Option<PathBuf> = Some(dir.to_path_buf());
    while let Some(d) = current {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        let is_empty = fs::read_dir(&d).map(|mut it| it.next().is_none()).unwrap_or(false);
        if !is_empty || fs::remove_dir(&d).is_err() {
            break;
        }
        debug!("removed empty directory {}", d.display());
        current = d.parent().map(Path::to_path_buf);
    }
}

/// Directories under `dir` that hold no files, deepest first.
///
/// A directory holding only empty directories is empty too, so removing
/// the list in order leaves none behind. Files in `gone` count as already
/// deleted. `dir` itself is never listed and the state directory is never
/// entered.
pub fn empty_dirs(dir: &Path, gone: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut occupied: HashSet<PathBuf> = HashSet::new();
    let mut empty = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .contents_first(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != STATE_DIR);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                if let Some(parent) = e.path().and_then(Path::parent) {
                    occupied.insert(parent.to_path_buf());
                }
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let holds_something = if entry.file_type().is_dir() {
            occupied.contains(path)
        } else {
            !gone.contains(path)
        };
        if holds_something {
            if let Some(parent) = path.parent() {
                occupied.insert(parent.to_path_buf());
            }
        } else {
            empty.push(path.to_path_buf());
        }
    }
    empty
}

/// `stem_N.ext` for the `n`-th conflict of `path`.
///
/// Always derived from the unsuffixed destination, so numbering never
/// stacks (`a_1_1.jpg`).
pub fn suffixed(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}
