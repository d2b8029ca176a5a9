//! Near-duplicate images: perceptual hashing, clustering and the reversible
//! compare operation.
//!
//! ## Hash
//!
//! An 8×8 average hash: the image is converted to grayscale, shrunk to 8×8
//! with Lanczos3, and each bit says whether that pixel is at least the mean.
//! Two images are similar when their hashes differ in at most `threshold`
//! bits. Similarity is symmetric but not transitive, so clusters are the
//! connected components of the "similar" graph: A~B and B~C put all three
//! together even when A and C are far apart.
//!
//! ## Compare and revert
//!
//! For each cluster one representative stays in place; the others move to
//! `<root>/<duplicates_dir>/<representative stem>/<filename>`. Each move is
//! appended to a JSON-lines log and flushed before the next one starts, so
//! an interrupted compare can still be reverted. Reverting replays the log
//! backwards and then clears it.

use crate::config::{STATE_DIR, SimilarityConfig};
use crate::fsops;
use crate::store::{IntegrityStore, StoreError, relative_path};
use crate::types::{CancelToken, MediaFile};
use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MOVE_LOG_FILENAME: &str = "compare-log.jsonl";

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Move log is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Nothing to revert")]
    NothingToRevert,
}

/// 64-bit average hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHash(pub u64);

impl ImageHash {
    pub fn from_image(img: &DynamicImage) -> Self {
        let small = img.grayscale().resize_exact(8, 8, FilterType::Lanczos3).to_luma8();
        let pixels: Vec<u32> = small.pixels().map(|p| u32::from(p.0[0])).collect();
        let sum: u32 = pixels.iter().sum();
        let bits = pixels.iter().fold(0u64, |acc, &p| {
            // p >= mean, without the division
            (acc << 1) | u64::from(p * 64 >= sum)
        });
        Self(bits)
    }

    pub fn from_path(path: &Path) -> Result<Self, SimilarityError> {
        Ok(Self::from_image(&image::open(path)?))
    }

    /// Number of differing bits.
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Whether the image crate can decode this file type.
pub fn is_hashable(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok_and(|f| f.reading_enabled())
}

/// Connected components of the graph where `distance <= threshold`.
///
/// Returns index lists into `hashes`; members ascend and clusters are
/// ordered by their first member, so callers that pass hashes sorted by
/// path get a deterministic result.
pub fn cluster(hashes: &[ImageHash], threshold: u32) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..hashes.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..hashes.len() {
        for j in (i + 1)..hashes.len() {
            if hashes[i].distance(hashes[j]) <= threshold {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut slot_of_root = vec![usize::MAX; hashes.len()];
    for i in 0..hashes.len() {
        let root = find(&mut parent, i);
        if slot_of_root[root] == usize::MAX {
            slot_of_root[root] = clusters.len();
            clusters.push(Vec::new());
        }
        clusters[slot_of_root[root]].push(i);
    }
    clusters
}

/// Index of the member to keep: most resolved metadata, then earliest
/// original date (unknown dates last), then smallest path.
pub fn representative(members: &[&MediaFile]) -> usize {
    (0..members.len())
        .min_by(|&a, &b| {
            let (fa, fb) = (members[a], members[b]);
            fb.metadata
                .resolved_field_count()
                .cmp(&fa.metadata.resolved_field_count())
                .then_with(|| match (fa.metadata.date_original, fb.metadata.date_original) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| fa.path.cmp(&fb.path))
        })
        .unwrap_or(0)
}

/// One recorded duplicate move, paths relative to the collection root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEntry {
    pub from: String,
    pub to: String,
}

/// Append-only record of compare moves.
pub struct MoveLog {
    path: PathBuf,
}

impl MoveLog {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(STATE_DIR).join(MOVE_LOG_FILENAME),
        }
    }

    /// Append one entry and flush it to disk.
    pub fn append(&self, entry: &MoveEntry) -> Result<(), SimilarityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<MoveEntry>, SimilarityError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }

    /// Replace the log with `entries`; an empty list removes the file.
    pub fn rewrite(&self, entries: &[MoveEntry]) -> Result<(), SimilarityError> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        let mut content = String::new();
        for entry in entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// A planned or completed duplicate move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMove {
    pub from: PathBuf,
    pub to: PathBuf,
    /// The cluster member that stays in place.
    pub representative: PathBuf,
}

#[derive(Debug, Default)]
pub struct CompareReport {
    pub clusters: usize,
    pub moves: Vec<DuplicateMove>,
    pub errors: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
pub struct RevertReport {
    pub restored: Vec<MoveEntry>,
    pub errors: Vec<(MoveEntry, String)>,
}

/// Clusters near-duplicate images and moves the extras aside.
pub struct SimilarityMatcher {
    threshold: u32,
    duplicates_dir: String,
}

impl SimilarityMatcher {
    pub fn new(threshold: u32, duplicates_dir: impl Into<String>) -> Self {
        Self {
            threshold,
            duplicates_dir: duplicates_dir.into(),
        }
    }

    pub fn from_config(config: &SimilarityConfig) -> Self {
        Self::new(config.threshold, config.duplicates_dir.clone())
    }

    pub fn is_similar(&self, a: ImageHash, b: ImageHash) -> bool {
        a.distance(b) <= self.threshold
    }

    /// Directory receiving the duplicates of `representative`.
    pub fn duplicates_folder(&self, root: &Path, representative: &Path) -> PathBuf {
        let stem = representative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        root.join(&self.duplicates_dir).join(stem)
    }

    /// Decide every move without touching the filesystem.
    pub fn plan(&self, root: &Path, files: &[MediaFile]) -> (usize, Vec<DuplicateMove>) {
        let mut hashed: Vec<&MediaFile> = files.iter().filter(|f| f.image_hash.is_some()).collect();
        hashed.sort_by(|a, b| a.path.cmp(&b.path));
        let hashes: Vec<ImageHash> = hashed
            .iter()
            .filter_map(|f| f.image_hash.map(ImageHash))
            .collect();

        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut moves = Vec::new();
        let mut cluster_count = 0;
        for members in cluster(&hashes, self.threshold) {
            if members.len() < 2 {
                continue;
            }
            cluster_count += 1;
            let files: Vec<&MediaFile> = members.iter().map(|&i| hashed[i]).collect();
            let keep = representative(&files);
            let folder = self.duplicates_folder(root, &files[keep].path);
            for (i, file) in files.iter().enumerate() {
                if i == keep {
                    continue;
                }
                let Some(name) = file.path.file_name() else {
                    continue;
                };
                let native = folder.join(name);
                let mut dest = native.clone();
                let mut n = 0;
                while claimed.contains(&dest) || dest.exists() {
                    n += 1;
                    dest = fsops::suffixed(&native, n);
                }
                claimed.insert(dest.clone());
                moves.push(DuplicateMove {
                    from: file.path.clone(),
                    to: dest,
                    representative: files[keep].path.clone(),
                });
            }
        }
        (cluster_count, moves)
    }

    /// Move every non-representative cluster member to the duplicates area.
    ///
    /// Files must carry their `image_hash`; files without one are ignored.
    pub fn compare(
        &self,
        root: &Path,
        files: &[MediaFile],
        store: &IntegrityStore,
        log: &MoveLog,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<CompareReport, SimilarityError> {
        let (clusters, planned) = self.plan(root, files);
        let mut report = CompareReport {
            clusters,
            ..Default::default()
        };
        for mv in planned {
            if cancel.is_cancelled() {
                info!("compare cancelled");
                break;
            }
            let (Some(from), Some(to)) =
                (relative_path(root, &mv.from), relative_path(root, &mv.to))
            else {
                report.errors.push((mv.from.clone(), "outside the collection".into()));
                continue;
            };
            if dry_run {
                report.moves.push(mv);
                continue;
            }
            let checksum = match store.record_for_path(&from) {
                Some(record) => record.checksum,
                None => match crate::store::sha256_file(&mv.from) {
                    Ok(checksum) => checksum,
                    Err(e) => {
                        warn!("could not hash {}: {e}", mv.from.display());
                        report.errors.push((mv.from.clone(), e.to_string()));
                        continue;
                    }
                },
            };
            if let Err(e) = fsops::move_file(&mv.from, &mv.to, &checksum) {
                warn!("could not move duplicate {}: {e}", mv.from.display());
                report.errors.push((mv.from.clone(), e.to_string()));
                continue;
            }
            // An unlogged move could never be reverted; undo it instead.
            let entry = MoveEntry {
                from: from.clone(),
                to: to.clone(),
            };
            if let Err(e) = log.append(&entry) {
                let message = match fsops::move_file(&mv.to, &mv.from, &checksum) {
                    Ok(()) => {
                        if let Some(parent) = mv.to.parent() {
                            fsops::prune_empty_dirs(parent, root);
                        }
                        format!("not moved, compare log unwritable: {e}")
                    }
                    Err(back) => format!("compare log unwritable ({e}), left at {to}: {back}"),
                };
                warn!("{}: {message}", mv.from.display());
                report.errors.push((mv.from.clone(), message));
                continue;
            }
            match store.relocate(&from, &to) {
                Ok(()) | Err(StoreError::NotTracked(_)) => {}
                Err(e) => return Err(e.into()),
            }
            debug!("duplicate {} -> {}", from, to);
            if let Some(parent) = mv.from.parent() {
                fsops::prune_empty_dirs(parent, root);
            }
            report.moves.push(mv);
        }
        Ok(report)
    }

    /// Undo the logged compare moves, newest first.
    pub fn revert_compare(
        &self,
        root: &Path,
        store: &IntegrityStore,
        log: &MoveLog,
        dry_run: bool,
    ) -> Result<RevertReport, SimilarityError> {
        let entries = log.entries()?;
        if entries.is_empty() {
            return Err(SimilarityError::NothingToRevert);
        }
        let mut report = RevertReport::default();
        let mut remaining = Vec::new();
        for entry in entries.into_iter().rev() {
            if dry_run {
                report.restored.push(entry);
                continue;
            }
            let (current, original) = (root.join(&entry.to), root.join(&entry.from));
            let result = if original.exists() {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is occupied", entry.from),
                ))
            } else {
                let checksum = match store.record_for_path(&entry.to) {
                    Some(record) => Ok(record.checksum),
                    None => crate::store::sha256_file(&current),
                };
                checksum.and_then(|c| fsops::move_file(&current, &original, &c))
            };
            match result {
                Ok(()) => {
                    match store.relocate(&entry.to, &entry.from) {
                        Ok(()) | Err(StoreError::NotTracked(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                    if let Some(parent) = current.parent() {
                        fsops::prune_empty_dirs(parent, root);
                    }
                    report.restored.push(entry);
                }
                Err(e) => {
                    warn!("could not restore {}: {e}", entry.from);
                    report.errors.push((entry.clone(), e.to_string()));
                    remaining.push(entry);
                }
            }
        }
        if !dry_run {
            remaining.reverse();
            log.rewrite(&remaining)?;
        }
        Ok(report)
    }
}
