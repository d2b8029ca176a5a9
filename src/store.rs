//! Integrity store: which files belong to the collection, where they are,
//! and what their content hashed to.
//!
//! Every tracked file has a [`CollectionRecord`] keyed by a stable
//! [`FileId`]. Moves and renames update the record's path in place; the id
//! never changes. The checksum recorded at import is the reference for bit
//! rot detection: a later hash that differs is the only corruption signal.
//!
//! ## Storage
//!
//! A versioned JSON document at `<root>/.mediasort/collection.json`, written
//! atomically (temp file, then rename) so an interrupted save never leaves a
//! truncated store. The same document carries the geocoding places cache.
//! Unlike a build cache, this file is the collection's memory: an unreadable
//! file or a version mismatch is an error, never a silent reset.
//!
//! ## Lookups
//!
//! Records are keyed by id on disk. A runtime `path_index` (path → id) is
//! rebuilt on load and maintained on every mutation; it is never serialized.
//!
//! ## Concurrency
//!
//! All state sits behind one `RwLock`. Hashing for [`IntegrityStore::verify`]
//! and [`IntegrityStore::check_all`] happens outside the lock.

use crate::config::STATE_DIR;
use crate::types::{CancelToken, FileId, GeoPlace, MediaFile, MediaMetadata, SourceInfo};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Name of the store file within the state directory.
const STORE_FILENAME: &str = "collection.json";

/// Version of the store format.
const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("{0} is not tracked")]
    NotTracked(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: FileId,
    /// Hex SHA-256 of the content when last recorded.
    pub checksum: String,
    /// Path relative to the collection root, `/`-separated.
    pub path: String,
    pub metadata: MediaMetadata,
    #[serde(default)]
    pub source: SourceInfo,
    pub last_verified: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    records: BTreeMap<FileId, CollectionRecord>,
    #[serde(default)]
    places: BTreeMap<String, GeoPlace>,
}

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<FileId, CollectionRecord>,
    places: BTreeMap<String, GeoPlace>,
    /// Runtime reverse index: path → id. Never serialized.
    path_index: HashMap<String, FileId>,
}

impl StoreState {
    fn remove_id(&mut self, id: &FileId) -> Option<CollectionRecord> {
        let record = self.records.remove(id)?;
        if self.path_index.get(&record.path) == Some(id) {
            self.path_index.remove(&record.path);
        }
        Some(record)
    }
}

/// Result of verifying one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Corrupted { expected: String, actual: String },
    /// No record for the path.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Outcome of a full integrity check.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub ok: Vec<String>,
    pub corrupted: Vec<Corruption>,
    /// Records that could not be verified, e.g. a missing file.
    pub errors: Vec<(String, String)>,
    /// Records skipped because the run was cancelled.
    pub skipped: usize,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty() && self.errors.is_empty()
    }
}

/// Persistent identity and checksum records of one collection.
pub struct IntegrityStore {
    root: PathBuf,
    state: RwLock<StoreState>,
}

impl IntegrityStore {
    /// Open the store of the collection at `root`. A missing file is an
    /// empty store.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let path = store_path(root);
        let state = match fs::read_to_string(&path) {
            Ok(content) => load_state(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!("opened store with {} records", state.records.len());
        Ok(Self {
            root: root.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the store atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        let path = store_path(&self.root);
        let json = {
            let state = self.read();
            let file = StoreFile {
                version: STORE_VERSION,
                records: state.records.clone(),
                places: state.places.clone(),
            };
            serde_json::to_string_pretty(&file)?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Insert or update the record of `file`, now located at `rel_path`.
    ///
    /// Identity is the file's id when it has a live one, else the record
    /// already at `rel_path`, else a new id. A stale record left at
    /// `rel_path` by another id is dropped.
    pub fn upsert(&self, file: &MediaFile, rel_path: &str) -> FileId {
        let mut state = self.write();
        let id = file
            .id
            .clone()
            .filter(|id| state.records.contains_key(id))
            .or_else(|| state.path_index.get(rel_path).cloned())
            .unwrap_or_else(FileId::generate);

        if let Some(other) = state.path_index.get(rel_path).cloned()
            && other != id
        {
            warn!("dropping stale record {other} at {rel_path}");
            state.remove_id(&other);
        }
        if let Some(old_path) = state.records.get(&id).map(|r| r.path.clone())
            && old_path != rel_path
        {
            state.path_index.remove(&old_path);
        }

        state.path_index.insert(rel_path.to_string(), id.clone());
        state.records.insert(
            id.clone(),
            CollectionRecord {
                id: id.clone(),
                checksum: file.checksum.clone(),
                path: rel_path.to_string(),
                metadata: file.metadata.clone(),
                source: file.source.clone(),
                last_verified: Utc::now(),
            },
        );
        id
    }

    /// Hash the file at `rel_path` and compare with its record.
    pub fn verify(&self, rel_path: &str) -> Result<VerifyStatus, StoreError> {
        let Some(expected) = self.record_for_path(rel_path).map(|r| r.checksum) else {
            return Ok(VerifyStatus::Unknown);
        };
        let actual = sha256_file(&self.root.join(rel_path))?;
        Ok(if actual == expected {
            VerifyStatus::Ok
        } else {
            VerifyStatus::Corrupted { expected, actual }
        })
    }

    /// Stamp `last_verified` on records that just checked clean.
    pub fn mark_verified(&self, paths: &[String]) {
        let now = Utc::now();
        let mut state = self.write();
        for path in paths {
            if let Some(id) = state.path_index.get(path).cloned()
                && let Some(record) = state.records.get_mut(&id)
            {
                record.last_verified = now;
            }
        }
    }

    pub fn remove(&self, rel_path: &str) -> Option<CollectionRecord> {
        let mut state = self.write();
        let id = state.path_index.get(rel_path).cloned()?;
        state.remove_id(&id)
    }

    /// Point the record at `old` to `new`, keeping its id.
    pub fn relocate(&self, old: &str, new: &str) -> Result<(), StoreError> {
        let mut state = self.write();
        let id = state
            .path_index
            .remove(old)
            .ok_or_else(|| StoreError::NotTracked(old.to_string()))?;
        if let Some(other) = state.path_index.get(new).cloned()
            && other != id
        {
            state.remove_id(&other);
        }
        if let Some(record) = state.records.get_mut(&id) {
            record.path = new.to_string();
        }
        state.path_index.insert(new.to_string(), id);
        Ok(())
    }

    /// Replace the metadata snapshot of a tracked file.
    pub fn update_metadata(
        &self,
        rel_path: &str,
        metadata: MediaMetadata,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let id = state
            .path_index
            .get(rel_path)
            .cloned()
            .ok_or_else(|| StoreError::NotTracked(rel_path.to_string()))?;
        if let Some(record) = state.records.get_mut(&id) {
            record.metadata = metadata;
        }
        Ok(())
    }

    pub fn record_for_path(&self, rel_path: &str) -> Option<CollectionRecord> {
        let state = self.read();
        let id = state.path_index.get(rel_path)?;
        state.records.get(id).cloned()
    }

    pub fn record(&self, id: &FileId) -> Option<CollectionRecord> {
        self.read().records.get(id).cloned()
    }

    /// All records, ordered by path.
    pub fn records(&self) -> Vec<CollectionRecord> {
        let mut records: Vec<_> = self.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn places(&self) -> BTreeMap<String, GeoPlace> {
        self.read().places.clone()
    }

    pub fn insert_place(&self, key: String, place: GeoPlace) {
        self.write().places.insert(key, place);
    }

    /// Verify every record on a pool of `workers` threads. Read-only.
    pub fn check_all(
        &self,
        workers: usize,
        cancel: &CancelToken,
    ) -> Result<CheckReport, StoreError> {
        let records = self.records();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()?;
        let results: Vec<_> = pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let result = sha256_file(&self.root.join(&record.path));
                    Some((record, result))
                })
                .collect()
        });

        let mut report = CheckReport::default();
        for result in results {
            match result {
                None => report.skipped += 1,
                Some((record, Ok(actual))) if actual == record.checksum => {
                    report.ok.push(record.path.clone());
                }
                Some((record, Ok(actual))) => {
                    warn!("checksum mismatch: {}", record.path);
                    report.corrupted.push(Corruption {
                        path: record.path.clone(),
                        expected: record.checksum.clone(),
                        actual,
                    });
                }
                Some((record, Err(e))) => {
                    report.errors.push((record.path.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

fn load_state(content: &str) -> Result<StoreState, StoreError> {
    let raw: serde_json::Value = serde_json::from_str(content)?;
    let found = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if found != STORE_VERSION {
        return Err(StoreError::Version {
            found,
            expected: STORE_VERSION,
        });
    }
    let file: StoreFile = serde_json::from_value(raw)?;
    let path_index = file
        .records
        .iter()
        .map(|(id, record)| (record.path.clone(), id.clone()))
        .collect();
    Ok(StoreState {
        records: file.records,
        places: file.places,
        path_index,
    })
}

/// Resolve the store path for a collection root.
pub fn store_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(STORE_FILENAME)
}

/// SHA-256 of a file's contents as lowercase hex, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `path` relative to `root` in store form (`/`-separated), or `None` when
/// it lies outside the root.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::media_file;
    use tempfile::TempDir;

    fn store_with_file(tmp: &TempDir, rel: &str, content: &[u8]) -> IntegrityStore {
        let path = tmp.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        let store = IntegrityStore::open(tmp.path()).unwrap();
        store.upsert(&media_file(&path), rel);
        store
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn streamed_file_hash_matches_bytes_hash() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"abc"));
    }

    #[test]
    fn relative_path_is_slash_separated() {
        let root = Path::new("/c");
        assert_eq!(
            relative_path(root, Path::new("/c/2015/06/a.jpg")).as_deref(),
            Some("2015/06/a.jpg")
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/a.jpg")), None);
        assert_eq!(relative_path(root, root), None);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn missing_store_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(IntegrityStore::open(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn save_and_reopen_keeps_records_and_index() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "2015/a.jpg", b"alpha");
        store.insert_place("1.00,2.00".into(), GeoPlace::default());
        store.save().unwrap();
        assert!(!store_path(tmp.path()).with_extension("json.tmp").exists());

        let reopened = IntegrityStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let record = reopened.record_for_path("2015/a.jpg").unwrap();
        assert_eq!(record.checksum, sha256_bytes(b"alpha"));
        assert_eq!(reopened.places().len(), 1);
    }

    #[test]
    fn version_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"version": 99, "records": {}}"#).unwrap();
        assert!(matches!(
            IntegrityStore::open(tmp.path()),
            Err(StoreError::Version { found: 99, .. })
        ));
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = store_path(tmp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            IntegrityStore::open(tmp.path()),
            Err(StoreError::Json(_))
        ));
    }

    // =========================================================================
    // Identity
    // =========================================================================

    #[test]
    fn upsert_same_path_keeps_id() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        let first = store.record_for_path("a.jpg").unwrap().id;
        let again = store.upsert(&media_file(&tmp.path().join("a.jpg")), "a.jpg");
        assert_eq!(first, again);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_with_id_moves_record() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        let id = store.record_for_path("a.jpg").unwrap().id;

        let mut file = media_file(&tmp.path().join("a.jpg"));
        file.id = Some(id.clone());
        assert_eq!(store.upsert(&file, "2015/a.jpg"), id);

        assert!(store.record_for_path("a.jpg").is_none());
        assert_eq!(store.record_for_path("2015/a.jpg").unwrap().id, id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_drops_stale_record_at_destination() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        fs::write(tmp.path().join("b.jpg"), b"beta").unwrap();
        let b = store.upsert(&media_file(&tmp.path().join("b.jpg")), "b.jpg");

        let mut file = media_file(&tmp.path().join("b.jpg"));
        file.id = Some(b.clone());
        store.upsert(&file, "a.jpg");

        assert_eq!(store.len(), 1);
        assert_eq!(store.record_for_path("a.jpg").unwrap().id, b);
    }

    #[test]
    fn relocate_updates_path_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        let id = store.record_for_path("a.jpg").unwrap().id;
        store.relocate("a.jpg", "dup/a.jpg").unwrap();
        assert_eq!(store.record(&id).unwrap().path, "dup/a.jpg");
        assert!(store.record_for_path("a.jpg").is_none());
    }

    #[test]
    fn relocate_untracked_is_error() {
        let tmp = TempDir::new().unwrap();
        let store = IntegrityStore::open(tmp.path()).unwrap();
        assert!(matches!(
            store.relocate("x", "y"),
            Err(StoreError::NotTracked(_))
        ));
    }

    #[test]
    fn remove_forgets_record() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        assert!(store.remove("a.jpg").is_some());
        assert!(store.is_empty());
        assert!(store.remove("a.jpg").is_none());
    }

    // =========================================================================
    // Verification
    // =========================================================================

    #[test]
    fn verify_ok_then_corrupted() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        assert_eq!(store.verify("a.jpg").unwrap(), VerifyStatus::Ok);

        fs::write(tmp.path().join("a.jpg"), b"alphA").unwrap();
        match store.verify("a.jpg").unwrap() {
            VerifyStatus::Corrupted { expected, actual } => {
                assert_eq!(expected, sha256_bytes(b"alpha"));
                assert_eq!(actual, sha256_bytes(b"alphA"));
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn verify_untracked_is_unknown() {
        let tmp = TempDir::new().unwrap();
        let store = IntegrityStore::open(tmp.path()).unwrap();
        assert_eq!(store.verify("nope.jpg").unwrap(), VerifyStatus::Unknown);
    }

    #[test]
    fn check_all_reports_corruption_and_missing_files() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        for (rel, content) in [("b.jpg", &b"beta"[..]), ("c.jpg", &b"gamma"[..])] {
            let path = tmp.path().join(rel);
            fs::write(&path, content).unwrap();
            store.upsert(&media_file(&path), rel);
        }
        fs::write(tmp.path().join("b.jpg"), b"bit rot").unwrap();
        fs::remove_file(tmp.path().join("c.jpg")).unwrap();

        let before = store.records();
        let report = store.check_all(2, &CancelToken::new()).unwrap();

        assert_eq!(report.ok, vec!["a.jpg".to_string()]);
        assert_eq!(report.corrupted.len(), 1);
        assert_eq!(report.corrupted[0].path, "b.jpg");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "c.jpg");
        assert!(!report.is_clean());
        // Checking never mutates records.
        assert_eq!(store.records(), before);
    }

    #[test]
    fn check_all_stops_when_cancelled() {
        let tmp = TempDir::new().unwrap();
        let store = store_with_file(&tmp, "a.jpg", b"alpha");
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = store.check_all(1, &cancel).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(report.ok.is_empty());
    }
}
