//! Collection organizer: the per-file pipeline and the commands built on it.
//!
//! ```text
//! scan ──► phase 1 (parallel)            ──► phase 2 (decide, then execute)
//!          checksum                          group by rendered destination
//!          stored snapshot or extract+resolve  same path / identical / suffix
//!          render destination                move or copy, record, prune
//! ```
//!
//! ## Phase 1
//!
//! Runs on a bounded rayon pool. A file already tracked by the store keeps
//! its stored metadata snapshot and source info, so re-running `sort` on an
//! organized collection renders exactly the paths it rendered before and
//! calls no external tool. A tracked file whose content no longer matches
//! its checksum is reported and left alone.
//!
//! ## Phase 2
//!
//! Plans are grouped by their rendered ("native") destination and every
//! native destination is claimed up front. Decisions are made in one
//! sequential pass, groups and members in path order, against the
//! filesystem plus the destinations already handed out. A destination held
//! by a file that moves away in the same run counts as free, and the file
//! taking it is scheduled in a later wave than the one leaving. That pass is
//! the only place conflicts are resolved, and it is the same for dry runs
//! and real runs, which is what makes a preview exact.
//!
//! Execution then runs wave by wave, groups of a wave in parallel on the
//! pool, each group under the lock of its native destination. A dry run
//! stops right before the first mutation of each file.
//!
//! ## Cancellation
//!
//! The [`CancelToken`] is checked between files. Completed files keep their
//! records; the store is saved with exactly those. It is also saved every
//! `processing.save_every` placed files and after each wave, so a run
//! killed outright loses at most that many records.
//!
//! ## Maintenance
//!
//! `update`, `clean` and `clone_to` work on the collection as it is on disk
//! and never render a destination.

use crate::config::{
    self, Config, ConfigError, ImportMode, STATE_DIR, effective_threads, stock_config_toml,
};
use crate::extract::TagExtractor;
use crate::fsops;
use crate::geo::{GeoResolver, Geocoder};
use crate::metadata::{MetadataResolver, parse_coordinate, parse_date};
use crate::scan::{self, ScanError, ScanFilter, ScannedFile};
use crate::similarity::{
    ImageHash, MoveEntry, MoveLog, SimilarityError, SimilarityMatcher, is_hashable,
};
use crate::store::{
    CheckReport, CollectionRecord, IntegrityStore, StoreError, relative_path, sha256_file,
};
use crate::summary::{Action, FileOutcome, RunSummary};
use crate::template::{PathFormat, RenderContext, TemplateEngine, TemplateError};
use crate::types::{CancelToken, MediaFile, MediaMetadata, SourceInfo};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Similarity error: {0}")]
    Similarity(#[from] SimilarityError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid ignore_tags pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{0} is outside the collection")]
    OutsideCollection(PathBuf),
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),
    #[error("{0} is not empty")]
    TargetNotEmpty(PathBuf),
    #[error("{0} lies inside the collection")]
    TargetInsideCollection(PathBuf),
    #[error("Collection failed its check: {corrupted} corrupted, {unverified} unverifiable")]
    Unclean { corrupted: usize, unverified: usize },
}

/// Progress messages for the CLI printer thread.
#[derive(Debug, Clone)]
pub enum OrganizeEvent {
    /// Files discovered for this run.
    Started { total: usize },
    /// One file is done.
    Outcome(FileOutcome),
}

/// One mutex per destination path.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

/// A metadata field change requested by `edit`: `key=value`, an empty
/// value clears the field.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEdit {
    pub field: String,
    pub value: Option<String>,
}

pub const EDITABLE_FIELDS: &[&str] = &[
    "title",
    "album",
    "camera_make",
    "camera_model",
    "original_name",
    "date_original",
    "latitude",
    "longitude",
    "city",
    "state",
    "country",
    "location",
];

impl FromStr for MetadataEdit {
    type Err = OrganizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, value) = s
            .split_once('=')
            .ok_or_else(|| OrganizeError::InvalidEdit(format!("expected key=value, got '{s}'")))?;
        let field = field.trim();
        if !EDITABLE_FIELDS.contains(&field) {
            return Err(OrganizeError::InvalidEdit(format!(
                "unknown field '{field}' (editable: {})",
                EDITABLE_FIELDS.join(", ")
            )));
        }
        let value = value.trim();
        Ok(Self {
            field: field.to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        })
    }
}

/// What `clean` deletes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Files matching `filters.exclude`, with their records.
    pub excluded: bool,
    /// Directories left without files.
    pub empty_dirs: bool,
}

/// A discovered file and the directory its walk started from.
struct WorkItem {
    path: PathBuf,
    source: SourceInfo,
    /// Empty directories are pruned up to here after a move.
    origin: PathBuf,
}

/// A file with its resolved snapshot and rendered destination.
struct Plan {
    file: MediaFile,
    native: PathBuf,
    origin: PathBuf,
    tracked: Option<CollectionRecord>,
}

#[derive(Debug, Clone, PartialEq)]
enum Decision {
    InPlace,
    AlreadyPresent { dest: PathBuf },
    Transfer { dest: PathBuf, conflict: bool },
    /// Similar image at the destination; go to the duplicates area.
    Route { dest: PathBuf },
    Failed(String),
}

struct Step {
    plan: Plan,
    decision: Decision,
}

struct Group {
    native: PathBuf,
    steps: Vec<Step>,
}

/// A collection file after the first pass of `update`.
enum Reconciled {
    Done(FileOutcome),
    Untracked { rel: String, checksum: String },
}

/// A destination handed out earlier in the same decision pass.
struct Taken {
    checksum: String,
    source: PathBuf,
}

/// Organizes one collection.
pub struct Organizer {
    root: PathBuf,
    config: Config,
    format: PathFormat,
    resolver: MetadataResolver,
    geo: Option<Arc<GeoResolver>>,
    extractor: Arc<dyn TagExtractor>,
    store: IntegrityStore,
    matcher: SimilarityMatcher,
    locks: PathLocks,
    pool: rayon::ThreadPool,
    workers: usize,
    events: Option<Sender<OrganizeEvent>>,
    cancel: CancelToken,
    dry_run: bool,
    /// Store changes since the last save.
    unsaved: Mutex<usize>,
}

impl Organizer {
    /// Open the collection at `root`. Templates and patterns are compiled
    /// here, so a bad config fails before any file is looked at.
    pub fn new(
        root: &Path,
        config: Config,
        extractor: Arc<dyn TagExtractor>,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Result<Self, OrganizeError> {
        config.validate()?;
        let format = TemplateEngine::new().path_format(&config.path.dirs_path, &config.path.name)?;
        let store = IntegrityStore::open(root)?;

        let geo = geocoder
            .filter(|_| config.geolocation.enabled)
            .map(|g| Arc::new(GeoResolver::from_config(g, &config.geolocation)));
        let mut resolver = MetadataResolver::from_config(&config.metadata)?;
        if let Some(geo) = &geo {
            let places = store.places();
            geo.seed(&places);
            resolver = resolver.with_geo(Arc::clone(geo));
        }

        let workers = effective_threads(&config.processing);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        let matcher = SimilarityMatcher::from_config(&config.similarity);

        Ok(Self {
            root: root.to_path_buf(),
            config,
            format,
            resolver,
            geo,
            extractor,
            store,
            matcher,
            locks: PathLocks::default(),
            pool,
            workers,
            events: None,
            cancel: CancelToken::new(),
            dry_run: false,
            unsaved: Mutex::new(0),
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_events(mut self, events: Sender<OrganizeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &IntegrityStore {
        &self.store
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Bring files from outside into the collection.
    pub fn import(
        &self,
        sources: &[PathBuf],
        mode: ImportMode,
    ) -> Result<RunSummary, OrganizeError> {
        let filter = ScanFilter::from_config(&self.config.filters)?;
        let scanned = scan::scan(sources, &filter)?;
        let items = scanned
            .into_iter()
            .map(|file| {
                let origin = origin_of(&file.path, sources);
                WorkItem {
                    path: file.path,
                    source: file.source,
                    origin,
                }
            })
            .collect();
        self.run(items, mode)
    }

    /// Re-place files already inside the collection. No paths means the
    /// whole collection.
    pub fn sort(&self, paths: &[PathBuf]) -> Result<RunSummary, OrganizeError> {
        let items = self.collection_items(paths)?;
        self.run(items, ImportMode::Move)
    }

    /// Move near-duplicate images to the duplicates area.
    pub fn compare(&self, paths: &[PathBuf]) -> Result<RunSummary, OrganizeError> {
        let items: Vec<WorkItem> = self
            .collection_items(paths)?
            .into_iter()
            .filter(|item| is_hashable(&item.path))
            .collect();
        self.emit(OrganizeEvent::Started { total: items.len() });

        let mut summary = RunSummary::default();
        let hashed: Vec<Option<Result<MediaFile, FileOutcome>>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| (!self.cancel.is_cancelled()).then(|| self.hashed_file(item)))
                .collect()
        });
        let mut files = Vec::new();
        for result in hashed {
            match result {
                None => summary.cancelled = true,
                Some(Ok(file)) => files.push(file),
                Some(Err(outcome)) => self.record(&mut summary, outcome),
            }
        }

        let log = MoveLog::new(&self.root);
        let report = self
            .matcher
            .compare(&self.root, &files, &self.store, &log, self.dry_run, &self.cancel)?;
        info!(
            "{} duplicate clusters, {} files moved aside",
            report.clusters,
            report.moves.len()
        );
        for mv in report.moves {
            self.record(
                &mut summary,
                FileOutcome::new(mv.from, Some(mv.to), Action::DuplicateRouted),
            );
        }
        for (path, message) in report.errors {
            self.record(&mut summary, FileOutcome::failed(path, message));
        }
        summary.cancelled |= self.cancel.is_cancelled();
        self.finish()?;
        Ok(summary)
    }

    /// Undo the last compare. With nothing logged this is an empty summary.
    pub fn revert_compare(&self) -> Result<RunSummary, OrganizeError> {
        let log = MoveLog::new(&self.root);
        let report = match self
            .matcher
            .revert_compare(&self.root, &self.store, &log, self.dry_run)
        {
            Ok(report) => report,
            Err(SimilarityError::NothingToRevert) => {
                info!("nothing to revert");
                return Ok(RunSummary::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut summary = RunSummary::default();
        for entry in report.restored {
            self.record(
                &mut summary,
                FileOutcome::new(
                    self.root.join(&entry.to),
                    Some(self.root.join(&entry.from)),
                    Action::Moved,
                ),
            );
        }
        for (entry, message) in report.errors {
            self.record(&mut summary, FileOutcome::failed(self.root.join(&entry.to), message));
        }
        self.finish()?;
        Ok(summary)
    }

    /// Verify every record against the file on disk.
    ///
    /// Records that check clean get a fresh `last_verified`; nothing else
    /// changes.
    pub fn check(&self) -> Result<CheckReport, OrganizeError> {
        let report = self.store.check_all(self.workers, &self.cancel)?;
        if !self.dry_run {
            self.store.mark_verified(&report.ok);
            self.store.save()?;
        }
        Ok(report)
    }

    /// Start tracking an existing collection where it lies.
    ///
    /// Writes the stock config when the collection has none and records
    /// every untracked file at its current path.
    pub fn init(&self) -> Result<RunSummary, OrganizeError> {
        let config_file = config::config_path(&self.root);
        if !self.dry_run && !config_file.exists() {
            if let Some(parent) = config_file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_file, stock_config_toml())?;
            info!("wrote {}", config_file.display());
        }

        let items = self.collection_items(&[])?;
        self.emit(OrganizeEvent::Started { total: items.len() });
        let results: Vec<Option<FileOutcome>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    (!self.cancel.is_cancelled()).then(|| {
                        let outcome = self.init_one(item);
                        self.note(&outcome);
                        outcome
                    })
                })
                .collect()
        });

        let mut summary = RunSummary::default();
        for result in results {
            match result {
                Some(outcome) => self.record(&mut summary, outcome),
                None => summary.cancelled = true,
            }
        }
        self.finish()?;
        Ok(summary)
    }

    /// Change the stored snapshot of one tracked file and re-place it.
    ///
    /// Only the snapshot changes; tags inside the file are not rewritten.
    pub fn edit(&self, path: &Path, edits: &[MetadataEdit]) -> Result<RunSummary, OrganizeError> {
        let abs = self.collection_path(path)?;
        let rel = relative_path(&self.root, &abs)
            .ok_or_else(|| OrganizeError::OutsideCollection(abs.clone()))?;
        let record = self
            .store
            .record_for_path(&rel)
            .ok_or_else(|| StoreError::NotTracked(rel.clone()))?;

        let mut summary = RunSummary::default();
        let checksum = sha256_file(&abs)?;
        if checksum != record.checksum {
            warn!("{rel} changed since it was recorded, not editing");
            self.record(
                &mut summary,
                FileOutcome::new(
                    abs,
                    None,
                    Action::ChecksumMismatch {
                        expected: record.checksum,
                        actual: checksum,
                    },
                ),
            );
            return Ok(summary);
        }

        let mut metadata = record.metadata.clone();
        self.apply_edits(&mut metadata, &record.source, edits)?;
        let file = MediaFile {
            path: abs,
            checksum,
            metadata,
            image_hash: None,
            source: record.source.clone(),
            id: Some(record.id.clone()),
        };
        let plan = self.plan(file, Some(record), self.root.clone());
        self.place(vec![plan], ImportMode::Move, &mut summary);
        self.finish()?;
        Ok(summary)
    }

    /// Forget tracked files. A directory removes every record beneath it;
    /// with `delete_files` the files themselves are deleted too.
    pub fn remove(
        &self,
        paths: &[PathBuf],
        delete_files: bool,
    ) -> Result<RunSummary, OrganizeError> {
        let mut summary = RunSummary::default();
        let records = self.store.records();
        for path in paths {
            let abs = self.collection_path(path)?;
            let rel = relative_path(&self.root, &abs)
                .ok_or_else(|| OrganizeError::OutsideCollection(abs.clone()))?;
            let prefix = format!("{rel}/");
            let matched: Vec<&CollectionRecord> = records
                .iter()
                .filter(|r| r.path == rel || r.path.starts_with(&prefix))
                .collect();
            if matched.is_empty() {
                self.record(&mut summary, FileOutcome::failed(abs, "not tracked"));
                continue;
            }
            for record in matched {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                let file = self.root.join(&record.path);
                if !self.dry_run {
                    if delete_files {
                        if let Err(e) = fs::remove_file(&file)
                            && e.kind() != io::ErrorKind::NotFound
                        {
                            self.record(&mut summary, FileOutcome::failed(file, e.to_string()));
                            continue;
                        }
                        if let Some(parent) = file.parent() {
                            fsops::prune_empty_dirs(parent, &self.root);
                        }
                    }
                    self.store.remove(&record.path);
                }
                debug!("removed {}", record.path);
                let outcome = FileOutcome::new(file, None, Action::Removed);
                self.note(&outcome);
                self.record(&mut summary, outcome);
            }
        }
        self.finish()?;
        Ok(summary)
    }

    /// Bring the store back in line with changes made outside mediasort.
    ///
    /// An untracked file whose checksum matches the record of a missing file
    /// takes that record over, since it was moved by hand. Other untracked
    /// files are recorded where they are and records of vanished files are
    /// dropped. Changed files are reported, or re-read and recorded afresh
    /// with `refresh_checksums`.
    pub fn update(&self, refresh_checksums: bool) -> Result<RunSummary, OrganizeError> {
        let filter = ScanFilter::from_config(&self.config.filters)?;
        let items: Vec<WorkItem> = scan::scan(std::slice::from_ref(&self.root), &filter)?
            .into_iter()
            .map(|ScannedFile { path, source }| WorkItem {
                path,
                source,
                origin: self.root.clone(),
            })
            .collect();
        self.emit(OrganizeEvent::Started { total: items.len() });

        let on_disk: HashSet<String> = items
            .iter()
            .filter_map(|item| relative_path(&self.root, &item.path))
            .collect();
        // Records of vanished files by checksum, each list in path order. A
        // file the filters now skip is still there.
        let mut missing: BTreeMap<String, Vec<CollectionRecord>> = BTreeMap::new();
        for record in self.store.records() {
            if !on_disk.contains(&record.path) && !self.root.join(&record.path).exists() {
                missing.entry(record.checksum.clone()).or_default().push(record);
            }
        }

        let reconciled: Vec<Option<Reconciled>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    (!self.cancel.is_cancelled()).then(|| self.reconcile(item, refresh_checksums))
                })
                .collect()
        });

        let mut summary = RunSummary::default();
        let mut new_files = Vec::new();
        for (item, result) in items.iter().zip(reconciled) {
            match result {
                None => summary.cancelled = true,
                Some(Reconciled::Done(outcome)) => {
                    self.note(&outcome);
                    self.record(&mut summary, outcome);
                }
                Some(Reconciled::Untracked { rel, checksum }) => {
                    let moved = missing
                        .get_mut(&checksum)
                        .filter(|records| !records.is_empty())
                        .map(|records| records.remove(0));
                    match moved {
                        Some(record) => {
                            let outcome = self.adopt(&record, item, &rel);
                            self.note(&outcome);
                            self.record(&mut summary, outcome);
                        }
                        None => new_files.push((item, rel, checksum)),
                    }
                }
            }
        }

        let recorded: Vec<Option<FileOutcome>> = self.pool.install(|| {
            new_files
                .par_iter()
                .map(|(item, rel, checksum)| {
                    (!self.cancel.is_cancelled()).then(|| {
                        let outcome = self.record_new(item, rel, checksum.clone());
                        self.note(&outcome);
                        outcome
                    })
                })
                .collect()
        });
        for result in recorded {
            match result {
                Some(outcome) => self.record(&mut summary, outcome),
                None => summary.cancelled = true,
            }
        }

        // A cancelled run may not have seen where a vanished file went.
        if !summary.cancelled {
            for record in missing.into_values().flatten() {
                if !self.dry_run {
                    self.store.remove(&record.path);
                }
                info!("{} is gone, dropping its record", record.path);
                let outcome = FileOutcome::new(self.root.join(&record.path), None, Action::Removed);
                self.note(&outcome);
                self.record(&mut summary, outcome);
            }
        }
        summary.sort();
        self.finish()?;
        Ok(summary)
    }

    /// Delete what does not belong in the collection. No paths means the
    /// whole collection.
    pub fn clean(
        &self,
        paths: &[PathBuf],
        options: CleanOptions,
    ) -> Result<RunSummary, OrganizeError> {
        let dirs = self.scope(paths)?;
        let mut summary = RunSummary::default();
        let mut gone = HashSet::new();

        if options.excluded {
            let filter = ScanFilter::from_config(&self.config.filters)?;
            let excluded: Vec<(PathBuf, String)> = scan::scan(&dirs, &ScanFilter::new(&[], &[])?)?
                .into_iter()
                .filter_map(|file| {
                    let rel = relative_path(&self.root, &file.path)?;
                    filter.is_excluded(Path::new(&rel)).then_some((file.path, rel))
                })
                .collect();
            for (path, rel) in excluded {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                if !self.dry_run {
                    if let Err(e) = fs::remove_file(&path) {
                        self.record(&mut summary, FileOutcome::failed(path, e.to_string()));
                        continue;
                    }
                    self.store.remove(&rel);
                }
                info!("deleted excluded {rel}");
                gone.insert(path.clone());
                let outcome = FileOutcome::new(path, None, Action::Deleted);
                self.note(&outcome);
                self.record(&mut summary, outcome);
            }
        }

        if options.empty_dirs && !summary.cancelled {
            for dir in &dirs {
                for empty in fsops::empty_dirs(dir, &gone) {
                    if self.cancel.is_cancelled() {
                        summary.cancelled = true;
                        break;
                    }
                    if !self.dry_run
                        && let Err(e) = fs::remove_dir(&empty)
                    {
                        self.record(&mut summary, FileOutcome::failed(empty, e.to_string()));
                        continue;
                    }
                    debug!("removed empty directory {}", empty.display());
                    self.record(&mut summary, FileOutcome::new(empty, None, Action::Deleted));
                }
            }
        }
        self.finish()?;
        Ok(summary)
    }

    /// Copy the collection, state included, into `dest`, which must be
    /// missing or empty.
    ///
    /// Refuses to start unless every record checks clean. Each file is
    /// verified against its checksum once copied.
    pub fn clone_to(&self, dest: &Path) -> Result<RunSummary, OrganizeError> {
        let dest = std::path::absolute(dest)?;
        if dest.starts_with(&self.root) {
            return Err(OrganizeError::TargetInsideCollection(dest));
        }
        if dest.exists() && fs::read_dir(&dest)?.next().is_some() {
            return Err(OrganizeError::TargetNotEmpty(dest));
        }

        let report = self.store.check_all(self.workers, &self.cancel)?;
        if !report.is_clean() {
            return Err(OrganizeError::Unclean {
                corrupted: report.corrupted.len(),
                unverified: report.errors.len(),
            });
        }
        let mut summary = RunSummary::default();
        if report.skipped > 0 {
            summary.cancelled = true;
            return Ok(summary);
        }

        let files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(io::Error::from)?
            .into_iter()
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();
        self.emit(OrganizeEvent::Started { total: files.len() });

        let copied: Vec<Option<FileOutcome>> = self.pool.install(|| {
            files
                .par_iter()
                .map(|path| (!self.cancel.is_cancelled()).then(|| self.clone_one(path, &dest)))
                .collect()
        });
        for result in copied {
            match result {
                Some(outcome) => self.record(&mut summary, outcome),
                None => summary.cancelled = true,
            }
        }
        info!("cloned {} files to {}", summary.succeeded, dest.display());
        Ok(summary)
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    fn run(&self, items: Vec<WorkItem>, mode: ImportMode) -> Result<RunSummary, OrganizeError> {
        self.emit(OrganizeEvent::Started { total: items.len() });
        let mut summary = RunSummary::default();

        let prepared: Vec<Option<Result<Plan, FileOutcome>>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| (!self.cancel.is_cancelled()).then(|| self.prepare(item)))
                .collect()
        });
        let mut plans = Vec::new();
        for result in prepared {
            match result {
                None => summary.cancelled = true,
                Some(Ok(plan)) => plans.push(plan),
                Some(Err(outcome)) => self.record(&mut summary, outcome),
            }
        }

        self.place(plans, mode, &mut summary);
        summary.sort();
        self.finish()?;
        Ok(summary)
    }

    /// Phase 1 for one file.
    fn prepare(&self, item: &WorkItem) -> Result<Plan, FileOutcome> {
        let checksum = sha256_file(&item.path)
            .map_err(|e| FileOutcome::failed(item.path.clone(), e.to_string()))?;

        let tracked = relative_path(&self.root, &item.path)
            .and_then(|rel| self.store.record_for_path(&rel));
        let file = match &tracked {
            Some(record) if record.checksum != checksum => {
                warn!("checksum mismatch, leaving {} untouched", item.path.display());
                return Err(FileOutcome::new(
                    item.path.clone(),
                    None,
                    Action::ChecksumMismatch {
                        expected: record.checksum.clone(),
                        actual: checksum,
                    },
                ));
            }
            Some(record) => MediaFile {
                path: item.path.clone(),
                checksum,
                metadata: record.metadata.clone(),
                image_hash: None,
                source: record.source.clone(),
                id: Some(record.id.clone()),
            },
            None => {
                let tags = self.extractor.extract(&item.path).map_err(|e| {
                    warn!("skipping {}: {e}", item.path.display());
                    FileOutcome::failed(item.path.clone(), e.to_string())
                })?;
                MediaFile {
                    path: item.path.clone(),
                    checksum,
                    metadata: self.resolver.resolve(&tags, &item.source),
                    image_hash: None,
                    source: item.source.clone(),
                    id: None,
                }
            }
        };
        Ok(self.plan(file, tracked, item.origin.clone()))
    }

    fn plan(&self, file: MediaFile, tracked: Option<CollectionRecord>, origin: PathBuf) -> Plan {
        let rel = self.format.render(&RenderContext {
            metadata: &file.metadata,
            source: &file.source,
            custom: &self.config.path.custom,
            day_begins: self.config.path.day_begins,
            whitespace_sub: &self.config.path.whitespace_sub,
        });
        Plan {
            native: self.root.join(rel),
            file,
            origin,
            tracked,
        }
    }

    /// Phase 2: decide every destination, then execute wave by wave.
    ///
    /// A file whose destination is only freed by another file leaving it in
    /// this run goes in the wave after that file. Groups within a wave run
    /// in parallel; the store is checkpointed after each wave.
    fn place(&self, plans: Vec<Plan>, mode: ImportMode, summary: &mut RunSummary) {
        for wave in self.decide(plans, mode) {
            let results: Vec<Vec<Option<FileOutcome>>> = self
                .pool
                .install(|| wave.par_iter().map(|group| self.execute_group(group, mode)).collect());
            for outcome in results.into_iter().flatten() {
                match outcome {
                    Some(outcome) => summary.record(outcome),
                    None => summary.cancelled = true,
                }
            }
            self.checkpoint();
        }
    }

    fn decide(&self, plans: Vec<Plan>, mode: ImportMode) -> Vec<Vec<Group>> {
        let mut order: Vec<usize> = (0..plans.len()).collect();
        order.sort_by(|&a, &b| {
            (&plans[a].native, &plans[a].file.path).cmp(&(&plans[b].native, &plans[b].file.path))
        });
        let leaving = match mode {
            ImportMode::Move => plans
                .iter()
                .enumerate()
                .map(|(i, plan)| (plan.file.path.clone(), i))
                .collect(),
            ImportMode::Copy => HashMap::new(),
        };
        let mut decider = Decider {
            organizer: self,
            plans: &plans,
            claimed: plans.iter().map(|plan| plan.native.clone()).collect(),
            taken: HashMap::new(),
            leaving,
            deciding: HashSet::new(),
            decided: vec![None; plans.len()],
        };
        for &i in &order {
            decider.decide(i);
        }
        let mut decided = std::mem::take(&mut decider.decided);

        let mut waves: Vec<BTreeMap<PathBuf, Vec<Step>>> = Vec::new();
        let mut slots: Vec<Option<Plan>> = plans.into_iter().map(Some).collect();
        for i in order {
            let Some(plan) = slots[i].take() else { continue };
            let (decision, wave) = decided[i]
                .take()
                .unwrap_or_else(|| (Decision::Failed("no destination decided".into()), 0));
            if waves.len() <= wave {
                waves.resize_with(wave + 1, BTreeMap::new);
            }
            waves[wave]
                .entry(plan.native.clone())
                .or_default()
                .push(Step { plan, decision });
        }
        waves
            .into_iter()
            .map(|groups| {
                groups
                    .into_iter()
                    .map(|(native, steps)| Group { native, steps })
                    .collect()
            })
            .collect()
    }

    fn similar_images(&self, a: &Path, b: &Path) -> bool {
        if !is_hashable(a) || !is_hashable(b) {
            return false;
        }
        match (ImageHash::from_path(a), ImageHash::from_path(b)) {
            (Ok(x), Ok(y)) => self.matcher.is_similar(x, y),
            _ => false,
        }
    }

    fn route(
        &self,
        file: &MediaFile,
        occupant: &Path,
        taken: &mut HashMap<PathBuf, Taken>,
    ) -> Decision {
        let folder = self.matcher.duplicates_folder(&self.root, occupant);
        let native = folder.join(file.path.file_name().unwrap_or_default());
        let mut dest = native.clone();
        let mut n = 0;
        while taken.contains_key(&dest) || dest.exists() {
            n += 1;
            dest = fsops::suffixed(&native, n);
        }
        taken.insert(
            dest.clone(),
            Taken {
                checksum: file.checksum.clone(),
                source: file.path.clone(),
            },
        );
        info!(
            "{} is similar to {}, routing to duplicates",
            file.path.display(),
            occupant.display()
        );
        Decision::Route { dest }
    }

    fn execute_group(&self, group: &Group, mode: ImportMode) -> Vec<Option<FileOutcome>> {
        let lock = self.locks.lock_for(&group.native);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        group
            .steps
            .iter()
            .map(|step| {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let outcome = self.execute(step, mode);
                self.note(&outcome);
                self.emit(OrganizeEvent::Outcome(outcome.clone()));
                Some(outcome)
            })
            .collect()
    }

    fn execute(&self, step: &Step, mode: ImportMode) -> FileOutcome {
        let plan = &step.plan;
        let file = &plan.file;
        let source = file.path.clone();
        match &step.decision {
            Decision::Failed(message) => FileOutcome::failed(source, message.clone()),
            Decision::AlreadyPresent { dest } => {
                debug!("{} already present at {}", source.display(), dest.display());
                FileOutcome::new(source, Some(dest.clone()), Action::AlreadyPresent)
            }
            Decision::InPlace => self.execute_in_place(plan),
            Decision::Transfer { dest, conflict } => {
                let action = match mode {
                    ImportMode::Move => Action::Moved,
                    ImportMode::Copy => Action::Copied,
                };
                match self.transfer(plan, dest, mode, false) {
                    Ok(()) => FileOutcome::new(source, Some(dest.clone()), action)
                        .with_conflict(*conflict),
                    Err(e) => FileOutcome::failed(source, e.to_string()),
                }
            }
            Decision::Route { dest } => match self.transfer(plan, dest, mode, true) {
                Ok(()) => FileOutcome::new(source, Some(dest.clone()), Action::DuplicateRouted)
                    .with_conflict(true),
                Err(e) => FileOutcome::failed(source, e.to_string()),
            },
        }
    }

    fn execute_in_place(&self, plan: &Plan) -> FileOutcome {
        let file = &plan.file;
        let source = file.path.clone();
        let Some(rel) = relative_path(&self.root, &file.path) else {
            return FileOutcome::failed(source, "outside the collection");
        };
        let action = match &plan.tracked {
            Some(record) if record.metadata == file.metadata => Action::AlreadyOrganized,
            Some(_) => {
                if !self.dry_run
                    && let Err(e) = self.store.update_metadata(&rel, file.metadata.clone())
                {
                    return FileOutcome::failed(source, e.to_string());
                }
                Action::Updated
            }
            None => {
                if !self.dry_run {
                    self.store.upsert(file, &rel);
                }
                Action::Recorded
            }
        };
        FileOutcome::new(source.clone(), Some(source), action)
    }

    /// Move or copy one file to `dest` and record it.
    fn transfer(&self, plan: &Plan, dest: &Path, mode: ImportMode, routed: bool) -> io::Result<()> {
        let file = &plan.file;
        if self.dry_run {
            return Ok(());
        }
        if dest.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} appeared during the run", dest.display()),
            ));
        }
        let rel = relative_path(&self.root, dest)
            .ok_or_else(|| {
                io::Error::other(format!("{} is outside the collection", dest.display()))
            })?;

        match mode {
            ImportMode::Move => {
                fsops::move_file(&file.path, dest, &file.checksum)?;
                self.store.upsert(file, &rel);
            }
            ImportMode::Copy => {
                fsops::copy_file(&file.path, dest, &file.checksum)?;
                // The source keeps its identity; the copy is a new file.
                let copy = MediaFile {
                    id: None,
                    ..file.clone()
                };
                self.store.upsert(&copy, &rel);
            }
        }
        debug!("{} -> {}", file.path.display(), rel);

        if routed && let Some(from) = relative_path(&self.root, &file.path) {
            let log = MoveLog::new(&self.root);
            if let Err(e) = log.append(&MoveEntry { from, to: rel }) {
                warn!("could not log duplicate move: {e}");
            }
        }
        if mode == ImportMode::Move
            && let Some(parent) = file.path.parent()
        {
            fsops::prune_empty_dirs(parent, &plan.origin);
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn init_one(&self, item: &WorkItem) -> FileOutcome {
        let source = item.path.clone();
        let checksum = match sha256_file(&item.path) {
            Ok(c) => c,
            Err(e) => return FileOutcome::failed(source, e.to_string()),
        };
        let Some(rel) = relative_path(&self.root, &item.path) else {
            return FileOutcome::failed(source, "outside the collection");
        };
        if let Some(record) = self.store.record_for_path(&rel) {
            let action = if record.checksum == checksum {
                Action::AlreadyOrganized
            } else {
                Action::ChecksumMismatch {
                    expected: record.checksum,
                    actual: checksum,
                }
            };
            return FileOutcome::new(source.clone(), Some(source), action);
        }
        self.record_new(item, &rel, checksum)
    }

    /// Extract and record an untracked file where it lies.
    fn record_new(&self, item: &WorkItem, rel: &str, checksum: String) -> FileOutcome {
        let source = item.path.clone();
        let tags = match self.extractor.extract(&item.path) {
            Ok(tags) => tags,
            Err(e) => {
                warn!("skipping {}: {e}", item.path.display());
                return FileOutcome::failed(source, e.to_string());
            }
        };
        let file = MediaFile {
            path: item.path.clone(),
            checksum,
            metadata: self.resolver.resolve(&tags, &item.source),
            image_hash: None,
            source: item.source.clone(),
            id: None,
        };
        if !self.dry_run {
            self.store.upsert(&file, rel);
        }
        FileOutcome::new(source.clone(), Some(source), Action::Recorded)
    }

    fn reconcile(&self, item: &WorkItem, refresh_checksums: bool) -> Reconciled {
        let path = item.path.clone();
        let checksum = match sha256_file(&path) {
            Ok(c) => c,
            Err(e) => return Reconciled::Done(FileOutcome::failed(path, e.to_string())),
        };
        let Some(rel) = relative_path(&self.root, &path) else {
            return Reconciled::Done(FileOutcome::failed(path, "outside the collection"));
        };
        let Some(record) = self.store.record_for_path(&rel) else {
            return Reconciled::Untracked { rel, checksum };
        };
        if record.checksum == checksum {
            let outcome = FileOutcome::new(path.clone(), Some(path), Action::AlreadyOrganized);
            return Reconciled::Done(outcome);
        }
        if !refresh_checksums {
            warn!("{rel} changed since it was recorded");
            let action = Action::ChecksumMismatch {
                expected: record.checksum,
                actual: checksum,
            };
            return Reconciled::Done(FileOutcome::new(path, None, action));
        }

        let tags = match self.extractor.extract(&path) {
            Ok(tags) => tags,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                return Reconciled::Done(FileOutcome::failed(path, e.to_string()));
            }
        };
        let file = MediaFile {
            path: path.clone(),
            checksum,
            metadata: self.resolver.resolve(&tags, &record.source),
            image_hash: None,
            source: record.source.clone(),
            id: Some(record.id),
        };
        if !self.dry_run {
            self.store.upsert(&file, &rel);
        }
        info!("{rel} changed, re-read its metadata");
        Reconciled::Done(FileOutcome::new(path.clone(), Some(path), Action::Updated))
    }

    /// Point the record of a vanished file at the file that has its content.
    fn adopt(&self, record: &CollectionRecord, item: &WorkItem, rel: &str) -> FileOutcome {
        if !self.dry_run
            && let Err(e) = self.store.relocate(&record.path, rel)
        {
            return FileOutcome::failed(item.path.clone(), e.to_string());
        }
        info!("{} was moved to {rel}", record.path);
        FileOutcome::new(
            self.root.join(&record.path),
            Some(item.path.clone()),
            Action::Relocated,
        )
    }

    fn clone_one(&self, path: &Path, dest: &Path) -> FileOutcome {
        let Some(rel) = relative_path(&self.root, path) else {
            return FileOutcome::failed(path.to_path_buf(), "outside the collection");
        };
        let target = dest.join(&rel);
        if !self.dry_run {
            let copied = match self.store.record_for_path(&rel) {
                Some(record) => fsops::copy_file(path, &target, &record.checksum),
                None => sha256_file(path)
                    .and_then(|checksum| fsops::copy_file(path, &target, &checksum)),
            };
            if let Err(e) = copied {
                return FileOutcome::failed(path.to_path_buf(), e.to_string());
            }
        }
        FileOutcome::new(path.to_path_buf(), Some(target), Action::Copied)
    }

    /// A collection image with its perceptual hash and best known metadata.
    fn hashed_file(&self, item: &WorkItem) -> Result<MediaFile, FileOutcome> {
        let failed = |message: String| FileOutcome::failed(item.path.clone(), message);
        let hash = ImageHash::from_path(&item.path).map_err(|e| failed(e.to_string()))?;
        let record = relative_path(&self.root, &item.path)
            .and_then(|rel| self.store.record_for_path(&rel));
        let (checksum, metadata, id) = match record {
            Some(record) => (record.checksum, record.metadata, Some(record.id)),
            None => {
                let checksum = sha256_file(&item.path).map_err(|e| failed(e.to_string()))?;
                let metadata = self
                    .extractor
                    .extract(&item.path)
                    .map(|tags| self.resolver.resolve(&tags, &item.source))
                    .unwrap_or_default();
                (checksum, metadata, None)
            }
        };
        Ok(MediaFile {
            path: item.path.clone(),
            checksum,
            metadata,
            image_hash: Some(hash.0),
            source: item.source.clone(),
            id,
        })
    }

    fn apply_edits(
        &self,
        meta: &mut MediaMetadata,
        source: &SourceInfo,
        edits: &[MetadataEdit],
    ) -> Result<(), OrganizeError> {
        let mut coords_changed = false;
        let mut place_edited = false;
        let mut date_changed = false;
        for edit in edits {
            let value = edit.value.clone();
            match edit.field.as_str() {
                "title" => meta.title = value,
                "album" => meta.album = value,
                "camera_make" => meta.camera_make = value,
                "camera_model" => meta.camera_model = value,
                "original_name" => {
                    meta.original_name = value;
                    date_changed = true;
                }
                "date_original" => {
                    meta.date_original = match value {
                        Some(v) => Some(parse_date(&Value::String(v.clone())).ok_or_else(|| {
                            OrganizeError::InvalidEdit(format!("'{v}' is not a date"))
                        })?),
                        None => None,
                    };
                    date_changed = true;
                }
                "latitude" | "longitude" => {
                    let parsed = match value {
                        Some(v) => Some(parse_coordinate(&Value::String(v.clone())).ok_or_else(|| {
                            OrganizeError::InvalidEdit(format!("'{v}' is not a coordinate"))
                        })?),
                        None => None,
                    };
                    if edit.field == "latitude" {
                        meta.latitude = parsed;
                    } else {
                        meta.longitude = parsed;
                    }
                    coords_changed = true;
                }
                "city" => {
                    meta.place.city = value;
                    place_edited = true;
                }
                "state" => {
                    meta.place.state = value;
                    place_edited = true;
                }
                "country" => {
                    meta.place.country = value;
                    place_edited = true;
                }
                "location" => {
                    meta.place.location = value;
                    place_edited = true;
                }
                other => {
                    return Err(OrganizeError::InvalidEdit(format!("unknown field '{other}'")));
                }
            }
        }
        if coords_changed && !place_edited {
            meta.place = Default::default();
            self.resolver.fill_place(meta);
        }
        if date_changed {
            self.resolver.fill_date_media(meta, source);
        }
        Ok(())
    }

    /// Collection files under `paths` (whole collection when empty).
    fn collection_items(&self, paths: &[PathBuf]) -> Result<Vec<WorkItem>, OrganizeError> {
        let filter = ScanFilter::from_config(&self.config.filters)?
            .skip_dir(self.config.similarity.duplicates_dir.clone());
        let sources = self.scope(paths)?;
        Ok(scan::scan(&sources, &filter)?
            .into_iter()
            .map(|ScannedFile { path, source }| WorkItem {
                path,
                source,
                origin: self.root.clone(),
            })
            .collect())
    }

    /// `paths` resolved inside the collection, or the root when empty.
    fn scope(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, OrganizeError> {
        if paths.is_empty() {
            return Ok(vec![self.root.clone()]);
        }
        paths.iter().map(|p| self.collection_path(p)).collect()
    }

    /// Resolve a user path against the collection root; it must lie inside.
    fn collection_path(&self, path: &Path) -> Result<PathBuf, OrganizeError> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let inside = abs.starts_with(&self.root)
            && !abs.components().any(|c| c == Component::ParentDir)
            && !abs
                .strip_prefix(&self.root)
                .is_ok_and(|rel| rel.starts_with(STATE_DIR));
        if inside {
            Ok(abs)
        } else {
            Err(OrganizeError::OutsideCollection(abs))
        }
    }

    /// Count a store change and save every `processing.save_every` changes.
    fn note(&self, outcome: &FileOutcome) {
        if self.dry_run || !outcome.action.is_success() {
            return;
        }
        let mut unsaved = self.unsaved.lock().unwrap_or_else(PoisonError::into_inner);
        *unsaved += 1;
        if *unsaved >= self.config.processing.save_every {
            self.save_store(&mut unsaved);
        }
    }

    /// Save pending store changes now.
    fn checkpoint(&self) {
        let mut unsaved = self.unsaved.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dry_run && *unsaved > 0 {
            self.save_store(&mut unsaved);
        }
    }

    fn save_store(&self, unsaved: &mut usize) {
        match self.store.save() {
            Ok(()) => {
                debug!("store saved after {unsaved} changes");
                *unsaved = 0;
            }
            // The final save in `finish` reports the error.
            Err(e) => warn!("could not checkpoint the store: {e}"),
        }
    }

    fn record(&self, summary: &mut RunSummary, outcome: FileOutcome) {
        self.emit(OrganizeEvent::Outcome(outcome.clone()));
        summary.record(outcome);
    }

    fn emit(&self, event: OrganizeEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Persist the store and the places resolved during this run.
    fn finish(&self) -> Result<(), OrganizeError> {
        if self.dry_run {
            return Ok(());
        }
        if let Some(geo) = &self.geo {
            for (key, place) in geo.resolved_places() {
                self.store.insert_place(key, place);
            }
        }
        self.store.save()?;
        Ok(())
    }
}

/// What currently sits at a candidate destination.
enum Occupant {
    /// Free now, or once the file there has left in wave `wave - 1`.
    Free { wave: usize },
    File { checksum: String, source: PathBuf },
}

/// The decision pass of one run.
///
/// Plans are decided in destination order. A destination held by a file
/// that is itself moving in this run is decided for that file first: if it
/// leaves, the destination is free one wave later. Cycles fall back to
/// treating the destination as occupied.
struct Decider<'a> {
    organizer: &'a Organizer,
    plans: &'a [Plan],
    /// Every native destination of this run.
    claimed: HashSet<PathBuf>,
    taken: HashMap<PathBuf, Taken>,
    /// Plans by the path their file occupies now, when it may leave it.
    leaving: HashMap<PathBuf, usize>,
    deciding: HashSet<usize>,
    decided: Vec<Option<(Decision, usize)>>,
}

impl Decider<'_> {
    fn decide(&mut self, i: usize) {
        if self.decided[i].is_some() || !self.deciding.insert(i) {
            return;
        }
        let result = self
            .decide_plan(i)
            .unwrap_or_else(|e| (Decision::Failed(e.to_string()), 0));
        self.deciding.remove(&i);
        self.decided[i] = Some(result);
    }

    fn decide_plan(&mut self, i: usize) -> io::Result<(Decision, usize)> {
        let plans = self.plans;
        let organizer = self.organizer;
        let plan = &plans[i];
        let file = &plan.file;
        let mut n = 0;
        let mut dest = plan.native.clone();
        loop {
            if dest == file.path {
                return Ok((Decision::InPlace, 0));
            }
            let skip_claimed = n > 0 && self.claimed.contains(&dest);
            if !skip_claimed {
                match self.occupant(&dest)? {
                    Occupant::Free { wave } => {
                        self.taken.insert(
                            dest.clone(),
                            Taken {
                                checksum: file.checksum.clone(),
                                source: file.path.clone(),
                            },
                        );
                        if n > 0 {
                            info!("{} taken, using {}", plan.native.display(), dest.display());
                        }
                        return Ok((Decision::Transfer { dest, conflict: n > 0 }, wave));
                    }
                    Occupant::File { checksum, .. } if checksum == file.checksum => {
                        return Ok((Decision::AlreadyPresent { dest }, 0));
                    }
                    Occupant::File { source, .. } => {
                        if n == 0
                            && organizer.config.similarity.route_similar_conflicts
                            && organizer.similar_images(&file.path, &source)
                        {
                            return Ok((organizer.route(file, &dest, &mut self.taken), 0));
                        }
                    }
                }
            }
            n += 1;
            dest = fsops::suffixed(&plan.native, n);
        }
    }

    fn occupant(&mut self, dest: &Path) -> io::Result<Occupant> {
        if let Some(t) = self.taken.get(dest) {
            return Ok(Occupant::File {
                checksum: t.checksum.clone(),
                source: t.source.clone(),
            });
        }
        if !dest.exists() {
            return Ok(Occupant::Free { wave: 0 });
        }
        if let Some(&j) = self.leaving.get(dest) {
            self.decide(j);
            if let Some((decision, wave)) = &self.decided[j]
                && matches!(decision, Decision::Transfer { .. } | Decision::Route { .. })
            {
                debug!("{} is vacated in this run", dest.display());
                return Ok(Occupant::Free { wave: wave + 1 });
            }
        }
        Ok(Occupant::File {
            checksum: sha256_file(dest)?,
            source: dest.to_path_buf(),
        })
    }
}

/// The source argument a scanned file came from: the longest matching
/// directory, or the file's own parent.
fn origin_of(path: &Path, sources: &[PathBuf]) -> PathBuf {
    sources
        .iter()
        .filter(|s| s.is_dir() && path.starts_with(s))
        .max_by_key(|s| s.components().count())
        .cloned()
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_default()
}
