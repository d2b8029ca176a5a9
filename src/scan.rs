//! Media file discovery.
//!
//! Walks source paths and returns the files the organizer should consider,
//! in path order so every run sees the same sequence. A source may be a
//! single file or a directory tree.
//!
//! ## Filtering
//!
//! - **Extensions**: case-insensitive match against `filters.extensions`;
//!   an empty list accepts every file.
//! - **Exclusions**: `filters.exclude` globs, matched against the path
//!   relative to the walked source.
//! - **State**: the `.mediasort` directory is never entered, nor are any
//!   extra directory names the caller passes (the duplicates area when
//!   walking a collection root).
//!
//! Each discovered file carries its [`SourceInfo`]: the directory segments
//! between the walked source and the file, which feed `<folder>` and
//! `<folders>`.

use crate::config::{FiltersConfig, STATE_DIR};
use crate::types::SourceInfo;
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Source not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),
}

/// A file found by [`scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub source: SourceInfo,
}

/// Which files a walk returns.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    exclude: GlobSet,
    extensions: HashSet<String>,
    skip_dirs: HashSet<String>,
}

impl ScanFilter {
    pub fn new(exclude: &[String], extensions: &[String]) -> Result<Self, ScanError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            exclude: builder.build()?,
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            skip_dirs: HashSet::from([STATE_DIR.to_string()]),
        })
    }

    pub fn from_config(config: &FiltersConfig) -> Result<Self, ScanError> {
        Self::new(&config.exclude, &config.extensions)
    }

    /// Also skip directories with this name at the top of the walk.
    pub fn skip_dir(mut self, name: impl Into<String>) -> Self {
        self.skip_dirs.insert(name.into());
        self
    }

    /// Whether the extension of `path` is accepted.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }

    /// Whether a file at `rel` (relative to the walked source) is returned.
    pub fn accepts(&self, rel: &Path) -> bool {
        self.accepts_extension(rel) && !self.is_excluded(rel)
    }

    /// Whether `rel` matches an exclude glob, whatever its extension.
    pub fn is_excluded(&self, rel: &Path) -> bool {
        self.exclude.is_match(rel)
    }
}

/// Discover media files under each of `sources`, sorted by path.
///
/// Unreadable entries are logged and skipped; a missing source is an error.
pub fn scan(sources: &[PathBuf], filter: &ScanFilter) -> Result<Vec<ScannedFile>, ScanError> {
    let mut files = Vec::new();
    for source in sources {
        if !source.exists() {
            return Err(ScanError::NotFound(source.clone()));
        }
        if source.is_file() {
            let filename = file_name(source);
            if filter.accepts_extension(source) && !filter.exclude.is_match(&filename) {
                files.push(ScannedFile {
                    path: source.clone(),
                    source: SourceInfo {
                        subdirs: Vec::new(),
                        filename,
                    },
                });
            }
            continue;
        }
        walk_dir(source, filter, &mut files);
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    debug!("scan found {} files", files.len());
    Ok(files)
}

fn walk_dir(root: &Path, filter: &ScanFilter, files: &mut Vec<ScannedFile>) {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            let skipped = name == STATE_DIR
                || (entry.depth() == 1 && filter.skip_dirs.contains(name.as_ref()));
            !skipped
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !filter.accepts(rel) {
            continue;
        }
        let subdirs = rel
            .parent()
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        files.push(ScannedFile {
            path: entry.path().to_path_buf(),
            source: SourceInfo {
                subdirs,
                filename: file_name(entry.path()),
            },
        });
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }

    fn rels(root: &Path, files: &[ScannedFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn default_filter() -> ScanFilter {
        ScanFilter::from_config(&FiltersConfig::default()).unwrap()
    }

    #[test]
    fn finds_media_sorted_with_source_info() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "trip/day 2/b.JPG");
        touch(tmp.path(), "trip/a.mov");
        touch(tmp.path(), "notes.txt");

        let files = scan(&[tmp.path().to_path_buf()], &default_filter()).unwrap();

        assert_eq!(rels(tmp.path(), &files), vec!["trip/a.mov", "trip/day 2/b.JPG"]);
        assert_eq!(files[1].source.subdirs, vec!["trip", "day 2"]);
        assert_eq!(files[1].source.filename, "b.JPG");
    }

    #[test]
    fn skips_state_dir() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".mediasort/thumb.jpg");
        touch(tmp.path(), "a.jpg");

        let files = scan(&[tmp.path().to_path_buf()], &default_filter()).unwrap();
        assert_eq!(rels(tmp.path(), &files), vec!["a.jpg"]);
    }

    #[test]
    fn skip_dir_applies_only_at_top_level() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "_duplicates/x/a.jpg");
        touch(tmp.path(), "2015/_duplicates/b.jpg");

        let filter = default_filter().skip_dir("_duplicates");
        let files = scan(&[tmp.path().to_path_buf()], &filter).unwrap();
        assert_eq!(rels(tmp.path(), &files), vec!["2015/_duplicates/b.jpg"]);
    }

    #[test]
    fn exclude_globs_are_relative() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "keep/a.jpg");
        touch(tmp.path(), "keep/.thumbnails/a.jpg");
        touch(tmp.path(), "raw/b.jpg");

        let filter = ScanFilter::new(
            &["**/.thumbnails/**".into(), "raw/**".into()],
            &["jpg".into()],
        )
        .unwrap();
        let files = scan(&[tmp.path().to_path_buf()], &filter).unwrap();
        assert_eq!(rels(tmp.path(), &files), vec!["keep/a.jpg"]);
        assert!(filter.is_excluded(Path::new("raw/notes.txt")));
        assert!(!filter.is_excluded(Path::new("keep/notes.txt")));
    }

    #[test]
    fn empty_extension_list_accepts_everything() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.xyz");
        let filter = ScanFilter::new(&[], &[]).unwrap();
        assert_eq!(scan(&[tmp.path().to_path_buf()], &filter).unwrap().len(), 1);
    }

    #[test]
    fn single_file_source() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.png");
        let files = scan(&[tmp.path().join("a.png")], &default_filter()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].source.subdirs.is_empty());
    }

    #[test]
    fn overlapping_sources_are_deduplicated() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.png");
        let sources = vec![tmp.path().to_path_buf(), tmp.path().join("a.png")];
        assert_eq!(scan(&sources, &default_filter()).unwrap().len(), 1);
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            scan(&[tmp.path().join("nope")], &default_filter()),
            Err(ScanError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        assert!(ScanFilter::new(&["[".into()], &[]).is_err());
    }
}
