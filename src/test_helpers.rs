//! Shared test utilities for the mediasort test suite.
//!
//! Provides a fake geocoder, tag map and media file builders, image writers
//! for the similarity tests, and a ready-made organizer over a temp
//! collection.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (sources, root) = (TempDir::new().unwrap(), TempDir::new().unwrap());
//! let photo = write_file(sources.path(), "trip/img_3900.jpg", b"img 3900");
//! let extractor = CannedExtractor::new().with(b"img 3900", dated_tags("2015:06:29 16:34:14"));
//! let organizer = organizer(root.path(), extractor);
//! ```

use crate::config::Config;
use crate::extract::TagExtractor;
use crate::extract::tests::CannedExtractor;
use crate::geo::{GeoError, Geocoder};
use crate::metadata::TagMap;
use crate::organize::Organizer;
use crate::store::sha256_file;
use crate::types::{GeoPlace, MediaFile, MediaMetadata, SourceInfo};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

// =========================================================================
// Geocoding
// =========================================================================

/// Geocoder answering every coordinate with the same canned result.
pub struct FakeGeocoder {
    place: Option<GeoPlace>,
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeGeocoder {
    fn new(place: Option<GeoPlace>, fail: bool) -> Self {
        Self {
            place,
            fail,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_city(city: &str) -> Self {
        Self::new(
            Some(GeoPlace {
                city: Some(city.into()),
                location: Some(city.into()),
                ..Default::default()
            }),
            false,
        )
    }

    /// Answers "no place here" for every coordinate.
    pub fn nowhere() -> Self {
        Self::new(None, false)
    }

    /// Every request fails.
    pub fn failing() -> Self {
        Self::new(None, true)
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for FakeGeocoder {
    fn reverse_geocode(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Option<GeoPlace>, GeoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail {
            return Err(GeoError::Response("service unavailable".into()));
        }
        Ok(self.place.clone())
    }
}

// =========================================================================
// Tags and media files
// =========================================================================

pub fn tag_map(pairs: &[(&str, Value)]) -> TagMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Tags carrying only `EXIF:DateTimeOriginal`.
pub fn dated_tags(date: &str) -> TagMap {
    tag_map(&[("EXIF:DateTimeOriginal", json!(date))])
}

/// Tags with a capture date and GPS coordinates.
pub fn located_tags(date: &str, latitude: f64, longitude: f64) -> TagMap {
    tag_map(&[
        ("EXIF:DateTimeOriginal", json!(date)),
        ("Composite:GPSLatitude", json!(latitude)),
        ("Composite:GPSLongitude", json!(longitude)),
    ])
}

/// An untracked [`MediaFile`] for an existing file, with its real checksum.
///
/// Paths that do not exist get an empty checksum, which is enough for tests
/// that only look at metadata.
pub fn media_file(path: &Path) -> MediaFile {
    MediaFile {
        path: path.to_path_buf(),
        checksum: sha256_file(path).unwrap_or_default(),
        metadata: MediaMetadata::default(),
        image_hash: None,
        source: SourceInfo {
            subdirs: Vec::new(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        },
        id: None,
    }
}

// =========================================================================
// Filesystem fixtures
// =========================================================================

/// Write `content` at `root/rel`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

/// Grayscale ramp from black on the left to white on the right.
pub fn write_gradient_png(path: &Path, width: u32, height: u32) {
    let img = image::GrayImage::from_fn(width, height, |x, _| {
        image::Luma([(x * 255 / (width - 1).max(1)) as u8])
    });
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(path).unwrap();
}

/// Grayscale ramp from black at the top to white at the bottom.
pub fn write_vertical_gradient_png(path: &Path, width: u32, height: u32) {
    let img = image::GrayImage::from_fn(width, height, |_, y| {
        image::Luma([(y * 255 / (height - 1).max(1)) as u8])
    });
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(path).unwrap();
}

/// Relative paths of every regular file under `root`, skipping the state
/// directory, sorted.
pub fn collection_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| crate::store::relative_path(root, e.path()))
        .filter(|rel| !rel.starts_with(".mediasort/"))
        .collect();
    files.sort();
    files
}

// =========================================================================
// Organizer setup
// =========================================================================

/// Stock config with the geocoder throttle disabled.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.geolocation.min_interval_ms = 0;
    config.processing.max_processes = Some(2);
    config
}

/// Organizer over `root` with a canned extractor and no geocoder.
pub fn organizer(root: &Path, extractor: CannedExtractor) -> Organizer {
    organizer_with(root, test_config(), Arc::new(extractor), None)
}

pub fn organizer_with(
    root: &Path,
    config: Config,
    extractor: Arc<dyn TagExtractor>,
    geocoder: Option<Arc<dyn Geocoder>>,
) -> Organizer {
    Organizer::new(root, config, extractor, geocoder).unwrap()
}
