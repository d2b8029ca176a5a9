//! Shared types passed between the resolver, the template engine, the store
//! and the organizer.
//!
//! Everything here is plain data. [`MediaMetadata`] is serialized into the
//! integrity store as the per-file snapshot, so field names are part of the
//! on-disk format.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stable identity of a file inside a collection.
///
/// Assigned on first import and kept across moves and renames; the
/// recorded path changes, the id does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Place names resolved from coordinates.
///
/// `location` is the most specific name available (city, town, village,
/// state, then country), used by the `<location>` placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPlace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl GeoPlace {
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.state.is_none()
            && self.city.is_none()
            && self.location.is_none()
    }
}

/// Canonical metadata for one media file.
///
/// Every field is independently optional: an absent field means no
/// candidate tag resolved, which is a degraded result rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_original: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<NaiveDateTime>,
    /// Date used for rendering `%`-formats; chosen by the resolver's
    /// date policy from the three dates above or the filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_media: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "GeoPlace::is_empty")]
    pub place: GeoPlace,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

impl MediaMetadata {
    /// Number of resolved canonical fields.
    ///
    /// Used as the first tie-break when choosing which member of a
    /// duplicate cluster to keep. `date_media` is derived, so it is not
    /// counted; the place counts once if any part of it resolved.
    pub fn resolved_field_count(&self) -> usize {
        let dates = [self.date_original, self.date_created, self.date_modified]
            .iter()
            .filter(|d| d.is_some())
            .count();
        let coords = [self.latitude, self.longitude]
            .iter()
            .filter(|c| c.is_some())
            .count();
        let texts = [
            &self.title,
            &self.album,
            &self.camera_make,
            &self.camera_model,
            &self.original_name,
        ]
        .iter()
        .filter(|t| t.is_some())
        .count();
        dates + coords + texts + usize::from(!self.place.is_empty())
    }
}

/// Where a file came from when it entered the collection.
///
/// Kept in the store so later re-renders (sort, edit) see the same
/// `<folder>`, `<folders>` and `<basename>` values as the first import,
/// which keeps repeated runs idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Directory segments between the source root and the file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdirs: Vec<String>,
    /// Filename at first import.
    pub filename: String,
}

/// A media file flowing through the organizer pipeline.
#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Current absolute path.
    pub path: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub checksum: String,
    pub metadata: MediaMetadata,
    /// Perceptual hash, images only.
    pub image_hash: Option<u64>,
    pub source: SourceInfo,
    /// Present when the file is already tracked by the store.
    pub id: Option<FileId>,
}

/// Cooperative cancellation flag shared between the CLI and workers.
///
/// Long operations check it between files; work already finished is kept
/// and recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
