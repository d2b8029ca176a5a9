//! Collection configuration.
//!
//! Each collection keeps its settings in `<root>/.mediasort/config.toml`.
//! The file is sparse: stock defaults are serialized to a TOML table, the
//! user file is merged on top key by key, and the result is deserialized and
//! validated. Unknown keys are rejected to catch typos early.
//!
//! ```toml
//! [path]
//! dirs_path = "<%Y>/<%m-%b>-<city>"
//! name = "<%Y%m%d-%H%M%S>-<basename>"
//! day_begins = 0
//! whitespace_sub = "_"
//! custom = ""
//!
//! [metadata]
//! use_date_filename = true
//! use_file_dates = false
//! album_from_folder = false
//! ignore_tags = []
//!
//! [metadata.tags]           # per-field candidate lists, first match wins
//! date_original = ["EXIF:DateTimeOriginal", "H264:DateTimeOriginal"]
//!
//! [geolocation]
//! enabled = true
//! base_url = "https://nominatim.openstreetmap.org"
//! prefer_english_names = false
//! timeout_secs = 10
//! precision = 2
//! min_interval_ms = 1000
//!
//! [similarity]
//! threshold = 12
//! duplicates_dir = "_duplicates"
//! route_similar_conflicts = false
//!
//! [processing]
//! max_processes = 4         # omit for auto = available parallelism
//! save_every = 100          # store checkpoint interval, in files
//!
//! [import]
//! mode = "move"             # or "copy"
//!
//! [filters]
//! exclude = ["**/.thumbnails/**"]
//! extensions = ["jpg", "jpeg", "mov", ...]
//! ```

use crate::metadata::TagPriorities;
use crate::template::{PathFormat, TemplateError};
use globset::Glob;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-collection state directory, relative to the collection root.
pub const STATE_DIR: &str = ".mediasort";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Invalid path template: {0}")]
    Template(#[from] TemplateError),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Collection configuration loaded from `.mediasort/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Destination layout templates.
    pub path: PathConfig,
    /// Tag resolution policy.
    pub metadata: MetadataConfig,
    /// Reverse geocoding.
    pub geolocation: GeolocationConfig,
    /// Near-duplicate detection.
    pub similarity: SimilarityConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Import behavior.
    pub import: ImportConfig,
    /// Which files are considered media.
    pub filters: FiltersConfig,
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        PathFormat::new(&self.path.dirs_path, &self.path.name)?;
        if self.similarity.threshold > 64 {
            return Err(ConfigError::Validation(
                "similarity.threshold must be 0-64".into(),
            ));
        }
        if self.similarity.duplicates_dir.trim().is_empty()
            || self.similarity.duplicates_dir.contains(['/', '\\'])
        {
            return Err(ConfigError::Validation(
                "similarity.duplicates_dir must be a single directory name".into(),
            ));
        }
        if self.path.day_begins > 23 {
            return Err(ConfigError::Validation(
                "path.day_begins must be 0-23".into(),
            ));
        }
        if self.processing.save_every == 0 {
            return Err(ConfigError::Validation(
                "processing.save_every must be at least 1".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.geolocation.precision > 6 {
            return Err(ConfigError::Validation(
                "geolocation.precision must be 0-6".into(),
            ));
        }
        for pattern in &self.metadata.ignore_tags {
            Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("metadata.ignore_tags: {e}"))
            })?;
        }
        for pattern in &self.filters.exclude {
            Glob::new(pattern)
                .map_err(|e| ConfigError::Validation(format!("filters.exclude: {e}")))?;
        }
        Ok(())
    }
}

/// Destination layout templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    /// Directory part of the destination, `/`-separated.
    pub dirs_path: String,
    /// Filename part of the destination.
    pub name: String,
    /// Hour (0-23) at which a new day starts for date folders. Photos taken
    /// before it are filed under the previous day.
    pub day_begins: u32,
    /// Replacement for whitespace runs inside substituted values.
    pub whitespace_sub: String,
    /// Value of the `<custom>` placeholder.
    pub custom: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            dirs_path: "<%Y>/<%m-%b>-<city>".into(),
            name: "<%Y%m%d-%H%M%S>-<basename>".into(),
            day_begins: 0,
            whitespace_sub: "_".into(),
            custom: String::new(),
        }
    }
}

/// Tag resolution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    /// Fall back to a date embedded in the filename.
    pub use_date_filename: bool,
    /// Fall back to creation then modification timestamps.
    pub use_file_dates: bool,
    /// Use the last source folder as album when no album tag resolves.
    pub album_from_folder: bool,
    /// Regexes; matching tag names are dropped from every candidate list.
    pub ignore_tags: Vec<String>,
    /// Per-field candidate tag lists.
    pub tags: TagPriorities,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            use_date_filename: true,
            use_file_dates: false,
            album_from_folder: false,
            ignore_tags: Vec::new(),
            tags: TagPriorities::default(),
        }
    }
}

/// Reverse geocoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeolocationConfig {
    pub enabled: bool,
    /// Nominatim endpoint root.
    pub base_url: String,
    /// Ask for English place names instead of local ones.
    pub prefer_english_names: bool,
    pub timeout_secs: u64,
    /// Decimal places kept when bucketing coordinates for the cache.
    pub precision: u32,
    /// Minimum spacing between outbound requests.
    pub min_interval_ms: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://nominatim.openstreetmap.org".into(),
            prefer_english_names: false,
            timeout_secs: 10,
            precision: 2,
            min_interval_ms: 1000,
        }
    }
}

/// Near-duplicate detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Maximum Hamming distance (of 64 bits) for two images to be similar.
    pub threshold: u32,
    /// Directory under the collection root receiving duplicates.
    pub duplicates_dir: String,
    /// Send a conflicting, perceptually similar image to the duplicates
    /// area instead of suffixing it next to the original.
    pub route_similar_conflicts: bool,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 12,
            duplicates_dir: "_duplicates".into(),
            route_similar_conflicts: false,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the available parallelism.
    pub max_processes: Option<usize>,
    /// Files placed between two saves of the integrity store.
    pub save_every: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            save_every: 100,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// Not clamped to the core count: workers spend most of their time waiting
/// on exiftool processes and the geocoder, not on the CPU.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.unwrap_or(cores).max(1)
}

/// How imported files reach the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Move,
    Copy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub mode: ImportMode,
}

/// Which files are considered media.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FiltersConfig {
    /// Glob patterns, matched against paths relative to the walked root.
    pub exclude: Vec<String>,
    /// Accepted extensions, case-insensitive, without the dot. Empty
    /// accepts every file.
    pub extensions: Vec<String>,
}

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "cr2", "cr3",
    "nef", "arw", "dng", "orf", "rw2", "raf", "mp4", "mov", "m4v", "avi", "mts", "m2ts", "3gp",
    "mkv",
];

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Path of the config file for a collection root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(CONFIG_FILE)
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value. `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<Config, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config of the collection at `root`.
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    load_config_file(&config_path(root))
}

/// Load config from an explicit file path.
pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    resolve_config(load_raw_config(path)?)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# mediasort configuration
# =======================
# Lives at <collection>/.mediasort/config.toml. All settings are optional;
# values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Destination layout
# ---------------------------------------------------------------------------
[path]
# Templates are literal text plus <placeholder> groups:
#   <%Y> <%m-%b> ...    strftime over the media date
#   <basename> <name>   original stem, stem without embedded date
#   <ext>               source extension
#   <city> <state> <country> <location>
#   <title> <album> <camera_make> <camera_model> <original_name>
#   <folder> <folders[1:]>  source folders
#   <custom> <"text">
#   <a|b>               first alternative that resolves
#   %u<..> %l<..>       upper/lower case
dirs_path = "<%Y>/<%m-%b>-<city>"
name = "<%Y%m%d-%H%M%S>-<basename>"

# Hour at which a new day starts, for date folders only.
day_begins = 0

# Whitespace inside substituted values is replaced with this.
whitespace_sub = "_"

# Value of the <custom> placeholder.
custom = ""

# ---------------------------------------------------------------------------
# Metadata resolution
# ---------------------------------------------------------------------------
[metadata]
# Use a date found in the filename when no capture date tag resolves.
use_date_filename = true

# Then fall back to creation and modification timestamps.
use_file_dates = false

# Use the last source folder as album when no album tag resolves.
album_from_folder = false

# Regexes of tag names to never read, e.g. ["^File:"].
ignore_tags = []

# Candidate tags per field, in priority order.
[metadata.tags]
date_original = ["EXIF:DateTimeOriginal", "H264:DateTimeOriginal", "QuickTime:ContentCreateDate"]
date_created = ["EXIF:CreateDate", "QuickTime:CreationDate", "QuickTime:CreateDate", "QuickTime:MediaCreateDate", "File:FileCreateDate"]
date_modified = ["EXIF:ModifyDate", "QuickTime:ModifyDate", "File:FileModifyDate"]
camera_make = ["EXIF:Make", "QuickTime:Make"]
camera_model = ["EXIF:Model", "QuickTime:Model"]
album = ["XMP-xmpDM:Album", "XMP:Album"]
title = ["XMP:Title", "XMP:DisplayName"]
original_name = ["XMP:OriginalFileName"]
latitude = ["EXIF:GPSLatitude", "XMP:GPSLatitude", "Composite:GPSLatitude"]
longitude = ["EXIF:GPSLongitude", "XMP:GPSLongitude", "Composite:GPSLongitude"]
latitude_ref = ["EXIF:GPSLatitudeRef"]
longitude_ref = ["EXIF:GPSLongitudeRef"]

# ---------------------------------------------------------------------------
# Reverse geocoding
# ---------------------------------------------------------------------------
[geolocation]
enabled = true
base_url = "https://nominatim.openstreetmap.org"
prefer_english_names = false
timeout_secs = 10
# Coordinates are rounded to this many decimals for caching (2 = ~1 km).
precision = 2
# Minimum delay between requests; Nominatim allows one per second.
min_interval_ms = 1000

# ---------------------------------------------------------------------------
# Near-duplicate detection
# ---------------------------------------------------------------------------
[similarity]
# Maximum differing bits (of 64) for two images to count as similar.
threshold = 12
duplicates_dir = "_duplicates"
# Route a conflicting similar image to duplicates_dir instead of suffixing.
route_similar_conflicts = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= available parallelism).
# max_processes = 4

# The store is saved after this many placed files, so a killed run loses
# at most this many records.
save_every = 100

# ---------------------------------------------------------------------------
# Import
# ---------------------------------------------------------------------------
[import]
# "move" or "copy"
mode = "move"

# ---------------------------------------------------------------------------
# Filters
# ---------------------------------------------------------------------------
[filters]
# Glob patterns relative to each walked directory.
exclude = []
# Accepted extensions; an empty list accepts every file.
extensions = ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "raf", "mp4", "mov", "m4v", "avi", "mts", "m2ts", "3gp", "mkv"]
"##
}
