//! Canonical metadata resolution from raw tag maps.
//!
//! Media files carry the same fact under many names. A capture date can be
//! `EXIF:DateTimeOriginal` on a JPEG, `QuickTime:ContentCreateDate` on an
//! iPhone video, or only `File:FileModifyDate` on a scan. The resolver maps
//! the raw `Group:Name → value` map produced by the extractor onto the fixed
//! fields of [`MediaMetadata`].
//!
//! ## Resolution priority
//!
//! Each field has an ordered candidate list ([`TagPriorities`]). The first
//! candidate whose value is present and parses wins; later candidates are
//! never consulted. Lists come from config (`[metadata.tags]`) and any tag
//! matching an `ignore_tags` regex is removed from all of them up front.
//!
//! ```text
//! date_original: EXIF:DateTimeOriginal → H264:DateTimeOriginal → QuickTime:ContentCreateDate
//! camera_make:   EXIF:Make → QuickTime:Make
//! latitude:      EXIF:GPSLatitude → XMP:GPSLatitude → Composite:GPSLatitude
//! ```
//!
//! ## Media date
//!
//! `date_media` is the date templates render. It is `date_original`, then a
//! date embedded in the filename (`use_date_filename`), then the creation
//! and modification dates (`use_file_dates`). Modification times say when a
//! file was last touched rather than when it was shot, so they are opt-in.
//!
//! Missing fields are never errors: a file with no tags at all still
//! resolves, to an empty snapshot.

use crate::config::MetadataConfig;
use crate::geo::{GeoLookup, GeoResolver};
use crate::naming;
use crate::types::{MediaMetadata, SourceInfo};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

/// Raw tags keyed `Group:Name`, as produced by an extractor.
pub type TagMap = BTreeMap<String, Value>;

/// Ordered candidate tag names for each canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagPriorities {
    pub date_original: Vec<String>,
    pub date_created: Vec<String>,
    pub date_modified: Vec<String>,
    pub camera_make: Vec<String>,
    pub camera_model: Vec<String>,
    pub album: Vec<String>,
    pub title: Vec<String>,
    pub original_name: Vec<String>,
    pub latitude: Vec<String>,
    pub longitude: Vec<String>,
    pub latitude_ref: Vec<String>,
    pub longitude_ref: Vec<String>,
}

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for TagPriorities {
    fn default() -> Self {
        Self {
            date_original: tags(&[
                "EXIF:DateTimeOriginal",
                "H264:DateTimeOriginal",
                "QuickTime:ContentCreateDate",
            ]),
            date_created: tags(&[
                "EXIF:CreateDate",
                "QuickTime:CreationDate",
                "QuickTime:CreateDate",
                "QuickTime:MediaCreateDate",
                "File:FileCreateDate",
            ]),
            date_modified: tags(&[
                "EXIF:ModifyDate",
                "QuickTime:ModifyDate",
                "File:FileModifyDate",
            ]),
            camera_make: tags(&["EXIF:Make", "QuickTime:Make"]),
            camera_model: tags(&["EXIF:Model", "QuickTime:Model"]),
            album: tags(&["XMP-xmpDM:Album", "XMP:Album"]),
            title: tags(&["XMP:Title", "XMP:DisplayName"]),
            original_name: tags(&["XMP:OriginalFileName"]),
            latitude: tags(&[
                "EXIF:GPSLatitude",
                "XMP:GPSLatitude",
                "Composite:GPSLatitude",
            ]),
            longitude: tags(&[
                "EXIF:GPSLongitude",
                "XMP:GPSLongitude",
                "Composite:GPSLongitude",
            ]),
            latitude_ref: tags(&["EXIF:GPSLatitudeRef"]),
            longitude_ref: tags(&["EXIF:GPSLongitudeRef"]),
        }
    }
}

impl TagPriorities {
    /// Drop every candidate matching one of `ignore`.
    pub fn without_ignored(mut self, ignore: &[Regex]) -> Self {
        if ignore.is_empty() {
            return self;
        }
        for list in [
            &mut self.date_original,
            &mut self.date_created,
            &mut self.date_modified,
            &mut self.camera_make,
            &mut self.camera_model,
            &mut self.album,
            &mut self.title,
            &mut self.original_name,
            &mut self.latitude,
            &mut self.longitude,
            &mut self.latitude_ref,
            &mut self.longitude_ref,
        ] {
            list.retain(|tag| !ignore.iter().any(|re| re.is_match(tag)));
        }
        self
    }
}

/// First candidate in `names` whose value `parse` accepts.
fn first_parsed<T>(
    tags: &TagMap,
    names: &[String],
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    names.iter().filter_map(|name| tags.get(name)).find_map(parse)
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(String::from),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})[:\-](\d{2})[:\-](\d{2})(?:[ T](\d{2}):(\d{2})(?::(\d{2}))?(?:\.\d+)?)?\s*(?:Z|[+\-]\d{2}:?\d{2})?$",
    )
    .expect("static date pattern")
});

/// Parse a tag date.
///
/// Accepts the EXIF form `2015:06:29 16:34:14`, ISO forms with `T` or space,
/// fractional seconds, a trailing `Z` or `±HH:MM` offset (dropped, so the
/// result is the local capture time), and date-only values. All-zero
/// placeholder dates written by some cameras fail.
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    let s = value.as_str()?.trim();
    let caps = DATE_RE.captures(s)?;
    let num = |i: usize| -> Option<u32> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let year = num(1)? as i32;
    if year == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?.and_hms_opt(num(4)?, num(5)?, num(6)?)
}

static DMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\d+(?:\.\d+)?) deg (\d+(?:\.\d+)?)' (\d+(?:\.\d+)?)"\s*([NSEW])?$"#)
        .expect("static coordinate pattern")
});

/// Parse a coordinate given as a number, a numeric string, or exiftool's
/// human-readable `37 deg 30' 0.00" S` form.
pub fn parse_coordinate(value: &Value) -> Option<f64> {
    let coord = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    let caps = DMS_RE.captures(s)?;
                    let part = |i: usize| caps[i].parse::<f64>().ok();
                    let v = part(1)? + part(2)? / 60.0 + part(3)? / 3600.0;
                    match caps.get(4).map(|m| m.as_str()) {
                        Some("S" | "W") => -v,
                        _ => v,
                    }
                }
            }
        }
        _ => return None,
    };
    coord.is_finite().then_some(coord)
}

/// Apply a `GPSLatitudeRef`/`GPSLongitudeRef` to an unsigned coordinate.
fn apply_ref(coord: f64, reference: Option<String>) -> f64 {
    let negative = reference
        .as_deref()
        .and_then(|r| r.chars().next())
        .is_some_and(|c| matches!(c.to_ascii_uppercase(), 'S' | 'W'));
    if negative && coord > 0.0 { -coord } else { coord }
}

/// Date-fallback switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatePolicy {
    pub use_date_filename: bool,
    pub use_file_dates: bool,
}

/// Maps raw tag maps onto [`MediaMetadata`].
pub struct MetadataResolver {
    priorities: TagPriorities,
    dates: DatePolicy,
    album_from_folder: bool,
    geo: Option<Arc<GeoResolver>>,
}

impl MetadataResolver {
    pub fn new(priorities: TagPriorities, dates: DatePolicy, album_from_folder: bool) -> Self {
        Self {
            priorities,
            dates,
            album_from_folder,
            geo: None,
        }
    }

    pub fn from_config(config: &MetadataConfig) -> Result<Self, regex::Error> {
        let ignore = config
            .ignore_tags
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            config.tags.clone().without_ignored(&ignore),
            DatePolicy {
                use_date_filename: config.use_date_filename,
                use_file_dates: config.use_file_dates,
            },
            config.album_from_folder,
        ))
    }

    pub fn with_geo(mut self, geo: Arc<GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn priorities(&self) -> &TagPriorities {
        &self.priorities
    }

    /// Resolve every canonical field for one file.
    pub fn resolve(&self, tags: &TagMap, source: &SourceInfo) -> MediaMetadata {
        let p = &self.priorities;
        let mut meta = MediaMetadata {
            date_original: first_parsed(tags, &p.date_original, parse_date),
            date_created: first_parsed(tags, &p.date_created, parse_date),
            date_modified: first_parsed(tags, &p.date_modified, parse_date),
            title: first_parsed(tags, &p.title, text_value),
            album: first_parsed(tags, &p.album, text_value),
            camera_make: first_parsed(tags, &p.camera_make, text_value),
            camera_model: first_parsed(tags, &p.camera_model, text_value),
            original_name: first_parsed(tags, &p.original_name, text_value),
            ..Default::default()
        };

        if let (Some(lat), Some(lon)) = (
            first_parsed(tags, &p.latitude, parse_coordinate),
            first_parsed(tags, &p.longitude, parse_coordinate),
        ) {
            meta.latitude = Some(apply_ref(lat, first_parsed(tags, &p.latitude_ref, text_value)));
            meta.longitude = Some(apply_ref(lon, first_parsed(tags, &p.longitude_ref, text_value)));
        }

        if meta.album.is_none() && self.album_from_folder {
            meta.album = source.subdirs.last().cloned();
        }

        self.fill_place(&mut meta);
        self.fill_date_media(&mut meta, source);
        meta
    }

    /// Look up place names for the resolved coordinates.
    pub fn fill_place(&self, meta: &mut MediaMetadata) {
        let (Some(geo), Some(lat), Some(lon)) = (&self.geo, meta.latitude, meta.longitude) else {
            return;
        };
        if let GeoLookup::Found(place) = geo.lookup(lat, lon) {
            meta.place = place;
        }
    }

    /// Choose the date used for rendering.
    pub fn fill_date_media(&self, meta: &mut MediaMetadata, source: &SourceInfo) {
        meta.date_media = meta
            .date_original
            .or_else(|| {
                if !self.dates.use_date_filename {
                    return None;
                }
                meta.original_name
                    .as_deref()
                    .and_then(|n| naming::parse_filename(n).date)
                    .or_else(|| naming::parse_filename(&source.filename).date)
            })
            .or_else(|| {
                self.dates
                    .use_file_dates
                    .then(|| meta.date_created.or(meta.date_modified))
                    .flatten()
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeGeocoder, tag_map};
    use serde_json::json;
    use std::time::Duration;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn resolver() -> MetadataResolver {
        MetadataResolver::new(
            TagPriorities::default(),
            DatePolicy {
                use_date_filename: true,
                use_file_dates: false,
            },
            false,
        )
    }

    fn source(filename: &str) -> SourceInfo {
        SourceInfo {
            subdirs: vec!["trips".into(), "Lisbon".into()],
            filename: filename.into(),
        }
    }

    // =========================================================================
    // Date parsing
    // =========================================================================

    #[test]
    fn parses_exif_date() {
        assert_eq!(
            parse_date(&json!("2015:06:29 16:34:14")),
            Some(dt(2015, 6, 29, 16, 34, 14))
        );
    }

    #[test]
    fn parses_iso_date_with_offset_and_fraction() {
        assert_eq!(
            parse_date(&json!("2015-06-29T16:34:14.250+02:00")),
            Some(dt(2015, 6, 29, 16, 34, 14))
        );
        assert_eq!(
            parse_date(&json!("2015:06:29 16:34:14Z")),
            Some(dt(2015, 6, 29, 16, 34, 14))
        );
    }

    #[test]
    fn parses_date_only() {
        assert_eq!(parse_date(&json!("2015:06:29")), Some(dt(2015, 6, 29, 0, 0, 0)));
    }

    #[test]
    fn rejects_zero_and_garbage_dates() {
        assert_eq!(parse_date(&json!("0000:00:00 00:00:00")), None);
        assert_eq!(parse_date(&json!("yesterday")), None);
        assert_eq!(parse_date(&json!(1435595654)), None);
        assert_eq!(parse_date(&json!("2015:13:40 00:00:00")), None);
    }

    // =========================================================================
    // Coordinates
    // =========================================================================

    #[test]
    fn parses_numeric_coordinates() {
        assert_eq!(parse_coordinate(&json!(37.5)), Some(37.5));
        assert_eq!(parse_coordinate(&json!("-122.25")), Some(-122.25));
    }

    #[test]
    fn parses_dms_coordinates() {
        let v = parse_coordinate(&json!("37 deg 30' 0.00\" S")).unwrap();
        assert!((v + 37.5).abs() < 1e-9);
    }

    #[test]
    fn reference_negates_positive_values() {
        let tags = tag_map(&[
            ("EXIF:GPSLatitude", json!(33.86)),
            ("EXIF:GPSLatitudeRef", json!("S")),
            ("EXIF:GPSLongitude", json!(151.2)),
            ("EXIF:GPSLongitudeRef", json!("E")),
        ]);
        let meta = resolver().resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.latitude, Some(-33.86));
        assert_eq!(meta.longitude, Some(151.2));
    }

    #[test]
    fn single_coordinate_is_discarded() {
        let tags = tag_map(&[("EXIF:GPSLatitude", json!(33.86))]);
        let meta = resolver().resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.latitude, None);
        assert_eq!(meta.longitude, None);
    }

    // =========================================================================
    // Priority resolution
    // =========================================================================

    #[test]
    fn earlier_candidate_wins_over_later() {
        let tags = tag_map(&[
            ("EXIF:DateTimeOriginal", json!("2015:06:29 16:34:14")),
            ("QuickTime:ContentCreateDate", json!("2020:01:01 00:00:00")),
        ]);
        let meta = resolver().resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.date_original, Some(dt(2015, 6, 29, 16, 34, 14)));
    }

    #[test]
    fn unparseable_candidate_falls_through() {
        let tags = tag_map(&[
            ("EXIF:DateTimeOriginal", json!("0000:00:00 00:00:00")),
            ("H264:DateTimeOriginal", json!("2018:03:04 05:06:07")),
        ]);
        let meta = resolver().resolve(&tags, &source("a.mts"));
        assert_eq!(meta.date_original, Some(dt(2018, 3, 4, 5, 6, 7)));
    }

    #[test]
    fn ignored_tags_are_never_read() {
        let priorities = TagPriorities::default().without_ignored(&[Regex::new("^EXIF:").unwrap()]);
        let r = MetadataResolver::new(priorities, DatePolicy::default(), false);
        let tags = tag_map(&[
            ("EXIF:Make", json!("Canon")),
            ("QuickTime:Make", json!("Apple")),
        ]);
        assert_eq!(r.resolve(&tags, &source("a.mov")).camera_make.as_deref(), Some("Apple"));
    }

    #[test]
    fn from_config_applies_overrides_and_ignores() {
        let mut config = MetadataConfig::default();
        config.tags.title = vec!["IPTC:ObjectName".into(), "XMP:Title".into()];
        config.ignore_tags = vec!["^XMP:".into()];
        let r = MetadataResolver::from_config(&config).unwrap();
        assert_eq!(r.priorities().title, vec!["IPTC:ObjectName"]);
    }

    #[test]
    fn numeric_text_values_are_kept() {
        let tags = tag_map(&[("EXIF:Model", json!(5))]);
        let meta = resolver().resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.camera_model.as_deref(), Some("5"));
    }

    #[test]
    fn no_tags_resolves_to_empty_snapshot() {
        let meta = resolver().resolve(&TagMap::new(), &source("scan.png"));
        assert_eq!(meta.resolved_field_count(), 0);
        assert_eq!(meta.date_media, None);
    }

    // =========================================================================
    // date_media policy
    // =========================================================================

    #[test]
    fn filename_date_used_when_no_original_date() {
        let tags = tag_map(&[("File:FileModifyDate", json!("2023:01:01 10:00:00"))]);
        let meta = resolver().resolve(&tags, &source("IMG_20160915_123456.jpg"));
        assert_eq!(meta.date_media, Some(dt(2016, 9, 15, 12, 34, 56)));
    }

    #[test]
    fn modify_date_requires_opt_in() {
        let tags = tag_map(&[("File:FileModifyDate", json!("2023:01:01 10:00:00"))]);
        let meta = resolver().resolve(&tags, &source("scan.png"));
        assert_eq!(meta.date_modified, Some(dt(2023, 1, 1, 10, 0, 0)));
        assert_eq!(meta.date_media, None);

        let r = MetadataResolver::new(
            TagPriorities::default(),
            DatePolicy {
                use_date_filename: false,
                use_file_dates: true,
            },
            false,
        );
        assert_eq!(
            r.resolve(&tags, &source("scan.png")).date_media,
            Some(dt(2023, 1, 1, 10, 0, 0))
        );
    }

    #[test]
    fn created_date_preferred_over_modified() {
        let r = MetadataResolver::new(
            TagPriorities::default(),
            DatePolicy {
                use_date_filename: false,
                use_file_dates: true,
            },
            false,
        );
        let tags = tag_map(&[
            ("File:FileModifyDate", json!("2023:01:01 10:00:00")),
            ("QuickTime:CreateDate", json!("2019:05:05 05:05:05")),
        ]);
        assert_eq!(
            r.resolve(&tags, &source("clip.mov")).date_media,
            Some(dt(2019, 5, 5, 5, 5, 5))
        );
    }

    #[test]
    fn original_date_wins_over_exif_modify_date() {
        let r = MetadataResolver::new(
            TagPriorities::default(),
            DatePolicy {
                use_date_filename: true,
                use_file_dates: true,
            },
            false,
        );
        let tags = tag_map(&[
            ("EXIF:ModifyDate", json!("2021:02:02 02:02:02")),
            ("EXIF:DateTimeOriginal", json!("2015:06:29 16:34:14")),
        ]);
        let meta = r.resolve(&tags, &source("IMG_20160915_123456.jpg"));
        assert_eq!(meta.date_original, Some(dt(2015, 6, 29, 16, 34, 14)));
        assert_eq!(meta.date_modified, Some(dt(2021, 2, 2, 2, 2, 2)));
        assert_eq!(meta.date_media, Some(dt(2015, 6, 29, 16, 34, 14)));
    }

    #[test]
    fn blank_text_tag_falls_through() {
        let tags = tag_map(&[("XMP:Title", json!("   ")), ("XMP:DisplayName", json!(" Harbour "))]);
        let meta = resolver().resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.title.as_deref(), Some("Harbour"));
    }

    #[test]
    fn original_name_date_wins_over_current_filename() {
        let tags = tag_map(&[("XMP:OriginalFileName", json!("IMG_20100101_000000.jpg"))]);
        let meta = resolver().resolve(&tags, &source("IMG_20160915_123456.jpg"));
        assert_eq!(meta.date_media, Some(dt(2010, 1, 1, 0, 0, 0)));
    }

    // =========================================================================
    // Album and place
    // =========================================================================

    #[test]
    fn album_from_folder_when_enabled() {
        let r = MetadataResolver::new(TagPriorities::default(), DatePolicy::default(), true);
        let meta = r.resolve(&TagMap::new(), &source("a.jpg"));
        assert_eq!(meta.album.as_deref(), Some("Lisbon"));
    }

    #[test]
    fn album_tag_beats_folder() {
        let r = MetadataResolver::new(TagPriorities::default(), DatePolicy::default(), true);
        let tags = tag_map(&[("XMP:Album", json!("Holidays"))]);
        assert_eq!(r.resolve(&tags, &source("a.jpg")).album.as_deref(), Some("Holidays"));
    }

    #[test]
    fn place_comes_from_geo_resolver() {
        let geo = Arc::new(GeoResolver::new(
            Arc::new(FakeGeocoder::with_city("Sunnyvale")),
            2,
            Duration::ZERO,
        ));
        let r = resolver().with_geo(geo);
        let tags = tag_map(&[
            ("Composite:GPSLatitude", json!(37.37)),
            ("Composite:GPSLongitude", json!(-122.03)),
        ]);
        let meta = r.resolve(&tags, &source("a.jpg"));
        assert_eq!(meta.place.city.as_deref(), Some("Sunnyvale"));
    }

    #[test]
    fn geocoder_failure_leaves_place_empty() {
        let geo = Arc::new(GeoResolver::new(
            Arc::new(FakeGeocoder::failing()),
            2,
            Duration::ZERO,
        ));
        let r = resolver().with_geo(geo);
        let tags = tag_map(&[
            ("EXIF:GPSLatitude", json!(1.0)),
            ("EXIF:GPSLongitude", json!(2.0)),
        ]);
        let meta = r.resolve(&tags, &source("a.jpg"));
        assert!(meta.place.is_empty());
        assert_eq!(meta.latitude, Some(1.0));
    }
}
