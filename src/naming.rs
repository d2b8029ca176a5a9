//! Filename conventions: stem/extension split and dates embedded in names.
//!
//! Cameras and phones encode the capture time in the filename far more
//! reliably than they agree on EXIF tags: `IMG_20160915_123456.jpg`,
//! `PXL_20230102_101112345.jpg`, `2015-06-29 16.34.14.jpg`. This module
//! recognizes those shapes so that
//!
//! - the resolver can fall back to the filename date when
//!   `use_date_filename` is enabled, and
//! - the `<name>` placeholder can render the stem with the date removed,
//!   which keeps `<%Y%m%d>-<name>` from stacking dates on every re-sort.
//!
//! ## Recognized shapes
//!
//! Tried in order; the first shape with exactly one valid match wins:
//!
//! | Shape | Example |
//! |---|---|
//! | date + time, optional `-`/`_` between parts | `20160915_123456`, `2016-09-15-12-34-56` |
//! | `YYYYMMDD` between delimiters | `IMG_20160915_x` |
//! | `DD-MM-YYYY` between delimiters | `scan_15-09-2016_a` |
//! | `YYMMDD` between delimiters | `IMG_160915_x` (assumed 20YY) |

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

/// Separator characters trimmed around removed dates and empty fields.
pub const SEPARATORS: &[char] = &['-', '_', ' ', '.'];

/// Result of parsing a filename like `IMG_20160915_123456.JPG`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilename {
    /// Filename without its final extension.
    pub stem: String,
    /// Extension without the dot, case preserved. Empty if none.
    pub extension: String,
    /// Date embedded in the stem, if one is recognized.
    pub date: Option<NaiveDateTime>,
}

/// Parse a filename into stem, extension and embedded date.
pub fn parse_filename(filename: &str) -> ParsedFilename {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let date = find_date(&stem).map(|m| m.date);
    ParsedFilename {
        stem,
        extension,
        date,
    }
}

struct DateMatch {
    date: NaiveDateTime,
    /// Byte range of the date digits within the unpadded input.
    range: Range<usize>,
}

#[derive(Clone, Copy)]
enum Order {
    DateTime,
    Ymd,
    ShortYmd,
    Dmy,
}

static SHAPES: LazyLock<Vec<(Order, Regex)>> = LazyLock::new(|| {
    [
        (
            Order::DateTime,
            r"([0-9]{4})[-_]?([0-9]{2})[-_]?([0-9]{2})[-_ .]?([0-9]{2})[-_.]?([0-9]{2})[-_.]?([0-9]{2})",
        ),
        (Order::Ymd, r"[-_./ ]([0-9]{4})[-_.]?([0-9]{2})[-_.]?([0-9]{2})[-_./ ]"),
        (Order::Dmy, r"[-_./ ]([0-9]{2})[-_.]([0-9]{2})[-_.]([0-9]{4})[-_./ ]"),
        (Order::ShortYmd, r"[-_./ ]([0-9]{2})[-_.]?([0-9]{2})[-_.]?([0-9]{2})[-_./ ]"),
    ]
    .into_iter()
    .map(|(order, pattern)| (order, Regex::new(pattern).expect("static date pattern")))
    .collect()
});

/// Find the date embedded in a filename stem.
fn find_date(stem: &str) -> Option<DateMatch> {
    // Pad so delimiter-bounded shapes match at the start and end of the stem.
    let padded = format!(".{stem}.");
    for (order, regex) in SHAPES.iter() {
        let matches: Vec<_> = regex.captures_iter(&padded).collect();
        if matches.len() != 1 {
            continue;
        }
        let caps = &matches[0];
        let numbers: Vec<u32> = (1..caps.len())
            .filter_map(|i| caps.get(i))
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        if numbers.len() != caps.len() - 1 {
            continue;
        }
        let first = caps.get(1)?;
        let last = caps.get(caps.len() - 1)?;
        // Shift back to unpadded offsets.
        let range = (first.start() - 1)..(last.end() - 1);

        let date = match order {
            Order::DateTime => NaiveDate::from_ymd_opt(numbers[0] as i32, numbers[1], numbers[2])
                .and_then(|d| d.and_hms_opt(numbers[3], numbers[4], numbers[5])),
            Order::Ymd => NaiveDate::from_ymd_opt(numbers[0] as i32, numbers[1], numbers[2])
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Order::ShortYmd => {
                NaiveDate::from_ymd_opt(2000 + numbers[0] as i32, numbers[1], numbers[2])
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            Order::Dmy => NaiveDate::from_ymd_opt(numbers[2] as i32, numbers[1], numbers[0])
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        if let Some(date) = date {
            return Some(DateMatch { date, range });
        }
    }
    None
}

/// Remove an embedded date from a stem, keeping the descriptive part.
///
/// `20150629-163414-img_3900` → `img_3900`, `IMG_20160915_123456` → `IMG`.
/// Stems without a recognized date are returned unchanged.
pub fn strip_date(stem: &str) -> String {
    let Some(m) = find_date(stem) else {
        return stem.to_string();
    };
    let before = stem[..m.range.start].trim_end_matches(SEPARATORS);
    let after = stem[m.range.end..].trim_start_matches(SEPARATORS);
    let joined = match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (_, true) => before.to_string(),
        // Keep the delimiter that preceded the date.
        (false, false) => {
            let sep = stem[before.len()..m.range.start]
                .chars()
                .next()
                .unwrap_or('_');
            format!("{before}{sep}{after}")
        }
    };
    joined.trim_matches(SEPARATORS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn splits_stem_and_extension() {
        let p = parse_filename("img_3900.JPG");
        assert_eq!(p.stem, "img_3900");
        assert_eq!(p.extension, "JPG");
        assert_eq!(p.date, None);
    }

    #[test]
    fn no_extension() {
        let p = parse_filename("README");
        assert_eq!(p.stem, "README");
        assert_eq!(p.extension, "");
    }

    #[test]
    fn phone_style_datetime() {
        let p = parse_filename("IMG_20160915_123456.jpg");
        assert_eq!(p.date, Some(dt(2016, 9, 15, 12, 34, 56)));
    }

    #[test]
    fn dashed_datetime() {
        let p = parse_filename("2015-06-29-16-34-14.jpg");
        assert_eq!(p.date, Some(dt(2015, 6, 29, 16, 34, 14)));
    }

    #[test]
    fn date_only_between_delimiters() {
        let p = parse_filename("trip_20160915_beach.jpg");
        assert_eq!(p.date, Some(dt(2016, 9, 15, 0, 0, 0)));
    }

    #[test]
    fn day_month_year() {
        let p = parse_filename("scan_15-09-2016_a.png");
        assert_eq!(p.date, Some(dt(2016, 9, 15, 0, 0, 0)));
    }

    #[test]
    fn invalid_calendar_date_is_ignored() {
        let p = parse_filename("IMG_20161345_123456.jpg");
        assert_eq!(p.date, None);
    }

    #[test]
    fn ambiguous_dates_are_ignored() {
        let p = parse_filename("x_20160915_y_20170101_z.jpg");
        assert_eq!(p.date, None);
    }

    #[test]
    fn strip_leading_date() {
        assert_eq!(strip_date("20150629-163414-img_3900"), "img_3900");
    }

    #[test]
    fn strip_trailing_date() {
        assert_eq!(strip_date("IMG_20160915_123456"), "IMG");
    }

    #[test]
    fn strip_middle_date_keeps_delimiter() {
        assert_eq!(strip_date("trip_20160915_beach"), "trip_beach");
    }

    #[test]
    fn non_ascii_digits_are_not_a_date() {
        let p = parse_filename("IMG_٢٠١٦٠٩١٥_١٢٣٤٥٦.jpg");
        assert_eq!(p.date, None);
        assert_eq!(strip_date("IMG_٢٠١٦٠٩١٥"), "IMG_٢٠١٦٠٩١٥");
    }

    #[test]
    fn strip_without_date_is_identity() {
        assert_eq!(strip_date("img_3900"), "img_3900");
    }
}
