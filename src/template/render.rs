//! Pure rendering of a parsed template against one file's context.

use super::parser::{Case, Field, Node, Placeholder, Slice};
use super::sanitize::sanitize_value;
use crate::naming::{self, SEPARATORS};
use crate::types::{MediaMetadata, SourceInfo};
use chrono::{Duration, NaiveDateTime, Timelike};
use std::fmt::Write;

/// Everything a placeholder can read.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub metadata: &'a MediaMetadata,
    pub source: &'a SourceInfo,
    /// Value of `<custom>`.
    pub custom: &'a str,
    /// Hour at which a new day starts for date-only formats.
    pub day_begins: u32,
    pub whitespace_sub: &'a str,
}

/// strftime specifiers that make a format time-of-day aware.
const TIME_SPECIFIERS: &[&str] = &[
    "%H", "%k", "%I", "%l", "%M", "%S", "%f", "%p", "%P", "%T", "%R", "%X", "%r", "%c", "%s",
];

/// Render a node sequence. Top-level empty values also drop one separator
/// that was just emitted, so `<%Y%m%d>-<title>` renders `20150629`
/// rather than `20150629-` when there is no title.
pub fn render_nodes(nodes: &[Node], ctx: &RenderContext<'_>, top_level: bool) -> String {
    let mut out = String::new();
    for node in nodes {
        let rendered = match node {
            Node::Literal(text) => {
                out.push_str(text);
                continue;
            }
            Node::Placeholder(p) => render_placeholder(p, ctx),
            Node::Fallback(branches) => branches
                .iter()
                .find(|branch| branch_resolves(branch, ctx))
                .map(|branch| render_nodes(branch, ctx, false))
                .unwrap_or_default(),
        };
        if rendered.is_empty() {
            if top_level && out.ends_with(SEPARATORS) {
                out.pop();
            }
        } else {
            out.push_str(&rendered);
        }
    }
    out
}

/// A branch resolves when every placeholder in it is non-empty and every
/// nested fallback has a branch that resolves.
fn branch_resolves(branch: &[Node], ctx: &RenderContext<'_>) -> bool {
    branch.iter().all(|node| match node {
        Node::Literal(_) => true,
        Node::Placeholder(p) => !render_placeholder(p, ctx).is_empty(),
        Node::Fallback(branches) => branches.iter().any(|b| branch_resolves(b, ctx)),
    })
}

fn render_placeholder(p: &Placeholder, ctx: &RenderContext<'_>) -> String {
    let value = match field_value(&p.field, p.slice, ctx) {
        Value::Scalar(s) => sanitize_value(&s, ctx.whitespace_sub),
        Value::List(items) => items
            .iter()
            .map(|item| sanitize_value(item, ctx.whitespace_sub))
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join("/"),
    };
    match p.case {
        Some(Case::Upper) => value.to_uppercase(),
        Some(Case::Lower) => value.to_lowercase(),
        None => value,
    }
}

enum Value {
    Scalar(String),
    List(Vec<String>),
}

fn text(value: &Option<String>) -> Value {
    Value::Scalar(value.clone().unwrap_or_default())
}

fn field_value(field: &Field, slice: Option<Slice>, ctx: &RenderContext<'_>) -> Value {
    let meta = ctx.metadata;
    let filename = naming::parse_filename(&ctx.source.filename);
    match field {
        Field::Date(format) => Value::Scalar(
            meta.date_media
                .map(|date| format_date(date, format, ctx.day_begins))
                .unwrap_or_default(),
        ),
        Field::Basename => Value::Scalar(filename.stem),
        Field::Name => Value::Scalar(naming::strip_date(&filename.stem)),
        Field::Ext => Value::Scalar(filename.extension),
        Field::OriginalName => Value::Scalar(
            meta.original_name
                .as_deref()
                .map(|n| naming::parse_filename(n).stem)
                .unwrap_or_default(),
        ),
        Field::Title => text(&meta.title),
        Field::Album => text(&meta.album),
        Field::CameraMake => text(&meta.camera_make),
        Field::CameraModel => text(&meta.camera_model),
        Field::City => text(&meta.place.city),
        Field::State => text(&meta.place.state),
        Field::Country => text(&meta.place.country),
        Field::Location => text(&meta.place.location),
        Field::Folder => text(&ctx.source.subdirs.last().cloned()),
        Field::Folders => slice_list(&ctx.source.subdirs, slice),
        Field::Custom => Value::Scalar(ctx.custom.to_string()),
        Field::Text(literal) => Value::Scalar(literal.clone()),
    }
}

fn format_date(date: NaiveDateTime, format: &str, day_begins: u32) -> String {
    let has_time = TIME_SPECIFIERS.iter().any(|spec| format.contains(spec));
    let date = if !has_time && date.hour() < day_begins {
        date - Duration::days(1)
    } else {
        date
    };
    let mut out = String::new();
    // Formats are validated at parse time; a failure here renders empty.
    if write!(out, "{}", date.format(format)).is_err() {
        return String::new();
    }
    out
}

fn resolve_index(i: i64, len: usize) -> usize {
    let len = len as i64;
    let i = if i < 0 { len + i } else { i };
    i.clamp(0, len) as usize
}

fn slice_list(items: &[String], slice: Option<Slice>) -> Value {
    match slice {
        None => Value::List(items.to_vec()),
        Some(Slice::Index(i)) => {
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            Value::Scalar(
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or_default(),
            )
        }
        Some(Slice::Range(start, end)) => {
            let start = start.map_or(0, |s| resolve_index(s, items.len()));
            let end = end.map_or(items.len(), |e| resolve_index(e, items.len()));
            Value::List(items.get(start..end).map(<[String]>::to_vec).unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse;
    use crate::types::GeoPlace;
    use chrono::NaiveDate;

    fn meta() -> MediaMetadata {
        MediaMetadata {
            date_media: Some(
                NaiveDate::from_ymd_opt(2015, 6, 29)
                    .unwrap()
                    .and_hms_opt(3, 34, 14)
                    .unwrap(),
            ),
            camera_make: Some("Canon".into()),
            place: GeoPlace {
                city: Some("San Francisco".into()),
                country: Some("United States".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn source() -> SourceInfo {
        SourceInfo {
            subdirs: vec!["2015".into(), "trip west".into(), "day 1".into()],
            filename: "IMG_20150629_033414.JPG".into(),
        }
    }

    fn render_with(template: &str, meta: &MediaMetadata, day_begins: u32) -> String {
        let source = source();
        let ctx = RenderContext {
            metadata: meta,
            source: &source,
            custom: "mine",
            day_begins,
            whitespace_sub: "_",
        };
        render_nodes(&parse(template).unwrap(), &ctx, true)
    }

    fn render(template: &str) -> String {
        render_with(template, &meta(), 0)
    }

    #[test]
    fn literals_copy_through() {
        assert_eq!(render("static/dir"), "static/dir");
    }

    #[test]
    fn date_formats() {
        assert_eq!(render("<%Y>/<%m-%b>"), "2015/06-Jun");
    }

    #[test]
    fn values_are_sanitized() {
        assert_eq!(render("<city>"), "San_Francisco");
    }

    #[test]
    fn case_modifiers() {
        assert_eq!(render("%u<camera_make>"), "CANON");
        assert_eq!(render("<%lcamera_make>"), "canon");
    }

    #[test]
    fn fallback_takes_first_resolving_branch() {
        assert_eq!(render("<title|city>"), "San_Francisco");
        assert_eq!(render("<state|folder>"), "day_1");
    }

    #[test]
    fn fallback_branch_needs_every_placeholder() {
        assert_eq!(render("<<city>-<state>|<country>>"), "United_States");
    }

    #[test]
    fn fallback_with_nothing_resolving_is_empty() {
        assert_eq!(render("<title|album>"), "");
    }

    #[test]
    fn empty_placeholder_drops_dangling_separator() {
        assert_eq!(render("<%Y%m%d>-<title>"), "20150629");
        assert_eq!(render("<%m-%b>-<state>/x"), "06-Jun/x");
    }

    #[test]
    fn sub_template_branch_keeps_its_literals() {
        assert_eq!(render(r#"<<"a-"><city>|"z">"#), "a-San_Francisco");
    }

    #[test]
    fn basename_and_name() {
        assert_eq!(render("<basename>"), "IMG_20150629_033414");
        assert_eq!(render("<name>"), "IMG");
        assert_eq!(render("<ext>"), "JPG");
    }

    #[test]
    fn folders_and_slices() {
        assert_eq!(render("<folders>"), "2015/trip_west/day_1");
        assert_eq!(render("<folders[1:]>"), "trip_west/day_1");
        assert_eq!(render("<folders[-1]>"), "day_1");
        assert_eq!(render("<folders[0:-1]>"), "2015/trip_west");
        assert_eq!(render("<folders[7]>"), "");
        assert_eq!(render("<folder>"), "day_1");
    }

    #[test]
    fn custom_and_text() {
        assert_eq!(render(r#"<custom>-<"fixed">"#), "mine-fixed");
    }

    #[test]
    fn day_begins_shifts_date_only_formats() {
        let m = meta();
        assert_eq!(render_with("<%Y-%m-%d>", &m, 4), "2015-06-28");
        assert_eq!(render_with("<%Y-%m-%d_%H>", &m, 4), "2015-06-29_03");
        assert_eq!(render_with("<%Y-%m-%d>", &m, 3), "2015-06-29");
    }

    #[test]
    fn missing_date_renders_empty() {
        let m = MediaMetadata::default();
        assert_eq!(render_with("<%Y>", &m, 0), "");
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render("<%Y>/<city|folder>/<%Y%m%d>-<name>");
        let b = render("<%Y>/<city|folder>/<%Y%m%d>-<name>");
        assert_eq!(a, b);
    }
}
