//! Raw tag extraction.
//!
//! The crate never parses EXIF, XMP or QuickTime atoms itself. A
//! [`TagExtractor`] turns a file into a flat `Group:Name → value` map and the
//! resolver takes it from there. The production extractor shells out to
//! exiftool in JSON mode:
//!
//! ```text
//! exiftool -j -G -n -- <file>
//! ```
//!
//! `-G` prefixes every tag with its group (`EXIF:Make`), `-n` keeps numeric
//! values numeric so coordinates arrive as signed decimals.

use crate::metadata::TagMap;
use log::debug;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("exiftool failed on {path}: {message}")]
    Tool { path: PathBuf, message: String },
    #[error("Unreadable exiftool output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produces the raw tag map of a file.
pub trait TagExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<TagMap, ExtractError>;
}

/// Extractor backed by the `exiftool` executable.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self {
            program: PathBuf::from("exiftool"),
        }
    }
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TagExtractor for ExifTool {
    fn extract(&self, path: &Path) -> Result<TagMap, ExtractError> {
        let output = Command::new(&self.program)
            .args(["-j", "-G", "-n", "--"])
            .arg(path)
            .output()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Tool {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tags = parse_exiftool_json(&output.stdout)?;
        debug!("{} tags from {}", tags.len(), path.display());
        Ok(tags)
    }
}

/// Flatten exiftool's `-j` output (an array with one object per file).
pub fn parse_exiftool_json(stdout: &[u8]) -> Result<TagMap, ExtractError> {
    let raw: Value = serde_json::from_slice(stdout)?;
    let Some(Value::Object(map)) = raw.as_array().and_then(|a| a.first()).cloned() else {
        return Ok(TagMap::new());
    };
    Ok(map
        .into_iter()
        .filter(|(key, _)| key != "SourceFile")
        .collect())
}
