//! # mediasort
//!
//! Organizes photo and video collections into a directory layout derived
//! from each file's own metadata, and keeps track of every file it placed.
//!
//! # Architecture: Per-File Pipeline
//!
//! ```text
//! scan ─► extract tags ─► resolve metadata ─► render destination ─► decide ─► move/copy ─► record
//!          (exiftool)      (priority lists,     (path templates)     (conflicts,
//!                           geocoding)                                duplicates)
//! ```
//!
//! The collection root holds a `.mediasort/` directory with the config and
//! the integrity store: one record per tracked file with its checksum,
//! current path and the metadata snapshot its path was rendered from.
//! Re-running on an organized collection renders the same paths from those
//! snapshots, so a second `sort` moves nothing and runs no external tool.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`organize`] | The pipeline and the commands built on it |
//! | [`metadata`] | Tag priority lists, date and coordinate parsing, date policy |
//! | [`geo`] | Reverse geocoding with a coalescing, throttled cache |
//! | [`template`] | `<%Y>/<%m-%b>-<city>` path templates: parser, renderer, sanitizer |
//! | [`store`] | Persistent identity, checksum and snapshot records; integrity check |
//! | [`similarity`] | Average hash, clustering, duplicate moves and their revert log |
//! | [`extract`] | Tag extraction through exiftool |
//! | [`scan`] | Source walking with extension and glob filters |
//! | [`naming`] | Dates embedded in filenames |
//! | [`fsops`] | Verified moves and copies, empty directory pruning |
//! | [`config`] | `.mediasort/config.toml` loading, merging and validation |
//! | [`summary`] | Per-file outcomes and run totals |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Shared data types |
//!
//! # Design Decisions
//!
//! ## The Store Is the Memory
//!
//! Tags are read once, when a file enters the collection. Later runs work
//! from the stored snapshot, so a layout change is a pure re-render and an
//! `edit` changes placement without touching the file's bytes. Checksums
//! guard the snapshot: a file whose content changed is reported and left
//! where it is.
//!
//! ## Decide Once, Then Act
//!
//! Every destination is decided in one deterministic pass before anything
//! moves. Dry runs stop after that pass and report the same outcomes a real
//! run produces.

pub mod config;
pub mod extract;
pub mod fsops;
pub mod geo;
pub mod metadata;
pub mod naming;
pub mod organize;
pub mod output;
pub mod scan;
pub mod similarity;
pub mod store;
pub mod summary;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
