//! Format classification for byte sources and directories.
//!
//! [`Sniffer`] decides what a blob of bytes or a directory actually is,
//! before any codec touches it. Resolution order for files:
//!
//! 1. Magic bytes over a fixed 32-byte header window (first match wins;
//!    magic always beats a mismatched extension).
//! 2. Extension fallback via a fixed table.
//! 3. For blobs under a size ceiling, content heuristics in fixed priority:
//!    line-delimited JSON, then a single JSON document, then CSV delimiter
//!    consistency.
//!
//! Directories are classified from their immediate children only: the
//! reserved transaction-log subdirectory marks a versioned table; otherwise
//! a majority extension marks a directory-of-files variant.
//!
//! Sniffing is a pure function of a bounded read, has no side effects, and
//! never fails: any storage error degrades to [`FormatTag::Unrecognized`]
//! with a logged warning, so sniffing is never the reason a recognizable
//! file fails to load. The tables live on the `Sniffer` instance rather
//! than in process-wide state, so tests can substitute reduced tables.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::storage::{ByteSource, DirEntryKind, DirectorySource, StorageResult};
use crate::transaction_log::LOG_DIR_NAME;

/// Closed enumeration of formats the core can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    /// Apache Parquet file.
    Parquet,
    /// Arrow IPC (Feather v2) file.
    Arrow,
    /// Avro object container file.
    Avro,
    /// Apache ORC file.
    Orc,
    /// Newline-delimited JSON (JSONL / NDJSON).
    JsonLines,
    /// A single JSON document (array of records or one object).
    Json,
    /// Delimiter-separated text.
    Csv,
    /// A directory holding a versioned transaction log.
    VersionedTable,
    /// Nothing matched; the caller should ask the user to pick a format.
    Unrecognized,
}

impl FormatTag {
    /// Whether this tag names a concrete format (anything but
    /// [`FormatTag::Unrecognized`]).
    pub fn is_recognized(self) -> bool {
        !matches!(self, FormatTag::Unrecognized)
    }
}

/// Result of classifying a source: the tag plus an informational confidence
/// in `[0, 1]`. Confidence must never gate correctness; it exists so a UI
/// can hedge ("looks like CSV") on heuristic-only matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// The decided format.
    pub tag: FormatTag,
    /// Informational confidence in `[0, 1]`.
    pub confidence: f32,
    /// True when a directory was classified as a uniform collection of
    /// single-file sources rather than a versioned table.
    pub directory_of_files: bool,
}

impl Classification {
    fn new(tag: FormatTag, confidence: f32) -> Self {
        Self {
            tag,
            confidence,
            directory_of_files: false,
        }
    }

    fn unrecognized() -> Self {
        Self::new(FormatTag::Unrecognized, 0.0)
    }
}

/// Format sniffer holding explicit magic-byte and extension tables.
#[derive(Debug, Clone)]
pub struct Sniffer {
    magic: Vec<(FormatTag, &'static [u8])>,
    extensions: Vec<(&'static str, FormatTag)>,
    heuristic_ceiling: u64,
}

impl Default for Sniffer {
    fn default() -> Self {
        Self {
            // Ordered; first match wins.
            magic: vec![
                (FormatTag::Parquet, b"PAR1"),
                (FormatTag::Arrow, b"ARROW1\x00\x00"),
                (FormatTag::Orc, b"ORC"),
                (FormatTag::Avro, b"Obj\x01"),
            ],
            extensions: vec![
                ("parquet", FormatTag::Parquet),
                ("pq", FormatTag::Parquet),
                ("arrow", FormatTag::Arrow),
                ("feather", FormatTag::Arrow),
                ("ipc", FormatTag::Arrow),
                ("avro", FormatTag::Avro),
                ("orc", FormatTag::Orc),
                ("jsonl", FormatTag::JsonLines),
                ("ndjson", FormatTag::JsonLines),
                ("json", FormatTag::Json),
                ("csv", FormatTag::Csv),
            ],
            heuristic_ceiling: Self::DEFAULT_HEURISTIC_CEILING,
        }
    }
}

impl Sniffer {
    /// Size of the header window read for magic-byte matching. Large enough
    /// to cover the longest magic sequence with room for future entries.
    pub const HEADER_WINDOW: u64 = 32;

    /// Blobs larger than this skip content heuristics (cost bound); magic
    /// and extension matching still apply.
    pub const DEFAULT_HEURISTIC_CEILING: u64 = 4 * 1024 * 1024;

    /// Number of leading non-empty lines that must all parse as JSON for
    /// the line-delimited-JSON heuristic to succeed.
    const JSONL_PROBE_LINES: usize = 8;

    /// Candidate delimiters for the CSV consistency check, in priority order.
    const CSV_DELIMITERS: [char; 4] = [',', '\t', ';', '|'];

    /// A sniffer with a custom table set (tests substitute reduced tables).
    pub fn with_tables(
        magic: Vec<(FormatTag, &'static [u8])>,
        extensions: Vec<(&'static str, FormatTag)>,
    ) -> Self {
        Self {
            magic,
            extensions,
            heuristic_ceiling: Self::DEFAULT_HEURISTIC_CEILING,
        }
    }

    /// Classify a single byte source. Never fails: storage errors degrade to
    /// `Unrecognized`.
    pub async fn classify_file(&self, source: &dyn ByteSource) -> Classification {
        match self.try_classify_file(source).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("sniffing {} failed, treating as unrecognized: {e}", source.name());
                Classification::unrecognized()
            }
        }
    }

    async fn try_classify_file(&self, source: &dyn ByteSource) -> StorageResult<Classification> {
        let header = source.read_range(0, Self::HEADER_WINDOW).await?;
        let magic_tag = self.match_magic(&header);
        let ext_tag = self.match_extension(source.name());

        if let Some(tag) = magic_tag {
            let confidence = if ext_tag == Some(tag) { 0.95 } else { 0.7 };
            return Ok(Classification::new(tag, confidence));
        }
        if let Some(tag) = ext_tag {
            return Ok(Classification::new(tag, 0.6));
        }

        let size = source.len().await?;
        if size > self.heuristic_ceiling {
            return Ok(Classification::unrecognized());
        }
        let body = source.read_all().await?;
        Ok(Self::content_heuristics(&body))
    }

    /// Classify a directory from its immediate children's names.
    pub async fn classify_dir(&self, dir: &dyn DirectorySource) -> Classification {
        let entries = match dir.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("listing {} failed, treating as unrecognized: {e}", dir.name());
                return Classification::unrecognized();
            }
        };

        let has_log_dir = entries
            .iter()
            .any(|e| e.kind == DirEntryKind::Directory && e.name == LOG_DIR_NAME);
        if has_log_dir {
            return Classification::new(FormatTag::VersionedTable, 0.9);
        }

        let files: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == DirEntryKind::File)
            .collect();
        if files.is_empty() {
            return Classification::unrecognized();
        }

        let mut counts: Vec<(FormatTag, usize)> = Vec::new();
        for file in &files {
            let Some(tag) = self.match_extension(&file.name) else {
                continue;
            };
            match counts.iter_mut().find(|(t, _)| *t == tag) {
                Some((_, n)) => *n += 1,
                None => counts.push((tag, 1)),
            }
        }
        // Strict majority of all file children, not just the tagged ones.
        if let Some((tag, n)) = counts.into_iter().max_by_key(|(_, n)| *n) {
            if n * 2 > files.len() {
                let mut classification = Classification::new(tag, 0.8);
                classification.directory_of_files = true;
                return classification;
            }
        }
        Classification::unrecognized()
    }

    fn match_magic(&self, header: &[u8]) -> Option<FormatTag> {
        self.magic
            .iter()
            .find(|(_, magic)| header.len() >= magic.len() && header.starts_with(magic))
            .map(|(tag, _)| *tag)
    }

    fn match_extension(&self, name: &str) -> Option<FormatTag> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        self.extensions
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, tag)| *tag)
    }

    /// Content heuristics for text formats, fixed priority order:
    /// line-delimited JSON, single JSON document, CSV delimiter consistency.
    fn content_heuristics(body: &[u8]) -> Classification {
        let Ok(text) = std::str::from_utf8(body) else {
            return Classification::unrecognized();
        };
        if text.trim().is_empty() {
            return Classification::unrecognized();
        }

        if Self::looks_like_json_lines(text) {
            return Classification::new(FormatTag::JsonLines, 0.8);
        }
        if serde_json::from_str::<serde_json::Value>(text).is_ok() {
            return Classification::new(FormatTag::Json, 0.7);
        }
        if Self::looks_like_csv(text) {
            return Classification::new(FormatTag::Csv, 0.5);
        }
        Classification::unrecognized()
    }

    fn looks_like_json_lines(text: &str) -> bool {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(Self::JSONL_PROBE_LINES)
            .collect();
        // A single JSON line is a JSON document, not JSONL.
        if lines.len() < 2 {
            return false;
        }
        lines
            .iter()
            .all(|line| serde_json::from_str::<serde_json::Value>(line).is_ok())
    }

    fn looks_like_csv(text: &str) -> bool {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let (Some(first), Some(second)) = (lines.next(), lines.next()) else {
            return false;
        };
        Self::CSV_DELIMITERS.iter().any(|&d| {
            let count = first.matches(d).count();
            count > 0 && second.matches(d).count() == count
        })
    }
}
