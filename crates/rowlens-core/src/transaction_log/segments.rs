//! Log segment parsing and the segment file naming convention.
//!
//! A segment is one versioned file in the log: a sequence of independently
//! parseable records, one JSON object per line. Parsing is line-by-line and
//! lossy-but-accounted: a line that fails to parse is skipped and recorded
//! as a [`SkippedLine`], never aborting the rest of the segment, because
//! losing one action's worth of adds must not make an otherwise-valid
//! version unreadable.
//!
//! Segments are discovered by a fixed naming convention — a zero-padded,
//! fixed-width, monotonically increasing version number with a `.json`
//! extension — and are handed to the engine already sorted by version; this
//! module does not sort across segments.

use bytes::Bytes;
use log::warn;

use crate::transaction_log::actions::{ActionRecord, StampedAction};

/// Width of the zero-padded version number in canonical segment file names.
pub const SEGMENT_FILENAME_DIGITS: usize = 20;

/// One unparseable or unrecognized line, kept so callers can surface it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number within the segment.
    pub line_number: usize,
    /// The raw offending bytes.
    pub raw: Bytes,
    /// Why the line was skipped.
    pub message: String,
}

/// The parse result for one segment: ordered actions plus the lines that
/// could not be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentActions {
    /// Version of the segment these actions came from.
    pub version: u64,
    /// Actions in segment order, stamped `(version, ordinal)`.
    pub actions: Vec<StampedAction>,
    /// Lines skipped with a recorded warning.
    pub skipped: Vec<SkippedLine>,
}

/// Parse one segment's bytes into ordered, stamped actions.
///
/// Empty lines are ignored. Records carrying only benign payloads
/// (`commitInfo`, `txn`) are dropped silently; records with no recognized
/// key at all, and lines that are not valid JSON, are recorded as skipped.
pub fn parse_segment(bytes: &[u8], version: u64) -> SegmentActions {
    let mut actions = Vec::new();
    let mut skipped = Vec::new();
    let mut ordinal = 0usize;

    for (idx, line) in bytes.split(|&b| b == b'\n').enumerate() {
        let trimmed = trim_ascii(line);
        if trimmed.is_empty() {
            continue;
        }
        let line_number = idx + 1;

        match serde_json::from_slice::<ActionRecord>(trimmed) {
            Ok(record) => {
                let benign = record.is_benign();
                match record.into_action() {
                    Some(action) => {
                        actions.push(StampedAction {
                            version,
                            ordinal,
                            action,
                        });
                        ordinal += 1;
                    }
                    None if benign => {}
                    None => {
                        let message = "no recognized action key".to_string();
                        warn!("segment {version} line {line_number}: {message}");
                        skipped.push(SkippedLine {
                            line_number,
                            raw: Bytes::copy_from_slice(trimmed),
                            message,
                        });
                    }
                }
            }
            Err(e) => {
                let message = format!("invalid JSON: {e}");
                warn!("segment {version} line {line_number}: {message}");
                skipped.push(SkippedLine {
                    line_number,
                    raw: Bytes::copy_from_slice(trimmed),
                    message,
                });
            }
        }
    }

    SegmentActions {
        version,
        actions,
        skipped,
    }
}

fn trim_ascii(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &line[s..=e],
        _ => &[],
    }
}

/// Parse a segment version out of a file name.
///
/// Accepts any all-digit stem with a `.json` extension, so hand-written
/// short names load too; [`segment_file_name`] always emits the canonical
/// fixed-width form. Non-segment files in the log directory (`.crc`
/// sidecars, checkpoints) yield `None` and are ignored by discovery.
pub fn segment_file_version(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Canonical zero-padded segment file name for a version.
pub fn segment_file_name(version: u64) -> String {
    format!("{version:0width$}.json", width = SEGMENT_FILENAME_DIGITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::actions::LogAction;

    #[test]
    fn parses_actions_in_order_with_ordinals() {
        let segment = concat!(
            r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
            "\n",
            r#"{"metaData":{"id":"t","schemaString":"{\"type\":\"struct\",\"fields\":[]}","partitionColumns":[]}}"#,
            "\n",
            r#"{"add":{"path":"p1.parquet","partitionValues":{},"size":100,"dataChange":true}}"#,
            "\n",
        );

        let parsed = parse_segment(segment.as_bytes(), 0);
        assert_eq!(parsed.version, 0);
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.actions.len(), 3);
        assert!(matches!(parsed.actions[0].action, LogAction::SetProtocol(_)));
        assert!(matches!(parsed.actions[1].action, LogAction::SetMetadata(_)));
        assert!(matches!(parsed.actions[2].action, LogAction::AddFile(_)));
        let ordinals: Vec<_> = parsed.actions.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert!(parsed.actions.iter().all(|a| a.version == 0));
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let segment = concat!(
            r#"{"add":{"path":"a.parquet","size":1}}"#,
            "\n",
            "this is not json at all\n",
            r#"{"add":{"path":"b.parquet","size":2}}"#,
            "\n",
            r#"{"remove":{"path":"a.parquet"}}"#,
            "\n",
        );

        let parsed = parse_segment(segment.as_bytes(), 3);
        assert_eq!(parsed.actions.len(), 3);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].line_number, 2);
        assert_eq!(&parsed.skipped[0].raw[..], b"this is not json at all");
        // Ordinals stay contiguous over the surviving actions.
        let ordinals: Vec<_> = parsed.actions.iter().map(|a| a.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn commit_info_lines_skip_silently() {
        let segment = concat!(
            r#"{"commitInfo":{"operation":"WRITE","timestamp":1700000000000}}"#,
            "\n",
            r#"{"add":{"path":"p.parquet","size":1}}"#,
            "\n",
        );

        let parsed = parse_segment(segment.as_bytes(), 1);
        assert_eq!(parsed.actions.len(), 1);
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn object_without_recognized_key_is_recorded() {
        let parsed = parse_segment(br#"{"mystery":{"path":"x"}}"#, 0);
        assert!(parsed.actions.is_empty());
        assert_eq!(parsed.skipped.len(), 1);
        assert!(parsed.skipped[0].message.contains("no recognized action key"));
    }

    #[test]
    fn empty_and_whitespace_lines_are_ignored() {
        let parsed = parse_segment(b"\n   \n\t\n", 0);
        assert!(parsed.actions.is_empty());
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn file_name_convention_roundtrip() {
        assert_eq!(segment_file_name(0), "00000000000000000000.json");
        assert_eq!(segment_file_name(42), "00000000000000000042.json");
        assert_eq!(segment_file_version("00000000000000000042.json"), Some(42));
        // Short all-digit stems load too.
        assert_eq!(segment_file_version("7.json"), Some(7));

        assert_eq!(segment_file_version("00000000000000000001.crc"), None);
        assert_eq!(segment_file_version("_last_checkpoint"), None);
        assert_eq!(segment_file_version("v1.json"), None);
        assert_eq!(segment_file_version(".json"), None);
    }
}
