//! Log action and wire payload definitions.
//!
//! Each log segment line carries one [`ActionRecord`], a JSON object whose
//! single recognized key names the action verb (`add`, `remove`, `metaData`,
//! `protocol`). The structs here mirror that wire format exactly, camelCase
//! keys included, so existing tables round-trip byte-compatibly. Parsed
//! actions are stamped with `(version, ordinal)` for deterministic
//! downstream ordering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An `add` action: a data file joined the table at some version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    /// Path of the data file, relative to the table root.
    pub path: String,

    /// Partition column values carried by the file's storage location, not
    /// by its encoded bytes. Flat string-to-string map on the wire.
    #[serde(default)]
    pub partition_values: HashMap<String, String>,

    /// File size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Modification time in epoch millis, when the writer recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_time: Option<i64>,

    /// Whether this add changed table data (carried through verbatim).
    #[serde(default)]
    pub data_change: bool,

    /// Per-column statistics as a JSON-encoded string (the wire format
    /// nests a string, not an object). Use [`AddFile::parsed_stats`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

impl AddFile {
    /// Decode the `stats` string into structured per-column statistics.
    /// Returns `None` when stats are absent or undecodable; stats are
    /// advisory and never gate correctness.
    pub fn parsed_stats(&self) -> Option<RowStats> {
        let raw = self.stats.as_deref()?;
        serde_json::from_str(raw).ok()
    }

    /// The recorded modification time as a UTC timestamp, when present and
    /// within chrono's representable range.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modification_time.and_then(DateTime::from_timestamp_millis)
    }
}

/// Per-column statistics decoded from `add.stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowStats {
    /// Number of rows in the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_records: Option<u64>,

    /// Minimum value per column.
    #[serde(default)]
    pub min_values: serde_json::Map<String, Value>,

    /// Maximum value per column.
    #[serde(default)]
    pub max_values: serde_json::Map<String, Value>,

    /// Null count per column.
    #[serde(default)]
    pub null_count: serde_json::Map<String, Value>,
}

/// A `remove` action: a data file left the table at some version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    /// Path of the removed file, relative to the table root.
    pub path: String,

    /// When the removal was recorded, in epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,

    /// Whether this remove changed table data (carried through verbatim).
    #[serde(default)]
    pub data_change: bool,
}

impl RemoveFile {
    /// The recorded deletion time as a UTC timestamp, when present.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deletion_timestamp.and_then(DateTime::from_timestamp_millis)
    }
}

/// A `metaData` action: wholesale replacement of table metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    /// Stable table identifier.
    #[serde(default)]
    pub id: String,

    /// Optional human-readable table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// JSON-encoded schema document (a struct schema as JSON text).
    #[serde(default)]
    pub schema_string: String,

    /// Ordered partition column names.
    #[serde(default)]
    pub partition_columns: Vec<String>,

    /// Table creation time in epoch millis, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,

    /// Free-form table configuration, carried through verbatim.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub configuration: HashMap<String, String>,
}

impl TableMetadata {
    /// The recorded creation time as a UTC timestamp, when present.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_time.and_then(DateTime::from_timestamp_millis)
    }
}

/// A `protocol` action: reader/writer version bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Minimum reader version required to read the table.
    #[serde(default = "default_protocol_version")]
    pub min_reader_version: i32,

    /// Minimum writer version required to write the table.
    #[serde(default = "default_protocol_version")]
    pub min_writer_version: i32,
}

fn default_protocol_version() -> i32 {
    1
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            min_reader_version: 1,
            min_writer_version: 1,
        }
    }
}

/// One line of a log segment on the wire: a JSON object carrying exactly one
/// recognized action key (plus benign keys like `commitInfo` that writers
/// emit and readers ignore).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRecord {
    /// An `add` action payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<AddFile>,

    /// A `remove` action payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<RemoveFile>,

    /// A `metaData` action payload.
    #[serde(default, rename = "metaData", skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<TableMetadata>,

    /// A `protocol` action payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,

    /// Writer-provenance payload; carried on the wire but not replayed.
    #[serde(default, rename = "commitInfo", skip_serializing_if = "Option::is_none")]
    pub commit_info: Option<Value>,

    /// Application transaction payload; carried on the wire but not replayed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<Value>,
}

impl ActionRecord {
    /// Extract the typed action, if the record carries a recognized verb.
    pub fn into_action(self) -> Option<LogAction> {
        if let Some(add) = self.add {
            Some(LogAction::AddFile(add))
        } else if let Some(remove) = self.remove {
            Some(LogAction::RemoveFile(remove))
        } else if let Some(meta) = self.meta_data {
            Some(LogAction::SetMetadata(meta))
        } else {
            self.protocol.map(LogAction::SetProtocol)
        }
    }

    /// True for records that carry only benign, non-replayed payloads
    /// (`commitInfo`, `txn`). These are expected on real tables and are not
    /// recorded as warnings.
    pub fn is_benign(&self) -> bool {
        self.commit_info.is_some() || self.txn.is_some()
    }
}

/// A single mutation recorded in a log segment.
#[derive(Debug, Clone, PartialEq)]
pub enum LogAction {
    /// Add (or re-add) a data file to the live set.
    AddFile(AddFile),
    /// Remove a data file from the live set.
    RemoveFile(RemoveFile),
    /// Replace schema, partitioning, and table identity wholesale.
    SetMetadata(TableMetadata),
    /// Replace protocol bounds wholesale.
    SetProtocol(Protocol),
}

/// A [`LogAction`] stamped with its segment version and ordinal position,
/// the key replay orders by.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedAction {
    /// Version of the segment the action came from.
    pub version: u64,
    /// Position of the action among its segment's parsed actions.
    pub ordinal: usize,
    /// The action itself.
    pub action: LogAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_action_wire_roundtrip() {
        let line = r#"{"add":{"path":"part-0.parquet","partitionValues":{"region":"eu"},"size":1024,"dataChange":true,"stats":"{\"numRecords\":7,\"minValues\":{\"id\":1},\"maxValues\":{\"id\":7},\"nullCount\":{\"id\":0}}"}}"#;

        let record: ActionRecord = serde_json::from_str(line).expect("parse add line");
        let action = record.into_action().expect("recognized action");
        let LogAction::AddFile(add) = &action else {
            panic!("expected AddFile, got {action:?}");
        };
        assert_eq!(add.path, "part-0.parquet");
        assert_eq!(add.partition_values["region"], "eu");
        assert_eq!(add.size, 1024);

        let stats = add.parsed_stats().expect("stats decode");
        assert_eq!(stats.num_records, Some(7));
        assert_eq!(stats.min_values["id"], serde_json::json!(1));
        assert_eq!(stats.null_count["id"], serde_json::json!(0));
    }

    #[test]
    fn stats_remain_a_json_encoded_string_on_the_wire() {
        let add = AddFile {
            path: "p.parquet".to_string(),
            partition_values: HashMap::new(),
            size: 10,
            modification_time: None,
            data_change: true,
            stats: Some(r#"{"numRecords":1}"#.to_string()),
        };
        let json = serde_json::to_string(&ActionRecord {
            add: Some(add),
            ..Default::default()
        })
        .expect("serialize");

        // The stats value must serialize as a string, not a nested object.
        assert!(json.contains(r#""stats":"{\"numRecords\":1}""#));
    }

    #[test]
    fn metadata_wire_keys_are_camel_case() {
        let line = r#"{"metaData":{"id":"t-1","schemaString":"{\"type\":\"struct\",\"fields\":[]}","partitionColumns":["region"],"createdTime":1700000000000}}"#;

        let record: ActionRecord = serde_json::from_str(line).expect("parse metaData line");
        let Some(LogAction::SetMetadata(meta)) = record.into_action() else {
            panic!("expected SetMetadata");
        };
        assert_eq!(meta.id, "t-1");
        assert_eq!(meta.partition_columns, vec!["region"]);
        assert_eq!(meta.created_time, Some(1_700_000_000_000));
        assert_eq!(
            meta.created_at().map(|t| t.to_rfc3339()),
            Some("2023-11-14T22:13:20+00:00".to_string())
        );
        assert!(meta.schema_string.contains("struct"));
    }

    #[test]
    fn protocol_defaults_apply_for_sparse_records() {
        let record: ActionRecord =
            serde_json::from_str(r#"{"protocol":{"minReaderVersion":2}}"#).expect("parse");
        let Some(LogAction::SetProtocol(protocol)) = record.into_action() else {
            panic!("expected SetProtocol");
        };
        assert_eq!(protocol.min_reader_version, 2);
        assert_eq!(protocol.min_writer_version, 1);
    }

    #[test]
    fn commit_info_lines_are_benign_non_actions() {
        let record: ActionRecord =
            serde_json::from_str(r#"{"commitInfo":{"operation":"WRITE"}}"#).expect("parse");
        assert!(record.is_benign());
        assert!(record.clone().into_action().is_none());
    }

    #[test]
    fn undecodable_stats_degrade_to_none() {
        let add = AddFile {
            path: "p".to_string(),
            partition_values: HashMap::new(),
            size: 0,
            modification_time: None,
            data_change: false,
            stats: Some("not json".to_string()),
        };
        assert!(add.parsed_stats().is_none());
    }
}
