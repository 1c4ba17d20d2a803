//! Reconstructing table state by replaying log segments.
//!
//! [`TableStateEngine`] folds parsed segments into a [`TableState`]: the
//! live file manifest, schema, partition columns, and protocol bounds as of
//! a target version. The fold is pure and ordered by `(version, ordinal)`;
//! each requested version produces an independent immutable snapshot, so
//! time travel is just a re-run of the fold bounded to an older version.
//!
//! The engine is a small state machine: `Empty -> Replaying -> Ready`, with
//! `Corrupt` as a terminal phase entered when replay detects a version gap
//! or a structural invariant violation. A corrupt engine refuses further
//! replay requests rather than risk returning partial history.

use std::collections::{BTreeSet, HashMap};

use log::warn;

use crate::schema::TableSchema;
use crate::transaction_log::actions::{LogAction, Protocol, RowStats, StampedAction};
use crate::transaction_log::segments::SegmentActions;
use crate::transaction_log::{CorruptLogSnafu, MissingVersionSnafu, ReplayError};

/// One live data file in a reconstructed manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Path of the data file, relative to the table root.
    pub path: String,
    /// Partition column values derived from the file's location.
    pub partition_values: HashMap<String, String>,
    /// File size in bytes as recorded by the add action.
    pub size_bytes: u64,
    /// Decoded per-column statistics, when the add action carried any.
    pub stats: Option<RowStats>,
    /// Version of the add action that (most recently) made this file live.
    pub added_at_version: u64,
}

/// Immutable snapshot of table state at one version.
///
/// Created empty and mutated only by the sequential replay fold; once
/// returned, a state is never modified — callers request a new state for a
/// different version instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableState {
    version: u64,
    live_files: HashMap<String, FileEntry>,
    schema: TableSchema,
    partition_columns: Vec<String>,
    table_id: Option<String>,
    protocol: Protocol,
}

impl TableState {
    /// The version this state was replayed to.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Live files keyed by path (paths are unique).
    pub fn live_files(&self) -> &HashMap<String, FileEntry> {
        &self.live_files
    }

    /// Schema from the most recent `metaData` action, or empty if none.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Partition column names from the most recent `metaData` action.
    pub fn partition_columns(&self) -> &[String] {
        &self.partition_columns
    }

    /// Stable table identifier, when a `metaData` action recorded one.
    pub fn table_id(&self) -> Option<&str> {
        self.table_id.as_deref()
    }

    /// Protocol bounds from the most recent `protocol` action.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Live files filtered to those added at or before `version`, ordered
    /// by path.
    ///
    /// This is a cheap filter over the already-replayed manifest: it only
    /// narrows by *add* version and cannot undo removes that happened after
    /// `version`. For exact historical membership, replay to that version.
    pub fn list_live_files(&self, at_or_before_version: u64) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self
            .live_files
            .values()
            .filter(|f| f.added_at_version <= at_or_before_version)
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

/// Phases of the replay engine. `Corrupt` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No replay has been requested yet.
    Empty,
    /// A replay is in progress.
    Replaying,
    /// The last replay completed and produced a state.
    Ready,
    /// Replay detected corruption; the engine refuses further work.
    Corrupt,
}

/// Replays parsed segments into [`TableState`] snapshots.
pub struct TableStateEngine {
    actions: Vec<StampedAction>,
    /// Versions for which a segment exists, even one with zero surviving
    /// actions. Gap detection keys off segment presence, not action
    /// presence, so an empty or fully-skipped segment still counts.
    segment_versions: BTreeSet<u64>,
    phase: EnginePhase,
}

impl TableStateEngine {
    /// Build an engine from segments already sorted by version (the log
    /// store's contract).
    pub fn from_segments(segments: Vec<SegmentActions>) -> Self {
        let mut actions = Vec::new();
        let mut segment_versions = BTreeSet::new();
        for segment in segments {
            segment_versions.insert(segment.version);
            actions.extend(segment.actions);
        }
        Self {
            actions,
            segment_versions,
            phase: EnginePhase::Empty,
        }
    }

    /// Current engine phase.
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Latest version a segment exists for.
    pub fn latest_version(&self) -> Option<u64> {
        self.segment_versions.iter().next_back().copied()
    }

    /// Replay to `target_version`, producing an independent snapshot.
    ///
    /// Fails with [`ReplayError::MissingVersion`] unless segments exist for
    /// exactly every version in `0..=target_version`; a gap transitions the
    /// engine to `Corrupt` and no partial state is returned.
    pub fn replay_to(&mut self, target_version: u64) -> Result<TableState, ReplayError> {
        if self.phase == EnginePhase::Corrupt {
            return CorruptLogSnafu {
                message: "engine is corrupt; refusing to replay",
            }
            .fail();
        }
        self.phase = EnginePhase::Replaying;

        for version in 0..=target_version {
            if !self.segment_versions.contains(&version) {
                self.phase = EnginePhase::Corrupt;
                return MissingVersionSnafu {
                    missing: version,
                    target: target_version,
                }
                .fail();
            }
        }

        match replay_actions(&self.actions, target_version) {
            Ok(state) => {
                self.phase = EnginePhase::Ready;
                Ok(state)
            }
            Err(e) => {
                self.phase = EnginePhase::Corrupt;
                Err(e)
            }
        }
    }
}

/// Pure fold of stamped actions into a [`TableState`] bounded to
/// `target_version`.
///
/// Actions above the target are not admitted. Within the admitted set,
/// iteration is in `(version, ordinal)` order: last writer for a given path
/// wins regardless of whether it is an add or a remove, removing an absent
/// path is a no-op, and `metaData`/`protocol` replace wholesale. Two actions
/// with an identical `(version, ordinal)` stamp are an upstream invariant
/// violation and fail as [`ReplayError::CorruptLog`] rather than guessing a
/// resolution order.
pub fn replay_actions(
    actions: &[StampedAction],
    target_version: u64,
) -> Result<TableState, ReplayError> {
    let mut admitted: Vec<&StampedAction> = actions
        .iter()
        .filter(|a| a.version <= target_version)
        .collect();
    admitted.sort_by_key(|a| (a.version, a.ordinal));

    for pair in admitted.windows(2) {
        if pair[0].version == pair[1].version && pair[0].ordinal == pair[1].ordinal {
            return CorruptLogSnafu {
                message: format!(
                    "two actions share stamp (version {}, ordinal {})",
                    pair[0].version, pair[0].ordinal
                ),
            }
            .fail();
        }
    }

    let mut state = TableState {
        version: target_version,
        ..TableState::default()
    };

    for stamped in admitted {
        match &stamped.action {
            LogAction::AddFile(add) => {
                // Insert or overwrite; a re-add after a remove reinstates
                // the file at the new version.
                state.live_files.insert(
                    add.path.clone(),
                    FileEntry {
                        path: add.path.clone(),
                        partition_values: add.partition_values.clone(),
                        size_bytes: add.size,
                        stats: add.parsed_stats(),
                        added_at_version: stamped.version,
                    },
                );
            }
            LogAction::RemoveFile(remove) => {
                // Redundant removes are legitimate across compactions.
                state.live_files.remove(&remove.path);
            }
            LogAction::SetMetadata(meta) => {
                state.schema = if meta.schema_string.is_empty() {
                    TableSchema::default()
                } else {
                    match TableSchema::parse_struct_document(&meta.schema_string) {
                        Ok(schema) => schema,
                        Err(e) => {
                            warn!(
                                "version {} metaData has undecodable schemaString: {e}",
                                stamped.version
                            );
                            TableSchema::default()
                        }
                    }
                };
                state.partition_columns = meta.partition_columns.clone();
                state.table_id = if meta.id.is_empty() {
                    None
                } else {
                    Some(meta.id.clone())
                };
            }
            LogAction::SetProtocol(protocol) => {
                state.protocol = protocol.clone();
            }
        }
    }

    Ok(state)
}
