//! Versioned-table transaction log: parsing and state reconstruction.
//!
//! This module implements the append-only, Delta-style metadata layer the
//! viewer uses to present a directory-based table. The wire format is kept
//! bit-compatible with existing tables:
//!
//! ```text
//! table_root/
//!   _delta_log/
//!     00000000000000000000.json   # segment for version 0
//!     00000000000000000001.json   # segment for version 1
//!     00000000000000000002.json   # ...
//!   part-0000.parquet             # data files referenced by add actions
//! ```
//!
//! Each segment holds one JSON action object per line. The recognized keys
//! are `add`, `remove`, `metaData`, and `protocol`; `metaData.schemaString`
//! is itself a JSON-encoded schema document, `add.partitionValues` is a flat
//! string-to-string map, and `add.stats`, when present, is a JSON-encoded
//! *string* (not a nested object) of per-column min/max/null counts.
//!
//! Reconstruction is a miniature recovery procedure: actions are replayed in
//! strict `(version, ordinal)` order to derive a consistent manifest of live
//! files, schema, and partitioning. The fold is pure — every requested
//! version produces a fresh immutable [`TableState`] snapshot, which keeps
//! time travel trivial at the cost of recomputation (table logs are small
//! relative to data files).
//!
//! Fault tolerance is asymmetric by design:
//!
//! - A malformed *line* is skipped with a recorded warning; one corrupt
//!   action must not make an otherwise-valid version unreadable.
//! - A missing *version* is fatal: the engine transitions to
//!   [`EnginePhase::Corrupt`] and refuses to return partial history.

pub mod actions;
pub mod log_store;
pub mod segments;
pub mod table_state;

pub use actions::{AddFile, LogAction, Protocol, RemoveFile, RowStats, StampedAction, TableMetadata};
pub use log_store::LogStore;
pub use segments::{parse_segment, segment_file_name, segment_file_version, SegmentActions, SkippedLine};
pub use table_state::{replay_actions, EnginePhase, FileEntry, TableState, TableStateEngine};

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Name of the reserved subdirectory that marks a versioned table and holds
/// its log segments.
pub const LOG_DIR_NAME: &str = "_delta_log";

/// Errors that can occur while reading the log or replaying table state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplayError {
    /// The directory has no transaction log subdirectory.
    #[snafu(display("No {LOG_DIR_NAME} directory under {table}"))]
    MissingLogDir {
        /// Name of the directory that was probed.
        table: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Replay detected a gap in the version sequence. Silent partial history
    /// is worse than a hard failure, so no state is returned.
    #[snafu(display("Missing log version {missing} while replaying to {target}"))]
    MissingVersion {
        /// The first absent version in `0..=target`.
        missing: u64,
        /// The version replay was asked to reach.
        target: u64,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The log is structurally invalid (duplicate ordinals, poisoned
    /// engine, or similar invariant violations).
    #[snafu(display("Corrupt transaction log: {message}"))]
    CorruptLog {
        /// Description of the invariant violation.
        message: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Underlying storage error while loading segments.
    #[snafu(display("Storage error while reading the transaction log: {source}"))]
    Storage {
        /// The storage error encountered while loading the log.
        #[snafu(source, backtrace)]
        source: StorageError,
    },
}
