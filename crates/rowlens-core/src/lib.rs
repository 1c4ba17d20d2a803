//! Ingestion core for the rowlens multi-format data viewer.
//!
//! This crate provides the foundational pieces for `rowlens`:
//!
//! - A format sniffer that classifies a byte source or directory into a
//!   format tag using magic bytes, extension fallback, and light content
//!   heuristics (`sniff` module).
//! - A pull-based, cancelable, non-restartable chunked read contract shared
//!   by every format adapter, so the rest of the system never assumes a
//!   file fits in memory (`chunk` module).
//! - A Delta-style versioned transaction log reader that reconstructs the
//!   current table state (live file manifest, schema, partition columns,
//!   protocol bounds) by replaying log segments in order, with time travel
//!   to historical versions (`transaction_log` module).
//! - A closed set of per-format codecs behind a narrow adapter seam
//!   (`codec` module) resolved through an explicit registry instead of a
//!   process-wide one.
//! - A `table` module that ties the pieces together: open a directory as a
//!   versioned table or a single file as a row source.
//!
//! Higher-level crates (UI, export, CLI) are expected to depend on this
//! core crate rather than re-implementing sniffing and log replay.
#![deny(missing_docs)]
pub mod chunk;
pub mod codec;
pub mod schema;
pub mod sniff;
pub mod storage;
pub mod table;
pub mod transaction_log;
