//! The chunked, pull-based read contract shared by every format codec.
//!
//! A codec produces an unbounded [`BatchSource`]; [`RowWindow::over`] applies
//! the offset/limit window from a [`ChunkRequest`] and re-slices output into
//! batches of at most `chunk_size_rows`, so pagination and cancellation work
//! identically for every format. A window is finite and **non-restartable**:
//! once consumed, a fresh read call must be issued to see the same range
//! again, and nothing is cached by the core.
//!
//! Cancellation is structural: the consumer simply stops pulling and drops
//! the window, which drops the codec source and any file handles it owns.
//! Backpressure is structural too; no more than one batch is in flight.
//!
//! Error policy: a single undecodable row is surfaced as
//! [`RowItem::Malformed`] carrying the raw bytes, and the sequence continues.
//! Only container-level failures terminate the sequence, as
//! [`ReadError::CorruptContainer`].

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use snafu::{Backtrace, prelude::*};

use crate::schema::TableSchema;
use crate::sniff::FormatTag;
use crate::storage::StorageError;

/// Errors surfaced while opening or pulling from a row window.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReadError {
    /// The chunk request violates its invariants.
    #[snafu(display("Invalid chunk request: {message}"))]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The byte stream itself is unreadable; the read aborts.
    #[snafu(display("Corrupt container: {message}"))]
    CorruptContainer {
        /// Codec-reported description of the corruption.
        message: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The format was recognized but full row decoding is unavailable;
    /// callers should degrade to metadata-only presentation.
    #[snafu(display("Row decoding is not available for {format:?} sources"))]
    UnsupportedCapability {
        /// The format whose decoder is unavailable.
        format: FormatTag,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Underlying storage failure while fetching a byte range.
    #[snafu(display("Storage error while reading rows: {source}"))]
    Storage {
        /// The storage error that interrupted the read.
        #[snafu(source, backtrace)]
        source: StorageError,
    },
}

/// A bounded request for rows: skip `offset_rows`, yield at most
/// `limit_rows`, in batches of at most `chunk_size_rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    offset_rows: u64,
    limit_rows: Option<u64>,
    chunk_size_rows: usize,
}

impl ChunkRequest {
    /// Build a request. `chunk_size_rows` must be positive; `limit_rows` of
    /// `None` means "until exhausted".
    pub fn new(
        offset_rows: u64,
        limit_rows: Option<u64>,
        chunk_size_rows: usize,
    ) -> Result<Self, ReadError> {
        ensure!(
            chunk_size_rows > 0,
            InvalidRequestSnafu {
                message: "chunk_size_rows must be positive",
            }
        );
        Ok(Self {
            offset_rows,
            limit_rows,
            chunk_size_rows,
        })
    }

    /// A request for every row, chunked at the given size.
    pub fn all(chunk_size_rows: usize) -> Result<Self, ReadError> {
        Self::new(0, None, chunk_size_rows)
    }

    /// Rows to skip before the first yielded row.
    pub fn offset_rows(&self) -> u64 {
        self.offset_rows
    }

    /// Maximum number of rows to yield, or `None` for "until exhausted".
    pub fn limit_rows(&self) -> Option<u64> {
        self.limit_rows
    }

    /// Maximum rows per yielded batch.
    pub fn chunk_size_rows(&self) -> usize {
        self.chunk_size_rows
    }
}

/// One decoded row, or an error-tagged placeholder for a row that failed to
/// decode (the core never silently drops data).
#[derive(Debug, Clone, PartialEq)]
pub enum RowItem {
    /// A successfully decoded row as an ordered field map.
    Row(serde_json::Map<String, Value>),
    /// A row that failed to decode, carrying the offending bytes.
    Malformed {
        /// The raw bytes of the record that failed to decode.
        raw: Bytes,
        /// Decoder error message.
        message: String,
    },
}

impl RowItem {
    /// The decoded field map, if this item is a well-formed row.
    pub fn as_row(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            RowItem::Row(map) => Some(map),
            RowItem::Malformed { .. } => None,
        }
    }
}

/// A batch of rows produced by one pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Rows in this batch, well-formed or error-tagged.
    pub rows: Vec<RowItem>,
}

impl RowBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The pull side of a codec: produce the next batch of decoded rows, or
/// `None` when the source is exhausted.
///
/// Implementations own whatever handles they need and release them when
/// dropped, so abandoning a consumer mid-stream releases resources in the
/// same control-flow step.
#[async_trait]
pub trait BatchSource: Send {
    /// Pull the next batch. Batch sizing here is codec-internal; the window
    /// layer re-slices to the requested chunk size.
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError>;
}

/// A finite, non-restartable sequence of row batches satisfying one
/// [`ChunkRequest`], with the schema that applies to its rows.
pub struct RowWindow {
    schema: TableSchema,
    source: Box<dyn BatchSource>,
    skip_remaining: u64,
    limit_remaining: Option<u64>,
    chunk_size: usize,
    pending: VecDeque<RowItem>,
    exhausted: bool,
}

impl RowWindow {
    /// Apply `request` to a codec's batch source.
    pub fn over(schema: TableSchema, source: Box<dyn BatchSource>, request: ChunkRequest) -> Self {
        Self {
            schema,
            source,
            skip_remaining: request.offset_rows(),
            limit_remaining: request.limit_rows(),
            chunk_size: request.chunk_size_rows(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Schema describing the rows this window yields.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Pull the next batch of at most `chunk_size_rows` rows.
    ///
    /// Returns `Ok(None)` once the window is exhausted (offset/limit
    /// satisfied or the underlying source ended). A fatal error terminates
    /// the sequence; subsequent calls return `Ok(None)`.
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        if self.limit_remaining == Some(0) && self.pending.is_empty() {
            return Ok(None);
        }

        while !self.exhausted && self.pending.len() < self.chunk_size {
            match self.source.next_batch().await {
                Ok(Some(batch)) => {
                    for row in batch.rows {
                        if self.skip_remaining > 0 {
                            self.skip_remaining -= 1;
                            continue;
                        }
                        match self.limit_remaining {
                            Some(0) => break,
                            Some(ref mut n) => {
                                *n -= 1;
                                self.pending.push_back(row);
                            }
                            None => self.pending.push_back(row),
                        }
                    }
                    if self.limit_remaining == Some(0) {
                        self.exhausted = true;
                    }
                }
                Ok(None) => self.exhausted = true,
                Err(e) => {
                    self.exhausted = true;
                    self.pending.clear();
                    return Err(e);
                }
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.pending.len().min(self.chunk_size);
        let rows = self.pending.drain(..take).collect();
        Ok(Some(RowBatch { rows }))
    }

    /// Drain the remaining window into a single vector. Test and
    /// small-result convenience; large reads should pull batch by batch.
    pub async fn collect_rows(mut self) -> Result<Vec<RowItem>, ReadError> {
        let mut out = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            out.extend(batch.rows);
        }
        Ok(out)
    }
}
