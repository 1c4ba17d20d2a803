//! The format adapter seam between the core and per-format decoders.
//!
//! Dispatch over formats is closed: a [`FormatTag`] picked once by the
//! sniffer selects exactly one codec from an explicit [`CodecRegistry`]
//! (never a process-wide registry — tests substitute reduced tables).
//! Adding a format means adding a codec and a registry entry, keeping
//! dispatch exhaustive.
//!
//! Every codec satisfies the same two entry points: probe metadata without
//! decoding rows, and open a windowed row stream. A codec whose full row
//! decoder is unavailable reports [`CodecCapability::MetadataOnly`] and
//! still answers probes, so a recognized file degrades to a metadata view
//! rather than failing outright.

pub mod arrow_ipc;
pub mod avro;
pub mod csv;
pub mod json;
pub mod json_lines;
pub mod orc;
pub mod parquet;
mod rows;

pub use arrow_ipc::ArrowIpcCodec;
pub use avro::AvroCodec;
pub use csv::CsvCodec;
pub use json::JsonCodec;
pub use json_lines::JsonLinesCodec;
pub use orc::OrcCodec;
pub use parquet::ParquetCodec;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::chunk::{ChunkRequest, ReadError, RowWindow};
use crate::schema::TableSchema;
use crate::sniff::FormatTag;
use crate::storage::ByteSource;

/// What a codec can do with its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecCapability {
    /// Both metadata probing and row decoding are available.
    Full,
    /// Only metadata probing; `open_rows` fails with
    /// [`ReadError::UnsupportedCapability`].
    MetadataOnly,
}

/// Metadata extracted from a source without decoding all rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    /// Schema of the source's rows; empty when unknown.
    pub schema: TableSchema,
    /// Estimated (or exact, when the container records it) row count.
    pub row_count_estimate: Option<u64>,
    /// Format-specific details for display, as a JSON object.
    pub format_info: Value,
}

/// The contract each per-format codec satisfies.
///
/// The core never inspects codec internals; it only routes a classified
/// source to these two entry points.
#[async_trait]
pub trait FormatCodec: Send + Sync {
    /// What this codec can do.
    fn capability(&self) -> CodecCapability;

    /// Extract metadata (schema, row count estimate, format details)
    /// without decoding all rows.
    async fn probe_metadata(&self, source: &Arc<dyn ByteSource>)
        -> Result<SourceMetadata, ReadError>;

    /// Open a windowed, non-restartable row stream over the source.
    async fn open_rows(
        &self,
        source: Arc<dyn ByteSource>,
        request: ChunkRequest,
    ) -> Result<RowWindow, ReadError>;
}

/// Explicit format-to-codec table, passed in at construction time.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    entries: Vec<(FormatTag, Arc<dyn FormatCodec>)>,
}

impl CodecRegistry {
    /// A registry with no codecs; combine with [`CodecRegistry::with`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// The full built-in codec set.
    pub fn builtin() -> Self {
        Self::empty()
            .with(FormatTag::Parquet, Arc::new(ParquetCodec))
            .with(FormatTag::Arrow, Arc::new(ArrowIpcCodec))
            .with(FormatTag::Csv, Arc::new(CsvCodec::default()))
            .with(FormatTag::JsonLines, Arc::new(JsonLinesCodec::default()))
            .with(FormatTag::Json, Arc::new(JsonCodec))
            .with(FormatTag::Avro, Arc::new(AvroCodec))
            .with(FormatTag::Orc, Arc::new(OrcCodec))
    }

    /// Add (or replace) the codec for a tag.
    pub fn with(mut self, tag: FormatTag, codec: Arc<dyn FormatCodec>) -> Self {
        self.entries.retain(|(t, _)| *t != tag);
        self.entries.push((tag, codec));
        self
    }

    /// Look up the codec for a tag.
    pub fn get(&self, tag: FormatTag) -> Option<&Arc<dyn FormatCodec>> {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, codec)| codec)
    }

    /// Tags this registry can dispatch.
    pub fn tags(&self) -> Vec<FormatTag> {
        self.entries.iter().map(|(t, _)| *t).collect()
    }
}
