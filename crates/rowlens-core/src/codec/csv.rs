//! CSV codec built on Arrow's csv reader.
//!
//! Schema inference runs over a bounded record prefix; decoding then goes
//! through `arrow::csv::Reader` with the batch size pinned to the requested
//! chunk size, and the resulting record batches are flattened into JSON
//! rows like the other Arrow-backed codecs.

use std::io::Cursor;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::{Reader, ReaderBuilder};
use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;

use crate::chunk::{
    BatchSource, ChunkRequest, CorruptContainerSnafu, ReadError, RowBatch, RowWindow, StorageSnafu,
};
use crate::codec::rows::record_batch_rows;
use crate::codec::{CodecCapability, FormatCodec, SourceMetadata};
use crate::schema::TableSchema;
use crate::storage::ByteSource;

/// Records examined during schema inference.
const DEFAULT_INFER_MAX_RECORDS: usize = 256;

/// Full-capability CSV codec.
pub struct CsvCodec {
    delimiter: u8,
    has_header: bool,
    infer_max_records: usize,
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            infer_max_records: DEFAULT_INFER_MAX_RECORDS,
        }
    }
}

impl CsvCodec {
    /// Use a non-comma delimiter (tabs, semicolons, pipes).
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treat the first record as data rather than a header row.
    pub fn without_header(mut self) -> Self {
        self.has_header = false;
        self
    }

    fn format(&self) -> Format {
        Format::default()
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
    }

    fn infer(&self, bytes: &Bytes) -> Result<arrow::datatypes::Schema, ReadError> {
        let (schema, _records_read) = self
            .format()
            .infer_schema(Cursor::new(bytes.as_ref()), Some(self.infer_max_records))
            .map_err(|e| {
                CorruptContainerSnafu {
                    message: format!("csv schema inference failed: {e}"),
                }
                .build()
            })?;
        Ok(schema)
    }
}

#[async_trait]
impl FormatCodec for CsvCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::Full
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let schema = self.infer(&bytes)?;

        let mut records = bytes.split(|&b| b == b'\n').filter(|l| !l.is_empty()).count() as u64;
        if self.has_header {
            records = records.saturating_sub(1);
        }

        Ok(SourceMetadata {
            schema: TableSchema::from_arrow(&schema),
            row_count_estimate: Some(records),
            format_info: serde_json::json!({
                "delimiter": (self.delimiter as char).to_string(),
                "hasHeader": self.has_header,
            }),
        })
    }

    async fn open_rows(
        &self,
        source: Arc<dyn ByteSource>,
        request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let arrow_schema = Arc::new(self.infer(&bytes)?);
        let schema = TableSchema::from_arrow(&arrow_schema);

        let reader = ReaderBuilder::new(arrow_schema)
            .with_format(self.format())
            .with_batch_size(request.chunk_size_rows())
            .build(Cursor::new(bytes))
            .map_err(|e| {
                CorruptContainerSnafu {
                    message: format!("csv reader construction failed: {e}"),
                }
                .build()
            })?;

        let batch_source = CsvBatchSource { reader: Some(reader) };
        Ok(RowWindow::over(schema, Box::new(batch_source), request))
    }
}

struct CsvBatchSource {
    reader: Option<Reader<Cursor<Bytes>>>,
}

#[async_trait]
impl BatchSource for CsvBatchSource {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            Some(Ok(batch)) => Ok(Some(record_batch_rows(&batch))),
            Some(Err(e)) => {
                self.reader = None;
                CorruptContainerSnafu {
                    message: format!("csv decode failed: {e}"),
                }
                .fail()
            }
            None => {
                self.reader = None;
                Ok(None)
            }
        }
    }
}
