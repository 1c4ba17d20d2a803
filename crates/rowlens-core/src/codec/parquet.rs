//! Parquet codec.
//!
//! Metadata comes from the footer; rows come from
//! `ParquetRecordBatchReaderBuilder` over the fetched bytes, with the batch
//! size pinned to the requested chunk size. `bytes::Bytes` satisfies the
//! parquet `ChunkReader` contract, so no temp files are involved and
//! dropping the window releases everything.

use std::sync::Arc;

use async_trait::async_trait;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use serde_json::json;
use snafu::prelude::*;

use crate::chunk::{
    BatchSource, ChunkRequest, CorruptContainerSnafu, ReadError, RowBatch, RowWindow, StorageSnafu,
};
use crate::codec::rows::record_batch_rows;
use crate::codec::{CodecCapability, FormatCodec, SourceMetadata};
use crate::schema::TableSchema;
use crate::storage::ByteSource;

/// Full-capability Parquet codec.
pub struct ParquetCodec;

#[async_trait]
impl FormatCodec for ParquetCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::Full
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).map_err(|e| {
            CorruptContainerSnafu {
                message: format!("parquet footer unreadable: {e}"),
            }
            .build()
        })?;

        let file_meta = builder.metadata().file_metadata();
        let row_count = u64::try_from(file_meta.num_rows()).unwrap_or(0);
        let num_row_groups = builder.metadata().num_row_groups();
        let created_by = file_meta.created_by().map(str::to_string);

        Ok(SourceMetadata {
            schema: TableSchema::from_arrow(builder.schema()),
            row_count_estimate: Some(row_count),
            format_info: json!({
                "numRowGroups": num_row_groups,
                "createdBy": created_by,
            }),
        })
    }

    async fn open_rows(
        &self,
        source: Arc<dyn ByteSource>,
        request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes).map_err(|e| {
            CorruptContainerSnafu {
                message: format!("parquet footer unreadable: {e}"),
            }
            .build()
        })?;
        let schema = TableSchema::from_arrow(builder.schema());
        let reader = builder
            .with_batch_size(request.chunk_size_rows())
            .build()
            .map_err(|e| {
                CorruptContainerSnafu {
                    message: format!("parquet reader construction failed: {e}"),
                }
                .build()
            })?;

        let batch_source = ParquetBatchSource { reader: Some(reader) };
        Ok(RowWindow::over(schema, Box::new(batch_source), request))
    }
}

struct ParquetBatchSource {
    /// `None` after a fatal decode error; the reader is dropped eagerly.
    reader: Option<ParquetRecordBatchReader>,
}

#[async_trait]
impl BatchSource for ParquetBatchSource {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            Some(Ok(batch)) => Ok(Some(record_batch_rows(&batch))),
            Some(Err(e)) => {
                self.reader = None;
                CorruptContainerSnafu {
                    message: format!("parquet decode failed: {e}"),
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
