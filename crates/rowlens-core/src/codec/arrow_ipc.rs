//! Arrow IPC file codec.
//!
//! Handles the file-format IPC container (`ARROW1` magic with a footer).
//! The footer carries the schema and record-batch count, so probing never
//! decodes rows; the row stream walks the batches through
//! `arrow::ipc::reader::FileReader`.

use std::io::Cursor;
use std::sync::Arc;

use arrow::ipc::reader::FileReader;
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

/// Full-capability Arrow IPC file codec.
pub struct ArrowIpcCodec;

fn open_reader(bytes: Bytes) -> Result<FileReader<Cursor<Bytes>>, ReadError> {
    FileReader::try_new(Cursor::new(bytes), None).map_err(|e| {
        CorruptContainerSnafu {
            message: format!("arrow ipc footer unreadable: {e}"),
        }
        .build()
    })
}

#[async_trait]
impl FormatCodec for ArrowIpcCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::Full
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let reader = open_reader(bytes)?;
        let schema = TableSchema::from_arrow(&reader.schema());
        let num_batches = reader.num_batches();

        // The footer records batch count but not row count; walking the
        // batches gives the exact total since the bytes are already local.
        let mut rows = 0u64;
        for batch in reader {
            let batch = batch.map_err(|e| {
                CorruptContainerSnafu {
                    message: format!("arrow ipc batch unreadable: {e}"),
                }
                .build()
            })?;
            rows += batch.num_rows() as u64;
        }

        Ok(SourceMetadata {
            schema,
            row_count_estimate: Some(rows),
            format_info: serde_json::json!({ "numBatches": num_batches }),
        })
    }

    async fn open_rows(
        &self,
        source: Arc<dyn ByteSource>,
        request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let reader = open_reader(bytes)?;
        let schema = TableSchema::from_arrow(&reader.schema());

        let batch_source = IpcBatchSource { reader: Some(reader) };
        Ok(RowWindow::over(schema, Box::new(batch_source), request))
    }
}

struct IpcBatchSource {
    reader: Option<FileReader<Cursor<Bytes>>>,
}

#[async_trait]
impl BatchSource for IpcBatchSource {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            Some(Ok(batch)) => Ok(Some(record_batch_rows(&batch))),
            Some(Err(e)) => {
                self.reader = None;
                CorruptContainerSnafu {
                    message: format!("arrow ipc decode failed: {e}"),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFile;
    use arrow::array::{Int64Array, RecordBatch, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::FileWriter;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_ipc_bytes(batches: &[&[i64]]) -> Vec<u8> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let mut out = Vec::new();
        {
            let mut writer = FileWriter::try_new(&mut out, &schema).expect("writer");
            for ids in batches {
                let names: Vec<String> = ids.iter().map(|i| format!("row-{i}")).collect();
                let batch = RecordBatch::try_new(
                    Arc::clone(&schema),
                    vec![
                        Arc::new(Int64Array::from(ids.to_vec())),
                        Arc::new(StringArray::from(names)),
                    ],
                )
                .expect("valid batch");
                writer.write(&batch).expect("write batch");
            }
            writer.finish().expect("finish");
        }
        out
    }

    #[tokio::test]
    async fn probe_reports_schema_batches_and_rows() -> TestResult {
        let source: Arc<dyn ByteSource> = Arc::new(MemoryFile::new(
            "data.arrow",
            sample_ipc_bytes(&[&[1, 2, 3], &[4, 5]]),
        ));

        let meta = ArrowIpcCodec.probe_metadata(&source).await?;
        assert_eq!(meta.row_count_estimate, Some(5));
        assert_eq!(meta.format_info["numBatches"], serde_json::json!(2));
        assert_eq!(meta.schema.field("name").unwrap().data_type, "string");
        Ok(())
    }

    #[tokio::test]
    async fn rows_window_across_ipc_batches() -> TestResult {
        let source: Arc<dyn ByteSource> = Arc::new(MemoryFile::new(
            "data.arrow",
            sample_ipc_bytes(&[&[1, 2, 3], &[4, 5, 6], &[7]]),
        ));

        let window = ArrowIpcCodec
            .open_rows(source, ChunkRequest::new(2, Some(4), 3)?)
            .await?;
        let rows = window.collect_rows().await?;
        let ids: Vec<_> = rows
            .iter()
            .map(|r| r.as_row().unwrap()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
        Ok(())
    }

    #[tokio::test]
    async fn truncated_container_is_rejected() {
        let source: Arc<dyn ByteSource> =
            Arc::new(MemoryFile::new("bad.arrow", b"ARROW1\x00\x00oops".to_vec()));

        let err = ArrowIpcCodec
            .probe_metadata(&source)
            .await
            .expect_err("expected CorruptContainer");
        assert!(matches!(err, ReadError::CorruptContainer { .. }));
    }
}
