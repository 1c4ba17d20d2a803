//! Whole-document JSON codec.
//!
//! A `.json` source is one document: a top-level array yields one row per
//! element, and any other top-level value yields a single row. Unlike the
//! line-oriented codec there is no per-record recovery — an unparseable
//! document is a corrupt container, not a malformed row.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::chunk::{
    BatchSource, ChunkRequest, CorruptContainerSnafu, ReadError, RowBatch, RowItem, RowWindow,
    StorageSnafu,
};
use crate::codec::{CodecCapability, FormatCodec, SourceMetadata};
use crate::schema::TableSchema;
use crate::storage::ByteSource;

/// Full-capability codec for single-document JSON sources.
pub struct JsonCodec;

fn document_rows(doc: Value) -> Vec<RowItem> {
    let wrap = |value: Value| match value {
        Value::Object(map) => RowItem::Row(map),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            RowItem::Row(map)
        }
    };

    match doc {
        Value::Array(items) => items.into_iter().map(wrap).collect(),
        other => vec![wrap(other)],
    }
}

async fn load_rows(source: &Arc<dyn ByteSource>) -> Result<Vec<RowItem>, ReadError> {
    let bytes = source.read_all().await.context(StorageSnafu)?;
    let doc: Value = serde_json::from_slice(&bytes).map_err(|e| {
        CorruptContainerSnafu {
            message: format!("invalid JSON document: {e}"),
        }
        .build()
    })?;
    Ok(document_rows(doc))
}

#[async_trait]
impl FormatCodec for JsonCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::Full
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let rows = load_rows(source).await?;
        let maps = rows.iter().filter_map(RowItem::as_row);
        Ok(SourceMetadata {
            schema: TableSchema::infer_from_rows(maps),
            row_count_estimate: Some(rows.len() as u64),
            format_info: serde_json::json!({ "topLevel": "document" }),
        })
    }

    async fn open_rows(
        &self,
        source: Arc<dyn ByteSource>,
        request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        let rows = load_rows(&source).await?;
        let schema = TableSchema::infer_from_rows(rows.iter().filter_map(RowItem::as_row));
        let batch_source = DocumentBatchSource { rows: Some(rows) };
        Ok(RowWindow::over(schema, Box::new(batch_source), request))
    }
}

/// Yields the decoded document as a single batch, then ends.
struct DocumentBatchSource {
    rows: Option<Vec<RowItem>>,
}

#[async_trait]
impl BatchSource for DocumentBatchSource {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        Ok(self.rows.take().map(|rows| RowBatch { rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFile;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn file(body: &str) -> Arc<dyn ByteSource> {
        Arc::new(MemoryFile::new("data.json", body.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn array_of_objects_yields_one_row_per_element() -> TestResult {
        let source = file(r#"[{"id":1},{"id":2},{"id":3}]"#);
        let meta = JsonCodec.probe_metadata(&source).await?;
        assert_eq!(meta.row_count_estimate, Some(3));
        assert_eq!(meta.schema.field("id").unwrap().data_type, "long");

        let rows = JsonCodec
            .open_rows(source, ChunkRequest::new(1, Some(1), 10)?)
            .await?
            .collect_rows()
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_row().unwrap()["id"], serde_json::json!(2));
        Ok(())
    }

    #[tokio::test]
    async fn single_object_yields_one_row() -> TestResult {
        let source = file(r#"{"name":"config","version":7}"#);
        let rows = JsonCodec
            .open_rows(source, ChunkRequest::all(10)?)
            .await?
            .collect_rows()
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].as_row().unwrap()["version"],
            serde_json::json!(7)
        );
        Ok(())
    }

    #[tokio::test]
    async fn mixed_array_wraps_non_object_elements() -> TestResult {
        let source = file(r#"[{"id":1}, 2, "three"]"#);
        let rows = JsonCodec
            .open_rows(source, ChunkRequest::all(10)?)
            .await?
            .collect_rows()
            .await?;
        assert_eq!(rows[1].as_row().unwrap()["value"], serde_json::json!(2));
        assert_eq!(
            rows[2].as_row().unwrap()["value"],
            serde_json::json!("three")
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_document_is_a_corrupt_container() {
        let source = file("{ definitely not json");
        let err = JsonCodec
            .probe_metadata(&source)
            .await
            .expect_err("expected CorruptContainer");
        assert!(matches!(err, ReadError::CorruptContainer { .. }));
    }
}
