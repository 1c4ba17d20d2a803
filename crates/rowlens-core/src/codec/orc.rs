//! ORC codec (metadata only).
//!
//! The ORC footer is a protobuf payload, so without a decoder the codec
//! only validates the container magic and reports size facts. Recognized
//! files still get a metadata card in the viewer instead of an error;
//! `open_rows` reports [`ReadError::UnsupportedCapability`].

use std::sync::Arc;

use async_trait::async_trait;
use snafu::prelude::*;

use crate::chunk::{
    ChunkRequest, CorruptContainerSnafu, ReadError, RowWindow, StorageSnafu,
    UnsupportedCapabilitySnafu,
};
use crate::codec::{CodecCapability, FormatCodec, SourceMetadata};
use crate::schema::TableSchema;
use crate::sniff::FormatTag;
use crate::storage::ByteSource;

const ORC_MAGIC: &[u8; 3] = b"ORC";

/// Metadata-only ORC codec.
pub struct OrcCodec;

#[async_trait]
impl FormatCodec for OrcCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::MetadataOnly
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let len = source.len().await.context(StorageSnafu)?;
        let head = source
            .read_range(0, ORC_MAGIC.len() as u64)
            .await
            .context(StorageSnafu)?;
        if head.as_ref() != ORC_MAGIC {
            return CorruptContainerSnafu {
                message: "missing ORC container magic",
            }
            .fail();
        }

        Ok(SourceMetadata {
            schema: TableSchema::default(),
            row_count_estimate: None,
            format_info: serde_json::json!({ "sizeBytes": len }),
        })
    }

    async fn open_rows(
        &self,
        _source: Arc<dyn ByteSource>,
        _request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        UnsupportedCapabilitySnafu {
            format: FormatTag::Orc,
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFile;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn probe_validates_magic_and_reports_size() -> TestResult {
        let source: Arc<dyn ByteSource> =
            Arc::new(MemoryFile::new("data.orc", b"ORC\x01rest-of-file".to_vec()));

        let meta = OrcCodec.probe_metadata(&source).await?;
        assert!(meta.schema.is_empty());
        assert_eq!(meta.row_count_estimate, None);
        assert_eq!(meta.format_info["sizeBytes"], serde_json::json!(16));
        Ok(())
    }

    #[tokio::test]
    async fn open_rows_is_unsupported() -> TestResult {
        let source: Arc<dyn ByteSource> =
            Arc::new(MemoryFile::new("data.orc", b"ORC\x01".to_vec()));

        let err = OrcCodec
            .open_rows(source, ChunkRequest::all(10)?)
            .await
            .err()
            .expect("expected UnsupportedCapability");
        assert!(matches!(
            err,
            ReadError::UnsupportedCapability {
                format: FormatTag::Orc,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_orc_bytes_are_rejected() {
        let source: Arc<dyn ByteSource> =
            Arc::new(MemoryFile::new("fake.orc", b"PAR1".to_vec()));

        let err = OrcCodec
            .probe_metadata(&source)
            .await
            .expect_err("expected CorruptContainer");
        assert!(matches!(err, ReadError::CorruptContainer { .. }));
    }
}
