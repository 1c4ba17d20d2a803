//! Segment discovery and loading over a directory source.
//!
//! [`LogStore`] owns all interaction with the reserved log subdirectory:
//! finding it, listing segment files by the naming convention, and loading
//! individual segments in version order. It stays read-only — the viewer
//! never writes to a table it is inspecting — and leaves all interpretation
//! of actions to the state engine.

use std::sync::Arc;

use snafu::prelude::*;

use crate::storage::{DirEntryKind, DirectorySource, StorageError};
use crate::transaction_log::segments::{parse_segment, segment_file_name, segment_file_version, SegmentActions};
use crate::transaction_log::{MissingLogDirSnafu, ReplayError, StorageSnafu, LOG_DIR_NAME};

/// Read-only access to the transaction log under a table root.
pub struct LogStore {
    root: Arc<dyn DirectorySource>,
}

impl LogStore {
    /// Create a store rooted at a table directory (the parent of the
    /// reserved log subdirectory).
    pub fn new(root: Arc<dyn DirectorySource>) -> Self {
        Self { root }
    }

    async fn log_dir(&self) -> Result<Arc<dyn DirectorySource>, ReplayError> {
        match self.root.open_dir(LOG_DIR_NAME).await {
            Ok(dir) => Ok(dir),
            Err(StorageError::NotFound { .. }) | Err(StorageError::NotADirectory { .. }) => {
                MissingLogDirSnafu {
                    table: self.root.name(),
                }
                .fail()
            }
            Err(source) => Err(ReplayError::Storage { source }),
        }
    }

    /// List segment versions present in the log, sorted ascending.
    /// Non-segment files (`.crc` sidecars, checkpoints) are ignored.
    pub async fn segment_versions(&self) -> Result<Vec<u64>, ReplayError> {
        let log_dir = self.log_dir().await?;
        let entries = log_dir.list().await.context(StorageSnafu)?;

        let mut versions: Vec<u64> = entries
            .iter()
            .filter(|e| e.kind == DirEntryKind::File)
            .filter_map(|e| segment_file_version(&e.name))
            .collect();
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }

    /// Latest segment version present, or `None` for an empty log.
    pub async fn latest_version(&self) -> Result<Option<u64>, ReplayError> {
        Ok(self.segment_versions().await?.last().copied())
    }

    /// Load and parse the segment for one version.
    pub async fn load_segment(&self, version: u64) -> Result<SegmentActions, ReplayError> {
        let log_dir = self.log_dir().await?;
        let file = log_dir
            .open_file(&segment_file_name(version))
            .await
            .context(StorageSnafu)?;
        let bytes = file.read_all().await.context(StorageSnafu)?;
        Ok(parse_segment(&bytes, version))
    }

    /// Load every segment present, sorted by version. This is the engine's
    /// required input order; the reader never sorts across segments itself.
    pub async fn load_all(&self) -> Result<Vec<SegmentActions>, ReplayError> {
        let versions = self.segment_versions().await?;
        let mut segments = Vec::with_capacity(versions.len());
        for version in versions {
            segments.push(self.load_segment(version).await?);
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDir;
    use crate::transaction_log::actions::LogAction;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn table_with_log(segments: &[(u64, &str)]) -> Arc<dyn DirectorySource> {
        let mut log = MemoryDir::new(LOG_DIR_NAME);
        for (version, body) in segments {
            log = log.with_file(segment_file_name(*version), body.as_bytes().to_vec());
        }
        Arc::new(MemoryDir::new("table").with_dir(log))
    }

    #[tokio::test]
    async fn discovers_segments_sorted_ignoring_sidecars() -> TestResult {
        let log = MemoryDir::new(LOG_DIR_NAME)
            .with_file(segment_file_name(1), &br#"{"add":{"path":"b","size":1}}"#[..])
            .with_file(segment_file_name(0), &br#"{"add":{"path":"a","size":1}}"#[..])
            .with_file("00000000000000000000.crc", &b"sidecar"[..])
            .with_file("_last_checkpoint", &b"{}"[..]);
        let root: Arc<dyn DirectorySource> = Arc::new(MemoryDir::new("table").with_dir(log));

        let store = LogStore::new(root);
        assert_eq!(store.segment_versions().await?, vec![0, 1]);
        assert_eq!(store.latest_version().await?, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn load_all_returns_version_order() -> TestResult {
        let root = table_with_log(&[
            (2, r#"{"remove":{"path":"p"}}"#),
            (0, r#"{"add":{"path":"p","size":1}}"#),
            (1, r#"{"add":{"path":"q","size":2}}"#),
        ]);

        let store = LogStore::new(root);
        let segments = store.load_all().await?;
        let versions: Vec<_> = segments.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert!(matches!(
            segments[2].actions[0].action,
            LogAction::RemoveFile(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_log_dir_is_a_typed_error() {
        let root: Arc<dyn DirectorySource> =
            Arc::new(MemoryDir::new("plain").with_file("data.csv", &b"a,b\n1,2\n"[..]));

        let store = LogStore::new(root);
        let err = store
            .segment_versions()
            .await
            .expect_err("expected MissingLogDir");
        assert!(matches!(err, ReplayError::MissingLogDir { .. }));
    }

    #[tokio::test]
    async fn empty_log_reports_no_latest_version() -> TestResult {
        let root: Arc<dyn DirectorySource> =
            Arc::new(MemoryDir::new("table").with_dir(MemoryDir::new(LOG_DIR_NAME)));

        let store = LogStore::new(root);
        assert_eq!(store.latest_version().await?, None);
        Ok(())
    }
}
