//! Top-level entry points tying sniffing, codecs, and log replay together.
//!
//! Two ways in: [`open_file`] classifies a single byte source and pairs it
//! with a codec from the registry, and [`open_table`] opens a directory as
//! a versioned table — replaying its transaction log to the latest version
//! and serving row reads over the live file manifest, with partition
//! values merged onto every decoded row.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use snafu::{Backtrace, prelude::*};

use crate::chunk::{BatchSource, ChunkRequest, ReadError, RowBatch, RowItem, RowWindow};
use crate::codec::{CodecRegistry, FormatCodec, SourceMetadata};
use crate::schema::ColumnField;
use crate::sniff::{Classification, FormatTag, Sniffer};
use crate::storage::{ByteSource, DirectorySource, StorageError, resolve_file};
use crate::transaction_log::{
    FileEntry, LogStore, ReplayError, TableState, TableStateEngine,
};

/// Errors from the table-level entry points.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// The sniffer could not recognize the source's format.
    #[snafu(display("Could not recognize the format of {name}"))]
    UnrecognizedFormat {
        /// Name of the source that defeated classification.
        name: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The directory is not a versioned table.
    #[snafu(display("{name} is not a versioned table (no transaction log)"))]
    NotVersionedTable {
        /// Name of the directory that was opened.
        name: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The table's transaction log holds no segments at all.
    #[snafu(display("The transaction log of {name} is empty"))]
    EmptyTable {
        /// Name of the table directory.
        name: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The registry has no codec for a recognized format.
    #[snafu(display("No codec registered for {format:?}"))]
    NoCodec {
        /// The format lacking a registry entry.
        format: FormatTag,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Log replay failed.
    #[snafu(transparent)]
    Replay {
        /// The underlying replay error.
        source: ReplayError,
    },

    /// A codec-level read failed.
    #[snafu(transparent)]
    Read {
        /// The underlying read error.
        source: ReadError,
    },

    /// A storage operation failed outside the log or codec layers.
    #[snafu(transparent)]
    Storage {
        /// The underlying storage error.
        source: StorageError,
    },
}

/// A classified single-file source, ready for metadata display or row reads.
pub struct OpenedFile {
    /// How the sniffer classified the source.
    pub classification: Classification,
    /// Metadata probed from the source without a full decode.
    pub metadata: SourceMetadata,
    source: Arc<dyn ByteSource>,
}

impl OpenedFile {
    /// The underlying byte source.
    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Open a windowed row stream over the file.
    pub async fn open_rows(
        &self,
        registry: &CodecRegistry,
        request: ChunkRequest,
    ) -> Result<RowWindow, TableError> {
        let codec = codec_for(registry, self.classification.tag)?;
        Ok(codec.open_rows(Arc::clone(&self.source), request).await?)
    }
}

fn codec_for(
    registry: &CodecRegistry,
    tag: FormatTag,
) -> Result<&Arc<dyn FormatCodec>, TableError> {
    registry.get(tag).context(NoCodecSnafu { format: tag })
}

/// Classify a single file and probe its metadata through the matching codec.
pub async fn open_file(
    source: Arc<dyn ByteSource>,
    registry: &CodecRegistry,
    sniffer: &Sniffer,
) -> Result<OpenedFile, TableError> {
    let classification = sniffer.classify_file(source.as_ref()).await;
    ensure!(
        classification.tag.is_recognized(),
        UnrecognizedFormatSnafu {
            name: source.name(),
        }
    );

    let codec = codec_for(registry, classification.tag)?;
    let metadata = codec.probe_metadata(&source).await?;
    Ok(OpenedFile {
        classification,
        metadata,
        source,
    })
}

/// A versioned table opened at its latest log version.
pub struct VersionedTable {
    root: Arc<dyn DirectorySource>,
    engine: TableStateEngine,
    state: TableState,
}

/// Open a directory as a versioned table, replaying to the latest version.
pub async fn open_table(
    root: Arc<dyn DirectorySource>,
    sniffer: &Sniffer,
) -> Result<VersionedTable, TableError> {
    let classification = sniffer.classify_dir(root.as_ref()).await;
    ensure!(
        classification.tag == FormatTag::VersionedTable,
        NotVersionedTableSnafu { name: root.name() }
    );

    let store = LogStore::new(Arc::clone(&root));
    let segments = store.load_all().await?;
    let mut engine = TableStateEngine::from_segments(segments);
    let latest = engine
        .latest_version()
        .context(EmptyTableSnafu { name: root.name() })?;
    let state = engine.replay_to(latest)?;

    Ok(VersionedTable {
        root,
        engine,
        state,
    })
}

impl VersionedTable {
    /// The state replayed most recently (initially the latest version).
    pub fn state(&self) -> &TableState {
        &self.state
    }

    /// The version of the current state.
    pub fn version(&self) -> u64 {
        self.state.version()
    }

    /// Latest version present in the log.
    pub fn latest_version(&self) -> Option<u64> {
        self.engine.latest_version()
    }

    /// Time travel: replay to `version` and make that the current state.
    pub fn state_at(&mut self, version: u64) -> Result<&TableState, TableError> {
        self.state = self.engine.replay_to(version)?;
        Ok(&self.state)
    }

    /// Open a windowed row stream over one live data file, with the file's
    /// partition values merged onto every decoded row. The merged columns
    /// are appended to the schema as nullable strings, mirroring how they
    /// are stored in the log.
    pub async fn read_file(
        &self,
        entry: &FileEntry,
        registry: &CodecRegistry,
        sniffer: &Sniffer,
        request: ChunkRequest,
    ) -> Result<RowWindow, TableError> {
        let source = resolve_file(&self.root, &entry.path).await?;
        let classification = sniffer.classify_file(source.as_ref()).await;
        ensure!(
            classification.tag.is_recognized(),
            UnrecognizedFormatSnafu {
                name: source.name(),
            }
        );
        let codec = codec_for(registry, classification.tag)?;

        // The codec window applies offset/limit; the merge wrapper only
        // decorates rows, re-chunked at the same size.
        let chunk_size = request.chunk_size_rows();
        let inner = codec.open_rows(source, request).await?;
        if entry.partition_values.is_empty() {
            return Ok(inner);
        }

        let schema = inner.schema().clone().with_appended(
            self.state
                .partition_columns()
                .iter()
                .map(|name| ColumnField::new(name.clone(), "string", true)),
        );
        let merge = PartitionMerge {
            inner,
            values: entry.partition_values.clone(),
        };
        Ok(RowWindow::over(
            schema,
            Box::new(merge),
            ChunkRequest::all(chunk_size)?,
        ))
    }
}

/// Decorates each decoded row with the owning file's partition values.
/// Existing row keys win over partition values on a name collision.
struct PartitionMerge {
    inner: RowWindow,
    values: HashMap<String, String>,
}

#[async_trait]
impl BatchSource for PartitionMerge {
    async fn next_batch(&mut self) -> Result<Option<RowBatch>, ReadError> {
        let Some(mut batch) = self.inner.next_batch().await? else {
            return Ok(None);
        };
        for item in &mut batch.rows {
            if let RowItem::Row(map) = item {
                for (column, value) in &self.values {
                    if !map.contains_key(column) {
                        map.insert(column.clone(), serde_json::Value::String(value.clone()));
                    }
                }
            }
        }
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryDir, MemoryFile};
    use crate::transaction_log::{LOG_DIR_NAME, segment_file_name};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const SCHEMA_STRING: &str = r#"{\"type\":\"struct\",\"fields\":[{\"name\":\"id\",\"type\":\"long\",\"nullable\":false},{\"name\":\"name\",\"type\":\"string\",\"nullable\":true}]}"#;

    fn bootstrap_line(partition_columns: &str) -> String {
        format!(
            r#"{{"metaData":{{"id":"t-1","schemaString":"{SCHEMA_STRING}","partitionColumns":{partition_columns}}}}}"#
        )
    }

    fn add_line(path: &str, partition_values: &str) -> String {
        format!(
            r#"{{"add":{{"path":"{path}","partitionValues":{partition_values},"size":10,"dataChange":true}}}}"#
        )
    }

    fn sample_table() -> Arc<dyn DirectorySource> {
        let log = MemoryDir::new(LOG_DIR_NAME)
            .with_file(
                segment_file_name(0),
                format!(
                    "{}\n{}\n",
                    bootstrap_line(r#"["region"]"#),
                    add_line("data/region=east/part-0.jsonl", r#"{"region":"east"}"#),
                )
                .into_bytes(),
            )
            .with_file(
                segment_file_name(1),
                format!(
                    "{}\n",
                    add_line("data/region=west/part-1.jsonl", r#"{"region":"west"}"#)
                )
                .into_bytes(),
            );

        let data = MemoryDir::new("data")
            .with_dir(
                MemoryDir::new("region=east").with_file(
                    "part-0.jsonl",
                    &b"{\"id\":1,\"name\":\"ann\"}\n{\"id\":2,\"name\":\"bob\"}\n"[..],
                ),
            )
            .with_dir(
                MemoryDir::new("region=west")
                    .with_file("part-1.jsonl", &b"{\"id\":3,\"name\":\"cal\"}\n"[..]),
            );

        Arc::new(MemoryDir::new("table").with_dir(log).with_dir(data))
    }

    #[tokio::test]
    async fn opens_at_latest_version_with_replayed_state() -> TestResult {
        let table = open_table(sample_table(), &Sniffer::default()).await?;

        assert_eq!(table.version(), 1);
        assert_eq!(table.state().live_files().len(), 2);
        assert_eq!(table.state().partition_columns(), ["region"]);
        assert_eq!(table.state().schema().field("id").unwrap().data_type, "long");
        Ok(())
    }

    #[tokio::test]
    async fn time_travel_swaps_the_current_state() -> TestResult {
        let mut table = open_table(sample_table(), &Sniffer::default()).await?;

        let at_v0 = table.state_at(0)?;
        assert_eq!(at_v0.version(), 0);
        assert_eq!(at_v0.live_files().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn read_file_merges_partition_values_onto_rows() -> TestResult {
        let table = open_table(sample_table(), &Sniffer::default()).await?;
        let registry = CodecRegistry::builtin();
        let sniffer = Sniffer::default();

        let entry = table
            .state()
            .live_files()
            .get("data/region=east/part-0.jsonl")
            .expect("east file")
            .clone();

        let window = table
            .read_file(&entry, &registry, &sniffer, ChunkRequest::all(16)?)
            .await?;
        assert!(window.schema().field("region").is_some());

        let rows = window.collect_rows().await?;
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let map = row.as_row().expect("well-formed row");
            assert_eq!(map["region"], serde_json::json!("east"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn read_file_applies_the_requested_window() -> TestResult {
        let table = open_table(sample_table(), &Sniffer::default()).await?;
        let registry = CodecRegistry::builtin();
        let sniffer = Sniffer::default();

        let entry = table
            .state()
            .live_files()
            .get("data/region=east/part-0.jsonl")
            .expect("east file")
            .clone();

        let rows = table
            .read_file(&entry, &registry, &sniffer, ChunkRequest::new(1, None, 16)?)
            .await?
            .collect_rows()
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_row().unwrap()["id"], serde_json::json!(2));
        Ok(())
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_versioned_table() {
        let dir: Arc<dyn DirectorySource> =
            Arc::new(MemoryDir::new("dump").with_file("a.csv", &b"a,b\n1,2\n"[..]));

        let err = open_table(dir, &Sniffer::default())
            .await
            .err()
            .expect("expected NotVersionedTable");
        assert!(matches!(err, TableError::NotVersionedTable { .. }));
    }

    #[tokio::test]
    async fn empty_log_is_a_typed_error() {
        let dir: Arc<dyn DirectorySource> =
            Arc::new(MemoryDir::new("table").with_dir(MemoryDir::new(LOG_DIR_NAME)));

        let err = open_table(dir, &Sniffer::default())
            .await
            .err()
            .expect("expected EmptyTable");
        assert!(matches!(err, TableError::EmptyTable { .. }));
    }

    #[tokio::test]
    async fn open_file_classifies_and_probes() -> TestResult {
        let source: Arc<dyn ByteSource> = Arc::new(MemoryFile::new(
            "rows.jsonl",
            &b"{\"id\":1}\n{\"id\":2}\n"[..],
        ));
        let registry = CodecRegistry::builtin();

        let opened = open_file(source, &registry, &Sniffer::default()).await?;
        assert_eq!(opened.classification.tag, FormatTag::JsonLines);
        assert_eq!(opened.metadata.row_count_estimate, Some(2));

        let rows = opened
            .open_rows(&registry, ChunkRequest::all(16)?)
            .await?
            .collect_rows()
            .await?;
        assert_eq!(rows.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn open_file_rejects_unrecognized_bytes() {
        let source: Arc<dyn ByteSource> =
            Arc::new(MemoryFile::new("noise.bin", vec![0x00, 0xff, 0x13, 0x37]));
        let registry = CodecRegistry::builtin();

        let err = open_file(source, &registry, &Sniffer::default())
            .await
            .err()
            .expect("expected UnrecognizedFormat");
        assert!(matches!(err, TableError::UnrecognizedFormat { .. }));
    }

    #[tokio::test]
    async fn missing_codec_is_reported_not_panicked() {
        let source: Arc<dyn ByteSource> = Arc::new(MemoryFile::new(
            "rows.jsonl",
            &b"{\"id\":1}\n{\"id\":2}\n"[..],
        ));
        let registry = CodecRegistry::empty();

        let err = open_file(source, &registry, &Sniffer::default())
            .await
            .err()
            .expect("expected NoCodec");
        assert!(matches!(
            err,
            TableError::NoCodec {
                format: FormatTag::JsonLines,
                ..
            }
        ));
    }
}
