//! # rowlens
//!
//! Open a file or directory in any of the supported data formats and read
//! it as a windowed stream of JSON rows.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `rowlens-core`: format sniffing, codec dispatch,
//! chunked row reads, and versioned-table log replay with time travel.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rowlens::prelude::*;
//! ```
#![deny(missing_docs)]

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Codec namespace (wrapper-only).
pub mod codec {
    pub use rowlens_core::codec::{
        CodecCapability, CodecRegistry, FormatCodec, SourceMetadata,
    };
}

/// Storage backends (wrapper-only).
pub mod storage {
    pub use rowlens_core::storage::{
        ByteSource, DirEntry, DirEntryKind, DirectorySource, LocalDir, LocalFile, MemoryDir,
        MemoryFile, StorageError, resolve_file,
    };
}

pub use rowlens_core::chunk::{
    BatchSource, ChunkRequest, ReadError, RowBatch, RowItem, RowWindow,
};
pub use rowlens_core::schema::{ColumnField, SchemaError, TableSchema};
pub use rowlens_core::sniff::{Classification, FormatTag, Sniffer};
pub use rowlens_core::table::{OpenedFile, TableError, VersionedTable, open_file, open_table};
pub use rowlens_core::transaction_log::{
    EnginePhase, FileEntry, ReplayError, TableState, TableStateEngine,
};
