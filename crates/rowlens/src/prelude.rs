//! Wrapper prelude.
//!
//! The `rowlens` crate is the supported public entry point. Downstream code
//! should prefer importing from this prelude instead of depending on
//! internal core module paths.

pub use crate::codec;
pub use crate::storage;
pub use crate::{
    ChunkRequest, Classification, ColumnField, FileEntry, FormatTag, OpenedFile, ReadError,
    ReplayError, RowBatch, RowItem, RowWindow, Sniffer, TableError, TableSchema, TableState,
    VersionedTable, open_file, open_table,
};
