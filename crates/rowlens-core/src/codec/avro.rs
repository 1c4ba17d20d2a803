//! Avro object-container codec (metadata only).
//!
//! Full Avro row decoding is out of scope, but the container header is
//! simple enough to read directly: after the `Obj\x01` magic comes a file
//! metadata map of string keys to byte values, then a 16-byte sync marker.
//! The `avro.schema` entry holds the writer schema as JSON, which converts
//! to a display schema; walking the block headers (row count + byte size
//! per block) yields an exact row count without decoding a single record.
//!
//! `open_rows` reports [`ReadError::UnsupportedCapability`] so callers
//! degrade to the metadata view.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;

use crate::chunk::{
    ChunkRequest, CorruptContainerSnafu, ReadError, RowWindow, StorageSnafu,
    UnsupportedCapabilitySnafu,
};
use crate::codec::{CodecCapability, FormatCodec, SourceMetadata};
use crate::schema::{ColumnField, TableSchema};
use crate::sniff::FormatTag;
use crate::storage::ByteSource;

const AVRO_MAGIC: &[u8; 4] = b"Obj\x01";
const SYNC_MARKER_LEN: usize = 16;

/// Metadata-only Avro codec.
pub struct AvroCodec;

#[async_trait]
impl FormatCodec for AvroCodec {
    fn capability(&self) -> CodecCapability {
        CodecCapability::MetadataOnly
    }

    async fn probe_metadata(
        &self,
        source: &Arc<dyn ByteSource>,
    ) -> Result<SourceMetadata, ReadError> {
        let bytes = source.read_all().await.context(StorageSnafu)?;
        let header = parse_header(&bytes)?;

        let schema = match header.schema_json.as_ref() {
            Some(doc) => avro_schema_to_table(doc),
            None => TableSchema::default(),
        };
        // Block walking is best-effort; a writer that died mid-block should
        // not make the whole probe fail.
        let row_count_estimate = count_block_rows(&bytes, header.body_offset, &header.sync_marker);

        Ok(SourceMetadata {
            schema,
            row_count_estimate,
            format_info: serde_json::json!({
                "codec": header.codec,
                "exactCount": row_count_estimate.is_some(),
            }),
        })
    }

    async fn open_rows(
        &self,
        _source: Arc<dyn ByteSource>,
        _request: ChunkRequest,
    ) -> Result<RowWindow, ReadError> {
        UnsupportedCapabilitySnafu {
            format: FormatTag::Avro,
        }
        .fail()
    }
}

struct AvroHeader {
    schema_json: Option<Value>,
    codec: String,
    sync_marker: [u8; SYNC_MARKER_LEN],
    /// Offset of the first data block, just past the sync marker.
    body_offset: usize,
}

fn corrupt(message: impl Into<String>) -> ReadError {
    CorruptContainerSnafu {
        message: message.into(),
    }
    .build()
}

/// Decode one zigzag-varint long, advancing `pos`.
fn read_long(bytes: &[u8], pos: &mut usize) -> Result<i64, ReadError> {
    let mut accum: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| corrupt("truncated varint in avro container"))?;
        *pos += 1;
        accum |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(corrupt("overlong varint in avro container"));
        }
    }
    // Zigzag decode.
    Ok(((accum >> 1) as i64) ^ -((accum & 1) as i64))
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ReadError> {
    let len = read_long(bytes, pos)?;
    let len = usize::try_from(len).map_err(|_| corrupt("negative length in avro container"))?;
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| corrupt("truncated value in avro container"))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn parse_header(bytes: &[u8]) -> Result<AvroHeader, ReadError> {
    if bytes.len() < AVRO_MAGIC.len() || &bytes[..AVRO_MAGIC.len()] != AVRO_MAGIC {
        return Err(corrupt("missing avro container magic"));
    }
    let mut pos = AVRO_MAGIC.len();

    let mut schema_json = None;
    let mut codec = "null".to_string();

    // The metadata map arrives in blocks; a zero count ends it. A negative
    // count means "block with a byte size prefix".
    loop {
        let mut count = read_long(bytes, &mut pos)?;
        if count == 0 {
            break;
        }
        if count < 0 {
            count = -count;
            let _block_bytes = read_long(bytes, &mut pos)?;
        }
        for _ in 0..count {
            let key = String::from_utf8_lossy(read_bytes(bytes, &mut pos)?).into_owned();
            let value = read_bytes(bytes, &mut pos)?;
            match key.as_str() {
                "avro.schema" => {
                    schema_json = Some(serde_json::from_slice(value).map_err(|e| {
                        corrupt(format!("avro.schema is not valid JSON: {e}"))
                    })?);
                }
                "avro.codec" => {
                    codec = String::from_utf8_lossy(value).into_owned();
                }
                _ => {}
            }
        }
    }

    let sync_end = pos
        .checked_add(SYNC_MARKER_LEN)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| corrupt("truncated sync marker in avro container"))?;
    let mut sync_marker = [0u8; SYNC_MARKER_LEN];
    sync_marker.copy_from_slice(&bytes[pos..sync_end]);

    Ok(AvroHeader {
        schema_json,
        codec,
        sync_marker,
        body_offset: sync_end,
    })
}

/// Sum row counts from block headers. Each block is `count, size, data,
/// sync`; a marker mismatch or truncation aborts with `None`.
fn count_block_rows(bytes: &[u8], mut pos: usize, sync_marker: &[u8; SYNC_MARKER_LEN]) -> Option<u64> {
    let mut rows = 0u64;
    while pos < bytes.len() {
        let count = read_long(bytes, &mut pos).ok()?;
        let size = usize::try_from(read_long(bytes, &mut pos).ok()?).ok()?;
        rows = rows.checked_add(u64::try_from(count).ok()?)?;
        pos = pos.checked_add(size)?;
        let sync_end = pos.checked_add(SYNC_MARKER_LEN)?;
        if sync_end > bytes.len() || &bytes[pos..sync_end] != sync_marker {
            return None;
        }
        pos = sync_end;
    }
    Some(rows)
}

/// Convert an Avro record schema document into a display schema.
///
/// Union types of the form `["null", T]` surface as a nullable `T`; other
/// unions are carried as their compact JSON text.
fn avro_schema_to_table(doc: &Value) -> TableSchema {
    let Some(fields) = doc.get("fields").and_then(Value::as_array) else {
        return TableSchema::default();
    };

    let columns = fields
        .iter()
        .filter_map(|field| {
            let name = field.get("name")?.as_str()?;
            let (data_type, nullable) = avro_type_name(field.get("type")?);
            Some(ColumnField::new(name, data_type, nullable))
        })
        .collect();
    TableSchema::new(columns)
}

fn avro_type_name(ty: &Value) -> (String, bool) {
    match ty {
        Value::String(name) => (avro_primitive_name(name), false),
        Value::Array(branches) => {
            let non_null: Vec<&Value> = branches
                .iter()
                .filter(|b| b.as_str() != Some("null"))
                .collect();
            let nullable = non_null.len() < branches.len();
            match non_null.as_slice() {
                [single] => {
                    let (name, inner_nullable) = avro_type_name(single);
                    (name, nullable || inner_nullable)
                }
                _ => (ty.to_string(), nullable),
            }
        }
        Value::Object(obj) => {
            if let Some(logical) = obj.get("logicalType").and_then(Value::as_str) {
                return (avro_logical_name(logical), false);
            }
            match obj.get("type").and_then(Value::as_str) {
                Some("array") => ("array".to_string(), false),
                Some("map") => ("map".to_string(), false),
                Some("record") => ("struct".to_string(), false),
                Some("enum") | Some("fixed") => ("string".to_string(), false),
                Some(primitive) => (avro_primitive_name(primitive), false),
                None => (ty.to_string(), false),
            }
        }
        other => (other.to_string(), false),
    }
}

fn avro_primitive_name(name: &str) -> String {
    match name {
        "int" => "integer",
        "bytes" => "binary",
        other => other,
    }
    .to_string()
}

fn avro_logical_name(logical: &str) -> String {
    match logical {
        "date" => "date".to_string(),
        "decimal" => "decimal".to_string(),
        l if l.starts_with("timestamp-") => "timestamp".to_string(),
        l if l.starts_with("time-") => "time".to_string(),
        other => other.to_string(),
    }
}
