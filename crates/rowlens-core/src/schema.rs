//! Logical schema model shared by codecs and the transaction log.
//!
//! A [`TableSchema`] is an ordered list of named, typed, nullable columns.
//! Types are carried as display strings (`"string"`, `"long"`, ...) because
//! the viewer only needs them for presentation and column alignment, not for
//! kernel dispatch. Three conversions feed it:
//!
//! - Delta `metaData.schemaString` documents (a JSON-encoded struct schema),
//! - Arrow schemas reported by the parquet/arrow/csv readers,
//! - inference over a bounded sample of decoded JSON rows, for schemaless
//!   text formats.

use arrow::datatypes::{DataType, Schema as ArrowSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{Backtrace, prelude::*};

/// Errors raised while parsing a schema document.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// The schema document is not valid JSON.
    #[snafu(display("Schema document is not valid JSON: {message}"))]
    InvalidDocument {
        /// Parser error message.
        message: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The schema document parsed but is not a struct schema.
    #[snafu(display("Schema document is not a struct (found type {found:?})"))]
    NotAStruct {
        /// The `type` value found at the document root.
        found: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// One column in a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnField {
    /// Column name as stored in the schema.
    pub name: String,
    /// Display form of the column type (for example `"string"`, `"long"`,
    /// or the compact JSON text of a nested type).
    pub data_type: String,
    /// Whether the column allows null values.
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnField {
    /// Shorthand constructor.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Ordered column list describing the rows of a source or table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    fields: Vec<ColumnField>,
}

impl TableSchema {
    /// Build a schema from an ordered list of columns.
    pub fn new(fields: Vec<ColumnField>) -> Self {
        Self { fields }
    }

    /// The ordered columns of this schema.
    pub fn fields(&self) -> &[ColumnField] {
        &self.fields
    }

    /// Whether the schema carries no columns (unknown or schemaless source).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a column by name.
    pub fn field(&self, name: &str) -> Option<&ColumnField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Return a copy of this schema with extra columns appended, skipping
    /// names already present. Used to reflect partition columns merged onto
    /// decoded rows.
    pub fn with_appended(&self, extra: impl IntoIterator<Item = ColumnField>) -> Self {
        let mut fields = self.fields.clone();
        for field in extra {
            if !fields.iter().any(|f| f.name == field.name) {
                fields.push(field);
            }
        }
        Self { fields }
    }

    /// Convert an Arrow schema into a display schema.
    pub fn from_arrow(schema: &ArrowSchema) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|f| ColumnField {
                name: f.name().clone(),
                data_type: arrow_type_name(f.data_type()),
                nullable: f.is_nullable(),
            })
            .collect();
        Self { fields }
    }

    /// Parse a Delta `schemaString` document:
    /// `{"type":"struct","fields":[{"name":...,"type":...,"nullable":...}]}`.
    ///
    /// Field types may themselves be strings (primitives) or nested objects
    /// (struct/array/map); nested types are carried as their compact JSON
    /// text rather than flattened.
    pub fn parse_struct_document(doc: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(doc).map_err(|e| {
            InvalidDocumentSnafu {
                message: e.to_string(),
            }
            .build()
        })?;

        let root_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");
        ensure!(root_type == "struct", NotAStructSnafu { found: root_type });

        let mut fields = Vec::new();
        if let Some(raw_fields) = value.get("fields").and_then(Value::as_array) {
            for raw in raw_fields {
                let Some(name) = raw.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let data_type = match raw.get("type") {
                    Some(Value::String(s)) => s.clone(),
                    Some(nested) => nested.to_string(),
                    None => "<unknown>".to_string(),
                };
                let nullable = raw
                    .get("nullable")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                fields.push(ColumnField {
                    name: name.to_string(),
                    data_type,
                    nullable,
                });
            }
        }
        Ok(Self { fields })
    }

    /// Infer a schema from a bounded sample of decoded rows.
    ///
    /// Columns appear in first-seen order. The type comes from the first
    /// non-null value observed; a column is nullable if any sampled row has
    /// it null or missing.
    pub fn infer_from_rows<'a>(
        rows: impl IntoIterator<Item = &'a serde_json::Map<String, Value>>,
    ) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut types: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut nullable: std::collections::HashMap<String, bool> =
            std::collections::HashMap::new();
        let mut sampled = 0usize;

        let rows: Vec<_> = rows.into_iter().collect();
        for row in &rows {
            sampled += 1;
            for (key, value) in row.iter() {
                if !types.contains_key(key) && !nullable.contains_key(key) {
                    order.push(key.clone());
                }
                if value.is_null() {
                    nullable.insert(key.clone(), true);
                } else {
                    types.entry(key.clone()).or_insert_with(|| json_type_name(value));
                    nullable.entry(key.clone()).or_insert(false);
                }
            }
        }
        // A column absent from some sampled row is nullable.
        for name in &order {
            let present_everywhere = rows.iter().all(|r| r.contains_key(name));
            if !present_everywhere && sampled > 0 {
                nullable.insert(name.clone(), true);
            }
        }

        let fields = order
            .into_iter()
            .map(|name| ColumnField {
                data_type: types.get(&name).cloned().unwrap_or_else(|| "null".to_string()),
                nullable: nullable.get(&name).copied().unwrap_or(true),
                name,
            })
            .collect();
        Self { fields }
    }
}

fn json_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "long",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "struct",
    }
    .to_string()
}

fn arrow_type_name(dt: &DataType) -> String {
    match dt {
        DataType::Boolean => "boolean".to_string(),
        DataType::Int8 => "byte".to_string(),
        DataType::Int16 => "short".to_string(),
        DataType::Int32 => "integer".to_string(),
        DataType::Int64 => "long".to_string(),
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            "long".to_string()
        }
        DataType::Float16 | DataType::Float32 => "float".to_string(),
        DataType::Float64 => "double".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "string".to_string(),
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => "binary".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Timestamp(_, _) => "timestamp".to_string(),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => {
            format!("decimal({p},{s})")
        }
        other => other.to_string().to_lowercase(),
    }
}
