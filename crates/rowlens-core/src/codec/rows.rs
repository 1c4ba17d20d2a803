//! Conversion from Arrow record batches to viewer rows.
//!
//! The parquet, arrow-ipc, and csv codecs all decode into Arrow record
//! batches; this helper flattens each batch into JSON field maps so every
//! codec yields the same row shape. Common primitive types map to native
//! JSON values; everything else falls back to Arrow's display rendering so
//! no type panics the viewer.

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, LargeStringArray, RecordBatch, StringArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::DataType;
use arrow::util::display::array_value_to_string;
use serde_json::{Number, Value};

use crate::chunk::{RowBatch, RowItem};

/// Flatten a record batch into one [`RowItem::Row`] per row.
pub(crate) fn record_batch_rows(batch: &RecordBatch) -> RowBatch {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());

    for row_idx in 0..batch.num_rows() {
        let mut map = serde_json::Map::with_capacity(batch.num_columns());
        for (col_idx, field) in schema.fields().iter().enumerate() {
            let column = batch.column(col_idx);
            map.insert(field.name().clone(), cell_value(column.as_ref(), row_idx));
        }
        rows.push(RowItem::Row(map));
    }
    RowBatch { rows }
}

fn cell_value(array: &dyn Array, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }

    macro_rules! int_value {
        ($array_ty:ty) => {{
            let arr = array.as_any().downcast_ref::<$array_ty>();
            match arr {
                Some(arr) => Value::from(arr.value(row)),
                None => Value::Null,
            }
        }};
    }

    match array.data_type() {
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Bool(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int8 => int_value!(Int8Array),
        DataType::Int16 => int_value!(Int16Array),
        DataType::Int32 => int_value!(Int32Array),
        DataType::Int64 => int_value!(Int64Array),
        DataType::UInt8 => int_value!(UInt8Array),
        DataType::UInt16 => int_value!(UInt16Array),
        DataType::UInt32 => int_value!(UInt32Array),
        DataType::UInt64 => int_value!(UInt64Array),
        DataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .and_then(|a| Number::from_f64(f64::from(a.value(row))))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .and_then(|a| Number::from_f64(a.value(row)))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        DataType::LargeUtf8 => array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        // Timestamps, dates, decimals, binary, nested types: display form.
        _ => array_value_to_string(array, row)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
