//! Result schema patching
//!
//! Hosts without 64-bit integers receive BIGINT columns as double
//! precision. The rewrite is applied to the schema once per query and to
//! every batch before serialization; values outside the lossless double
//! range are still emitted, truncation is the documented contract.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::Result;

fn is_patched_type(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Int64 | DataType::UInt64)
}

/// Rewrite every 64-bit integer column to double precision.
pub fn patch_schema(schema: &SchemaRef) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| {
            if is_patched_type(field.data_type()) {
                Field::new(field.name(), DataType::Float64, field.is_nullable())
            } else {
                field.as_ref().clone()
            }
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Cast a batch's columns to match an already patched schema.
pub fn patch_record_batch(batch: &RecordBatch, patched: &SchemaRef) -> Result<RecordBatch> {
    if batch.schema().as_ref() == patched.as_ref() {
        return Ok(batch.clone());
    }
    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .zip(patched.fields())
        .map(|(column, field)| {
            if column.data_type() == field.data_type() {
                Ok(column.clone())
            } else {
                Ok(cast(column, field.data_type())?)
            }
        })
        .collect::<Result<_>>()?;
    Ok(RecordBatch::try_new(patched.clone(), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    fn bigint_batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
        ]));
        let labels: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(values)) as ArrayRef,
                Arc::new(StringArray::from(labels)) as ArrayRef,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_schema_rewrites_only_64bit_ints() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::UInt64, false),
            Field::new("c", DataType::Int32, true),
            Field::new("d", DataType::Utf8, true),
        ]));
        let patched = patch_schema(&schema);
        assert_eq!(patched.field(0).data_type(), &DataType::Float64);
        assert_eq!(patched.field(1).data_type(), &DataType::Float64);
        assert_eq!(patched.field(2).data_type(), &DataType::Int32);
        assert_eq!(patched.field(3).data_type(), &DataType::Utf8);
        assert!(patched.field(0).is_nullable());
        assert!(!patched.field(1).is_nullable());
    }

    #[test]
    fn test_batch_values_within_lossless_range() {
        let batch = bigint_batch(vec![1 << 31, -42]);
        let patched_schema = patch_schema(&batch.schema());
        let patched = patch_record_batch(&batch, &patched_schema).unwrap();

        let values = patched
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(values.value(0), (1u64 << 31) as f64);
        assert_eq!(values.value(1), -42.0);
    }

    #[test]
    fn test_values_beyond_lossless_range_are_emitted() {
        let big = (1i64 << 54) + 1;
        let batch = bigint_batch(vec![big]);
        let patched_schema = patch_schema(&batch.schema());
        let patched = patch_record_batch(&batch, &patched_schema).unwrap();

        let values = patched
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        // Precision loss is permitted, silence is not
        assert!((values.value(0) - big as f64).abs() < 4.0);
    }

    #[test]
    fn test_unpatched_batch_passes_through() {
        let schema = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["x"])) as ArrayRef],
        )
        .unwrap();
        let patched = patch_record_batch(&batch, &schema).unwrap();
        assert_eq!(patched.num_rows(), 1);
    }
}
