//! Layout conventions of the compressed child relation.
//!
//! A compressed record stores many logical rows. Its physical schema carries:
//! - bookkeeping columns, prefixed with [`METADATA_PREFIX`]; the count column
//!   ([`COUNT_COLUMN_NAME`]) holds the number of logical rows in the record;
//! - segment-by columns, with the logical name and type, holding a single value
//!   that is constant across the record;
//! - compressed columns, with the logical name, a binary type and the
//!   [`COMPRESSED_METADATA_KEY`] field marker, holding one encoded column value.

use std::{collections::HashMap, sync::Arc};

use arrow_array::{
    Array, RecordBatch,
    cast::AsArray,
    types::{
        Int8Type, Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
    },
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use hyperstore_common::{Result, error::Error, verify_data};

pub const METADATA_PREFIX: &str = "_hs_meta_";

pub const COUNT_COLUMN_NAME: &str = "_hs_meta_count";

pub const SEQUENCE_COLUMN_NAME: &str = "_hs_meta_sequence_num";

/// Field metadata key marking a physical column as holding compressed data.
pub const COMPRESSED_METADATA_KEY: &str = "hyperstore:compressed";

/// Returns `true` for bookkeeping columns that never map to a logical column.
pub fn is_metadata_col(field: &Field) -> bool {
    field.name().starts_with(METADATA_PREFIX)
}

/// Returns `true` if the field holds compressed column data.
pub fn is_compressed_field(field: &Field) -> bool {
    matches!(field.data_type(), DataType::Binary | DataType::LargeBinary)
        && field
            .metadata()
            .get(COMPRESSED_METADATA_KEY)
            .is_some_and(|v| v == "true")
}

/// Returns `true` if the column `attno` of the physical schema holds compressed data.
pub fn is_compressed_col(schema: &Schema, attno: usize) -> bool {
    schema
        .fields()
        .get(attno)
        .is_some_and(|field| is_compressed_field(field))
}

/// Locates the count column in the physical schema.
pub fn count_attno(schema: &Schema) -> Result<usize> {
    let attno = schema
        .index_of(COUNT_COLUMN_NAME)
        .map_err(|_| Error::invalid_format(COUNT_COLUMN_NAME, "missing column"))?;
    verify_data!(
        count_column_type,
        schema.field(attno).data_type().is_integer()
    );
    Ok(attno)
}

/// Reads the number of logical rows of the compressed record at `row`.
pub fn read_row_count(batch: &RecordBatch, count_attno: usize, row: usize) -> Result<usize> {
    let column = batch.column(count_attno);
    verify_data!(count_value, row < column.len() && column.is_valid(row));
    let count = match column.data_type() {
        DataType::Int8 => column.as_primitive::<Int8Type>().value(row) as i64,
        DataType::Int16 => column.as_primitive::<Int16Type>().value(row) as i64,
        DataType::Int32 => column.as_primitive::<Int32Type>().value(row) as i64,
        DataType::Int64 => column.as_primitive::<Int64Type>().value(row),
        DataType::UInt8 => column.as_primitive::<UInt8Type>().value(row) as i64,
        DataType::UInt16 => column.as_primitive::<UInt16Type>().value(row) as i64,
        DataType::UInt32 => column.as_primitive::<UInt32Type>().value(row) as i64,
        DataType::UInt64 => i64::try_from(column.as_primitive::<UInt64Type>().value(row))
            .map_err(|_| Error::invalid_format(COUNT_COLUMN_NAME, "row count out of range"))?,
        other => {
            return Err(Error::invalid_format(
                COUNT_COLUMN_NAME,
                format!("unsupported type {other}"),
            ));
        }
    };
    verify_data!(count_value, count > 0);
    Ok(count as usize)
}

/// Derives the physical schema of the compressed child relation from a logical
/// schema.
///
/// The resulting layout puts the bookkeeping columns first, followed by the
/// segment-by columns and then the compressed columns, each group in logical
/// order.
pub struct CompressedSchemaBuilder {
    logical: SchemaRef,
    segmentby: Vec<String>,
    with_sequence_num: bool,
}

impl CompressedSchemaBuilder {
    pub fn new(logical: SchemaRef) -> CompressedSchemaBuilder {
        CompressedSchemaBuilder {
            logical,
            segmentby: Vec::new(),
            with_sequence_num: false,
        }
    }

    /// Stores the named logical columns uncompressed, one value per record.
    pub fn with_segmentby<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segmentby: names.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Adds the [`SEQUENCE_COLUMN_NAME`] bookkeeping column.
    pub fn with_sequence_num(self, with_sequence_num: bool) -> Self {
        Self {
            with_sequence_num,
            ..self
        }
    }

    pub fn build(&self) -> Result<SchemaRef> {
        for name in &self.segmentby {
            if self.logical.index_of(name).is_err() {
                return Err(Error::invalid_arg(
                    "segmentby",
                    format!("unknown column '{name}'"),
                ));
            }
        }

        let mut fields = vec![Field::new(COUNT_COLUMN_NAME, DataType::Int32, false)];
        if self.with_sequence_num {
            fields.push(Field::new(SEQUENCE_COLUMN_NAME, DataType::Int32, true));
        }

        let is_segmentby = |name: &str| self.segmentby.iter().any(|n| n == name);
        for field in self.logical.fields() {
            if is_segmentby(field.name().as_str()) {
                fields.push((**field).clone().with_nullable(true));
            }
        }
        for field in self.logical.fields() {
            if !is_segmentby(field.name().as_str()) {
                fields.push(
                    Field::new(field.name(), DataType::Binary, true).with_metadata(HashMap::from(
                        [(COMPRESSED_METADATA_KEY.to_string(), "true".to_string())],
                    )),
                );
            }
        }
        Ok(Arc::new(Schema::new(fields)))
    }
}
