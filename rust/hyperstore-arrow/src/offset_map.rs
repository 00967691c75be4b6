//! Translation between logical column numbers and the column numbers of the
//! compressed child relation.

use arrow_schema::Schema;
use hyperstore_common::{Result, error::Error};

use crate::{
    attr_set::AttrSet,
    compressed_schema::{is_compressed_field, is_metadata_col},
};

/// Maps every logical column to its column in the physical (compressed) schema.
///
/// Columns are matched by name. Bookkeeping columns of the physical schema never
/// take part in the mapping. A logical column that has no physical counterpart
/// (e.g. it was added after the record was compressed) maps to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrOffsetMap {
    /// Logical column number to physical column number.
    offsets: Vec<Option<usize>>,
    /// Physical column number to logical column number.
    reverse: Vec<Option<usize>>,
    /// Logical columns stored uncompressed, one value per record.
    segmentby: AttrSet,
}

impl AttrOffsetMap {
    /// Builds the map for a pair of schemas.
    ///
    /// # Errors
    /// Returns an error if a physical column name appears more than once, or if an
    /// uncompressed physical column has a different type than its logical column.
    pub fn build(logical: &Schema, physical: &Schema) -> Result<AttrOffsetMap> {
        let mut offsets = vec![None; logical.fields().len()];
        let mut reverse = vec![None; physical.fields().len()];
        let mut segmentby = AttrSet::new();

        for (physical_attno, field) in physical.fields().iter().enumerate() {
            if is_metadata_col(field) {
                continue;
            }
            let Ok(attno) = logical.index_of(field.name()) else {
                continue;
            };
            if offsets[attno].is_some() {
                return Err(Error::invalid_format(
                    field.name(),
                    "duplicate compressed column",
                ));
            }
            if !is_compressed_field(field) {
                let logical_type = logical.field(attno).data_type();
                if field.data_type() != logical_type {
                    return Err(Error::invalid_format(
                        field.name(),
                        format!(
                            "segment-by column has type {}, expected {}",
                            field.data_type(),
                            logical_type
                        ),
                    ));
                }
                segmentby.insert(attno);
            }
            offsets[attno] = Some(physical_attno);
            reverse[physical_attno] = Some(attno);
        }

        log::debug!(
            "attribute offset map: {} logical columns, {} physical columns, {} segment-by",
            offsets.len(),
            reverse.len(),
            segmentby.len()
        );

        Ok(AttrOffsetMap {
            offsets,
            reverse,
            segmentby,
        })
    }

    /// Number of logical columns.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn to_physical(&self, attno: usize) -> Option<usize> {
        self.offsets.get(attno).copied().flatten()
    }

    pub fn to_logical(&self, physical_attno: usize) -> Option<usize> {
        self.reverse.get(physical_attno).copied().flatten()
    }

    pub fn offsets(&self) -> &[Option<usize>] {
        &self.offsets
    }

    pub fn segmentby_attrs(&self) -> &AttrSet {
        &self.segmentby
    }

    pub fn is_segmentby(&self, attno: usize) -> bool {
        self.segmentby.contains(attno)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};

    use super::*;
    use crate::compressed_schema::CompressedSchemaBuilder;

    fn logical_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("ts", DataType::Int64, false),
            Field::new("device", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("note", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn test_offset_map() {
        let logical = logical_schema();
        let physical = CompressedSchemaBuilder::new(logical.clone())
            .with_segmentby(["device"])
            .with_sequence_num(true)
            .build()
            .unwrap();
        // count, sequence_num, device, ts, value, note
        let map = AttrOffsetMap::build(&logical, &physical).unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map.offsets(), &[Some(3), Some(2), Some(4), Some(5)]);
        assert_eq!(map.to_logical(0), None);
        assert_eq!(map.to_logical(1), None);
        assert_eq!(map.to_logical(2), Some(1));
        assert_eq!(map.to_logical(5), Some(3));
        assert_eq!(map.to_logical(6), None);
        assert!(map.is_segmentby(1));
        assert!(!map.is_segmentby(0));
        assert_eq!(map.segmentby_attrs().len(), 1);

        for attno in 0..map.len() {
            let physical_attno = map.to_physical(attno).unwrap();
            assert_eq!(map.to_logical(physical_attno), Some(attno));
        }
    }

    #[test]
    fn test_missing_logical_column() {
        let compressed_with = Arc::new(Schema::new(vec![
            Field::new("ts", DataType::Int64, false),
            Field::new("value", DataType::Float64, true),
        ]));
        let physical = CompressedSchemaBuilder::new(compressed_with)
            .build()
            .unwrap();
        let map = AttrOffsetMap::build(&logical_schema(), &physical).unwrap();
        assert_eq!(map.to_physical(0), Some(1));
        assert_eq!(map.to_physical(1), None);
        assert_eq!(map.to_physical(2), Some(2));
        assert_eq!(map.to_physical(3), None);
        assert_eq!(map.to_physical(17), None);
    }

    #[test]
    fn test_segmentby_type_mismatch() {
        let physical = Schema::new(vec![
            Field::new("_hs_meta_count", DataType::Int32, false),
            Field::new("device", DataType::Int32, true),
        ]);
        assert!(AttrOffsetMap::build(&logical_schema(), &physical).is_err());
    }

    #[test]
    fn test_duplicate_physical_column() {
        let physical = Schema::new(vec![
            Field::new("_hs_meta_count", DataType::Int32, false),
            Field::new("device", DataType::Utf8, true),
            Field::new("device", DataType::Utf8, true),
        ]);
        assert!(AttrOffsetMap::build(&logical_schema(), &physical).is_err());
    }
}
