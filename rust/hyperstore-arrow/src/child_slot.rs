//! The two child row cursors of an arrow slot.

use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use hyperstore_common::{Result, error::Error, verify_arg};

use crate::tid::RowId;

/// The child relation a cursor reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// Plain rows, one logical row per physical row.
    NonCompressed,
    /// Compressed records, many logical rows per physical row.
    Compressed,
}

/// Identifies one child cursor of one arrow slot.
///
/// This is what [`ArrowSlot::store`](crate::arrow_slot::ArrowSlot::store) receives to
/// tell which child cursor holds the row to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildSlotId {
    owner: u64,
    kind: ChildKind,
}

impl ChildSlotId {
    pub(crate) fn new(owner: u64, kind: ChildKind) -> ChildSlotId {
        ChildSlotId { owner, kind }
    }

    /// Identity of the arrow slot owning the child cursor.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn kind(&self) -> ChildKind {
        self.kind
    }
}

/// A physical row of a child relation: one row of a record batch together with
/// its row identifier.
#[derive(Debug, Clone)]
pub struct ChildRow {
    row_id: RowId,
    batch: RecordBatch,
    index: usize,
}

impl ChildRow {
    /// # Errors
    /// Returns an error if `index` is out of the batch bounds or `row_id` is not a
    /// valid uncompressed row identifier.
    pub fn try_new(row_id: RowId, batch: RecordBatch, index: usize) -> Result<ChildRow> {
        verify_arg!(index, index < batch.num_rows());
        verify_arg!(row_id, row_id.is_valid() && !row_id.is_compressed());
        Ok(ChildRow {
            row_id,
            batch,
            index,
        })
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Index of the row within the batch.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn column(&self, attno: usize) -> &ArrayRef {
        self.batch.column(attno)
    }
}

/// A child cursor: holds the current row of one of the child relations.
pub struct ChildSlot {
    id: ChildSlotId,
    schema: SchemaRef,
    row: Option<ChildRow>,
}

impl ChildSlot {
    pub(crate) fn new(id: ChildSlotId, schema: SchemaRef) -> ChildSlot {
        ChildSlot {
            id,
            schema,
            row: None,
        }
    }

    pub fn id(&self) -> ChildSlotId {
        self.id
    }

    pub fn kind(&self) -> ChildKind {
        self.id.kind
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Makes `row` the current row of the cursor.
    ///
    /// # Errors
    /// Returns an error if the row's batch does not have the cursor's schema.
    pub fn store_row(&mut self, row: ChildRow) -> Result<&mut ChildSlot> {
        if row.batch.schema_ref().fields() != self.schema.fields() {
            return Err(Error::invalid_arg(
                "row",
                format!("row schema does not match the {:?} child schema", self.kind()),
            ));
        }
        self.row = Some(row);
        Ok(self)
    }

    pub fn row(&self) -> Option<&ChildRow> {
        self.row.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_none()
    }

    pub fn clear(&mut self) {
        self.row = None;
    }
}
