//! Arrow slot: row-at-a-time access over plain rows and compressed records.
//!
//! An arrow slot reads a relation whose rows are stored in two child relations:
//! one holding plain rows and one holding compressed records, each of which packs
//! many logical rows in columnar form. The slot owns a cursor for each child and
//! exposes whichever holds the current row as a sequence of logical rows.
//!
//! Reading row by row from a compressed record keeps the same compressed child row
//! and only moves the tuple index. Columns are decompressed on first access and
//! kept in the slot's [`ArrowColumnCache`], so subsequent rows of the same record
//! are plain offsets into the decompressed arrays. The decompressed arrays of a
//! whole record can also be consumed at once, see [`ArrowSlot::segment_batch`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arrow_array::{
    Array, ArrayRef, RecordBatch, Scalar, UInt32Array, cast::AsArray, new_null_array,
};
use arrow_schema::{DataType, Schema, SchemaRef};
use hyperstore_common::{Result, error::Error, verify_arg, verify_data};

use crate::{
    arrow_cache::ArrowColumnCache,
    attr_set::AttrSet,
    child_slot::{ChildKind, ChildRow, ChildSlot, ChildSlotId},
    compressed_schema::{count_attno, read_row_count},
    decompress::ColumnDecompressor,
    offset_map::AttrOffsetMap,
    options::ArrowSlotOptions,
    tid::{INVALID_TUPLE_INDEX, MAX_TUPLE_INDEX, RowId},
};

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// The child cursor whose row the slot currently exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveChild {
    /// The slot is empty: nothing stored yet, or the stored row is consumed.
    None,
    NonCompressed,
    Compressed,
}

struct CompressedChild {
    slot: ChildSlot,
    /// Column number of the row count in the compressed schema.
    count_attno: usize,
    /// Built on first use for this compressed schema.
    offset_map: Option<Arc<AttrOffsetMap>>,
}

/// Iteration state over one scan of a relation split into a non-compressed and a
/// compressed child relation.
///
/// The slot is driven by a single consumer:
/// 1. a child row is placed into one of the child cursors
///    ([`noncompressed_slot_mut`](Self::noncompressed_slot_mut) or
///    [`compressed_slot_mut`](Self::compressed_slot_mut));
/// 2. [`store`](Self::store) makes the slot expose that row, for a compressed
///    record starting at the given 1-based tuple index;
/// 3. [`advance`](Self::advance) moves to the next logical row until the slot
///    becomes empty, at which point the next child row can be stored.
pub struct ArrowSlot {
    id: u64,
    logical_schema: SchemaRef,
    options: ArrowSlotOptions,
    noncompressed: ChildSlot,
    compressed: Option<CompressedChild>,
    active: ActiveChild,
    /// 1-based index of the current row in the compressed record; 0 for a plain row.
    tuple_index: u16,
    total_row_count: u16,
    /// Identifier of the current logical row.
    row_id: Option<RowId>,
    /// Identifier of the child row passed to the last `store`.
    record_id: Option<RowId>,
    arrow_cache: ArrowColumnCache,
    /// Columns the consumer is going to read. `None` or empty means all columns.
    referenced_attrs: Option<AttrSet>,
    /// Columns materialized for the current row.
    valid_attrs: Option<AttrSet>,
    values: Vec<Option<Scalar<ArrayRef>>>,
}

impl ArrowSlot {
    pub fn new(logical_schema: SchemaRef, options: ArrowSlotOptions) -> ArrowSlot {
        let id = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
        let natts = logical_schema.fields().len();
        ArrowSlot {
            id,
            noncompressed: ChildSlot::new(
                ChildSlotId::new(id, ChildKind::NonCompressed),
                logical_schema.clone(),
            ),
            logical_schema,
            compressed: None,
            active: ActiveChild::None,
            tuple_index: INVALID_TUPLE_INDEX,
            total_row_count: 0,
            row_id: None,
            record_id: None,
            arrow_cache: ArrowColumnCache::new(options.cache_max_entries),
            options,
            referenced_attrs: None,
            valid_attrs: None,
            values: vec![None; natts],
        }
    }

    pub fn logical_schema(&self) -> &SchemaRef {
        &self.logical_schema
    }

    pub fn options(&self) -> &ArrowSlotOptions {
        &self.options
    }

    pub fn cache(&self) -> &ArrowColumnCache {
        &self.arrow_cache
    }

    pub fn noncompressed_slot(&self) -> &ChildSlot {
        &self.noncompressed
    }

    /// The cursor for plain rows. Its schema is the logical schema.
    pub fn noncompressed_slot_mut(&mut self) -> &mut ChildSlot {
        &mut self.noncompressed
    }

    pub fn compressed_slot(&self) -> Option<&ChildSlot> {
        self.compressed.as_ref().map(|child| &child.slot)
    }

    /// The cursor for compressed records with the given compressed schema.
    ///
    /// The cursor is created on first use. When called with a differently shaped
    /// schema, the cursor is replaced: the slot is emptied if it exposes a
    /// compressed row, and the offset map and the decompressed column cache are
    /// reset.
    ///
    /// # Errors
    /// Returns an error if the schema has no row count column.
    pub fn compressed_slot_mut(&mut self, compressed_schema: &SchemaRef) -> Result<&mut ChildSlot> {
        let reuse = self
            .compressed
            .as_ref()
            .is_some_and(|child| same_schema(child.slot.schema(), compressed_schema));
        if !reuse {
            let count_attno = count_attno(compressed_schema)?;
            if self.compressed.is_some() {
                log::debug!("compressed schema changed, replacing the compressed child slot");
                if self.active == ActiveChild::Compressed {
                    self.clear_state();
                }
                self.arrow_cache.clear();
            }
            self.compressed = Some(CompressedChild {
                slot: ChildSlot::new(
                    ChildSlotId::new(self.id, ChildKind::Compressed),
                    compressed_schema.clone(),
                ),
                count_attno,
                offset_map: None,
            });
        }
        match self.compressed.as_mut() {
            Some(child) => Ok(&mut child.slot),
            None => Err(Error::invalid_operation("compressed_slot_mut")),
        }
    }

    /// Makes the slot expose the row held by the child cursor `child`.
    ///
    /// For the non-compressed cursor `tuple_index` must be 0. For the compressed
    /// cursor it is the 1-based index of the first logical row to expose; the row
    /// count of the record is read from its count column.
    ///
    /// # Errors
    /// Returns an error if `child` belongs to another slot, if the cursor holds no
    /// row, if `tuple_index` does not fit the cursor kind or the record's row count,
    /// or if the row count is invalid.
    pub fn store(&mut self, child: ChildSlotId, tuple_index: u16) -> Result<&mut ArrowSlot> {
        if child.owner() != self.id {
            return Err(Error::invalid_operation(
                "store: the child slot belongs to another arrow slot",
            ));
        }

        match child.kind() {
            ChildKind::NonCompressed => {
                verify_arg!(tuple_index, tuple_index == INVALID_TUPLE_INDEX);
                let row_id = self
                    .noncompressed
                    .row()
                    .map(|row| row.row_id())
                    .ok_or_else(|| Error::invalid_operation("store: empty non-compressed slot"))?;
                self.active = ActiveChild::NonCompressed;
                self.tuple_index = INVALID_TUPLE_INDEX;
                self.total_row_count = 0;
                self.row_id = Some(row_id);
                self.record_id = Some(row_id);
            }
            ChildKind::Compressed => {
                verify_arg!(
                    tuple_index,
                    tuple_index != INVALID_TUPLE_INDEX && tuple_index <= MAX_TUPLE_INDEX
                );
                let compressed = self
                    .compressed
                    .as_ref()
                    .ok_or_else(|| Error::invalid_operation("store: no compressed child slot"))?;
                let row = compressed
                    .slot
                    .row()
                    .ok_or_else(|| Error::invalid_operation("store: empty compressed slot"))?;
                let total_row_count =
                    read_row_count(row.batch(), compressed.count_attno, row.index())?;
                verify_data!(total_row_count, total_row_count <= MAX_TUPLE_INDEX as usize);
                verify_arg!(tuple_index, tuple_index as usize <= total_row_count);

                let record_id = row.row_id();
                let row_id = self.options.tid_codec.encode(record_id, tuple_index)?;
                self.active = ActiveChild::Compressed;
                self.tuple_index = tuple_index;
                self.total_row_count = total_row_count as u16;
                self.row_id = Some(row_id);
                self.record_id = Some(record_id);
            }
        }

        log::trace!(
            "stored {:?} row {:?} at tuple index {}",
            child.kind(),
            self.row_id,
            tuple_index
        );
        self.invalidate_position();
        Ok(self)
    }

    /// Moves the slot forward by `increment` logical rows.
    ///
    /// A plain row yields exactly one logical row, so advancing from it empties the
    /// slot. Advancing past the last row of a compressed record empties the slot as
    /// well.
    pub fn advance(&mut self, increment: u16) -> &mut ArrowSlot {
        debug_assert_ne!(increment, 0);
        match self.active {
            ActiveChild::None => (),
            ActiveChild::NonCompressed => self.clear_state(),
            ActiveChild::Compressed => {
                debug_assert!(self.total_row_count > 0);
                let next = self.tuple_index as u32 + increment as u32;
                if next > self.total_row_count as u32 {
                    log::trace!("compressed record {:?} exhausted", self.row_id);
                    self.clear_state();
                } else {
                    let codec = self.options.tid_codec;
                    let row_id = self
                        .row_id
                        .map(|row_id| codec.advance_by(row_id, increment as u32))
                        .transpose();
                    match row_id {
                        Ok(row_id) => {
                            self.tuple_index = next as u16;
                            self.row_id = row_id;
                            self.invalidate_position();
                        }
                        Err(e) => {
                            log::warn!("cannot advance row id {:?}: {e}", self.row_id);
                            self.clear_state();
                        }
                    }
                }
            }
        }
        self
    }

    /// Skips the remaining rows of the current record.
    pub fn mark_consumed(&mut self) {
        match self.active {
            ActiveChild::Compressed => {
                self.tuple_index = self.total_row_count + 1;
                self.invalidate_position();
            }
            ActiveChild::NonCompressed => self.clear_state(),
            ActiveChild::None => (),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.active == ActiveChild::None || self.tuple_index > self.total_row_count
    }

    pub fn is_last(&self) -> bool {
        self.tuple_index == self.total_row_count
    }

    /// The 1-based index of the current row in the compressed record, 0 for a
    /// plain row or an empty slot.
    pub fn row_index(&self) -> u16 {
        self.tuple_index
    }

    /// The 0-based offset of the current row into the decompressed arrays of the
    /// compressed record, 0 for a plain row or an empty slot.
    pub fn arrow_offset(&self) -> usize {
        match self.active {
            ActiveChild::Compressed => self.tuple_index as usize - 1,
            _ => 0,
        }
    }

    /// Number of logical rows in the current compressed record.
    ///
    /// # Panics
    /// Panics if the slot does not expose a compressed row.
    pub fn total_row_count(&self) -> u16 {
        assert_eq!(
            self.active,
            ActiveChild::Compressed,
            "total_row_count requires a compressed row"
        );
        debug_assert!(self.total_row_count > 0);
        self.total_row_count
    }

    pub fn is_compressed(&self) -> bool {
        self.active == ActiveChild::Compressed
    }

    pub fn active_child(&self) -> ActiveChild {
        self.active
    }

    /// Identifier of the current logical row: the plain row's identifier, or the
    /// compressed row identifier of the current row of a compressed record.
    pub fn row_id(&self) -> Option<RowId> {
        self.row_id
    }

    /// Sets the columns the consumer is going to read.
    ///
    /// Setting the same set again is a no-op. Columns already decompressed stay
    /// cached when the set changes.
    pub fn set_referenced_attrs(&mut self, attrs: AttrSet) {
        if self.referenced_attrs.as_ref() == Some(&attrs) {
            return;
        }
        log::debug!(
            "referenced attributes: {:?}",
            attrs.iter().collect::<Vec<_>>()
        );
        self.referenced_attrs = Some(attrs);
    }

    pub fn referenced_attrs(&self) -> Option<&AttrSet> {
        self.referenced_attrs.as_ref()
    }

    /// Returns the offset map between the logical schema and the schema of the
    /// compressed child, building it on first use.
    ///
    /// # Errors
    /// Returns an error if there is no compressed child yet, or if the schemas
    /// cannot be matched.
    pub fn get_offset_map(&mut self) -> Result<Arc<AttrOffsetMap>> {
        let child = self
            .compressed
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("get_offset_map: no compressed child slot"))?;
        if let Some(offset_map) = &child.offset_map {
            return Ok(offset_map.clone());
        }
        let offset_map = Arc::new(AttrOffsetMap::build(
            &self.logical_schema,
            child.slot.schema(),
        )?);
        child.offset_map = Some(offset_map.clone());
        Ok(offset_map)
    }

    /// Returns `true` if the logical column is stored as a single value per
    /// compressed record.
    pub fn is_segmentby_attr(&mut self, attno: usize) -> Result<bool> {
        Ok(self.get_offset_map()?.is_segmentby(attno))
    }

    /// Returns the decompressed array of a logical column of the current
    /// compressed record.
    ///
    /// Each column of a record is decompressed once; repeated calls return the
    /// same array. For a segment-by column, and for a column missing from the
    /// compressed schema, the result is a single-element array holding the value
    /// shared by all rows of the record.
    ///
    /// # Errors
    /// Returns an error if the slot does not expose a compressed row, if `attno` is
    /// out of range, or if decompression fails.
    pub fn get_array(&mut self, attno: usize) -> Result<ArrayRef> {
        if self.active != ActiveChild::Compressed {
            return Err(Error::invalid_operation(
                "get_array: the slot does not hold a compressed row",
            ));
        }
        verify_arg!(attno, attno < self.logical_schema.fields().len());
        self.stored_row(ChildKind::Compressed)?;

        let offset_map = self.get_offset_map()?;
        let data_type = self.logical_schema.field(attno).data_type();
        let Some(physical_attno) = offset_map.to_physical(attno) else {
            return Ok(new_null_array(data_type, 1));
        };

        let record_id = self.record_id;
        let row = self
            .compressed
            .as_ref()
            .and_then(|child| child.slot.row())
            .filter(|row| Some(row.row_id()) == record_id)
            .ok_or_else(|| Error::invalid_operation("get_array: compressed row replaced"))?;
        let row_count = self.total_row_count as usize;
        let segmentby = offset_map.is_segmentby(attno);
        let decompressor = self.options.decompressor.as_ref();

        self.arrow_cache
            .get_or_decompress(row.row_id(), physical_attno, || {
                let column = row.column(physical_attno);
                if segmentby {
                    return Ok(column.slice(row.index(), 1));
                }
                log::debug!(
                    "decompressing column {} of record {}",
                    physical_attno,
                    row.row_id()
                );
                decompress_column(column, row.index(), data_type, row_count, decompressor)
            })
    }

    /// Returns the value of a logical column for the current row.
    ///
    /// The value is memoized, and the column marked valid, until the slot moves to
    /// another row.
    ///
    /// # Errors
    /// Returns an error if the slot is empty or consumed, if `attno` is out of
    /// range, or if decompression fails.
    pub fn value(&mut self, attno: usize) -> Result<Scalar<ArrayRef>> {
        verify_arg!(attno, attno < self.logical_schema.fields().len());
        if let Some(Some(value)) = self.values.get(attno) {
            return Ok(value.clone());
        }

        let value = match self.active {
            ActiveChild::None => {
                return Err(Error::invalid_operation("value: the slot is empty"));
            }
            ActiveChild::NonCompressed => {
                let row = self.stored_row(ChildKind::NonCompressed)?;
                row.column(attno).slice(row.index(), 1)
            }
            ActiveChild::Compressed => {
                if self.is_consumed() {
                    return Err(Error::invalid_operation(
                        "value: the compressed record is consumed",
                    ));
                }
                let offset = self.arrow_offset();
                let constant = self.is_constant_attr(attno)?;
                let array = self.get_array(attno)?;
                if constant {
                    array.slice(0, 1)
                } else {
                    array.slice(offset, 1)
                }
            }
        };

        let value = Scalar::new(value);
        self.valid_attrs
            .get_or_insert_with(AttrSet::new)
            .insert(attno);
        self.values[attno] = Some(value.clone());
        Ok(value)
    }

    /// Returns `true` if the column was materialized for the current row.
    pub fn is_attr_valid(&self, attno: usize) -> bool {
        self.valid_attrs
            .as_ref()
            .is_some_and(|attrs| attrs.contains(attno))
    }

    /// Number of columns materialized for the current row.
    pub fn valid_attr_count(&self) -> usize {
        self.valid_attrs.as_ref().map_or(0, |attrs| attrs.len())
    }

    /// Reads the whole current record as one batch.
    ///
    /// For a compressed record, the batch holds all of the record's rows regardless
    /// of the current position. Single-value columns are broadcast to the record's
    /// row count. When referenced columns were set, the other columns are left
    /// undecompressed and returned as null arrays. For a plain row, the batch holds
    /// that single row.
    ///
    /// # Errors
    /// Returns an error if the slot is empty or decompression fails.
    pub fn segment_batch(&mut self) -> Result<RecordBatch> {
        match self.active {
            ActiveChild::None => Err(Error::invalid_operation("segment_batch: the slot is empty")),
            ActiveChild::NonCompressed => {
                let row = self.stored_row(ChildKind::NonCompressed)?;
                Ok(row.batch().slice(row.index(), 1))
            }
            ActiveChild::Compressed => {
                self.stored_row(ChildKind::Compressed)?;
                let natts = self.logical_schema.fields().len();
                let row_count = self.total_row_count as usize;

                let mut fields = Vec::with_capacity(natts);
                let mut columns = Vec::<ArrayRef>::with_capacity(natts);
                for attno in 0..natts {
                    let field = self.logical_schema.field(attno).clone();
                    let referenced = self
                        .referenced_attrs
                        .as_ref()
                        .is_none_or(|attrs| attrs.is_empty() || attrs.contains(attno));
                    let array = if !referenced {
                        new_null_array(field.data_type(), row_count)
                    } else if self.is_constant_attr(attno)? {
                        broadcast(&self.get_array(attno)?, row_count)?
                    } else {
                        self.get_array(attno)?
                    };
                    let nullable = field.is_nullable() || array.null_count() > 0;
                    fields.push(field.with_nullable(nullable));
                    columns.push(array);
                }

                let schema =
                    Schema::new_with_metadata(fields, self.logical_schema.metadata().clone());
                RecordBatch::try_new(Arc::new(schema), columns)
                    .map_err(|e| Error::arrow("segment_batch", e))
            }
        }
    }

    /// Empties the slot and both child cursors.
    pub fn clear(&mut self) {
        self.clear_state();
        self.noncompressed.clear();
        if let Some(child) = self.compressed.as_mut() {
            child.slot.clear();
        }
    }

    /// A column holds a single value per record if it is a segment-by column or
    /// missing from the compressed schema.
    fn is_constant_attr(&mut self, attno: usize) -> Result<bool> {
        let offset_map = self.get_offset_map()?;
        Ok(offset_map.to_physical(attno).is_none() || offset_map.is_segmentby(attno))
    }

    /// The row of the child cursor, as long as it is still the row passed to the
    /// last `store`. Replacing a cursor row requires storing it again.
    fn stored_row(&self, kind: ChildKind) -> Result<&ChildRow> {
        let cursor = match kind {
            ChildKind::NonCompressed => Some(&self.noncompressed),
            ChildKind::Compressed => self.compressed.as_ref().map(|child| &child.slot),
        };
        let row = cursor
            .and_then(|cursor| cursor.row())
            .ok_or_else(|| Error::invalid_operation(format!("empty {kind:?} child slot")))?;
        if Some(row.row_id()) != self.record_id {
            return Err(Error::invalid_operation(format!(
                "{kind:?} child slot row {} was replaced without a store",
                row.row_id()
            )));
        }
        Ok(row)
    }

    fn clear_state(&mut self) {
        self.active = ActiveChild::None;
        self.tuple_index = INVALID_TUPLE_INDEX;
        self.row_id = None;
        self.record_id = None;
        self.invalidate_position();
    }

    fn invalidate_position(&mut self) {
        self.valid_attrs = None;
        self.values.iter_mut().for_each(|value| *value = None);
    }
}

impl fmt::Debug for ArrowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrowSlot")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("tuple_index", &self.tuple_index)
            .field("total_row_count", &self.total_row_count)
            .field("row_id", &self.row_id)
            .finish_non_exhaustive()
    }
}

fn same_schema(a: &SchemaRef, b: &SchemaRef) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

/// Decompresses the value of a compressed column at `index`. A null value stands
/// for a column that is null in every row of the record.
fn decompress_column(
    column: &ArrayRef,
    index: usize,
    data_type: &DataType,
    row_count: usize,
    decompressor: &dyn ColumnDecompressor,
) -> Result<ArrayRef> {
    if column.is_null(index) {
        return Ok(new_null_array(data_type, row_count));
    }
    let data = match column.data_type() {
        DataType::Binary => column.as_binary::<i32>().value(index),
        DataType::LargeBinary => column.as_binary::<i64>().value(index),
        other => {
            return Err(Error::invalid_format(
                "compressed column",
                format!("unsupported type {other}"),
            ));
        }
    };
    decompressor.decompress(data, data_type, row_count)
}

/// Repeats the first value of `array` `len` times.
fn broadcast(array: &ArrayRef, len: usize) -> Result<ArrayRef> {
    let indices = UInt32Array::from(vec![0u32; len]);
    arrow_select::take::take(array.as_ref(), &indices, None)
        .map_err(|e| Error::arrow("broadcast", e))
}
