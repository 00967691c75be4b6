//! Column decompression.
//!
//! The values of a compressed column are stored in a single binary value of the
//! compressed record. How they are encoded is up to the producer of the records;
//! the reading side only needs a [`ColumnDecompressor`] that turns the binary value
//! back into an Arrow array.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, RecordBatch, new_empty_array};
use arrow_ipc::{
    CompressionType,
    reader::StreamReader,
    writer::{IpcWriteOptions, StreamWriter},
};
use arrow_schema::{DataType, Field, Schema};
use hyperstore_common::{Result, error::Error};

/// Turns the stored value of a compressed column back into an array.
pub trait ColumnDecompressor: Send + Sync {
    /// Decompresses `data` into an array of `row_count` values of `data_type`.
    fn decompress(&self, data: &[u8], data_type: &DataType, row_count: usize)
    -> Result<ArrayRef>;
}

/// Stores a column as an Arrow IPC stream, optionally with a compressed body.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcColumnCodec {
    compression: Option<CompressionType>,
}

impl IpcColumnCodec {
    pub fn new(compression: Option<CompressionType>) -> IpcColumnCodec {
        IpcColumnCodec { compression }
    }

    pub fn zstd() -> IpcColumnCodec {
        IpcColumnCodec::new(Some(CompressionType::ZSTD))
    }

    pub fn lz4() -> IpcColumnCodec {
        IpcColumnCodec::new(Some(CompressionType::LZ4_FRAME))
    }

    /// Encodes the values of a column.
    pub fn compress(&self, array: &dyn Array) -> Result<Vec<u8>> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "values",
            array.data_type().clone(),
            true,
        )]));
        let batch = RecordBatch::try_new(schema.clone(), vec![arrow_array::make_array(
            array.to_data(),
        )])
        .map_err(|e| Error::arrow("compress column", e))?;

        let options = IpcWriteOptions::default()
            .try_with_compression(self.compression)
            .map_err(|e| Error::arrow("compression options", e))?;
        let mut writer = StreamWriter::try_new_with_options(Vec::new(), &schema, options)
            .map_err(|e| Error::arrow("compress column", e))?;
        writer
            .write(&batch)
            .map_err(|e| Error::arrow("compress column", e))?;
        writer
            .into_inner()
            .map_err(|e| Error::arrow("compress column", e))
    }
}

impl ColumnDecompressor for IpcColumnCodec {
    fn decompress(
        &self,
        data: &[u8],
        data_type: &DataType,
        row_count: usize,
    ) -> Result<ArrayRef> {
        let reader =
            StreamReader::try_new(data, None).map_err(|e| Error::arrow("decompress column", e))?;

        let mut parts = Vec::<ArrayRef>::new();
        for batch in reader {
            let batch = batch.map_err(|e| Error::arrow("decompress column", e))?;
            if batch.num_columns() != 1 {
                return Err(Error::invalid_format(
                    "compressed column",
                    format!("stream has {} columns", batch.num_columns()),
                ));
            }
            parts.push(batch.column(0).clone());
        }

        let array = match parts.len() {
            0 => new_empty_array(data_type),
            1 => parts.swap_remove(0),
            _ => {
                let parts = parts.iter().map(|a| a.as_ref()).collect::<Vec<_>>();
                arrow_select::concat::concat(&parts)
                    .map_err(|e| Error::arrow("decompress column", e))?
            }
        };

        if array.data_type() != data_type {
            return Err(Error::invalid_format(
                "compressed column",
                format!("type {}, expected {}", array.data_type(), data_type),
            ));
        }
        if array.len() != row_count {
            return Err(Error::invalid_format(
                "compressed column",
                format!("{} values, expected {}", array.len(), row_count),
            ));
        }
        Ok(array)
    }
}
