//! Arrow slot configuration.

use std::sync::Arc;

use crate::{
    decompress::{ColumnDecompressor, IpcColumnCodec},
    tid::TidCodec,
};

/// Default number of compressed records whose decompressed columns are kept.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 8;

/// Configuration of an [`ArrowSlot`](crate::arrow_slot::ArrowSlot).
#[derive(Clone)]
pub struct ArrowSlotOptions {
    pub(crate) cache_max_entries: usize,
    pub(crate) decompressor: Arc<dyn ColumnDecompressor>,
    pub(crate) tid_codec: TidCodec,
}

impl ArrowSlotOptions {
    /// Sets the number of compressed records kept in the decompressed column cache.
    ///
    /// # Panics
    /// Panics if `max_entries` is zero.
    pub fn with_cache_max_entries(self, max_entries: usize) -> Self {
        assert_ne!(max_entries, 0);
        Self {
            cache_max_entries: max_entries,
            ..self
        }
    }

    /// Sets the decompressor used for compressed columns.
    /// If not set, [`IpcColumnCodec`] is used.
    pub fn with_decompressor(self, decompressor: Arc<dyn ColumnDecompressor>) -> Self {
        Self {
            decompressor,
            ..self
        }
    }

    /// Sets the codec that produces the row identifiers exposed for compressed rows.
    pub fn with_tid_codec(self, tid_codec: TidCodec) -> Self {
        Self { tid_codec, ..self }
    }

    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries
    }

    pub fn tid_codec(&self) -> TidCodec {
        self.tid_codec
    }
}

impl Default for ArrowSlotOptions {
    fn default() -> Self {
        ArrowSlotOptions {
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            decompressor: Arc::new(IpcColumnCodec::default()),
            tid_codec: TidCodec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let options = ArrowSlotOptions::default();
        assert_eq!(options.cache_max_entries(), DEFAULT_CACHE_MAX_ENTRIES);
        assert_eq!(options.tid_codec(), TidCodec::default());

        let options = options
            .with_cache_max_entries(2)
            .with_tid_codec(TidCodec::new(20))
            .with_decompressor(Arc::new(IpcColumnCodec::zstd()));
        assert_eq!(options.cache_max_entries(), 2);
        assert_eq!(options.tid_codec().tuples_per_page(), 20);
    }

    #[test]
    #[should_panic]
    fn test_zero_cache_entries() {
        let _ = ArrowSlotOptions::default().with_cache_max_entries(0);
    }
}
