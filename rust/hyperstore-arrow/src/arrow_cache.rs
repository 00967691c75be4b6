//! Cache of decompressed columns.

use ahash::AHashMap;
use arrow_array::ArrayRef;
use hyperstore_common::Result;

use crate::tid::RowId;

/// Cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to decompress the column.
    pub misses: u64,
    /// Records evicted to make room for others.
    pub evictions: u64,
}

#[derive(Default)]
struct CacheEntry {
    last_used: u64,
    /// Decompressed arrays by physical column number.
    columns: AHashMap<usize, ArrayRef>,
}

/// Decompressed columns of recently accessed compressed records.
///
/// Entries are keyed by the row identifier of the compressed record; each entry
/// holds the arrays decompressed so far for that record, keyed by column number.
/// A column of a resident record is decompressed at most once. When the number of
/// resident records reaches `max_entries`, the least recently used record is
/// evicted as a whole.
pub struct ArrowColumnCache {
    entries: AHashMap<RowId, CacheEntry>,
    max_entries: usize,
    clock: u64,
    stats: CacheStats,
}

impl ArrowColumnCache {
    /// # Panics
    /// Panics if `max_entries` is zero.
    pub fn new(max_entries: usize) -> ArrowColumnCache {
        assert_ne!(max_entries, 0);
        ArrowColumnCache {
            entries: AHashMap::with_capacity(max_entries),
            max_entries,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached array for the column of the record, calling `decompress`
    /// to produce it on the first access.
    ///
    /// A failed decompression is propagated and leaves nothing cached for the column.
    pub fn get_or_decompress<F>(
        &mut self,
        record: RowId,
        attno: usize,
        decompress: F,
    ) -> Result<ArrayRef>
    where
        F: FnOnce() -> Result<ArrayRef>,
    {
        self.clock += 1;
        if !self.entries.contains_key(&record) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        let entry = self.entries.entry(record).or_default();
        entry.last_used = self.clock;
        if let Some(array) = entry.columns.get(&attno) {
            self.stats.hits += 1;
            return Ok(array.clone());
        }

        self.stats.misses += 1;
        let array = decompress()?;
        entry.columns.insert(attno, array.clone());
        Ok(array)
    }

    /// Looks up a column without touching the recency order.
    pub fn get(&self, record: RowId, attno: usize) -> Option<&ArrayRef> {
        self.entries.get(&record)?.columns.get(&attno)
    }

    pub fn contains_record(&self, record: RowId) -> bool {
        self.entries.contains_key(&record)
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drops all resident records. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(record, _)| *record);
        if let Some(record) = victim {
            log::debug!("evicting decompressed columns of record {record}");
            self.entries.remove(&record);
            self.stats.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::Int32Array;
    use hyperstore_common::error::Error;

    use super::*;

    fn array(values: Vec<i32>) -> Result<ArrayRef> {
        Ok(Arc::new(Int32Array::from(values)))
    }

    #[test]
    fn test_decompress_once() {
        let mut cache = ArrowColumnCache::new(4);
        let record = RowId::new(1, 1);
        let mut calls = 0;
        let first = cache
            .get_or_decompress(record, 2, || {
                calls += 1;
                array(vec![1, 2, 3])
            })
            .unwrap();
        let second = cache
            .get_or_decompress(record, 2, || {
                calls += 1;
                array(vec![1, 2, 3])
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                evictions: 0
            }
        );
        assert!(cache.get(record, 2).is_some());
        assert!(cache.get(record, 3).is_none());
    }

    #[test]
    fn test_failed_decompression_is_not_cached() {
        let mut cache = ArrowColumnCache::new(2);
        let record = RowId::new(7, 3);
        let res = cache.get_or_decompress(record, 0, || Err(Error::invalid_format("column", "broken")));
        assert!(res.is_err());
        assert!(cache.get(record, 0).is_none());
        assert!(cache.get_or_decompress(record, 0, || array(vec![5])).is_ok());
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = ArrowColumnCache::new(2);
        let (a, b, c) = (RowId::new(1, 1), RowId::new(1, 2), RowId::new(1, 3));
        cache.get_or_decompress(a, 0, || array(vec![1])).unwrap();
        cache.get_or_decompress(b, 0, || array(vec![2])).unwrap();
        // Touch `a` so that `b` becomes the least recently used record.
        cache.get_or_decompress(a, 0, || array(vec![1])).unwrap();
        cache.get_or_decompress(c, 0, || array(vec![3])).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains_record(a));
        assert!(!cache.contains_record(b));
        assert!(cache.contains_record(c));
        assert_eq!(cache.stats().evictions, 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }
}
