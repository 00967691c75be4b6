//! Sets of column numbers.

use roaring::RoaringBitmap;

/// A set of 0-based column numbers, backed by a compressed bitmap.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AttrSet(RoaringBitmap);

impl AttrSet {
    pub fn new() -> AttrSet {
        AttrSet(RoaringBitmap::new())
    }

    pub fn insert(&mut self, attno: usize) -> bool {
        self.0.insert(attno as u32)
    }

    pub fn remove(&mut self, attno: usize) -> bool {
        self.0.remove(attno as u32)
    }

    pub fn contains(&self, attno: usize) -> bool {
        self.0.contains(attno as u32)
    }

    pub fn len(&self) -> usize {
        self.0.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over the column numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(|attno| attno as usize)
    }
}

impl FromIterator<usize> for AttrSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        AttrSet(iter.into_iter().map(|attno| attno as u32).collect())
    }
}

impl<const N: usize> From<[usize; N]> for AttrSet {
    fn from(attnos: [usize; N]) -> Self {
        attnos.into_iter().collect()
    }
}
