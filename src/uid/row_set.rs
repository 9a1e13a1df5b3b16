//! Sorted row-id sets derived from external uid lists.

use crate::uid::UidMapper;
use crate::{RowId, Uid};

/// A sorted set of row ids, built by resolving an external uid list
/// through one generation's [`UidMapper`]. Used to restrict reads to an
/// externally supplied set of documents.
#[derive(Debug, Clone)]
pub struct UidRowSet {
    sorted: Vec<RowId>,
}

impl UidRowSet {
    /// Resolve `uids` through `mapper`, dropping the absent ones.
    pub fn from_uids(uids: &[Uid], mapper: &UidMapper) -> Self {
        let mut sorted: Vec<RowId> = uids.iter().filter_map(|&uid| mapper.get_row(uid)).collect();
        sorted.sort_unstable();
        sorted.dedup();
        UidRowSet { sorted }
    }

    /// Build from already resolved row ids.
    pub fn from_rows(mut rows: Vec<RowId>) -> Self {
        rows.sort_unstable();
        rows.dedup();
        UidRowSet { sorted: rows }
    }

    /// Number of rows in the set.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Whether `row` is in the set.
    pub fn contains(&self, row: RowId) -> bool {
        self.sorted.binary_search(&row).is_ok()
    }

    /// Iterate rows in ascending order.
    pub fn iter(&self) -> UidRowSetIter<'_> {
        UidRowSetIter {
            sorted: &self.sorted,
            position: 0,
        }
    }
}

/// Ordered iterator over a [`UidRowSet`] supporting forward skips.
#[derive(Debug)]
pub struct UidRowSetIter<'a> {
    sorted: &'a [RowId],
    position: usize,
}

impl<'a> UidRowSetIter<'a> {
    /// Skip forward to the first row at or beyond `target`.
    pub fn advance(&mut self, target: RowId) -> Option<RowId> {
        let remaining = &self.sorted[self.position..];
        let offset = remaining.partition_point(|&row| row < target);
        self.position += offset;
        let row = *self.sorted.get(self.position)?;
        self.position += 1;
        Some(row)
    }
}

impl<'a> Iterator for UidRowSetIter<'a> {
    type Item = RowId;

    fn next(&mut self) -> Option<RowId> {
        let row = *self.sorted.get(self.position)?;
        self.position += 1;
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ABSENT_UID;

    #[test]
    fn test_from_uids_resolves_and_sorts() {
        let uids: Vec<Uid> = vec![50, 10, ABSENT_UID, 30];
        let mapper = UidMapper::new(&uids);

        let set = UidRowSet::from_uids(&[30, 99, 50, 10], &mapper);
        assert_eq!(set.len(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert!(set.contains(3));
        assert!(!set.contains(2));
    }

    #[test]
    fn test_advance() {
        let set = UidRowSet::from_rows(vec![2, 5, 9, 14]);
        let mut iter = set.iter();

        assert_eq!(iter.advance(5), Some(5));
        assert_eq!(iter.next(), Some(9));
        assert_eq!(iter.advance(20), None);
    }

    #[test]
    fn test_advance_before_first() {
        let set = UidRowSet::from_rows(vec![7, 8]);
        let mut iter = set.iter();
        assert_eq!(iter.advance(0), Some(7));
        assert_eq!(iter.next(), Some(8));
        assert_eq!(iter.next(), None);
    }
}
