//! Bulk export of stored points by internal position.
//!
//! [`PointIter`] walks positions `0..count` as of its creation, yielding
//! each point's label, vector, and deleted flag. It re-acquires the read
//! lock per step instead of holding it across the whole walk, so exports can
//! interleave with searches and inserts on other handles. Points inserted
//! after the iterator was created are not visited; stop early by dropping
//! the iterator.

use crate::index::IndexData;
use parking_lot::RwLock;
use std::sync::Arc;

/// One exported point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub label: u64,
    pub vector: Vec<f32>,
    pub deleted: bool,
}

/// Position-ordered iterator over every stored point, deleted included.
///
/// Filter on [`PointRecord::deleted`] to export only live points.
#[derive(Debug)]
pub struct PointIter {
    data: Arc<RwLock<IndexData>>,
    position: usize,
    total: usize,
}

impl PointIter {
    pub(crate) fn new(data: Arc<RwLock<IndexData>>) -> Self {
        let total = data.read().graph.element_count();
        Self {
            data,
            position: 0,
            total,
        }
    }

    /// `(points_yielded, total_points)` for progress reporting during long
    /// exports.
    pub fn progress(&self) -> (usize, usize) {
        (self.position, self.total)
    }

    /// Rewind to the first position.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

impl Iterator for PointIter {
    type Item = PointRecord;

    fn next(&mut self) -> Option<PointRecord> {
        if self.position >= self.total {
            return None;
        }
        let data = self.data.read();
        let id = self.position as u32;
        let record = PointRecord {
            label: data.internal_to_label[self.position],
            vector: data.graph.vector(id).to_vec(),
            deleted: data.graph.is_deleted(id),
        };
        self.position += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PointIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceKind;
    use crate::index::VectorIndex;

    fn populated_index(n: u64) -> VectorIndex {
        let index = VectorIndex::with_defaults(2, n as usize, DistanceKind::L2).unwrap();
        for i in 0..n {
            index.insert(&[i as f32, 1.0], i * 10).unwrap();
        }
        index
    }

    #[test]
    fn test_iterates_all_points_in_position_order() {
        let index = populated_index(50);
        let records: Vec<PointRecord> = index.iter_points().collect();
        assert_eq!(records.len(), 50);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.label, i as u64 * 10);
            assert_eq!(record.vector, vec![i as f32, 1.0]);
            assert!(!record.deleted);
        }
    }

    #[test]
    fn test_reports_deleted_flags() {
        let index = populated_index(10);
        index.mark_deleted(30).unwrap();
        index.mark_deleted(70).unwrap();

        let records: Vec<PointRecord> = index.iter_points().collect();
        let deleted: Vec<u64> = records.iter().filter(|r| r.deleted).map(|r| r.label).collect();
        let live = records.iter().filter(|r| !r.deleted).count();
        assert_eq!(deleted, vec![30, 70]);
        assert_eq!(live, 8);
    }

    #[test]
    fn test_progress_and_reset() {
        let index = populated_index(20);
        let mut iter = index.iter_points();
        assert_eq!(iter.progress(), (0, 20));

        for _ in 0..10 {
            iter.next().unwrap();
        }
        assert_eq!(iter.progress(), (10, 20));

        iter.reset();
        assert_eq!(iter.progress(), (0, 20));
        assert_eq!(iter.count(), 20);
    }

    #[test]
    fn test_empty_index_yields_nothing() {
        let index = VectorIndex::with_defaults(2, 4, DistanceKind::L2).unwrap();
        assert_eq!(index.iter_points().next(), None);
    }

    #[test]
    fn test_snapshot_length_ignores_later_inserts() {
        let index = populated_index(5);
        let iter = index.iter_points();
        index.insert(&[99.0, 1.0], 990).unwrap();
        assert_eq!(iter.count(), 5);
    }

    #[test]
    fn test_early_stop_by_dropping() {
        let index = populated_index(100);
        let first_ten: Vec<PointRecord> = index.iter_points().take(10).collect();
        assert_eq!(first_ten.len(), 10);
        assert_eq!(first_ten[9].label, 90);
    }
}
