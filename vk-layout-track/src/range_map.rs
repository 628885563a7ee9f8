//! An ordered map of non-overlapping `u32` ranges to values.
//!
//! The map stores one entry per maximal run of consecutive keys that share a
//! value. Adjacent ranges whose values compare equal are coalesced, so the
//! number of stored entries is proportional to the number of distinct runs,
//! not the size of the key space. This is what makes it affordable to track
//! state for every subresource of an image with thousands of mip/layer/aspect
//! combinations.

use smallvec::SmallVec;
use std::{
    collections::{btree_map, BTreeMap},
    fmt,
    ops::Range,
};

/// A map of half-open `u32` ranges to values.
///
/// Keys are individual `u32` positions; an entry covers every key in its
/// range. Ranges never overlap, and two touching ranges never hold equal
/// values (they would have been coalesced into one).
#[derive(Clone, PartialEq, Eq)]
pub struct RangeMap<V> {
    // Keyed by the start of each stored range.
    btm: BTreeMap<u32, Entry<V>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry<V> {
    end: u32,
    value: V,
}

impl<V> RangeMap<V> {
    /// Returns an empty map.
    #[inline]
    pub const fn new() -> Self {
        RangeMap {
            btm: BTreeMap::new(),
        }
    }

    /// Returns the number of stored ranges.
    #[inline]
    pub fn len(&self) -> usize {
        self.btm.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.btm.is_empty()
    }

    /// Returns a reference to the value covering `key`, if any.
    #[inline]
    pub fn get(&self, key: u32) -> Option<&V> {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored range covering `key` and its value, if any.
    pub fn get_key_value(&self, key: u32) -> Option<(Range<u32>, &V)> {
        // The covering entry, if it exists, is the last one starting at or
        // before `key`.
        self.btm
            .range(..=key)
            .next_back()
            .filter(|(_, entry)| entry.end > key)
            .map(|(&start, entry)| (start..entry.end, &entry.value))
    }

    /// Returns whether `key` is covered by a stored range.
    #[inline]
    pub fn contains_key(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    /// Returns an iterator over all entries, ordered by range start.
    #[inline]
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.btm.iter(),
        }
    }

    /// Returns an iterator over the entries that overlap `bounds`, ordered by
    /// range start. The yielded ranges are the stored ranges, not clamped to
    /// `bounds`.
    pub fn range(&self, bounds: Range<u32>) -> RangeIter<'_, V> {
        let inner = if bounds.start >= bounds.end {
            self.btm.range(0..0)
        } else {
            // An entry starting before `bounds` may still reach into it.
            let from = self
                .btm
                .range(..=bounds.start)
                .next_back()
                .filter(|(_, entry)| entry.end > bounds.start)
                .map_or(bounds.start, |(&start, _)| start);

            self.btm.range(from..bounds.end)
        };

        RangeIter { inner }
    }

    /// Like [`range`](Self::range), but yields mutable references to the
    /// values.
    pub fn range_mut(&mut self, bounds: Range<u32>) -> RangeIterMut<'_, V> {
        let inner = if bounds.start >= bounds.end {
            self.btm.range_mut(0..0)
        } else {
            let from = self
                .btm
                .range(..=bounds.start)
                .next_back()
                .filter(|(_, entry)| entry.end > bounds.start)
                .map_or(bounds.start, |(&start, _)| start);

            self.btm.range_mut(from..bounds.end)
        };

        RangeIterMut { inner }
    }

    /// Walks `ranges` over the map, invoking `callback` once for every
    /// maximal piece that is either covered by a single stored entry
    /// (`Some(value)`) or not covered at all (`None`).
    ///
    /// Iteration stops early if the callback returns `false`; the return
    /// value is `false` in that case.
    pub fn for_each_overlapping(
        &self,
        ranges: impl IntoIterator<Item = Range<u32>>,
        mut callback: impl FnMut(Range<u32>, Option<&V>) -> bool,
    ) -> bool {
        for bounds in ranges {
            let mut cursor = bounds.start;

            for (entry_range, value) in self.range(bounds.clone()) {
                let clamped_start = entry_range.start.max(bounds.start);

                if clamped_start > cursor && !callback(cursor..clamped_start, None) {
                    return false;
                }

                let clamped_end = entry_range.end.min(bounds.end);

                if !callback(clamped_start..clamped_end, Some(value)) {
                    return false;
                }

                cursor = clamped_end;
            }

            if cursor < bounds.end && !callback(cursor..bounds.end, None) {
                return false;
            }
        }

        true
    }
}

impl<V: Clone + Eq> RangeMap<V> {
    /// Inserts `value` over `range`, overwriting any overlapped parts of
    /// existing entries. Touching or overlapping entries with an equal value
    /// are absorbed into the inserted range.
    ///
    /// # Panics
    ///
    /// - Panics if `range` is empty.
    pub fn insert(&mut self, range: Range<u32>, value: V) {
        assert!(range.start < range.end);

        let mut start = range.start;
        let mut end = range.end;

        // Deal with the entry that begins strictly before the new range: it
        // may need to be absorbed, trimmed or split. An entry that begins at
        // `start` itself belongs to the sweep below; handled here, it would
        // shadow an equal-valued neighbor touching on the left.
        let prev = self
            .btm
            .range(..start)
            .next_back()
            .map(|(&prev_start, entry)| (prev_start, entry.end, entry.value == value));

        if let Some((prev_start, prev_end, same_value)) = prev {
            if same_value && prev_end >= start {
                self.btm.remove(&prev_start);
                start = prev_start;
                end = end.max(prev_end);
            } else if !same_value && prev_end > start {
                let entry = self.btm.get_mut(&prev_start).unwrap();
                entry.end = start;
                let tail_value = entry.value.clone();

                if prev_end > end {
                    let tail = Entry {
                        end: prev_end,
                        value: tail_value,
                    };
                    self.btm.insert(end, tail);
                }
            }
        }

        // Swallow every entry that begins inside the (possibly extended) new
        // range, keeping the tail of one that pokes out past the end.
        loop {
            let Some((next_start, same_value)) = self
                .btm
                .range(start..=end)
                .next()
                .map(|(&next_start, entry)| (next_start, entry.value == value))
            else {
                break;
            };

            if next_start == end && !same_value {
                break;
            }

            let removed = self.btm.remove(&next_start).unwrap();

            if same_value {
                end = end.max(removed.end);
            } else if removed.end > end {
                let tail = Entry {
                    end: removed.end,
                    value: removed.value,
                };
                self.btm.insert(end, tail);
                break;
            }
        }

        self.btm.insert(start, Entry { end, value });
    }

    /// Splits the entry covering `at`, if any, into two entries holding the
    /// same value, meeting at `at`. Afterwards no stored range spans `at`.
    pub fn split_at(&mut self, at: u32) {
        let straddler = self
            .btm
            .range(..at)
            .next_back()
            .filter(|(_, entry)| entry.end > at)
            .map(|(&start, _)| start);

        if let Some(start) = straddler {
            let entry = self.btm.get_mut(&start).unwrap();
            let end = entry.end;
            entry.end = at;
            let value = entry.value.clone();
            self.btm.insert(at, Entry { end, value });
        }
    }

    /// Merges `value` into every part of `range`.
    ///
    /// Where an entry already covers part of the range, `merge` is applied to
    /// it (entries partially overlapping the range are fragmented first).
    /// Uncovered parts are filled with a copy of `value` as-is. Afterwards,
    /// equal adjacent entries around the touched span are re-coalesced.
    ///
    /// Returns whether any stored value actually changed. Fragmenting and
    /// re-coalescing do not count as changes.
    ///
    /// # Panics
    ///
    /// - Panics if `range` is empty.
    pub fn upsert(
        &mut self,
        range: Range<u32>,
        value: &V,
        mut merge: impl FnMut(&mut V, &V),
    ) -> bool {
        assert!(range.start < range.end);

        self.split_at(range.start);
        self.split_at(range.end);

        let mut changed = false;
        let mut cursor = range.start;
        let mut gaps: SmallVec<[Range<u32>; 2]> = SmallVec::new();

        for (entry_range, entry_value) in self.range_mut(range.clone()) {
            if entry_range.start > cursor {
                gaps.push(cursor..entry_range.start);
            }

            let previous = entry_value.clone();
            merge(entry_value, value);

            if *entry_value != previous {
                changed = true;
            }

            cursor = entry_range.end;
        }

        if cursor < range.end {
            gaps.push(cursor..range.end);
        }

        changed |= !gaps.is_empty();

        for gap in gaps {
            let entry = Entry {
                end: gap.end,
                value: value.clone(),
            };
            self.btm.insert(gap.start, entry);
        }

        self.coalesce(range);

        changed
    }

    /// Merges another map into this one, entry by entry in range order.
    ///
    /// `project` turns a source value into the value to store; returning
    /// `None` skips that source entry entirely. Projected values overwrite
    /// whatever they overlap and fill whatever they don't.
    ///
    /// Returns whether any stored value actually changed, so callers can skip
    /// follow-up work when the splice was a no-op.
    pub fn splice<U>(
        &mut self,
        src: &RangeMap<U>,
        mut project: impl FnMut(&U) -> Option<V>,
    ) -> bool {
        let mut changed = false;

        for (range, value) in src.iter() {
            if let Some(value) = project(value) {
                changed |= self.upsert(range, &value, |existing, incoming| {
                    *existing = incoming.clone();
                });
            }
        }

        changed
    }

    // Re-coalesces equal adjacent entries in and around `span`.
    fn coalesce(&mut self, span: Range<u32>) {
        // Start one entry early so a merge across `span.start` is seen.
        let mut cursor = self
            .btm
            .range(..span.start)
            .next_back()
            .map_or(span.start, |(&start, _)| start);

        loop {
            let Some((cur_start, cur_end)) = self
                .btm
                .range(cursor..)
                .next()
                .map(|(&start, entry)| (start, entry.end))
            else {
                break;
            };

            if cur_start >= span.end {
                break;
            }

            let Some((next_start, next_end)) = self
                .btm
                .range(cur_end..)
                .next()
                .map(|(&start, entry)| (start, entry.end))
            else {
                break;
            };

            let equal_values = next_start == cur_end
                && self.btm.get(&cur_start).map(|entry| &entry.value)
                    == self.btm.get(&next_start).map(|entry| &entry.value);

            if equal_values {
                self.btm.remove(&next_start);
                self.btm.get_mut(&cur_start).unwrap().end = next_end;
                // The extended entry may now touch the following one.
            } else {
                cursor = next_start;
            }
        }
    }
}

impl<V> Default for RangeMap<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for RangeMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V: Clone + Eq> FromIterator<(Range<u32>, V)> for RangeMap<V> {
    fn from_iter<T: IntoIterator<Item = (Range<u32>, V)>>(iter: T) -> Self {
        let mut map = RangeMap::new();

        for (range, value) in iter {
            map.insert(range, value);
        }

        map
    }
}

/// An iterator over all entries of a [`RangeMap`], ordered by range start.
pub struct Iter<'a, V> {
    inner: btree_map::Iter<'a, u32, Entry<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (Range<u32>, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(&start, entry)| (start..entry.end, &entry.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

/// An iterator over the entries of a [`RangeMap`] that overlap a query range.
pub struct RangeIter<'a, V> {
    inner: btree_map::Range<'a, u32, Entry<V>>,
}

impl<'a, V> Iterator for RangeIter<'a, V> {
    type Item = (Range<u32>, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(&start, entry)| (start..entry.end, &entry.value))
    }
}

/// A mutable iterator over the entries of a [`RangeMap`] that overlap a query
/// range.
pub struct RangeIterMut<'a, V> {
    inner: btree_map::RangeMut<'a, u32, Entry<V>>,
}

impl<'a, V> Iterator for RangeIterMut<'a, V> {
    type Item = (Range<u32>, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(&start, entry)| (start..entry.end, &mut entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(map: &RangeMap<char>) -> Vec<(Range<u32>, char)> {
        map.iter().map(|(range, &value)| (range, value)).collect()
    }

    #[test]
    fn empty_map() {
        let map: RangeMap<char> = RangeMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(0), None);
        assert_eq!(map.iter().next(), None);
    }

    #[test]
    fn insert_and_get_half_open() {
        let mut map = RangeMap::new();
        // 0 1 2 3 4 5
        //   ●-----◌
        map.insert(1..4, 'a');

        assert_eq!(map.get(0), None);
        assert_eq!(map.get(1), Some(&'a'));
        assert_eq!(map.get(3), Some(&'a'));
        assert_eq!(map.get(4), None);
        assert_eq!(map.get_key_value(2), Some((1..4, &'a')));
        assert!(map.contains_key(2));
        assert!(!map.contains_key(4));
    }

    #[test]
    fn insert_coalesces_touching_equal_values() {
        let mut map = RangeMap::new();
        // ●---◌
        //     ●---◌
        map.insert(0..2, 'a');
        map.insert(2..4, 'a');

        assert_eq!(entries(&map), vec![(0..4, 'a')]);
    }

    #[test]
    fn insert_keeps_touching_unequal_values_apart() {
        let mut map = RangeMap::new();
        // ●---◌
        //     ●---◌
        map.insert(0..2, 'a');
        map.insert(2..4, 'b');

        assert_eq!(entries(&map), vec![(0..2, 'a'), (2..4, 'b')]);
    }

    #[test]
    fn insert_overwrites_middle_of_stored() {
        let mut map = RangeMap::new();
        // ●-----------◌
        //     ●---◌
        map.insert(0..6, 'a');
        map.insert(2..4, 'b');

        assert_eq!(entries(&map), vec![(0..2, 'a'), (2..4, 'b'), (4..6, 'a')]);
    }

    #[test]
    fn insert_overwrites_overlapping_start_and_end() {
        let mut map = RangeMap::new();
        // ●---◌   ●---◌
        //   ●-------◌
        map.insert(0..2, 'a');
        map.insert(4..6, 'b');
        map.insert(1..5, 'c');

        assert_eq!(entries(&map), vec![(0..1, 'a'), (1..5, 'c'), (5..6, 'b')]);
    }

    #[test]
    fn insert_absorbs_covered_entries() {
        let mut map = RangeMap::new();
        //   ●-◌ ●-◌
        // ●---------◌
        map.insert(1..2, 'a');
        map.insert(3..4, 'b');
        map.insert(0..5, 'c');

        assert_eq!(entries(&map), vec![(0..5, 'c')]);
    }

    #[test]
    fn insert_extends_over_equal_overlapping_neighbors() {
        let mut map = RangeMap::new();
        // ●-----◌ ●-----◌
        //     ●-----◌
        map.insert(0..3, 'a');
        map.insert(4..7, 'a');
        map.insert(2..5, 'a');

        assert_eq!(entries(&map), vec![(0..7, 'a')]);
    }

    #[test]
    fn insert_coalesces_left_of_replaced_entry() {
        let mut map = RangeMap::new();
        // ●-----◌
        //       ●---◌
        //       ●-------◌
        map.insert(0..3, 'a');
        map.insert(3..5, 'b');
        // The insert starts where 'b' did, but must still merge with 'a'.
        map.insert(3..7, 'a');

        assert_eq!(entries(&map), vec![(0..7, 'a')]);
    }

    #[test]
    fn split_at_fragments_straddling_entry() {
        let mut map = RangeMap::new();
        map.insert(0..6, 'a');
        map.split_at(3);

        assert_eq!(entries(&map), vec![(0..3, 'a'), (3..6, 'a')]);

        // Splitting at an existing boundary or outside is a no-op.
        map.split_at(3);
        map.split_at(0);
        map.split_at(6);
        map.split_at(9);

        assert_eq!(entries(&map), vec![(0..3, 'a'), (3..6, 'a')]);
    }

    #[test]
    fn range_yields_straddling_entry() {
        let mut map = RangeMap::new();
        // ●-----◌   ●---◌
        map.insert(0..3, 'a');
        map.insert(5..7, 'b');

        let overlapping: Vec<_> = map.range(2..6).map(|(r, &v)| (r, v)).collect();
        assert_eq!(overlapping, vec![(0..3, 'a'), (5..7, 'b')]);

        let overlapping: Vec<_> = map.range(3..5).map(|(r, &v)| (r, v)).collect();
        assert_eq!(overlapping, vec![]);
    }

    #[test]
    fn range_mut_mutates_values_in_place() {
        let mut map = RangeMap::new();
        map.insert(0..4, 'a');
        map.insert(4..8, 'b');

        for (_, value) in map.range_mut(2..6) {
            *value = 'z';
        }

        // range_mut does not coalesce, so the now-equal entries stay separate.
        assert_eq!(entries(&map), vec![(0..4, 'z'), (4..8, 'z')]);
    }

    #[test]
    fn upsert_fills_empty_map() {
        let mut map = RangeMap::new();
        let changed = map.upsert(2..5, &'a', |_, _| unreachable!());

        assert!(changed);
        assert_eq!(entries(&map), vec![(2..5, 'a')]);
    }

    #[test]
    fn upsert_fragments_and_merges_partial_overlap() {
        let mut map = RangeMap::new();
        // ●-------◌
        //     ●-------◌
        map.insert(0..4, 'a');
        let changed = map.upsert(2..6, &'b', |existing, incoming| {
            *existing = *incoming;
        });

        assert!(changed);
        assert_eq!(entries(&map), vec![(0..2, 'a'), (2..6, 'b')]);
    }

    #[test]
    fn upsert_fills_gaps_between_entries() {
        let mut map = RangeMap::new();
        // ●-◌     ●-◌
        //   ●-----◌
        map.insert(0..1, 'a');
        map.insert(4..5, 'a');
        let changed = map.upsert(1..4, &'a', |existing, _| {
            *existing = 'z';
        });

        assert!(changed);
        // The gap fill coalesces with both untouched neighbors.
        assert_eq!(entries(&map), vec![(0..5, 'a')]);
    }

    #[test]
    fn upsert_reports_no_change_when_merge_is_identity() {
        let mut map = RangeMap::new();
        map.insert(0..8, 'a');

        let changed = map.upsert(2..6, &'b', |_, _| {});

        assert!(!changed);
        // The split fragments were re-coalesced.
        assert_eq!(entries(&map), vec![(0..8, 'a')]);
    }

    #[test]
    fn upsert_coalesces_after_equalizing_merge() {
        let mut map = RangeMap::new();
        map.insert(0..2, 'a');
        map.insert(2..4, 'b');

        let changed = map.upsert(2..4, &'a', |existing, incoming| {
            *existing = *incoming;
        });

        assert!(changed);
        assert_eq!(entries(&map), vec![(0..4, 'a')]);
    }

    #[test]
    fn splice_projects_and_skips() {
        let mut dst: RangeMap<char> = RangeMap::new();
        dst.insert(0..4, 'a');

        let mut src: RangeMap<Option<char>> = RangeMap::new();
        src.insert(1..2, Some('b'));
        src.insert(2..3, None);
        src.insert(6..8, Some('c'));

        let changed = dst.splice(&src, |value| *value);

        assert!(changed);
        assert_eq!(
            entries(&dst),
            vec![(0..1, 'a'), (1..2, 'b'), (2..4, 'a'), (6..8, 'c')],
        );
    }

    #[test]
    fn splice_is_idempotent() {
        let mut dst: RangeMap<char> = RangeMap::new();
        let mut src: RangeMap<char> = RangeMap::new();
        src.insert(0..3, 'a');
        src.insert(5..9, 'b');

        assert!(dst.splice(&src, |&value| Some(value)));
        let snapshot = dst.clone();

        // A second splice of the same source must not change anything, and
        // must say so.
        assert!(!dst.splice(&src, |&value| Some(value)));
        assert_eq!(dst, snapshot);
    }

    #[test]
    fn for_each_overlapping_reports_gaps_and_entries() {
        let mut map = RangeMap::new();
        // ●---◌   ●---◌
        map.insert(0..2, 'a');
        map.insert(4..6, 'b');

        let mut seen = Vec::new();
        let completed = map.for_each_overlapping([1..7], |range, value| {
            seen.push((range, value.copied()));
            true
        });

        assert!(completed);
        assert_eq!(
            seen,
            vec![
                (1..2, Some('a')),
                (2..4, None),
                (4..6, Some('b')),
                (6..7, None),
            ],
        );
    }

    #[test]
    fn for_each_overlapping_stops_early() {
        let mut map = RangeMap::new();
        map.insert(0..2, 'a');
        map.insert(2..4, 'b');

        let mut calls = 0;
        let completed = map.for_each_overlapping([0..4], |_, _| {
            calls += 1;
            false
        });

        assert!(!completed);
        assert_eq!(calls, 1);
    }

    #[test]
    fn for_each_overlapping_walks_multiple_query_ranges() {
        let mut map = RangeMap::new();
        map.insert(0..10, 'a');

        let mut seen = Vec::new();
        map.for_each_overlapping([0..2, 4..6], |range, value| {
            seen.push((range, value.copied()));
            true
        });

        assert_eq!(seen, vec![(0..2, Some('a')), (4..6, Some('a'))]);
    }

    #[test]
    fn from_iter_collects_and_coalesces() {
        let map: RangeMap<char> = [(0..2, 'a'), (2..4, 'a'), (6..8, 'b')]
            .into_iter()
            .collect();

        assert_eq!(entries(&map), vec![(0..4, 'a'), (6..8, 'b')]);
    }
}
