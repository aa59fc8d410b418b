// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Cache-oblivious dictionary over a packed memory array.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ Dictionary<K, V>                                │
//! ├─────────────────────────────────────────────────┤
//! │ - region: Vec<Slot<K, V>>   (gapped, sorted)    │
//! │ - geometry: nsegs × segsize, implicit tree      │
//! │ - bounds: per-level density thresholds          │
//! │ - index: VebTree<K>         (vEB order)         │
//! └──────────┬───────────────────────┬──────────────┘
//!            │ predecessor descent   │ window rebuild
//!            ▼                       ▼
//! ┌──────────────────┐      ┌──────────────────────┐
//! │ vEB index        │      │ leaf region          │
//! │ leaf: segment    │◄─────│ slot: key, value,    │
//! │ min + start slot │ link │ covering-leaf bfs    │
//! └──────────────────┘      └──────────────────────┘
//! ```
//!
//! Search descends the index in vEB order to one segment, then runs a
//! soft binary search inside it. Insertion finds the predecessor slot
//! the same way, writes into a vacant slot when the probe ends on one,
//! and otherwise redistributes the smallest window of the implicit
//! segment tree whose density can absorb the new item, doubling the
//! whole region when even the root window cannot. Every rebalance
//! repairs the index leaves it touched plus the separator path up to the
//! root, so both stay in lockstep.

use crate::error::{DictError, DictResult};
use crate::key::DictKey;
use crate::layout::bfs_parent;
use crate::pma::{
    rebalance_insert, soft_bin_search, window_occupancy, DensityBounds, Geometry, Probe, Slot,
};
use crate::veb::VebTree;
use std::ops::Range;

/// Locality-preserving dynamic dictionary.
///
/// ## Type Parameters
/// - `K`: key profile (see [`crate::key::DictKey`])
/// - `V`: opaque value blob stored alongside each key
///
/// ## Thread Safety
/// - Single-threaded, synchronous, exclusively owned by its caller; no
///   operation suspends.
pub struct Dictionary<K: DictKey, V: Clone + Default> {
    region: Vec<Slot<K, V>>,
    geometry: Geometry,
    bounds: DensityBounds,
    nitems: usize,
    grows: usize,
    index: VebTree<K>,
}

/// Point-in-time shape of a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictStats {
    pub items: usize,
    pub size: usize,
    pub segsize: usize,
    pub nsegs: usize,
    pub height: u32,
    pub grows: usize,
}

impl<K: DictKey, V: Clone + Default> Dictionary<K, V> {
    /// Create a dictionary with room for at least `capacity` keys before
    /// the first grow.
    ///
    /// ## Input
    /// - `capacity`: positive expected key count
    ///
    /// ## Error Conditions
    /// - `InvalidCapacity`: `capacity` is zero
    pub fn new(capacity: usize) -> DictResult<Self> {
        let geometry = Geometry::for_capacity(capacity)?;
        let mut dict = Dictionary {
            region: vec![Slot::empty(); geometry.size],
            geometry,
            bounds: DensityBounds::default(),
            nitems: 0,
            grows: 0,
            index: VebTree::for_segments(geometry.nsegs)?,
        };
        dict.rebuild_index_all();
        Ok(dict)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.nitems
    }

    pub fn is_empty(&self) -> bool {
        self.nitems == 0
    }

    /// Slot capacity of the current region.
    pub fn capacity(&self) -> usize {
        self.geometry.size
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn stats(&self) -> DictStats {
        DictStats {
            items: self.nitems,
            size: self.geometry.size,
            segsize: self.geometry.segsize,
            nsegs: self.geometry.nsegs,
            height: self.geometry.height,
            grows: self.grows,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.index.is_frozen()
    }

    /// Read a slot of the leaf region.
    pub fn slot(&self, pos: usize) -> &Slot<K, V> {
        &self.region[pos]
    }

    /// Locate a key: index descent to one segment, then soft binary
    /// search inside it.
    ///
    /// ## Output
    /// - `(slot, found)`: the matching slot when `found`, otherwise the
    ///   nearest occupied neighbor of the insertion point (or the probed
    ///   slot of an all-empty segment)
    pub fn search(&self, key: K) -> (usize, bool) {
        if key.is_sentinel() {
            return (0, false);
        }
        let probe = self.probe(key);
        (probe.pos, probe.found)
    }

    /// Exact lookup.
    pub fn get(&self, key: K) -> Option<&V> {
        if key.is_sentinel() {
            return None;
        }
        let probe = self.probe(key);
        if probe.found {
            Some(self.region[probe.pos].value())
        } else {
            None
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Largest stored key `<=` the query, with its value.
    pub fn predecessor(&self, key: K) -> Option<(K, &V)> {
        if key.is_sentinel() || self.nitems == 0 {
            return None;
        }
        let probe = self.probe(key);
        let mut pos = probe.pos as isize;
        while pos >= 0 {
            let slot = &self.region[pos as usize];
            if !slot.is_empty() && slot.key() <= key {
                return Some((slot.key(), slot.value()));
            }
            pos -= 1;
        }
        None
    }

    fn probe(&self, key: K) -> Probe {
        let segment_start = self.index.find_segment(key);
        let range = self
            .geometry
            .segment_range(self.geometry.segment_of(segment_start));
        soft_bin_search(&self.region, range.start, range.end - 1, key)
    }

    /// Insert a key/value pair.
    ///
    /// ## Input
    /// - `key`: non-sentinel key; a present key is absorbed (count,
    ///   layout and traversal unchanged, value refreshed)
    /// - `value`: payload stored in the leaf slot
    ///
    /// ## Output
    /// - `Ok(())` once placed with every window density within bounds
    ///
    /// ## Error Conditions
    /// - `KeyIsSentinel`: the reserved empty marker
    /// - `Frozen`: dictionary was pointerized
    ///
    /// ## Performance
    /// - O(log_B N) block transfers for the descent, amortized O(log² N)
    ///   slot moves per insert for rebalancing
    pub fn insert(&mut self, key: K, value: V) -> DictResult<()> {
        if key.is_sentinel() {
            return Err(DictError::KeyIsSentinel);
        }
        if self.index.is_frozen() {
            return Err(DictError::Frozen {
                operation: "insert".to_string(),
            });
        }

        loop {
            let probe = self.probe(key);

            if probe.found {
                self.region[probe.pos].value = value;
                return Ok(());
            }

            // Vacant probe slot: write in place, repair the covering
            // leaf, then restore any violated window density.
            if let Some(vacant) = probe.vacant {
                self.region[vacant] = Slot::occupied(key, value);
                self.nitems += 1;
                self.repair_segment(vacant);

                match self.admissible_level(vacant, 0) {
                    Some(0) => {}
                    Some(level) => {
                        let window = self.geometry.window_of(vacant, level);
                        rebalance_insert(&mut self.region, window.clone(), None);
                        self.rebuild_window(window, level);
                    }
                    None => self.grow()?,
                }
                return Ok(());
            }

            // Occupied neighborhood: find the lowest window that can
            // absorb one more item, redistribute it with the new entry
            // spliced in, and rebuild the index beneath it.
            match self.admissible_level(probe.pos, 1) {
                Some(level) => {
                    let window = self.geometry.window_of(probe.pos, level);
                    rebalance_insert(&mut self.region, window.clone(), Some((key, value)));
                    self.nitems += 1;
                    self.rebuild_window(window, level);
                    return Ok(());
                }
                None => self.grow()?,
            }
        }
    }

    /// Lowest level whose window around `pos` stays at or below its
    /// target density with `extra` more items, or `None` when even the
    /// root window cannot absorb them.
    fn admissible_level(&self, pos: usize, extra: usize) -> Option<u32> {
        for level in 0..self.geometry.height {
            let window = self.geometry.window_of(pos, level);
            let occupancy = window_occupancy(&self.region, window.clone()) + extra;
            let density = occupancy as f64 / window.len() as f64;
            if density <= self.bounds.max_target(level, self.geometry.height) {
                return Some(level);
            }
        }
        None
    }

    /// Double the region, redistribute every surviving item across it,
    /// and rebuild the index from scratch.
    fn grow(&mut self) -> DictResult<()> {
        let geometry = Geometry::for_capacity(self.geometry.size * 2)?;
        self.region.resize(geometry.size, Slot::empty());
        self.geometry = geometry;
        self.grows += 1;

        rebalance_insert(&mut self.region, 0..geometry.size, None);
        assert!(
            self.nitems as f64 <= self.bounds.max_root * geometry.size as f64,
            "density blowup after grow: {} items in {} slots",
            self.nitems,
            geometry.size
        );

        self.index = VebTree::for_segments(geometry.nsegs)?;
        self.rebuild_index_all();
        Ok(())
    }

    /// Freeze the index for read-only search: child positions are
    /// materialized and descent switches to position chasing. Search
    /// results are unchanged; all further mutation is rejected.
    pub fn pointerize(&mut self) {
        self.index.pointerize();
    }

    /// In-order iterator over occupied slots.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.region.iter(),
        }
    }

    //
    // Index synchronization
    //

    fn leaf_bfs(&self, seg: usize) -> u64 {
        (self.geometry.nsegs + seg) as u64
    }

    /// Reload one index leaf from its segment: minimum key, segment
    /// start link, and the back references of the occupied slots.
    fn rebuild_leaf(&mut self, seg: usize) {
        let range = self.geometry.segment_range(seg);
        let bfs = self.leaf_bfs(seg);

        let mut min_key = K::SENTINEL;
        for pos in range.clone() {
            if !self.region[pos].is_empty() {
                if min_key.is_sentinel() {
                    min_key = self.region[pos].key();
                }
                self.region[pos].index_leaf = bfs as u32;
            }
        }
        self.index.set_leaf(bfs, min_key, range.start);
    }

    /// Local index update after rebalancing a window: reload the leaves
    /// it covers, recompute the separators inside its subtree, then the
    /// ancestor path up to the root.
    fn rebuild_window(&mut self, window: Range<usize>, level: u32) {
        let mut lo = window.start / self.geometry.segsize;
        let mut hi = window.end / self.geometry.segsize;
        for seg in lo..hi {
            self.rebuild_leaf(seg);
        }

        for row in 1..=level {
            lo >>= 1;
            hi >>= 1;
            for j in lo..hi {
                let bfs = ((self.geometry.nsegs >> row) + j) as u64;
                self.index.recompute_separator(bfs);
            }
        }

        let window_root = ((self.geometry.nsegs >> level) + lo) as u64;
        let mut cur = bfs_parent(window_root);
        while cur >= 1 {
            self.index.recompute_separator(cur);
            cur = bfs_parent(cur);
        }
    }

    /// Fast-path repair after a direct write: the covering leaf plus the
    /// separator path above it.
    fn repair_segment(&mut self, pos: usize) {
        let seg = self.geometry.segment_of(pos);
        self.rebuild_leaf(seg);
        let mut cur = bfs_parent(self.leaf_bfs(seg));
        while cur >= 1 {
            self.index.recompute_separator(cur);
            cur = bfs_parent(cur);
        }
    }

    /// Global rebuild: every leaf, every separator (used at construction
    /// and after grow).
    fn rebuild_index_all(&mut self) {
        self.rebuild_window(0..self.geometry.size, self.geometry.height - 1);
    }

    /// Structural self-check used by the test suite.
    ///
    /// Verifies sorted order over occupied slots, window densities
    /// within one slot of their per-level targets, leaf keys matching
    /// segment minima, separators matching right-subtree minima, and
    /// slot back references.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        use crate::pma::scan_minimum;

        // Sorted order, distinct keys, count.
        let mut previous: Option<K> = None;
        let mut live = 0;
        for slot in &self.region {
            if slot.is_empty() {
                continue;
            }
            live += 1;
            if let Some(prev) = previous {
                assert!(prev < slot.key(), "region order violated");
            }
            previous = Some(slot.key());
        }
        assert_eq!(live, self.nitems, "item count drifted");

        // Sustained density ceiling. Per-level targets are enforced on
        // the climbed path at insert time; between operations every
        // segment stays within a slot of the tight per-segment bound, so
        // a window of w slots holds at most max_seg·w plus one rounding
        // slot per segment.
        for level in 0..self.geometry.height {
            let size = self.geometry.window_size(level);
            let ceiling =
                self.bounds.max_seg * size as f64 + (size / self.geometry.segsize) as f64 + 1.0;
            let mut start = 0;
            while start < self.geometry.size {
                let occupancy = window_occupancy(&self.region, start..start + size);
                assert!(
                    occupancy as f64 <= ceiling,
                    "window {}..{} at level {} holds {} items (ceiling {})",
                    start,
                    start + size,
                    level,
                    occupancy,
                    ceiling
                );
                start += size;
            }
        }

        // Index leaves: key = segment minimum, every occupied slot back-
        // references its covering leaf.
        for seg in 0..self.geometry.nsegs {
            let range = self.geometry.segment_range(seg);
            let bfs = self.leaf_bfs(seg);
            assert_eq!(
                self.index.key_at(bfs),
                scan_minimum(&self.region, range.clone()),
                "leaf key of segment {} drifted",
                seg
            );
            for pos in range {
                if !self.region[pos].is_empty() {
                    assert_eq!(self.region[pos].covering_leaf(), Some(bfs));
                }
            }
        }

        // Separators: minimum key of the right subtree.
        for bfs in 1..self.geometry.nsegs as u64 {
            let leaf_span = {
                let mut first = bfs * 2 + 1;
                let mut count = 1usize;
                while first < self.geometry.nsegs as u64 {
                    first *= 2;
                    count *= 2;
                }
                (first, count)
            };
            let mut expected = K::SENTINEL;
            for leaf in leaf_span.0..leaf_span.0 + leaf_span.1 as u64 {
                let seg = leaf as usize - self.geometry.nsegs;
                let key = scan_minimum(&self.region, self.geometry.segment_range(seg));
                if !key.is_sentinel() {
                    expected = key;
                    break;
                }
            }
            assert_eq!(
                self.index.key_at(bfs),
                expected,
                "separator at bfs {} drifted",
                bfs
            );
        }
    }
}

/// In-order iterator over occupied slots.
pub struct Iter<'a, K: DictKey, V> {
    slots: std::slice::Iter<'a, Slot<K, V>>,
}

impl<'a, K: DictKey, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<(K, &'a V)> {
        for slot in self.slots.by_ref() {
            if !slot.is_empty() {
                return Some((slot.key(), slot.value()));
            }
        }
        None
    }
}
