// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Packed-memory-array slot manipulation.
//!
//! Free functions over the leaf region: window occupancy scans, segment
//! minima, the rebalance-with-insert redistribution, and the soft binary
//! search that tolerates empty slots. All functions preserve the strict
//! sorted order of occupied slots.

use crate::key::DictKey;
use crate::pma::types::Slot;
use std::ops::Range;

/// Result of a soft binary search over one segment.
///
/// `pos` is the reported slot: the match when `found`, otherwise the
/// nearest occupied neighbor of the collapsed bracket (preferring the
/// nearest-≥ side) or the bracket midpoint of an all-empty segment.
/// `vacant` carries the empty bracket midpoint when the search collapsed
/// onto one, which is the slot a new key may be written into directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub pos: usize,
    pub found: bool,
    pub vacant: Option<usize>,
}

#[inline]
fn empty_at<K: DictKey, V>(region: &[Slot<K, V>], pos: isize) -> bool {
    region[pos as usize].key.is_sentinel()
}

/// Count occupied slots in a window.
pub(crate) fn window_occupancy<K: DictKey, V>(region: &[Slot<K, V>], window: Range<usize>) -> usize {
    region[window].iter().filter(|s| !s.key.is_sentinel()).count()
}

/// First occupied key of a range (its minimum under sorted order), or
/// the sentinel when the range is fully empty.
pub(crate) fn scan_minimum<K: DictKey, V>(region: &[Slot<K, V>], range: Range<usize>) -> K {
    for slot in &region[range] {
        if !slot.key.is_sentinel() {
            return slot.key;
        }
    }
    K::SENTINEL
}

/// Rebalance a window, optionally splicing one new entry, and return the
/// resulting occupancy.
///
/// ## Algorithm
/// 1. Compact occupied slots leftward into a contiguous prefix. The scan
///    emits the pending entry the moment it meets a greater key and
///    carries the displaced entry forward (single-pass sorted splice).
/// 2. Compute the gap stride `((L - occ) << 8) / occ` in 8.8 fixed
///    point.
/// 3. Redistribute right to left from `pos = (end - 1) << 8`, stepping
///    `pos -= (1 << 8) + stride`, so gaps are uniform, order is
///    preserved, and the last item lands on the window's final slot.
///
/// Back references on moved slots are left stale; the caller rebuilds
/// the index over the window afterwards.
pub(crate) fn rebalance_insert<K: DictKey, V: Clone + Default>(
    region: &mut [Slot<K, V>],
    window: Range<usize>,
    pending: Option<(K, V)>,
) -> usize {
    let (start, end) = (window.start, window.end);
    debug_assert!(end <= region.len());
    let length = end - start;

    let mut pending: Option<Slot<K, V>> = pending.map(|(k, v)| Slot::occupied(k, v));

    // Compact left, splicing the pending entry into sorted position.
    let mut write = start;
    for read in start..end {
        if region[read].key.is_sentinel() {
            continue;
        }
        let slot = std::mem::replace(&mut region[read], Slot::empty());
        let emit = match &mut pending {
            Some(p) if slot.key > p.key => std::mem::replace(p, slot),
            _ => slot,
        };
        region[write] = emit;
        write += 1;
    }
    if let Some(p) = pending.take() {
        region[write] = p;
        write += 1;
    }

    let occ = write - start;
    if occ == 0 {
        return 0;
    }

    // Redistribute from the right with 8.8 fixed-point gap accounting.
    let stride = (((length - occ) as i64) << 8) / occ as i64;
    let mut pos = ((end - 1) as i64) << 8;
    for read in (start..start + occ).rev() {
        let target = (pos >> 8) as usize;
        if target != read {
            region[target] = std::mem::replace(&mut region[read], Slot::empty());
        }
        pos -= (1 << 8) + stride;
    }

    occ
}

/// Soft binary search over `region[lo..=hi]`.
///
/// Standard binary search, except that an empty midpoint is resolved by
/// scanning outward (left and right simultaneously) within the current
/// bracket until an occupied probe is found; an all-empty bracket ends
/// the search at its midpoint.
///
/// ## Output
/// - [`Probe`] with the match, or the insertion neighborhood: the
///   nearest-≥ occupied neighbor when one exists (the predecessor side
///   otherwise), plus the vacant midpoint when the bracket collapsed
///   onto an empty slot.
pub(crate) fn soft_bin_search<K: DictKey, V>(
    region: &[Slot<K, V>],
    lo: usize,
    hi: usize,
    key: K,
) -> Probe {
    debug_assert!(lo <= hi && hi < region.len());
    let (lo, hi) = (lo as isize, hi as isize);

    let mut min_i = lo;
    let mut max_i = hi;
    let mut mid = (min_i + max_i) / 2;

    while min_i < max_i {
        // Scan left and right for an occupied probe.
        let mut l = mid;
        let mut r = mid;
        while empty_at(region, l) && empty_at(region, r) && (l > min_i || r < max_i) {
            if l > min_i {
                l -= 1;
            }
            if r < max_i {
                r += 1;
            }
        }

        if !empty_at(region, l) {
            mid = l;
        } else if !empty_at(region, r) {
            mid = r;
        } else {
            // Entire bracket is empty; the midpoint is the insert slot.
            break;
        }

        let probe = region[mid as usize].key;
        if probe < key {
            min_i = mid + 1;
        } else if probe > key {
            max_i = mid - 1;
        } else {
            break;
        }
        mid = (min_i + max_i) / 2;
    }

    // A collapsed bracket can step the midpoint just below the range.
    if mid < lo {
        mid = lo;
    }

    if !empty_at(region, mid) {
        return Probe {
            pos: mid as usize,
            found: region[mid as usize].key == key,
            vacant: None,
        };
    }

    // The bracket collapsed onto an empty slot: report the nearest
    // occupied neighbor, preferring the ≥ side, but remember the vacancy.
    let vacant = Some(mid as usize);
    let mut right = mid + 1;
    while right <= hi {
        if !empty_at(region, right) {
            return Probe {
                pos: right as usize,
                found: false,
                vacant,
            };
        }
        right += 1;
    }
    let mut left = mid - 1;
    while left >= lo {
        if !empty_at(region, left) {
            return Probe {
                pos: left as usize,
                found: false,
                vacant,
            };
        }
        left -= 1;
    }
    Probe {
        pos: mid as usize,
        found: false,
        vacant,
    }
}
