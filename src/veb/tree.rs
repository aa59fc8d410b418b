// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! vEB-layout binary search tree.
//!
//! A complete binary tree stored in a flat region in van Emde Boas order.
//! Navigation is pure BFS-number arithmetic (no child pointers) so a
//! root-to-leaf walk costs O(log_B N) block transfers for every block
//! size B at once. The tree serves two roles:
//!
//! - **Tree-form dictionary**: keys live in the nodes; insertion claims
//!   the first empty node along the search path and rebalances the
//!   nearest ancestor subtree whose density admits the new key,
//!   doubling the tree height when the root itself is too dense.
//! - **Index over the packed memory array**: leaf nodes carry segment
//!   minima and a link to the segment's first slot; interior nodes carry
//!   the minimum key of their right subtree.
//!
//! Densities are tracked in 16.16 fixed point between a root target of
//! 0.5 and a leaf target of 1.0.
//!
//! ## Mode transition
//!
//! [`VebTree::pointerize`] is a one-shot freeze: it materializes child
//! positions inside every node and switches search to position chasing
//! over the same layout. The element region must not be reallocated
//! afterwards, so all mutation is rejected once frozen.

use crate::error::{DictError, DictResult};
use crate::key::DictKey;
use crate::layout::{
    bfs_is_right, bfs_left, bfs_parent, bfs_peer, bfs_right, ilog2, level_table, tree_size,
    veb_position, LevelInfo, MAX_HEIGHT,
};
use crate::storage::{read_sidecar, write_sidecar, Backing, Region, Sidecar};
use std::path::{Path, PathBuf};

/// Default density bounds in 16.16 fixed point: 0.5 at the root, 1.0 at
/// the leaves.
const MIN_DENSITY: u32 = 0x8000;
const MAX_DENSITY: u32 = 0x10000;

/// Element of the vEB-laid-out tree.
///
/// The key doubles as the occupancy indicator (sentinel = empty).
/// `left`/`right` are 1-indexed physical positions materialized by
/// `pointerize` (0 = absent); `leaf` links an index leaf to the first
/// slot of its covered segment (0 = unlinked, stored off by one).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Node<K> {
    key: K,
    left: u32,
    right: u32,
    leaf: u32,
}

impl<K: DictKey> Node<K> {
    #[inline]
    fn empty() -> Self {
        Node {
            key: K::SENTINEL,
            left: 0,
            right: 0,
            leaf: 0,
        }
    }

    #[inline]
    fn with_key(key: K) -> Self {
        Node {
            key,
            left: 0,
            right: 0,
            leaf: 0,
        }
    }

    /// The routing key, or the sentinel if the node is empty.
    #[inline]
    pub fn key(&self) -> K {
        self.key
    }

    /// First slot of the covered segment, for index leaves.
    #[inline]
    pub fn leaf(&self) -> Option<usize> {
        if self.leaf == 0 {
            None
        } else {
            Some(self.leaf as usize - 1)
        }
    }
}

/// Binary search tree in van Emde Boas layout.
pub struct VebTree<K: DictKey> {
    height: u32,
    min_density: u32,
    max_density: u32,
    count: usize,
    frozen: bool,
    elements: Region<Node<K>>,
    scratch: Vec<Node<K>>,
    level_info: Vec<LevelInfo>,
    backing_path: Option<PathBuf>,
}

impl<K: DictKey> VebTree<K> {
    /// Create a tree-form dictionary able to hold at least `capacity`
    /// keys before the first grow.
    ///
    /// ## Input
    /// - `capacity`: positive expected key count
    ///
    /// ## Output
    /// - heap-backed tree of height `ilog2(2 * capacity) + 1`
    ///
    /// ## Error Conditions
    /// - `InvalidCapacity`: `capacity` is zero
    pub fn new(capacity: usize) -> DictResult<Self> {
        Self::with_backing(capacity, Backing::Heap)
    }

    /// Create a tree with an explicit backing (heap or file mapping).
    ///
    /// The file form truncates any existing file at the path, holds an
    /// exclusive advisory lock, and rewrites the sidecar on clean
    /// shutdown. See [`crate::storage`] for the persistence contract.
    pub fn with_backing(capacity: usize, backing: Backing) -> DictResult<Self> {
        if capacity == 0 {
            return Err(DictError::InvalidCapacity { requested: 0 });
        }
        let height = ilog2(2 * capacity as u64) + 1;
        Self::build(height, 0, backing)
    }

    /// Index tree over `nsegs` segments: exactly `ilog2(nsegs) + 1`
    /// levels so the leaf row is the segment row.
    pub(crate) fn for_segments(nsegs: usize) -> DictResult<Self> {
        debug_assert!(nsegs.is_power_of_two());
        let height = ilog2(nsegs as u64) + 1;
        Self::build(height, 0, Backing::Heap)
    }

    fn build(height: u32, count: usize, backing: Backing) -> DictResult<Self> {
        assert!((height as usize) < MAX_HEIGHT);
        let nodes = 1usize << height;

        let (elements, backing_path) = match backing {
            Backing::Heap => (Region::heap(nodes, Node::empty()), None),
            Backing::File(path) => (Region::create(&path, nodes, Node::empty())?, Some(path)),
        };

        Ok(VebTree {
            height,
            min_density: MIN_DENSITY,
            max_density: MAX_DENSITY,
            count,
            frozen: false,
            elements,
            scratch: vec![Node::empty(); nodes],
            level_info: level_table(height),
            backing_path,
        })
    }

    /// Reopen a file-backed tree from its region file and sidecar.
    ///
    /// ## Input
    /// - `path`: backing file created by an earlier `with_backing`
    ///
    /// ## Output
    /// - tree reconstructed from the sidecar's height and count, in the
    ///   mutable (pre-pointerize) mode
    ///
    /// ## Error Conditions
    /// - `SidecarCorrupted`: sidecar missing, unparsable or failing its
    ///   checksum
    /// - `IoError`: region file missing or locked by another process
    pub fn open<P: AsRef<Path>>(path: P) -> DictResult<Self> {
        let path = path.as_ref().to_path_buf();
        let sidecar = read_sidecar(&path)?;
        if sidecar.height == 0 || sidecar.height as usize >= MAX_HEIGHT {
            return Err(DictError::SidecarCorrupted {
                path: path.display().to_string(),
                reason: format!("implausible height {}", sidecar.height),
            });
        }

        let nodes = 1usize << sidecar.height;
        let elements = Region::open(&path, nodes)?;

        Ok(VebTree {
            height: sidecar.height,
            min_density: MIN_DENSITY,
            max_density: MAX_DENSITY,
            count: sidecar.count,
            frozen: false,
            elements,
            scratch: vec![Node::empty(); nodes],
            level_info: level_table(sidecar.height),
            backing_path: Some(path),
        })
    }

    /// Flush the region and rewrite the sidecar (no-op for heap trees),
    /// consuming the tree.
    pub fn close(mut self) -> DictResult<()> {
        self.persist()
    }

    fn persist(&mut self) -> DictResult<()> {
        if let Some(path) = self.backing_path.clone() {
            write_sidecar(
                &path,
                &Sidecar {
                    height: self.height,
                    count: self.count,
                },
            )?;
            self.elements.flush()?;
        }
        Ok(())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Tree height (levels of the complete tree).
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Node capacity of the complete tree, `2^height - 1`.
    pub fn capacity(&self) -> usize {
        tree_size(self.height)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    fn max_bfs(&self) -> u64 {
        (1u64 << self.height) - 1
    }

    /// Physical 0-indexed slot of a BFS number.
    #[inline]
    fn slot_of(&self, bfs: u64) -> usize {
        veb_position(&self.level_info, bfs) - 1
    }

    #[inline]
    fn node(&self, bfs: u64) -> &Node<K> {
        &self.elements.as_slice()[self.slot_of(bfs)]
    }

    /// The node stored at a BFS position (`1..=2^height - 1`).
    #[inline]
    pub fn node_at(&self, bfs: u64) -> &Node<K> {
        self.node(bfs)
    }

    #[inline]
    fn node_mut(&mut self, bfs: u64) -> &mut Node<K> {
        let slot = self.slot_of(bfs);
        &mut self.elements.as_mut_slice()[slot]
    }

    /// Whether `bfs` names a tree node holding a live key.
    #[inline]
    pub fn node_valid(&self, bfs: u64) -> bool {
        bfs >= 1 && bfs <= self.max_bfs() && !self.node(bfs).key.is_sentinel()
    }

    /// In-order first valid BFS position under `root`, if any.
    pub fn bfs_first(&self, root: u64) -> Option<u64> {
        if !self.node_valid(root) {
            return None;
        }
        let mut bfs = root;
        while self.node_valid(bfs) {
            bfs = bfs_left(bfs);
        }
        Some(bfs_parent(bfs))
    }

    /// In-order successor of `cur` within the subtree at `root`.
    pub fn bfs_next(&self, cur: u64, root: u64) -> Option<u64> {
        // At the subtree root with no right child: done.
        if cur == root && !self.node_valid(bfs_right(cur)) {
            return None;
        }

        // Right child present: go right, then all the way left.
        if self.node_valid(bfs_right(cur)) {
            let mut bfs = bfs_right(cur);
            while self.node_valid(bfs) {
                bfs = bfs_left(bfs);
            }
            return Some(bfs_parent(bfs));
        }

        // Otherwise climb until the step up comes from a left child.
        let mut tail = cur;
        let mut next = bfs_parent(cur);
        while bfs_is_right(tail) && next != root {
            tail = next;
            next = bfs_parent(next);
        }
        if next <= root && bfs_is_right(tail) {
            return None;
        }
        Some(next)
    }

    /// Number of valid nodes in the subtree rooted at `bfs`.
    pub fn occupation(&self, bfs: u64) -> usize {
        if !self.node_valid(bfs) {
            return 0;
        }
        1 + self.occupation(bfs_left(bfs)) + self.occupation(bfs_right(bfs))
    }

    /// Subtree density in 16.16 fixed point: `(occ << 16) / (2^h - 1)`.
    #[inline]
    fn density(occupation: usize, height: u32) -> u64 {
        ((occupation as u64) << 16) / tree_size(height) as u64
    }

    /// Target density for a subtree of the given height: linear between
    /// the leaf maximum and the root minimum.
    #[inline]
    fn target_density(&self, height: u32) -> u64 {
        let span = (self.max_density - self.min_density) as u64;
        self.max_density as u64 - ((span * (((height as u64) << 16) / self.height as u64)) >> 16)
    }

    /// Insert a key, rebalancing or growing as needed.
    ///
    /// ## Input
    /// - `key`: non-sentinel key; re-inserting a present key is absorbed
    ///
    /// ## Output
    /// - `Ok(())` once the key is placed and all densities hold
    ///
    /// ## Error Conditions
    /// - `KeyIsSentinel`: the reserved empty marker
    /// - `Frozen`: tree was pointerized
    /// - `AllocFailed` / `MappingTooLarge`: grow failed (file backing)
    pub fn insert(&mut self, key: K) -> DictResult<()> {
        if key.is_sentinel() {
            return Err(DictError::KeyIsSentinel);
        }
        if self.frozen {
            return Err(DictError::Frozen {
                operation: "insert".to_string(),
            });
        }

        loop {
            // Descend to the first empty or equal node, tracking physical
            // positions incrementally from the level table.
            let mut bfs = 1u64;
            let mut pos = [0usize; MAX_HEIGHT];
            let mut claimed = false;

            for depth in 0..self.height as usize {
                let li = &self.level_info[depth];
                pos[depth] = pos[li.subtree_depth as usize]
                    + (li.top_size + (bfs & li.top_size) * li.bottom_size) as usize;

                let node = self.elements.as_slice()[pos[depth]];
                if node.key.is_sentinel() || node.key == key {
                    let newly = node.key.is_sentinel();
                    self.elements.as_mut_slice()[pos[depth]].key = key;
                    if newly {
                        self.count += 1;
                    }
                    claimed = true;
                    break;
                }

                bfs = if key < node.key {
                    bfs_left(bfs)
                } else {
                    bfs_right(bfs)
                };
            }
            if claimed {
                return Ok(());
            }

            // No space on the path: rebalance the leaf's ancestry. A grow
            // restarts the search from the new root.
            if self.rebalance_insert(bfs_parent(bfs), key)? {
                continue;
            }
            self.count += 1;
            return Ok(());
        }
    }

    /// Find the nearest ancestor subtree below its target density, spill
    /// it in order (with `key` spliced in), and redistribute. Returns
    /// `Ok(true)` when the root was reached and the tree grew instead.
    fn rebalance_insert(&mut self, leaf: u64, key: K) -> DictResult<bool> {
        // Count the new element and the one in this leaf, plus the
        // sibling subtree and the (occupied) parent.
        let mut bfs = leaf;
        let mut height = 2u32;
        let mut occupation = 2 + self.occupation(bfs_peer(bfs)) + 1;
        let mut parent = bfs_parent(bfs);

        while Self::density(occupation, height) > self.target_density(height) {
            if height == self.height {
                self.grow()?;
                return Ok(true);
            }
            bfs = parent;
            occupation += self.occupation(bfs_peer(bfs)) + 1;
            parent = bfs_parent(bfs);
            height += 1;
        }
        if height == self.height {
            self.grow()?;
            return Ok(true);
        }
        debug_assert!(parent > 0);

        let spilled = self.serialize(parent, Some(key));
        assert!(
            spilled < tree_size(height),
            "rebalance window overflow: {} keys in a height-{} subtree",
            spilled,
            height
        );
        self.clear_subtree(parent);
        self.distribute(parent, 0, spilled);
        Ok(false)
    }

    /// In-order spill of the subtree at `root` into the scratch buffer,
    /// splicing `pending` into its sorted position. Returns the number of
    /// scratch entries written. The subtree itself is left untouched.
    fn serialize(&mut self, root: u64, pending: Option<K>) -> usize {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut pending = pending;
        let mut count = 0;

        let mut cur = self.bfs_first(root);
        while let Some(bfs) = cur {
            let key = self.node(bfs).key;
            if let Some(p) = pending {
                if p < key {
                    scratch[count] = Node::with_key(p);
                    count += 1;
                    pending = None;
                }
            }
            scratch[count] = Node::with_key(key);
            count += 1;
            cur = self.bfs_next(bfs, root);
        }
        if let Some(p) = pending {
            scratch[count] = Node::with_key(p);
            count += 1;
        }

        self.scratch = scratch;
        count
    }

    /// Empty every valid node under `root`.
    fn clear_subtree(&mut self, root: u64) {
        if !self.node_valid(root) {
            return;
        }
        self.clear_subtree(bfs_left(root));
        self.clear_subtree(bfs_right(root));
        self.node_mut(root).key = K::SENTINEL;
    }

    /// Write `count` scratch entries back under `root`: median at the
    /// subtree root, halves recursively below.
    fn distribute(&mut self, root: u64, ofs: usize, count: usize) {
        debug_assert!(root <= self.max_bfs());
        let item = count / 2;
        let left_ct = item;
        let right_ct = count - item - 1;

        let node = self.scratch[ofs + item];
        *self.node_mut(root) = node;

        if left_ct > 0 {
            self.distribute(bfs_left(root), ofs, left_ct);
        }
        if right_ct > 0 {
            self.distribute(bfs_right(root), ofs + item + 1, right_ct);
        }
    }

    /// Add one level: reallocate the region and move every node from the
    /// old layout to its position in the new one.
    fn grow(&mut self) -> DictResult<()> {
        let new_height = self.height + 1;
        assert!((new_height as usize) < MAX_HEIGHT);
        let new_nodes = 1usize << new_height;
        let new_table = level_table(new_height);
        let old_max = self.max_bfs();

        let old: Vec<Node<K>> = self.elements.as_slice().to_vec();
        self.elements.grow(new_nodes, Node::empty())?;
        for slot in self.elements.as_mut_slice() {
            *slot = Node::empty();
        }
        for bfs in 1..=old_max {
            let node = old[veb_position(&self.level_info, bfs) - 1];
            if !node.key.is_sentinel() {
                let slot = veb_position(&new_table, bfs) - 1;
                self.elements.as_mut_slice()[slot] = node;
            }
        }

        self.level_info = new_table;
        self.height = new_height;
        self.scratch = vec![Node::empty(); new_nodes];
        Ok(())
    }

    /// Search for a key; returns its physical slot when present.
    ///
    /// An empty node on the path means the key is absent (sentinels
    /// never order-compare). After `pointerize` the same walk chases the
    /// materialized positions instead; results are identical.
    pub fn search(&self, key: K) -> Option<usize> {
        if key.is_sentinel() {
            return None;
        }
        if self.frozen {
            return self.search_pointerized(key);
        }

        let mut bfs = 1u64;
        let mut pos = [0usize; MAX_HEIGHT];
        for depth in 0..self.height as usize {
            let li = &self.level_info[depth];
            pos[depth] = pos[li.subtree_depth as usize]
                + (li.top_size + (bfs & li.top_size) * li.bottom_size) as usize;

            let node = &self.elements.as_slice()[pos[depth]];
            if node.key.is_sentinel() {
                return None;
            }
            if node.key == key {
                return Some(pos[depth]);
            }
            bfs = if key < node.key {
                bfs_left(bfs)
            } else {
                bfs_right(bfs)
            };
        }
        None
    }

    fn search_pointerized(&self, key: K) -> Option<usize> {
        let elements = self.elements.as_slice();
        let mut slot = 0usize;
        loop {
            let node = &elements[slot];
            if node.key.is_sentinel() {
                return None;
            }
            if node.key == key {
                return Some(slot);
            }
            let child = if key < node.key { node.left } else { node.right };
            if child == 0 {
                return None;
            }
            slot = child as usize - 1;
        }
    }

    /// Whether the key is present.
    pub fn contains(&self, key: K) -> bool {
        self.search(key).is_some()
    }

    /// Freeze the tree: materialize child positions in every node and
    /// switch search to position chasing. Irreversible; all mutation is
    /// rejected afterwards. Idempotent.
    pub fn pointerize(&mut self) {
        if self.frozen {
            return;
        }
        let max = self.max_bfs();
        for bfs in 1..=max {
            let left = bfs_left(bfs);
            let right = bfs_right(bfs);
            let left_pos = if left <= max {
                self.slot_of(left) as u32 + 1
            } else {
                0
            };
            let right_pos = if right <= max {
                self.slot_of(right) as u32 + 1
            } else {
                0
            };
            let node = self.node_mut(bfs);
            node.left = left_pos;
            node.right = right_pos;
        }
        self.frozen = true;
    }

    /// In-order key iterator over the whole tree.
    pub fn iter_in_order(&self) -> InOrderKeys<'_, K> {
        InOrderKeys {
            tree: self,
            cur: self.bfs_first(1),
        }
    }

    //
    // Index-tree support (used by the dictionary facade)
    //

    /// Set an index leaf: segment minimum plus the link to the segment's
    /// first slot.
    pub(crate) fn set_leaf(&mut self, bfs: u64, key: K, segment_start: usize) {
        let node = self.node_mut(bfs);
        node.key = key;
        node.leaf = segment_start as u32 + 1;
    }

    pub(crate) fn key_at(&self, bfs: u64) -> K {
        self.node(bfs).key
    }

    /// Recompute an interior separator: the minimum key of the right
    /// subtree, i.e. the leftmost non-empty leaf under it (leaf keys are
    /// non-decreasing, so the first live one is the minimum). Sentinel
    /// when the whole right subtree is empty.
    pub(crate) fn recompute_separator(&mut self, bfs: u64) {
        let leaf_depth = self.height - 1;
        let depth = ilog2(bfs);
        debug_assert!(depth < leaf_depth);

        let shift = leaf_depth - depth - 1;
        let first = bfs_right(bfs) << shift;

        let mut key = K::SENTINEL;
        for leaf in first..first + (1u64 << shift) {
            let probe = self.node(leaf).key;
            if !probe.is_sentinel() {
                key = probe;
                break;
            }
        }
        self.node_mut(bfs).key = key;
    }

    /// Descend to the index leaf covering `key` and return the first
    /// slot of its segment.
    ///
    /// Separator semantics: a sentinel separator means the right subtree
    /// is empty (go left); keys equal to a separator live in the right
    /// subtree.
    pub(crate) fn find_segment(&self, key: K) -> usize {
        if self.frozen {
            return self.find_segment_pointerized(key);
        }

        let mut bfs = 1u64;
        let mut pos = [0usize; MAX_HEIGHT];
        for depth in 0..self.height as usize {
            let li = &self.level_info[depth];
            pos[depth] = pos[li.subtree_depth as usize]
                + (li.top_size + (bfs & li.top_size) * li.bottom_size) as usize;

            if depth as u32 == self.height - 1 {
                let node = &self.elements.as_slice()[pos[depth]];
                debug_assert!(node.leaf > 0, "unlinked index leaf at bfs {}", bfs);
                return node.leaf as usize - 1;
            }

            let node = &self.elements.as_slice()[pos[depth]];
            bfs = if node.key.is_sentinel() || key < node.key {
                bfs_left(bfs)
            } else {
                bfs_right(bfs)
            };
        }
        unreachable!("index descent must terminate at the leaf row");
    }

    fn find_segment_pointerized(&self, key: K) -> usize {
        let elements = self.elements.as_slice();
        let mut slot = 0usize;
        for _ in 0..self.height - 1 {
            let node = &elements[slot];
            let child = if node.key.is_sentinel() || key < node.key {
                node.left
            } else {
                node.right
            };
            debug_assert!(child > 0, "missing child in frozen index");
            slot = child as usize - 1;
        }
        let node = &elements[slot];
        debug_assert!(node.leaf > 0, "unlinked index leaf");
        node.leaf as usize - 1
    }
}

impl<K: DictKey> Drop for VebTree<K> {
    fn drop(&mut self) {
        // Best-effort sidecar rewrite and msync for file-backed trees.
        let _ = self.persist();
    }
}

/// In-order iterator over live keys.
pub struct InOrderKeys<'a, K: DictKey> {
    tree: &'a VebTree<K>,
    cur: Option<u64>,
}

impl<'a, K: DictKey> Iterator for InOrderKeys<'a, K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let bfs = self.cur?;
        let key = self.tree.node(bfs).key;
        self.cur = self.tree.bfs_next(bfs, 1);
        Some(key)
    }
}
