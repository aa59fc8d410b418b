// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Behaviour tests for the vEB-layout tree.
//!
//! Covers the tree-form dictionary operations (insert, search, grow,
//! in-order iteration), the pointerize mode transition, and the
//! file-backed persistence round trip. Index-tree behaviour is covered
//! by the dictionary facade tests.

use crate::error::DictError;
use crate::key::DictKey;
use crate::storage::Backing;
use crate::veb::VebTree;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn collect<K: DictKey>(tree: &VebTree<K>) -> Vec<K> {
    tree.iter_in_order().collect()
}

// ============================================================================
// Tree-form insert and search
// ============================================================================

#[test]
fn test_insert_yields_sorted_traversal() {
    let mut tree = VebTree::new(16).unwrap();
    for key in [50u32, 20, 80, 10, 30, 70, 90] {
        tree.insert(key).unwrap();
    }
    assert_eq!(collect(&tree), vec![10, 20, 30, 50, 70, 80, 90]);
    assert_eq!(tree.len(), 7);
}

#[test]
fn test_search_hit_and_miss() {
    let mut tree = VebTree::new(8).unwrap();
    for key in [5u32, 9, 14] {
        tree.insert(key).unwrap();
    }
    assert!(tree.contains(9));
    assert!(tree.contains(5));
    assert!(tree.contains(14));
    assert!(!tree.contains(12));
    assert!(!tree.contains(0));
}

#[test]
fn test_empty_tree_search() {
    let tree = VebTree::<u32>::new(4).unwrap();
    assert!(!tree.contains(1));
    assert!(tree.is_empty());
    assert_eq!(collect(&tree), Vec::<u32>::new());
}

#[test]
fn test_duplicate_insert_is_absorbed() {
    let mut tree = VebTree::new(8).unwrap();
    for key in [3u32, 1, 2] {
        tree.insert(key).unwrap();
    }
    let before = collect(&tree);

    tree.insert(2).unwrap();
    tree.insert(1).unwrap();

    assert_eq!(tree.len(), 3);
    assert_eq!(collect(&tree), before);
}

#[test]
fn test_sentinel_key_rejected() {
    let mut tree = VebTree::<u32>::new(4).unwrap();
    assert!(matches!(
        tree.insert(u32::SENTINEL),
        Err(DictError::KeyIsSentinel)
    ));
    assert!(tree.is_empty());
}

#[test]
fn test_zero_capacity_rejected() {
    assert!(matches!(
        VebTree::<u32>::new(0),
        Err(DictError::InvalidCapacity { requested: 0 })
    ));
}

// ============================================================================
// Rebalance and grow
// ============================================================================

#[test]
fn test_grow_keeps_all_keys() {
    let mut tree = VebTree::new(2).unwrap();
    let initial_height = tree.height();

    // Ascending inserts overload the rightmost path quickly.
    for key in 0..64u32 {
        tree.insert(key).unwrap();
    }

    assert!(tree.height() > initial_height);
    assert_eq!(tree.len(), 64);
    assert_eq!(collect(&tree), (0..64).collect::<Vec<_>>());
    for key in 0..64 {
        assert!(tree.contains(key), "lost {} across grows", key);
    }
}

#[test]
fn test_random_workload_round_trip() {
    let mut rng = StdRng::seed_from_u64(100);
    let mut keys: Vec<u32> = (0..500).map(|_| rng.gen_range(0..1_000_000)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.shuffle(&mut rng);

    let mut tree = VebTree::new(64).unwrap();
    for &key in &keys {
        tree.insert(key).unwrap();
    }

    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(collect(&tree), sorted);

    keys.shuffle(&mut rng);
    for &key in &keys {
        assert!(tree.contains(key));
    }
}

// ============================================================================
// Pointerize
// ============================================================================

#[test]
fn test_pointerize_preserves_search_results() {
    let mut rng = StdRng::seed_from_u64(7);
    let keys: Vec<u32> = (0..300).map(|_| rng.gen_range(0..100_000)).collect();

    let mut tree = VebTree::new(32).unwrap();
    for &key in &keys {
        tree.insert(key).unwrap();
    }

    let probes: Vec<u32> = keys
        .iter()
        .copied()
        .chain((0..200).map(|_| rng.gen_range(0..100_000)))
        .collect();
    let before: Vec<Option<usize>> = probes.iter().map(|&k| tree.search(k)).collect();

    tree.pointerize();
    assert!(tree.is_frozen());

    let after: Vec<Option<usize>> = probes.iter().map(|&k| tree.search(k)).collect();
    assert_eq!(before, after);
}

#[test]
fn test_pointerize_rejects_mutation() {
    let mut tree = VebTree::new(4).unwrap();
    tree.insert(1u32).unwrap();
    tree.pointerize();

    assert!(matches!(tree.insert(2), Err(DictError::Frozen { .. })));
    assert!(tree.contains(1));
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_pointerize_is_idempotent() {
    let mut tree = VebTree::new(4).unwrap();
    tree.insert(9u32).unwrap();
    tree.pointerize();
    tree.pointerize();
    assert!(tree.contains(9));
}

// ============================================================================
// In-order iterators
// ============================================================================

#[test]
fn test_bfs_iterators_walk_in_order() {
    let mut tree = VebTree::new(16).unwrap();
    for key in [40u32, 10, 60, 5, 20, 50, 70] {
        tree.insert(key).unwrap();
    }

    let mut walked = Vec::new();
    let mut cur = tree.bfs_first(1);
    while let Some(bfs) = cur {
        assert!(tree.node_valid(bfs));
        walked.push(tree.node_at(bfs).key());
        cur = tree.bfs_next(bfs, 1);
    }

    assert_eq!(walked, vec![5, 10, 20, 40, 50, 60, 70]);
    assert_eq!(collect(&tree), walked);
}

#[test]
fn test_occupation_counts_subtrees() {
    let mut tree = VebTree::new(8).unwrap();
    assert_eq!(tree.occupation(1), 0);
    for key in [4u32, 2, 6, 1, 3] {
        tree.insert(key).unwrap();
    }
    assert_eq!(tree.occupation(1), 5);
}

// ============================================================================
// File-backed persistence
// ============================================================================

#[test]
fn test_file_backed_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.mmap");

    let keys = [17u32, 3, 99, 41, 8];
    {
        let mut tree = VebTree::with_backing(8, Backing::File(path.clone())).unwrap();
        for &key in &keys {
            tree.insert(key).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = VebTree::<u32>::open(&path).unwrap();
    assert_eq!(tree.len(), keys.len());
    assert!(!tree.is_frozen());
    for &key in &keys {
        assert!(tree.contains(key), "lost {} across reopen", key);
    }
    assert_eq!(collect(&tree), vec![3, 8, 17, 41, 99]);
}

#[test]
fn test_file_backed_survives_grow() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.mmap");

    {
        let mut tree = VebTree::with_backing(2, Backing::File(path.clone())).unwrap();
        for key in 0..48u32 {
            tree.insert(key).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = VebTree::<u32>::open(&path).unwrap();
    assert_eq!(tree.len(), 48);
    assert_eq!(collect(&tree), (0..48).collect::<Vec<_>>());
}

#[test]
fn test_open_without_sidecar_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("never-created.mmap");
    assert!(matches!(
        VebTree::<u32>::open(&path),
        Err(DictError::SidecarCorrupted { .. })
    ));
}

// ============================================================================
// Composite key profile
// ============================================================================

#[test]
fn test_object_key_profile() {
    use crate::key::ObjectKey;

    let mut tree = VebTree::new(8).unwrap();
    let keys = [
        ObjectKey::new(2, 0, 0),
        ObjectKey::new(1, 1, 5),
        ObjectKey::new(1, 0, 9),
        ObjectKey::new(1, 1, 2),
    ];
    for &key in &keys {
        tree.insert(key).unwrap();
    }

    let in_order = collect(&tree);
    assert_eq!(
        in_order,
        vec![
            ObjectKey::new(1, 0, 9),
            ObjectKey::new(1, 1, 2),
            ObjectKey::new(1, 1, 5),
            ObjectKey::new(2, 0, 0),
        ]
    );
    assert!(tree.contains(ObjectKey::new(1, 1, 2)));
    assert!(!tree.contains(ObjectKey::new(1, 1, 3)));
}
