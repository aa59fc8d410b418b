// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! vebdict - cache-oblivious dynamic dictionary.
//!
//! A sorted key set stored in a Packed Memory Array (PMA) overlaid with
//! a binary search tree laid out in van Emde Boas order. Point search,
//! predecessor and insertion run in Θ(log_B N) block transfers without
//! knowing the block size B.
//!
//! ## Features
//!
//! - **Cache-oblivious index**: BFS→vEB address arithmetic with a
//!   precomputed level table, O(depth) per descent
//! - **Gapped sorted storage**: density-driven window rebalancing over
//!   an implicit segment tree, growth by doubling
//! - **Two dictionary forms**: the PMA facade ([`Dictionary`]) and the
//!   standalone tree-form ([`VebTree`])
//! - **Freeze for reads**: [`Dictionary::pointerize`] materializes child
//!   positions for pointer-chasing search over the same layout
//! - **Best-effort persistence**: optional mmap-backed element region
//!   with a validated text sidecar
//!
//! ## Quick Start
//!
//! ```rust
//! use vebdict::Dictionary;
//!
//! let mut dict = Dictionary::<u32, u64>::new(1024)?;
//! dict.insert(42, 4200)?;
//! dict.insert(7, 700)?;
//!
//! assert_eq!(dict.get(42), Some(&4200));
//! assert_eq!(dict.predecessor(10).map(|(k, _)| k), Some(7));
//!
//! let keys: Vec<u32> = dict.iter().map(|(k, _)| k).collect();
//! assert_eq!(keys, vec![7, 42]);
//! # Ok::<(), vebdict::DictError>(())
//! ```
//!
//! ## Architecture
//!
//! - **layout**: BFS→vEB address arithmetic (level-table form)
//! - **veb**: the vEB-order tree (primitives, rebalance, pointerize)
//! - **pma**: the packed memory array engine (density, redistribution,
//!   soft binary search)
//! - **dict**: the facade coupling the engine with the index
//! - **storage**: heap/file backing regions and the sidecar
//!
//! Deletion and range scans are out of scope; density thresholds for the
//! symmetric shrink path are reserved in the descriptors.

pub mod dict;
pub mod error;
pub mod key;
pub mod layout;
pub mod pma;
pub mod storage;
pub mod veb;

// Re-export commonly used types
pub use dict::{DictStats, Dictionary};
pub use error::{DictError, DictResult};
pub use key::{DictKey, ObjectKey};
pub use pma::{DensityBounds, Geometry, Probe, Slot};
pub use storage::Backing;
pub use veb::VebTree;
