// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Packed memory array engine.
//!
//! A gapped sorted array divided into `nsegs` power-of-two segments of
//! `segsize` slots, carrying an implicit segment tree whose per-level
//! density thresholds drive rebalancing. Insertions redistribute the
//! smallest window that can absorb the new item; a root violation
//! doubles the region. The dictionary facade in [`crate::dict`] couples
//! this engine with the vEB index.

mod engine;
mod types;


pub(crate) use engine::{rebalance_insert, scan_minimum, soft_bin_search, window_occupancy};
pub use engine::Probe;
pub use types::{DensityBounds, Geometry, Slot};
