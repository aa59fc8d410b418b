// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Binary search tree in van Emde Boas layout.
//!
//! The tree lives in a flat element region addressed through the
//! BFS→vEB arithmetic of [`crate::layout`]; child pointers are implicit
//! until [`VebTree::pointerize`] freezes the structure. Used standalone
//! as the tree-form dictionary and as the navigational index over the
//! packed memory array.

mod tree;

#[cfg(test)]
mod tree_test;

pub use tree::{InOrderKeys, Node, VebTree};
