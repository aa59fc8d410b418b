// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Dictionary facade: packed memory array + vEB index.
//!
//! Couples the [`crate::pma`] engine with a [`crate::veb`] index tree and
//! keeps the two synchronized under insertion, rebalancing and growth.

mod dictionary;


pub use dictionary::{DictStats, Dictionary, Iter};
