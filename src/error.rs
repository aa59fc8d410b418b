// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for dictionary operations.
//!
//! User-visible failures are construction-time and persistence-time only.
//! Structural invariants (sorted order, window densities, index separator
//! consistency, layout bijectivity) are enforced by assertions: a violation
//! is a defect, not a runtime error. Search never fails.

use std::fmt;

/// Standard Result type for all dictionary operations.
pub type DictResult<T> = Result<T, DictError>;

/// Error types for dictionary operations.
#[derive(Debug, Clone)]
pub enum DictError {
    /// Requested capacity was zero.
    InvalidCapacity { requested: usize },

    /// Caller tried to insert the reserved empty-marker key.
    KeyIsSentinel,

    /// Mutation attempted after `pointerize` froze the structure.
    Frozen { operation: String },

    /// Backing region or scratch allocation failed.
    AllocFailed { operation: String, reason: String },

    /// Requested region exceeds the fixed file-mapping limit.
    MappingTooLarge { requested: usize, limit: usize },

    /// Sidecar metadata file is unreadable or fails validation.
    SidecarCorrupted { path: String, reason: String },

    /// I/O error during file operations.
    IoError { operation: String, reason: String },
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictError::InvalidCapacity { requested } => {
                write!(f, "Invalid capacity: {} (must be positive)", requested)
            }
            DictError::KeyIsSentinel => {
                write!(f, "Key is the reserved empty-marker sentinel")
            }
            DictError::Frozen { operation } => {
                write!(f, "Operation '{}' rejected: structure is frozen (pointerized)", operation)
            }
            DictError::AllocFailed { operation, reason } => {
                write!(f, "Allocation failed during '{}': {}", operation, reason)
            }
            DictError::MappingTooLarge { requested, limit } => {
                write!(
                    f,
                    "Region of {} bytes exceeds the {} byte mapping limit",
                    requested, limit
                )
            }
            DictError::SidecarCorrupted { path, reason } => {
                write!(f, "Sidecar '{}' corrupted: {}", path, reason)
            }
            DictError::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for DictError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_contains_context() {
        let err = DictError::InvalidCapacity { requested: 0 };
        assert!(err.to_string().contains('0'));

        let err = DictError::Frozen {
            operation: "insert".to_string(),
        };
        assert!(err.to_string().contains("insert"));

        let err = DictError::SidecarCorrupted {
            path: "tree.meta".to_string(),
            reason: "checksum mismatch".to_string(),
        };
        assert!(err.to_string().contains("tree.meta"));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_error_is_std_error() {
        fn assert_error<E: std::error::Error>(_: &E) {}
        assert_error(&DictError::KeyIsSentinel);
    }
}
