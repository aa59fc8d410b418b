// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Backing storage for the vEB element region.
//!
//! The element array lives either on the heap or in a memory-mapped file
//! chosen at construction time ([`Backing`]). The file form maps a fixed
//! 2 GiB window over a sparse file so that growth never remaps (and never
//! invalidates positions materialized by pointerize); the logical element
//! count grows in place inside the mapping. A small sidecar file stores
//! the tree height and live count as decimal text with a CRC32 line and
//! is rewritten on clean shutdown; reopening without truncation uses it
//! to reconstruct the descriptor.
//!
//! Persistence is best-effort: a single msync on close, no journaling, no
//! crash recovery. The backing file is held under an advisory exclusive
//! lock; two processes mapping the same file is undefined behaviour, so a
//! second opener fails fast instead.

use crate::error::{DictError, DictResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::slice;

use memmap2::MmapMut;

/// Fixed maximum size of a file mapping (2 GiB).
pub const MAX_MAPPING_BYTES: usize = 2 << 30;

/// Where an element region lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// Plain heap allocation.
    Heap,
    /// File mapping at the given path (create-or-truncate).
    File(PathBuf),
}

/// A growable region of plain-data elements, heap- or file-backed.
///
/// `T` must be `Copy` with no interior pointers: the file form stores the
/// raw element bytes and reinterprets them on reopen (same build only; no
/// portability guarantees, per the best-effort persistence contract).
pub(crate) struct Region<T: Copy> {
    inner: Inner<T>,
    len: usize,
}

enum Inner<T> {
    Heap(Vec<T>),
    File(FileMap<T>),
}

struct FileMap<T> {
    file: File,
    mmap: MmapMut,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T> Drop for FileMap<T> {
    fn drop(&mut self) {
        let _ = self.mmap.flush();
        let _ = self.file.unlock();
    }
}

impl<T: Copy> Region<T> {
    /// Allocate a heap region of `len` elements, all set to `fill`.
    pub fn heap(len: usize, fill: T) -> Self {
        Region {
            inner: Inner::Heap(vec![fill; len]),
            len,
        }
    }

    /// Create a file-backed region with create-or-truncate semantics.
    ///
    /// ## Input
    /// - `path`: backing file path (truncated if it exists)
    /// - `len`: initial element count, all set to `fill`
    ///
    /// ## Error Conditions
    /// - `IoError`: open, lock or size failure (including a second
    ///   process already holding the mapping)
    /// - `MappingTooLarge`: `len` elements exceed the 2 GiB window
    pub fn create(path: &Path, len: usize, fill: T) -> DictResult<Self> {
        let mut region = Self::map_file(path, true)?;
        region.grow(len, fill)?;
        Ok(region)
    }

    /// Map an existing backing file without truncating it.
    ///
    /// The previous element bytes are preserved; `len` normally comes
    /// from the sidecar.
    pub fn open(path: &Path, len: usize) -> DictResult<Self> {
        let mut region = Self::map_file(path, false)?;
        if len > region.capacity() {
            return Err(DictError::MappingTooLarge {
                requested: len * std::mem::size_of::<T>(),
                limit: MAX_MAPPING_BYTES,
            });
        }
        region.len = len;
        Ok(region)
    }

    fn map_file(path: &Path, truncate: bool) -> DictResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(truncate)
            .truncate(truncate)
            .open(path)
            .map_err(|e| DictError::IoError {
                operation: "open_region".to_string(),
                reason: e.to_string(),
            })?;

        file.try_lock_exclusive().map_err(|e| DictError::IoError {
            operation: "lock_region".to_string(),
            reason: e.to_string(),
        })?;

        // Sparse file: the full window costs nothing until pages are
        // touched, and growth never needs a remap.
        file.set_len(MAX_MAPPING_BYTES as u64)
            .map_err(|e| DictError::AllocFailed {
                operation: "size_region".to_string(),
                reason: e.to_string(),
            })?;

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| DictError::AllocFailed {
                operation: "map_region".to_string(),
                reason: e.to_string(),
            })?
        };

        let capacity = MAX_MAPPING_BYTES / std::mem::size_of::<T>();
        Ok(Region {
            inner: Inner::File(FileMap {
                file,
                mmap,
                capacity,
                _marker: PhantomData,
            }),
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        match &self.inner {
            Inner::Heap(_) => usize::MAX / std::mem::size_of::<T>().max(1),
            Inner::File(m) => m.capacity,
        }
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.inner, Inner::File(_))
    }

    /// Grow to `new_len` elements, filling the new tail with `fill`.
    ///
    /// Heap regions reallocate (invalidating outstanding positions only
    /// in the sense that the tree changes shape); file regions grow in
    /// place inside the fixed mapping.
    pub fn grow(&mut self, new_len: usize, fill: T) -> DictResult<()> {
        if new_len > self.capacity() {
            return Err(DictError::MappingTooLarge {
                requested: new_len * std::mem::size_of::<T>(),
                limit: MAX_MAPPING_BYTES,
            });
        }
        match &mut self.inner {
            Inner::Heap(v) => v.resize(new_len, fill),
            Inner::File(m) => {
                let old_len = self.len;
                // SAFETY: the mapping spans `capacity` elements and
                // `new_len <= capacity`; T is Copy plain data.
                let slots = unsafe {
                    slice::from_raw_parts_mut(m.mmap.as_mut_ptr() as *mut T, new_len)
                };
                for slot in &mut slots[old_len..] {
                    *slot = fill;
                }
            }
        }
        self.len = new_len;
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.inner {
            Inner::Heap(v) => &v[..self.len],
            // SAFETY: mapping is live for self, spans at least `len`
            // elements, and is page-aligned (stricter than T's alignment).
            Inner::File(m) => unsafe {
                slice::from_raw_parts(m.mmap.as_ptr() as *const T, self.len)
            },
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len;
        match &mut self.inner {
            Inner::Heap(v) => &mut v[..len],
            // SAFETY: as above, and we hold &mut self.
            Inner::File(m) => unsafe {
                slice::from_raw_parts_mut(m.mmap.as_mut_ptr() as *mut T, len)
            },
        }
    }

    /// Flush file-backed contents (single msync; no-op for heap regions).
    pub fn flush(&self) -> DictResult<()> {
        if let Inner::File(m) = &self.inner {
            m.mmap.flush().map_err(|e| DictError::IoError {
                operation: "flush_region".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Descriptor metadata persisted next to a file-backed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sidecar {
    pub height: u32,
    pub count: usize,
}

pub(crate) fn sidecar_path(region_path: &Path) -> PathBuf {
    region_path.with_extension("meta")
}

/// Write the sidecar: height and count as decimal text, one per line,
/// followed by a CRC32 line over the two payload lines.
pub(crate) fn write_sidecar(region_path: &Path, sidecar: &Sidecar) -> DictResult<()> {
    let payload = format!("{}\n{}\n", sidecar.height, sidecar.count);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload.as_bytes());
    let contents = format!("{}{:08X}\n", payload, hasher.finalize());

    std::fs::write(sidecar_path(region_path), contents).map_err(|e| DictError::IoError {
        operation: "write_sidecar".to_string(),
        reason: e.to_string(),
    })
}

/// Read and validate the sidecar written by [`write_sidecar`].
pub(crate) fn read_sidecar(region_path: &Path) -> DictResult<Sidecar> {
    let path = sidecar_path(region_path);
    let corrupt = |reason: &str| DictError::SidecarCorrupted {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| DictError::SidecarCorrupted {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut lines = contents.lines();
    let height_line = lines.next().ok_or_else(|| corrupt("missing height line"))?;
    let count_line = lines.next().ok_or_else(|| corrupt("missing count line"))?;
    let crc_line = lines.next().ok_or_else(|| corrupt("missing checksum line"))?;

    let payload = format!("{}\n{}\n", height_line, count_line);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload.as_bytes());
    let expected = format!("{:08X}", hasher.finalize());
    if crc_line != expected {
        return Err(corrupt("checksum mismatch"));
    }

    let height: u32 = height_line
        .parse()
        .map_err(|_| corrupt("height is not a number"))?;
    let count: usize = count_line
        .parse()
        .map_err(|_| corrupt("count is not a number"))?;

    Ok(Sidecar { height, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_heap_region_grow_and_fill() {
        let mut region: Region<u64> = Region::heap(4, 7);
        assert_eq!(region.len(), 4);
        assert_eq!(region.as_slice(), &[7, 7, 7, 7]);

        region.as_mut_slice()[2] = 99;
        region.grow(6, 1).unwrap();
        assert_eq!(region.as_slice(), &[7, 7, 99, 7, 1, 1]);
        assert!(!region.is_file_backed());
    }

    #[test]
    fn test_file_region_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.mmap");

        {
            let mut region: Region<u64> = Region::create(&path, 8, u64::MAX).unwrap();
            assert!(region.is_file_backed());
            region.as_mut_slice()[0] = 42;
            region.as_mut_slice()[7] = 43;
            region.flush().unwrap();
        }

        let region: Region<u64> = Region::open(&path, 8).unwrap();
        assert_eq!(region.as_slice()[0], 42);
        assert_eq!(region.as_slice()[7], 43);
        assert_eq!(region.as_slice()[3], u64::MAX);
    }

    #[test]
    fn test_file_region_grow_preserves_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.mmap");

        let mut region: Region<u32> = Region::create(&path, 4, 0xFFFF_FFFF).unwrap();
        region.as_mut_slice()[1] = 5;
        region.grow(8, 0xFFFF_FFFF).unwrap();
        assert_eq!(region.len(), 8);
        assert_eq!(region.as_slice()[1], 5);
        assert_eq!(region.as_slice()[6], 0xFFFF_FFFF);
    }

    #[test]
    fn test_second_opener_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.mmap");

        let _held: Region<u64> = Region::create(&path, 4, 0).unwrap();
        let res: DictResult<Region<u64>> = Region::open(&path, 4);
        assert!(matches!(res, Err(DictError::IoError { .. })));
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.mmap");

        let sidecar = Sidecar {
            height: 12,
            count: 3071,
        };
        write_sidecar(&path, &sidecar).unwrap();
        assert_eq!(read_sidecar(&path).unwrap(), sidecar);
    }

    #[test]
    fn test_sidecar_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.mmap");

        write_sidecar(&path, &Sidecar { height: 5, count: 9 }).unwrap();
        let meta = sidecar_path(&path);
        let mut text = std::fs::read_to_string(&meta).unwrap();
        text.replace_range(0..1, "9");
        std::fs::write(&meta, text).unwrap();

        assert!(matches!(
            read_sidecar(&path),
            Err(DictError::SidecarCorrupted { .. })
        ));
    }

    #[test]
    fn test_sidecar_missing_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.mmap");
        assert!(matches!(
            read_sidecar(&path),
            Err(DictError::SidecarCorrupted { .. })
        ));
    }
}
