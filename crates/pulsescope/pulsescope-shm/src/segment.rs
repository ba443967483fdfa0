//! Lifecycle of the mapped vision debug segment.
//!
//! A [`Segment`] is attached once at startup and shared by every session for
//! the life of the process. `attach` is a single attempt; retry policy belongs
//! to the caller.

use crate::error::ShmError;
use crate::header::HeaderView;
use crate::layout::{HEADER_SIZE, SHM_TOTAL_SIZE};
use pulsescope_mmap::MmapFileMut;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

struct Mapping {
    /// Owns the mmap lifetime; `base` points into it.
    _mm: MmapFileMut,
    base: NonNull<u8>,
    len: usize,
}

pub struct Segment {
    path: PathBuf,
    mapping: Option<Mapping>,
}

// SAFETY: the mapping is never remapped while shared (`detach` takes `&mut self`),
// all reads go through the seqlock or volatile loads, and in-process writes to the
// consumer-writable fields are serialized by `ControlWriter`.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Open the existing object at `path` read-write and map it.
    ///
    /// Fails if the object is missing, cannot be mapped, or is too small to
    /// hold a header.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let mm = MmapFileMut::open_rw(path, SHM_TOTAL_SIZE as u64).map_err(|source| {
            ShmError::Attach {
                path: path.display().to_string(),
                source,
            }
        })?;
        Self::from_mapping(path, mm)
    }

    /// Create the object if needed, size it to the full segment and map it.
    ///
    /// Producer-side only; the bridge always uses [`Segment::attach`].
    pub(crate) fn create<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref();
        let mm = MmapFileMut::create_rw(path, SHM_TOTAL_SIZE as u64).map_err(|source| {
            ShmError::Attach {
                path: path.display().to_string(),
                source,
            }
        })?;
        Self::from_mapping(path, mm)
    }

    fn from_mapping(path: &Path, mut mm: MmapFileMut) -> Result<Self, ShmError> {
        let len = mm.len();
        if len < HEADER_SIZE {
            return Err(ShmError::TooSmall {
                len,
                required: HEADER_SIZE,
            });
        }
        let base = NonNull::new(mm.as_mut_ptr()).ok_or(ShmError::Detached)?;

        Ok(Self {
            path: path.to_path_buf(),
            mapping: Some(Mapping { _mm: mm, base, len }),
        })
    }

    /// Unmap and close. Safe to call any number of times.
    pub fn detach(&mut self) {
        if self.mapping.take().is_some() {
            tracing::debug!(path = %self.path.display(), "segment detached");
        }
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.mapping.is_some()
    }

    /// Mapped length in bytes, 0 once detached.
    #[inline]
    pub fn len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |m| m.len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed view of the header, or `None` once detached.
    #[inline]
    pub fn header(&self) -> Option<HeaderView<'_>> {
        HeaderView::new(self).ok()
    }

    /// Base pointer and length of the live mapping.
    #[inline]
    pub(crate) fn raw_parts(&self) -> Option<(NonNull<u8>, usize)> {
        self.mapping.as_ref().map(|m| (m.base, m.len))
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_path;

    #[test]
    fn attach_missing_object_fails() {
        let path = scratch_path("segment_missing");
        let _ = std::fs::remove_file(&path);
        let err = Segment::attach(&path).err().expect("attach should fail");
        assert!(matches!(err, ShmError::Attach { .. }));
    }

    #[test]
    fn attach_undersized_object_fails() {
        let path = scratch_path("segment_small");
        std::fs::write(&path, vec![0u8; HEADER_SIZE - 1]).expect("write");
        let err = Segment::attach(&path).err().expect("attach should fail");
        assert!(matches!(err, ShmError::TooSmall { len, .. } if len == HEADER_SIZE - 1));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn detach_is_idempotent() {
        let path = scratch_path("segment_detach");
        drop(Segment::create(&path).expect("create"));

        let mut segment = Segment::attach(&path).expect("attach");
        assert!(segment.is_attached());
        assert_eq!(segment.len(), SHM_TOTAL_SIZE);

        segment.detach();
        segment.detach();
        assert!(!segment.is_attached());
        assert_eq!(segment.len(), 0);
        assert!(segment.header().is_none());
        let _ = std::fs::remove_file(&path);
    }
}
