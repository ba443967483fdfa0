//! Bounds-checked, field-level view over the segment header.
//!
//! The view is the only way into the mapped bytes. It is built after the
//! mapping length has been checked against [`HEADER_SIZE`], exposes fields one
//! at a time, and never hands out a pointer or reference into the region.
//! Variable regions are only ever copied out through [`HeaderView::copy_bytes`],
//! which checks the requested range against the mapped length first.

use crate::control::ControlFields;
use crate::error::ShmError;
use crate::layout::{ESDF_CELLS, HEADER_SIZE, SHM_MAGIC, SHM_VERSION, ShmHeader};
use crate::segment::Segment;
use std::marker::PhantomData;
use std::mem::align_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

/// Volatile load of a plain header field.
///
/// The producer writes these without any synchronization the compiler can see,
/// so every access must be an actual load from the mapping.
macro_rules! load {
    ($view:expr, $field:ident) => {
        // SAFETY: the header pointer is valid for `HEADER_SIZE` bytes for `'a`
        // (checked in `HeaderView::new`) and the field is plain old data.
        unsafe { (&raw const (*$view.header_ptr()).$field).read_volatile() }
    };
}

macro_rules! store {
    ($view:expr, $field:ident, $value:expr) => {
        // SAFETY: as for `load!`; the mapping is read-write.
        unsafe { (&raw mut (*$view.header_ptr()).$field).write_volatile($value) }
    };
}

fn check_alignment(base: NonNull<u8>) -> Result<(), ShmError> {
    let align = align_of::<ShmHeader>();
    if base.as_ptr().align_offset(align) != 0 {
        return Err(ShmError::Misaligned {
            addr: base.as_ptr() as usize,
            align,
        });
    }
    Ok(())
}

#[derive(Clone, Copy)]
pub struct HeaderView<'a> {
    base: NonNull<u8>,
    len: usize,
    _segment: PhantomData<&'a Segment>,
}

impl<'a> HeaderView<'a> {
    /// Build a view over an attached segment whose mapping holds a full header.
    pub fn new(segment: &'a Segment) -> Result<Self, ShmError> {
        let (base, len) = segment.raw_parts().ok_or(ShmError::Detached)?;
        if len < HEADER_SIZE {
            return Err(ShmError::TooSmall {
                len,
                required: HEADER_SIZE,
            });
        }
        check_alignment(base)?;
        Ok(Self {
            base,
            len,
            _segment: PhantomData,
        })
    }

    #[inline(always)]
    fn header_ptr(&self) -> *mut ShmHeader {
        self.base.as_ptr().cast::<ShmHeader>()
    }

    #[inline(always)]
    fn sequence_cell(&self) -> &AtomicU64 {
        // SAFETY: `sequence` is an `AtomicU64` inside a live, aligned header;
        // atomics are sound to share across threads and processes.
        unsafe { &(*self.header_ptr()).sequence }
    }

    /// Mapped length of the whole segment.
    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.len
    }

    /// Magic and version both match what this bridge understands.
    ///
    /// Used for health reporting only; reads and writes are not gated on it.
    pub fn header_valid(&self) -> bool {
        self.magic() == SHM_MAGIC && self.version() == SHM_VERSION
    }

    #[inline]
    pub fn magic(&self) -> u64 {
        load!(self, magic)
    }

    #[inline]
    pub fn version(&self) -> u64 {
        load!(self, version)
    }

    /// Seqlock counter with Acquire ordering.
    #[inline(always)]
    pub fn sequence(&self) -> u64 {
        self.sequence_cell().load(Ordering::Acquire)
    }

    /// Seqlock counter with Relaxed ordering, for use after an Acquire fence.
    #[inline(always)]
    pub(crate) fn sequence_relaxed(&self) -> u64 {
        self.sequence_cell().load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn timestamp_ms(&self) -> u64 {
        load!(self, timestamp_ms)
    }

    /// `(offset, size)` of the telemetry JSON region as last published.
    #[inline]
    pub(crate) fn json_region(&self) -> (u64, u64) {
        (load!(self, json_offset), load!(self, json_size))
    }

    /// `(offset, size, width, height)` of the latest frame as last published.
    #[inline]
    pub(crate) fn image_region(&self) -> (u64, u64, u32, u32) {
        (
            load!(self, image_offset),
            load!(self, image_size),
            load!(self, width),
            load!(self, height),
        )
    }

    /// Plain (unsequenced) read of the consumer-writable parameters.
    pub fn control_fields(&self) -> ControlFields {
        ControlFields {
            pid_p: load!(self, pid_p),
            pid_i: load!(self, pid_i),
            pid_d: load!(self, pid_d),
            exposure_time: load!(self, exposure_time),
            fire_enable: load!(self, fire_enable),
        }
    }

    /// Copy the distance field into `out`.
    pub(crate) fn copy_esdf(&self, out: &mut [f32; ESDF_CELLS]) {
        // SAFETY: source lies inside the checked header; destination is a
        // distinct local buffer of the same length.
        unsafe {
            let src = (&raw const (*self.header_ptr()).esdf_map).cast::<f32>();
            ptr::copy_nonoverlapping(src, out.as_mut_ptr(), ESDF_CELLS);
        }
    }

    /// Copy `len` bytes starting at `offset`, or `None` if the range leaves the mapping.
    pub(crate) fn copy_bytes(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.len as u64 {
            return None;
        }
        let (offset, len) = (offset as usize, len as usize);
        let mut out = vec![0u8; len];
        // SAFETY: `offset + len <= self.len`, so the source range is inside the mapping.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Some(out)
    }

    // ─── consumer-writable fields ───────────────────────────────────────────

    #[inline]
    pub(crate) fn store_pid_p(&self, v: f32) {
        store!(self, pid_p, v)
    }

    #[inline]
    pub(crate) fn store_pid_i(&self, v: f32) {
        store!(self, pid_i, v)
    }

    #[inline]
    pub(crate) fn store_pid_d(&self, v: f32) {
        store!(self, pid_d, v)
    }

    #[inline]
    pub(crate) fn store_exposure_time(&self, v: u32) {
        store!(self, exposure_time, v)
    }

    #[inline]
    pub(crate) fn store_fire_enable(&self, v: u8) {
        store!(self, fire_enable, v)
    }

    // ─── producer-side writes ───────────────────────────────────────────────

    pub(crate) fn store_identity(&self, magic: u64, version: u64) {
        store!(self, magic, magic);
        store!(self, version, version);
    }

    pub(crate) fn store_sequence(&self, seq: u64, order: Ordering) {
        self.sequence_cell().store(seq, order);
    }

    pub(crate) fn store_timestamp_ms(&self, ts: u64) {
        store!(self, timestamp_ms, ts)
    }

    pub(crate) fn store_json_region(&self, offset: u64, size: u64) {
        store!(self, json_offset, offset);
        store!(self, json_size, size);
    }

    pub(crate) fn store_image_region(&self, offset: u64, size: u64, width: u32, height: u32) {
        store!(self, image_offset, offset);
        store!(self, image_size, size);
        store!(self, width, width);
        store!(self, height, height);
    }

    pub(crate) fn store_esdf(&self, cells: &[f32; ESDF_CELLS]) {
        // SAFETY: destination lies inside the checked header.
        unsafe {
            let dst = (&raw mut (*self.header_ptr()).esdf_map).cast::<f32>();
            ptr::copy_nonoverlapping(cells.as_ptr(), dst, ESDF_CELLS);
        }
    }

    /// Copy `bytes` into the segment at `offset`; `false` if it would not fit.
    pub(crate) fn write_bytes(&self, offset: usize, bytes: &[u8]) -> bool {
        match offset.checked_add(bytes.len()) {
            Some(end) if offset >= HEADER_SIZE && end <= self.len => {
                // SAFETY: the range is inside the mapping and past the header.
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        self.base.as_ptr().add(offset),
                        bytes.len(),
                    );
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::check_alignment;
    use crate::SegmentProducer;
    use crate::error::ShmError;
    use crate::layout::{SHM_MAGIC, SHM_VERSION};
    use crate::test_support::scratch_path;

    #[test]
    fn fresh_segment_reports_valid_header() {
        let path = scratch_path("header_valid");
        let producer = SegmentProducer::create(&path).expect("create");
        let view = producer.segment().header().expect("view");
        assert!(view.header_valid());
        assert_eq!(view.version(), SHM_VERSION);
        assert_eq!(view.magic(), SHM_MAGIC);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wrong_version_is_invalid() {
        let path = scratch_path("header_version");
        let producer = SegmentProducer::create(&path).expect("create");
        let view = producer.segment().header().expect("view");
        view.store_identity(SHM_MAGIC, SHM_VERSION + 1);
        assert!(!view.header_valid());
        assert_eq!(view.version(), SHM_VERSION + 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn copy_bytes_rejects_ranges_past_the_mapping() {
        let path = scratch_path("header_bounds");
        let producer = SegmentProducer::create(&path).expect("create");
        let view = producer.segment().header().expect("view");
        let len = view.mapped_len() as u64;
        assert!(view.copy_bytes(len - 4, 4).is_some());
        assert!(view.copy_bytes(len - 4, 5).is_none());
        assert!(view.copy_bytes(u64::MAX, 2).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn misaligned_base_is_reported_as_such() {
        let mut words = [0u64; 4];
        let aligned = std::ptr::NonNull::new(words.as_mut_ptr().cast::<u8>()).expect("non-null");
        assert!(check_alignment(aligned).is_ok());

        let shifted = std::ptr::NonNull::new(aligned.as_ptr().wrapping_add(1)).expect("non-null");
        match check_alignment(shifted) {
            Err(ShmError::Misaligned { addr, align }) => {
                assert_eq!(addr, shifted.as_ptr() as usize);
                assert_eq!(align, 8);
            }
            other => panic!("expected Misaligned, got {other:?}"),
        }
    }
}
