//! Producer side of the segment contract.
//!
//! The real producer is a separate vision process. This writer follows the
//! same discipline (sequence odd before touching anything, even after) so the
//! simulator binary and the tests can drive the bridge without it.

use crate::control::ControlFields;
use crate::error::ShmError;
use crate::header::HeaderView;
use crate::layout::{
    ESDF_CELLS, IMAGE_REGION_OFFSET, JSON_REGION_OFFSET, MAX_IMAGE_BYTES, MAX_JSON_BYTES,
    RGBA_BYTES_PER_PIXEL, SHM_MAGIC, SHM_VERSION,
};
use crate::segment::Segment;
use std::path::Path;
use std::sync::atomic::{Ordering, fence};

pub struct SegmentProducer {
    segment: Segment,
}

impl SegmentProducer {
    /// Create or reopen the backing object and make sure it carries a valid header.
    ///
    /// A segment that already has the right magic and version is left as is,
    /// including any parameters a bridge has written into it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let segment = Segment::create(path)?;
        let producer = Self { segment };
        let view = producer.view()?;
        if !view.header_valid() {
            view.store_sequence(0, Ordering::Relaxed);
            view.store_identity(SHM_MAGIC, SHM_VERSION);
            view.store_timestamp_ms(0);
            view.store_json_region(0, 0);
            view.store_image_region(0, 0, 0, 0);
            view.store_esdf(&[0.0; ESDF_CELLS]);
            producer.set_gains(1.0, 0.0, 0.1);
            view.store_exposure_time(0);
            view.store_fire_enable(0);
            fence(Ordering::Release);
        }
        Ok(producer)
    }

    fn view(&self) -> Result<HeaderView<'_>, ShmError> {
        HeaderView::new(&self.segment)
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Seed the controller gains, as the producer does on first start.
    pub fn set_gains(&self, pid_p: f32, pid_i: f32, pid_d: f32) {
        if let Ok(view) = self.view() {
            view.store_pid_p(pid_p);
            view.store_pid_i(pid_i);
            view.store_pid_d(pid_d);
        }
    }

    /// Current consumer-written parameters, read the way the producer polls them.
    pub fn poll_controls(&self) -> ControlFields {
        self.view()
            .map(|view| view.control_fields())
            .unwrap_or_default()
    }

    /// Open a write bracket: the sequence is odd until the guard drops.
    pub fn begin_write(&self) -> Result<WriteGuard<'_>, ShmError> {
        let view = self.view()?;
        let start = view.sequence() & !1;
        view.store_sequence(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        Ok(WriteGuard { view, start })
    }
}

/// An open producer update. Readers see an odd sequence while it lives.
pub struct WriteGuard<'a> {
    view: HeaderView<'a>,
    start: u64,
}

impl WriteGuard<'_> {
    pub fn set_timestamp_ms(&self, ts: u64) {
        self.view.store_timestamp_ms(ts);
    }

    pub fn write_grid(&self, cells: &[f32; ESDF_CELLS]) {
        self.view.store_esdf(cells);
    }

    /// Place `json` in the telemetry region and point the header at it.
    pub fn write_telemetry_json(&self, json: &[u8]) -> bool {
        if json.is_empty() || json.len() as u64 >= MAX_JSON_BYTES {
            return false;
        }
        if !self.view.write_bytes(JSON_REGION_OFFSET, json) {
            return false;
        }
        self.view
            .store_json_region(JSON_REGION_OFFSET as u64, json.len() as u64);
        true
    }

    /// Place an RGBA frame in the image region and point the header at it.
    pub fn write_rgba_frame(&self, width: u32, height: u32, rgba: &[u8]) -> bool {
        let Some(expected) = u64::from(width)
            .checked_mul(u64::from(height))
            .and_then(|px| px.checked_mul(RGBA_BYTES_PER_PIXEL))
        else {
            return false;
        };
        if expected == 0 || expected > MAX_IMAGE_BYTES || rgba.len() as u64 != expected {
            return false;
        }
        if !self.view.write_bytes(IMAGE_REGION_OFFSET, rgba) {
            return false;
        }
        self.view
            .store_image_region(IMAGE_REGION_OFFSET as u64, expected, width, height);
        true
    }

    /// Publish an arbitrary JSON region descriptor without touching its bytes.
    pub fn set_json_region(&self, offset: u64, size: u64) {
        self.view.store_json_region(offset, size);
    }

    /// Publish an arbitrary frame descriptor without touching its bytes.
    pub fn set_image_region(&self, offset: u64, size: u64, width: u32, height: u32) {
        self.view.store_image_region(offset, size, width, height);
    }

    pub fn set_identity(&self, magic: u64, version: u64) {
        self.view.store_identity(magic, version);
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.view
            .store_sequence(self.start.wrapping_add(2), Ordering::Release);
    }
}
