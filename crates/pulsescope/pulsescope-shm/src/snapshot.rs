//! Consistent snapshots of telemetry, distance grid and video frame.
//!
//! Each reader runs one [`read_consistent`] pass with its own attempt budget
//! and its own bounds rules. `None` always means "not ready this time":
//! the producer was mid-write, stalled, or published a region that fails
//! validation. None of these are errors for the caller.

use crate::control::ControlFields;
use crate::header::HeaderView;
use crate::layout::{ESDF_CELLS, MAX_IMAGE_BYTES, MAX_JSON_BYTES, RGBA_BYTES_PER_PIXEL};
use crate::seqlock::read_consistent;
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::BTreeMap;

pub const TELEMETRY_READ_ATTEMPTS: u32 = 5;
pub const GRID_READ_ATTEMPTS: u32 = 3;
pub const IMAGE_READ_ATTEMPTS: u32 = 3;

/// Series names of the fixed controller fields, in header order.
pub const FIXED_SERIES: [&str; 5] = ["pid_p", "pid_i", "pid_d", "exposure", "fire_enabled"];

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub timestamp_ms: u64,
    pub series: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSnapshot {
    pub timestamp_ms: u64,
    /// Row-major, always `ESDF_CELLS` long.
    pub cells: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSnapshot {
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    /// Exactly `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DynamicValue {
    Number(f64),
    Flag(bool),
    #[allow(dead_code)]
    Other(IgnoredAny),
}

/// Decode the producer's ad-hoc telemetry object.
///
/// Only top-level numbers and booleans survive (booleans as 1.0 / 0.0).
/// Anything that is not a JSON object decodes to an empty map.
pub fn decode_dynamic_series(raw: &[u8]) -> BTreeMap<String, f64> {
    if raw.is_empty() {
        return BTreeMap::new();
    }
    let Ok(fields) = sonic_rs::from_slice::<BTreeMap<String, DynamicValue>>(raw) else {
        return BTreeMap::new();
    };
    fields
        .into_iter()
        .filter_map(|(key, value)| match value {
            DynamicValue::Number(n) => Some((key, n)),
            DynamicValue::Flag(b) => Some((key, if b { 1.0 } else { 0.0 })),
            DynamicValue::Other(_) => None,
        })
        .collect()
}

/// Overlay the fixed controller fields onto the dynamic series.
///
/// Fixed fields are written last and win over same-named dynamic keys.
pub fn merge_series(
    mut dynamic: BTreeMap<String, f64>,
    fixed: &ControlFields,
) -> BTreeMap<String, f64> {
    let values = [
        f64::from(fixed.pid_p),
        f64::from(fixed.pid_i),
        f64::from(fixed.pid_d),
        f64::from(fixed.exposure_time),
        f64::from(fixed.fire_enable),
    ];
    for (name, value) in FIXED_SERIES.iter().zip(values) {
        dynamic.insert((*name).to_string(), value);
    }
    dynamic
}

fn json_in_bounds(offset: u64, size: u64, mapped_len: usize) -> bool {
    size > 0
        && size < MAX_JSON_BYTES
        && offset > 0
        && offset
            .checked_add(size)
            .is_some_and(|end| end <= mapped_len as u64)
}

/// Byte length of the RGBA frame described by the header, if it passes every bound.
fn frame_extent(offset: u64, size: u64, width: u32, height: u32, mapped_len: usize) -> Option<u64> {
    if width == 0 || height == 0 || size == 0 || size > MAX_IMAGE_BYTES {
        return None;
    }
    let expected = u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(RGBA_BYTES_PER_PIXEL)?;
    if expected == 0 || expected > MAX_IMAGE_BYTES || size < expected {
        return None;
    }
    if offset == 0 || offset.checked_add(expected)? > mapped_len as u64 {
        return None;
    }
    Some(expected)
}

impl HeaderView<'_> {
    /// Fixed controller fields merged over the decoded JSON region.
    pub fn read_telemetry(&self) -> Option<TelemetrySnapshot> {
        let (timestamp_ms, raw_json, fixed) =
            read_consistent(self, TELEMETRY_READ_ATTEMPTS, |view| {
                let (offset, size) = view.json_region();
                let raw = if json_in_bounds(offset, size, view.mapped_len()) {
                    view.copy_bytes(offset, size)
                } else {
                    None
                };
                Some((view.timestamp_ms(), raw, view.control_fields()))
            })?;

        let dynamic = raw_json
            .as_deref()
            .map(decode_dynamic_series)
            .unwrap_or_default();
        Some(TelemetrySnapshot {
            timestamp_ms,
            series: merge_series(dynamic, &fixed),
        })
    }

    /// Verbatim copy of the 100×100 distance field.
    pub fn read_grid(&self) -> Option<GridSnapshot> {
        let mut cells = Box::new([0f32; ESDF_CELLS]);
        let timestamp_ms = read_consistent(self, GRID_READ_ATTEMPTS, |view| {
            view.copy_esdf(&mut cells);
            Some(view.timestamp_ms())
        })?;
        Some(GridSnapshot {
            timestamp_ms,
            cells: cells.to_vec(),
        })
    }

    /// Latest RGBA frame, trimmed to exactly `width * height * 4` bytes.
    pub fn read_image(&self) -> Option<ImageSnapshot> {
        read_consistent(self, IMAGE_READ_ATTEMPTS, |view| {
            let (offset, size, width, height) = view.image_region();
            let extent = frame_extent(offset, size, width, height, view.mapped_len())?;
            let rgba = view.copy_bytes(offset, extent)?;
            Some(ImageSnapshot {
                timestamp_ms: view.timestamp_ms(),
                width,
                height,
                rgba,
            })
        })
    }
}
