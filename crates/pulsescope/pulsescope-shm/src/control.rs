//! Clamped write-back of tuning parameters into the header.
//!
//! These writes deliberately bypass the seqlock. The producer polls the
//! consumer-writable fields as plain values and never brackets its own reads,
//! so there is nothing on this side to synchronize with. The mutex only keeps
//! two local sessions from interleaving their multi-field updates.

use crate::segment::Segment;
use pulsescope_events::ControlUpdate;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

pub const PID_P_RANGE: RangeInclusive<f32> = 0.0..=10.0;
pub const PID_I_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const PID_D_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const EXPOSURE_RANGE: RangeInclusive<f32> = 100.0..=50_000.0;

/// The consumer-writable header fields as raw values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlFields {
    pub pid_p: f32,
    pub pid_i: f32,
    pub pid_d: f32,
    pub exposure_time: u32,
    pub fire_enable: u8,
}

/// Clamp `value` into `range`.
///
/// NaN has no meaningful position in the range and is rejected; infinities
/// clamp to the nearest bound.
#[inline]
pub fn clamp_param(value: f32, range: &RangeInclusive<f32>) -> Option<f32> {
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(*range.start(), *range.end()))
}

#[derive(Default)]
pub struct ControlWriter {
    guard: Mutex<()>,
}

impl ControlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp and write every present field of `update`.
    ///
    /// Returns `false` without touching anything when the segment is detached.
    pub fn apply(&self, segment: &Segment, update: &ControlUpdate) -> bool {
        let Some(view) = segment.header() else {
            return false;
        };
        // the guarded data is the mapping itself; a poisoned lock protects nothing extra
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(v) = checked("pid_p", update.pid_p, &PID_P_RANGE) {
            view.store_pid_p(v);
        }
        if let Some(v) = checked("pid_i", update.pid_i, &PID_I_RANGE) {
            view.store_pid_i(v);
        }
        if let Some(v) = checked("pid_d", update.pid_d, &PID_D_RANGE) {
            view.store_pid_d(v);
        }
        if let Some(v) = checked("exposure", update.exposure, &EXPOSURE_RANGE) {
            view.store_exposure_time(v as u32);
        }
        if let Some(enabled) = update.fire_enabled {
            view.store_fire_enable(u8::from(enabled));
        }
        true
    }
}

fn checked(name: &'static str, value: Option<f32>, range: &RangeInclusive<f32>) -> Option<f32> {
    let raw = value?;
    let clamped = clamp_param(raw, range);
    if clamped.is_none() {
        tracing::warn!(field = name, "ignoring non-numeric control value");
    }
    clamped
}
