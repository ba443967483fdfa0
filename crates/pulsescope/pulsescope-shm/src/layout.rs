//! Binary layout of the vision debug segment.
//!
//! The producer process owns this contract. Field order, widths and the total
//! header size must match its native (little-endian, 8-byte aligned) layout
//! byte for byte; nothing here may be reordered.
//!
//! # Memory Layout
//!
//! ```text
//! offset 0        ┌──────────────────────────────────────────────┐
//!                 │ ShmHeader (40 096 bytes)                     │
//!                 │  magic, version, sequence, timestamp_ms      │
//!                 │  image_offset, image_size, width, height     │
//!                 │  json_offset, json_size                      │
//!                 │  esdf_map[10 000] (f32)                      │
//!                 │  pid_p, pid_i, pid_d, exposure_time,         │
//!                 │  fire_enable, reserved[3]                    │
//! JSON_REGION     ├──────────────────────────────────────────────┤
//!                 │ telemetry JSON (producer chosen, < 64 KiB)   │
//! IMAGE_REGION    ├──────────────────────────────────────────────┤
//!                 │ RGBA frame (producer chosen, <= 4 MiB)       │
//!                 ├──────────────────────────────────────────────┤
//!                 │ ...                                          │
//! 10 MiB          └──────────────────────────────────────────────┘
//! ```
//!
//! Only the header is fixed. The JSON and image regions are wherever the
//! header's offset/size pairs say they are; the region constants below are
//! the placement used by [`crate::SegmentProducer`].

use std::mem::size_of;
use std::sync::atomic::AtomicU64;

/// ASCII "VISION01".
pub const SHM_MAGIC: u64 = 0x5649_5349_4F4E_3031;

/// Schema version the bridge understands.
pub const SHM_VERSION: u64 = 2;

/// Total size of the shared object.
pub const SHM_TOTAL_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on a single RGBA frame.
pub const MAX_IMAGE_BYTES: u64 = 4 * 1024 * 1024;

/// Exclusive upper bound on the telemetry JSON region.
pub const MAX_JSON_BYTES: u64 = 64 * 1024;

pub const ESDF_WIDTH: usize = 100;
pub const ESDF_HEIGHT: usize = 100;
pub const ESDF_CELLS: usize = ESDF_WIDTH * ESDF_HEIGHT;

pub const RGBA_BYTES_PER_PIXEL: u64 = 4;

/// Where the bundled producer places the telemetry JSON.
pub const JSON_REGION_OFFSET: usize = 64 * 1024;

/// Where the bundled producer places video frames.
pub const IMAGE_REGION_OFFSET: usize = JSON_REGION_OFFSET + MAX_JSON_BYTES as usize * 2;

/// Header at offset 0 of the segment.
///
/// `sequence` is the only field with atomic semantics. The producer makes it
/// odd before touching anything else and even once it is done. The bridge
/// never writes it.
#[repr(C)]
pub struct ShmHeader {
    pub magic: u64,
    pub version: u64,
    pub sequence: AtomicU64,
    pub timestamp_ms: u64,

    pub image_offset: u64,
    pub image_size: u64,
    pub width: u32,
    pub height: u32,

    pub json_offset: u64,
    pub json_size: u64,

    /// Distance field, row-major 100×100.
    pub esdf_map: [f32; ESDF_CELLS],

    // consumer-writable
    pub pid_p: f32,
    pub pid_i: f32,
    pub pid_d: f32,
    pub exposure_time: u32,
    pub fire_enable: u8,
    pub reserved: [u8; 3],
}

pub const HEADER_SIZE: usize = size_of::<ShmHeader>();

const _: () = assert!(HEADER_SIZE == 40_096, "ShmHeader layout drifted from the producer");
const _: () = assert!(JSON_REGION_OFFSET >= HEADER_SIZE);
const _: () = assert!(IMAGE_REGION_OFFSET + MAX_IMAGE_BYTES as usize <= SHM_TOTAL_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of};

    /// Offsets are the producer's, taken from its header definition.
    #[test]
    fn field_offsets_match_producer() {
        assert_eq!(offset_of!(ShmHeader, magic), 0);
        assert_eq!(offset_of!(ShmHeader, version), 8);
        assert_eq!(offset_of!(ShmHeader, sequence), 16);
        assert_eq!(offset_of!(ShmHeader, timestamp_ms), 24);
        assert_eq!(offset_of!(ShmHeader, image_offset), 32);
        assert_eq!(offset_of!(ShmHeader, image_size), 40);
        assert_eq!(offset_of!(ShmHeader, width), 48);
        assert_eq!(offset_of!(ShmHeader, height), 52);
        assert_eq!(offset_of!(ShmHeader, json_offset), 56);
        assert_eq!(offset_of!(ShmHeader, json_size), 64);
        assert_eq!(offset_of!(ShmHeader, esdf_map), 72);
        assert_eq!(offset_of!(ShmHeader, pid_p), 40_072);
        assert_eq!(offset_of!(ShmHeader, pid_i), 40_076);
        assert_eq!(offset_of!(ShmHeader, pid_d), 40_080);
        assert_eq!(offset_of!(ShmHeader, exposure_time), 40_084);
        assert_eq!(offset_of!(ShmHeader, fire_enable), 40_088);
        assert_eq!(offset_of!(ShmHeader, reserved), 40_089);
    }

    #[test]
    fn header_is_eight_byte_aligned() {
        assert_eq!(align_of::<ShmHeader>(), 8);
        assert_eq!(HEADER_SIZE % 8, 0);
    }

    #[test]
    fn magic_spells_vision01() {
        assert_eq!(&SHM_MAGIC.to_be_bytes(), b"VISION01");
    }
}
