mod control;
mod error;
mod header;
mod layout;
mod producer;
mod segment;
mod seqlock;
mod snapshot;

pub use control::{
    ControlFields, ControlWriter, EXPOSURE_RANGE, PID_D_RANGE, PID_I_RANGE, PID_P_RANGE,
    clamp_param,
};
pub use error::ShmError;
pub use header::HeaderView;
pub use layout::{
    ESDF_CELLS, ESDF_HEIGHT, ESDF_WIDTH, HEADER_SIZE, IMAGE_REGION_OFFSET, JSON_REGION_OFFSET,
    MAX_IMAGE_BYTES, MAX_JSON_BYTES, SHM_MAGIC, SHM_TOTAL_SIZE, SHM_VERSION, ShmHeader,
};
pub use pulsescope_events::ControlUpdate;
pub use producer::{SegmentProducer, WriteGuard};
pub use segment::Segment;
pub use seqlock::read_consistent;
pub use snapshot::{
    FIXED_SERIES, GRID_READ_ATTEMPTS, GridSnapshot, IMAGE_READ_ATTEMPTS, ImageSnapshot,
    TELEMETRY_READ_ATTEMPTS, TelemetrySnapshot, decode_dynamic_series, merge_series,
};
