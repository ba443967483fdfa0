//! Shared state behind every live session.

use crate::host::HostProbe;
use pulsescope_events::{ControlUpdate, HealthReport, ServerMessage};
use pulsescope_shm::{ControlWriter, GridSnapshot, ImageSnapshot, Segment, TelemetrySnapshot};
use std::time::{SystemTime, UNIX_EPOCH};

/// One attached segment, shared read-only by all sessions.
///
/// Sessions never hold the mapping themselves: every read goes through a
/// fresh [`pulsescope_shm::HeaderView`], which is `None` once the segment has
/// been detached. A detached bridge keeps serving status messages.
pub struct Bridge {
    segment: Segment,
    control: ControlWriter,
    serial_port: String,
    host: Box<dyn HostProbe>,
}

impl Bridge {
    pub fn new(segment: Segment, serial_port: impl Into<String>, host: Box<dyn HostProbe>) -> Self {
        Self {
            segment,
            control: ControlWriter::new(),
            serial_port: serial_port.into(),
            host,
        }
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn header_valid(&self) -> bool {
        self.segment
            .header()
            .is_some_and(|view| view.header_valid())
    }

    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.segment.header()?.read_telemetry()
    }

    pub fn grid(&self) -> Option<GridSnapshot> {
        self.segment.header()?.read_grid()
    }

    /// Latest camera frame, if the producer has published a sane one.
    pub fn latest_frame(&self) -> Option<ImageSnapshot> {
        self.segment.header()?.read_image()
    }

    /// Clamp and write a control update. `false` when detached.
    pub fn apply_control(&self, update: &ControlUpdate) -> bool {
        let applied = self.control.apply(&self.segment, update);
        if applied {
            tracing::debug!(?update, "applied control update");
        } else {
            tracing::debug!("segment detached, control update dropped");
        }
        applied
    }

    /// `version` is the schema version found in the header, 0 once detached.
    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            shm_attached: self.segment.is_attached(),
            version: self.segment.header().map_or(0, |view| view.version()),
        }
    }

    pub fn status_message(&self) -> ServerMessage {
        ServerMessage::Status {
            timestamp: wall_clock_ms(),
            backend_connected: self.segment.is_attached(),
            shm_active: self.header_valid(),
            serial_port: self.serial_port.clone(),
            nuc_cpu_load: self.host.cpu_load_pct(),
            nuc_temp: self.host.cpu_temp_c(),
        }
    }
}

fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FixedHostProbe;
    use pulsescope_shm::{SHM_MAGIC, SHM_VERSION, SegmentProducer};
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulsescope_{name}_{}", std::process::id()))
    }

    fn bridge_over(path: &PathBuf) -> Bridge {
        let probe = FixedHostProbe {
            load_pct: 37.5,
            temp_c: 51.0,
        };
        Bridge::new(
            Segment::attach(path).expect("attach"),
            "/dev/ttyTEST",
            Box::new(probe),
        )
    }

    #[test]
    fn status_reflects_segment_and_host() {
        let path = scratch_path("bridge_status");
        let _producer = SegmentProducer::create(&path).expect("create");
        let bridge = bridge_over(&path);

        match bridge.status_message() {
            ServerMessage::Status {
                timestamp,
                backend_connected,
                shm_active,
                serial_port,
                nuc_cpu_load,
                nuc_temp,
            } => {
                assert!(timestamp > 0);
                assert!(backend_connected);
                assert!(shm_active);
                assert_eq!(serial_port, "/dev/ttyTEST");
                assert_eq!(nuc_cpu_load, 37.5);
                assert_eq!(nuc_temp, 51.0);
            }
            other => panic!("expected status, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn health_reports_attachment() {
        let path = scratch_path("bridge_health");
        let _producer = SegmentProducer::create(&path).expect("create");
        let bridge = bridge_over(&path);

        let report = bridge.health();
        assert_eq!(report.status, "ok");
        assert!(report.shm_attached);
        assert_eq!(report.version, SHM_VERSION);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn health_reports_the_segment_version_not_ours() {
        let path = scratch_path("bridge_health_foreign");
        let producer = SegmentProducer::create(&path).expect("create");
        {
            let w = producer.begin_write().expect("begin");
            w.set_identity(SHM_MAGIC, 7);
        }
        let bridge = bridge_over(&path);

        let report = bridge.health();
        assert_eq!(report.version, 7);
        assert!(!bridge.header_valid());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn detached_health_reports_version_zero() {
        let path = scratch_path("bridge_health_detached");
        let _producer = SegmentProducer::create(&path).expect("create");
        let mut segment = Segment::attach(&path).expect("attach");
        segment.detach();
        let bridge = Bridge::new(segment, "/dev/ttyTEST", Box::new(FixedHostProbe::default()));

        let report = bridge.health();
        assert!(!report.shm_attached);
        assert_eq!(report.version, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn controls_round_trip_through_the_producer() {
        let path = scratch_path("bridge_control");
        let producer = SegmentProducer::create(&path).expect("create");
        let bridge = bridge_over(&path);

        assert!(bridge.apply_control(&ControlUpdate {
            pid_p: Some(42.0),
            fire_enabled: Some(true),
            ..ControlUpdate::default()
        }));
        let seen = producer.poll_controls();
        assert_eq!(seen.pid_p, 10.0);
        assert_eq!(seen.fire_enable, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn no_frame_until_one_is_published() {
        let path = scratch_path("bridge_frame");
        let producer = SegmentProducer::create(&path).expect("create");
        let bridge = bridge_over(&path);
        assert!(bridge.latest_frame().is_none());

        {
            let w = producer.begin_write().expect("begin");
            assert!(w.write_rgba_frame(2, 2, &[9u8; 16]));
        }
        let frame = bridge.latest_frame().expect("frame");
        assert_eq!((frame.width, frame.height), (2, 2));
        assert_eq!(frame.rgba, vec![9u8; 16]);
        let _ = std::fs::remove_file(&path);
    }
}
