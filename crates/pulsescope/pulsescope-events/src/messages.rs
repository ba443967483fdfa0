#![forbid(unsafe_code)]

// Outbound envelope for the live connection. The browser switches on the
// "type" field, so the tag and every field name here are part of the
// frontend contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAP_WIDTH: u32 = 100;
pub const MAP_HEIGHT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Every series name the session knows about, sorted ascending.
    Metadata { available_series: Vec<String> },

    Data {
        timestamp: u64,
        series: BTreeMap<String, f64>,
    },

    Map {
        timestamp: u64,
        width: u32,
        height: u32,
        grid: Vec<f32>,
    },

    Status {
        /// Wall clock, milliseconds since the epoch.
        timestamp: i64,
        backend_connected: bool,
        shm_active: bool,
        serial_port: String,
        /// 0–100
        nuc_cpu_load: f64,
        /// °C
        nuc_temp: f64,
    },
}

impl ServerMessage {
    pub fn metadata<I, S>(series: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut available_series: Vec<String> = series.into_iter().map(Into::into).collect();
        available_series.sort_unstable();
        available_series.dedup();
        ServerMessage::Metadata { available_series }
    }

    pub fn map(timestamp: u64, grid: Vec<f32>) -> Self {
        ServerMessage::Map {
            timestamp,
            width: MAP_WIDTH,
            height: MAP_HEIGHT,
            grid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Metadata { .. } => "metadata",
            ServerMessage::Data { .. } => "data",
            ServerMessage::Map { .. } => "map",
            ServerMessage::Status { .. } => "status",
        }
    }
}

/// Answer to a process-health query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub shm_attached: bool,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;

    #[test]
    fn metadata_is_sorted_and_tagged() {
        let msg = ServerMessage::metadata(["pid_p", "exposure", "temp", "exposure"]);
        assert_eq!(
            encode(&msg).expect("encode"),
            r#"{"type":"metadata","available_series":["exposure","pid_p","temp"]}"#
        );
    }

    #[test]
    fn data_message_carries_series_object() {
        let series: BTreeMap<String, f64> = [("temp".to_string(), 42.5)].into_iter().collect();
        let text = encode(&ServerMessage::Data {
            timestamp: 17,
            series: series.clone(),
        })
        .expect("encode");
        assert!(text.starts_with(r#"{"type":"data","timestamp":17,"series":{"temp":42.5"#));

        let back: ServerMessage = sonic_rs::from_str(&text).expect("decode");
        assert_eq!(back, ServerMessage::Data { timestamp: 17, series });
    }

    #[test]
    fn map_message_has_fixed_dimensions() {
        let msg = ServerMessage::map(5, vec![0.5; 4]);
        assert_eq!(msg.kind(), "map");
        let text = encode(&msg).expect("encode");
        assert!(text.starts_with(r#"{"type":"map","timestamp":5,"width":100,"height":100,"grid":["#));
    }

    #[test]
    fn status_field_names_match_frontend() {
        let text = encode(&ServerMessage::Status {
            timestamp: 1_700_000_000_000,
            backend_connected: true,
            shm_active: false,
            serial_port: "/dev/ttyACM0".into(),
            nuc_cpu_load: 12.5,
            nuc_temp: 48.25,
        })
        .expect("encode");
        for key in [
            r#""type":"status""#,
            r#""backend_connected":true"#,
            r#""shm_active":false"#,
            r#""serial_port":"/dev/ttyACM0""#,
            r#""nuc_cpu_load":12.5"#,
            r#""nuc_temp":48.25"#,
        ] {
            assert!(text.contains(key), "{key} missing from {text}");
        }
    }
}
