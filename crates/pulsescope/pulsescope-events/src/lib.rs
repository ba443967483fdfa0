pub mod control;
pub mod messages;

pub use control::ControlUpdate;
pub use messages::{HealthReport, MAP_HEIGHT, MAP_WIDTH, ServerMessage};

/// Serialize one outbound message to its JSON text frame.
pub fn encode(message: &ServerMessage) -> Result<String, sonic_rs::Error> {
    sonic_rs::to_string(message)
}

/// Parse one inbound text frame as a control update.
pub fn decode_control(frame: &[u8]) -> Result<ControlUpdate, sonic_rs::Error> {
    sonic_rs::from_slice(frame)
}
