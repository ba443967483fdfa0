#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

// Inbound from the browser. Every field is optional; an absent field means
// "leave the producer's value alone", which is different from sending 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_i: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_d: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_enabled: Option<bool>,
}

impl ControlUpdate {
    pub fn is_empty(&self) -> bool {
        self.pid_p.is_none()
            && self.pid_i.is_none()
            && self.pid_d.is_none()
            && self.exposure.is_none()
            && self.fire_enabled.is_none()
    }
}
