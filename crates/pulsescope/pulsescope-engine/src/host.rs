//! Host load and temperature for status messages.
//!
//! Sampling the host is outside the bridge proper; sessions only see the
//! [`HostProbe`] trait. The default probe reads the usual Linux files and
//! reports 0 for anything it cannot read.

use std::path::PathBuf;

pub trait HostProbe: Send + Sync {
    /// Load as a percentage of available logical CPUs.
    fn cpu_load_pct(&self) -> f64;
    /// CPU temperature in °C.
    fn cpu_temp_c(&self) -> f64;
}

pub struct ProcHostProbe {
    loadavg: PathBuf,
    thermal: Vec<PathBuf>,
    cpus: usize,
}

impl Default for ProcHostProbe {
    fn default() -> Self {
        Self {
            loadavg: PathBuf::from("/proc/loadavg"),
            thermal: vec![
                PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
                PathBuf::from("/sys/class/hwmon/hwmon0/temp1_input"),
            ],
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(0),
        }
    }
}

impl HostProbe for ProcHostProbe {
    fn cpu_load_pct(&self) -> f64 {
        std::fs::read_to_string(&self.loadavg)
            .ok()
            .and_then(|text| load_pct(&text, self.cpus))
            .unwrap_or(0.0)
    }

    fn cpu_temp_c(&self) -> f64 {
        self.thermal
            .iter()
            .find_map(|path| {
                let text = std::fs::read_to_string(path).ok()?;
                temp_c(&text)
            })
            .unwrap_or(0.0)
    }
}

/// 1-minute load average over `cpus`, as a percentage.
fn load_pct(loadavg: &str, cpus: usize) -> Option<f64> {
    if cpus == 0 {
        return None;
    }
    let one_min: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    Some(one_min / cpus as f64 * 100.0)
}

/// Sysfs reports millidegrees; some drivers report whole degrees.
fn temp_c(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    Some(if value > 1000.0 { value / 1000.0 } else { value })
}

/// Probe with fixed readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedHostProbe {
    pub load_pct: f64,
    pub temp_c: f64,
}

impl HostProbe for FixedHostProbe {
    fn cpu_load_pct(&self) -> f64 {
        self.load_pct
    }

    fn cpu_temp_c(&self) -> f64 {
        self.temp_c
    }
}
