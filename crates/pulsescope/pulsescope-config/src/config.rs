use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default = "defaults::shm_path")]
    pub shm_path: String,
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::attach_attempts")]
    pub attach_attempts: u32,
    #[serde(default = "defaults::attach_backoff_ms")]
    pub attach_backoff_ms: u64,
    #[serde(default = "defaults::serial_port")]
    pub serial_port: String,
    /// Browser origins allowed to open the live connection.
    /// Requests without an `Origin` header are always accepted; an empty
    /// list accepts every origin.
    #[serde(default = "defaults::allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    #[serde(default = "defaults::shm_path")]
    pub shm_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::update_hz")]
    pub update_hz: u32,
    #[serde(default = "defaults::map_hz")]
    pub map_hz: u32,
    #[serde(default = "defaults::stress_series")]
    pub stress_series: u32,
    #[serde(default = "defaults::video_width")]
    pub video_width: u32,
    #[serde(default = "defaults::video_height")]
    pub video_height: u32,
    /// Amplitude of the high-frequency wobble on stress series, 0 to 100.
    #[serde(default = "defaults::noise_level")]
    pub noise_level: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    pub fn shm_path() -> String {
        "/dev/shm/vision_debug_shm".into()
    }

    pub fn listen_addr() -> String {
        "0.0.0.0:5000".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn attach_attempts() -> u32 {
        30
    }

    pub fn attach_backoff_ms() -> u64 {
        1_000
    }

    pub fn serial_port() -> String {
        "/dev/ttyACM0".into()
    }

    pub fn allowed_origins() -> Vec<String> {
        [
            "http://localhost:3000",
            "http://127.0.0.1:3000",
            "http://localhost:5173",
            "http://127.0.0.1:5173",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn update_hz() -> u32 {
        50
    }

    pub fn map_hz() -> u32 {
        10
    }

    pub fn stress_series() -> u32 {
        24
    }

    pub fn video_width() -> u32 {
        320
    }

    pub fn video_height() -> u32 {
        240
    }

    pub fn noise_level() -> u32 {
        10
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shm_path: defaults::shm_path(),
            listen_addr: defaults::listen_addr(),
            log_level: defaults::log_level(),
            attach_attempts: defaults::attach_attempts(),
            attach_backoff_ms: defaults::attach_backoff_ms(),
            serial_port: defaults::serial_port(),
            allowed_origins: defaults::allowed_origins(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&read_file(path.as_ref())?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.attach_attempts == 0 {
            return Err(ConfigError::Invalid("attach_attempts must be at least 1".into()));
        }
        self.listen_socket_addr()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("listen_addr '{}'", self.listen_addr)))
    }

    pub fn attach_backoff(&self) -> Duration {
        Duration::from_millis(self.attach_backoff_ms)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            shm_path: defaults::shm_path(),
            log_level: defaults::log_level(),
            update_hz: defaults::update_hz(),
            map_hz: defaults::map_hz(),
            stress_series: defaults::stress_series(),
            video_width: defaults::video_width(),
            video_height: defaults::video_height(),
            noise_level: defaults::noise_level(),
        }
    }
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&read_file(path.as_ref())?)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(text)?;
        if config.update_hz == 0 || config.map_hz == 0 {
            return Err(ConfigError::Invalid("update_hz and map_hz must be non-zero".into()));
        }
        if config.video_width == 0 || config.video_height == 0 {
            return Err(ConfigError::Invalid("video dimensions must be non-zero".into()));
        }
        if config.noise_level > 100 {
            return Err(ConfigError::Invalid("noise_level must be 0..=100".into()));
        }
        Ok(config)
    }
}
