//! Typed configuration consumed at startup (spec §6 "Configuration
//! consumed"), loaded from a TOML file. Grounded in the original's
//! `configparser`-based `connect.cfg` ([`old_buddy.py`]'s
//! `self.config.read(CONN.CONNECT_CONFIG_PATH)`), translated to a `serde`
//! struct per the teacher's preference for typed config over ad-hoc section
//! lookups.

use std::{path::Path, time::Duration};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("could not parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectSection {
    pub address: String,
    pub port: u16,
    pub token: String,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialSection {
    pub port: String,
    pub baudrate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalsSection {
    #[serde(default = "default_quit_interval_secs")]
    pub quit_interval_secs: u64,
    #[serde(default = "default_status_update_interval_secs")]
    pub status_update_interval_secs: u64,
    #[serde(default = "default_telemetry_send_interval_secs")]
    pub telemetry_send_interval_secs: u64,
}

fn default_quit_interval_secs() -> u64 {
    1
}
fn default_status_update_interval_secs() -> u64 {
    2
}
fn default_telemetry_send_interval_secs() -> u64 {
    1
}

impl Default for IntervalsSection {
    fn default() -> Self {
        Self {
            quit_interval_secs: default_quit_interval_secs(),
            status_update_interval_secs: default_status_update_interval_secs(),
            telemetry_send_interval_secs: default_telemetry_send_interval_secs(),
        }
    }
}

impl IntervalsSection {
    pub fn quit_interval(&self) -> Duration {
        Duration::from_secs(self.quit_interval_secs)
    }
    pub fn status_update_interval(&self) -> Duration {
        Duration::from_secs(self.status_update_interval_secs)
    }
    pub fn telemetry_send_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_send_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub connect: ConnectSection,
    pub serial: SerialSection,
    #[serde(default)]
    pub intervals: IntervalsSection,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let text = r#"
            [connect]
            address = "connect.prusa3d.com"
            port = 443
            token = "deadbeef"
            tls = true

            [serial]
            port = "/dev/ttyAMA0"
            baudrate = 115200
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.connect.address, "connect.prusa3d.com");
        assert!(config.connect.tls);
        assert_eq!(config.serial.baudrate, 115200);
        assert_eq!(config.intervals.status_update_interval(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_malformed_toml() {
        let text = "not = [valid";
        let result: Result<Config, _> = toml::from_str(text);
        assert!(result.is_err());
    }
}
