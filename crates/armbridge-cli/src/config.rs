//! Bridge settings – read from `~/.armbridge/config.toml`, then overridden by
//! `ARMBRIDGE_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use armbridge_hal::SerialConfig;
use armbridge_runtime::BridgeConfig;
use armbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Contents of `~/.armbridge/config.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Wait after opening the port before first use; the controller resets
    /// when the port opens.
    pub settle_delay_ms: u64,
    pub read_retry_backoff_ms: u64,
    pub publish_period_ms: u64,
    /// rosbridge-style WebSocket gateway port. `0` disables the gateway.
    pub gateway_port: u16,
    /// Publish the last commanded joint goal instead of the home pose.
    pub echo_commanded_angles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 1_000,
            settle_delay_ms: 2_000,
            read_retry_backoff_ms: 100,
            publish_period_ms: 100,
            gateway_port: 9090,
            echo_commanded_angles: false,
        }
    }
}

impl Config {
    pub fn serial(&self, path: &str) -> SerialConfig {
        SerialConfig {
            path: path.to_string(),
            baud_rate: self.baud_rate,
            // A zero timeout turns every read into a busy poll.
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            read_retry_backoff: Duration::from_millis(self.read_retry_backoff_ms),
        }
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            // A zero interval would panic the publisher's ticker.
            publish_period: Duration::from_millis(self.publish_period_ms.max(1)),
            echo_commanded_angles: self.echo_commanded_angles,
        }
    }
}

/// Return the path to `~/.armbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armbridge").join("config.toml")
}

/// Load the config file, or defaults when it does not exist, then apply
/// environment overrides.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] when the file exists but cannot be read
/// or parsed.
pub fn load() -> Result<Config, BridgeError> {
    let mut cfg = load_from(&config_path())?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Config, BridgeError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `ARMBRIDGE_*` environment overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMBRIDGE_BAUD_RATE` | `baud_rate` |
/// | `ARMBRIDGE_READ_TIMEOUT_MS` | `read_timeout_ms` |
/// | `ARMBRIDGE_SETTLE_DELAY_MS` | `settle_delay_ms` |
/// | `ARMBRIDGE_PUBLISH_PERIOD_MS` | `publish_period_ms` |
/// | `ARMBRIDGE_GATEWAY_PORT` | `gateway_port` |
/// | `ARMBRIDGE_ECHO_COMMANDED_ANGLES` | `echo_commanded_angles` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
        slot: &mut T,
    ) {
        if let Some(v) = lookup(key).and_then(|v| v.trim().parse().ok()) {
            *slot = v;
        }
    }

    parsed(&lookup, "ARMBRIDGE_BAUD_RATE", &mut cfg.baud_rate);
    parsed(&lookup, "ARMBRIDGE_READ_TIMEOUT_MS", &mut cfg.read_timeout_ms);
    parsed(&lookup, "ARMBRIDGE_SETTLE_DELAY_MS", &mut cfg.settle_delay_ms);
    parsed(&lookup, "ARMBRIDGE_PUBLISH_PERIOD_MS", &mut cfg.publish_period_ms);
    parsed(&lookup, "ARMBRIDGE_GATEWAY_PORT", &mut cfg.gateway_port);
    parsed(&lookup, "ARMBRIDGE_ECHO_COMMANDED_ANGLES", &mut cfg.echo_commanded_angles);
}
