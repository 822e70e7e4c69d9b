//! Tunables for the sound tools and the routing daemon.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capability probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Upper bound on a single capability dump, in milliseconds.
    /// A locked or busy device must not stall discovery.
    /// Default: 500
    #[serde(default = "ProbeConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProbeConfig {
    fn default_timeout_ms() -> u64 {
        500
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Routing daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JackConfig {
    /// Backend driver selected when the server is started over HTTP.
    /// Default: dummy
    #[serde(default = "JackConfig::default_driver")]
    pub driver: String,

    /// How long a spawned bridge process must stay alive to count as attached.
    /// Default: 250
    #[serde(default = "JackConfig::default_bridge_grace_ms")]
    pub bridge_grace_ms: u64,
}

impl JackConfig {
    fn default_driver() -> String {
        "dummy".to_string()
    }

    fn default_bridge_grace_ms() -> u64 {
        250
    }

    pub fn bridge_grace(&self) -> Duration {
        Duration::from_millis(self.bridge_grace_ms)
    }
}

impl Default for JackConfig {
    fn default() -> Self {
        Self {
            driver: Self::default_driver(),
            bridge_grace_ms: Self::default_bridge_grace_ms(),
        }
    }
}

/// Hardware-facing configuration bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub jack: JackConfig,
}
