//! Configuration loading for the patchbay control plane.
//!
//! # Configuration Philosophy
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry.
//!   Fixed for the lifetime of the process.
//! - **Hardware** (`HardwareConfig`): probe timeout and routing daemon knobs
//!   handed to the engine at startup.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/patchbay/config.toml` (system)
//! 2. `~/.config/patchbay/config.toml` (user)
//! 3. `./patchbay.toml` (local override, or the `--config` path)
//! 4. Environment variables (`PATCHBAY_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/patchbay"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 3000
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [probe]
//! timeout_ms = 500
//!
//! [jack]
//! driver = "dummy"
//! bridge_grace_ms = 250
//! ```

pub mod hardware;
pub mod infra;
pub mod loader;

pub use hardware::{HardwareConfig, JackConfig, ProbeConfig};
pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete patchbay configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub hardware: HardwareConfig,
}

impl PatchConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./patchbay.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PatchConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML, one section per table.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# patchbay configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.infra.paths.state_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[probe]\n");
        output.push_str(&format!("timeout_ms = {}\n", self.hardware.probe.timeout_ms));

        output.push_str("\n[jack]\n");
        output.push_str(&format!("driver = \"{}\"\n", self.hardware.jack.driver));
        output.push_str(&format!(
            "bridge_grace_ms = {}\n",
            self.hardware.jack.bridge_grace_ms
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PatchConfig::default();
        assert_eq!(config.infra.bind.http_port, 3000);
        assert_eq!(config.hardware.probe.timeout_ms, 500);
        assert_eq!(config.hardware.jack.driver, "dummy");
    }

    #[test]
    fn test_to_toml_round_trips_through_parser() {
        let mut config = PatchConfig::default();
        config.infra.bind.http_port = 4100;
        config.hardware.jack.driver = "alsa".to_string();

        let text = config.to_toml();
        assert!(text.contains("[probe]"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchbay.toml");
        std::fs::write(&path, text).unwrap();

        let parsed = loader::load_from_file(&path).unwrap();
        assert_eq!(parsed.infra.bind.http_port, 4100);
        assert_eq!(parsed.hardware.jack.driver, "alsa");
    }

    #[test]
    fn test_explicit_config_path_wins_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[bind]\nhttp_port = 8123\n").unwrap();

        let (config, sources) = PatchConfig::load_with_sources_from(Some(&path)).unwrap();
        assert!(sources.files.contains(&path));
        // PATCHBAY_HTTP_PORT in the test environment would override the file
        if !sources.env_overrides.iter().any(|v| v == "PATCHBAY_HTTP_PORT") {
            assert_eq!(config.infra.bind.http_port, 8123);
        }
    }
}
