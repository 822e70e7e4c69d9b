//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HardwareConfig, InfraConfig, PatchConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/patchbay/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("patchbay/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("patchbay.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<PatchConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<PatchConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut infra = InfraConfig::default();
    let mut hardware = HardwareConfig::default();

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("state_dir").and_then(|v| v.as_str()) {
            infra.paths.state_dir = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            infra.bind.host = v.to_string();
        }
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            infra.bind.http_port = u16::try_from(v).map_err(|_| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("bind.http_port out of range: {}", v),
            })?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(probe) = table.get("probe").and_then(|v| v.as_table()) {
        if let Some(v) = probe.get("timeout_ms").and_then(|v| v.as_integer()) {
            hardware.probe.timeout_ms = v.max(0) as u64;
        }
    }

    if let Some(jack) = table.get("jack").and_then(|v| v.as_table()) {
        if let Some(v) = jack.get("driver").and_then(|v| v.as_str()) {
            hardware.jack.driver = v.to_string();
        }
        if let Some(v) = jack.get("bridge_grace_ms").and_then(|v| v.as_integer()) {
            hardware.jack.bridge_grace_ms = v.max(0) as u64;
        }
    }

    Ok(PatchConfig { infra, hardware })
}

/// Take the overlay value unless it is still the compiled default.
fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence field by field.
pub fn merge_configs(base: PatchConfig, overlay: PatchConfig) -> PatchConfig {
    let d = PatchConfig::default();
    let mut merged = base;

    merged.infra.paths.state_dir = pick(
        merged.infra.paths.state_dir,
        overlay.infra.paths.state_dir,
        d.infra.paths.state_dir,
    );
    merged.infra.bind.host = pick(merged.infra.bind.host, overlay.infra.bind.host, d.infra.bind.host);
    merged.infra.bind.http_port = pick(
        merged.infra.bind.http_port,
        overlay.infra.bind.http_port,
        d.infra.bind.http_port,
    );
    merged.infra.telemetry.otlp_endpoint = pick(
        merged.infra.telemetry.otlp_endpoint,
        overlay.infra.telemetry.otlp_endpoint,
        d.infra.telemetry.otlp_endpoint,
    );
    merged.infra.telemetry.log_level = pick(
        merged.infra.telemetry.log_level,
        overlay.infra.telemetry.log_level,
        d.infra.telemetry.log_level,
    );
    merged.hardware.probe.timeout_ms = pick(
        merged.hardware.probe.timeout_ms,
        overlay.hardware.probe.timeout_ms,
        d.hardware.probe.timeout_ms,
    );
    merged.hardware.jack.driver = pick(
        merged.hardware.jack.driver,
        overlay.hardware.jack.driver,
        d.hardware.jack.driver,
    );
    merged.hardware.jack.bridge_grace_ms = pick(
        merged.hardware.jack.bridge_grace_ms,
        overlay.hardware.jack.bridge_grace_ms,
        d.hardware.jack.bridge_grace_ms,
    );

    merged
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PatchConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary lookup, so tests need not touch the
/// process environment.
pub fn apply_overrides_from<F>(config: &mut PatchConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PATCHBAY_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("PATCHBAY_STATE_DIR".to_string());
    }

    if let Some(v) = lookup("PATCHBAY_HOST") {
        config.infra.bind.host = v;
        sources.env_overrides.push("PATCHBAY_HOST".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("PATCHBAY_HTTP_PORT".to_string());
        }
    }

    if let Some(v) = lookup("PATCHBAY_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("PATCHBAY_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("PATCHBAY_LOG_LEVEL".to_string());
    }
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Some(v) = lookup("PATCHBAY_PROBE_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.hardware.probe.timeout_ms = ms;
            sources.env_overrides.push("PATCHBAY_PROBE_TIMEOUT_MS".to_string());
        }
    }
    if let Some(v) = lookup("PATCHBAY_JACK_DRIVER") {
        config.hardware.jack.driver = v;
        sources.env_overrides.push("PATCHBAY_JACK_DRIVER".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
