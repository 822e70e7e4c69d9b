mod telemetry;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use patchconf::PatchConfig;
use patchgraph::{Database, Engine, EngineSettings, SystemRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// HTTP control plane for the JACK routing daemon and ALSA hardware
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./patchbay.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the desired-state database
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Start without enumerating sound hardware; the last known catalog is used
    #[arg(long)]
    skip_discovery: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut PatchConfig) {
        if let Some(dir) = &self.state_dir {
            config.infra.paths.state_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.infra.bind.http_port = port;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.infra.telemetry.otlp_endpoint = endpoint.clone();
        }
    }
}

/// Create the state directory if needed and open the desired-state database in it.
fn open_state(config: &PatchConfig) -> Result<Database> {
    std::fs::create_dir_all(&config.infra.paths.state_dir)
        .context("Failed to create state directory")?;
    Database::open(config.infra.paths.database_path())
        .context("Failed to open desired-state database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = PatchConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let _telemetry = telemetry::init(
        &config.infra.telemetry.otlp_endpoint,
        &config.infra.telemetry.log_level,
    )
    .context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!("Loaded config: {}", file.display());
    }
    for var in &sources.env_overrides {
        tracing::debug!("Config overridden by {}", var);
    }

    let db = open_state(&config)?;
    tracing::info!("Desired state at {}", db.path().display());

    let engine = Engine::new(
        Arc::new(db),
        Arc::new(SystemRunner::new()),
        EngineSettings::from_config(&config.hardware),
    );

    if cli.skip_discovery {
        tracing::info!("Hardware discovery skipped");
    } else {
        match engine.refresh_catalog().await {
            Ok(report) => tracing::info!(
                devices = report.devices.len(),
                probe_failures = report.probe_failures.len(),
                "Hardware catalog refreshed"
            ),
            Err(e) => tracing::warn!("Hardware discovery failed, using last known catalog: {}", e),
        }
    }

    // Desired state is replayed before the listener accepts anything.
    engine.reconcile().await;

    let addr = config.infra.bind.addr();
    let bind_addr: std::net::SocketAddr = addr.parse().context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let app = web::router(web::WebState {
        engine,
        start_time: Instant::now(),
    });

    let shutdown_token = CancellationToken::new();
    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        tracing::info!("Server shutdown signal received");
    });
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    tracing::info!("patchbay listening on http://{}", addr);

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate_signal() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = server_task.await {
        tracing::error!("Server task failed: {}", e);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "patchbay",
            "--state-dir",
            "/tmp/patchbay-test",
            "--port",
            "4000",
            "--otlp-endpoint",
            "127.0.0.1:4317",
        ]);
        let mut config = PatchConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/tmp/patchbay-test"));
        assert_eq!(config.infra.bind.http_port, 4000);
        assert_eq!(config.infra.telemetry.otlp_endpoint, "127.0.0.1:4317");
        assert!(!cli.skip_discovery);
    }

    #[test]
    fn test_state_dir_is_created_and_state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let state_dir = tmp.path().join("nested").join("state");
        let cli = Cli::parse_from(["patchbay", "--state-dir", state_dir.to_str().unwrap()]);
        let mut config = PatchConfig::default();
        cli.apply(&mut config);

        let db = open_state(&config).unwrap();
        assert!(state_dir.is_dir());
        assert_eq!(db.path(), config.infra.paths.database_path().as_path());

        let device = patchgraph::DeviceRecord::new(1, "USB (USB Audio)", 0, "USB Audio");
        db.upsert_device(&device).unwrap();
        drop(db);

        let reopened = open_state(&config).unwrap();
        assert_eq!(reopened.get_device(&device.id).unwrap(), Some(device));
    }

    #[test]
    fn test_cli_leaves_config_alone_by_default() {
        let cli = Cli::parse_from(["patchbay"]);
        let mut config = PatchConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, PatchConfig::default());
    }
}
