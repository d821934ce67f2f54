use std::path::PathBuf;

use clap::Parser;
use pulselink_settings::{load_settings_from_path, RelaySettings};
use pulselink_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "pulselink", about = "Control-plane relay for controller apps")]
struct Args {
    /// Path to the settings file.
    #[arg(long, default_value = "settings.json")]
    config: PathBuf,

    /// Listen port. Overrides the settings file.
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines instead of the human-readable format.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let telemetry_config = TelemetryConfig {
        json_output: args.log_json,
        ..TelemetryConfig::default()
    };
    pulselink_telemetry::init_telemetry(&telemetry_config);

    // Configuration failure is the only process-fatal error.
    let mut settings: RelaySettings =
        load_settings_from_path(&args.config).expect("failed to load settings");
    if let Some(port) = args.port {
        settings.port = port;
    }

    tracing::info!(
        host = %settings.host_name,
        port = settings.port,
        allow_insecure = settings.allow_insecure_client_id,
        "starting relay"
    );

    let handle = pulselink_server::start(settings)
        .await
        .expect("failed to start relay");
    tracing::info!(port = handle.port, "relay ready");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    handle.shutdown();
    if tokio::time::timeout(std::time::Duration::from_secs(10), handle.drain())
        .await
        .is_err()
    {
        tracing::warn!("relay drain timed out after 10s");
    }
    tracing::info!("shutdown complete");
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_values() {
        let args = Args::parse_from(["pulselink"]);
        assert_eq!(args.config, PathBuf::from("settings.json"));
        assert!(args.port.is_none());
        assert!(!args.log_json);
    }

    #[test]
    fn cli_parses_port_override() {
        let args = Args::parse_from(["pulselink", "--port", "9100"]);
        assert_eq!(args.port, Some(9100));
    }

    #[test]
    fn cli_parses_config_path() {
        let args = Args::parse_from(["pulselink", "--config", "/etc/pulselink.json"]);
        assert_eq!(args.config, PathBuf::from("/etc/pulselink.json"));
    }
}
