//! k8s-gateway-dns binary entry point.

use clap::Parser;
use k8s_gateway_dns::{telemetry, Config, GatewayServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Authoritative DNS server for external Kubernetes workload hostnames.
#[derive(Parser, Debug)]
#[command(name = "k8s-gateway-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "k8s-gateway-dns.toml")]
    config: PathBuf,
}

/// Cancel the token on SIGINT or SIGTERM.
async fn signal_handler(shutdown: CancellationToken) {
    let sigterm = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("K8S_GATEWAY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry; the guard flushes exporters on exit.
    let _telemetry = telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        "starting k8s-gateway-dns"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    tokio::spawn(signal_handler(shutdown.clone()));

    // Run DNS server
    let server = GatewayServer::new(config.dns);
    let result = server.run(shutdown).await;

    if let Err(e) = result {
        error!("DNS server error: {}", e);
        return Err(e.into());
    }

    info!("k8s-gateway-dns shutdown complete");
    Ok(())
}
