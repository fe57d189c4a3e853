//! DNS server setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::authority::GatewayAuthority;
use crate::config::DnsConfig;
use crate::error::GatewayError;
use crate::metrics;
use crate::watch::{self, KubeController, Readiness};

/// Interval for emitting readiness metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit readiness metrics.
async fn metrics_loop(readiness: Readiness, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let synced = readiness.has_synced();
                metrics::record_ready(synced);
                debug!(synced, "emitted readiness metrics");
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build the cluster client from an explicit kubeconfig (plus optional
/// context) or the inferred in-cluster/local configuration.
async fn build_client(config: &DnsConfig) -> Result<Client, GatewayError> {
    let client_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let options = KubeConfigOptions {
                context: config.kube_context.clone(),
                ..Default::default()
            };
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(Client::try_from(client_config)?)
}

/// Authoritative DNS server backed by the cluster's workload objects.
pub struct GatewayServer {
    config: DnsConfig,
}

impl GatewayServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self { config }
    }

    /// Run the DNS server until the shutdown token is cancelled.
    ///
    /// Queries arriving before the initial watch sync completes are answered
    /// with SERVFAIL; the sockets are bound as soon as the watchers start.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            zones = ?self.config.zones,
            "starting k8s-gateway-dns server"
        );

        let client = build_client(&self.config).await?;

        if !watch::wait_api_ready(&client, &shutdown).await? {
            info!("shutdown requested before api-server became ready");
            return Ok(());
        }

        let tasks_token = shutdown.child_token();
        let (controller, registry) =
            KubeController::build(client, &self.config, tasks_token.clone()).await;
        let registry = Arc::new(registry);
        let readiness = controller.readiness();

        let kinds: Vec<&str> = registry.kinds().iter().map(|k| k.as_str()).collect();
        info!(?kinds, "resource kinds enabled");

        let config = Arc::new(self.config);
        let mut catalog = Catalog::new();
        for zone in &config.zones {
            let authority = GatewayAuthority::new(
                Arc::clone(&config),
                zone,
                Arc::clone(&registry),
                readiness.clone(),
            )?;
            let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
            catalog.upsert(authority.origin().clone(), vec![authority]);
        }

        let mut server = ServerFuture::new(catalog);

        let udp_socket = UdpSocket::bind(config.listen_addr).await?;
        info!(addr = %config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(config.listen_addr).await?;
        info!(addr = %config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        info!(zones = ?config.zones, "DNS server ready to serve queries");

        let metrics_readiness = readiness.clone();
        let metrics_token = tasks_token.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_readiness, metrics_token).await;
        });

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        // Stop background tasks and wait for the watchers to exit.
        tasks_token.cancel();
        let _ = metrics_handle.await;
        info!("waiting for watchers to stop...");
        controller.shutdown().await;

        info!("DNS server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let config = DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            zones: vec!["example.com.".to_string()],
            apex: "dns1.kube-system".to_string(),
            secondary: None,
            hostmaster: "hostmaster".to_string(),
            ttl: 9999,
            ttl_soa: 60,
            fallthrough: None,
            resources: ResourceKind::default_order(),
            kubeconfig: None,
            kube_context: None,
        };

        let server = GatewayServer::new(config);
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
