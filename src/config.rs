//! Configuration types for k8s-gateway-dns.

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::GatewayError;

/// Upper bound for the answer TTL.
pub const MAX_TTL: u32 = 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones this server is authoritative for (e.g., "example.com.").
    pub zones: Vec<String>,

    /// Label under which the server's own nameserver records live
    /// (`<apex>.<zone>`). Conventionally the `<service>.<namespace>` of the
    /// Service exposing this server, so its glue can be answered from the
    /// service index.
    #[serde(default = "default_apex")]
    pub apex: String,

    /// Optional secondary nameserver label (`<secondary>.<zone>`).
    #[serde(default)]
    pub secondary: Option<String>,

    /// Hostmaster label used in the SOA RNAME.
    #[serde(default = "default_hostmaster")]
    pub hostmaster: String,

    /// TTL for answer records in seconds. Must be in [0, 3600].
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// TTL for SOA/NS records and self-address glue in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_soa: u32,

    /// Zone suffixes for which unresolved queries are handed to the next
    /// authority in the catalog chain instead of answered with NXDOMAIN.
    /// `None` disables fall-through; an empty list enables it everywhere.
    #[serde(default)]
    pub fallthrough: Option<Vec<String>>,

    /// Watched resource kinds in precedence order (highest first).
    #[serde(default = "ResourceKind::default_order")]
    pub resources: Vec<ResourceKind>,

    /// Path to an explicit kubeconfig. Default is the inferred (in-cluster
    /// or local) configuration.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Context override for an explicit kubeconfig.
    #[serde(default)]
    pub kube_context: Option<String>,
}

impl DnsConfig {
    /// Validate the configuration before anything starts.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.zones.is_empty() {
            return Err(GatewayError::Config(
                "at least one zone must be configured".to_string(),
            ));
        }
        for zone in &self.zones {
            Name::from_ascii(zone)
                .map_err(|e| GatewayError::Config(format!("invalid zone {zone:?}: {e}")))?;
        }
        if self.ttl > MAX_TTL {
            return Err(GatewayError::Config(format!(
                "ttl must be in range [0, {MAX_TTL}]: {}",
                self.ttl
            )));
        }
        if self.ttl_soa > MAX_TTL {
            return Err(GatewayError::Config(format!(
                "ttl_soa must be in range [0, {MAX_TTL}]: {}",
                self.ttl_soa
            )));
        }
        Name::from_ascii(&self.apex)
            .map_err(|e| GatewayError::Config(format!("invalid apex {:?}: {e}", self.apex)))?;
        if let Some(secondary) = &self.secondary {
            Name::from_ascii(secondary).map_err(|e| {
                GatewayError::Config(format!("invalid secondary {secondary:?}: {e}"))
            })?;
        }
        if let Some(zones) = &self.fallthrough {
            for zone in zones {
                Name::from_ascii(zone).map_err(|e| {
                    GatewayError::Config(format!("invalid fallthrough zone {zone:?}: {e}"))
                })?;
            }
        }
        if self.resources.is_empty() {
            return Err(GatewayError::Config(
                "resources must name at least one kind".to_string(),
            ));
        }
        Ok(())
    }
}

/// A watched resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Gateway-API HTTPRoute.
    #[serde(rename = "HTTPRoute")]
    HttpRoute,
    /// Gateway-API TLSRoute.
    #[serde(rename = "TLSRoute")]
    TlsRoute,
    /// Gateway-API GRPCRoute.
    #[serde(rename = "GRPCRoute")]
    GrpcRoute,
    /// nginx VirtualServer.
    VirtualServer,
    /// Kubernetes Ingress.
    Ingress,
    /// Kubernetes Service of type LoadBalancer.
    Service,
}

impl ResourceKind {
    /// The default precedence order, highest first.
    pub fn default_order() -> Vec<ResourceKind> {
        vec![
            ResourceKind::HttpRoute,
            ResourceKind::TlsRoute,
            ResourceKind::GrpcRoute,
            ResourceKind::VirtualServer,
            ResourceKind::Ingress,
            ResourceKind::Service,
        ]
    }

    /// The canonical kind name as it appears in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::HttpRoute => "HTTPRoute",
            ResourceKind::TlsRoute => "TLSRoute",
            ResourceKind::GrpcRoute => "GRPCRoute",
            ResourceKind::VirtualServer => "VirtualServer",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Service => "Service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTPRoute" => Ok(ResourceKind::HttpRoute),
            "TLSRoute" => Ok(ResourceKind::TlsRoute),
            "GRPCRoute" => Ok(ResourceKind::GrpcRoute),
            "VirtualServer" => Ok(ResourceKind::VirtualServer),
            "Ingress" => Ok(ResourceKind::Ingress),
            "Service" => Ok(ResourceKind::Service),
            other => Err(GatewayError::Config(format!(
                "unknown resource kind {other:?}"
            ))),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "k8s_gateway_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "k8s-gateway-dns".to_string()
}

fn default_apex() -> String {
    "dns1.kube-system".to_string()
}

fn default_hostmaster() -> String {
    "hostmaster".to_string()
}

fn default_ttl() -> u32 {
    60
}
