//! k8s-gateway-dns - An authoritative DNS server for Kubernetes workloads.
//!
//! This crate provides a DNS server that resolves the external hostnames
//! advertised by workload objects in a Kubernetes cluster (Ingresses,
//! LoadBalancer Services, Gateway-API routes, nginx VirtualServers) to the
//! public IP addresses at which the cluster exposes them. It watches the
//! cluster API and answers queries from live in-memory indexes.
//!
//! ## Features
//!
//! - Real-time answers via Kubernetes list+watch streams
//! - Per-kind hostname indexes with configurable precedence
//! - Apex SOA/NS synthesis with self-address glue
//! - Optional fall-through to a chained authority
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        k8s-gateway-dns                          │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Kubernetes       │───▶│ Hostname Indexes │                  │
//! │  │ watchers         │    │ (in-memory)      │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │         │                         │                             │
//! │         │ Watch:                  ▼                             │
//! │         │ - Ingress          ┌──────────────────┐              │
//! │         │ - Service          │ Resolver         │              │
//! │         │ - HTTPRoute        │ Registry         │              │
//! │         │ - TLSRoute         └────────┬─────────┘              │
//! │         │ - GRPCRoute                 │                         │
//! │         │ - VirtualServer             ▼                         │
//! │         │ - Gateway          ┌──────────────────┐              │
//! │         │                    │  Hickory DNS     │◀── UDP/TCP   │
//! │         │                    │  Server          │    :53       │
//! │         └───────────────────▶└──────────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! svc1.ns1.example.com
//!   → match configured zone example.com
//!   → try each kind in precedence order until one returns addresses
//!   → return A records with the workload's external IPs
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use k8s_gateway_dns::{DnsConfig, GatewayServer, ResourceKind};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "0.0.0.0:53".parse().unwrap(),
//!         zones: vec!["example.com.".to_string()],
//!         apex: "dns1.kube-system".to_string(),
//!         secondary: None,
//!         hostmaster: "hostmaster".to_string(),
//!         ttl: 60,
//!         ttl_soa: 60,
//!         fallthrough: None,
//!         resources: ResourceKind::default_order(),
//!         kubeconfig: None,
//!         kube_context: None,
//!     };
//!
//!     let shutdown = CancellationToken::new();
//!     let server = GatewayServer::new(config);
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod crd;
pub mod error;
pub mod index;
pub mod metrics;
pub mod resolver;
pub mod server;
pub mod telemetry;
pub mod watch;

// Re-export main types
pub use authority::{GatewayAuthority, SelfAddressCtx, SelfAddressFn};
pub use config::{Config, DnsConfig, ResourceKind, TelemetryConfig};
pub use error::GatewayError;
pub use resolver::ResolverRegistry;
pub use server::GatewayServer;
pub use watch::{KubeController, Readiness};
