//! Ordered resolution from hostname index keys to workload addresses.
//!
//! One [`KindResolver`] per watched kind, held by a [`ResolverRegistry`] in
//! precedence order. The first kind returning at least one address wins;
//! results are never merged across kinds.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use crate::config::ResourceKind;
use crate::crd::{Gateway, Route, VirtualServer, HOSTNAME_ADDRESS_TYPE, IP_ADDRESS_TYPE};
use crate::index::ResourceIndex;

/// Resolves index keys to addresses for one resource kind.
#[async_trait]
pub trait KindResolver: Send + Sync {
    /// The kind this resolver serves.
    fn kind(&self) -> ResourceKind;

    /// Addresses of the workloads indexed under any of the given keys.
    /// Keys are matched case-insensitively; an empty result means no match.
    async fn resolve(&self, keys: &[String]) -> Vec<IpAddr>;
}

/// Ordered set of per-kind resolvers. Built once at startup, before queries
/// are served, and never mutated afterwards.
#[derive(Default)]
pub struct ResolverRegistry {
    entries: Vec<Arc<dyn KindResolver>>,
}

impl ResolverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver at the lowest precedence so far.
    pub fn register(&mut self, resolver: Arc<dyn KindResolver>) {
        self.entries.push(resolver);
    }

    /// The registered kinds in precedence order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.entries.iter().map(|e| e.kind()).collect()
    }

    /// Resolve the keys against each kind in precedence order, stopping at
    /// the first kind that returns any address.
    pub async fn resolve(&self, keys: &[String]) -> Vec<IpAddr> {
        for entry in &self.entries {
            let addrs = entry.resolve(keys).await;
            if !addrs.is_empty() {
                debug!(kind = %entry.kind(), count = addrs.len(), "resolved addresses");
                return addrs;
            }
        }
        Vec::new()
    }

    /// Union of the keys' addresses across all kinds. Used by the
    /// self-address path, which gathers every address the apex label is
    /// known under.
    pub async fn collect(&self, keys: &[String]) -> Vec<IpAddr> {
        let mut addrs = Vec::new();
        for entry in &self.entries {
            addrs.extend(entry.resolve(keys).await);
        }
        addrs
    }
}

/// Resolve a status hostname via the system resolver. Failures contribute no
/// addresses.
async fn resolve_hostname(hostname: &str) -> Vec<IpAddr> {
    match tokio::net::lookup_host((hostname, 0u16)).await {
        Ok(addrs) => addrs.map(|sockaddr| sockaddr.ip()).collect(),
        Err(err) => {
            debug!(%hostname, %err, "hostname lookup failed");
            Vec::new()
        }
    }
}

/// Addresses of one load-balancer status entry: the IP literal when present,
/// otherwise the resolved hostname.
async fn lb_entry_addrs(ip: Option<&str>, hostname: Option<&str>) -> Vec<IpAddr> {
    if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
        return ip.parse().ok().into_iter().collect();
    }
    if let Some(hostname) = hostname.filter(|h| !h.is_empty()) {
        return resolve_hostname(hostname).await;
    }
    Vec::new()
}

fn lowercased(keys: &[String]) -> Vec<String> {
    keys.iter().map(|k| k.to_ascii_lowercase()).collect()
}

/// Resolver over LoadBalancer Services.
pub struct ServiceResolver {
    index: ResourceIndex<Service>,
}

impl ServiceResolver {
    /// Create a resolver over the given service index.
    pub fn new(index: ResourceIndex<Service>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl KindResolver for ServiceResolver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn resolve(&self, keys: &[String]) -> Vec<IpAddr> {
        let mut services = Vec::new();
        for key in lowercased(keys) {
            services.extend(self.index.get(&key));
        }
        debug!(count = services.len(), "matching Service objects");

        let mut addrs = Vec::new();
        for service in services {
            if let Some(external_ips) = service.spec.as_ref().and_then(|s| s.external_ips.as_ref())
            {
                if !external_ips.is_empty() {
                    // Explicit externalIPs override the load-balancer status
                    // entirely.
                    return external_ips
                        .iter()
                        .filter_map(|ip| ip.parse().ok())
                        .collect();
                }
            }

            let entries = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref());
            for entry in entries.into_iter().flatten() {
                addrs.extend(lb_entry_addrs(entry.ip.as_deref(), entry.hostname.as_deref()).await);
            }
        }
        addrs
    }
}

/// Resolver over Ingresses.
pub struct IngressResolver {
    index: ResourceIndex<Ingress>,
}

impl IngressResolver {
    /// Create a resolver over the given ingress index.
    pub fn new(index: ResourceIndex<Ingress>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl KindResolver for IngressResolver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn resolve(&self, keys: &[String]) -> Vec<IpAddr> {
        let mut ingresses = Vec::new();
        for key in lowercased(keys) {
            ingresses.extend(self.index.get(&key));
        }
        debug!(count = ingresses.len(), "matching Ingress objects");

        let mut addrs = Vec::new();
        for ingress in ingresses {
            let entries = ingress
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref());
            for entry in entries.into_iter().flatten() {
                addrs.extend(lb_entry_addrs(entry.ip.as_deref(), entry.hostname.as_deref()).await);
            }
        }
        addrs
    }
}

/// Resolver over nginx VirtualServers.
pub struct VirtualServerResolver {
    index: ResourceIndex<VirtualServer>,
}

impl VirtualServerResolver {
    /// Create a resolver over the given VirtualServer index.
    pub fn new(index: ResourceIndex<VirtualServer>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl KindResolver for VirtualServerResolver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VirtualServer
    }

    async fn resolve(&self, keys: &[String]) -> Vec<IpAddr> {
        let mut virtual_servers = Vec::new();
        for key in lowercased(keys) {
            virtual_servers.extend(self.index.get(&key));
        }
        debug!(count = virtual_servers.len(), "matching VirtualServer objects");

        let mut addrs = Vec::new();
        for vs in virtual_servers {
            for endpoint in vs
                .status
                .iter()
                .flat_map(|status| &status.external_endpoints)
            {
                if let Ok(addr) = endpoint.ip.parse::<IpAddr>() {
                    addrs.push(addr);
                }
            }
        }
        addrs
    }
}

/// Resolver over one Gateway-API route kind. Routes index by hostname but
/// carry no addresses; each match is dereferenced through `parentRefs` into
/// the Gateway index at query time.
pub struct RouteResolver<R> {
    kind: ResourceKind,
    routes: ResourceIndex<R>,
    gateways: ResourceIndex<Gateway>,
}

impl<R: Route> RouteResolver<R> {
    /// Create a resolver over the given route and gateway indexes.
    pub fn new(
        kind: ResourceKind,
        routes: ResourceIndex<R>,
        gateways: ResourceIndex<Gateway>,
    ) -> Self {
        Self {
            kind,
            routes,
            gateways,
        }
    }
}

#[async_trait]
impl<R: Route + Send + Sync + 'static> KindResolver for RouteResolver<R> {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn resolve(&self, keys: &[String]) -> Vec<IpAddr> {
        let mut routes = Vec::new();
        for key in lowercased(keys) {
            routes.extend(self.routes.get(&key));
        }
        debug!(kind = %self.kind, count = routes.len(), "matching route objects");

        let mut addrs = Vec::new();
        for route in routes {
            let route_namespace = route.namespace().unwrap_or_default();
            for parent_ref in route.parent_refs() {
                let namespace = parent_ref
                    .namespace
                    .as_deref()
                    .unwrap_or(&route_namespace);
                let gateway_key = format!("{}/{}", namespace, parent_ref.name);
                let gateways = self.gateways.get(&gateway_key);
                debug!(key = %gateway_key, count = gateways.len(), "matching gateway objects");
                for gateway in gateways {
                    addrs.extend(gateway_addrs(&gateway).await);
                }
            }
        }
        addrs
    }
}

/// Addresses bound to a Gateway: IP literals parsed directly, hostnames
/// resolved via the system resolver.
async fn gateway_addrs(gateway: &Gateway) -> Vec<IpAddr> {
    let mut addrs = Vec::new();
    let Some(status) = &gateway.status else {
        return addrs;
    };
    for address in &status.addresses {
        match address.address_type.as_str() {
            IP_ADDRESS_TYPE => {
                if let Ok(addr) = address.value.parse::<IpAddr>() {
                    addrs.push(addr);
                }
            }
            HOSTNAME_ADDRESS_TYPE => {
                addrs.extend(resolve_hostname(&address.value).await);
            }
            _ => {}
        }
    }
    addrs
}
