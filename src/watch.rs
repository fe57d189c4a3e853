//! Kubernetes watchers feeding the hostname indexes.
//!
//! One watch task per enabled resource kind, each owning a
//! [`ResourceIndex`]. Optional kinds (Gateway-API routes, VirtualServer) are
//! gated on a CRD-presence probe at startup. The [`KubeController`] owns the
//! task set and publishes a single monotonic `synced` flag once every index
//! has completed its initial list.

use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hickory_proto::rr::Name;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

use crate::config::{DnsConfig, ResourceKind};
use crate::crd::{Gateway, GRPCRoute, HTTPRoute, Route, TLSRoute, VirtualServer};
use crate::error::GatewayError;
use crate::index::ResourceIndex;
use crate::metrics;
use crate::resolver::{
    IngressResolver, ResolverRegistry, RouteResolver, ServiceResolver, VirtualServerResolver,
};

/// Annotation overriding a Service's default `<name>.<namespace>` hostname.
pub const HOSTNAME_ANNOTATION: &str = "coredns.io/hostname";

/// Fallback hostname annotation shared with external-dns.
pub const EXTERNAL_DNS_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";

// RFC 1123 subdomain, as enforced for metadata labels upstream.
static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});

/// Index keys for an Ingress: each `spec.rules[].host`.
pub fn ingress_index_keys(ingress: &Ingress) -> Vec<String> {
    let mut hostnames = Vec::new();
    let rules = ingress.spec.as_ref().and_then(|spec| spec.rules.as_ref());
    for rule in rules.into_iter().flatten() {
        if let Some(host) = rule.host.as_deref().filter(|h| !h.is_empty()) {
            debug!(host, ingress = %ingress.name_any(), "adding ingress index key");
            hostnames.push(host.to_ascii_lowercase());
        }
    }
    hostnames
}

/// Index keys for a Service: `<name>.<namespace>`, overridden by a valid
/// hostname annotation. Only `type=LoadBalancer` services are indexed.
pub fn service_index_keys(service: &Service) -> Vec<String> {
    let service_type = service.spec.as_ref().and_then(|spec| spec.type_.as_deref());
    if service_type != Some("LoadBalancer") {
        return Vec::new();
    }

    let hostname = service_annotation_hostname(service, HOSTNAME_ANNOTATION)
        .or_else(|| service_annotation_hostname(service, EXTERNAL_DNS_ANNOTATION))
        .unwrap_or_else(|| {
            format!(
                "{}.{}",
                service.name_any(),
                service.namespace().unwrap_or_default()
            )
            .to_ascii_lowercase()
        });

    debug!(hostname = %hostname, service = %service.name_any(), "adding service index key");
    vec![hostname]
}

fn service_annotation_hostname(service: &Service, annotation: &str) -> Option<String> {
    let value = service.metadata.annotations.as_ref()?.get(annotation)?;
    if Name::from_ascii(value).is_err() {
        info!(value = %value, annotation, "invalid FQDN in hostname annotation");
        return None;
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        info!(value = %value, annotation, "RFC 1123 conformance failed for hostname annotation");
        return None;
    }
    Some(value.to_ascii_lowercase())
}

/// Index keys for a Gateway-API route: each `spec.hostnames` entry.
pub fn route_index_keys<R: Route>(route: &R) -> Vec<String> {
    route
        .hostnames()
        .iter()
        .filter(|hostname| !hostname.is_empty())
        .map(|hostname| {
            debug!(hostname = %hostname, route = %route.name_any(), "adding route index key");
            hostname.to_ascii_lowercase()
        })
        .collect()
}

/// Index keys for a VirtualServer: `spec.host`.
pub fn virtual_server_index_keys(vs: &VirtualServer) -> Vec<String> {
    if vs.spec.host.is_empty() {
        return Vec::new();
    }
    debug!(host = %vs.spec.host, virtual_server = %vs.name_any(), "adding VirtualServer index key");
    vec![vs.spec.host.to_ascii_lowercase()]
}

/// Index key for a Gateway: `<namespace>/<name>`, dereferenced by route
/// parentRefs rather than queried by hostname.
pub fn gateway_index_keys(gateway: &Gateway) -> Vec<String> {
    vec![format!(
        "{}/{}",
        gateway.namespace().unwrap_or_default(),
        gateway.name_any()
    )]
}

/// Probe whether a CRD-backed kind is present and accessible by issuing a
/// cluster-wide list. Any failure disables the kind without surfacing an
/// error.
async fn crd_present<T>(client: &Client, resource_name: &str, api_group: &str) -> bool
where
    T: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let api = Api::<T>::all(client.clone());
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => true,
        Err(kube::Error::Api(err)) if err.code == 404 => {
            info!(
                "{resource_name} CRDs are not found. Not syncing {resource_name} resources."
            );
            false
        }
        Err(kube::Error::Api(err)) if err.code == 403 => {
            info!(
                "access to `{api_group}` is forbidden, please check RBAC. \
                 Not syncing {resource_name} resources."
            );
            false
        }
        Err(err) => {
            info!(
                "encountered unexpected error {err:?}. Not syncing {resource_name} resources."
            );
            false
        }
    }
}

/// Block until the API server's readiness endpoint reports success, logging
/// each attempt. Returns `false` if shutdown was requested first.
pub(crate) async fn wait_api_ready(
    client: &Client,
    shutdown: &CancellationToken,
) -> Result<bool, GatewayError> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(false);
        }
        info!("waiting for api-server to become ready");
        let request = http::Request::get("/readyz")
            .body(Vec::new())
            .map_err(|e| GatewayError::Config(format!("readiness request: {e}")))?;
        match client.request_text(request).await {
            Ok(_) => {
                info!("api-server ready, proceeding");
                return Ok(true);
            }
            Err(err) => {
                info!(%err, "api-server not ready, retrying");
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(false),
            _ = sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// Drive one watch stream into its index until shutdown.
async fn watch_resource<T>(api: Api<T>, index: ResourceIndex<T>, shutdown: CancellationToken)
where
    T: kube::Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let kind = index.kind();
    info!(kind, "starting watcher");
    let mut stream = pin!(watcher::watcher(api, watcher::Config::default()).default_backoff());

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(kind, "watcher shutting down");
                return;
            }

            event = stream.next() => match event {
                Some(Ok(Event::Init)) => {
                    index.begin_relist();
                    metrics::record_watch_event(kind, "init");
                }
                Some(Ok(Event::InitApply(object))) => {
                    index.relist_apply(object);
                    metrics::record_watch_event(kind, "init_apply");
                }
                Some(Ok(Event::InitDone)) => {
                    index.relist_done();
                    metrics::record_watch_event(kind, "init_done");
                    info!(kind, objects = index.len(), "initial list complete");
                }
                Some(Ok(Event::Apply(object))) => {
                    index.apply(object);
                    metrics::record_watch_event(kind, "apply");
                }
                Some(Ok(Event::Delete(object))) => {
                    index.delete(&object);
                    metrics::record_watch_event(kind, "delete");
                }
                Some(Err(err)) => {
                    warn!(kind, %err, "watch stream error, backing off");
                    metrics::record_watch_error(kind);
                }
                None => {
                    warn!(kind, "watch stream ended");
                    return;
                }
            }
        }
    }
}

type SyncCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Shared readiness signal. The flag is written once, after every index has
/// completed its initial list, and stays true from then on.
#[derive(Clone)]
pub struct Readiness {
    synced: Arc<AtomicBool>,
    checks: Arc<Vec<SyncCheck>>,
}

impl Readiness {
    fn new(checks: Vec<SyncCheck>) -> Self {
        Self {
            synced: Arc::new(AtomicBool::new(false)),
            checks: Arc::new(checks),
        }
    }

    /// A readiness that is always synced. Test hook.
    pub fn ready() -> Self {
        let readiness = Self::new(Vec::new());
        readiness.synced.store(true, Ordering::Release);
        readiness
    }

    /// A readiness that never syncs. Test hook.
    pub fn pending() -> Self {
        Self::new(vec![Box::new(|| false)])
    }

    /// True once all indexes completed their initial list. Monotonic.
    pub fn has_synced(&self) -> bool {
        if self.synced.load(Ordering::Acquire) {
            return true;
        }
        if self.checks.iter().all(|check| check()) {
            self.synced.store(true, Ordering::Release);
            return true;
        }
        false
    }
}

/// Owns the watcher task set and the readiness flag.
pub struct KubeController {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    readiness: Readiness,
}

impl KubeController {
    /// Build all informers for the kinds enabled in the configuration,
    /// probing optional CRDs first, and return the controller together with
    /// the resolver registry wired in precedence order.
    pub async fn build(
        client: Client,
        config: &DnsConfig,
        shutdown: CancellationToken,
    ) -> (KubeController, ResolverRegistry) {
        info!("building k8s-gateway-dns controller");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut checks: Vec<SyncCheck> = Vec::new();
        let mut registry = ResolverRegistry::new();

        let route_kinds_enabled = config.resources.iter().any(|kind| {
            matches!(
                kind,
                ResourceKind::HttpRoute | ResourceKind::TlsRoute | ResourceKind::GrpcRoute
            )
        });

        let gateways_present = route_kinds_enabled
            && crd_present::<Gateway>(&client, "GatewayAPI", "gateway.networking.k8s.io").await;
        let virtual_servers_present = config.resources.contains(&ResourceKind::VirtualServer)
            && crd_present::<VirtualServer>(&client, "VirtualServer", "k8s.nginx.org/v1").await;

        let gateway_index = if gateways_present {
            let index = ResourceIndex::new("Gateway", gateway_index_keys);
            spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
            Some(index)
        } else {
            None
        };

        for kind in &config.resources {
            match kind {
                ResourceKind::Ingress => {
                    let index = ResourceIndex::new("Ingress", ingress_index_keys);
                    spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                    registry.register(Arc::new(IngressResolver::new(index)));
                }
                ResourceKind::Service => {
                    let index = ResourceIndex::new("Service", service_index_keys);
                    spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                    registry.register(Arc::new(ServiceResolver::new(index)));
                }
                ResourceKind::HttpRoute => {
                    if let Some(gateways) = &gateway_index {
                        let index =
                            ResourceIndex::new("HTTPRoute", route_index_keys::<HTTPRoute>);
                        spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                        registry.register(Arc::new(RouteResolver::new(
                            *kind,
                            index,
                            gateways.clone(),
                        )));
                    }
                }
                ResourceKind::TlsRoute => {
                    if let Some(gateways) = &gateway_index {
                        let index = ResourceIndex::new("TLSRoute", route_index_keys::<TLSRoute>);
                        spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                        registry.register(Arc::new(RouteResolver::new(
                            *kind,
                            index,
                            gateways.clone(),
                        )));
                    }
                }
                ResourceKind::GrpcRoute => {
                    if let Some(gateways) = &gateway_index {
                        let index =
                            ResourceIndex::new("GRPCRoute", route_index_keys::<GRPCRoute>);
                        spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                        registry.register(Arc::new(RouteResolver::new(
                            *kind,
                            index,
                            gateways.clone(),
                        )));
                    }
                }
                ResourceKind::VirtualServer => {
                    if virtual_servers_present {
                        let index =
                            ResourceIndex::new("VirtualServer", virtual_server_index_keys);
                        spawn_watch(&client, &index, &shutdown, &mut tasks, &mut checks);
                        registry.register(Arc::new(VirtualServerResolver::new(index)));
                    }
                }
            }
        }

        let readiness = Readiness::new(checks);

        // Announce sync completion once, the moment every index reports in.
        let waiter_readiness = readiness.clone();
        let waiter_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            info!("waiting for informers to sync");
            loop {
                if waiter_readiness.has_synced() {
                    info!("synced all required resources");
                    metrics::record_ready(true);
                    return;
                }
                tokio::select! {
                    _ = waiter_shutdown.cancelled() => return,
                    _ = sleep(Duration::from_millis(100)) => {}
                }
            }
        }));

        (
            KubeController {
                shutdown,
                tasks,
                readiness,
            },
            registry,
        )
    }

    /// A cloneable handle to the sync flag for the query path.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// True once all informers completed their initial list. Monotonic.
    pub fn has_synced(&self) -> bool {
        self.readiness.has_synced()
    }

    /// Readiness alias for health endpoints.
    pub fn ready(&self) -> bool {
        self.has_synced()
    }

    /// Stop all watcher tasks and wait for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn spawn_watch<T>(
    client: &Client,
    index: &ResourceIndex<T>,
    shutdown: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
    checks: &mut Vec<SyncCheck>,
) where
    T: kube::Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api = Api::<T>::all(client.clone());
    tasks.push(tokio::spawn(watch_resource(
        api,
        index.clone(),
        shutdown.clone(),
    )));
    let index = index.clone();
    checks.push(Box::new(move || index.has_synced()));
}
