//! Shared test infrastructure for catalog-level integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{
    AuthLookup, Authority, AuthorityObject, Catalog, LookupControlFlow, LookupError,
    LookupOptions, LookupRecords, MessageRequest, MessageResponse, UpdateResult, ZoneType,
};
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, RequestInfo, ResponseHandler, ResponseInfo};

use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Service, ServiceSpec, ServiceStatus,
};
use k8s_openapi::api::networking::v1::{
    Ingress, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule, IngressSpec,
    IngressStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use k8s_gateway_dns::authority::{a_records, GatewayAuthority, SelfAddressCtx, SelfAddressFn};
use k8s_gateway_dns::config::{DnsConfig, ResourceKind};
use k8s_gateway_dns::crd::{
    ExternalEndpoint, GRPCRoute, Gateway, GatewayAddress, GatewaySpec, GatewayStatus, HTTPRoute,
    HTTPRouteSpec, ParentReference, TLSRoute, VirtualServer, VirtualServerSpec,
    VirtualServerStatus, IP_ADDRESS_TYPE,
};
use k8s_gateway_dns::index::ResourceIndex;
use k8s_gateway_dns::resolver::{
    IngressResolver, ResolverRegistry, RouteResolver, ServiceResolver, VirtualServerResolver,
};
use k8s_gateway_dns::watch::{self, Readiness};

// --- Constants ---

pub const ZONE: &str = "example.com.";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `Catalog::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zones: vec![ZONE.to_string()],
        apex: "dns1.kube-system".to_string(),
        secondary: None,
        hostmaster: "hostmaster".to_string(),
        ttl: 60,
        ttl_soa: 60,
        fallthrough: None,
        resources: ResourceKind::default_order(),
        kubeconfig: None,
        kube_context: None,
    }
}

pub fn test_dns_config_with_secondary() -> DnsConfig {
    DnsConfig {
        secondary: Some("dns2.kube-system".to_string()),
        ..test_dns_config()
    }
}

// --- Workload object fixtures ---

fn meta(name: &str, ns: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        ..Default::default()
    }
}

pub fn lb_service(name: &str, ns: &str, ips: &[&str]) -> Service {
    Service {
        metadata: meta(name, ns),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ..Default::default()
        }),
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    ips.iter()
                        .map(|ip| LoadBalancerIngress {
                            ip: Some((*ip).to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            ..Default::default()
        }),
    }
}

pub fn ingress(name: &str, ns: &str, hosts: &[&str], ips: &[&str]) -> Ingress {
    Ingress {
        metadata: meta(name, ns),
        spec: Some(IngressSpec {
            rules: Some(
                hosts
                    .iter()
                    .map(|host| IngressRule {
                        host: Some((*host).to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus {
                ingress: Some(
                    ips.iter()
                        .map(|ip| IngressLoadBalancerIngress {
                            ip: Some((*ip).to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
        }),
    }
}

pub fn virtual_server(name: &str, ns: &str, host: &str, ips: &[&str]) -> VirtualServer {
    VirtualServer {
        metadata: meta(name, ns),
        spec: VirtualServerSpec {
            host: host.to_string(),
        },
        status: Some(VirtualServerStatus {
            external_endpoints: ips
                .iter()
                .map(|ip| ExternalEndpoint {
                    ip: (*ip).to_string(),
                    ports: None,
                })
                .collect(),
        }),
    }
}

pub fn http_route(name: &str, ns: &str, hostnames: &[&str], gateway: (&str, &str)) -> HTTPRoute {
    HTTPRoute {
        metadata: meta(name, ns),
        spec: HTTPRouteSpec {
            hostnames: hostnames.iter().map(|h| (*h).to_string()).collect(),
            parent_refs: vec![ParentReference {
                name: gateway.1.to_string(),
                namespace: Some(gateway.0.to_string()),
                section_name: None,
            }],
        },
    }
}

pub fn gateway(name: &str, ns: &str, ips: &[&str]) -> Gateway {
    Gateway {
        metadata: meta(name, ns),
        spec: GatewaySpec::default(),
        status: Some(GatewayStatus {
            addresses: ips
                .iter()
                .map(|ip| GatewayAddress {
                    address_type: IP_ADDRESS_TYPE.to_string(),
                    value: (*ip).to_string(),
                })
                .collect(),
        }),
    }
}

// --- Cluster state builder ---

/// Synced indexes for every kind, with helpers to seed objects and build a
/// resolver registry in a given precedence order.
pub struct TestCluster {
    pub services: ResourceIndex<Service>,
    pub ingresses: ResourceIndex<Ingress>,
    pub virtual_servers: ResourceIndex<VirtualServer>,
    pub http_routes: ResourceIndex<HTTPRoute>,
    pub tls_routes: ResourceIndex<TLSRoute>,
    pub grpc_routes: ResourceIndex<GRPCRoute>,
    pub gateways: ResourceIndex<Gateway>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            services: ResourceIndex::new("Service", watch::service_index_keys),
            ingresses: ResourceIndex::new("Ingress", watch::ingress_index_keys),
            virtual_servers: ResourceIndex::new(
                "VirtualServer",
                watch::virtual_server_index_keys,
            ),
            http_routes: ResourceIndex::new("HTTPRoute", watch::route_index_keys::<HTTPRoute>),
            tls_routes: ResourceIndex::new("TLSRoute", watch::route_index_keys::<TLSRoute>),
            grpc_routes: ResourceIndex::new("GRPCRoute", watch::route_index_keys::<GRPCRoute>),
            gateways: ResourceIndex::new("Gateway", watch::gateway_index_keys),
        }
    }

    /// Build a registry over this cluster's indexes in the given order.
    pub fn registry(&self, order: &[ResourceKind]) -> ResolverRegistry {
        let mut registry = ResolverRegistry::new();
        for kind in order {
            match kind {
                ResourceKind::HttpRoute => registry.register(Arc::new(RouteResolver::new(
                    *kind,
                    self.http_routes.clone(),
                    self.gateways.clone(),
                ))),
                ResourceKind::TlsRoute => registry.register(Arc::new(RouteResolver::new(
                    *kind,
                    self.tls_routes.clone(),
                    self.gateways.clone(),
                ))),
                ResourceKind::GrpcRoute => registry.register(Arc::new(RouteResolver::new(
                    *kind,
                    self.grpc_routes.clone(),
                    self.gateways.clone(),
                ))),
                ResourceKind::VirtualServer => registry.register(Arc::new(
                    VirtualServerResolver::new(self.virtual_servers.clone()),
                )),
                ResourceKind::Ingress => {
                    registry.register(Arc::new(IngressResolver::new(self.ingresses.clone())))
                }
                ResourceKind::Service => {
                    registry.register(Arc::new(ServiceResolver::new(self.services.clone())))
                }
            }
        }
        registry
    }
}

// --- Authority / catalog builders ---

pub fn build_authority(config: DnsConfig, cluster: &TestCluster) -> GatewayAuthority {
    let registry = cluster.registry(&config.resources);
    GatewayAuthority::new(
        Arc::new(config),
        ZONE,
        Arc::new(registry),
        Readiness::ready(),
    )
    .expect("failed to create GatewayAuthority")
}

pub fn build_catalog(authority: GatewayAuthority) -> Catalog {
    let origin = Authority::origin(&authority).clone();
    let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
    let mut catalog = Catalog::new();
    catalog.upsert(origin, vec![authority]);
    catalog
}

/// Catalog with a sentinel authority chained after the gateway authority,
/// standing in for the next handler a fall-through hands queries to.
pub fn build_catalog_with_next(authority: GatewayAuthority, next_ip: &str) -> Catalog {
    let origin = Authority::origin(&authority).clone();
    let next = NextAuthority::new(origin.clone(), next_ip.parse().unwrap());
    let mut catalog = Catalog::new();
    catalog.upsert(
        origin,
        vec![
            Arc::new(authority) as Arc<dyn AuthorityObject>,
            Arc::new(next) as Arc<dyn AuthorityObject>,
        ],
    );
    catalog
}

/// Sentinel next-in-chain authority answering every query with one fixed A
/// record owned by the query name.
pub struct NextAuthority {
    origin: LowerName,
    addr: Ipv4Addr,
}

impl NextAuthority {
    pub fn new(origin: LowerName, addr: Ipv4Addr) -> Self {
        Self { origin, addr }
    }
}

#[async_trait]
impl Authority for NextAuthority {
    type Lookup = AuthLookup;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        _rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let owner = Name::from(name.clone());
        let mut record = Record::from_rdata(
            owner.clone(),
            60,
            RData::A(hickory_proto::rr::rdata::A::from(self.addr)),
        );
        record.set_dns_class(DNSClass::IN);
        let mut record_set = RecordSet::new(owner, RecordType::A, 0);
        record_set.insert(record, 0);
        LookupControlFlow::Break(Ok(AuthLookup::Records {
            answers: LookupRecords::new(lookup_options, Arc::new(record_set)),
            additionals: None,
        }))
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        Authority::lookup(
            self,
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        Err(ResponseCode::NotImp)
    }
}

// --- Self-address test doubles ---

pub fn self_address_fixed(ip: &str) -> SelfAddressFn {
    let addr: IpAddr = ip.parse().unwrap();
    Arc::new(move |_ctx: SelfAddressCtx| {
        async move {
            let owner = Name::from_ascii("dns1.kube-system.example.com.").unwrap();
            a_records(&owner, &[addr], 60)
        }
        .boxed()
    })
}

pub fn self_address_dual(primary: &str, secondary: &str) -> SelfAddressFn {
    let primary: IpAddr = primary.parse().unwrap();
    let secondary: IpAddr = secondary.parse().unwrap();
    Arc::new(move |ctx: SelfAddressCtx| {
        let qtype = ctx.qtype;
        async move {
            let owner = Name::from_ascii("dns1.kube-system.example.com.").unwrap();
            let mut records = a_records(&owner, &[primary], 60);
            if qtype == RecordType::NS {
                let owner = Name::from_ascii("dns2.kube-system.example.com.").unwrap();
                records.extend(a_records(&owner, &[secondary], 60));
            }
            records
        }
        .boxed()
    })
}

/// A self-address callback that never returns records.
pub fn self_address_none() -> SelfAddressFn {
    Arc::new(move |_ctx: SelfAddressCtx| async move { Vec::new() }.boxed())
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request`.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Extract A record addresses from a response's answer section.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract A record addresses from a response's additional section.
pub fn extract_additional_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.additionals()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract NS target names from a response's answer section.
pub fn extract_ns_names(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::NS(ns) => Some(ns.0.to_string()),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}

/// Assert the fixed SOA schema this server synthesizes.
pub fn assert_soa_fields(soa: &SOA) {
    assert_eq!(soa.serial(), 12345);
    assert_eq!(soa.refresh(), 7200);
    assert_eq!(soa.retry(), 1800);
    assert_eq!(soa.expire(), 86400);
    assert_eq!(soa.minimum(), 60);
    assert_eq!(soa.mname().to_string(), "dns1.kube-system.example.com.");
    assert_eq!(
        soa.rname().to_string(),
        "hostmaster.dns1.kube-system.example.com."
    );
}

/// Assert the authority section carries exactly one SOA with the fixed
/// schema.
pub fn assert_soa_authority(msg: &Message) {
    let soas: Vec<&SOA> = msg
        .name_servers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SOA(soa) => Some(soa),
            _ => None,
        })
        .collect();
    assert_eq!(
        soas.len(),
        1,
        "expected exactly one SOA in authority, got: {:?}",
        msg.name_servers()
    );
    assert_soa_fields(soas[0]);
}

pub fn ipv4(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}
