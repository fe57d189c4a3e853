//! Typed views of the custom resources the server watches.
//!
//! Only the fields the indexers and resolvers read are modeled; unknown
//! fields in cluster objects are ignored during deserialization. Ingress and
//! Service come from `k8s-openapi` and are not redefined here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `status.addresses[].type` value for an IP literal.
pub const IP_ADDRESS_TYPE: &str = "IPAddress";

/// `status.addresses[].type` value for a DNS hostname.
pub const HOSTNAME_ADDRESS_TYPE: &str = "Hostname";

/// Reference from a route to the Gateway that exposes it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// Name of the referenced Gateway.
    pub name: String,

    /// Namespace of the referenced Gateway. Defaults to the route's own
    /// namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Optional listener section within the Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

/// Spec of a Gateway-API HTTPRoute.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRouteSpec {
    /// Hostnames the route matches.
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route attaches to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// Spec of a Gateway-API TLSRoute.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "TLSRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TLSRouteSpec {
    /// Hostnames the route matches (SNI).
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route attaches to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// Spec of a Gateway-API GRPCRoute.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1alpha2",
    kind = "GRPCRoute",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GRPCRouteSpec {
    /// Hostnames the route matches.
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Gateways the route attaches to.
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
}

/// Spec of a Gateway-API Gateway.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Name of the GatewayClass.
    #[serde(default)]
    pub gateway_class_name: String,
}

/// Status of a Gateway: the addresses at which it is reachable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Addresses bound to the Gateway.
    #[serde(default)]
    pub addresses: Vec<GatewayAddress>,
}

/// A single Gateway status address.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAddress {
    /// Address type: `IPAddress` or `Hostname`.
    #[serde(default = "default_address_type", rename = "type")]
    pub address_type: String,

    /// The address value.
    pub value: String,
}

fn default_address_type() -> String {
    IP_ADDRESS_TYPE.to_string()
}

/// Spec of an nginx VirtualServer.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "VirtualServer",
    namespaced,
    status = "VirtualServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerSpec {
    /// Host the VirtualServer serves.
    #[serde(default)]
    pub host: String,
}

/// Status of a VirtualServer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerStatus {
    /// External endpoints the VirtualServer is reachable at.
    #[serde(default)]
    pub external_endpoints: Vec<ExternalEndpoint>,
}

/// A single VirtualServer external endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEndpoint {
    /// IP address of the endpoint.
    #[serde(default)]
    pub ip: String,

    /// Exposed ports, unused here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
}

/// Common shape of the three Gateway-API route kinds.
pub trait Route: kube::ResourceExt {
    /// Hostnames the route matches.
    fn hostnames(&self) -> &[String];

    /// Gateways the route attaches to.
    fn parent_refs(&self) -> &[ParentReference];
}

impl Route for HTTPRoute {
    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }
}

impl Route for TLSRoute {
    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }
}

impl Route for GRPCRoute {
    fn hostnames(&self) -> &[String] {
        &self.spec.hostnames
    }

    fn parent_refs(&self) -> &[ParentReference] {
        &self.spec.parent_refs
    }
}
