//! Hickory DNS authority answering from the workload indexes.
//!
//! One `GatewayAuthority` is registered in the catalog per configured zone.
//! A query is routed through three states: the zone apex (SOA/NS synthesis),
//! the synthetic nameserver subtree under `<apex>.<zone>` (self-address
//! records with label arithmetic), and everything else (ordered resource
//! resolution). Unresolved names inside a fall-through zone are handed to
//! the next authority in the catalog chain via `LookupControlFlow::Continue`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, NS, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    AuthLookup, Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords,
    MessageRequest, UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::config::DnsConfig;
use crate::error::GatewayError;
use crate::metrics::{self, QueryResult, Timer};
use crate::resolver::ResolverRegistry;
use crate::watch::Readiness;

const SOA_SERIAL: u32 = 12345;
const SOA_REFRESH: i32 = 7200;
const SOA_RETRY: i32 = 1800;
const SOA_EXPIRE: i32 = 86400;

/// Query context handed to the self-address callback.
pub struct SelfAddressCtx {
    /// Query name, original case preserved.
    pub qname: Name,
    /// Query type.
    pub qtype: RecordType,
    /// The zone the query fell into.
    pub zone: Name,
}

/// Pluggable source of the server's own addresses, used to answer apex NS
/// glue and queries for the nameserver hosts themselves.
pub type SelfAddressFn =
    Arc<dyn Fn(SelfAddressCtx) -> BoxFuture<'static, Vec<Record>> + Send + Sync>;

/// Default self-address: look the apex label up across all kinds and emit A
/// records owned by the query name; on NS queries also look up the secondary
/// label for its glue.
pub fn default_self_address(registry: Arc<ResolverRegistry>, config: &DnsConfig) -> SelfAddressFn {
    let apex = config.apex.to_ascii_lowercase();
    let secondary = config.secondary.as_ref().map(|s| s.to_ascii_lowercase());
    let ttl = config.ttl;
    Arc::new(move |ctx: SelfAddressCtx| {
        let registry = Arc::clone(&registry);
        let apex = apex.clone();
        let secondary = secondary.clone();
        async move {
            let addrs = registry.collect(&[apex]).await;
            let mut records = a_records(&ctx.qname, &addrs, ttl);

            if ctx.qtype == RecordType::NS {
                if let Some(label) = secondary {
                    let addrs = registry.collect(&[label.clone()]).await;
                    if let Ok(owner) =
                        Name::from_ascii(&label).and_then(|name| name.append_domain(&ctx.zone))
                    {
                        records.extend(a_records(&owner, &addrs, ttl));
                    }
                }
            }
            records
        }
        .boxed()
    })
}

/// Build one A record per unique IPv4 address. Duplicates are collapsed by
/// canonical address equality; IPv6 addresses are parsed upstream but never
/// answered.
pub fn a_records(owner: &Name, addrs: &[IpAddr], ttl: u32) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for addr in addrs {
        if !seen.insert(*addr) {
            continue;
        }
        let IpAddr::V4(v4) = addr else {
            continue;
        };
        let mut record = Record::from_rdata(owner.clone(), ttl, RData::A(A::from(*v4)));
        record.set_dns_class(DNSClass::IN);
        records.push(record);
    }
    records
}

/// Group records into per-(name, type) record sets for a lookup answer.
fn record_sets(records: Vec<Record>) -> Vec<Arc<RecordSet>> {
    let mut sets: Vec<RecordSet> = Vec::new();
    for record in records {
        match sets
            .iter_mut()
            .find(|set| set.name() == record.name() && set.record_type() == record.record_type())
        {
            Some(set) => {
                set.insert(record, 0);
            }
            None => {
                let mut set = RecordSet::new(record.name().clone(), record.record_type(), 0);
                set.insert(record, 0);
                sets.push(set);
            }
        }
    }
    sets.into_iter().map(Arc::new).collect()
}

/// Strip the single closing dot unless the name is the root.
fn strip_closing_dot(name: &str) -> &str {
    if name.len() > 1 {
        name.strip_suffix('.').unwrap_or(name)
    } else {
        name
    }
}

fn break_answers(
    answers: LookupRecords,
    additionals: Option<LookupRecords>,
) -> LookupControlFlow<AuthLookup> {
    LookupControlFlow::Break(Ok(AuthLookup::Records {
        answers,
        additionals,
    }))
}

fn nxdomain() -> LookupControlFlow<AuthLookup> {
    LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
}

fn nodata() -> LookupControlFlow<AuthLookup> {
    LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
}

/// Authority for one configured zone, answering from the live indexes.
pub struct GatewayAuthority {
    origin: LowerName,
    zone: Name,
    /// Lowercased zone without the closing dot, for index-key arithmetic.
    zone_key: String,
    apex_name: LowerName,
    secondary_name: Option<LowerName>,
    soa_mname: Name,
    soa_rname: Name,
    registry: Arc<ResolverRegistry>,
    readiness: Readiness,
    config: Arc<DnsConfig>,
    fallthrough: Option<Vec<LowerName>>,
    self_address: SelfAddressFn,
}

impl GatewayAuthority {
    /// Create an authority for one zone sharing the registry and readiness
    /// signal.
    pub fn new(
        config: Arc<DnsConfig>,
        zone: &str,
        registry: Arc<ResolverRegistry>,
        readiness: Readiness,
    ) -> Result<Self, GatewayError> {
        let zone_name = Name::from_ascii(zone)?;
        let zone_key = strip_closing_dot(&zone_name.to_string().to_ascii_lowercase()).to_string();

        let apex_fqdn = Name::from_ascii(&config.apex)?.append_domain(&zone_name)?;
        let soa_rname = Name::from_ascii(&config.hostmaster)?.append_domain(&apex_fqdn)?;
        let secondary_name = match &config.secondary {
            Some(label) => Some(LowerName::from(
                Name::from_ascii(label)?.append_domain(&zone_name)?,
            )),
            None => None,
        };

        let fallthrough = match &config.fallthrough {
            None => None,
            Some(zones) if zones.is_empty() => Some(vec![LowerName::from(Name::root())]),
            Some(zones) => {
                let mut names = Vec::with_capacity(zones.len());
                for zone in zones {
                    names.push(LowerName::from(Name::from_ascii(zone)?));
                }
                Some(names)
            }
        };

        let self_address = default_self_address(Arc::clone(&registry), &config);

        Ok(Self {
            origin: LowerName::from(zone_name.clone()),
            zone: zone_name,
            zone_key,
            apex_name: LowerName::from(apex_fqdn.clone()),
            secondary_name,
            soa_mname: apex_fqdn,
            soa_rname,
            registry,
            readiness,
            config,
            fallthrough,
            self_address,
        })
    }

    /// Replace the self-address callback. Test hook; the default resolves
    /// the apex label through the indexes.
    pub fn with_self_address(mut self, self_address: SelfAddressFn) -> Self {
        self.self_address = self_address;
        self
    }

    fn soa_rrset(&self) -> Arc<RecordSet> {
        let soa = SOA::new(
            self.soa_mname.clone(),
            self.soa_rname.clone(),
            SOA_SERIAL,
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            self.config.ttl_soa,
        );

        let mut record_set = RecordSet::new(self.zone.clone(), RecordType::SOA, 0);
        let mut record =
            Record::from_rdata(self.zone.clone(), self.config.ttl_soa, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        Arc::new(record_set)
    }

    fn ns_rrset(&self) -> Arc<RecordSet> {
        let mut record_set = RecordSet::new(self.zone.clone(), RecordType::NS, 0);

        let mut primary = Record::from_rdata(
            self.zone.clone(),
            self.config.ttl_soa,
            RData::NS(NS(self.soa_mname.clone())),
        );
        primary.set_dns_class(DNSClass::IN);
        record_set.insert(primary, 0);

        if let Some(secondary) = &self.secondary_name {
            let mut record = Record::from_rdata(
                self.zone.clone(),
                self.config.ttl_soa,
                RData::NS(NS(Name::from(secondary.clone()))),
            );
            record.set_dns_class(DNSClass::IN);
            record_set.insert(record, 0);
        }

        Arc::new(record_set)
    }

    fn soa_answer(&self, lookup_options: LookupOptions) -> LookupControlFlow<AuthLookup> {
        break_answers(LookupRecords::new(lookup_options, self.soa_rrset()), None)
    }

    /// True when the name lives in the synthetic nameserver subtree.
    fn in_sub_apex(&self, name: &LowerName) -> bool {
        self.apex_name.zone_of(name)
            || self
                .secondary_name
                .as_ref()
                .is_some_and(|secondary| secondary.zone_of(name))
    }

    /// True when fall-through is enabled for the name.
    fn fall_through(&self, name: &LowerName) -> bool {
        self.fallthrough
            .as_ref()
            .is_some_and(|zones| zones.iter().any(|zone| zone.zone_of(name)))
    }

    /// The index keys for a query: the lowercased name without the closing
    /// dot and, when distinct and non-empty, the zone-stripped form.
    fn index_keys(&self, name: &LowerName) -> Vec<String> {
        let full = Name::from(name.clone()).to_string();
        let stripped = strip_closing_dot(&full).to_string();
        let zoneless = stripped
            .strip_suffix(&self.zone_key)
            .map(|prefix| prefix.trim_end_matches('.').to_string())
            .unwrap_or_default();

        if !zoneless.is_empty() && zoneless != stripped {
            vec![stripped, zoneless]
        } else {
            vec![stripped]
        }
    }

    /// Serve the nameserver subtree: self-addresses at the apex (and
    /// secondary) labels, NXDOMAIN below them, NODATA at the empty
    /// non-terminal.
    async fn serve_sub_apex(
        &self,
        qname: &Name,
        lower: &LowerName,
        qtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<AuthLookup> {
        let base_labels = Name::from(lower.clone())
            .num_labels()
            .saturating_sub(self.zone.num_labels());

        match base_labels {
            1 => nodata(),
            2 => {
                let is_primary = *lower == self.apex_name;
                let is_secondary = self
                    .secondary_name
                    .as_ref()
                    .is_some_and(|secondary| lower == secondary);
                if !is_primary && !is_secondary {
                    return nxdomain();
                }

                let ctx = SelfAddressCtx {
                    qname: qname.clone(),
                    qtype,
                    zone: self.zone.clone(),
                };
                let records = (self.self_address)(ctx).await;

                let mut answers = Vec::new();
                for mut record in records {
                    if record.record_type() != qtype {
                        continue;
                    }
                    record.set_name(qname.clone());
                    record.set_ttl(self.config.ttl_soa);
                    answers.push(record);
                }

                if answers.is_empty() {
                    nodata()
                } else {
                    break_answers(
                        LookupRecords::many(lookup_options, record_sets(answers)),
                        None,
                    )
                }
            }
            _ => nxdomain(),
        }
    }

    async fn serve_apex_ns(
        &self,
        qname: &Name,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<AuthLookup> {
        let answers = LookupRecords::new(lookup_options, self.ns_rrset());

        let ctx = SelfAddressCtx {
            qname: qname.clone(),
            qtype: RecordType::NS,
            zone: self.zone.clone(),
        };
        let mut glue = (self.self_address)(ctx).await;
        for record in &mut glue {
            record.set_ttl(self.config.ttl_soa);
        }

        let additionals = if glue.is_empty() {
            None
        } else {
            Some(LookupRecords::many(lookup_options, record_sets(glue)))
        };

        break_answers(answers, additionals)
    }
}

#[async_trait]
impl Authority for GatewayAuthority {
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
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        match rtype {
            RecordType::SOA => self.soa_answer(lookup_options),
            RecordType::NS if *name == self.origin => {
                break_answers(LookupRecords::new(lookup_options, self.ns_rrset()), None)
            }
            RecordType::A => {
                let keys = self.index_keys(name);
                let addrs = self.registry.resolve(&keys).await;
                let records = a_records(&Name::from(name.clone()), &addrs, self.config.ttl);
                if records.is_empty() {
                    nodata()
                } else {
                    break_answers(
                        LookupRecords::many(lookup_options, record_sets(records)),
                        None,
                    )
                }
            }
            _ => nodata(),
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let query = request_info.query;
        let qtype = query.query_type();
        let rtype_str = format!("{qtype:?}");
        // The original query name, case preserved, becomes the owner name of
        // synthesized answers; lookups use the lowercased form.
        let qname = query.original().name().clone();
        let lower = query.name();

        if !self.readiness.has_synced() {
            debug!("indexes not ready, returning SERVFAIL");
            metrics::record_query(&rtype_str, QueryResult::NotReady, timer.elapsed());
            return LookupControlFlow::Break(Err(LookupError::from(io::Error::new(
                io::ErrorKind::NotConnected,
                "indexes not ready - initial sync incomplete",
            ))));
        }

        let is_apex = *lower == self.origin;

        if !is_apex && self.in_sub_apex(lower) {
            let result = self
                .serve_sub_apex(&qname, lower, qtype, lookup_options)
                .await;
            let outcome = match &result {
                LookupControlFlow::Break(Ok(_)) => QueryResult::Success,
                _ => QueryResult::NxDomain,
            };
            metrics::record_query(&rtype_str, outcome, timer.elapsed());
            return result;
        }

        let keys = self.index_keys(lower);
        debug!(keys = ?keys, "computed index keys");
        let addrs = self.registry.resolve(&keys).await;
        debug!(addrs = ?addrs, "computed response addresses");

        if addrs.is_empty() && self.fall_through(lower) {
            debug!(name = %lower, "falling through to next authority");
            metrics::record_query(&rtype_str, QueryResult::FallThrough, timer.elapsed());
            return LookupControlFlow::Continue(Err(LookupError::ResponseCode(
                ResponseCode::NXDomain,
            )));
        }

        match qtype {
            RecordType::A => {
                if addrs.is_empty() {
                    if is_apex {
                        metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                        return nodata();
                    }
                    metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                    return nxdomain();
                }

                let records = a_records(&qname, &addrs, self.config.ttl);
                if records.is_empty() {
                    metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                    return nodata();
                }
                metrics::record_ips_returned(records.len());
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                break_answers(
                    LookupRecords::many(lookup_options, record_sets(records)),
                    None,
                )
            }
            RecordType::SOA => {
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                self.soa_answer(lookup_options)
            }
            RecordType::NS => {
                if is_apex {
                    metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                    self.serve_apex_ns(&qname, lookup_options).await
                } else {
                    metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                    nodata()
                }
            }
            _ => {
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                nodata()
            }
        }
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
