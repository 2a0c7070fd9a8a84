//! SNMPv3 collector.
//!
//! Per target per poll, in order: system group, interface table, IP
//! address + ARP tables, bridge forwarding table, LLDP remote table,
//! entity table, and the route table (emitted as a separate routing
//! record). A walk that fails partway still emits whatever was
//! collected, flagged `partial=true`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use mk_model::{
    ArpEntry, RoutingPayload, SnmpPayload, TelemetryPayload, TelemetryRecord, TelemetrySource,
};
use mk_parsers::snmp_norm;
use mk_snmp::{mibs, AuthProtocol, Oid, PrivProtocol, SecurityLevel, SnmpClient, SnmpTarget};

use crate::arp::ArpFeed;
use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::runtime::run_poll_loop;
use crate::{Collector, CollectorContext, CollectorError};

/// One SNMPv3 target as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpTargetConfig {
    pub host: Ipv4Addr,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    pub security_name: String,
    /// "noAuthNoPriv" | "authNoPriv" | "authPriv"
    pub security_level: String,
    #[serde(default)]
    pub auth_protocol: Option<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub priv_protocol: Option<String>,
    #[serde(default)]
    pub priv_key: Option<String>,
}

fn default_snmp_port() -> u16 {
    161
}

impl SnmpTargetConfig {
    /// Resolve into a validated client target. Production deployments
    /// (`require_auth_priv`) reject anything below authPriv.
    pub fn resolve(
        &self,
        timeout: Duration,
        retries: u32,
        require_auth_priv: bool,
    ) -> Result<SnmpTarget, CollectorError> {
        let security_level = match self.security_level.as_str() {
            "noAuthNoPriv" => SecurityLevel::NoAuthNoPriv,
            "authNoPriv" => SecurityLevel::AuthNoPriv,
            "authPriv" => SecurityLevel::AuthPriv,
            other => {
                return Err(CollectorError::Config(format!(
                    "unknown security level {other:?}"
                )))
            }
        };
        if require_auth_priv && security_level != SecurityLevel::AuthPriv {
            return Err(CollectorError::Config(format!(
                "target {} must use authPriv in production",
                self.host
            )));
        }

        let auth = match (&self.auth_protocol, &self.auth_key) {
            (Some(protocol), Some(key)) => Some((parse_auth(protocol)?, key.clone())),
            (None, None) => None,
            _ => {
                return Err(CollectorError::Config(format!(
                    "target {}: auth protocol and key must be set together",
                    self.host
                )))
            }
        };
        let privacy = match (&self.priv_protocol, &self.priv_key) {
            (Some(protocol), Some(key)) => Some((parse_priv(protocol)?, key.clone())),
            (None, None) => None,
            _ => {
                return Err(CollectorError::Config(format!(
                    "target {}: priv protocol and key must be set together",
                    self.host
                )))
            }
        };

        let target = SnmpTarget {
            host: self.host,
            port: self.port,
            security_name: self.security_name.clone(),
            security_level,
            auth,
            privacy,
            timeout,
            retries,
        };
        target
            .validate()
            .map_err(|e| CollectorError::Config(e.to_string()))?;
        Ok(target)
    }
}

fn parse_auth(name: &str) -> Result<AuthProtocol, CollectorError> {
    match name.to_ascii_uppercase().as_str() {
        "MD5" => Ok(AuthProtocol::Md5),
        "SHA" | "SHA-1" | "SHA1" => Ok(AuthProtocol::Sha1),
        "SHA-224" | "SHA224" => Ok(AuthProtocol::Sha224),
        "SHA-256" | "SHA256" => Ok(AuthProtocol::Sha256),
        "SHA-384" | "SHA384" => Ok(AuthProtocol::Sha384),
        "SHA-512" | "SHA512" => Ok(AuthProtocol::Sha512),
        other => Err(CollectorError::Config(format!(
            "unknown auth protocol {other:?}"
        ))),
    }
}

fn parse_priv(name: &str) -> Result<PrivProtocol, CollectorError> {
    match name.to_ascii_uppercase().as_str() {
        "DES" => Ok(PrivProtocol::Des),
        "AES" | "AES-128" | "AES128" => Ok(PrivProtocol::Aes128),
        "AES-256" | "AES256" => Ok(PrivProtocol::Aes256),
        other => Err(CollectorError::Config(format!(
            "unknown privacy protocol {other:?}"
        ))),
    }
}

/// The SNMPv3 collector.
pub struct SnmpCollector {
    config: CollectorConfig,
    targets: Vec<SnmpTarget>,
    health: Arc<CollectorHealth>,
    /// SNMP-derived ARP entries flow to the ARP collector through here.
    arp_feed: Option<ArpFeed>,
}

impl SnmpCollector {
    pub fn new(
        config: CollectorConfig,
        target_configs: &[SnmpTargetConfig],
        require_auth_priv: bool,
        arp_feed: Option<ArpFeed>,
    ) -> Result<Self, CollectorError> {
        config.validate()?;
        let targets = target_configs
            .iter()
            .map(|t| t.resolve(config.timeout, config.retries, require_auth_priv))
            .collect::<Result<Vec<_>, _>>()?;
        let health = Arc::new(CollectorHealth::new());
        health.set_target_count(targets.len());
        Ok(SnmpCollector {
            config,
            targets,
            health,
            arp_feed,
        })
    }

    async fn poll_all(&self) -> Result<Vec<TelemetryRecord>, CollectorError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut set = JoinSet::new();
        for target in self.targets.clone() {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                poll_target(target).await
            });
        }

        let mut records = Vec::new();
        let mut failures = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(target_result)) => {
                    if let Some(feed) = &self.arp_feed {
                        feed.push_all(target_result.arp_entries.clone());
                    }
                    records.extend(target_result.into_records());
                }
                Ok(Err((host, e))) => {
                    failures += 1;
                    self.health.record_error();
                    log::warn!("SNMP poll of {host} failed: {e}");
                }
                Err(e) => {
                    failures += 1;
                    self.health.record_error();
                    log::error!("SNMP poll task failed: {e}");
                }
            }
        }
        if records.is_empty() && failures > 0 && !self.targets.is_empty() {
            return Err(CollectorError::Protocol(format!(
                "all {failures} SNMP targets failed"
            )));
        }
        Ok(records)
    }
}

struct TargetResult {
    payload: SnmpPayload,
    routing: Option<RoutingPayload>,
    arp_entries: Vec<ArpEntry>,
    partial: bool,
}

impl TargetResult {
    fn into_records(self) -> Vec<TelemetryRecord> {
        let now = chrono::Utc::now();
        let mut records = Vec::with_capacity(2);
        let mut record = TelemetryRecord::new(TelemetryPayload::Snmp(self.payload), now);
        if self.partial {
            record = record.with_meta("partial", "true");
        }
        records.push(record);
        if let Some(routing) = self.routing {
            if !routing.routes.is_empty() {
                records.push(TelemetryRecord::new(TelemetryPayload::Routing(routing), now));
            }
        }
        records
    }
}

async fn poll_target(target: SnmpTarget) -> Result<TargetResult, (Ipv4Addr, CollectorError)> {
    let host = target.host;
    let mut client = SnmpClient::connect(target)
        .await
        .map_err(|e| (host, CollectorError::Snmp(e)))?;

    let mut payload = SnmpPayload::empty(host);
    let mut partial = false;

    // 1. System group.
    let system_oids: Vec<Oid> = [
        mibs::SYS_DESCR,
        mibs::SYS_OBJECT_ID,
        mibs::SYS_UPTIME,
        mibs::SYS_NAME,
        mibs::SYS_LOCATION,
        mibs::SYS_SERVICES,
    ]
    .iter()
    .map(|arcs| Oid::from_slice(arcs))
    .collect();
    match client.get(&system_oids).await {
        Ok(varbinds) => payload.system = Some(snmp_norm::system_info(&varbinds)),
        Err(e) => {
            log::debug!("{host}: system group failed: {e}");
            partial = true;
        }
    }

    // 2. Interface table.
    match client.walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 2, 2, 1])).await {
        Ok(varbinds) => payload.interfaces = snmp_norm::interface_table(&varbinds),
        Err(e) => {
            log::debug!("{host}: ifTable walk failed: {e}");
            partial = true;
        }
    }

    // 3. IP address table and ARP table.
    match client.walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 4, 20, 1])).await {
        Ok(varbinds) => payload.ip_addresses = snmp_norm::ip_table(&varbinds),
        Err(e) => {
            log::debug!("{host}: ipAddrTable walk failed: {e}");
            partial = true;
        }
    }
    match client.walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 4, 22, 1])).await {
        Ok(varbinds) => payload.arp_entries = snmp_norm::arp_table(&varbinds),
        Err(e) => {
            log::debug!("{host}: ipNetToMediaTable walk failed: {e}");
            partial = true;
        }
    }

    // 4. Bridge MAC forwarding table.
    match client
        .walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 17, 4, 3, 1]))
        .await
    {
        Ok(varbinds) => payload.bridge_macs = snmp_norm::bridge_table(&varbinds),
        Err(e) => {
            log::debug!("{host}: bridge table walk failed: {e}");
            partial = true;
        }
    }

    // 5. LLDP remote table.
    match client
        .walk(&Oid::from_slice(&[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1]))
        .await
    {
        Ok(varbinds) => payload.lldp_neighbors = snmp_norm::lldp_table(&varbinds),
        Err(e) => {
            log::debug!("{host}: LLDP walk failed: {e}");
            partial = true;
        }
    }

    // 6. Entity physical table.
    match client
        .walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 47, 1, 1, 1, 1]))
        .await
    {
        Ok(varbinds) => payload.entity = snmp_norm::entity_info(&varbinds),
        Err(e) => {
            log::debug!("{host}: entity walk failed: {e}");
            partial = true;
        }
    }

    // 7. Route table, emitted as the routing source.
    let routing = match client.walk(&Oid::from_slice(&[1, 3, 6, 1, 2, 1, 4, 21, 1])).await {
        Ok(varbinds) => Some(RoutingPayload {
            router: Some(host),
            routes: snmp_norm::route_table(&varbinds),
        }),
        Err(e) => {
            log::debug!("{host}: route table walk failed: {e}");
            partial = true;
            None
        }
    };

    let arp_entries = payload.arp_entries.clone();
    Ok(TargetResult {
        payload,
        routing,
        arp_entries,
        partial,
    })
}

#[async_trait]
impl Collector for SnmpCollector {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::Snmp
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        if self.targets.is_empty() {
            log::warn!("SNMP collector enabled with no targets");
        }
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let config = self.config.clone();
        let health = self.health.clone();
        let this: &SnmpCollector = self;
        run_poll_loop(
            "snmp",
            TelemetrySource::Snmp,
            &config,
            &health,
            &ctx,
            move || this.poll_all(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_config() -> SnmpTargetConfig {
        SnmpTargetConfig {
            host: "10.0.1.50".parse().unwrap(),
            port: 161,
            security_name: "ops".to_string(),
            security_level: "authPriv".to_string(),
            auth_protocol: Some("SHA-256".to_string()),
            auth_key: Some("correct-horse".to_string()),
            priv_protocol: Some("AES-128".to_string()),
            priv_key: Some("battery-staple".to_string()),
        }
    }

    #[test]
    fn test_resolve_auth_priv() {
        let target = target_config()
            .resolve(Duration::from_secs(5), 2, true)
            .unwrap();
        assert_eq!(target.port, 161);
        assert_eq!(target.security_level, SecurityLevel::AuthPriv);
    }

    #[test]
    fn test_production_rejects_no_priv() {
        let mut config = target_config();
        config.security_level = "authNoPriv".to_string();
        config.priv_protocol = None;
        config.priv_key = None;
        assert!(config.resolve(Duration::from_secs(5), 2, true).is_err());
        // Outside production mode the lower level is allowed.
        assert!(config.resolve(Duration::from_secs(5), 2, false).is_ok());
    }

    #[test]
    fn test_mismatched_credentials_rejected() {
        let mut config = target_config();
        config.auth_key = None;
        assert!(config.resolve(Duration::from_secs(5), 2, true).is_err());
    }

    #[test]
    fn test_protocol_name_parsing() {
        assert_eq!(parse_auth("md5").unwrap(), AuthProtocol::Md5);
        assert_eq!(parse_auth("SHA-512").unwrap(), AuthProtocol::Sha512);
        assert!(parse_auth("rot13").is_err());
        assert_eq!(parse_priv("des").unwrap(), PrivProtocol::Des);
        assert_eq!(parse_priv("AES-256").unwrap(), PrivProtocol::Aes256);
        assert!(parse_priv("rc4").is_err());
    }

    #[test]
    fn test_collector_counts_targets() {
        let collector = SnmpCollector::new(
            CollectorConfig::default(),
            &[target_config()],
            true,
            None,
        )
        .unwrap();
        assert_eq!(collector.health().snapshot().target_count, 1);
    }
}
