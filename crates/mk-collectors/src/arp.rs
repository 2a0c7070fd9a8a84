//! ARP collector: local system ARP cache plus SNMP-derived entries.
//!
//! Strictly passive. The optional discovery subnets only FILTER what
//! was already observed; nothing is ever probed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mk_model::{ArpEntry, ArpPayload, Cidr, TelemetryPayload, TelemetryRecord, TelemetrySource};
use mk_parsers::arp::parse_proc_net_arp;

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::runtime::run_poll_loop;
use crate::{Collector, CollectorContext, CollectorError};

/// Hand-off buffer for ARP entries observed by other collectors
/// (the SNMP collector's ipNetToMediaTable walks).
#[derive(Clone, Default)]
pub struct ArpFeed(Arc<Mutex<Vec<ArpEntry>>>);

impl ArpFeed {
    pub fn new() -> Self {
        ArpFeed::default()
    }

    pub fn push_all(&self, entries: Vec<ArpEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend(entries);
    }

    pub fn drain(&self) -> Vec<ArpEntry> {
        let mut guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }
}

/// Collects the local ARP cache and aggregates SNMP-derived entries.
pub struct ArpCollector {
    config: CollectorConfig,
    health: Arc<CollectorHealth>,
    feed: ArpFeed,
    arp_cache_path: PathBuf,
    /// When set, only entries inside these subnets are emitted.
    discovery_subnets: Vec<Cidr>,
}

impl ArpCollector {
    pub fn new(
        config: CollectorConfig,
        feed: ArpFeed,
        discovery_subnets: Vec<Cidr>,
    ) -> Result<Self, CollectorError> {
        config.validate()?;
        Ok(ArpCollector {
            config,
            health: Arc::new(CollectorHealth::new()),
            feed,
            arp_cache_path: PathBuf::from("/proc/net/arp"),
            discovery_subnets,
        })
    }

    #[cfg(test)]
    fn with_cache_path(mut self, path: PathBuf) -> Self {
        self.arp_cache_path = path;
        self
    }

    async fn collect(&self) -> Result<Vec<TelemetryRecord>, CollectorError> {
        let mut entries = match tokio::fs::read_to_string(&self.arp_cache_path).await {
            Ok(text) => parse_proc_net_arp(&text),
            Err(e) => {
                // Not fatal: some platforms have no /proc/net/arp; the
                // SNMP-derived feed still flows.
                log::debug!(
                    "cannot read {}: {e}",
                    self.arp_cache_path.display()
                );
                Vec::new()
            }
        };
        entries.extend(self.feed.drain());

        if !self.discovery_subnets.is_empty() {
            entries.retain(|entry| self.discovery_subnets.iter().any(|s| s.contains(entry.ip)));
        }
        self.health.set_target_count(entries.len());

        if entries.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TelemetryRecord::new(
            TelemetryPayload::Arp(ArpPayload { entries }),
            chrono::Utc::now(),
        )])
    }
}

#[async_trait]
impl Collector for ArpCollector {
    fn name(&self) -> &'static str {
        "arp"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::Arp
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let config = self.config.clone();
        let health = self.health.clone();
        let this: &ArpCollector = self;
        run_poll_loop(
            "arp",
            TelemetrySource::Arp,
            &config,
            &health,
            &ctx,
            move || this.collect(),
        )
        .await
    }
}
