//! NetFlow v5/v9 listener.
//!
//! Listens on UDP, feeds datagrams through the parser, buffers v9 data
//! flowsets whose templates have not arrived yet (bounded queue,
//! 5-minute expiry with a drop counter), and aggregates flows over a
//! 60-second window before emitting them.

use std::collections::{HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::UdpSocket;

use mk_model::{NetflowPayload, TelemetryPayload, TelemetryRecord, TelemetrySource};
use mk_parsers::netflow::{decode_unresolved, UnresolvedFlowset};
use mk_parsers::{FlowAggregator, TemplateCache};

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::{Collector, CollectorContext, CollectorError};

pub const DEFAULT_NETFLOW_PORT: u16 = 2055;
const PENDING_LIMIT: usize = 10_000;
const PENDING_EXPIRY: Duration = Duration::from_secs(300);
const AGGREGATION_WINDOW: Duration = Duration::from_secs(60);
const RECV_BUF: usize = 65535;

pub struct NetflowCollector {
    config: CollectorConfig,
    health: Arc<CollectorHealth>,
    bind_port: u16,
    socket: Option<UdpSocket>,
    templates: TemplateCache,
    pending: VecDeque<UnresolvedFlowset>,
    aggregator: FlowAggregator,
    exporters: HashSet<Ipv4Addr>,
    dropped_unresolved: u64,
}

impl NetflowCollector {
    pub fn new(config: CollectorConfig, bind_port: u16) -> Result<Self, CollectorError> {
        config.validate()?;
        Ok(NetflowCollector {
            config,
            health: Arc::new(CollectorHealth::new()),
            bind_port,
            socket: None,
            templates: TemplateCache::new(),
            pending: VecDeque::new(),
            aggregator: FlowAggregator::new(),
            exporters: HashSet::new(),
            dropped_unresolved: 0,
        })
    }

    /// Counter of flowsets dropped because their template never arrived.
    pub fn dropped_unresolved(&self) -> u64 {
        self.dropped_unresolved
    }

    fn handle_datagram(&mut self, peer: SocketAddr, buf: &[u8]) {
        let exporter = match peer {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => {
                log::debug!("ignoring NetFlow datagram from IPv6 exporter {peer}");
                return;
            }
        };
        let now = Utc::now();
        match mk_parsers::netflow::parse_datagram(exporter, buf, &mut self.templates, now) {
            Ok(parse) => {
                if self.exporters.insert(exporter) {
                    self.health.set_target_count(self.exporters.len());
                }
                for flow in parse.flows {
                    self.aggregator.push(flow);
                }
                for unresolved in parse.unresolved {
                    if self.pending.len() >= PENDING_LIMIT {
                        self.pending.pop_front();
                        self.dropped_unresolved += 1;
                    }
                    self.pending.push_back(unresolved);
                }
                if parse.templates_learned > 0 {
                    self.resolve_pending();
                }
            }
            Err(e) => {
                self.health.record_error();
                log::debug!("undecodable NetFlow datagram from {peer}: {e}");
            }
        }
    }

    /// Retry buffered flowsets against the template cache; expire the
    /// ones past the 5-minute deadline.
    fn resolve_pending(&mut self) {
        let now = Utc::now();
        let mut keep = VecDeque::new();
        while let Some(unresolved) = self.pending.pop_front() {
            if let Some(flows) = decode_unresolved(&unresolved, &self.templates) {
                for flow in flows {
                    self.aggregator.push(flow);
                }
            } else if (now - unresolved.received_at).to_std().unwrap_or_default()
                > PENDING_EXPIRY
            {
                self.dropped_unresolved += 1;
            } else {
                keep.push_back(unresolved);
            }
        }
        self.pending = keep;
    }

    async fn flush_window(&mut self, ctx: &CollectorContext) -> Result<(), CollectorError> {
        self.resolve_pending();
        if self.aggregator.is_empty() {
            return Ok(());
        }
        let flows = self.aggregator.drain();
        self.health.record_success(Utc::now());

        // Respect the batch size: chunk large windows into multiple
        // records.
        let mut records = Vec::new();
        for chunk in flows.chunks(self.config.batch_size.max(1)) {
            records.push(TelemetryRecord::new(
                TelemetryPayload::Netflow(NetflowPayload {
                    flows: chunk.to_vec(),
                }),
                Utc::now(),
            ));
        }
        ctx.sink.emit("netflow", TelemetrySource::Netflow, records).await
    }
}

#[async_trait]
impl Collector for NetflowCollector {
    fn name(&self) -> &'static str {
        "netflow"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::Netflow
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        let socket = UdpSocket::bind(("0.0.0.0", self.bind_port)).await?;
        log::info!("NetFlow listener bound on udp/{}", self.bind_port);
        self.socket = Some(socket);
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| CollectorError::Config("netflow collector not started".to_string()))?;
        let mut buf = vec![0u8; RECV_BUF];
        let mut window = tokio::time::interval(AGGREGATION_WINDOW);
        window.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        window.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.flush_window(&ctx).await?;
                    log::info!("netflow collector stopped");
                    return Ok(());
                }
                _ = window.tick() => {
                    self.flush_window(&ctx).await?;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, peer)) => self.handle_datagram(peer, &buf[..n]),
                        Err(e) => {
                            self.health.record_error();
                            log::warn!("NetFlow receive error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn stop(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk_model::Port;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn v5_datagram(dst_port: u16, bytes: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&u32::from(Ipv4Addr::new(10, 0, 1, 50)).to_be_bytes());
        buf.extend_from_slice(&u32::from(Ipv4Addr::new(10, 0, 2, 10)).to_be_bytes());
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&bytes.to_be_bytes());
        buf.extend_from_slice(&500u32.to_be_bytes());
        buf.extend_from_slice(&900u32.to_be_bytes());
        buf.extend_from_slice(&49152u16.to_be_bytes());
        buf.extend_from_slice(&dst_port.to_be_bytes());
        buf.extend_from_slice(&[0, 0x18, 6, 0]);
        buf.extend_from_slice(&[0; 8]);
        buf
    }

    fn peer() -> SocketAddr {
        "192.0.2.1:2055".parse().unwrap()
    }

    #[tokio::test]
    async fn test_datagrams_aggregate_until_flush() {
        let mut collector =
            NetflowCollector::new(CollectorConfig::default(), DEFAULT_NETFLOW_PORT).unwrap();
        collector.handle_datagram(peer(), &v5_datagram(502, 1200));
        collector.handle_datagram(peer(), &v5_datagram(502, 800));
        collector.handle_datagram(peer(), &v5_datagram(80, 100));

        let (tx, mut rx) = mpsc::channel(16);
        let ctx = CollectorContext {
            sink: crate::sink::TelemetrySink::new(tx, None),
            cancel: CancellationToken::new(),
        };
        collector.flush_window(&ctx).await.unwrap();

        let record = rx.recv().await.unwrap();
        match record.data {
            TelemetryPayload::Netflow(payload) => {
                assert_eq!(payload.flows.len(), 2);
                let modbus = payload
                    .flows
                    .iter()
                    .find(|f| f.dst_port == Port::new(502).unwrap())
                    .unwrap();
                assert_eq!(modbus.bytes, 2000);
                assert_eq!(modbus.industrial_protocol.as_deref(), Some("Modbus"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(collector.health().snapshot().target_count, 1);
    }

    #[tokio::test]
    async fn test_pending_queue_bounded() {
        let mut collector =
            NetflowCollector::new(CollectorConfig::default(), DEFAULT_NETFLOW_PORT).unwrap();
        // A v9 data flowset with no template gets buffered.
        let mut v9 = Vec::new();
        v9.extend_from_slice(&9u16.to_be_bytes());
        v9.extend_from_slice(&1u16.to_be_bytes());
        v9.extend_from_slice(&1000u32.to_be_bytes());
        v9.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        v9.extend_from_slice(&1u32.to_be_bytes());
        v9.extend_from_slice(&7u32.to_be_bytes());
        v9.extend_from_slice(&300u16.to_be_bytes()); // unknown template id
        v9.extend_from_slice(&8u16.to_be_bytes());
        v9.extend_from_slice(&[1, 2, 3, 4]);

        for _ in 0..(PENDING_LIMIT + 5) {
            collector.handle_datagram(peer(), &v9);
        }
        assert_eq!(collector.pending.len(), PENDING_LIMIT);
        assert_eq!(collector.dropped_unresolved(), 5);
    }
}
