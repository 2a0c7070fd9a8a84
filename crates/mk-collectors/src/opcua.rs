//! OPC-UA collector.
//!
//! Samples a monitored-node list at a configured interval and emits
//! value changes as telemetry. The endpoint session sits behind the
//! [`OpcUaSession`] trait; the shipped backend speaks opc.tcp with
//! SecurityPolicy#None. Sign and SignAndEncrypt are accepted in
//! configuration but rejected at connect time by this backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mk_model::{
    OpcUaPayload, OpcUaSample, ScalarValue, TelemetryPayload, TelemetryRecord, TelemetrySource,
};

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::opcua_wire::{NodeId, OpcTcpSession};
use crate::{Collector, CollectorContext, CollectorError};

/// OPC-UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    None,
    Sign,
    SignAndEncrypt,
}

/// Collector configuration for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    pub endpoint: String,
    pub security_mode: SecurityMode,
    pub monitored_nodes: Vec<String>,
    pub sampling_interval_ms: u64,
}

/// The session seam: sampling logic is independent of the wire client.
#[async_trait]
pub trait OpcUaSession: Send {
    async fn read_nodes(
        &mut self,
        nodes: &[NodeId],
    ) -> Result<Vec<(NodeId, ScalarValue, chrono::DateTime<chrono::Utc>)>, CollectorError>;
}

/// Connects sessions; injected so tests can script reads.
#[async_trait]
pub trait OpcUaConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        mode: SecurityMode,
        timeout: Duration,
    ) -> Result<Box<dyn OpcUaSession>, CollectorError>;
}

/// The opc.tcp backend.
pub struct TcpConnector;

#[async_trait]
impl OpcUaConnector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &str,
        mode: SecurityMode,
        timeout: Duration,
    ) -> Result<Box<dyn OpcUaSession>, CollectorError> {
        if mode != SecurityMode::None {
            return Err(CollectorError::Unsupported(format!(
                "security mode {mode:?} is not supported by the opc.tcp backend"
            )));
        }
        let session = OpcTcpSession::connect(endpoint, timeout).await?;
        Ok(Box::new(TcpSession { inner: session }))
    }
}

struct TcpSession {
    inner: OpcTcpSession,
}

#[async_trait]
impl OpcUaSession for TcpSession {
    async fn read_nodes(
        &mut self,
        nodes: &[NodeId],
    ) -> Result<Vec<(NodeId, ScalarValue, chrono::DateTime<chrono::Utc>)>, CollectorError> {
        let results = self.inner.read_values(nodes).await?;
        let now = chrono::Utc::now();
        Ok(nodes
            .iter()
            .zip(results)
            .filter_map(|(node, result)| {
                if result.status != 0 {
                    log::debug!("node {node} read status {:#010x}", result.status);
                    return None;
                }
                result
                    .value
                    .map(|value| (node.clone(), value, result.source_timestamp.unwrap_or(now)))
            })
            .collect())
    }
}

pub struct OpcUaCollector {
    base: CollectorConfig,
    config: OpcUaConfig,
    nodes: Vec<NodeId>,
    connector: Arc<dyn OpcUaConnector>,
    session: Option<Box<dyn OpcUaSession>>,
    last_values: HashMap<String, ScalarValue>,
    health: Arc<CollectorHealth>,
}

impl OpcUaCollector {
    pub fn new(
        mut base: CollectorConfig,
        config: OpcUaConfig,
        connector: Arc<dyn OpcUaConnector>,
    ) -> Result<Self, CollectorError> {
        // The sampling interval is this collector's poll interval,
        // clamped into the shared 1 s..1 h window.
        base.poll_interval =
            Duration::from_millis(config.sampling_interval_ms.clamp(1_000, 3_600_000));
        base.validate()?;
        let nodes = config
            .monitored_nodes
            .iter()
            .map(|n| NodeId::parse(n))
            .collect::<Result<Vec<_>, _>>()?;
        let health = Arc::new(CollectorHealth::new());
        health.set_target_count(nodes.len());
        Ok(OpcUaCollector {
            base,
            config,
            nodes,
            connector,
            session: None,
            last_values: HashMap::new(),
            health,
        })
    }

    async fn sample(&mut self) -> Result<Vec<TelemetryRecord>, CollectorError> {
        if self.session.is_none() {
            let session = self
                .connector
                .connect(
                    &self.config.endpoint,
                    self.config.security_mode,
                    self.base.timeout,
                )
                .await?;
            log::info!("OPC-UA session established to {}", self.config.endpoint);
            self.session = Some(session);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(CollectorError::Protocol("session not established".to_string()));
        };

        let readings = match session.read_nodes(&self.nodes).await {
            Ok(readings) => readings,
            Err(e) => {
                // Drop the session; the next poll reconnects.
                self.session = None;
                return Err(e);
            }
        };

        // Emit only value changes.
        let mut samples = Vec::new();
        for (node, value, source_timestamp) in readings {
            let key = node.to_string();
            let changed = self.last_values.get(&key) != Some(&value);
            if changed {
                self.last_values.insert(key.clone(), value.clone());
                samples.push(OpcUaSample {
                    node_id: key,
                    value,
                    source_timestamp,
                });
            }
        }

        if samples.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![TelemetryRecord::new(
            TelemetryPayload::OpcUa(OpcUaPayload {
                endpoint: self.config.endpoint.clone(),
                samples,
            }),
            chrono::Utc::now(),
        )])
    }

    /// Per-attempt timeout, exponential backoff on transient failures.
    async fn sample_with_retry(
        &mut self,
        config: &CollectorConfig,
        ctx: &CollectorContext,
    ) -> Result<Vec<TelemetryRecord>, CollectorError> {
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(config.timeout, self.sample()).await {
                Ok(Ok(records)) => return Ok(records),
                Ok(Err(e)) => e,
                Err(_) => CollectorError::Timeout,
            };
            if !outcome.is_transient() || attempt >= config.retries {
                return Err(outcome);
            }
            attempt += 1;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(CollectorError::Shutdown),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }
}

#[async_trait]
impl Collector for OpcUaCollector {
    fn name(&self) -> &'static str {
        "opcua"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::OpcUa
    }

    fn enabled(&self) -> bool {
        self.base.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        if self.nodes.is_empty() {
            return Err(CollectorError::Config(
                "OPC-UA collector has no monitored nodes".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let config = self.base.clone();
        let health = self.health.clone();
        // Sampling mutates session state, so the shared poll-loop helper
        // (whose closure only gets a shared borrow) does not fit; the
        // same tick/flush/retry shape is inlined here.
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut batcher =
            crate::runtime::Batcher::new(config.batch_size, config.flush_interval);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    let remaining = batcher.take();
                    ctx.sink.emit("opcua", TelemetrySource::OpcUa, remaining).await?;
                    log::info!("opcua collector stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(batcher.deadline()) => {
                    let batch = batcher.take();
                    ctx.sink.emit("opcua", TelemetrySource::OpcUa, batch).await?;
                }
                _ = ticker.tick() => {
                    match self.sample_with_retry(&config, &ctx).await {
                        Ok(records) => {
                            health.record_success(chrono::Utc::now());
                            batcher.extend(records);
                            if batcher.is_full() {
                                let batch = batcher.take();
                                ctx.sink.emit("opcua", TelemetrySource::OpcUa, batch).await?;
                            }
                        }
                        Err(CollectorError::Shutdown) => return Ok(()),
                        Err(e) => {
                            health.record_error();
                            log::warn!("opcua sample failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A scripted session: yields preset values per poll.
    struct ScriptedSession {
        polls: Arc<Mutex<Vec<Vec<(NodeId, ScalarValue)>>>>,
    }

    #[async_trait]
    impl OpcUaSession for ScriptedSession {
        async fn read_nodes(
            &mut self,
            _nodes: &[NodeId],
        ) -> Result<Vec<(NodeId, ScalarValue, chrono::DateTime<chrono::Utc>)>, CollectorError>
        {
            let mut polls = self.polls.lock().unwrap();
            if polls.is_empty() {
                return Ok(Vec::new());
            }
            let now = chrono::Utc::now();
            Ok(polls
                .remove(0)
                .into_iter()
                .map(|(node, value)| (node, value, now))
                .collect())
        }
    }

    struct ScriptedConnector {
        polls: Arc<Mutex<Vec<Vec<(NodeId, ScalarValue)>>>>,
    }

    #[async_trait]
    impl OpcUaConnector for ScriptedConnector {
        async fn connect(
            &self,
            _endpoint: &str,
            mode: SecurityMode,
            _timeout: Duration,
        ) -> Result<Box<dyn OpcUaSession>, CollectorError> {
            if mode != SecurityMode::None {
                return Err(CollectorError::Unsupported("signed modes".to_string()));
            }
            Ok(Box::new(ScriptedSession {
                polls: self.polls.clone(),
            }))
        }
    }

    fn collector_with(
        polls: Vec<Vec<(NodeId, ScalarValue)>>,
        mode: SecurityMode,
    ) -> OpcUaCollector {
        OpcUaCollector::new(
            CollectorConfig::default(),
            OpcUaConfig {
                endpoint: "opc.tcp://plc.example:4840".to_string(),
                security_mode: mode,
                monitored_nodes: vec!["ns=2;s=Line1.Temp".to_string()],
                sampling_interval_ms: 1_000,
            },
            Arc::new(ScriptedConnector {
                polls: Arc::new(Mutex::new(polls)),
            }),
        )
        .unwrap()
    }

    fn temp_node() -> NodeId {
        NodeId::parse("ns=2;s=Line1.Temp").unwrap()
    }

    #[tokio::test]
    async fn test_only_value_changes_emitted() {
        let mut collector = collector_with(
            vec![
                vec![(temp_node(), ScalarValue::Float(21.5))],
                vec![(temp_node(), ScalarValue::Float(21.5))],
                vec![(temp_node(), ScalarValue::Float(22.0))],
            ],
            SecurityMode::None,
        );

        let first = collector.sample().await.unwrap();
        assert_eq!(first.len(), 1);

        // Unchanged value → no record.
        let second = collector.sample().await.unwrap();
        assert!(second.is_empty());

        let third = collector.sample().await.unwrap();
        assert_eq!(third.len(), 1);
        match &third[0].data {
            TelemetryPayload::OpcUa(payload) => {
                assert_eq!(payload.samples.len(), 1);
                assert_eq!(payload.samples[0].value, ScalarValue::Float(22.0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signed_mode_rejected_at_connect() {
        let mut collector = collector_with(vec![], SecurityMode::SignAndEncrypt);
        assert!(matches!(
            collector.sample().await,
            Err(CollectorError::Unsupported(_))
        ));
    }

    #[test]
    fn test_sampling_interval_clamped() {
        let collector = collector_with(vec![], SecurityMode::None);
        assert_eq!(collector.base.poll_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_no_nodes_fails_start() {
        let mut collector = OpcUaCollector::new(
            CollectorConfig::default(),
            OpcUaConfig {
                endpoint: "opc.tcp://plc.example:4840".to_string(),
                security_mode: SecurityMode::None,
                monitored_nodes: vec![],
                sampling_interval_ms: 1_000,
            },
            Arc::new(ScriptedConnector {
                polls: Arc::new(Mutex::new(vec![])),
            }),
        )
        .unwrap();
        assert!(matches!(
            collector.start().await,
            Err(CollectorError::Config(_))
        ));
    }
}
