//! The single-writer correlation actor.
//!
//! Owns the engine, applies its events to the repositories, publishes
//! alerts, and produces topology snapshots on cadence or after enough
//! accumulated change. All identity mutation flows through this one
//! task, which is what makes duplicate-device races impossible.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mk_db::{alerts, audit, connections, devices, snapshots, telemetry, Database};
use mk_model::{TelemetryRecord, TelemetrySource};
use mk_transport::{QosLevel, TransportClient};

use crate::engine::{CorrelationEngine, CorrelationEvent};
use crate::CorrelationError;

pub const ALERTS_TOPIC: &str = "scada/alerts";

#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// Snapshot cadence.
    pub snapshot_interval: Duration,
    /// Snapshot early when this many changes accumulate.
    pub snapshot_change_threshold: usize,
    /// A device unseen for this long goes offline.
    pub offline_after: Duration,
    pub offline_sweep_interval: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        ActorConfig {
            snapshot_interval: Duration::from_secs(300),
            snapshot_change_threshold: 50,
            offline_after: Duration::from_secs(600),
            offline_sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct CorrelationActor {
    engine: CorrelationEngine,
    db: Arc<Database>,
    transport: Option<TransportClient>,
    rx: mpsc::Receiver<TelemetryRecord>,
    /// Device-change notifications for the risk analyzer.
    risk_tx: Option<mpsc::Sender<Uuid>>,
    config: ActorConfig,
    changes_since_snapshot: usize,
    sources_seen: BTreeSet<String>,
    last_snapshot: Instant,
}

impl CorrelationActor {
    pub fn new(
        engine: CorrelationEngine,
        db: Arc<Database>,
        transport: Option<TransportClient>,
        rx: mpsc::Receiver<TelemetryRecord>,
        risk_tx: Option<mpsc::Sender<Uuid>>,
        config: ActorConfig,
    ) -> Self {
        CorrelationActor {
            engine,
            db,
            transport,
            rx,
            risk_tx,
            config,
            changes_since_snapshot: 0,
            sources_seen: BTreeSet::new(),
            last_snapshot: Instant::now(),
        }
    }

    /// Seed the engine from persisted state.
    pub fn bootstrap(&mut self) -> Result<(), CorrelationError> {
        let conn = self.db.conn();
        let loaded_devices = devices::list(&conn)?;
        let loaded_connections = connections::list(&conn)?;
        log::info!(
            "correlation bootstrapped with {} devices, {} connections",
            loaded_devices.len(),
            loaded_connections.len()
        );
        self.engine.load(loaded_devices, loaded_connections);
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), CorrelationError> {
        let mut snapshot_tick = tokio::time::interval(self.config.snapshot_interval);
        snapshot_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        snapshot_tick.tick().await;
        let mut sweep_tick = tokio::time::interval(self.config.offline_sweep_interval);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Drain whatever is already queued, then stop.
                    while let Ok(record) = self.rx.try_recv() {
                        if let Err(e) = self.handle_record(record).await {
                            log::error!("correlation error during drain: {e}");
                        }
                    }
                    if self.changes_since_snapshot > 0 {
                        if let Err(e) = self.take_snapshot() {
                            log::error!("final snapshot failed: {e}");
                        }
                    }
                    log::info!("correlation actor stopped");
                    return Ok(());
                }
                record = self.rx.recv() => match record {
                    Some(record) => {
                        if let Err(e) = self.handle_record(record).await {
                            log::error!("correlation error: {e}");
                        }
                        if self.changes_since_snapshot >= self.config.snapshot_change_threshold {
                            if let Err(e) = self.take_snapshot() {
                                log::error!("snapshot failed: {e}");
                            }
                        }
                    }
                    None => {
                        log::info!("telemetry channel closed, correlation actor stopping");
                        return Ok(());
                    }
                },
                _ = snapshot_tick.tick() => {
                    if let Err(e) = self.take_snapshot() {
                        log::error!("snapshot failed: {e}");
                    }
                }
                _ = sweep_tick.tick() => {
                    let offline_after = chrono::Duration::from_std(self.config.offline_after)
                        .unwrap_or_else(|_| chrono::Duration::seconds(600));
                    let events = self.engine.sweep_offline(Utc::now(), offline_after);
                    if let Err(e) = self.apply_events(events).await {
                        log::error!("offline sweep persistence failed: {e}");
                    }
                }
            }
        }
    }

    async fn handle_record(&mut self, mut record: TelemetryRecord) -> Result<(), CorrelationError> {
        self.sources_seen.insert(record.source.to_string());
        let events = self.engine.process(&record);
        self.apply_events(events).await?;

        record.mark_processed();
        let conn = self.db.conn();
        telemetry::insert_batch(&conn, std::slice::from_ref(&record))?;
        Ok(())
    }

    async fn apply_events(&mut self, events: Vec<CorrelationEvent>) -> Result<(), CorrelationError> {
        for event in events {
            self.changes_since_snapshot += 1;
            match event {
                CorrelationEvent::DeviceCreated(device) => {
                    {
                        let conn = self.db.conn();
                        devices::upsert(&conn, &device)?;
                    }
                    self.notify_risk(device.id);
                }
                CorrelationEvent::DeviceUpdated(device) => {
                    let result = {
                        let conn = self.db.conn();
                        devices::upsert(&conn, &device)
                    };
                    if let Err(e) = result {
                        // Constraint races get one reload-and-retry.
                        if e.is_transient() {
                            let conn = self.db.conn();
                            devices::upsert(&conn, &device)?;
                        } else {
                            return Err(e.into());
                        }
                    }
                    self.notify_risk(device.id);
                }
                CorrelationEvent::DeviceSeen { id, at } => {
                    let conn = self.db.conn();
                    if let Err(e) = devices::update_last_seen(&conn, id, at) {
                        log::debug!("last-seen update for {id}: {e}");
                    }
                }
                CorrelationEvent::DevicesMerged { winner, loser } => {
                    let conn = self.db.conn();
                    audit::append(
                        &conn,
                        "device",
                        &winner.to_string(),
                        "merge",
                        Some(&loser.to_string()),
                        Some(&winner.to_string()),
                        "correlation",
                        Utc::now(),
                    )?;
                    let removed = devices::delete(&conn, loser)?;
                    log::info!("merged device {loser} into {winner} ({removed} row removed)");
                    self.notify_risk(winner);
                }
                CorrelationEvent::ConnectionUpserted { connection, .. } => {
                    let conn = self.db.conn();
                    connections::upsert(&conn, &connection)?;
                }
                CorrelationEvent::AlertRaised(alert) => {
                    {
                        let conn = self.db.conn();
                        alerts::create(&conn, &alert)?;
                    }
                    self.publish_alert(&alert).await;
                }
            }
        }
        Ok(())
    }

    async fn publish_alert(&self, alert: &mk_model::Alert) {
        let Some(transport) = &self.transport else {
            return;
        };
        match serde_json::to_vec(alert) {
            Ok(payload) => {
                if let Err(e) = transport
                    .publish(ALERTS_TOPIC, &payload, QosLevel::ExactlyOnce, false)
                    .await
                {
                    log::warn!("alert publish failed: {e}");
                }
            }
            Err(e) => log::error!("alert serialization failed: {e}"),
        }
    }

    fn notify_risk(&self, device_id: Uuid) {
        if let Some(tx) = &self.risk_tx {
            // Risk recomputation is best-effort on change; the hourly
            // cadence catches anything dropped here.
            let _ = tx.try_send(device_id);
        }
    }

    fn take_snapshot(&mut self) -> Result<(), CorrelationError> {
        let duration_ms = self.last_snapshot.elapsed().as_millis() as u64;
        let sources: Vec<TelemetrySource> = self
            .sources_seen
            .iter()
            .filter_map(|s| serde_json::from_value(serde_json::Value::String(s.clone())).ok())
            .collect();
        let conn = self.db.conn();
        let snapshot = snapshots::capture(&conn, duration_ms, sources, Utc::now())?;
        log::info!(
            "topology snapshot {}: {} devices, {} connections",
            snapshot.id,
            snapshot.summary.device_count,
            snapshot.summary.connection_count
        );
        self.last_snapshot = Instant::now();
        self.changes_since_snapshot = 0;
        Ok(())
    }
}
