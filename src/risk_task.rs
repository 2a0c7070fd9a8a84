//! The risk recomputation task.
//!
//! Assessments run on a fixed cadence (default hourly) and whenever the
//! correlation actor signals a device change. Change notifications are
//! debounced: a burst of updates triggers one sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mk_analysis::{alert_for_assessment, AnalysisInput, RiskAnalyzer};
use mk_correlation::actor::ALERTS_TOPIC;
use mk_db::{alerts, connections, devices, risk, zones, Database};
use mk_transport::{QosLevel, TransportClient};

pub const DEFAULT_RISK_INTERVAL: Duration = Duration::from_secs(3600);
const CHANGE_DEBOUNCE: Duration = Duration::from_secs(30);

pub struct RiskTask {
    db: Arc<Database>,
    transport: Option<TransportClient>,
    changes: mpsc::Receiver<Uuid>,
    interval: Duration,
    analyzer: RiskAnalyzer,
}

impl RiskTask {
    pub fn new(
        db: Arc<Database>,
        transport: Option<TransportClient>,
        changes: mpsc::Receiver<Uuid>,
        interval: Duration,
    ) -> Self {
        RiskTask {
            db,
            transport,
            changes,
            interval,
            analyzer: RiskAnalyzer::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut cadence = tokio::time::interval(self.interval);
        cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        cadence.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("risk task stopped");
                    return;
                }
                _ = cadence.tick() => {
                    self.sweep().await;
                }
                changed = self.changes.recv() => match changed {
                    Some(_) => {
                        // Swallow the burst, then sweep once.
                        let debounce = tokio::time::sleep(CHANGE_DEBOUNCE);
                        tokio::pin!(debounce);
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = &mut debounce => break,
                                more = self.changes.recv() => {
                                    if more.is_none() {
                                        break;
                                    }
                                }
                            }
                        }
                        self.sweep().await;
                    }
                    None => {
                        log::debug!("change channel closed; cadence-only risk sweeps");
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        }
    }

    /// One full assessment pass over the persisted topology.
    async fn sweep(&self) {
        let now = Utc::now();
        let loaded = {
            let conn = self.db.conn();
            devices::list(&conn).and_then(|devices| {
                let connections = connections::list(&conn)?;
                let zones = zones::list(&conn)?;
                Ok((devices, connections, zones))
            })
        };
        let (device_list, connection_list, zone_list) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("risk sweep could not load topology: {e}");
                return;
            }
        };
        if device_list.is_empty() {
            return;
        }

        let input = AnalysisInput {
            devices: &device_list,
            connections: &connection_list,
            zones: &zone_list,
        };
        let assessments = self.analyzer.assess_all(&input, now);
        log::info!("risk sweep assessed {} devices", assessments.len());

        for assessment in assessments {
            let Some(device) = device_list.iter().find(|d| d.id == assessment.device_id) else {
                continue;
            };
            {
                let conn = self.db.conn();
                if let Err(e) = risk::upsert(&conn, &assessment) {
                    log::error!("risk persistence for {} failed: {e}", device.name);
                    continue;
                }
            }
            if let Some(alert) = alert_for_assessment(device, &assessment, now) {
                let insert = {
                    let conn = self.db.conn();
                    alerts::create(&conn, &alert)
                };
                match insert {
                    Ok(()) => self.publish(&alert).await,
                    Err(e) => log::error!("risk alert persistence failed: {e}"),
                }
            }
        }
    }

    async fn publish(&self, alert: &mk_model::Alert) {
        let Some(transport) = &self.transport else {
            return;
        };
        match serde_json::to_vec(alert) {
            Ok(payload) => {
                if let Err(e) = transport
                    .publish(ALERTS_TOPIC, &payload, QosLevel::ExactlyOnce, false)
                    .await
                {
                    log::warn!("risk alert publish failed: {e}");
                }
            }
            Err(e) => log::error!("risk alert serialization failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk_model::{Device, DeviceType, PurdueLevel};

    #[tokio::test]
    async fn test_sweep_persists_assessments() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let device = {
            let mut device = Device::new("plc", Utc::now());
            device.device_type = DeviceType::Plc;
            device.set_purdue_level(PurdueLevel::Level1);
            let conn = db.conn();
            devices::insert(&conn, &device).unwrap();
            device
        };

        let (_tx, rx) = mpsc::channel(4);
        let task = RiskTask::new(db.clone(), None, rx, DEFAULT_RISK_INTERVAL);
        task.sweep().await;

        let conn = db.conn();
        let stored = risk::find_by_device(&conn, device.id).unwrap().unwrap();
        assert!(stored.weights_valid());
        assert!(stored.overall_score > 0);
    }
}
