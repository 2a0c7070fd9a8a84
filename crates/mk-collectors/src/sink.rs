//! Where collector output goes: the correlation channel, and the broker
//! as a JSON telemetry envelope.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use mk_model::{TelemetryRecord, TelemetrySource};
use mk_transport::{QosLevel, TransportClient};

use crate::CollectorError;

pub const TELEMETRY_TOPIC: &str = "scada/telemetry";

/// The broker-side batch envelope.
#[derive(Debug, Serialize)]
struct TelemetryEnvelope<'a> {
    collector: &'a str,
    source: String,
    timestamp: String,
    count: usize,
    data: &'a [TelemetryRecord],
}

/// Fan-out for emitted records. Cloneable; one per pipeline.
#[derive(Clone)]
pub struct TelemetrySink {
    tx: mpsc::Sender<TelemetryRecord>,
    transport: Option<TransportClient>,
}

impl TelemetrySink {
    pub fn new(tx: mpsc::Sender<TelemetryRecord>, transport: Option<TransportClient>) -> Self {
        TelemetrySink { tx, transport }
    }

    /// Emit one batch from a collector. Records are forwarded to the
    /// correlation channel in order; the broker publish is best-effort
    /// (a down broker never blocks local correlation).
    pub async fn emit(
        &self,
        collector: &str,
        source: TelemetrySource,
        records: Vec<TelemetryRecord>,
    ) -> Result<(), CollectorError> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(transport) = &self.transport {
            let envelope = TelemetryEnvelope {
                collector,
                source: source.to_string(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                count: records.len(),
                data: &records,
            };
            match serde_json::to_vec(&envelope) {
                Ok(payload) => {
                    if let Err(e) = transport
                        .publish(TELEMETRY_TOPIC, &payload, QosLevel::AtLeastOnce, false)
                        .await
                    {
                        log::warn!("telemetry publish from {collector} failed: {e}");
                    }
                }
                Err(e) => log::error!("telemetry envelope serialization failed: {e}"),
            }
        }

        for record in records {
            self.tx
                .send(record)
                .await
                .map_err(|_| CollectorError::Shutdown)?;
        }
        Ok(())
    }
}
