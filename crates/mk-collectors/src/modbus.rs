//! Modbus TCP collector.
//!
//! Per target per poll, reads the declared register set over an MBAP
//! session. A failed register read is logged and skipped; it never
//! aborts the rest of the target's cycle.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use mk_model::{
    ModbusPayload, RegisterReading, ScalarValue, TelemetryPayload, TelemetryRecord,
    TelemetrySource,
};
use mk_parsers::modbus::{decode_bit, decode_registers, RegisterKind, RegisterSpec};

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::runtime::run_poll_loop;
use crate::{Collector, CollectorContext, CollectorError};

pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// One Modbus TCP target with its declared register set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTargetConfig {
    pub host: Ipv4Addr,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    pub registers: Vec<RegisterSpec>,
}

fn default_modbus_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_unit_id() -> u8 {
    1
}

pub struct ModbusCollector {
    config: CollectorConfig,
    targets: Vec<ModbusTargetConfig>,
    health: Arc<CollectorHealth>,
}

impl ModbusCollector {
    pub fn new(
        config: CollectorConfig,
        targets: Vec<ModbusTargetConfig>,
    ) -> Result<Self, CollectorError> {
        config.validate()?;
        let health = Arc::new(CollectorHealth::new());
        health.set_target_count(targets.len());
        Ok(ModbusCollector {
            config,
            targets,
            health,
        })
    }

    async fn poll_all(&self) -> Result<Vec<TelemetryRecord>, CollectorError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let timeout = self.config.timeout;
        let mut set = JoinSet::new();
        for target in self.targets.clone() {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                poll_target(&target, timeout).await
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(Some(record))) => records.push(record),
                Ok(Ok(None)) => {}
                Ok(Err((host, e))) => {
                    self.health.record_error();
                    log::warn!("Modbus poll of {host} failed: {e}");
                }
                Err(e) => {
                    self.health.record_error();
                    log::error!("Modbus poll task failed: {e}");
                }
            }
        }
        Ok(records)
    }
}

async fn poll_target(
    target: &ModbusTargetConfig,
    timeout: Duration,
) -> Result<Option<TelemetryRecord>, (Ipv4Addr, CollectorError)> {
    let host = target.host;
    let mut session = MbapSession::connect(host, target.port, target.unit_id, timeout)
        .await
        .map_err(|e| (host, e))?;

    let mut readings = Vec::new();
    for spec in &target.registers {
        match session.read_register(spec).await {
            Ok(value) => readings.push(RegisterReading {
                name: spec.name.clone(),
                address: spec.address,
                value,
                unit: spec.unit.clone(),
            }),
            Err(e) => {
                // One bad register never aborts the target cycle.
                log::debug!("{host}: register {} read failed: {e}", spec.name);
            }
        }
    }

    if readings.is_empty() {
        return Ok(None);
    }
    Ok(Some(TelemetryRecord::new(
        TelemetryPayload::Modbus(ModbusPayload {
            target: host,
            unit_id: target.unit_id,
            readings,
        }),
        chrono::Utc::now(),
    )))
}

/// A Modbus TCP (MBAP) session.
struct MbapSession {
    stream: TcpStream,
    unit_id: u8,
    transaction_id: u16,
    timeout: Duration,
}

impl MbapSession {
    async fn connect(
        host: Ipv4Addr,
        port: u16,
        unit_id: u8,
        timeout: Duration,
    ) -> Result<Self, CollectorError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| CollectorError::Timeout)??;
        Ok(MbapSession {
            stream,
            unit_id,
            transaction_id: 0,
            timeout,
        })
    }

    async fn read_register(&mut self, spec: &RegisterSpec) -> Result<ScalarValue, CollectorError> {
        let count = spec.data_type.word_count();
        let (function, count) = match spec.kind {
            RegisterKind::Coil => (0x01u8, 1u16),
            RegisterKind::DiscreteInput => (0x02, 1),
            RegisterKind::HoldingRegister => (0x03, count),
            RegisterKind::InputRegister => (0x04, count),
        };
        let data = self.request(function, spec.address, count).await?;

        match spec.kind {
            RegisterKind::Coil | RegisterKind::DiscreteInput => {
                Ok(ScalarValue::Bool(decode_bit(&data, 0)?))
            }
            RegisterKind::HoldingRegister | RegisterKind::InputRegister => {
                if data.len() < count as usize * 2 {
                    return Err(CollectorError::Protocol(format!(
                        "short register response: {} bytes for {} words",
                        data.len(),
                        count
                    )));
                }
                let words: Vec<u16> = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(decode_registers(&words, spec.data_type, spec.scale)?)
            }
        }
    }

    /// One MBAP request/response exchange. Returns the payload bytes
    /// after the byte-count field.
    async fn request(
        &mut self,
        function: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u8>, CollectorError> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let mut frame = Vec::with_capacity(12);
        frame.extend_from_slice(&self.transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
        frame.extend_from_slice(&6u16.to_be_bytes()); // remaining length
        frame.push(self.unit_id);
        frame.push(function);
        frame.extend_from_slice(&address.to_be_bytes());
        frame.extend_from_slice(&count.to_be_bytes());

        tokio::time::timeout(self.timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| CollectorError::Timeout)??;

        let mut header = [0u8; 7];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| CollectorError::Timeout)??;
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || length > 260 {
            return Err(CollectorError::Protocol(format!(
                "implausible MBAP length {length}"
            )));
        }

        // length counts unit id (already read) + function + data.
        let mut body = vec![0u8; length - 1];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| CollectorError::Timeout)??;

        let response_fc = body[0];
        if response_fc == function | 0x80 {
            let exception = body.get(1).copied().unwrap_or(0);
            return Err(CollectorError::Protocol(format!(
                "Modbus exception {exception:#04x} for function {function:#04x}"
            )));
        }
        if response_fc != function {
            return Err(CollectorError::Protocol(format!(
                "function mismatch: sent {function:#04x}, got {response_fc:#04x}"
            )));
        }
        // body[1] is the byte count; the rest is data.
        if body.len() < 2 {
            return Err(CollectorError::Protocol("empty Modbus response".to_string()));
        }
        Ok(body[2..].to_vec())
    }
}

#[async_trait]
impl Collector for ModbusCollector {
    fn name(&self) -> &'static str {
        "modbus"
    }

    fn source(&self) -> TelemetrySource {
        TelemetrySource::Modbus
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn health(&self) -> Arc<CollectorHealth> {
        self.health.clone()
    }

    async fn start(&mut self) -> Result<(), CollectorError> {
        for target in &self.targets {
            if target.registers.is_empty() {
                return Err(CollectorError::Config(format!(
                    "Modbus target {} declares no registers",
                    target.host
                )));
            }
        }
        Ok(())
    }

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
        let config = self.config.clone();
        let health = self.health.clone();
        let this: &ModbusCollector = self;
        run_poll_loop(
            "modbus",
            TelemetrySource::Modbus,
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
    use mk_parsers::modbus::RegisterDataType;
    use tokio::net::TcpListener;

    fn spec(kind: RegisterKind, data_type: RegisterDataType) -> RegisterSpec {
        RegisterSpec {
            name: "temp".to_string(),
            address: 100,
            kind,
            data_type,
            scale: Some(0.1),
            unit: Some("degC".to_string()),
        }
    }

    /// A scripted Modbus server answering one holding-register read.
    async fn one_shot_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(request[7], 0x03); // holding register read
            let mut response = Vec::new();
            response.extend_from_slice(&request[0..2]); // transaction id
            response.extend_from_slice(&0u16.to_be_bytes());
            response.extend_from_slice(&5u16.to_be_bytes()); // unit + fc + bc + 2 data
            response.push(request[6]); // unit id
            response.push(0x03);
            response.push(2); // byte count
            response.extend_from_slice(&215u16.to_be_bytes());
            stream.write_all(&response).await.unwrap();
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_read_holding_register_with_scale() {
        let (addr, server) = one_shot_server().await;
        let host = match addr {
            std::net::SocketAddr::V4(v4) => *v4.ip(),
            _ => unreachable!(),
        };
        let mut session =
            MbapSession::connect(host, addr.port(), 1, Duration::from_secs(2))
                .await
                .unwrap();
        let value = session
            .read_register(&spec(RegisterKind::HoldingRegister, RegisterDataType::Uint16))
            .await
            .unwrap();
        match value {
            ScalarValue::Float(v) => assert!((v - 21.5).abs() < 1e-9),
            other => panic!("unexpected value {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exception_response_is_error_not_abort() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            stream.read_exact(&mut request).await.unwrap();
            let mut response = Vec::new();
            response.extend_from_slice(&request[0..2]);
            response.extend_from_slice(&0u16.to_be_bytes());
            response.extend_from_slice(&3u16.to_be_bytes());
            response.push(request[6]);
            response.push(0x83); // exception for fc 3
            response.push(0x02); // illegal data address
            stream.write_all(&response).await.unwrap();
        });
        let host = match addr {
            std::net::SocketAddr::V4(v4) => *v4.ip(),
            _ => unreachable!(),
        };
        let mut session =
            MbapSession::connect(host, addr.port(), 1, Duration::from_secs(2))
                .await
                .unwrap();
        let result = session
            .read_register(&spec(RegisterKind::HoldingRegister, RegisterDataType::Uint16))
            .await;
        assert!(matches!(result, Err(CollectorError::Protocol(_))));
    }

    #[test]
    fn test_collector_rejects_empty_register_set() {
        let mut collector = ModbusCollector::new(
            CollectorConfig::default(),
            vec![ModbusTargetConfig {
                host: "10.0.1.60".parse().unwrap(),
                port: 502,
                unit_id: 1,
                registers: vec![],
            }],
        )
        .unwrap();
        let result = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(collector.start());
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }
}
