//! # mk-collectors
//!
//! The collector runtime. Every collector implements the [`Collector`]
//! capability interface (start/run/stop plus health), composing the
//! shared polling, batching and retry helpers from [`runtime`] instead
//! of inheriting from a base class.
//!
//! Poll-driven collectors (SNMP, ARP, Modbus, OPC-UA) tick at fixed
//! wall-clock intervals with single-flight semantics: a poll that
//! overruns its tick makes the runtime skip the next tick. Listener
//! collectors (NetFlow, syslog) own a socket and push what arrives.
//!
//! All emitted records flow through the [`sink::TelemetrySink`]: into
//! the correlation channel, and as JSON envelopes to the broker's
//! `scada/telemetry` topic.

pub mod arp;
pub mod config;
pub mod health;
pub mod manager;
pub mod modbus;
pub mod netflow;
pub mod opcua;
pub mod opcua_wire;
pub mod runtime;
pub mod sink;
pub mod snmp;
pub mod syslog;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mk_model::TelemetrySource;

pub use config::CollectorConfig;
pub use health::{CollectorHealth, HealthSnapshot};
pub use manager::CollectorManager;
pub use sink::TelemetrySink;

/// Errors from collectors.
#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SNMP error: {0}")]
    Snmp(#[from] mk_snmp::SnmpError),

    #[error("parse error: {0}")]
    Parse(#[from] mk_parsers::ParseError),

    #[error("transport error: {0}")]
    Transport(#[from] mk_transport::TransportError),

    #[error("operation timed out")]
    Timeout,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("pipeline is shutting down")]
    Shutdown,
}

impl CollectorError {
    /// Transient failures are retried with backoff; permanent ones
    /// surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            CollectorError::Io(_) | CollectorError::Timeout => true,
            CollectorError::Snmp(e) => matches!(
                e,
                mk_snmp::SnmpError::Io(_) | mk_snmp::SnmpError::Timeout(_)
            ),
            CollectorError::Transport(e) => {
                matches!(e, mk_transport::TransportError::NotConnected)
            }
            _ => false,
        }
    }
}

/// Everything a running collector needs from the outside world.
#[derive(Clone)]
pub struct CollectorContext {
    pub sink: TelemetrySink,
    pub cancel: CancellationToken,
}

/// The collector capability interface.
///
/// `start` acquires resources (sockets, sessions) and may fail; the
/// manager rolls back already-started collectors when one fails.
/// `run` loops until the context's cancellation token fires.
#[async_trait]
pub trait Collector: Send {
    fn name(&self) -> &'static str;

    fn source(&self) -> TelemetrySource;

    /// Disabled collectors are registered but never started.
    fn enabled(&self) -> bool {
        true
    }

    /// Shared health handle; stays valid after the collector is moved
    /// into its task.
    fn health(&self) -> Arc<CollectorHealth>;

    async fn start(&mut self) -> Result<(), CollectorError>;

    async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError>;

    /// Release resources. Used for rollback when a later collector
    /// fails to start. Default: nothing to release.
    async fn stop(&mut self) {}
}
