//! # mk-parsers
//!
//! Pure normalization functions turning raw collector input into typed
//! telemetry payloads. Parsers recover locally: a malformed record is
//! logged and dropped, never escalated.

pub mod arp;
pub mod modbus;
pub mod netflow;
pub mod snmp_norm;
pub mod syslog;

pub use netflow::{industrial_protocol_for_port, FlowAggregator, NetflowParse, TemplateCache};
pub use syslog::{alert_severity_for, is_security_event, parse_syslog};

/// Errors from the normalization layer.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("truncated datagram: {0}")]
    Truncated(String),

    #[error("unsupported NetFlow version {0}")]
    BadVersion(u16),

    #[error("syslog parse error: {0}")]
    Syslog(String),

    #[error("malformed field: {0}")]
    Field(String),

    #[error(transparent)]
    Validation(#[from] mk_model::ValidationError),
}
