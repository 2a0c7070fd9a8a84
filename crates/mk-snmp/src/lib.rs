//! # mk-snmp
//!
//! SNMPv3 client used by the SNMP collector. Implements the parts of the
//! protocol the pipeline actually needs:
//!
//! - BER encode/decode of SNMPv3 messages (no ASN.1 compiler, the subset
//!   is small and fixed)
//! - User Security Model with authentication (MD5, SHA-1, SHA-224/256/384/512
//!   HMACs) and privacy (DES-CBC, AES-128/256-CFB)
//! - Engine discovery, GET / GET-NEXT / GET-BULK, and subtree walks over
//!   UDP with per-request timeout and retry
//!
//! Production deployments run `authPriv`; the lower security levels exist
//! for lab targets and tests.

pub mod ber;
pub mod client;
pub mod message;
pub mod mibs;
pub mod oid;
pub mod usm;

pub use ber::BerValue;
pub use client::{SnmpClient, SnmpTarget};
pub use message::{Pdu, PduType, VarBind};
pub use oid::Oid;
pub use usm::{AuthProtocol, PrivProtocol, SecurityLevel};

/// Errors from the SNMP client and codec.
#[derive(thiserror::Error, Debug)]
pub enum SnmpError {
    #[error("BER decode error: {0}")]
    Decode(String),

    #[error("BER encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0} attempts")]
    Timeout(u32),

    #[error("authentication failure: {0}")]
    Authentication(String),

    #[error("decryption failure: {0}")]
    Privacy(String),

    #[error("agent reported error status {status} at index {index}")]
    AgentError { status: i64, index: i64 },

    #[error("engine discovery failed: {0}")]
    EngineDiscovery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}
