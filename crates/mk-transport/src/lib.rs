//! # mk-transport
//!
//! MQTT client for the broker leg of the pipeline. Mutual TLS 1.3 with
//! certificate paths loaded at startup, QoS 1 for telemetry and QoS 2
//! for alerts, `+`/`#` wildcard subscriptions, and automatic
//! reconnection with a fixed period and a bounded attempt budget.
//!
//! Session state machine:
//! `Idle → Connecting → Connected ⇄ Reconnecting → Closed`.
//! Every state change is observable through the event channel; each
//! reconnect attempt carries its attempt index.

pub mod client;
pub mod config;
pub mod topic;

pub use client::{ConnectionEvent, MessageHandler, QosLevel, SessionState, TransportClient};
pub use config::TransportConfig;
pub use topic::topic_matches;

/// Errors from the transport client.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected to broker")]
    NotConnected,

    #[error("TLS material unreadable: {0}")]
    Certificate(String),

    #[error("invalid topic pattern: {0}")]
    BadPattern(String),

    #[error("session closed")]
    Closed,
}
