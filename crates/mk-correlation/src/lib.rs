//! # mk-correlation
//!
//! Folds the heterogeneous telemetry stream into the single-device-per-
//! identity invariant, classifies devices onto the Purdue model, and
//! discovers connections.
//!
//! All identity-mutating operations serialize through one logical
//! actor ([`actor::CorrelationActor`]): the engine itself is a plain
//! synchronous state machine, which keeps it testable and makes
//! duplicate-device races structurally impossible.

pub mod actor;
pub mod cache;
pub mod classify;
pub mod engine;

pub use actor::{ActorConfig, CorrelationActor};
pub use cache::IpDeviceCache;
pub use classify::{ClassifierRules, Classification, PurdueClassifier};
pub use engine::{CorrelationEngine, CorrelationEvent};

/// Errors from correlation and classification.
#[derive(thiserror::Error, Debug)]
pub enum CorrelationError {
    #[error("database error: {0}")]
    Db(#[from] mk_db::DbError),

    #[error("invalid classifier rules: {0}")]
    Rules(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}
