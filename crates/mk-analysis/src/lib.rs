//! # mk-analysis
//!
//! Risk assessment over the discovered topology. Pure computation: the
//! caller feeds devices, connections and zone definitions; out come
//! weighted assessments and the security alerts their scores warrant.
//!
//! Factor weights (fixed, summing to 1.0): vulnerability 0.35,
//! configuration 0.25, exposure 0.25, compliance 0.15.

pub mod compliance;
pub mod exposure;
pub mod risk;

pub use risk::{alert_for_assessment, AnalysisInput, RiskAnalyzer};

pub const WEIGHT_VULNERABILITY: f64 = 0.35;
pub const WEIGHT_CONFIGURATION: f64 = 0.25;
pub const WEIGHT_EXPOSURE: f64 = 0.25;
pub const WEIGHT_COMPLIANCE: f64 = 0.15;
