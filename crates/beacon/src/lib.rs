//! Emergency-response coordination core.
//!
//! Ingests incident reports from heterogeneous sources, classifies and
//! prioritises them, selects a response team under capacity constraints,
//! drives each ticket through its acceptance lifecycle, and keeps the
//! workload counters consistent across the whole journey.

pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod identity;
pub mod store;
pub mod telemetry;
pub mod workflows;

pub use error::CoreError;
