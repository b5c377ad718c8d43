//! Runtime bootstrap for the querycache binary.

pub mod error;
pub mod telemetry;
