//! Event-store port, adapters, and the aggregation layer.

pub mod aggregate;
pub mod csv;
pub mod filter;
pub mod memory;
pub mod store;
#[cfg(feature = "duckdb")]
pub mod duck;
