pub mod config;
pub mod error;
pub mod escrow;
pub mod telemetry;
