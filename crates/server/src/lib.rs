pub mod config;
pub mod error;
pub mod store_factory;
pub mod telemetry;
