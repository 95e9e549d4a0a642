//! # OCPP Node
//!
//! Runnable node around the message exchange engine.
//!
//! - `config` - environment and file configuration
//! - `telemetry` - tracing subscriber setup
//! - `runtime` - engine wiring and the demo relay network

pub mod config;
pub mod runtime;
pub mod telemetry;

pub use config::{NodeConfig, TelemetryConfig};
pub use runtime::NodeRuntime;
pub use telemetry::init_tracing;
