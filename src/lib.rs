// Core
pub mod context;
pub mod database;
pub mod queue;

// Supporting modules
pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
