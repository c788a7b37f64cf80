pub mod config;
pub mod pipeline;
pub mod source;
pub mod telemetry;
