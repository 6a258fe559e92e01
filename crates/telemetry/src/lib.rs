//! Logging and Prometheus metrics shared by the ANPR binaries.

pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, init_with_service, LogConfig, LogFormat};
