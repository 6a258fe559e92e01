pub mod detections;
pub mod geometry;
pub mod reports;
pub mod validation;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
