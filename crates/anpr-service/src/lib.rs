pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod ocr_mode;
pub mod pipeline;
pub mod results;
pub mod state;
pub mod store;
pub mod video;

pub use config::AnprServiceConfig;
pub use error::{ApiError, PipelineError};
pub use state::{AnprServiceState, Backends};
