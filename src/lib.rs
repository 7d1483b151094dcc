pub mod config;
pub mod engine;
pub mod generators;
pub mod service;

pub use crate::config::DocgenConfig;
pub use crate::generators::{GenerationRequest, GenerationResult, GeneratorError};
pub use crate::service::DocumentService;

/// Initialise `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
