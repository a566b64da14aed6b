//! # Stockpile Log
//!
//! Global `tracing` subscriber setup for the stockpile crates.
//!
//! ```no_run
//! // Reads STOCKPILE_LOG / RUST_LOG and STOCKPILE_LOG_FORMAT
//! let _guard = stockpile_log::init().expect("logger");
//! tracing::info!("ready");
//! ```

pub mod builder;
pub mod config;
pub mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, Writer};
pub use error::{LogError, LogResult};

/// Install a subscriber configured from the environment
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::from_env())
}

/// Install a subscriber from an explicit configuration
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Install the test subscriber; later calls are no-ops.
pub fn init_test() {
    // only the first test in a binary wins the global slot
    let _ = init_with(Config::test());
}
