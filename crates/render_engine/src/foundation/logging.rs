//! Logging utilities
//!
//! The engine logs through the `log` facade; applications call [`init`] once
//! to install `env_logger` as the backend.

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
///
/// `RUST_LOG` wins when it is set; otherwise `default_level` (for example
/// `"info"` or `"render_engine=debug"`) is used as the filter.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);

    // A second init (tests, embedding apps) is not an error worth surfacing.
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialized");
    }
}
