//! Logging utilities for the `fluxrevenued` binary.

use log::LevelFilter;

use fluxrevenue::config::LoggingConfig;

/// Initialize the logging implementation. Defaults to `Trace` verbosity for
/// `fluxrevenue` and `Warn` for dependencies.
pub fn init_logger() {
    env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter_module("fluxrevenue", LevelFilter::Trace)
        .filter_module("fluxrevenued", LevelFilter::Trace)
        .init();
}

/// Set verbosity to one of:
/// * Trace
/// * Debug
/// * Info
/// * Error
/// * Warn
pub fn set_verbosity(config: LoggingConfig) {
    log::set_max_level(config.verbosity);
}
