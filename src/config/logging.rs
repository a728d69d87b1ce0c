use log::LevelFilter;
use serde::{Deserialize, Serialize};

use super::{env_var, ConfigError};

/// Logging configuration.
#[derive(Deserialize, PartialEq, Eq, Clone, Copy, Debug, Serialize)]
pub struct LoggingConfig {
    /// Maximum log verbosity.
    pub verbosity: LevelFilter,
}

impl LoggingConfig {
    pub(super) fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(verbosity) = env_var::<LevelFilter>("LOG_LEVEL")? {
            self.verbosity = verbosity;
        }
        Ok(self)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: LevelFilter::Info,
        }
    }
}
