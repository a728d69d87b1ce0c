use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use super::{env_var, ConfigError};

/// Default database file path.
const DEFAULT_DB_PATH: &str = "fluxrevenue.db";

/// Database location and sizing configuration.
#[derive(Clone, Deserialize, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// Location of the database file. Deleting the file is a clean reset.
    pub path: PathBuf,
    /// Soft cap on database size in GB; exceeding it is logged, not fatal.
    pub max_size_gb: u64,
}

impl DatabaseConfig {
    pub(super) fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(path) = env_var::<PathBuf>("DB_PATH")? {
            self.path = path;
        }
        if let Some(size) = env_var::<u64>("MAX_DB_SIZE_GB")? {
            self.max_size_gb = size;
        }
        Ok(self)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from_str(DEFAULT_DB_PATH).unwrap_or_default(),
            max_size_gb: 10,
        }
    }
}
