mod daemon;
mod database;
mod logging;
mod sync;

use std::{
    env::{self, VarError},
    fmt::Display,
    fs::File,
    io,
    io::{ErrorKind as IoErrorKind, Write},
    path::PathBuf,
    str::FromStr,
};

use clap::{Arg, ArgAction, Command};
pub use daemon::DaemonConfig;
pub use database::DatabaseConfig;
use dotenv::dotenv;
use log::info;
pub use logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::Error as YamlError;
pub use sync::{OptimizationLevel, SyncConfig};
use thiserror::Error;

/// Indexer configuration.
#[derive(Default, Deserialize, PartialEq, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Addresses to index payments for.
    pub addresses: Vec<String>,
    /// Flux daemon and stats host configuration.
    pub daemon: DaemonConfig,
    /// Sync cadence, budget, and retention configuration.
    pub sync: SyncConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Default configuration file path.
    pub const DEFAULT_PATH: &'static str = "fluxrevenue.yaml";

    /// Get config file path from CLI argument, env variable, or default (in
    /// that order).
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn get_path() -> PathBuf {
        let cli_matches = Command::new("fluxrevenue")
            .arg(
                Arg::new("config-file")
                    .short('f')
                    .long("config-file")
                    .action(ArgAction::Set)
                    .value_name("FILE")
                    .env("CONFIG_FILE")
                    .default_value(Self::DEFAULT_PATH)
                    .help("Specifies the config file to use. Defaults to ./fluxrevenue.yaml"),
            )
            .get_matches();

        // This `unwrap` is safe because args with a default never return `None`.
        PathBuf::from(cli_matches.get_one::<String>("config-file").unwrap())
    }

    /// Creates config from file. If the file is not found, creates it and
    /// populates it from defaults.
    fn from_file(path: &PathBuf) -> Result<Config, ConfigError> {
        let config_file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!(
                    "Config file {} not found. Creating it from defaults.",
                    path.display()
                );
                let mut f = File::create(path)?;
                let config = Config::default();
                f.write_all(serde_yaml::to_string(&config)?.as_bytes())?;
                return Ok(config);
            }
            Err(e) => return Err(e)?,
        };

        Ok(serde_yaml::from_reader(config_file)?)
    }

    fn apply_env_overrides(mut self) -> Result<Config, ConfigError> {
        if let Ok(raw) = env::var("FLUX_ADDRESSES") {
            self.addresses = raw
                .split(',')
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        self.daemon = self.daemon.apply_env_overrides()?;
        self.sync = self.sync.apply_env_overrides()?;
        self.database = self.database.apply_env_overrides()?;
        self.logging = self.logging.apply_env_overrides()?;
        Ok(self)
    }

    /// Expand the configured optimization preset, if any, into the
    /// individual throughput fields it covers.
    fn apply_optimization(&mut self) {
        if let Some(level) = self.sync.optimization {
            let (max_concurrent, batch_size, budget, delay) = level.tuning();
            info!("Applying \"{level}\" optimization preset");
            self.daemon.max_concurrent = max_concurrent;
            self.sync.batch_size = batch_size;
            self.sync.max_blocks_per_sync = budget;
            self.daemon.request_delay = delay;
        }
    }

    /// Validates configuration, panicking if it is invalid.
    pub fn validate(&self) {
        if self.addresses.is_empty() {
            log::warn!(
                "No addresses configured; the indexer will sync blocks but record no payments"
            );
        }
        self.daemon.validate();
        self.sync.validate();
    }

    /// Read config, expand the optimization preset, and apply environment
    /// overrides. Explicit per-field environment overrides win over the
    /// preset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment override has an invalid value.
    pub fn read(path: &PathBuf) -> Result<Config, ConfigError> {
        // Read from dotenv file if real environment variables are not set.
        dotenv().ok();

        let mut config = Self::from_file(path)?;
        if let Some(level) = env_var::<OptimizationLevel>("OPTIMIZATION_LEVEL")? {
            config.sync.optimization = Some(level);
        }
        config.apply_optimization();
        config.apply_env_overrides()
    }
}

/// Read and parse one environment variable, distinguishing "not set" from
/// "set to something unparseable".
pub(crate) fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|e| ConfigError::Parse {
            variable: name.to_string(),
            message: format!("{e}"),
        }),
        Err(VarError::NotPresent) => Ok(None),
        Err(e) => Err(e)?,
    }
}

/// An error occurring while reading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable could not be read.
    #[error("Failed to read config value from environment: {0}")]
    Env(#[from] VarError),
    /// The config file could not be read or created.
    #[error("Failed to read/write config file: {0}")]
    Io(#[from] io::Error),
    /// The config file is not valid YAML for this configuration.
    #[error("Error (de)serializing config file: {0}")]
    Yaml(#[from] YamlError),
    /// An environment override was set to an unparseable value.
    #[error("Environment variable {variable} has an invalid value: {message}")]
    Parse {
        /// The offending variable.
        variable: String,
        /// Why its value could not be parsed.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::time::Duration;

    use super::{Config, OptimizationLevel};

    #[test]
    fn default_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn default_is_valid() {
        Config::default().validate();
    }

    #[test]
    fn optimization_preset_overrides_throughput_fields() {
        let mut config = Config {
            sync: super::SyncConfig {
                optimization: Some(OptimizationLevel::Maximum),
                ..Default::default()
            },
            ..Default::default()
        };
        config.apply_optimization();

        assert_eq!(config.daemon.max_concurrent, 15);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.max_blocks_per_sync, 5000);
        assert_eq!(config.daemon.request_delay, Duration::from_millis(50));
    }

    #[test]
    fn from_yaml() {
        let yaml = "
addresses:
  - t1NodeOperator
  - t1SecondNode
daemon:
  url: http://127.0.0.1:16127
  stats-url: https://stats.example.com
  rpc-timeout: 20
  connection-timeout: 10
  collection-timeout: 90
  max-concurrent: 8
  request-delay: 100
  block-cache-size: 32
  sender-cache-size: 5000
sync:
  interval: 60
  max-blocks-per-sync: 1500
  batch-size: 40
  retention-days: 14
  blocks-per-day: 720
  gap-check-threshold: 0.9
database:
  path: data/revenue.db
  max-size-gb: 5
logging:
  verbosity: DEBUG
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate();
        assert_eq!(config.addresses.len(), 2);
        assert_eq!(config.sync.retention_days, 14);
        assert_eq!(config.daemon.rpc_timeout, Duration::from_secs(20));
        assert_eq!(config.logging.verbosity, log::LevelFilter::Debug);
    }
}
