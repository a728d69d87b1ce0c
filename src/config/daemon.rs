use std::time::Duration;

use hyper::Uri;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationMilliSeconds, DurationSeconds};

use super::{env_var, ConfigError};

/// Flux daemon and stats host configuration.
#[serde_as]
#[derive(Deserialize, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// URL of the Flux daemon API.
    #[serde_as(as = "DisplayFromStr")]
    pub url: Uri,
    /// URL of the network statistics host.
    #[serde_as(as = "DisplayFromStr")]
    pub stats_url: Uri,
    /// Timeout in seconds for a full API call.
    #[serde_as(as = "DurationSeconds")]
    pub rpc_timeout: Duration,
    /// Timeout in seconds for establishing a connection.
    #[serde_as(as = "DurationSeconds")]
    pub connection_timeout: Duration,
    /// Outer deadline in seconds for one network statistics collection.
    #[serde_as(as = "DurationSeconds")]
    pub collection_timeout: Duration,
    /// Maximum concurrent outbound requests.
    pub max_concurrent: usize,
    /// Pause in milliseconds between block batches, to be gentle on public
    /// nodes.
    #[serde_as(as = "DurationMilliSeconds")]
    pub request_delay: Duration,
    /// Block bodies kept in the client's cache.
    pub block_cache_size: usize,
    /// Resolved sender addresses kept in the client's cache.
    pub sender_cache_size: usize,
}

impl DaemonConfig {
    pub(super) fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(url) = env_var::<Uri>("DAEMON_URL")? {
            self.url = url;
        }
        if let Some(url) = env_var::<Uri>("STATS_URL")? {
            self.stats_url = url;
        }
        if let Some(secs) = env_var::<u64>("RPC_TIMEOUT")? {
            self.rpc_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var::<u64>("CONNECTION_TIMEOUT")? {
            self.connection_timeout = Duration::from_secs(secs);
        }
        if let Some(count) = env_var::<usize>("MAX_CONCURRENT")? {
            self.max_concurrent = count;
        }
        if let Some(millis) = env_var::<u64>("REQUEST_DELAY")? {
            self.request_delay = Duration::from_millis(millis);
        }
        Ok(self)
    }

    pub(super) fn validate(&self) {
        assert!(
            self.max_concurrent > 0,
            "max-concurrent must be at least 1"
        );
        assert!(
            !self.rpc_timeout.is_zero(),
            "rpc-timeout must be at least 1 second"
        );
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            url: Uri::from_static("https://api.runonflux.io"),
            stats_url: Uri::from_static("https://stats.runonflux.io"),
            rpc_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            collection_timeout: Duration::from_secs(60),
            max_concurrent: 10,
            request_delay: Duration::ZERO,
            block_cache_size: 64,
            sender_cache_size: 10_000,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use std::{env, panic::catch_unwind, time::Duration};

    use super::DaemonConfig;

    #[test]
    fn apply_env_overrides() {
        env::set_var("MAX_CONCURRENT", "4");
        env::set_var("REQUEST_DELAY", "250");

        let config = DaemonConfig::default().apply_env_overrides().unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.request_delay, Duration::from_millis(250));

        env::remove_var("MAX_CONCURRENT");
        env::remove_var("REQUEST_DELAY");
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = DaemonConfig {
            max_concurrent: 0,
            ..DaemonConfig::default()
        };
        catch_unwind(|| config.validate()).expect_err("zero concurrency should be invalid");
    }

    #[test]
    fn default_is_valid() {
        DaemonConfig::default().validate();
    }
}
