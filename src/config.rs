//! Configuration types for block-fetch

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ServerAddress;

/// Limits and switches for a fetch iterator.
///
/// All values are read once when the iterator is built. Missing fields fall back to the
/// defaults below when deserializing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum bytes of remote blocks in flight at once (default: 48 MiB)
    ///
    /// Individual requests are capped at a fifth of this so that several servers can be
    /// fetched from concurrently. A single request larger than the whole budget is still
    /// admitted when nothing else is in flight.
    #[serde(default = "default_max_bytes_in_flight")]
    pub max_bytes_in_flight: u64,

    /// Maximum number of remote requests in flight at once (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub max_reqs_in_flight: usize,

    /// Maximum number of blocks in flight per server (default: unlimited)
    ///
    /// Also caps the number of blocks grouped into one request.
    #[serde(default = "default_unlimited")]
    pub max_blocks_in_flight_per_address: usize,

    /// Eagerly decode small blocks to catch corruption and refetch them once (default: true)
    #[serde(default = "default_true")]
    pub detect_corrupt: bool,

    /// Number of worker threads and concurrent prepare tasks in the shared pool (default: 8)
    #[serde(default = "default_prepare_concurrency")]
    pub prepare_concurrency: usize,

    /// Address of this process; blocks located here are read locally (default: none)
    #[serde(default)]
    pub local_address: Option<ServerAddress>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes_in_flight: default_max_bytes_in_flight(),
            max_reqs_in_flight: default_unlimited(),
            max_blocks_in_flight_per_address: default_unlimited(),
            detect_corrupt: true,
            prepare_concurrency: default_prepare_concurrency(),
            local_address: None,
        }
    }
}

impl FetchConfig {
    /// Parse a JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FetchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would stall the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes_in_flight == 0 {
            return Err(Error::config(
                "max_bytes_in_flight",
                "max_bytes_in_flight must be greater than zero",
            ));
        }
        if self.max_reqs_in_flight == 0 {
            return Err(Error::config(
                "max_reqs_in_flight",
                "max_reqs_in_flight must be greater than zero",
            ));
        }
        if self.max_blocks_in_flight_per_address == 0 {
            return Err(Error::config(
                "max_blocks_in_flight_per_address",
                "max_blocks_in_flight_per_address must be greater than zero",
            ));
        }
        if self.prepare_concurrency == 0 {
            return Err(Error::config(
                "prepare_concurrency",
                "prepare_concurrency must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Target size of a single remote request
    pub fn target_request_size(&self) -> u64 {
        (self.max_bytes_in_flight / 5).max(1)
    }

    /// Blocks at or above this size skip eager corruption detection
    pub(crate) fn corruption_check_limit(&self) -> u64 {
        self.max_bytes_in_flight / 3
    }
}

fn default_max_bytes_in_flight() -> u64 {
    48 * 1024 * 1024
}

fn default_unlimited() -> usize {
    usize::MAX
}

fn default_true() -> bool {
    true
}

fn default_prepare_concurrency() -> usize {
    8
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FetchConfig::default();
        assert_eq!(config.max_bytes_in_flight, 48 * 1024 * 1024);
        assert_eq!(config.max_reqs_in_flight, usize::MAX);
        assert_eq!(config.max_blocks_in_flight_per_address, usize::MAX);
        assert!(config.detect_corrupt);
        assert_eq!(config.prepare_concurrency, 8);
        assert!(config.local_address.is_none());
        config.validate().expect("defaults must be valid");
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config = FetchConfig::from_json("{}").expect("deserialize failed");
        assert_eq!(config, FetchConfig::default());
    }

    #[test]
    fn partial_json_overrides_only_given_fields() {
        let json = r#"{
            "max_bytes_in_flight": 1000,
            "max_reqs_in_flight": 4,
            "detect_corrupt": false,
            "local_address": {"host": "10.0.0.1", "port": 7337, "server_id": "exec-0"}
        }"#;
        let config = FetchConfig::from_json(json).expect("deserialize failed");

        assert_eq!(config.max_bytes_in_flight, 1000);
        assert_eq!(config.max_reqs_in_flight, 4);
        assert!(!config.detect_corrupt);
        assert_eq!(config.max_blocks_in_flight_per_address, usize::MAX);
        assert_eq!(
            config.local_address,
            Some(ServerAddress::new("10.0.0.1", 7337, "exec-0"))
        );
    }

    #[test]
    fn zero_limits_are_rejected_with_the_offending_key() {
        let cases = [
            (
                FetchConfig {
                    max_bytes_in_flight: 0,
                    ..FetchConfig::default()
                },
                "max_bytes_in_flight",
            ),
            (
                FetchConfig {
                    max_reqs_in_flight: 0,
                    ..FetchConfig::default()
                },
                "max_reqs_in_flight",
            ),
            (
                FetchConfig {
                    max_blocks_in_flight_per_address: 0,
                    ..FetchConfig::default()
                },
                "max_blocks_in_flight_per_address",
            ),
            (
                FetchConfig {
                    prepare_concurrency: 0,
                    ..FetchConfig::default()
                },
                "prepare_concurrency",
            ),
        ];

        for (config, expected_key) in cases {
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some(expected_key));
                }
                other => panic!("expected config error for {expected_key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn from_json_rejects_invalid_values() {
        let result = FetchConfig::from_json(r#"{"max_reqs_in_flight": 0}"#);
        assert!(matches!(result, Err(Error::Config { .. })));

        let result = FetchConfig::from_json(r#"{"max_bytes_in_flight": -5}"#);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn target_request_size_is_a_fifth_of_the_budget_but_at_least_one() {
        let mut config = FetchConfig {
            max_bytes_in_flight: 1000,
            ..FetchConfig::default()
        };
        assert_eq!(config.target_request_size(), 200);

        config.max_bytes_in_flight = 3;
        assert_eq!(config.target_request_size(), 1);
    }
}
