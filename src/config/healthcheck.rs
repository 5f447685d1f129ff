// ABOUTME: Candidate health check configuration.
// ABOUTME: HTTP path, expected status and the polling policy with defaults.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthcheckConfig {
    #[serde(default = "default_path")]
    pub path: String,

    /// Status treated as healthy. Any 2xx when unset.
    #[serde(default)]
    pub expected_status: Option<u16>,

    /// `Host` header sent with each probe.
    #[serde(default)]
    pub host: Option<String>,

    #[serde(
        default = "default_interval",
        with = "humantime_serde",
        alias = "health_check_interval"
    )]
    pub interval: Duration,

    #[serde(
        default = "default_timeout",
        with = "humantime_serde",
        alias = "health_check_timeout"
    )]
    pub timeout: Duration,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default, with = "humantime_serde")]
    pub start_period: Duration,
}

fn default_path() -> String {
    "/health".to_string()
}

pub(super) fn default_interval() -> Duration {
    Duration::from_secs(5)
}

pub(super) fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_success_threshold() -> u32 {
    1
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        HealthcheckConfig {
            path: default_path(),
            expected_status: None,
            host: None,
            interval: default_interval(),
            timeout: default_timeout(),
            success_threshold: default_success_threshold(),
            request_timeout: default_request_timeout(),
            start_period: Duration::ZERO,
        }
    }
}
