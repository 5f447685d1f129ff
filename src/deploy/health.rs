// ABOUTME: Health-gated waiting for a candidate release.
// ABOUTME: Polls a probe until enough consecutive successes or the deadline passes.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::cancel::CancelSignal;
use super::record::ProbeResult;
use crate::config::HealthcheckConfig;

/// Where and how to probe, and what counts as healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// `http://host:port/path`.
    pub url: String,
    /// Overrides the `Host` header derived from the URL.
    pub host_header: Option<String>,
    /// Exact status required; any 2xx when `None`.
    pub expected_status: Option<u16>,
    /// Response header reporting which slot served the request.
    pub slot_header: Option<String>,
    /// Value `slot_header` must carry for the probe to pass.
    pub expect_served_by: Option<String>,
}

impl ProbeTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host_header: None,
            expected_status: None,
            slot_header: None,
            expect_served_by: None,
        }
    }

    /// Whether a response with this status and slot header passes.
    pub fn accepts(&self, status: u16, served_by: Option<&str>) -> bool {
        let status_ok = match self.expected_status {
            Some(expected) => status == expected,
            None => (200..300).contains(&status),
        };
        let slot_ok = match self.expect_served_by.as_deref() {
            Some(expected) => served_by.is_some_and(|s| s.eq_ignore_ascii_case(expected)),
            None => true,
        };
        status_ok && slot_ok
    }
}

/// A single health probe. Implementations never fail: transport errors
/// become unsuccessful results.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub success_threshold: u32,
    pub request_timeout: Duration,
    pub start_period: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        HealthPolicy::from(&HealthcheckConfig::default())
    }
}

impl From<&HealthcheckConfig> for HealthPolicy {
    fn from(config: &HealthcheckConfig) -> Self {
        Self {
            interval: config.interval,
            timeout: config.timeout,
            success_threshold: config.success_threshold.max(1),
            request_timeout: config.request_timeout,
            start_period: config.start_period,
        }
    }
}

/// Why `wait_healthy` gave up. Both carry every probe made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthFailure {
    Timeout { attempts: Vec<ProbeResult> },
    Cancelled { attempts: Vec<ProbeResult> },
}

impl HealthFailure {
    pub fn into_attempts(self) -> Vec<ProbeResult> {
        match self {
            HealthFailure::Timeout { attempts } | HealthFailure::Cancelled { attempts } => attempts,
        }
    }
}

/// Probe `target` every `interval` until `success_threshold` consecutive
/// successes. A failure resets the streak. No poll starts at or after
/// `timeout` from the call, so 60s at 5s is twelve polls.
pub async fn wait_healthy(
    probe: &dyn Probe,
    target: &ProbeTarget,
    policy: &HealthPolicy,
    cancel: &mut CancelSignal,
) -> Result<Vec<ProbeResult>, HealthFailure> {
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let threshold = policy.success_threshold.max(1);
    let mut next_poll = start + policy.start_period;
    let mut attempts = Vec::new();
    let mut consecutive = 0u32;

    loop {
        if next_poll >= deadline {
            tracing::debug!(attempts = attempts.len(), "health check deadline reached");
            return Err(HealthFailure::Timeout { attempts });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HealthFailure::Cancelled { attempts }),
            _ = tokio::time::sleep_until(next_poll) => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HealthFailure::Cancelled { attempts }),
            r = tokio::time::timeout(policy.request_timeout, probe.probe(target)) => r,
        };
        let result = result.unwrap_or_else(|_| {
            ProbeResult::transport_error(policy.request_timeout, "request timed out")
        });

        tracing::debug!(
            url = %target.url,
            success = result.success,
            status = %result.raw_status,
            latency_ms = result.latency.as_millis() as u64,
            "health probe"
        );

        if result.success {
            consecutive += 1;
        } else {
            consecutive = 0;
        }
        attempts.push(result);

        if consecutive >= threshold {
            return Ok(attempts);
        }

        next_poll += policy.interval;
    }
}
