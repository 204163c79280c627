//! Connect retry policy for transports whose connect can fail outright.

use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::TransportError;

/// How a transport retries a channel connect that failed.
///
/// The remote service may come up after the connector; retrying at the
/// transport gives the "connect now, deliver once reachable" behavior a
/// message queue library provides.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectBackoff {
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered wait.
    pub max_delay: Duration,
    /// Growth of the wait per further failure.
    pub multiplier: u32,
    /// Total attempts before giving up.  `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ConnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            max_attempts: 0,
        }
    }
}

impl ConnectBackoff {
    /// Single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Start tracking the attempts of one connect to `endpoint`.
    pub fn start<'a>(&'a self, endpoint: &'a Endpoint) -> ConnectAttempts<'a> {
        ConnectAttempts {
            policy: self,
            endpoint,
            failures: 0,
        }
    }

    /// Wait before the attempt following `failures` failed ones, or `None`
    /// once the policy is exhausted.
    ///
    /// `spread` decorrelates callers that fail together (the four channels
    /// of one service, or many sensors rebooting at once); up to a quarter
    /// of the wait is added on top of the capped value.
    pub fn retry_delay(&self, failures: u32, spread: u64) -> Option<Duration> {
        if failures == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts > 0 && failures >= self.max_attempts {
            return None;
        }

        let mut wait = self.initial_delay.min(self.max_delay);
        for _ in 1..failures {
            if wait >= self.max_delay {
                break;
            }
            wait = wait.saturating_mul(self.multiplier.max(1)).min(self.max_delay);
        }

        let quarter = wait / 4;
        let jitter_ms = match quarter.as_millis() as u64 {
            0 => 0,
            span => mix(spread ^ u64::from(failures)) % (span + 1),
        };
        Some(wait + Duration::from_millis(jitter_ms))
    }
}

/// Failure counter for one connect, handed out by [`ConnectBackoff::start`].
#[derive(Debug)]
pub struct ConnectAttempts<'a> {
    policy: &'a ConnectBackoff,
    endpoint: &'a Endpoint,
    failures: u32,
}

impl ConnectAttempts<'_> {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt.  Returns how long to wait before the next
    /// one, or the error to surface when the policy is exhausted: the
    /// underlying reason after a single attempt, an exhaustion error after
    /// several.
    pub fn failed(&mut self, reason: impl Into<String>) -> Result<Duration, TransportError> {
        self.failures += 1;
        let spread = u64::from(self.endpoint.port);
        match self.policy.retry_delay(self.failures, spread) {
            Some(delay) => Ok(delay),
            None if self.failures == 1 => Err(TransportError::Connect {
                endpoint: self.endpoint.address(),
                reason: reason.into(),
            }),
            None => Err(TransportError::ConnectExhausted {
                endpoint: self.endpoint.address(),
                attempts: self.failures,
            }),
        }
    }
}

/// splitmix64 finalizer.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
