// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection lifecycle and retry machinery shared by every transport's
//! [`super::Client`] implementation.

use std::time::Duration;

use tokio::time::sleep;

use crate::{config::ReconnectStrategy, Error};

/// Lifecycle of a transport's underlying connection (serial ports included,
/// where "connected" means "the port is open").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Reconnection policy, re-exported under a transport-facing name.
pub type RetryPolicy = ReconnectStrategy;

/// Tracks the backoff delay across reconnect attempts for a single channel.
/// One instance lives as long as the channel does; [`Backoff::reset`] is
/// called after every successful (re)connection.
#[derive(Debug)]
pub(crate) struct Backoff {
    strategy: RetryPolicy,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(strategy: RetryPolicy) -> Self {
        let current = match strategy {
            RetryPolicy::ExponentialBackoff { initial, .. } => initial,
            RetryPolicy::Disabled | RetryPolicy::Immediate => Duration::ZERO,
        };
        Self { strategy, current }
    }

    /// Whether a (re)connect attempt numbered `attempt` (0-based) should be
    /// made at all.
    pub(crate) fn should_attempt(&self, attempt: u32) -> bool {
        match self.strategy {
            RetryPolicy::Disabled => false,
            RetryPolicy::Immediate => attempt == 0,
            RetryPolicy::ExponentialBackoff { .. } => true,
        }
    }

    /// Sleeps the backoff delay before attempt `attempt` (no sleep before
    /// the first attempt), then advances the delay for next time.
    pub(crate) async fn wait(&mut self, attempt: u32) {
        if attempt == 0 {
            return;
        }
        if let RetryPolicy::ExponentialBackoff { max, .. } = self.strategy {
            sleep(self.current).await;
            self.current = self.current.saturating_mul(2).min(max);
        }
    }

    pub(crate) fn reset(&mut self) {
        if let RetryPolicy::ExponentialBackoff { initial, .. } = self.strategy {
            self.current = initial;
        }
    }
}

/// Runs `attempt` up to `retries + 1` times, honoring the retryable
/// classification from [`Error::is_retryable`]. Stops at the first success
/// or the first non-retryable failure; returns the last error once the
/// retry budget is exhausted.
pub(crate) async fn with_retries<F, Fut, T>(retries: u32, mut attempt: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut last_err = Error::ChannelClosed;
    for try_idx in 0..=retries {
        match attempt(try_idx).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && try_idx < retries => {
                log::debug!(
                    "retryable error on attempt {try_idx}/{retries}, retrying: {err}",
                );
                last_err = err;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn with_retries_stops_at_the_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, Error> = with_retries(3, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("ok") }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retries_gives_up_on_a_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retries(5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::InvalidParameter("bad".into())) }
        })
        .await;
        assert!(matches!(result.unwrap_err(), Error::InvalidParameter(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retries_exhausts_the_budget_on_persistent_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retries(2, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Timeout) }
        })
        .await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn immediate_policy_only_attempts_once() {
        let backoff = Backoff::new(RetryPolicy::Immediate);
        assert!(backoff.should_attempt(0));
        assert!(!backoff.should_attempt(1));
    }

    #[test]
    fn disabled_policy_never_attempts() {
        let backoff = Backoff::new(RetryPolicy::Disabled);
        assert!(!backoff.should_attempt(0));
    }
}
