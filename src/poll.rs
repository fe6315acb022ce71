//! Polling of server-driven status transitions.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::error::*;

// about 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How long and how often to poll the CA for status changes.
///
/// Delays grow exponentially from `initial_delay` up to `max_delay`. A `Retry-After` sent by the
/// CA takes precedence over the computed delay. Once `timeout` has passed since the operation
/// started, polling gives up with [`Error::ValidationTimeout`].
#[derive(Debug, Clone)]
pub struct PollPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
    timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl PollPolicy {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Ceiling of the backoff. Does not cap `Retry-After` hints.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Growth factor of the delay between two polls. Values below 1 are treated as 1.
    pub fn multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Overall deadline for an operation, measured from its start.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeouts beyond what the clock can represent mean no deadline at all.
    pub(crate) fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Exponential delays with a ceiling.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;
        self.next = delay.saturating_mul(self.multiplier).min(self.max);
        Some(delay)
    }
}

/// Result of one poll.
#[derive(Debug)]
pub(crate) enum Poll<T> {
    /// Terminal state reached.
    Done(T),

    /// Not there yet. Carries the CA's `Retry-After`, if sent.
    Pending(Option<Duration>),
}

/// Calls `poll` until it reports [`Poll::Done`], sleeping between attempts.
///
/// Every attempt, including the in-flight request, is bounded by `deadline`. Errors from `poll`
/// end the loop immediately.
pub(crate) async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    deadline: Instant,
    what: &'static str,
    url: &str,
    mut poll: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>>>,
{
    let timeout = || Error::ValidationTimeout {
        what,
        url: url.to_owned(),
    };

    let mut backoff = policy.backoff();

    loop {
        let retry_after = match tokio::time::timeout_at(deadline, poll()).await {
            Ok(Ok(Poll::Done(value))) => return Ok(value),
            Ok(Ok(Poll::Pending(retry_after))) => retry_after,
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => return Err(timeout()),
        };

        let computed = backoff.next().unwrap_or(policy.max_delay);
        let delay = retry_after.unwrap_or(computed);

        let next_poll = match Instant::now().checked_add(delay) {
            Some(at) if at <= deadline => at,
            _ => {
                log::debug!("Giving up on {what} at {url}: next poll would pass the deadline");
                return Err(timeout());
            }
        };

        log::trace!("Polling {what} again in {delay:?}");
        tokio::time::sleep_until(next_poll).await;
    }
}
