// SPDX-License-Identifier: AGPL-3.0-only

//! Completion polling.
//!
//! The accelerator signals completion only through a status register, so
//! waiting is a spin on register reads. [`PollPolicy::blocking`] spins until
//! the condition holds. Other policies bound the spin by poll count,
//! wall-clock time or a [`CancelToken`] and report the bound as an error.

use crate::error::{AuctionError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag that stops a poll from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Bounds on a completion poll.
#[derive(Debug, Clone, Default)]
pub struct PollPolicy {
    /// Give up after this many status reads.
    pub max_polls: Option<u64>,
    /// Give up after this much time.
    pub timeout: Option<Duration>,
    /// Yield the thread every this many reads.
    pub yield_interval: Option<u64>,
    /// Stop when cancelled.
    pub cancel: Option<CancelToken>,
}

impl PollPolicy {
    /// Spin until the condition holds, with no bound.
    pub fn blocking() -> Self {
        Self::default()
    }

    /// Spin at most `max_polls` times.
    pub fn bounded(max_polls: u64) -> Self {
        Self {
            max_polls: Some(max_polls),
            ..Self::default()
        }
    }

    /// Add a wall-clock timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Yield to the scheduler every `interval` reads.
    #[must_use]
    pub fn with_yield_interval(mut self, interval: u64) -> Self {
        self.yield_interval = Some(interval).filter(|&n| n > 0);
        self
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether no bound is set.
    pub fn is_blocking(&self) -> bool {
        self.max_polls.is_none() && self.timeout.is_none() && self.cancel.is_none()
    }
}

/// Outcome of a successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    /// Status reads performed, including the one that saw completion.
    pub polls: u64,
    /// Time spent polling.
    pub elapsed: Duration,
}

/// Call `ready` until it returns `true` or a bound in `policy` is hit.
///
/// # Errors
///
/// Returns [`AuctionError::PollTimeout`] when the poll or time bound is
/// exhausted, [`AuctionError::Cancelled`] on cancellation, and any error
/// `ready` returns.
pub fn poll_until<F>(policy: &PollPolicy, mut ready: F) -> Result<PollStats>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    let mut polls = 0u64;
    loop {
        if policy.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(AuctionError::Cancelled { polls });
        }
        if policy.max_polls.is_some_and(|max| polls >= max) {
            return Err(AuctionError::PollTimeout {
                polls,
                elapsed: start.elapsed(),
            });
        }

        polls += 1;
        if ready()? {
            return Ok(PollStats {
                polls,
                elapsed: start.elapsed(),
            });
        }

        let elapsed = start.elapsed();
        if policy.timeout.is_some_and(|t| elapsed >= t) {
            return Err(AuctionError::PollTimeout { polls, elapsed });
        }
        if policy.yield_interval.is_some_and(|n| polls % n == 0) {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_on_first_ready_read() {
        let mut reads = 0;
        let stats = poll_until(&PollPolicy::blocking(), || {
            reads += 1;
            Ok(reads == 3)
        })
        .unwrap();
        assert_eq!(stats.polls, 3);
    }

    #[test]
    fn bounded_poll_times_out() {
        let err = poll_until(&PollPolicy::bounded(50), || Ok(false)).unwrap_err();
        assert!(matches!(err, AuctionError::PollTimeout { polls: 50, .. }));
    }

    #[test]
    fn wall_clock_timeout() {
        let policy = PollPolicy::blocking()
            .with_timeout(Duration::from_millis(5))
            .with_yield_interval(16);
        let err = poll_until(&policy, || Ok(false)).unwrap_err();
        assert!(matches!(err, AuctionError::PollTimeout { elapsed, .. } if elapsed >= Duration::from_millis(5)));
    }

    #[test]
    fn cancellation_stops_poll() {
        let token = CancelToken::new();
        let policy = PollPolicy::blocking().with_cancel(token.clone());
        let mut reads = 0;
        let err = poll_until(&policy, || {
            reads += 1;
            if reads == 10 {
                token.cancel();
            }
            Ok(false)
        })
        .unwrap_err();
        assert!(matches!(err, AuctionError::Cancelled { polls: 10 }));
    }

    #[test]
    fn read_errors_propagate() {
        let err = poll_until(&PollPolicy::bounded(5), || Err(AuctionError::platform("bus error")))
            .unwrap_err();
        assert!(matches!(err, AuctionError::Platform { .. }));
    }

    #[test]
    fn blocking_policy_has_no_bounds() {
        assert!(PollPolicy::blocking().is_blocking());
        assert!(!PollPolicy::bounded(1).is_blocking());
        assert_eq!(PollPolicy::blocking().with_yield_interval(0).yield_interval, None);
    }
}
