//! Reconnection scheduling with linear, capped backoff.
//!
//! `delay(attempt) = min(base × attempt, max)` with `attempt` starting at 1
//! on the first failure. Early retries stay fast while a fleet of clients
//! recovering from a shared outage spreads out up to the ceiling.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay of the first retry and increment of every following one.
    pub base: Duration,
    /// Upper bound of any delay.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max)
    }
}

/// Identifies one armed timer. A fired timer only counts if its ticket is
/// still the armed one when it reaches the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket(u64);

/// A retry that has just been armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Attempt number (1-based).
    pub attempt: u32,
    /// Delay before the retry fires.
    pub delay: Duration,
}

#[derive(Debug)]
struct ArmedTimer {
    ticket: TimerTicket,
    delay: Duration,
    task: JoinHandle<()>,
}

/// Owns the attempt counter and the single pending retry timer.
#[derive(Debug)]
pub struct ReconnectionScheduler {
    policy: BackoffPolicy,
    attempt: u32,
    next_ticket: u64,
    armed: Option<ArmedTimer>,
}

impl ReconnectionScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            next_ticket: 0,
            armed: None,
        }
    }

    /// Records a failure and arms a one-shot timer that calls `retry` with
    /// the timer's ticket after the computed delay.
    ///
    /// Any previously armed timer is cancelled first. Must be called from
    /// within a tokio runtime.
    pub fn on_failure<F>(&mut self, retry: F) -> ScheduledRetry
    where
        F: FnOnce(TimerTicket) + Send + 'static,
    {
        self.cancel_timer();
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.delay(self.attempt);

        let ticket = TimerTicket(self.next_ticket);
        self.next_ticket = self.next_ticket.wrapping_add(1);

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            retry(ticket);
        });
        self.armed = Some(ArmedTimer {
            ticket,
            delay,
            task,
        });

        ScheduledRetry {
            attempt: self.attempt,
            delay,
        }
    }

    /// Consumes the armed timer if `ticket` is still the armed one.
    ///
    /// A `false` return means the timer was cancelled or replaced after it
    /// fired, and the retry must not run.
    pub fn claim(&mut self, ticket: TimerTicket) -> bool {
        match &self.armed {
            Some(armed) if armed.ticket == ticket => {
                // The caller is the timer task itself; dropping the handle
                // detaches it instead of aborting it.
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Resets the counter and cancels any armed timer.
    pub fn on_success(&mut self) {
        self.attempt = 0;
        self.cancel_timer();
    }

    /// Cancels any armed timer and resets the counter. No retry armed
    /// before this call can run afterwards.
    pub fn cancel(&mut self) {
        self.cancel_timer();
        self.attempt = 0;
    }

    /// Cancels the armed timer, keeping the counter. Returns `true` if a
    /// timer was armed.
    pub fn cancel_timer(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Failures since the last success.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay of the armed timer, if any.
    #[must_use]
    pub fn pending_delay(&self) -> Option<Duration> {
        self.armed.as_ref().map(|armed| armed.delay)
    }
}

impl Drop for ReconnectionScheduler {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
