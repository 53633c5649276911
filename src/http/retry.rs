//! Retry utilities for idempotent HTTP requests.

// std
use std::future::Future;
// crates.io
use tokio::time;
// self
use crate::{
	_prelude::*,
	config::{MAX_REQUEST_WINDOW, RetryPolicy},
};

/// Result of budgeting a retry attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Additional attempt is permitted with the provided per-attempt timeout.
	Granted {
		/// Timeout window allocated for the upcoming attempt.
		timeout: Duration,
	},
	/// Retry window exhausted; no further attempts allowed.
	Exhausted,
}

/// Controls retry backoff progression and attempt budgeting.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	///
	/// The overall deadline is capped at [`MAX_REQUEST_WINDOW`].
	pub fn new(policy: &'a RetryPolicy) -> Self {
		let deadline = Instant::now() + policy.deadline.min(MAX_REQUEST_WINDOW);

		Self { policy, deadline, retries_used: 0 }
	}

	/// Budget the next attempt, returning either the permitted timeout or exhaustion.
	pub fn attempt_budget(&self) -> AttemptBudget {
		let remaining = self.remaining_budget();

		if remaining.is_zero() {
			AttemptBudget::Exhausted
		} else {
			let timeout = remaining.min(self.policy.attempt_timeout);

			if timeout.is_zero() {
				AttemptBudget::Exhausted
			} else {
				AttemptBudget::Granted { timeout }
			}
		}
	}

	/// Whether another retry is permitted under the policy.
	pub fn can_retry(&self) -> bool {
		self.retries_used < self.policy.max_retries
	}

	/// Remaining wall-clock budget for the overall retry window.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Advance retry state and compute the backoff delay for the next attempt.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if !self.can_retry() {
			tracing::debug!(attempt = self.retries_used, "retry budget exhausted");

			return None;
		}

		let attempt = self.retries_used;

		self.retries_used = self.retries_used.saturating_add(1);

		let mut delay = self.policy.compute_backoff(attempt);
		let remaining = self.remaining_budget();

		if !remaining.is_zero() {
			delay = delay.min(remaining);
		} else {
			delay = Duration::ZERO;
		}

		tracing::debug!(attempt = attempt + 1, ?delay, remaining = ?remaining, "retry backoff computed");

		Some(delay)
	}

	/// Drive `attempt` until it succeeds, fails permanently, or the budget runs out.
	///
	/// Each invocation receives the timeout granted for that attempt. Only errors reporting
	/// [`Error::is_retryable`] are retried; the last error is returned on exhaustion.
	pub async fn run<T, F, Fut>(mut self, mut attempt: F) -> Result<T>
	where
		F: FnMut(Duration) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut last_error = None;

		while let AttemptBudget::Granted { timeout } = self.attempt_budget() {
			match attempt(timeout).await {
				Ok(value) => return Ok(value),
				Err(err) => {
					let retryable = err.is_retryable();

					tracing::debug!(error = %err, retryable, "attempt failed");

					last_error = Some(err);

					if !retryable {
						break;
					}

					match self.next_backoff() {
						Some(delay) if !delay.is_zero() => time::sleep(delay).await,
						Some(_) => {},
						None => break,
					}
				},
			}
		}

		Err(last_error.unwrap_or_else(|| Error::Cache("Retry budget exhausted.".into())))
	}
}
