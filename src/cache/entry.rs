//! Cache entry definitions and state management helpers.

// self
use crate::{
	_prelude::*,
	cache::state::{CachePayload, CacheState},
};

/// Represents the cached key ring for a single key source.
///
/// `generation` advances whenever a fetch completes, so a caller that queued behind an
/// in-flight fetch can tell that an outcome is already available.
#[derive(Clone, Debug, Default)]
pub struct CacheEntry {
	state: CacheState,
	generation: u64,
	last_failure: Option<String>,
}
impl CacheEntry {
	/// Create a new empty cache entry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inspect the current cache state.
	pub fn state(&self) -> &CacheState {
		&self.state
	}

	/// Number of fetches completed so far, successful or not.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Message of the most recent fetch failure, cleared by the next success.
	pub fn last_failure(&self) -> Option<&str> {
		self.last_failure.as_deref()
	}

	/// Begin an initial load; returns false when a payload is present.
	///
	/// A `Loading` state left behind by a cancelled caller is resumed.
	pub fn begin_load(&mut self) -> bool {
		match self.state {
			CacheState::Empty | CacheState::Loading => {
				self.state = CacheState::Loading;

				true
			},
			_ => false,
		}
	}

	/// Record a successful load, updating state to `Ready`.
	pub fn load_success(&mut self, payload: CachePayload) {
		self.complete(payload);
	}

	/// Transition an entry holding a payload into refreshing state.
	///
	/// Returns false when there is no payload to refresh.
	pub fn begin_refresh(&mut self) -> bool {
		match std::mem::take(&mut self.state) {
			CacheState::Ready(payload) | CacheState::Refreshing(payload) => {
				self.state = CacheState::Refreshing(payload);

				true
			},
			state => {
				self.state = state;

				false
			},
		}
	}

	/// Record a successful refresh.
	pub fn refresh_success(&mut self, payload: CachePayload) {
		self.complete(payload);
	}

	/// Record a failed fetch and decide whether stale data can remain active.
	///
	/// A kept payload is not refetched until `backoff` has elapsed.
	pub fn refresh_failure(&mut self, now: Instant, backoff: Duration, error: &Error) {
		self.generation = self.generation.wrapping_add(1);
		self.last_failure = Some(error.to_string());
		self.state = match std::mem::take(&mut self.state) {
			CacheState::Refreshing(mut payload) | CacheState::Ready(mut payload) => {
				payload.bump_error(now, backoff);

				if !payload.is_expired(now) || payload.can_serve_stale(now) {
					CacheState::Ready(payload)
				} else {
					CacheState::Empty
				}
			},
			CacheState::Empty | CacheState::Loading => CacheState::Empty,
		};
	}

	/// Invalidate the cached payload, returning to Empty state.
	pub fn invalidate(&mut self) {
		self.state = CacheState::Empty;
	}

	/// Retrieve a clone of the cached payload if present.
	pub fn snapshot(&self) -> Option<CachePayload> {
		self.state.payload().cloned()
	}

	fn complete(&mut self, mut payload: CachePayload) {
		payload.reset_failures();

		self.generation = self.generation.wrapping_add(1);
		self.last_failure = None;
		self.state = CacheState::Ready(payload);
	}
}
