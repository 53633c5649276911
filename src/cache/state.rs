//! Cache state machine modelling key-ring lifecycle transitions.

// crates.io
use http_cache_semantics::CachePolicy;
// self
use crate::{_prelude::*, keys::KeyRing};

/// Metadata captured for a cached key ring.
#[derive(Clone, Debug)]
pub struct CachePayload {
	/// Verification keys retained for the source.
	pub keys: Arc<KeyRing>,
	/// HTTP cache policy derived from the last response.
	pub policy: CachePolicy,
	/// Strong or weak validator supplied by the origin.
	pub etag: Option<String>,
	/// Last-Modified timestamp advertised by the origin.
	pub last_modified: Option<DateTime<Utc>>,
	/// UTC timestamp when the payload was most recently refreshed.
	pub last_refresh_at: DateTime<Utc>,
	/// Monotonic instant of the most recent successful fetch or revalidation.
	pub fetched_at: Instant,
	/// Monotonic deadline after which the payload is considered expired.
	pub expires_at: Instant,
	/// Optional window permitting stale serving past expiry.
	pub stale_deadline: Option<Instant>,
	/// Count of consecutive refresh errors.
	pub error_count: u32,
	/// Monotonic instant before which a failed refresh is not retried.
	pub retry_after: Option<Instant>,
}
impl CachePayload {
	/// Whether the payload has exceeded its freshness window.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	/// Whether stale serving is still permitted at the given time.
	pub fn can_serve_stale(&self, now: Instant) -> bool {
		self.stale_deadline.map(|deadline| now <= deadline).unwrap_or(false)
	}

	/// Whether the ring is old enough that an unknown key id justifies a refetch.
	pub fn refetch_allowed(&self, now: Instant, cooldown: Duration) -> bool {
		now.saturating_duration_since(self.fetched_at) >= cooldown
	}

	/// Whether a recent refresh failure still holds off upstream fetches.
	pub fn in_backoff(&self, now: Instant) -> bool {
		self.retry_after.is_some_and(|at| now < at)
	}

	/// Update bookkeeping after a failed refresh.
	pub fn bump_error(&mut self, now: Instant, backoff: Duration) {
		self.error_count = self.error_count.saturating_add(1);
		self.retry_after = Some(instant_after(now, backoff));
	}

	/// Reset failure bookkeeping after a successful refresh.
	pub fn reset_failures(&mut self) {
		self.error_count = 0;
		self.retry_after = None;
	}
}

/// Cache lifecycle states.
#[derive(Clone, Debug, Default)]
pub enum CacheState {
	/// Cache has no payload and no work in progress.
	#[default]
	Empty,
	/// Initial fetch is underway and no payload is yet available.
	Loading,
	/// Fresh payload is ready for use.
	Ready(CachePayload),
	/// Payload is in use while a refresh is running.
	Refreshing(CachePayload),
}
impl CacheState {
	/// Retrieve the current payload if available.
	pub fn payload(&self) -> Option<&CachePayload> {
		match self {
			CacheState::Ready(payload) | CacheState::Refreshing(payload) => Some(payload),
			_ => None,
		}
	}

	/// Whether the cached payload is immediately usable.
	pub fn is_usable(&self) -> bool {
		matches!(self, CacheState::Ready(_) | CacheState::Refreshing(_))
	}
}

/// `start + delay`, saturating at a far-future instant instead of overflowing.
pub fn instant_after(start: Instant, delay: Duration) -> Instant {
	const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

	start.checked_add(delay).or_else(|| start.checked_add(FAR_FUTURE)).unwrap_or(start)
}
