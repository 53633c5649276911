//! Cache manager handling key retrieval and lifecycle.

// crates.io
use http::{
	HeaderName, HeaderValue, Request, Response,
	header::{ETAG, IF_NONE_MATCH, LAST_MODIFIED},
};
use http_cache_semantics::BeforeRequest;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
// self
use crate::{
	_prelude::*,
	cache::{
		entry::CacheEntry,
		state::{CachePayload, CacheState, instant_after},
	},
	http::{
		client::{KeyFetch, RestClient, cache_control_header},
		retry::RetryExecutor,
		semantics::{Freshness, base_request, evaluate_freshness, evaluate_revalidation},
	},
	keys::{KeyRing, KeySource},
	metrics,
};

/// Coordinates fetching and caching of one public-key document.
///
/// The single-flight guard serialises fetches so that a burst of verifications against a cold
/// or expired cache results in one upstream request. Callers queued behind a fetch share its
/// outcome, and after a failed refresh the stale ring is served without fetching until the
/// retry backoff elapses.
#[derive(Clone, Debug)]
pub struct KeyCache {
	source: Arc<KeySource>,
	http: RestClient,
	entry: Arc<RwLock<CacheEntry>>,
	single_flight: Arc<Mutex<()>>,
}
impl KeyCache {
	/// Build a cache for `source` using the given REST client.
	pub fn new(source: KeySource, http: RestClient) -> Self {
		Self {
			source: Arc::new(source),
			http,
			entry: Arc::new(RwLock::new(CacheEntry::new())),
			single_flight: Arc::new(Mutex::new(())),
		}
	}

	/// Key source served by this cache.
	pub fn source(&self) -> &KeySource {
		&self.source
	}

	/// Capture the current cache state for status reporting.
	pub async fn snapshot(&self) -> CacheSnapshot {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let state = { self.entry.read().await.state().clone() };

		CacheSnapshot { captured_at, captured_at_wallclock, state }
	}

	/// Summarise the cache for diagnostics.
	pub async fn status(&self) -> KeyCacheStatus {
		let snapshot = self.snapshot().await;
		let state = match &snapshot.state {
			CacheState::Empty => "empty",
			CacheState::Loading => "loading",
			CacheState::Ready(_) => "ready",
			CacheState::Refreshing(_) => "refreshing",
		};
		let payload = snapshot.state.payload();

		KeyCacheStatus {
			source: self.source.label,
			state,
			usable: snapshot.state.is_usable(),
			kids: payload
				.map(|payload| payload.keys.kids().into_iter().map(str::to_owned).collect())
				.unwrap_or_default(),
			last_refresh: payload.map(|payload| payload.last_refresh_at),
			expires_at: payload.and_then(|payload| snapshot.to_datetime(payload.expires_at)),
			error_count: payload.map(|payload| payload.error_count).unwrap_or_default(),
		}
	}

	/// Resolve the current key ring, fetching upstream when the cache is cold or expired.
	///
	/// When a refresh fails the previous ring keeps serving until `stale_while_error` elapses.
	#[tracing::instrument(skip(self), fields(source = self.source.label))]
	pub async fn resolve(&self) -> Result<Arc<KeyRing>> {
		let snapshot = { self.entry.read().await.snapshot() };
		let now = Instant::now();

		if let Some(payload) = &snapshot
			&& usable_without_fetch(payload, now)
		{
			self.record_served(payload, now);

			return Ok(payload.keys.clone());
		}

		match self.refresh_unless(usable_without_fetch).await {
			Ok(keys) => Ok(keys),
			Err(err) => match snapshot {
				Some(payload) if payload.can_serve_stale(Instant::now()) => {
					tracing::warn!(error = %err, "refresh failed, serving stale keys");

					metrics::record_key_lookup(self.source.label, metrics::LookupOutcome::Stale);

					Ok(payload.keys)
				},
				_ => Err(err),
			},
		}
	}

	/// Resolve a key ring that should contain `kid`.
	///
	/// An unknown key id usually means the provider rotated its keys; the ring is refetched once
	/// unless it was fetched within `key_refetch_cooldown`. The returned ring may still lack
	/// `kid`, which callers report as an invalid token.
	#[tracing::instrument(skip(self), fields(source = self.source.label))]
	pub async fn resolve_for_kid(&self, kid: &str) -> Result<Arc<KeyRing>> {
		let keys = self.resolve().await?;

		if keys.contains(kid) {
			return Ok(keys);
		}

		let cooldown = self.http.config().key_refetch_cooldown;

		tracing::debug!(kid, "unknown key id; considering refetch");

		match self
			.refresh_unless(|payload, now| {
				payload.keys.contains(kid)
					|| !payload.refetch_allowed(now, cooldown)
					|| payload.in_backoff(now)
			})
			.await
		{
			Ok(keys) => Ok(keys),
			Err(err) => {
				tracing::warn!(error = %err, "rotation refetch failed");

				Ok(keys)
			},
		}
	}

	/// Force a revalidation of the key document.
	#[tracing::instrument(skip(self), fields(source = self.source.label))]
	pub async fn refresh(&self) -> Result<Arc<KeyRing>> {
		self.refresh_unless(|_, _| false).await
	}

	/// Drop the cached ring.
	pub async fn invalidate(&self) {
		self.entry.write().await.invalidate();
	}

	async fn refresh_unless<F>(&self, still_valid: F) -> Result<Arc<KeyRing>>
	where
		F: Fn(&CachePayload, Instant) -> bool,
	{
		let observed = { self.entry.read().await.generation() };
		let _guard = self.single_flight.lock().await;
		let now = Instant::now();
		let (existing, mode) = {
			let mut entry = self.entry.write().await;
			let snapshot = entry.snapshot();

			if let Some(payload) = &snapshot
				&& still_valid(payload, now)
			{
				self.record_served(payload, now);

				return Ok(payload.keys.clone());
			}
			// A fetch completed while this caller waited on the guard; share its outcome.
			if entry.generation() != observed {
				match &snapshot {
					Some(payload) if !payload.is_expired(now) || payload.can_serve_stale(now) => {
						self.record_served(payload, now);

						return Ok(payload.keys.clone());
					},
					_ =>
						if let Some(reason) = entry.last_failure() {
							return Err(Error::Cache(format!(
								"Concurrent key fetch failed: {reason}"
							)));
						},
				}
			}

			let mode = if entry.begin_refresh() {
				FetchMode::Refresh
			} else if entry.begin_load() {
				FetchMode::Initial
			} else {
				return Err(Error::Cache("Key cache entry cannot start a fetch.".into()));
			};

			(snapshot, mode)
		};
		let request = self.prepare_request(existing.as_ref())?;
		let started = Instant::now();
		let http = &self.http;
		let url = &self.source.url;
		let prepared = &request;
		let fetched = RetryExecutor::new(&self.http.config().retry_policy)
			.run(move |timeout| http.fetch_keys(url, prepared, timeout))
			.await
			.and_then(|fetch| self.build_from_fetch(fetch, existing.as_ref()));

		metrics::record_key_lookup(self.source.label, metrics::LookupOutcome::Miss);

		match fetched {
			Ok(payload) => {
				let keys = payload.keys.clone();

				{
					let mut entry = self.entry.write().await;

					match mode {
						FetchMode::Initial => entry.load_success(payload),
						FetchMode::Refresh => entry.refresh_success(payload),
					}
				}

				metrics::record_key_refresh_success(self.source.label, started.elapsed());

				tracing::debug!(kids = ?keys.kids(), ?mode, "key ring updated");

				Ok(keys)
			},
			Err(err) => {
				let failures = existing.as_ref().map_or(0, |payload| payload.error_count);
				let backoff = self.http.config().retry_policy.compute_backoff(failures);

				{
					let mut entry = self.entry.write().await;

					entry.refresh_failure(Instant::now(), backoff, &err);
				}

				metrics::record_key_refresh_error(self.source.label);

				tracing::debug!(?mode, ?backoff, "key fetch failed");

				Err(err)
			},
		}
	}

	fn record_served(&self, payload: &CachePayload, now: Instant) {
		let outcome = if payload.is_expired(now) {
			metrics::LookupOutcome::Stale
		} else {
			metrics::LookupOutcome::Hit
		};

		metrics::record_key_lookup(self.source.label, outcome);
	}

	fn prepare_request(&self, existing: Option<&CachePayload>) -> Result<Request<()>> {
		let mut request = base_request(&self.source.url)?;

		if let Some(payload) = existing {
			if let BeforeRequest::Stale { request: parts, matches: true } =
				payload.policy.before_request(&request, SystemTime::now())
			{
				request = Request::from_parts(parts, ());
			}

			if let Some(etag) = &payload.etag
				&& let Ok(value) = HeaderValue::from_str(etag)
			{
				request.headers_mut().insert(IF_NONE_MATCH, value);
			}
		}

		Ok(request)
	}

	fn build_from_fetch(
		&self,
		fetch: KeyFetch,
		existing: Option<&CachePayload>,
	) -> Result<CachePayload> {
		let config = self.http.config();
		let now = Instant::now();

		match (fetch.body, existing) {
			(Some(body), _) => {
				let keys = Arc::new(self.source.parse(&body)?);
				let freshness = evaluate_freshness(config, &fetch.exchange);

				tracing::debug!(
					cache_control = ?cache_control_header(fetch.exchange.headers()),
					ttl = ?freshness.ttl,
					"parsed key document"
				);

				Ok(self.build_payload(keys, freshness, fetch.etag, fetch.last_modified, now))
			},
			(None, Some(previous)) => {
				let revalidation = evaluate_revalidation(
					config,
					&previous.policy,
					&fetch.exchange.request,
					&fetch.exchange.response,
				);
				let etag =
					extract_header(&revalidation.response, &ETAG).or_else(|| previous.etag.clone());
				let last_modified =
					extract_last_modified(&revalidation.response).or(previous.last_modified);

				tracing::debug!(modified = revalidation.modified, "key document revalidated");

				Ok(self.build_payload(
					previous.keys.clone(),
					revalidation.freshness,
					etag,
					last_modified,
					now,
				))
			},
			(None, None) =>
				Err(Error::Cache("Received 304 status without a cached key ring.".into())),
		}
	}

	fn build_payload(
		&self,
		keys: Arc<KeyRing>,
		freshness: Freshness,
		etag: Option<String>,
		last_modified: Option<DateTime<Utc>>,
		now: Instant,
	) -> CachePayload {
		let config = self.http.config();
		let expires_at = instant_after(now, freshness.ttl);
		let stale_deadline = if config.stale_while_error.is_zero() {
			None
		} else {
			Some(instant_after(expires_at, config.stale_while_error))
		};

		CachePayload {
			keys,
			policy: freshness.policy,
			etag,
			last_modified,
			last_refresh_at: Utc::now(),
			fetched_at: now,
			expires_at,
			stale_deadline,
			error_count: 0,
			retry_after: None,
		}
	}
}

/// Snapshot of cache state captured for status reporting.
#[derive(Clone, Debug)]
pub struct CacheSnapshot {
	/// Monotonic instant when the snapshot was taken.
	pub captured_at: Instant,
	/// Wall-clock timestamp that aligns with `captured_at`.
	pub captured_at_wallclock: DateTime<Utc>,
	/// Cache state recorded at capture time.
	pub state: CacheState,
}
impl CacheSnapshot {
	/// Convert a monotonic instant drawn from the cached payload into UTC.
	pub fn to_datetime(&self, instant: Instant) -> Option<DateTime<Utc>> {
		if let Some(delta) = instant.checked_duration_since(self.captured_at) {
			let chrono = TimeDelta::from_std(delta).ok()?;

			self.captured_at_wallclock.checked_add_signed(chrono)
		} else if let Some(delta) = self.captured_at.checked_duration_since(instant) {
			let chrono = TimeDelta::from_std(delta).ok()?;

			self.captured_at_wallclock.checked_sub_signed(chrono)
		} else {
			None
		}
	}
}

/// Diagnostic view of a key cache.
#[derive(Clone, Debug, Serialize)]
pub struct KeyCacheStatus {
	/// Key source label.
	pub source: &'static str,
	/// Lifecycle state name.
	pub state: &'static str,
	/// Whether a ring is available for verification.
	pub usable: bool,
	/// Key ids currently cached.
	pub kids: Vec<String>,
	/// Timestamp of the most recent successful refresh.
	pub last_refresh: Option<DateTime<Utc>>,
	/// Expiration timestamp for the cached ring.
	pub expires_at: Option<DateTime<Utc>>,
	/// Consecutive refresh failures.
	pub error_count: u32,
}

#[derive(Clone, Copy, Debug)]
enum FetchMode {
	Initial,
	Refresh,
}

/// Fresh, or stale but inside the failure backoff and the stale window.
fn usable_without_fetch(payload: &CachePayload, now: Instant) -> bool {
	!payload.is_expired(now) || (payload.in_backoff(now) && payload.can_serve_stale(now))
}

fn extract_header(response: &Response<()>, name: &HeaderName) -> Option<String> {
	response.headers().get(name).and_then(|value| value.to_str().ok()).map(|s| s.to_string())
}

fn extract_last_modified(response: &Response<()>) -> Option<DateTime<Utc>> {
	response
		.headers()
		.get(LAST_MODIFIED)
		.and_then(|value| value.to_str().ok())
		.and_then(|raw| httpdate::parse_http_date(raw).ok())
		.map(<DateTime<Utc>>::from)
}
