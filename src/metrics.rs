//! Metrics helpers for key caching, token verification, and access-token exchange.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::{_prelude::*, verify::TokenKind};

type LabelSet = SmallVec<[Label; 3]>;

const METRIC_KEY_LOOKUPS_TOTAL: &str = "firebase_auth_key_lookups_total";
const METRIC_KEY_REFRESH_TOTAL: &str = "firebase_auth_key_refresh_total";
const METRIC_KEY_REFRESH_DURATION: &str = "firebase_auth_key_refresh_duration_seconds";
const METRIC_VERIFICATIONS_TOTAL: &str = "firebase_auth_verifications_total";
const METRIC_ACCESS_TOKEN_TOTAL: &str = "firebase_auth_access_token_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How a key lookup was served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupOutcome {
	/// Served from a fresh cached ring.
	Hit,
	/// Served from an expired ring because the refresh failed.
	Stale,
	/// Required an upstream fetch.
	Miss,
}
impl LookupOutcome {
	fn as_str(self) -> &'static str {
		match self {
			Self::Hit => "hit",
			Self::Stale => "stale",
			Self::Miss => "miss",
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record how a key lookup was served.
pub fn record_key_lookup(source: &'static str, outcome: LookupOutcome) {
	let mut labels = source_labels(source);

	labels.push(Label::new("outcome", outcome.as_str()));

	metrics::counter!(METRIC_KEY_LOOKUPS_TOTAL, labels.iter()).increment(1);
}

/// Record a successful key refresh along with its latency.
pub fn record_key_refresh_success(source: &'static str, duration: Duration) {
	let mut labels = source_labels(source);

	metrics::histogram!(METRIC_KEY_REFRESH_DURATION, labels.iter()).record(duration.as_secs_f64());

	labels.push(Label::new("status", "success"));

	metrics::counter!(METRIC_KEY_REFRESH_TOTAL, labels.iter()).increment(1);
}

/// Record a failed key refresh.
pub fn record_key_refresh_error(source: &'static str) {
	let mut labels = source_labels(source);

	labels.push(Label::new("status", "error"));

	metrics::counter!(METRIC_KEY_REFRESH_TOTAL, labels.iter()).increment(1);
}

/// Record a verification outcome for a token kind.
///
/// `error` is `None` for a token that verified successfully.
pub fn record_verification(kind: TokenKind, error: Option<&Error>) {
	let outcome = match error {
		None => "valid",
		Some(Error::TokenExpired { .. }) => "expired",
		Some(Error::TokenRevoked { .. }) => "revoked",
		Some(Error::UserDisabled { .. }) => "disabled",
		Some(Error::InvalidToken { .. }) => "invalid",
		Some(_) => "error",
	};
	let labels: LabelSet =
		[Label::new("kind", kind.label()), Label::new("outcome", outcome)].into_iter().collect();

	metrics::counter!(METRIC_VERIFICATIONS_TOTAL, labels.iter()).increment(1);
}

/// Record whether an access token came from the cache or a fresh exchange.
pub fn record_access_token(cached: bool) {
	let source = if cached { "cache" } else { "exchange" };

	metrics::counter!(METRIC_ACCESS_TOKEN_TOTAL, "source" => source).increment(1);
}

fn source_labels(source: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("source", source));

	labels
}

#[cfg(test)]
mod tests {
	// std
	use std::borrow::Borrow;
	// crates.io
	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};
	// self
	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter
			.snapshot()
			.into_vec()
			.into_iter()
			.map(|(key, _, _, value)| (key, value))
			.collect()
	}

	fn counter_value(
		snapshot: &[(CompositeKey, DebugValue)],
		name: &str,
		labels: &[(&str, &str)],
	) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> =
			key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels
				.into_iter()
				.zip(expected_sorted)
				.all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_key_lookups_and_refreshes() {
		let snapshot = capture_metrics(|| {
			record_key_lookup("id_token", LookupOutcome::Hit);
			record_key_lookup("id_token", LookupOutcome::Hit);
			record_key_lookup("id_token", LookupOutcome::Stale);
			record_key_refresh_success("id_token", Duration::from_millis(20));
			record_key_refresh_error("session_cookie");
		});

		assert_eq!(
			counter_value(
				&snapshot,
				METRIC_KEY_LOOKUPS_TOTAL,
				&[("source", "id_token"), ("outcome", "hit")]
			),
			2
		);
		assert_eq!(
			counter_value(
				&snapshot,
				METRIC_KEY_LOOKUPS_TOTAL,
				&[("source", "id_token"), ("outcome", "stale")]
			),
			1
		);
		assert_eq!(
			counter_value(
				&snapshot,
				METRIC_KEY_REFRESH_TOTAL,
				&[("source", "session_cookie"), ("status", "error")]
			),
			1
		);
		assert!(snapshot.iter().any(|(key, _)| key.kind() == MetricKind::Histogram
			&& Borrow::<str>::borrow(key.key().name()) == METRIC_KEY_REFRESH_DURATION));
	}

	#[test]
	fn records_verification_outcomes() {
		let snapshot = capture_metrics(|| {
			record_verification(TokenKind::IdToken, None);
			record_verification(
				TokenKind::SessionCookie,
				Some(&Error::TokenExpired { kind: TokenKind::SessionCookie }),
			);
			record_access_token(true);
		});

		assert_eq!(
			counter_value(
				&snapshot,
				METRIC_VERIFICATIONS_TOTAL,
				&[("kind", "id_token"), ("outcome", "valid")]
			),
			1
		);
		assert_eq!(
			counter_value(
				&snapshot,
				METRIC_VERIFICATIONS_TOTAL,
				&[("kind", "session_cookie"), ("outcome", "expired")]
			),
			1
		);
		assert_eq!(counter_value(&snapshot, METRIC_ACCESS_TOKEN_TOTAL, &[("source", "cache")]), 1);
	}
}
