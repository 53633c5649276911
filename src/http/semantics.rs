//! HTTP cache semantics integration helpers.

// crates.io
use http::{Method, Request, Response, Uri};
use http_cache_semantics::{AfterResponse, CachePolicy};
use url::Url;
// self
use crate::{_prelude::*, config::AuthConfig, http::client::HttpExchange};

/// Freshness evaluation derived from HTTP headers and configured bounds.
#[derive(Clone, Debug)]
pub struct Freshness {
	/// Clamped TTL, derived from HTTP Cache-Control and the configured key TTL bounds.
	pub ttl: Duration,
	/// HTTP cache policy describing future request handling.
	pub policy: CachePolicy,
}

/// Result of applying conditional revalidation.
#[derive(Debug)]
pub struct Revalidation {
	/// Freshness information resulting from the revalidation exchange.
	pub freshness: Freshness,
	/// Response synthesized from the revalidation outcome.
	pub response: Response<()>,
	/// Flag indicating the upstream representation changed.
	pub modified: bool,
}

/// Build a baseline GET request for a public-key endpoint.
pub fn base_request(url: &Url) -> Result<Request<()>> {
	let uri = url.as_str().parse::<Uri>().map_err(|err| Error::Validation {
		field: "key_url",
		reason: format!("Failed to convert URL to http::Uri: {err}."),
	})?;

	Request::builder()
		.method(Method::GET)
		.uri(uri)
		.header("accept", "application/json")
		.body(())
		.map_err(Error::from)
}

/// Evaluate HTTP cache semantics to determine the TTL of a fetched key document.
pub fn evaluate_freshness(config: &AuthConfig, exchange: &HttpExchange) -> Freshness {
	let policy = CachePolicy::new(&exchange.request, &exchange.response);
	let storable = policy.is_storable();
	let ttl = if storable {
		clamp_ttl(policy.time_to_live(SystemTime::now()), config.key_min_ttl, config.key_max_ttl)
	} else {
		config.key_min_ttl
	};

	tracing::debug!(ttl = ?ttl, storable, "evaluated freshness");

	Freshness { ttl, policy }
}

/// Evaluate cache semantics for a conditional revalidation attempt.
pub fn evaluate_revalidation(
	config: &AuthConfig,
	policy: &CachePolicy,
	request: &Request<()>,
	response: &Response<()>,
) -> Revalidation {
	let now = SystemTime::now();
	let (policy, parts, modified) = match policy.after_response(request, response, now) {
		AfterResponse::NotModified(policy, parts) => (policy, parts, false),
		AfterResponse::Modified(policy, parts) => (policy, parts, true),
	};
	let response = Response::from_parts(parts, ());
	let ttl = clamp_ttl(policy.time_to_live(now), config.key_min_ttl, config.key_max_ttl);

	Revalidation { freshness: Freshness { ttl, policy }, response, modified }
}

fn clamp_ttl(ttl: Duration, min: Duration, max: Duration) -> Duration {
	ttl.clamp(min, max)
}
