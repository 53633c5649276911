//! Client configuration, endpoint layout, and retry policy validation.

// std
use std::{cell::RefCell, mem};
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Identity Toolkit v1 base URL.
pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1/";
/// Secure token service v1 base URL (refresh-token exchange).
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/";
/// Google OAuth2 token endpoint used for service-account assertions.
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// JWK set used to sign Firebase ID tokens.
pub const ID_TOKEN_KEYS_URL: &str =
	"https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
/// X.509 certificate map used to sign session cookies.
pub const SESSION_COOKIE_KEYS_URL: &str =
	"https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys";
/// Default lower TTL bound for public-key documents.
pub const DEFAULT_KEY_MIN_TTL: Duration = Duration::from_secs(60);
/// Default upper TTL bound for public-key documents.
pub const DEFAULT_KEY_MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default stale-while-error window for public keys.
pub const DEFAULT_STALE_WHILE_ERROR: Duration = Duration::from_secs(5 * 60);
/// Default minimum gap between refetches triggered by an unknown key id.
pub const DEFAULT_KEY_REFETCH_COOLDOWN: Duration = Duration::from_secs(30);
/// Default size guard (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default margin removed from OAuth token lifetimes before caching.
pub const DEFAULT_TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);
/// Default timeout for Identity Toolkit and OAuth POSTs.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Largest accepted `key_max_ttl`.
pub const MAX_KEY_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);
/// Largest accepted `stale_while_error`.
pub const MAX_STALE_WHILE_ERROR: Duration = Duration::from_secs(60 * 60 * 24);
/// Largest accepted retry deadline, request timeout, or backoff.
pub const MAX_REQUEST_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 0 and current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry configuration for idempotent HTTP operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.max_backoff > MAX_REQUEST_WINDOW {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be at most 5 minutes.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}
		if self.deadline > MAX_REQUEST_WINDOW {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be at most 5 minutes.".into(),
			});
		}

		Ok(())
	}

	/// Exponential backoff for a retry attempt using the selected jitter strategy.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let base = self
			.initial_backoff
			.checked_mul(2_u32.saturating_pow(attempt))
			.unwrap_or(self.max_backoff);
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, attempt)
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(3),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(8),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Fixed REST and key endpoints of the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
	/// Identity Toolkit v1 base, ending with `/`.
	pub identity_toolkit: Url,
	/// Secure token service v1 base, ending with `/`.
	pub secure_token: Url,
	/// OAuth2 token endpoint for service-account assertions.
	pub oauth_token: Url,
	/// JWK set for ID tokens.
	pub id_token_keys: Url,
	/// `kid -> PEM certificate` map for session cookies.
	pub session_cookie_keys: Url,
}
impl Endpoints {
	/// Re-root every endpoint under a single origin, e.g. an emulator or a mock server.
	///
	/// The resulting layout is `{base}/identitytoolkit/v1/`, `{base}/securetoken/v1/`,
	/// `{base}/oauth2/token`, `{base}/keys/id-token`, and `{base}/keys/session-cookie`.
	pub fn with_base(base: impl AsRef<str>) -> Result<Self> {
		let raw = base.as_ref();
		let base = if raw.ends_with('/') { Url::parse(raw)? } else { Url::parse(&format!("{raw}/"))? };

		Ok(Self {
			identity_toolkit: base.join("identitytoolkit/v1/")?,
			secure_token: base.join("securetoken/v1/")?,
			oauth_token: base.join("oauth2/token")?,
			id_token_keys: base.join("keys/id-token")?,
			session_cookie_keys: base.join("keys/session-cookie")?,
		})
	}

	fn all(&self) -> [(&'static str, &Url); 5] {
		[
			("endpoints.identity_toolkit", &self.identity_toolkit),
			("endpoints.secure_token", &self.secure_token),
			("endpoints.oauth_token", &self.oauth_token),
			("endpoints.id_token_keys", &self.id_token_keys),
			("endpoints.session_cookie_keys", &self.session_cookie_keys),
		]
	}
}
impl Default for Endpoints {
	fn default() -> Self {
		Self {
			identity_toolkit: parse_const(IDENTITY_TOOLKIT_URL),
			secure_token: parse_const(SECURE_TOKEN_URL),
			oauth_token: parse_const(OAUTH_TOKEN_URL),
			id_token_keys: parse_const(ID_TOKEN_KEYS_URL),
			session_cookie_keys: parse_const(SESSION_COOKIE_KEYS_URL),
		}
	}
}

/// Configuration describing the Firebase project and client behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
	/// Firebase project identifier; the expected token audience.
	pub project_id: String,
	/// Web API key, required for password sign-in, sign-up, and token refresh.
	#[serde(default)]
	pub api_key: Option<String>,
	/// Provider endpoints.
	#[serde(default)]
	pub endpoints: Endpoints,
	/// Whether every endpoint must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional allowlist of domains permitted for outbound requests.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_domains: Vec<String>,
	/// Leeway applied to `exp`, `iat`, and `auth_time` checks.
	#[serde(default)]
	pub clock_skew: Duration,
	/// Minimum TTL applied to public-key documents.
	#[serde(default = "default_key_min_ttl")]
	pub key_min_ttl: Duration,
	/// Maximum TTL applied to public-key documents.
	#[serde(default = "default_key_max_ttl")]
	pub key_max_ttl: Duration,
	/// Duration to keep serving expired keys while refreshes fail.
	#[serde(default = "default_stale_while_error")]
	pub stale_while_error: Duration,
	/// Minimum age of a key ring before an unknown `kid` forces a refetch.
	#[serde(default = "default_key_refetch_cooldown")]
	pub key_refetch_cooldown: Duration,
	/// Maximum size allowed for key documents in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Retry policy for key fetches and OAuth token exchanges.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
	/// Margin subtracted from OAuth token lifetimes before caching.
	#[serde(default = "default_token_expiry_margin")]
	pub token_expiry_margin: Duration,
	/// Timeout applied to each Identity Toolkit and OAuth POST.
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
}
impl AuthConfig {
	/// Construct a configuration with production endpoints and default tuning.
	pub fn new(project_id: impl Into<String>) -> Self {
		Self {
			project_id: project_id.into(),
			api_key: None,
			endpoints: Endpoints::default(),
			require_https: true,
			allowed_domains: Vec::new(),
			clock_skew: Duration::ZERO,
			key_min_ttl: DEFAULT_KEY_MIN_TTL,
			key_max_ttl: DEFAULT_KEY_MAX_TTL,
			stale_while_error: DEFAULT_STALE_WHILE_ERROR,
			key_refetch_cooldown: DEFAULT_KEY_REFETCH_COOLDOWN,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			retry_policy: RetryPolicy::default(),
			token_expiry_margin: DEFAULT_TOKEN_EXPIRY_MARGIN,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Set the web API key.
	pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());

		self
	}

	/// Replace the endpoint layout.
	pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
		self.endpoints = endpoints;

		self
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Set the clock skew leeway for claim checks.
	pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
		self.clock_skew = clock_skew;

		self
	}

	/// Canonicalise the domain allowlist in-place.
	pub fn normalize_allowed_domains(&mut self) {
		let domains = mem::take(&mut self.allowed_domains);

		self.allowed_domains = security::normalize_allowlist(domains);
	}

	/// The API key, or a validation error naming the operation that needs it.
	pub fn require_api_key(&self) -> Result<&str> {
		self.api_key.as_deref().filter(|key| !key.is_empty()).ok_or_else(|| Error::Validation {
			field: "api_key",
			reason: "An API key is required for this operation.".into(),
		})
	}

	/// Check an outbound URL against the HTTPS requirement and domain allowlist.
	pub fn check_url(&self, field: &'static str, url: &Url) -> Result<()> {
		if self.require_https {
			security::enforce_https(url)?;
		}

		let Some(host) = url.host_str() else {
			return Err(Error::Validation { field, reason: "Must include a host component.".into() });
		};

		if !security::host_is_allowed(host, &self.allowed_domains) {
			return Err(Error::Security(format!("Host '{host}' is not in the allowlist.")));
		}

		Ok(())
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		validate_project_id(&self.project_id)?;

		for (field, url) in self.endpoints.all() {
			self.check_url(field, url)?;
		}

		if self.key_min_ttl < Duration::from_secs(1) {
			return Err(Error::Validation {
				field: "key_min_ttl",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.key_max_ttl < self.key_min_ttl {
			return Err(Error::Validation {
				field: "key_max_ttl",
				reason: "Must be greater than or equal to key_min_ttl.".into(),
			});
		}
		if self.key_max_ttl > MAX_KEY_TTL {
			return Err(Error::Validation {
				field: "key_max_ttl",
				reason: "Must be at most 7 days.".into(),
			});
		}
		if self.stale_while_error > MAX_STALE_WHILE_ERROR {
			return Err(Error::Validation {
				field: "stale_while_error",
				reason: "Must be at most 24 hours.".into(),
			});
		}
		if self.key_refetch_cooldown > self.key_max_ttl {
			return Err(Error::Validation {
				field: "key_refetch_cooldown",
				reason: "Must be less than or equal to key_max_ttl.".into(),
			});
		}
		if self.request_timeout.is_zero() || self.request_timeout > MAX_REQUEST_WINDOW {
			return Err(Error::Validation {
				field: "request_timeout",
				reason: "Must be greater than zero and at most 5 minutes.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.clock_skew > Duration::from_secs(5 * 60) {
			return Err(Error::Validation {
				field: "clock_skew",
				reason: "Must be at most 5 minutes.".into(),
			});
		}

		self.retry_policy.validate()?;

		for domain in &self.allowed_domains {
			match security::canonicalize_dns_name(domain) {
				Some(canonical) if canonical == *domain => {},
				Some(_) =>
					return Err(Error::Validation {
						field: "allowed_domains",
						reason: "Entries must be canonical hostnames (lowercase, no trailing dot)."
							.into(),
					}),
				None =>
					return Err(Error::Validation {
						field: "allowed_domains",
						reason: "Entries must be non-empty hostnames.".into(),
					}),
			}
		}

		Ok(())
	}
}

fn parse_const(raw: &'static str) -> Url {
	Url::parse(raw).unwrap_or_else(|err| unreachable!("invalid built-in endpoint {raw}: {err}"))
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_true() -> bool {
	true
}

fn default_key_min_ttl() -> Duration {
	DEFAULT_KEY_MIN_TTL
}

fn default_key_max_ttl() -> Duration {
	DEFAULT_KEY_MAX_TTL
}

fn default_stale_while_error() -> Duration {
	DEFAULT_STALE_WHILE_ERROR
}

fn default_key_refetch_cooldown() -> Duration {
	DEFAULT_KEY_REFETCH_COOLDOWN
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_token_expiry_margin() -> Duration {
	DEFAULT_TOKEN_EXPIRY_MARGIN
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

fn validate_project_id(value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field: "project_id", reason: "Must not be empty.".into() });
	}
	if value.len() > 64 {
		return Err(Error::Validation {
			field: "project_id",
			reason: "Must be 64 characters or fewer.".into(),
		});
	}
	if !value.as_bytes().iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
	{
		return Err(Error::Validation {
			field: "project_id",
			reason: "May only contain lowercase ASCII letters, numbers, and '-'.".into(),
		});
	}

	Ok(())
}
