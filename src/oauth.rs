//! OAuth2 access tokens for privileged calls, minted from a service-account assertion.
//!
//! Tokens are shared through a [`KeyValueStore`] so that short-lived edge invocations do not
//! perform a fresh exchange on every request.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;
// self
use crate::{
	_prelude::*,
	credentials::ServiceAccountKey,
	http::{client::RestClient, retry::RetryExecutor},
	metrics, security,
	store::KeyValueStore,
};

/// Scopes requested for Firebase administration.
pub const FIREBASE_SCOPES: &[&str] = &[
	"https://www.googleapis.com/auth/cloud-platform",
	"https://www.googleapis.com/auth/firebase.database",
	"https://www.googleapis.com/auth/firebase.messaging",
	"https://www.googleapis.com/auth/identitytoolkit",
	"https://www.googleapis.com/auth/userinfo.email",
];

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: TimeDelta = TimeDelta::hours(1);

/// Bearer token accepted by Google APIs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	/// Opaque token value.
	pub token: String,
	/// Instant at which the provider stops accepting the token.
	pub expires_at: DateTime<Utc>,
}
impl AccessToken {
	/// Whether the token is still accepted at `now`.
	pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at > now
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Mints and caches access tokens for one service account.
#[derive(Clone)]
pub struct AccessTokenProvider {
	account: Arc<ServiceAccountKey>,
	signing_key: Arc<EncodingKey>,
	http: RestClient,
	store: Arc<dyn KeyValueStore>,
	scope: Arc<str>,
	cache_key: Arc<str>,
	single_flight: Arc<Mutex<()>>,
}
impl AccessTokenProvider {
	/// Build a provider requesting [`FIREBASE_SCOPES`].
	pub fn new(
		account: ServiceAccountKey,
		http: RestClient,
		store: Arc<dyn KeyValueStore>,
	) -> Result<Self> {
		Self::with_scopes(account, http, store, FIREBASE_SCOPES.iter().copied())
	}

	/// Build a provider requesting custom scopes.
	pub fn with_scopes<'a, I>(
		account: ServiceAccountKey,
		http: RestClient,
		store: Arc<dyn KeyValueStore>,
		scopes: I,
	) -> Result<Self>
	where
		I: IntoIterator<Item = &'a str>,
	{
		account.validate()?;

		let oauth_token = &http.config().endpoints.oauth_token;

		if !account.token_uri_matches(oauth_token) {
			tracing::warn!(
				token_uri = account.token_uri.as_deref(),
				endpoint = %oauth_token,
				"service-account token_uri differs from the configured token endpoint; using the endpoint"
			);
		}

		let scope = scopes.into_iter().collect::<Vec<_>>().join(" ");

		if scope.is_empty() {
			return Err(Error::Validation { field: "scopes", reason: "Must not be empty.".into() });
		}

		let signing_key = account.encoding_key()?;
		let fingerprint = security::cache_key_fingerprint([
			account.client_email.as_str(),
			account.private_key_id.as_deref().unwrap_or_default(),
			scope.as_str(),
		]);

		Ok(Self {
			account: Arc::new(account),
			signing_key: Arc::new(signing_key),
			http,
			store,
			scope: Arc::from(scope),
			cache_key: Arc::from(format!("oauth:{fingerprint}")),
			single_flight: Arc::new(Mutex::new(())),
		})
	}

	/// Key under which the token is cached.
	pub fn cache_key(&self) -> &str {
		&self.cache_key
	}

	/// Return a live access token, exchanging a new assertion when none is cached.
	#[tracing::instrument(skip(self), fields(account = %self.account.client_email))]
	pub async fn access_token(&self) -> Result<AccessToken> {
		if let Some(token) = self.cached().await {
			metrics::record_access_token(true);

			return Ok(token);
		}

		let _guard = self.single_flight.lock().await;

		if let Some(token) = self.cached().await {
			metrics::record_access_token(true);

			return Ok(token);
		}

		let token = self.exchange().await?;
		let margin = TimeDelta::from_std(self.http.config().token_expiry_margin)
			.unwrap_or(TimeDelta::zero());
		let ttl = (token.expires_at - Utc::now() - margin)
			.to_std()
			.unwrap_or_default()
			.max(Duration::from_secs(1));

		match serde_json::to_string(&token) {
			Ok(serialized) =>
				if let Err(err) = self.store.put(&self.cache_key, serialized, ttl).await {
					tracing::warn!(error = %err, "failed to cache access token");
				},
			Err(err) => tracing::warn!(error = %err, "failed to serialise access token"),
		}

		metrics::record_access_token(false);

		Ok(token)
	}

	/// Drop the cached token, e.g. after the provider rejected it.
	pub async fn invalidate(&self) -> Result<()> {
		self.store.delete(&self.cache_key).await
	}

	async fn cached(&self) -> Option<AccessToken> {
		let raw = match self.store.get(&self.cache_key).await {
			Ok(raw) => raw?,
			Err(err) => {
				tracing::warn!(error = %err, "access token cache lookup failed");

				return None;
			},
		};

		match serde_json::from_str::<AccessToken>(&raw) {
			Ok(token) if token.is_valid_at(Utc::now()) => Some(token),
			Ok(_) => None,
			Err(err) => {
				tracing::warn!(error = %err, "discarding malformed cached access token");

				None
			},
		}
	}

	async fn exchange(&self) -> Result<AccessToken> {
		let url = self.http.config().endpoints.oauth_token.clone();
		let assertion = self.assertion(&url)?;
		let form = TokenRequest { grant_type: JWT_BEARER_GRANT, assertion: &assertion };
		let http = &self.http;
		let form = &form;
		let url = &url;
		let issued_at = Utc::now();
		let response: TokenResponse = RetryExecutor::new(&self.http.config().retry_policy)
			.run(move |timeout| {
				http.post_form("endpoints.oauth_token", url.clone(), form, Some(timeout))
			})
			.await?;

		if response.access_token.is_empty() {
			return Err(Error::Validation {
				field: "access_token",
				reason: "Token endpoint returned an empty access token.".into(),
			});
		}

		tracing::debug!(
			expires_in = response.expires_in,
			token_type = response.token_type.as_deref().unwrap_or("Bearer"),
			"access token exchanged"
		);

		Ok(AccessToken {
			token: response.access_token,
			expires_at: issued_at + TimeDelta::seconds(response.expires_in.max(0)),
		})
	}

	fn assertion(&self, audience: &Url) -> Result<String> {
		let now = Utc::now();
		let claims = AssertionClaims {
			iss: &self.account.client_email,
			sub: &self.account.client_email,
			aud: audience.as_str(),
			scope: &self.scope,
			iat: now.timestamp(),
			exp: (now + ASSERTION_LIFETIME).timestamp(),
		};
		let mut header = Header::new(Algorithm::RS256);

		header.kid = self.account.private_key_id.clone();

		jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(Error::from)
	}
}
impl Debug for AccessTokenProvider {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("AccessTokenProvider")
			.field("account", &self.account)
			.field("scope", &self.scope)
			.field("store", &self.store)
			.finish_non_exhaustive()
	}
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	sub: &'a str,
	aud: &'a str,
	scope: &'a str,
	iat: i64,
	exp: i64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
	grant_type: &'a str,
	assertion: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	expires_in: i64,
	#[serde(default)]
	token_type: Option<String>,
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::{DecodingKey, Validation};
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{body_string_contains, method, path},
	};
	// self
	use super::*;
	use crate::{
		config::{AuthConfig, Endpoints},
		store::MemoryStore,
	};

	const PRIVATE_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");
	const CERTIFICATE: &str = include_str!("../tests/fixtures/signing_cert.pem");

	fn account() -> ServiceAccountKey {
		ServiceAccountKey {
			key_type: Some("service_account".into()),
			client_email: "firebase-adminsdk@demo-project.iam.gserviceaccount.com".into(),
			private_key: PRIVATE_KEY.into(),
			private_key_id: Some("key-1".into()),
			project_id: Some("demo-project".into()),
			token_uri: Some(crate::config::OAUTH_TOKEN_URL.into()),
		}
	}

	fn provider(server: &MockServer, store: Arc<dyn KeyValueStore>) -> AccessTokenProvider {
		let endpoints = Endpoints::with_base(server.uri()).expect("endpoints");
		let config =
			AuthConfig::new("demo-project").with_endpoints(endpoints).with_require_https(false);
		let http = RestClient::new(RestClient::default_client().expect("client"), Arc::new(config));

		AccessTokenProvider::new(account(), http, store).expect("provider")
	}

	#[test]
	fn assertion_is_signed_for_the_token_endpoint() {
		let url = Url::parse(crate::config::OAUTH_TOKEN_URL).unwrap();
		let http = RestClient::new(
			RestClient::default_client().expect("client"),
			Arc::new(AuthConfig::new("demo-project")),
		);
		let provider =
			AccessTokenProvider::new(account(), http, MemoryStore::shared()).expect("provider");
		let assertion = provider.assertion(&url).expect("assertion");
		let header = jsonwebtoken::decode_header(&assertion).expect("header");
		let mut validation = Validation::new(Algorithm::RS256);

		validation.set_audience(&[crate::config::OAUTH_TOKEN_URL]);

		let claims = jsonwebtoken::decode::<serde_json::Value>(
			&assertion,
			&DecodingKey::from_rsa_pem(CERTIFICATE.as_bytes()).expect("certificate"),
			&validation,
		)
		.expect("assertion should verify")
		.claims;

		assert_eq!(header.kid.as_deref(), Some("key-1"));
		assert_eq!(claims["iss"], claims["sub"]);
		assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 3600);
		assert!(claims["scope"].as_str().unwrap().contains("identitytoolkit"));
	}

	#[tokio::test]
	async fn exchanges_once_and_serves_from_store() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/oauth2/token"))
			.and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
			.and(body_string_contains("assertion="))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": "ya29.test-token",
				"expires_in": 3599,
				"token_type": "Bearer"
			})))
			.expect(1)
			.mount(&server)
			.await;

		let endpoint = Endpoints::with_base(server.uri()).expect("endpoints").oauth_token;

		// The key file names Google's endpoint; the exchange still goes to the configured one.
		assert!(!account().token_uri_matches(&endpoint));

		let store = MemoryStore::shared();
		let provider = provider(&server, store.clone());
		let first = provider.access_token().await.expect("token");
		let second = provider.access_token().await.expect("cached token");

		assert_eq!(first.token, "ya29.test-token");
		assert_eq!(first, second);
		assert!(store.get(provider.cache_key()).await.expect("get").is_some());

		server.verify().await;
	}

	#[tokio::test]
	async fn invalidate_forces_a_new_exchange() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/oauth2/token"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": "ya29.rotated",
				"expires_in": 3599
			})))
			.expect(2)
			.mount(&server)
			.await;

		let provider = provider(&server, MemoryStore::shared());

		provider.access_token().await.expect("token");
		provider.invalidate().await.expect("invalidate");
		provider.access_token().await.expect("token");

		server.verify().await;
	}

	#[tokio::test]
	async fn rejected_assertions_surface_oauth_errors() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/oauth2/token"))
			.respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
				"error": "invalid_grant",
				"error_description": "Invalid JWT Signature."
			})))
			.expect(1)
			.mount(&server)
			.await;

		let err = provider(&server, MemoryStore::shared()).access_token().await.unwrap_err();

		assert!(matches!(err, Error::Api { code: crate::ApiErrorCode::InvalidGrant, .. }));

		server.verify().await;
	}
}
