//! High-level client tying REST calls, token verification, and admin credentials together.

// crates.io
use http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::KeyCacheStatus,
	config::AuthConfig,
	credentials::ServiceAccountKey,
	error::ApiErrorCode,
	http::client::RestClient,
	oauth::AccessTokenProvider,
	store::{KeyValueStore, MemoryStore},
	user::{self, UserRecord},
	verify::{DecodedIdToken, TokenKind, TokenVerifier},
};

/// Shortest lifetime accepted for a session cookie.
pub const MIN_SESSION_COOKIE_DURATION: Duration = Duration::from_secs(5 * 60);
/// Longest lifetime accepted for a session cookie.
pub const MAX_SESSION_COOKIE_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

const MAX_UID_CHARS: usize = 128;

/// Firebase Authentication client.
///
/// Cloning is cheap; clones share key caches, the HTTP client, and the access-token cache.
#[derive(Clone, Debug)]
pub struct FirebaseAuth {
	http: RestClient,
	id_tokens: TokenVerifier,
	session_cookies: TokenVerifier,
	oauth: Option<AccessTokenProvider>,
}
impl FirebaseAuth {
	/// Start building a client for `config`.
	pub fn builder(config: AuthConfig) -> FirebaseAuthBuilder {
		FirebaseAuthBuilder::new(config)
	}

	/// Configuration in effect.
	pub fn config(&self) -> &AuthConfig {
		self.http.config()
	}

	/// Verifier for the given token kind.
	pub fn verifier(&self, kind: TokenKind) -> &TokenVerifier {
		match kind {
			TokenKind::IdToken => &self.id_tokens,
			TokenKind::SessionCookie => &self.session_cookies,
		}
	}

	/// Access-token provider, when a service account was configured.
	pub fn access_tokens(&self) -> Option<&AccessTokenProvider> {
		self.oauth.as_ref()
	}

	/// Diagnostic view of both public-key caches.
	pub async fn key_status(&self) -> Vec<KeyCacheStatus> {
		vec![self.id_tokens.keys().status().await, self.session_cookies.keys().status().await]
	}

	/// Sign in with e-mail and password.
	#[tracing::instrument(skip_all)]
	pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SignInResponse> {
		let url = self.public_endpoint("accounts:signInWithPassword")?;

		self.http
			.post_json(
				"endpoints.identity_toolkit",
				url,
				None,
				&PasswordRequest { email, password, return_secure_token: true },
			)
			.await
	}

	/// Create an account with e-mail and password.
	#[tracing::instrument(skip_all)]
	pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
		let url = self.public_endpoint("accounts:signUp")?;

		self.http
			.post_json(
				"endpoints.identity_toolkit",
				url,
				None,
				&PasswordRequest { email, password, return_secure_token: true },
			)
			.await
	}

	/// Exchange a refresh token for a new ID token.
	#[tracing::instrument(skip_all)]
	pub async fn refresh_id_token(&self, refresh_token: &str) -> Result<RefreshedTokens> {
		if refresh_token.is_empty() {
			return Err(Error::Validation {
				field: "refresh_token",
				reason: "Must not be empty.".into(),
			});
		}

		let mut url = join(&self.config().endpoints.secure_token, "token")?;

		url.query_pairs_mut().append_pair("key", self.config().require_api_key()?);

		self.http
			.post_form(
				"endpoints.secure_token",
				url,
				&RefreshRequest { grant_type: "refresh_token", refresh_token },
				None,
			)
			.await
	}

	/// Verify an ID token.
	pub async fn verify_id_token(&self, token: &str) -> Result<DecodedIdToken> {
		self.id_tokens.verify(token).await
	}

	/// Verify an ID token and reject it when the user is disabled or its tokens were revoked.
	pub async fn verify_id_token_and_check_revoked(&self, token: &str) -> Result<DecodedIdToken> {
		let decoded = self.id_tokens.verify(token).await?;

		self.check_revoked(TokenKind::IdToken, decoded).await
	}

	/// Mint a session cookie from a fresh ID token.
	///
	/// `expires_in` must lie within [`MIN_SESSION_COOKIE_DURATION`] and
	/// [`MAX_SESSION_COOKIE_DURATION`].
	#[tracing::instrument(skip(self, id_token))]
	pub async fn create_session_cookie(&self, id_token: &str, expires_in: Duration) -> Result<String> {
		if id_token.is_empty() {
			return Err(Error::Validation { field: "id_token", reason: "Must not be empty.".into() });
		}
		if !(MIN_SESSION_COOKIE_DURATION..=MAX_SESSION_COOKIE_DURATION).contains(&expires_in) {
			return Err(Error::Validation {
				field: "expires_in",
				reason: "Session cookie duration must be between 5 minutes and 14 days.".into(),
			});
		}

		let path = format!("projects/{}:createSessionCookie", self.config().project_id);
		let response: SessionCookieResponse = self
			.admin_call(&path, &SessionCookieRequest { id_token, valid_duration: expires_in.as_secs() })
			.await?;

		if response.session_cookie.is_empty() {
			return Err(Error::Validation {
				field: "session_cookie",
				reason: "Provider returned an empty session cookie.".into(),
			});
		}

		Ok(response.session_cookie)
	}

	/// Verify a session cookie.
	pub async fn verify_session_cookie(&self, cookie: &str) -> Result<DecodedIdToken> {
		self.session_cookies.verify(cookie).await
	}

	/// Verify a session cookie and reject it when the user is disabled or its tokens were revoked.
	pub async fn verify_session_cookie_and_check_revoked(
		&self,
		cookie: &str,
	) -> Result<DecodedIdToken> {
		let decoded = self.session_cookies.verify(cookie).await?;

		self.check_revoked(TokenKind::SessionCookie, decoded).await
	}

	/// Replace a user's custom claims; `None` clears them.
	#[tracing::instrument(skip(self, claims))]
	pub async fn set_custom_user_claims(&self, uid: &str, claims: Option<&Value>) -> Result<()> {
		validate_uid(uid)?;

		let custom_attributes = match claims {
			Some(claims) => user::validate_custom_claims(claims)?,
			None => "{}".to_owned(),
		};
		let path = format!("projects/{}/accounts:update", self.config().project_id);
		let response: UpdateResponse = self
			.admin_call(
				&path,
				&UpdateRequest {
					local_id: uid,
					custom_attributes: Some(&custom_attributes),
					valid_since: None,
				},
			)
			.await?;

		tracing::debug!(uid = %response.local_id, "custom claims updated");

		Ok(())
	}

	/// Look up a user by uid.
	#[tracing::instrument(skip(self))]
	pub async fn get_user(&self, uid: &str) -> Result<UserRecord> {
		validate_uid(uid)?;

		let path = format!("projects/{}/accounts:lookup", self.config().project_id);
		let response: LookupResponse =
			self.admin_call(&path, &LookupRequest { local_id: [uid] }).await?;

		match response.users.into_iter().next() {
			Some(user) => Ok(user),
			None => Err(Error::Api {
				status: StatusCode::NOT_FOUND,
				code: ApiErrorCode::UserNotFound,
				message: format!("No user record found for uid '{uid}'."),
			}),
		}
	}

	/// Revoke every refresh token issued to `uid` by moving its `validSince` to now.
	///
	/// Tokens minted before this instant fail the revocation check.
	#[tracing::instrument(skip(self))]
	pub async fn revoke_refresh_tokens(&self, uid: &str) -> Result<()> {
		validate_uid(uid)?;

		let path = format!("projects/{}/accounts:update", self.config().project_id);
		let _: UpdateResponse = self
			.admin_call(
				&path,
				&UpdateRequest {
					local_id: uid,
					custom_attributes: None,
					valid_since: Some(Utc::now().timestamp()),
				},
			)
			.await?;

		Ok(())
	}

	async fn check_revoked(&self, kind: TokenKind, decoded: DecodedIdToken) -> Result<DecodedIdToken> {
		let user = self.get_user(decoded.uid()).await?;

		if user.disabled {
			return Err(Error::UserDisabled { uid: user.uid });
		}
		if let Some(valid_since) = user.tokens_valid_after_time() {
			let auth_time = decoded
				.auth_time
				.ok_or_else(|| Error::invalid_token(kind, "Token has no 'auth_time' claim."))?;

			if auth_time < valid_since.timestamp() {
				tracing::debug!(uid = decoded.uid(), %kind, "token revoked");

				return Err(Error::TokenRevoked { kind });
			}
		}

		Ok(decoded)
	}

	async fn admin_call<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let oauth = self.oauth.as_ref().ok_or_else(|| Error::Validation {
			field: "service_account",
			reason: "A service account is required for this operation.".into(),
		})?;
		let url = join(&self.config().endpoints.identity_toolkit, path)?;
		let token = oauth.access_token().await?;

		match self.http.post_json("endpoints.identity_toolkit", url, Some(&token.token), body).await {
			Err(err) if is_unauthorized(&err) => {
				if let Err(invalidate_err) = oauth.invalidate().await {
					tracing::warn!(error = %invalidate_err, "failed to drop rejected access token");
				}

				Err(err)
			},
			result => result,
		}
	}

	fn public_endpoint(&self, path: &str) -> Result<Url> {
		let mut url = join(&self.config().endpoints.identity_toolkit, path)?;

		url.query_pairs_mut().append_pair("key", self.config().require_api_key()?);

		Ok(url)
	}
}

/// Builder for [`FirebaseAuth`].
#[derive(Debug)]
pub struct FirebaseAuthBuilder {
	config: AuthConfig,
	service_account: Option<ServiceAccountKey>,
	store: Option<Arc<dyn KeyValueStore>>,
	http_client: Option<reqwest::Client>,
}
impl FirebaseAuthBuilder {
	/// Start from `config`.
	pub fn new(config: AuthConfig) -> Self {
		Self { config, service_account: None, store: None, http_client: None }
	}

	/// Enable admin operations with a service account.
	pub fn service_account(mut self, key: ServiceAccountKey) -> Self {
		self.service_account = Some(key);

		self
	}

	/// Cache access tokens in `store` instead of process memory.
	pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Use a caller-provided HTTP client.
	pub fn http_client(mut self, client: reqwest::Client) -> Self {
		self.http_client = Some(client);

		self
	}

	/// Validate the configuration and build the client.
	pub fn build(self) -> Result<FirebaseAuth> {
		let mut config = self.config;

		config.normalize_allowed_domains();
		config.validate()?;

		if let Some(account) = &self.service_account
			&& let Some(project_id) = &account.project_id
			&& *project_id != config.project_id
		{
			tracing::warn!(
				service_account_project = %project_id,
				project = %config.project_id,
				"service account belongs to a different project"
			);
		}

		let client = match self.http_client {
			Some(client) => client,
			None => RestClient::default_client()?,
		};
		let http = RestClient::new(client, Arc::new(config));
		let oauth = match self.service_account {
			Some(account) => Some(AccessTokenProvider::new(
				account,
				http.clone(),
				self.store.unwrap_or_else(MemoryStore::shared),
			)?),
			None => None,
		};

		Ok(FirebaseAuth {
			id_tokens: TokenVerifier::new(TokenKind::IdToken, http.clone()),
			session_cookies: TokenVerifier::new(TokenKind::SessionCookie, http.clone()),
			http,
			oauth,
		})
	}
}

/// Result of a password sign-in.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
	/// User id.
	#[serde(rename = "localId")]
	pub uid: String,
	#[allow(missing_docs)]
	#[serde(default)]
	pub email: Option<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub display_name: Option<String>,
	/// Freshly minted ID token.
	pub id_token: String,
	/// Refresh token for [`FirebaseAuth::refresh_id_token`].
	pub refresh_token: String,
	/// ID token lifetime.
	#[serde(deserialize_with = "duration_from_secs")]
	pub expires_in: Duration,
	/// Whether the e-mail belongs to an existing account.
	#[serde(default)]
	pub registered: bool,
}

/// Result of a password sign-up.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
	/// User id.
	#[serde(rename = "localId")]
	pub uid: String,
	#[allow(missing_docs)]
	#[serde(default)]
	pub email: Option<String>,
	/// Freshly minted ID token.
	pub id_token: String,
	/// Refresh token for [`FirebaseAuth::refresh_id_token`].
	pub refresh_token: String,
	/// ID token lifetime.
	#[serde(deserialize_with = "duration_from_secs")]
	pub expires_in: Duration,
}

/// Tokens returned by the secure token service.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshedTokens {
	/// New ID token.
	pub id_token: String,
	/// Refresh token to use next time; may differ from the one presented.
	pub refresh_token: String,
	/// ID token lifetime.
	#[serde(deserialize_with = "duration_from_secs")]
	pub expires_in: Duration,
	/// User id.
	pub user_id: String,
	/// Project the token belongs to.
	#[serde(default)]
	pub project_id: Option<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub token_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
	email: &'a str,
	password: &'a str,
	return_secure_token: bool,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
	grant_type: &'static str,
	refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieRequest<'a> {
	id_token: &'a str,
	valid_duration: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCookieResponse {
	session_cookie: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
	local_id: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	custom_attributes: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	valid_since: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
	#[serde(default)]
	local_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
	local_id: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
	#[serde(default)]
	users: Vec<UserRecord>,
}

fn join(base: &Url, path: &str) -> Result<Url> {
	// A leading "./" keeps "accounts:signUp" from parsing as a URL scheme.
	base.join(&format!("./{path}")).map_err(Error::from)
}

fn is_unauthorized(err: &Error) -> bool {
	matches!(
		err,
		Error::Api { status, .. } | Error::HttpStatus { status, .. } if *status == StatusCode::UNAUTHORIZED
	)
}

fn validate_uid(uid: &str) -> Result<()> {
	if uid.is_empty() || uid.chars().count() > MAX_UID_CHARS {
		return Err(Error::Validation {
			field: "uid",
			reason: format!("Must be a non-empty string of at most {MAX_UID_CHARS} characters."),
		});
	}

	Ok(())
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Seconds {
		Text(String),
		Number(u64),
	}

	let secs = match Seconds::deserialize(deserializer)? {
		Seconds::Text(raw) => raw.trim().parse().map_err(serde::de::Error::custom)?,
		Seconds::Number(secs) => secs,
	};

	Ok(Duration::from_secs(secs))
}
