//! Verification of provider-issued JWTs: ID tokens and session cookies.

// std
use std::{
	collections::BTreeMap,
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	cache::KeyCache,
	http::client::RestClient,
	keys::{KeyFormat, KeySource},
	metrics,
};

const REQUIRED_CLAIMS: &[&str] = &["exp", "iat", "aud", "iss", "sub"];
const MAX_UID_CHARS: usize = 128;

/// Kind of token being verified; determines the issuer and the key endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
	/// ID token minted by the secure token service.
	IdToken,
	/// Session cookie minted by `createSessionCookie`.
	SessionCookie,
}
impl TokenKind {
	/// Issuer prefix; the project id completes it.
	pub fn issuer_prefix(self) -> &'static str {
		match self {
			Self::IdToken => "https://securetoken.google.com/",
			Self::SessionCookie => "https://session.firebase.google.com/",
		}
	}

	/// Expected `iss` claim for `project_id`.
	pub fn issuer(self, project_id: &str) -> String {
		format!("{}{project_id}", self.issuer_prefix())
	}

	/// Stable label for logs and metrics.
	pub fn label(self) -> &'static str {
		match self {
			Self::IdToken => "id_token",
			Self::SessionCookie => "session_cookie",
		}
	}

	fn key_format(self) -> KeyFormat {
		match self {
			Self::IdToken => KeyFormat::Jwks,
			Self::SessionCookie => KeyFormat::X509,
		}
	}
}
impl Display for TokenKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(match self {
			Self::IdToken => "ID token",
			Self::SessionCookie => "session cookie",
		})
	}
}

/// Claims of a verified ID token or session cookie.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedIdToken {
	/// Issuer.
	pub iss: String,
	/// Audience; the Firebase project id.
	pub aud: String,
	/// Subject; the user's uid.
	pub sub: String,
	/// Issued-at, seconds since the epoch.
	pub iat: i64,
	/// Expiry, seconds since the epoch.
	pub exp: i64,
	/// Time the user authenticated, seconds since the epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_time: Option<i64>,
	#[allow(missing_docs)]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[allow(missing_docs)]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email_verified: Option<bool>,
	#[allow(missing_docs)]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone_number: Option<String>,
	#[allow(missing_docs)]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[allow(missing_docs)]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub picture: Option<String>,
	/// Sign-in details added by the provider.
	#[serde(default)]
	pub firebase: FirebaseSignInInfo,
	/// Every claim not listed above, including developer custom claims.
	#[serde(flatten)]
	pub claims: Map<String, Value>,
}
impl DecodedIdToken {
	/// The user's uid.
	pub fn uid(&self) -> &str {
		&self.sub
	}

	/// A custom claim by name.
	pub fn claim(&self, name: &str) -> Option<&Value> {
		self.claims.get(name)
	}

	/// `auth_time` as a timestamp.
	pub fn auth_time_utc(&self) -> Option<DateTime<Utc>> {
		self.auth_time.and_then(|secs| DateTime::from_timestamp(secs, 0))
	}
}

/// The `firebase` claim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirebaseSignInInfo {
	/// Provider used to sign in, e.g. `password` or `google.com`.
	pub sign_in_provider: String,
	/// Identifiers per linked provider.
	pub identities: BTreeMap<String, Value>,
	/// Tenant the user belongs to, for multi-tenant projects.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tenant: Option<String>,
	/// Second factor used, when multi-factor sign-in occurred.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sign_in_second_factor: Option<String>,
}

/// Verifies one kind of token against the project's public keys.
#[derive(Clone, Debug)]
pub struct TokenVerifier {
	kind: TokenKind,
	project_id: Arc<str>,
	issuer: Arc<str>,
	clock_skew: Duration,
	keys: KeyCache,
}
impl TokenVerifier {
	/// Build a verifier using the key endpoint configured for `kind`.
	pub fn new(kind: TokenKind, http: RestClient) -> Self {
		let config = http.config();
		let url = match kind {
			TokenKind::IdToken => config.endpoints.id_token_keys.clone(),
			TokenKind::SessionCookie => config.endpoints.session_cookie_keys.clone(),
		};
		let project_id: Arc<str> = Arc::from(config.project_id.as_str());
		let issuer = Arc::from(kind.issuer(&project_id));
		let clock_skew = config.clock_skew;
		let source = KeySource::new(kind.label(), url, kind.key_format());

		Self { kind, project_id, issuer, clock_skew, keys: KeyCache::new(source, http) }
	}

	/// Token kind this verifier accepts.
	pub fn kind(&self) -> TokenKind {
		self.kind
	}

	/// Public-key cache backing this verifier.
	pub fn keys(&self) -> &KeyCache {
		&self.keys
	}

	/// Verify `token` and return its claims.
	#[tracing::instrument(skip_all, fields(kind = self.kind.label()))]
	pub async fn verify(&self, token: &str) -> Result<DecodedIdToken> {
		let result = self.verify_inner(token).await;

		metrics::record_verification(self.kind, result.as_ref().err());

		if let Err(err) = &result {
			tracing::debug!(error = %err, "token rejected");
		}

		result
	}

	async fn verify_inner(&self, token: &str) -> Result<DecodedIdToken> {
		let kind = self.kind;

		if token.is_empty() {
			return Err(Error::invalid_token(kind, "Token must be a non-empty string."));
		}

		let header = jsonwebtoken::decode_header(token)
			.map_err(|err| Error::invalid_token(kind, format!("Malformed token header: {err}.")))?;

		if header.alg != Algorithm::RS256 {
			return Err(Error::invalid_token(
				kind,
				format!("Expected algorithm RS256, found {:?}.", header.alg),
			));
		}

		let kid = header
			.kid
			.as_deref()
			.filter(|kid| !kid.is_empty())
			.ok_or_else(|| Error::invalid_token(kind, "Token header has no 'kid'."))?;
		let keys = self.keys.resolve_for_kid(kid).await?;
		let key = keys.get(kid).ok_or_else(|| {
			Error::invalid_token(kind, format!("No public key matches kid '{kid}'."))
		})?;
		let mut validation = Validation::new(Algorithm::RS256);

		validation.leeway = self.clock_skew.as_secs();
		validation.set_audience(&[&*self.project_id]);
		validation.set_issuer(&[&*self.issuer]);
		validation.set_required_spec_claims(REQUIRED_CLAIMS);

		let claims = jsonwebtoken::decode::<DecodedIdToken>(token, key, &validation)
			.map_err(|err| self.map_decode_error(err))?
			.claims;

		self.check_claims(&claims)?;

		Ok(claims)
	}

	fn check_claims(&self, claims: &DecodedIdToken) -> Result<()> {
		let kind = self.kind;
		let latest = Utc::now().timestamp() + self.clock_skew.as_secs() as i64;

		if claims.sub.is_empty() {
			return Err(Error::invalid_token(kind, "Subject must be a non-empty string."));
		}
		if claims.sub.chars().count() > MAX_UID_CHARS {
			return Err(Error::invalid_token(
				kind,
				format!("Subject must not exceed {MAX_UID_CHARS} characters."),
			));
		}
		if claims.iat > latest {
			return Err(Error::invalid_token(kind, "Token was issued in the future."));
		}
		if let Some(auth_time) = claims.auth_time
			&& auth_time > latest
		{
			return Err(Error::invalid_token(kind, "Authentication time is in the future."));
		}

		Ok(())
	}

	fn map_decode_error(&self, err: jsonwebtoken::errors::Error) -> Error {
		let kind = self.kind;

		match err.kind() {
			ErrorKind::ExpiredSignature => Error::TokenExpired { kind },
			ErrorKind::InvalidSignature =>
				Error::invalid_token(kind, "Signature verification failed."),
			ErrorKind::InvalidAudience =>
				Error::invalid_token(kind, format!("Expected audience '{}'.", self.project_id)),
			ErrorKind::InvalidIssuer =>
				Error::invalid_token(kind, format!("Expected issuer '{}'.", self.issuer)),
			ErrorKind::MissingRequiredClaim(claim) =>
				Error::invalid_token(kind, format!("Missing required claim '{claim}'.")),
			_ => Error::invalid_token(kind, err),
		}
	}
}
