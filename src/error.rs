//! Crate-wide error types and `Result` alias.

// std
use std::{convert::Infallible, fmt::Display, str::FromStr};
// self
use crate::verify::TokenKind;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the Firebase auth client.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] redis::RedisError),

	#[error("Identity provider rejected the request with {status}: {code}")]
	Api { status: http::StatusCode, code: ApiErrorCode, message: String },
	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("The {kind} is invalid: {reason}")]
	InvalidToken { kind: TokenKind, reason: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Store error: {0}")]
	Store(String),
	#[error("The {kind} has expired.")]
	TokenExpired { kind: TokenKind },
	#[error("The {kind} has been revoked.")]
	TokenRevoked { kind: TokenKind },
	#[error("The user account '{uid}' has been disabled.")]
	UserDisabled { uid: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the failure is transient and the request may be retried.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Reqwest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
			Self::HttpStatus { status, .. } | Self::Api { status, .. } =>
				status.is_server_error() || *status == http::StatusCode::TOO_MANY_REQUESTS,
			_ => false,
		}
	}

	pub(crate) fn invalid_token(kind: TokenKind, reason: impl Display) -> Self {
		Self::InvalidToken { kind, reason: reason.to_string() }
	}
}

/// Error codes returned by the Identity Toolkit and secure token services.
///
/// The provider reports them as upper-case strings such as `EMAIL_NOT_FOUND`, sometimes followed
/// by ` : <detail>`.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiErrorCode {
	EmailExists,
	EmailNotFound,
	InvalidPassword,
	InvalidLoginCredentials,
	UserDisabled,
	TooManyAttempts,
	InvalidIdToken,
	TokenExpired,
	UserNotFound,
	WeakPassword,
	OperationNotAllowed,
	InvalidRefreshToken,
	InvalidGrant,
	Other(String),
}
impl ApiErrorCode {
	/// Wire representation of the code.
	pub fn as_str(&self) -> &str {
		match self {
			Self::EmailExists => "EMAIL_EXISTS",
			Self::EmailNotFound => "EMAIL_NOT_FOUND",
			Self::InvalidPassword => "INVALID_PASSWORD",
			Self::InvalidLoginCredentials => "INVALID_LOGIN_CREDENTIALS",
			Self::UserDisabled => "USER_DISABLED",
			Self::TooManyAttempts => "TOO_MANY_ATTEMPTS_TRY_LATER",
			Self::InvalidIdToken => "INVALID_ID_TOKEN",
			Self::TokenExpired => "TOKEN_EXPIRED",
			Self::UserNotFound => "USER_NOT_FOUND",
			Self::WeakPassword => "WEAK_PASSWORD",
			Self::OperationNotAllowed => "OPERATION_NOT_ALLOWED",
			Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
			Self::InvalidGrant => "invalid_grant",
			Self::Other(code) => code,
		}
	}
}
impl FromStr for ApiErrorCode {
	type Err = Infallible;

	fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
		// "WEAK_PASSWORD : Password should be at least 6 characters"
		let code = raw.split(" : ").next().unwrap_or(raw).trim();

		Ok(match code {
			"EMAIL_EXISTS" => Self::EmailExists,
			"EMAIL_NOT_FOUND" => Self::EmailNotFound,
			"INVALID_PASSWORD" => Self::InvalidPassword,
			"INVALID_LOGIN_CREDENTIALS" => Self::InvalidLoginCredentials,
			"USER_DISABLED" => Self::UserDisabled,
			"TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyAttempts,
			"INVALID_ID_TOKEN" => Self::InvalidIdToken,
			"TOKEN_EXPIRED" => Self::TokenExpired,
			"USER_NOT_FOUND" => Self::UserNotFound,
			"WEAK_PASSWORD" => Self::WeakPassword,
			"OPERATION_NOT_ALLOWED" => Self::OperationNotAllowed,
			"INVALID_REFRESH_TOKEN" => Self::InvalidRefreshToken,
			"invalid_grant" => Self::InvalidGrant,
			other => Self::Other(other.to_owned()),
		})
	}
}
impl Display for ApiErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
