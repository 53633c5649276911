//! Service-account credentials used for privileged Identity Toolkit calls.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use jsonwebtoken::EncodingKey;
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::_prelude::*;

/// The subset of a Google service-account key file this crate needs.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
	/// Credential type; `service_account` when present.
	#[serde(rename = "type", default)]
	pub key_type: Option<String>,
	/// Service-account e-mail; the assertion issuer and subject.
	pub client_email: String,
	/// PEM-encoded RSA private key (PKCS#1 or PKCS#8).
	pub private_key: String,
	/// Key id advertised in the assertion header.
	#[serde(default)]
	pub private_key_id: Option<String>,
	/// Project the service account belongs to.
	#[serde(default)]
	pub project_id: Option<String>,
	/// Token endpoint named by the key file.
	///
	/// Informational only: exchanges always use `Endpoints::oauth_token`.
	#[serde(default)]
	pub token_uri: Option<String>,
}
impl ServiceAccountKey {
	/// Parse a service-account key file.
	pub fn from_json(raw: &str) -> Result<Self> {
		let key: Self = serde_json::from_str(raw)?;

		key.validate()?;

		Ok(key)
	}

	/// Validate required fields and the private key encoding.
	pub fn validate(&self) -> Result<()> {
		if let Some(kind) = &self.key_type
			&& kind != "service_account"
		{
			return Err(Error::Validation {
				field: "type",
				reason: format!("Expected a service_account credential, found '{kind}'."),
			});
		}
		if self.client_email.trim().is_empty() {
			return Err(Error::Validation {
				field: "client_email",
				reason: "Must not be empty.".into(),
			});
		}

		self.encoding_key().map(|_| ())
	}

	/// Whether `token_uri` is absent or names `endpoint`.
	pub fn token_uri_matches(&self, endpoint: &Url) -> bool {
		match self.token_uri.as_deref() {
			None => true,
			Some(raw) => Url::parse(raw).is_ok_and(|uri| uri == *endpoint),
		}
	}

	/// Decode the private key into a signing key.
	pub fn encoding_key(&self) -> Result<EncodingKey> {
		EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|err| Error::Validation {
			field: "private_key",
			reason: format!("Unable to parse RSA private key: {err}."),
		})
	}
}
impl Debug for ServiceAccountKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ServiceAccountKey")
			.field("client_email", &self.client_email)
			.field("private_key_id", &self.private_key_id)
			.field("project_id", &self.project_id)
			.field("token_uri", &self.token_uri)
			.finish_non_exhaustive()
	}
}
