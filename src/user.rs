//! User records returned by account lookups, and custom-claim validation.

// crates.io
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// Claims the provider sets itself; developers may not override them.
pub const RESERVED_CLAIMS: &[&str] = &[
	"acr", "amr", "at_hash", "aud", "auth_time", "azp", "cnf", "c_hash", "exp", "iat", "iss", "jti",
	"nbf", "nonce", "firebase", "sub",
];
/// Upper bound on the serialized size of a user's custom claims.
pub const MAX_CUSTOM_CLAIMS_BYTES: usize = 1000;

/// Account details from `accounts:lookup`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
	/// User id.
	#[serde(rename = "localId")]
	pub uid: String,
	#[allow(missing_docs)]
	#[serde(default)]
	pub email: Option<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub email_verified: bool,
	#[allow(missing_docs)]
	#[serde(default)]
	pub display_name: Option<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub photo_url: Option<String>,
	#[allow(missing_docs)]
	#[serde(default)]
	pub phone_number: Option<String>,
	/// Whether the account is disabled.
	#[serde(default)]
	pub disabled: bool,
	/// Custom claims as the JSON string the provider stores.
	#[serde(default)]
	pub custom_attributes: Option<String>,
	/// Seconds since the epoch before which issued tokens are revoked.
	#[serde(default)]
	pub valid_since: Option<String>,
	/// Creation time, milliseconds since the epoch.
	#[serde(default)]
	pub created_at: Option<String>,
	/// Last sign-in time, milliseconds since the epoch.
	#[serde(default)]
	pub last_login_at: Option<String>,
	/// Tenant the account belongs to.
	#[serde(default)]
	pub tenant_id: Option<String>,
	/// Linked identity providers.
	#[serde(default)]
	pub provider_user_info: Vec<ProviderUserInfo>,
}
impl UserRecord {
	/// Instant before which tokens issued to this user are considered revoked.
	pub fn tokens_valid_after_time(&self) -> Option<DateTime<Utc>> {
		let secs = self.valid_since.as_deref()?.parse::<i64>().ok()?;

		DateTime::from_timestamp(secs, 0)
	}

	/// Account creation time.
	pub fn creation_time(&self) -> Option<DateTime<Utc>> {
		parse_millis(self.created_at.as_deref())
	}

	/// Most recent sign-in time.
	pub fn last_sign_in_time(&self) -> Option<DateTime<Utc>> {
		parse_millis(self.last_login_at.as_deref())
	}

	/// Decoded custom claims; `None` when the user has none.
	pub fn custom_claims(&self) -> Result<Option<Map<String, Value>>> {
		match self.custom_attributes.as_deref().map(str::trim) {
			None | Some("") => Ok(None),
			Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
		}
	}
}

/// One identity provider linked to a user.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUserInfo {
	pub provider_id: String,
	#[serde(default)]
	pub raw_id: Option<String>,
	#[serde(default)]
	pub federated_id: Option<String>,
	#[serde(default)]
	pub email: Option<String>,
	#[serde(default)]
	pub display_name: Option<String>,
	#[serde(default)]
	pub photo_url: Option<String>,
	#[serde(default)]
	pub phone_number: Option<String>,
}

/// Validate developer claims and serialize them for `accounts:update`.
///
/// Claims must be a JSON object without reserved names and must serialize to at most
/// [`MAX_CUSTOM_CLAIMS_BYTES`].
pub fn validate_custom_claims(claims: &Value) -> Result<String> {
	let object = claims.as_object().ok_or_else(|| Error::Validation {
		field: "custom_claims",
		reason: "Custom claims must be a JSON object.".into(),
	})?;

	if let Some(reserved) = object.keys().find(|key| RESERVED_CLAIMS.contains(&key.as_str())) {
		return Err(Error::Validation {
			field: "custom_claims",
			reason: format!("Claim '{reserved}' is reserved and cannot be specified."),
		});
	}

	let serialized = serde_json::to_string(object)?;

	if serialized.len() > MAX_CUSTOM_CLAIMS_BYTES {
		return Err(Error::Validation {
			field: "custom_claims",
			reason: format!(
				"Serialized claims are {} bytes; the limit is {MAX_CUSTOM_CLAIMS_BYTES}.",
				serialized.len()
			),
		});
	}

	Ok(serialized)
}

fn parse_millis(raw: Option<&str>) -> Option<DateTime<Utc>> {
	DateTime::from_timestamp_millis(raw?.parse().ok()?)
}
