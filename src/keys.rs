//! Public signing keys: where they live and how their documents are parsed.

// std
use std::{
	collections::{BTreeMap, HashMap},
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use jsonwebtoken::{
	DecodingKey,
	jwk::{AlgorithmParameters, JwkSet},
};
use url::Url;
// self
use crate::_prelude::*;

/// Wire format of a key document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFormat {
	/// RFC 7517 JWK set.
	Jwks,
	/// JSON object mapping key ids to PEM-encoded X.509 certificates.
	X509,
}

/// A public-key endpoint and the format it serves.
#[derive(Clone, Debug)]
pub struct KeySource {
	/// Short label used in logs and metrics.
	pub label: &'static str,
	/// Endpoint serving the key document.
	pub url: Url,
	/// Document format.
	pub format: KeyFormat,
}
impl KeySource {
	/// Construct a new key source.
	pub fn new(label: &'static str, url: Url, format: KeyFormat) -> Self {
		Self { label, url, format }
	}

	/// Parse a fetched document according to this source's format.
	pub fn parse(&self, body: &[u8]) -> Result<KeyRing> {
		match self.format {
			KeyFormat::Jwks => KeyRing::from_jwks(body),
			KeyFormat::X509 => KeyRing::from_x509(body),
		}
	}
}

/// Verification keys indexed by key id.
#[derive(Clone, Default)]
pub struct KeyRing {
	keys: HashMap<String, DecodingKey>,
}
impl KeyRing {
	/// Parse a JWK set, keeping RSA keys that carry a `kid`.
	pub fn from_jwks(body: &[u8]) -> Result<Self> {
		let set: JwkSet = serde_json::from_slice(body)?;
		let mut keys = HashMap::with_capacity(set.keys.len());

		for jwk in &set.keys {
			let Some(kid) = jwk.common.key_id.as_deref() else {
				tracing::warn!("skipping JWK without a key id");

				continue;
			};

			if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
				tracing::debug!(kid, "skipping non-RSA JWK");

				continue;
			}

			match DecodingKey::from_jwk(jwk) {
				Ok(key) => {
					keys.insert(kid.to_owned(), key);
				},
				Err(err) => tracing::warn!(kid, error = %err, "skipping unusable JWK"),
			}
		}

		Self::non_empty(keys)
	}

	/// Parse a `kid -> PEM certificate` map.
	pub fn from_x509(body: &[u8]) -> Result<Self> {
		let certificates: BTreeMap<String, String> = serde_json::from_slice(body)?;
		let mut keys = HashMap::with_capacity(certificates.len());

		for (kid, pem) in certificates {
			match DecodingKey::from_rsa_pem(pem.as_bytes()) {
				Ok(key) => {
					keys.insert(kid, key);
				},
				Err(err) => tracing::warn!(kid, error = %err, "skipping unusable certificate"),
			}
		}

		Self::non_empty(keys)
	}

	fn non_empty(keys: HashMap<String, DecodingKey>) -> Result<Self> {
		if keys.is_empty() {
			return Err(Error::Validation {
				field: "keys",
				reason: "Key document contains no usable RSA keys.".into(),
			});
		}

		Ok(Self { keys })
	}

	/// Look up the key for a key id.
	pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
		self.keys.get(kid)
	}

	/// Whether the ring holds a key for `kid`.
	pub fn contains(&self, kid: &str) -> bool {
		self.keys.contains_key(kid)
	}

	/// Key ids present in the ring, sorted.
	pub fn kids(&self) -> Vec<&str> {
		let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();

		kids.sort_unstable();

		kids
	}

	/// Number of usable keys.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the ring is empty.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}
impl Debug for KeyRing {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("KeyRing").field("kids", &self.kids()).finish()
	}
}
