//! Async Firebase Authentication client for edge functions: password sign-in, session cookies,
//! ID-token verification, and custom claims on top of the Identity Toolkit REST API.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod credentials;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod oauth;
pub mod security;
pub mod store;
pub mod user;
pub mod verify;

mod client;
mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	client::{
		FirebaseAuth, FirebaseAuthBuilder, MAX_SESSION_COOKIE_DURATION,
		MIN_SESSION_COOKIE_DURATION, RefreshedTokens, SignInResponse, SignUpResponse,
	},
	config::{AuthConfig, Endpoints, JitterStrategy, RetryPolicy},
	credentials::ServiceAccountKey,
	error::{ApiErrorCode, Error, Result},
	store::{KeyValueStore, MemoryStore},
	user::UserRecord,
	verify::{DecodedIdToken, FirebaseSignInInfo, TokenKind},
};
