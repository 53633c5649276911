//! Key-value cache seam used to share OAuth access tokens across invocations.
//!
//! Edge runtimes typically expose a platform KV namespace; implement [`KeyValueStore`] over it.
//! [`MemoryStore`] covers single-process use and tests, and `RedisStore` (feature `redis`) covers
//! shared deployments.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use async_trait::async_trait;
#[cfg(feature = "redis")] use redis::AsyncCommands;
use tokio::sync::RwLock;
// self
use crate::_prelude::*;

/// String key-value cache with per-entry expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
	/// Fetch a live value.
	async fn get(&self, key: &str) -> Result<Option<String>>;

	/// Store `value` under `key` for `ttl`.
	async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

	/// Remove `key` if present.
	async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<String, (String, Instant)>>,
}
impl MemoryStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create an empty store behind an [`Arc`].
	pub fn shared() -> Arc<dyn KeyValueStore> {
		Arc::new(Self::new())
	}

	/// Number of entries, including expired ones not yet evicted.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	/// Whether the store holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}
impl Debug for MemoryStore {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("MemoryStore").finish_non_exhaustive()
	}
}
#[async_trait]
impl KeyValueStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let now = Instant::now();

		{
			let entries = self.entries.read().await;

			match entries.get(key) {
				Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
				Some(_) => {},
				None => return Ok(None),
			}
		}

		let mut entries = self.entries.write().await;

		if entries.get(key).is_some_and(|(_, expires_at)| *expires_at <= now) {
			entries.remove(key);
		}

		Ok(None)
	}

	async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
		if ttl.is_zero() {
			return Err(Error::Store("TTL must be greater than zero.".into()));
		}

		let expires_at = Instant::now()
			.checked_add(ttl)
			.ok_or_else(|| Error::Store("TTL exceeds the representable time range.".into()))?;

		self.entries.write().await.insert(key.to_owned(), (value, expires_at));

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.entries.write().await.remove(key);

		Ok(())
	}
}

/// Redis-backed [`KeyValueStore`] with a key namespace.
#[cfg(feature = "redis")]
#[derive(Clone, Debug)]
pub struct RedisStore {
	client: redis::Client,
	namespace: Arc<str>,
}
#[cfg(feature = "redis")]
impl RedisStore {
	/// Wrap a client using the default `firebase-edge-auth` namespace.
	pub fn new(client: redis::Client) -> Self {
		Self { client, namespace: Arc::from("firebase-edge-auth") }
	}

	/// Adjust the key namespace.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Arc::from(namespace.into());

		self
	}

	fn key(&self, key: &str) -> String {
		format!("{}:{key}", self.namespace)
	}
}
#[cfg(feature = "redis")]
#[async_trait]
impl KeyValueStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;
		let value: Option<String> = conn.get(self.key(key)).await?;

		Ok(value)
	}

	async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1)).await?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<()> {
		let mut conn = self.client.get_multiplexed_async_connection().await?;

		conn.del::<_, ()>(self.key(key)).await?;

		Ok(())
	}
}
