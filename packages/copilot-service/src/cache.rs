use std::{collections::BTreeSet, future::Future, sync::Arc, time::Duration};

use moka::{Expiry, future::Cache};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Error, Result, metrics::MetricsSink};
use copilot_domain::{Role, RoleSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
	Optimize,
	Search,
	Generate,
}
impl CacheNamespace {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Optimize => "optimize",
			Self::Search => "search",
			Self::Generate => "generate",
		}
	}
}

/// What an entry was derived from, for targeted invalidation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheTags {
	pub roles: BTreeSet<Role>,
	pub documents: BTreeSet<String>,
}
impl CacheTags {
	pub fn for_roles(roles: &RoleSet) -> Self {
		Self { roles: roles.iter().collect(), documents: BTreeSet::new() }
	}

	pub fn with_documents<I, S>(mut self, documents: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.documents.extend(documents.into_iter().map(Into::into));

		self
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lookup<T> {
	pub value: T,
	pub hit: bool,
}

pub fn hash_cache_key(payload: &Value) -> Result<String> {
	let raw = serde_json::to_vec(payload).map_err(|err| Error::Cache {
		message: format!("Failed to encode cache key payload: {err}"),
	})?;

	Ok(blake3::hash(&raw).to_hex().to_string())
}

pub fn cache_key_prefix(key: &str) -> &str {
	let len = key.len().min(12);

	&key[..len]
}

/// In-process read-through cache shared by all requests.
///
/// Each entry carries its namespace TTL; capacity is bounded by moka's size-based eviction.
/// Concurrent misses on the same key may each run `compute`; the last write wins. `compute`
/// runs on its own task so a cancelled caller still populates the cache for later callers.
#[derive(Clone)]
pub struct CacheManager {
	entries: Cache<EntryKey, Arc<Entry>>,
	metrics: Option<Arc<dyn MetricsSink>>,
}
impl CacheManager {
	pub fn new(max_entries: usize, metrics: Option<Arc<dyn MetricsSink>>) -> Self {
		let entries = Cache::builder()
			.max_capacity(max_entries as u64)
			.expire_after(EntryTtl)
			.build();

		Self { entries, metrics }
	}

	pub async fn get_or_compute<T, F, Fut>(
		&self,
		namespace: CacheNamespace,
		key: &str,
		ttl: Duration,
		tags: CacheTags,
		compute: F,
	) -> Result<Lookup<T>>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		F: FnOnce() -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let entry_key = (namespace, key.to_string());

		if let Some(entry) = self.entries.get(&entry_key).await {
			match serde_json::from_value(entry.value.clone()) {
				Ok(value) => {
					self.record(namespace, true);

					tracing::debug!(
						cache_namespace = namespace.as_str(),
						cache_key_prefix = cache_key_prefix(key),
						hit = true,
						"Cache hit."
					);

					return Ok(Lookup { value, hit: true });
				},
				Err(err) => {
					tracing::warn!(
						error = %err,
						cache_namespace = namespace.as_str(),
						cache_key_prefix = cache_key_prefix(key),
						"Cache payload decode failed."
					);

					self.entries.invalidate(&entry_key).await;
				},
			}
		}

		self.record(namespace, false);

		let entries = self.entries.clone();
		let pending = compute();
		let handle = tokio::spawn(async move {
			let value = pending.await?;

			match serde_json::to_value(&value) {
				Ok(blob) => entries.insert(entry_key, Arc::new(Entry { value: blob, ttl, tags })).await,
				Err(err) => tracing::warn!(
					error = %err,
					cache_namespace = namespace.as_str(),
					"Cache payload encode failed."
				),
			}

			Ok::<T, Error>(value)
		});
		let value = handle.await.map_err(|err| Error::Task { message: err.to_string() })??;

		Ok(Lookup { value, hit: false })
	}

	/// Drops the whole search namespace plus every generation built from `document_id`.
	pub async fn invalidate_document(&self, document_id: &str) -> usize {
		self.remove_where(|(namespace, _), entry| match namespace {
			CacheNamespace::Search => true,
			CacheNamespace::Generate => entry.tags.documents.contains(document_id),
			CacheNamespace::Optimize => false,
		})
		.await
	}

	/// Drops every entry derived from a role set that shares a role with `roles`.
	pub async fn invalidate_roles(&self, roles: &RoleSet) -> usize {
		self.remove_where(|_, entry| roles.intersects(&entry.tags.roles)).await
	}

	/// Runs pending maintenance, which evicts expired entries, and reports how many left.
	pub async fn purge_expired(&self) -> usize {
		let before = self.entries.entry_count();

		self.entries.run_pending_tasks().await;

		before.saturating_sub(self.entries.entry_count()) as usize
	}

	pub async fn len(&self) -> u64 {
		self.entries.run_pending_tasks().await;

		self.entries.entry_count()
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}

	/// Removes matching entries one by one so the returned count is exact; expired entries
	/// are invisible to iteration and never counted.
	async fn remove_where<F>(&self, matches: F) -> usize
	where
		F: Fn(&EntryKey, &Entry) -> bool,
	{
		let keys: Vec<EntryKey> = self
			.entries
			.iter()
			.filter(|(key, entry)| matches(key, entry))
			.map(|(key, _)| (*key).clone())
			.collect();
		let mut removed = 0;

		for key in keys {
			if self.entries.remove(&key).await.is_some() {
				removed += 1;
			}
		}

		removed
	}

	fn record(&self, namespace: CacheNamespace, hit: bool) {
		if let Some(metrics) = self.metrics.as_ref() {
			metrics.record_cache(namespace, hit);
		}
	}
}

type EntryKey = (CacheNamespace, String);

struct Entry {
	value: Value,
	ttl: Duration,
	tags: CacheTags,
}

/// Expires every entry after the TTL of the namespace it was written under; a rewrite restarts
/// the clock.
struct EntryTtl;
impl Expiry<EntryKey, Arc<Entry>> for EntryTtl {
	fn expire_after_create(
		&self,
		_key: &EntryKey,
		entry: &Arc<Entry>,
		_created_at: std::time::Instant,
	) -> Option<Duration> {
		Some(entry.ttl)
	}

	fn expire_after_update(
		&self,
		_key: &EntryKey,
		entry: &Arc<Entry>,
		_updated_at: std::time::Instant,
		_duration_until_expiry: Option<Duration>,
	) -> Option<Duration> {
		Some(entry.ttl)
	}
}
