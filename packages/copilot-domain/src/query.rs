use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::identity::Identity;

/// A validated query as handed to the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Query {
	pub request_id: Uuid,
	pub text: String,
	pub identity: Identity,
	#[serde(with = "crate::time_serde")]
	pub received_at: OffsetDateTime,
}
impl Query {
	pub fn new(text: impl Into<String>, identity: Identity) -> Self {
		Self {
			request_id: Uuid::new_v4(),
			text: text.into(),
			identity,
			received_at: OffsetDateTime::now_utc(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizedQuery {
	pub queries: Vec<String>,
	pub confidence: f32,
}
impl OptimizedQuery {
	/// Drops blank expansions and falls back to `original` when none remain. Confidence is
	/// clamped to [0, 1]; NaN becomes 0.
	pub fn sanitized(queries: Vec<String>, confidence: f32, original: &str) -> Self {
		let mut queries: Vec<String> = queries
			.into_iter()
			.map(|query| query.trim().to_string())
			.filter(|query| !query.is_empty())
			.collect();

		if queries.is_empty() {
			queries.push(original.trim().to_string());
		}

		let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };

		Self { queries, confidence }
	}
}

/// NFKC, lower-case, single spaces. Used for cache keys only.
pub fn normalize_query_text(text: &str) -> String {
	let normalized: String = text.nfkc().collect::<String>().to_lowercase();

	normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}
