use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub gate: Gate,
	pub escalation: Escalation,
	pub retrieval: Retrieval,
	pub cache: Cache,
	pub dependencies: Dependencies,
	pub audit: Audit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
	/// Global per-request deadline covering every stage plus the audit write.
	pub request_timeout_ms: u64,
	#[serde(default = "default_max_query_chars")]
	pub max_query_chars: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gate {
	pub confidence_threshold: f32,
	/// Optional. Map keys are role tags, e.g. "HR". Values override `confidence_threshold`.
	#[serde(default)]
	pub role_thresholds: HashMap<String, f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Escalation {
	pub enabled: bool,
	/// Gate confidence below this value routes generation to the large model.
	pub min_confidence: f32,
	/// Total context characters above this value routes generation to the large model.
	pub max_context_chars: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retrieval {
	pub top_k: u32,
	/// Upper bound on candidates handed to generation after reranking.
	pub max_context_candidates: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
	pub enabled: bool,
	pub optimize_ttl_seconds: u64,
	pub search_ttl_seconds: u64,
	pub generate_ttl_seconds: u64,
	pub max_entries: usize,
	#[serde(default = "default_purge_interval_seconds")]
	pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dependencies {
	pub optimizer: DependencyConfig,
	pub search: DependencyConfig,
	pub rerank: DependencyConfig,
	pub generator_slm: DependencyConfig,
	pub generator_llm: DependencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyConfig {
	pub api_base: String,
	pub path: String,
	pub api_key: Option<String>,
	pub model: Option<String>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	pub retry: Retry,
	pub breaker: Breaker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retry {
	/// Total attempts including the first one.
	pub max_attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	#[serde(default = "default_retryable_statuses")]
	pub retryable_statuses: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Breaker {
	pub failure_threshold: u32,
	pub window_ms: u64,
	pub open_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Audit {
	/// One of "log" or "http".
	pub sink: String,
	pub timeout_ms: u64,
	pub endpoint: Option<AuditEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditEndpoint {
	pub api_base: String,
	pub path: String,
	pub api_key: Option<String>,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

pub fn default_retryable_statuses() -> Vec<u16> {
	vec![408, 429, 500, 502, 503, 504]
}

fn default_max_query_chars() -> u32 {
	1_000
}

fn default_purge_interval_seconds() -> u64 {
	300
}
