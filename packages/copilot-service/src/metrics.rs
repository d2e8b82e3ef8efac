use std::{
	collections::BTreeMap,
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;

use crate::{cache::CacheNamespace, client::DependencyId};
use copilot_domain::{EscalationReason, OutcomeKind};

pub const DEPENDENCY_ATTEMPTS: &str = "copilot_dependency_attempts_total";
pub const DEPENDENCY_LATENCY: &str = "copilot_dependency_latency_seconds";
pub const DEPENDENCY_SHORT_CIRCUITS: &str = "copilot_dependency_short_circuits_total";
pub const CACHE_LOOKUPS: &str = "copilot_cache_lookups_total";
pub const REQUESTS: &str = "copilot_requests_total";
pub const RESPONSE_TIME: &str = "copilot_response_time_ms";
pub const ESCALATIONS: &str = "copilot_llm_escalations_total";
pub const QUERY_CONFIDENCE: &str = "copilot_query_confidence";
pub const TOKEN_USAGE: &str = "copilot_token_usage";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
	Success,
	Failure,
	Timeout,
	Rejected,
}
impl AttemptOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::Failure => "failure",
			Self::Timeout => "timeout",
			Self::Rejected => "rejected",
		}
	}
}

/// Boundary for dependency, cache and request telemetry. Implementations must not block.
pub trait MetricsSink
where
	Self: Send + Sync,
{
	fn record_attempt(
		&self,
		dependency: DependencyId,
		attempt: u32,
		outcome: AttemptOutcome,
		latency: Duration,
	);

	fn record_short_circuit(&self, dependency: DependencyId);

	fn record_cache(&self, namespace: CacheNamespace, hit: bool);

	/// One finished request, labelled by the branch it took.
	fn record_request(&self, branch: OutcomeKind, latency: Duration);

	fn record_confidence(&self, confidence: f32);

	fn record_escalation(&self, reason: EscalationReason);

	fn record_tokens(&self, model: &str, tokens: u32);
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DependencyCounters {
	pub attempts: u64,
	pub successes: u64,
	pub failures: u64,
	pub timeouts: u64,
	pub rejections: u64,
	pub short_circuits: u64,
	pub latency_ms_total: u64,
	pub latency_ms_max: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
	pub hits: u64,
	pub misses: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestCounters {
	pub count: u64,
	pub response_ms_total: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
	pub dependencies: BTreeMap<&'static str, DependencyCounters>,
	pub cache: BTreeMap<&'static str, CacheCounters>,
	pub requests: BTreeMap<&'static str, RequestCounters>,
	pub escalations: BTreeMap<&'static str, u64>,
	pub tokens: BTreeMap<String, u64>,
}

/// Emits every event through the `metrics` facade, which the API binary backs with a Prometheus
/// recorder, and keeps process-local aggregates for the JSON admin snapshot.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
	inner: Mutex<MetricsSnapshot>,
}
impl ServiceMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		self.lock().clone()
	}

	fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
		self.inner.lock().unwrap_or_else(|err| err.into_inner())
	}
}

impl MetricsSink for ServiceMetrics {
	fn record_attempt(
		&self,
		dependency: DependencyId,
		attempt: u32,
		outcome: AttemptOutcome,
		latency: Duration,
	) {
		let latency_ms = latency.as_millis() as u64;

		tracing::debug!(
			dependency = dependency.as_str(),
			attempt,
			outcome = outcome.as_str(),
			latency_ms,
			"Dependency attempt finished."
		);

		metrics::counter!(
			DEPENDENCY_ATTEMPTS,
			1,
			"dependency" => dependency.as_str(),
			"outcome" => outcome.as_str()
		);
		metrics::histogram!(
			DEPENDENCY_LATENCY,
			latency.as_secs_f64(),
			"dependency" => dependency.as_str()
		);

		let mut inner = self.lock();
		let counters = inner.dependencies.entry(dependency.as_str()).or_default();

		counters.attempts += 1;
		counters.latency_ms_total += latency_ms;
		counters.latency_ms_max = counters.latency_ms_max.max(latency_ms);

		match outcome {
			AttemptOutcome::Success => counters.successes += 1,
			AttemptOutcome::Failure => counters.failures += 1,
			AttemptOutcome::Timeout => counters.timeouts += 1,
			AttemptOutcome::Rejected => counters.rejections += 1,
		}
	}

	fn record_short_circuit(&self, dependency: DependencyId) {
		tracing::debug!(dependency = dependency.as_str(), "Dependency call short-circuited.");

		metrics::counter!(DEPENDENCY_SHORT_CIRCUITS, 1, "dependency" => dependency.as_str());

		self.lock().dependencies.entry(dependency.as_str()).or_default().short_circuits += 1;
	}

	fn record_cache(&self, namespace: CacheNamespace, hit: bool) {
		let result = if hit { "hit" } else { "miss" };

		metrics::counter!(CACHE_LOOKUPS, 1, "namespace" => namespace.as_str(), "result" => result);

		let mut inner = self.lock();
		let counters = inner.cache.entry(namespace.as_str()).or_default();

		if hit {
			counters.hits += 1;
		} else {
			counters.misses += 1;
		}
	}

	fn record_request(&self, branch: OutcomeKind, latency: Duration) {
		let latency_ms = latency.as_millis() as u64;

		metrics::counter!(REQUESTS, 1, "branch" => branch.as_str());
		metrics::histogram!(RESPONSE_TIME, latency.as_secs_f64() * 1_000.0);

		let mut inner = self.lock();
		let counters = inner.requests.entry(branch.as_str()).or_default();

		counters.count += 1;
		counters.response_ms_total += latency_ms;
	}

	fn record_confidence(&self, confidence: f32) {
		metrics::histogram!(QUERY_CONFIDENCE, f64::from(confidence));
	}

	fn record_escalation(&self, reason: EscalationReason) {
		metrics::counter!(ESCALATIONS, 1, "reason" => reason.as_str());

		*self.lock().escalations.entry(reason.as_str()).or_default() += 1;
	}

	fn record_tokens(&self, model: &str, tokens: u32) {
		metrics::histogram!(TOKEN_USAGE, f64::from(tokens), "model" => model.to_string());

		*self.lock().tokens.entry(model.to_string()).or_default() += u64::from(tokens);
	}
}
