use std::{
	collections::BTreeMap,
	future::Future,
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
	AuditSink, Error, MetricsSink, Providers, Result,
	breaker::CircuitSnapshot,
	cache::{self, CacheManager, CacheNamespace, CacheTags, Lookup},
	client::{DependencyId, ServiceClient},
};
use copilot_domain::{
	AuditDecision, AuditRecord, Candidate, FailureKind, GateDecision, GenerationRoute,
	OptimizedQuery, Outcome, Pipeline, PipelineState, Query, RoutingDecision, SourceRef, Stage,
	StageLatency, ThresholdPolicy, TokenUsage, decide, decide_escalation, filter,
	normalize_query_text, reconcile_order,
};
use copilot_providers::{generate::GenerateResponse, optimize::OptimizeResponse};

const CLARIFICATION_REASON: &str = "Your query needs more details for accurate answering.";
const MAX_SUGGESTIONS: usize = 3;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
	pub thresholds: ThresholdPolicy,
	pub escalation: copilot_config::Escalation,
	pub top_k: u32,
	pub max_context_candidates: usize,
	pub cache_enabled: bool,
	pub optimize_ttl: Duration,
	pub search_ttl: Duration,
	pub generate_ttl: Duration,
	pub request_timeout: Duration,
	pub audit_timeout: Duration,
}
impl OrchestratorSettings {
	pub fn from_config(cfg: &copilot_config::Config) -> Self {
		Self {
			thresholds: ThresholdPolicy::from_config(&cfg.gate),
			escalation: cfg.escalation.clone(),
			top_k: cfg.retrieval.top_k,
			max_context_candidates: cfg.retrieval.max_context_candidates as usize,
			cache_enabled: cfg.cache.enabled,
			optimize_ttl: Duration::from_secs(cfg.cache.optimize_ttl_seconds),
			search_ttl: Duration::from_secs(cfg.cache.search_ttl_seconds),
			generate_ttl: Duration::from_secs(cfg.cache.generate_ttl_seconds),
			request_timeout: Duration::from_millis(cfg.service.request_timeout_ms),
			audit_timeout: Duration::from_millis(cfg.audit.timeout_ms),
		}
	}
}

/// One resilient client, and so one breaker, per dependency.
pub struct Clients {
	pub optimizer: Arc<ServiceClient>,
	pub search: Arc<ServiceClient>,
	pub rerank: Arc<ServiceClient>,
	pub generator_slm: Arc<ServiceClient>,
	pub generator_llm: Arc<ServiceClient>,
}
impl Clients {
	pub fn from_config(deps: &copilot_config::Dependencies, metrics: Arc<dyn MetricsSink>) -> Self {
		let client = |dependency: DependencyId| {
			Arc::new(ServiceClient::from_config(dependency, dependency.config(deps), metrics.clone()))
		};

		Self {
			optimizer: client(DependencyId::Optimizer),
			search: client(DependencyId::Search),
			rerank: client(DependencyId::Rerank),
			generator_slm: client(DependencyId::GeneratorSlm),
			generator_llm: client(DependencyId::GeneratorLlm),
		}
	}

	pub fn get(&self, dependency: DependencyId) -> &Arc<ServiceClient> {
		match dependency {
			DependencyId::Optimizer => &self.optimizer,
			DependencyId::Search => &self.search,
			DependencyId::Rerank => &self.rerank,
			DependencyId::GeneratorSlm => &self.generator_slm,
			DependencyId::GeneratorLlm => &self.generator_llm,
		}
	}

	pub fn snapshots(&self) -> BTreeMap<&'static str, CircuitSnapshot> {
		DependencyId::ALL
			.into_iter()
			.map(|dependency| (dependency.as_str(), self.get(dependency).breaker().snapshot()))
			.collect()
	}
}

pub struct Orchestrator {
	settings: OrchestratorSettings,
	providers: Providers,
	clients: Arc<Clients>,
	cache: CacheManager,
	audit: Arc<dyn AuditSink>,
	metrics: Arc<dyn MetricsSink>,
}
impl Orchestrator {
	pub fn new(
		settings: OrchestratorSettings,
		providers: Providers,
		clients: Arc<Clients>,
		cache: CacheManager,
		audit: Arc<dyn AuditSink>,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		Self { settings, providers, clients, cache, audit, metrics }
	}

	pub fn from_config(
		cfg: &copilot_config::Config,
		providers: Providers,
		audit: Arc<dyn AuditSink>,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		let clients = Arc::new(Clients::from_config(&cfg.dependencies, metrics.clone()));
		let cache = CacheManager::new(cfg.cache.max_entries, Some(metrics.clone()));

		Self::new(OrchestratorSettings::from_config(cfg), providers, clients, cache, audit, metrics)
	}

	pub fn clients(&self) -> &Clients {
		&self.clients
	}

	pub fn cache(&self) -> &CacheManager {
		&self.cache
	}

	/// Drives `query` to exactly one terminal outcome and writes exactly one audit record.
	///
	/// When `cancelled` resolves or the request deadline elapses first, the remaining stages are
	/// abandoned and the outcome is a failure at the stage that was in progress. Dependency calls
	/// already running on background tasks stop retrying; only an attempt in flight finishes.
	pub async fn handle<C>(&self, query: Query, cancelled: C) -> Outcome
	where
		C: Future<Output = ()> + Send,
	{
		let started = Instant::now();
		let run = Mutex::new(RunState::default());
		let cancel = CancellationToken::new();
		let outcome = tokio::select! {
			outcome = self.drive(&query, &run, &cancel) => outcome,
			_ = cancelled => abandon(&run, &query, FailureKind::Cancelled),
			_ = sleep(self.settings.request_timeout) =>
				abandon(&run, &query, FailureKind::DeadlineExceeded),
		};

		cancel.cancel();

		let run = run.into_inner().unwrap_or_else(|err| err.into_inner());
		let elapsed = started.elapsed();

		tracing::info!(
			request_id = %query.request_id,
			outcome = outcome.kind().as_str(),
			stage = run.pipeline.stage().as_str(),
			latency_ms = elapsed.as_millis() as u64,
			"Request finished."
		);

		self.metrics.record_request(outcome.kind(), elapsed);

		self.write_audit(&query, run, &outcome, started).await;

		outcome
	}

	async fn drive(
		&self,
		query: &Query,
		run: &Mutex<RunState>,
		cancel: &CancellationToken,
	) -> Outcome {
		let roles = &query.identity.roles;

		lock(run).advance(PipelineState::Optimizing);

		let started = Instant::now();
		let optimized = match self.optimize(query, cancel).await {
			Ok(lookup) => {
				lock(run).stage_done(Stage::Optimize, started, lookup.hit);

				OptimizedQuery::sanitized(
					lookup.value.optimized_queries,
					lookup.value.confidence,
					&query.text,
				)
			},
			Err(err) => return fail(run, query, &err),
		};

		self.metrics.record_confidence(optimized.confidence);

		let threshold = self.settings.thresholds.resolve(roles);
		let gate = decide(optimized.confidence, threshold);

		{
			let mut run = lock(run);

			run.advance(PipelineState::GateEvaluated);
			run.pipeline.record(RoutingDecision::Gate {
				confidence: optimized.confidence,
				threshold,
				outcome: gate,
			});
		}

		if gate == GateDecision::Clarify {
			lock(run).advance(PipelineState::Clarifying);

			return Outcome::ClarificationRequested {
				reason: CLARIFICATION_REASON.to_string(),
				confidence: optimized.confidence,
				suggestions: optimized.queries.iter().take(MAX_SUGGESTIONS).cloned().collect(),
			};
		}

		lock(run).advance(PipelineState::Retrieving);

		let started = Instant::now();
		let permitted = match self.search(query, &optimized.queries, cancel).await {
			Ok(lookup) => {
				let retrieved = lookup.value.len();
				let permitted = filter(lookup.value, roles);
				let mut run = lock(run);

				run.stage_done(Stage::Retrieve, started, lookup.hit);
				run.pipeline
					.record(RoutingDecision::Access { retrieved, permitted: permitted.len() });

				permitted
			},
			Err(err) => return fail(run, query, &err),
		};

		lock(run).advance(PipelineState::Reranking);

		let started = Instant::now();
		let (mut context, applied) = self.rerank(query, permitted, cancel).await;

		context.truncate(self.settings.max_context_candidates);

		{
			let mut run = lock(run);

			run.stage_done(Stage::Rerank, started, false);
			run.pipeline.record(RoutingDecision::Rerank { applied });
			run.advance(PipelineState::Generating);
		}

		let escalation = decide_escalation(&self.settings.escalation, optimized.confidence, &context);

		{
			let mut run = lock(run);

			run.pipeline.record(RoutingDecision::Escalation {
				route: escalation.route,
				reason: escalation.reason,
			});
			run.escalated = escalation.route.is_escalated();
		}

		if let Some(reason) = escalation.reason {
			self.metrics.record_escalation(reason);
		}

		let started = Instant::now();
		let generated = match self.generate(query, &context, escalation.route, cancel).await {
			Ok(lookup) => lookup,
			Err(err) => return fail(run, query, &err),
		};
		let token_usage = generated.value.token_usage;

		// A cached answer consumed no tokens.
		if !generated.hit {
			let model = generated.value.model_used.as_deref().unwrap_or(escalation.route.as_str());

			self.metrics.record_tokens(model, token_usage.total_tokens);
		}

		{
			let mut run = lock(run);

			run.stage_done(Stage::Generate, started, generated.hit);
			run.token_usage = Some(token_usage);
			run.advance(PipelineState::Completed);
		}

		Outcome::Answered {
			text: generated.value.answer,
			sources: context.iter().map(SourceRef::from).collect(),
			token_usage,
		}
	}

	async fn optimize(
		&self,
		query: &Query,
		cancel: &CancellationToken,
	) -> Result<Lookup<OptimizeResponse>> {
		let roles = query.identity.roles.clone();
		let key = serde_json::json!({
			"kind": "optimize",
			"query": normalize_query_text(&query.text),
			"roles": roles.label(),
		});
		let tags = CacheTags::for_roles(&roles);
		let client = self.clients.optimizer.clone();
		let optimizer = self.providers.optimizer.clone();
		let request_id = query.request_id.to_string();
		let text = query.text.clone();
		let ttl = self.settings.optimize_ttl;
		let cancel = cancel.clone();

		self.cached(CacheNamespace::Optimize, key, ttl, tags, move || async move {
			client.call(&cancel, || optimizer.optimize(&request_id, &text, &roles)).await
		})
		.await
	}

	async fn search(
		&self,
		query: &Query,
		queries: &[String],
		cancel: &CancellationToken,
	) -> Result<Lookup<Vec<Candidate>>> {
		let roles = query.identity.roles.clone();
		let top_k = self.settings.top_k;
		let key = serde_json::json!({
			"kind": "search",
			"queries": queries,
			"roles": roles.label(),
			"top_k": top_k,
		});
		let tags = CacheTags::for_roles(&roles);
		let client = self.clients.search.clone();
		let searcher = self.providers.searcher.clone();
		let request_id = query.request_id.to_string();
		let queries = queries.to_vec();
		let ttl = self.settings.search_ttl;
		let cancel = cancel.clone();

		self.cached(CacheNamespace::Search, key, ttl, tags, move || async move {
			client.call(&cancel, || searcher.search(&request_id, &queries, &roles, top_k)).await
		})
		.await
	}

	/// Reranker failures degrade to the filtered order instead of failing the request.
	async fn rerank(
		&self,
		query: &Query,
		permitted: Vec<Candidate>,
		cancel: &CancellationToken,
	) -> (Vec<Candidate>, bool) {
		if permitted.is_empty() {
			return (permitted, false);
		}

		let request_id = query.request_id.to_string();
		let result = self
			.clients
			.rerank
			.call(cancel, || self.providers.reranker.rerank(&request_id, &query.text, &permitted))
			.await;

		match result {
			Ok(reranked) => {
				let order: Vec<String> =
					reranked.into_iter().map(|candidate| candidate.chunk_id).collect();

				match reconcile_order(&permitted, &order) {
					Some(reordered) => (reordered, true),
					None => {
						tracing::warn!(
							request_id = %query.request_id,
							"Reranker returned candidates outside the permitted set; keeping filtered order."
						);

						(permitted, false)
					},
				}
			},
			Err(err) => {
				tracing::warn!(
					request_id = %query.request_id,
					error = %err,
					"Rerank degraded; keeping filtered order."
				);

				(permitted, false)
			},
		}
	}

	async fn generate(
		&self,
		query: &Query,
		context: &[Candidate],
		route: GenerationRoute,
		cancel: &CancellationToken,
	) -> Result<Lookup<GenerateResponse>> {
		let roles = query.identity.roles.clone();
		let escalate = route.is_escalated();
		let signature: Vec<Value> = context
			.iter()
			.map(|candidate| {
				serde_json::json!({
					"chunk_id": candidate.chunk_id,
					"document_id": candidate.document_id,
				})
			})
			.collect();
		let key = serde_json::json!({
			"kind": "generate",
			"route": route.as_str(),
			"roles": roles.label(),
			"query": normalize_query_text(&query.text),
			"context": signature,
		});
		let tags = CacheTags::for_roles(&roles)
			.with_documents(context.iter().map(|candidate| candidate.document_id.clone()));
		let client = if escalate {
			self.clients.generator_llm.clone()
		} else {
			self.clients.generator_slm.clone()
		};
		let generator = self.providers.generator.clone();
		let request_id = query.request_id.to_string();
		let text = query.text.clone();
		let context = context.to_vec();
		let ttl = self.settings.generate_ttl;
		let cancel = cancel.clone();

		self.cached(CacheNamespace::Generate, key, ttl, tags, move || async move {
			client
				.call(&cancel, || generator.generate(&request_id, &text, &context, &roles, escalate))
				.await
		})
		.await
	}

	async fn cached<T, F, Fut>(
		&self,
		namespace: CacheNamespace,
		key: Value,
		ttl: Duration,
		tags: CacheTags,
		compute: F,
	) -> Result<Lookup<T>>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		F: FnOnce() -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		// Compute runs on its own task with or without the cache; the request token is the only
		// way an abandoned request reaches it.
		if !self.settings.cache_enabled {
			let value = tokio::spawn(compute())
				.await
				.map_err(|err| Error::Task { message: err.to_string() })??;

			return Ok(Lookup { value, hit: false });
		}

		let key = cache::hash_cache_key(&key)?;

		self.cache.get_or_compute(namespace, &key, ttl, tags, compute).await
	}

	async fn write_audit(&self, query: &Query, run: RunState, outcome: &Outcome, started: Instant) {
		let record = AuditRecord {
			request_id: query.request_id,
			identity: query.identity.clone(),
			stage: run.pipeline.stage(),
			trace: run.pipeline.into_trace(),
			stage_latencies: run.latencies,
			outcome: outcome.clone(),
			decision: AuditDecision::for_outcome(outcome),
			escalated: run.escalated,
			token_usage: run.token_usage,
			received_at: query.received_at,
			completed_at: OffsetDateTime::now_utc(),
			total_latency_ms: started.elapsed().as_millis() as u64,
		};

		match timeout(self.settings.audit_timeout, self.audit.record(&record)).await {
			Ok(Ok(())) => {},
			Ok(Err(err)) => {
				tracing::warn!(request_id = %query.request_id, error = %err, "Audit write failed.");
			},
			Err(_) => {
				tracing::warn!(request_id = %query.request_id, "Audit write timed out.");
			},
		}
	}
}

#[derive(Default)]
struct RunState {
	pipeline: Pipeline,
	latencies: Vec<StageLatency>,
	token_usage: Option<TokenUsage>,
	escalated: bool,
}
impl RunState {
	fn advance(&mut self, next: PipelineState) {
		if let Err(err) = self.pipeline.advance(next) {
			tracing::error!(error = %err, "Pipeline transition rejected.");
		}
	}

	fn stage_done(&mut self, stage: Stage, started: Instant, cached: bool) {
		self.latencies.push(StageLatency {
			stage,
			latency_ms: started.elapsed().as_millis() as u64,
			cached,
		});
	}
}

fn lock(run: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
	run.lock().unwrap_or_else(|err| err.into_inner())
}

fn fail(run: &Mutex<RunState>, query: &Query, err: &Error) -> Outcome {
	let mut run = lock(run);
	let stage = run.pipeline.stage();

	tracing::warn!(
		request_id = %query.request_id,
		stage = stage.as_str(),
		error = %err,
		"Stage failed."
	);

	run.advance(PipelineState::Failed);

	Outcome::failed(err.failure_kind(), stage)
}

fn abandon(run: &Mutex<RunState>, query: &Query, kind: FailureKind) -> Outcome {
	let mut run = lock(run);
	let stage = run.pipeline.stage();

	tracing::warn!(
		request_id = %query.request_id,
		stage = stage.as_str(),
		code = kind.code(),
		"Request abandoned."
	);

	run.advance(PipelineState::Failed);

	Outcome::failed(kind, stage)
}
