mod error;

pub use error::{Error, Result};

use std::{
	collections::{BTreeSet, VecDeque},
	future,
	sync::{
		Arc, Mutex, MutexGuard,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use copilot_domain::{AuditRecord, Candidate, Identity, Role, RoleSet, TokenUsage};
use copilot_providers::{generate::GenerateResponse, optimize::OptimizeResponse};
use copilot_service::{
	AuditError, AuditSink, BoxFuture, Generator, Optimizer, Orchestrator, ProviderResult,
	Providers, Reranker, Searcher, ServiceMetrics,
};

const SAMPLE_CONFIG: &str = include_str!("../../copilot-config/tests/fixtures/sample_config.toml");

/// The validated sample configuration shipped with `copilot-config`.
pub fn sample_config() -> Result<copilot_config::Config> {
	let cfg: copilot_config::Config = toml::from_str(SAMPLE_CONFIG)?;

	copilot_config::validate(&cfg)?;

	Ok(cfg)
}

/// Shrinks every retry backoff so retry paths finish in a few milliseconds.
pub fn fast_retries(cfg: &mut copilot_config::Config) {
	let deps = &mut cfg.dependencies;

	for dep in [
		&mut deps.optimizer,
		&mut deps.search,
		&mut deps.rerank,
		&mut deps.generator_slm,
		&mut deps.generator_llm,
	] {
		dep.retry.base_delay_ms = 1;
		dep.retry.max_delay_ms = 4;
	}
}

pub fn identity(user_id: &str, roles: &str) -> Result<Identity> {
	let roles = RoleSet::parse_list(roles)
		.ok_or_else(|| Error::Message(format!("Invalid role list {roles:?}.")))?;

	Ok(Identity::new(user_id, roles))
}

pub fn candidate(chunk_id: &str, document_id: &str, roles: &[Role]) -> Candidate {
	Candidate {
		chunk_id: chunk_id.to_string(),
		document_id: document_id.to_string(),
		title: Some(format!("Title of {document_id}")),
		content: format!("Content of {chunk_id}."),
		score: 0.5,
		access_roles: roles.iter().copied().collect::<BTreeSet<_>>(),
	}
}

/// One scripted reply from a fake dependency.
#[derive(Clone, Debug)]
pub enum Reply<T> {
	Ok(T),
	Status(u16),
	Transport,
	Invalid,
	/// Answers after the delay.
	Delayed(Duration, T),
	/// Never answers.
	Hang,
}

/// Queue of replies; once drained the fallback answers every call.
#[derive(Debug)]
pub struct Script<T> {
	queue: Mutex<VecDeque<Reply<T>>>,
	fallback: Mutex<Reply<T>>,
	calls: AtomicUsize,
}
impl<T> Script<T>
where
	T: Clone + Send + 'static,
{
	pub fn new(fallback: Reply<T>) -> Self {
		Self {
			queue: Mutex::new(VecDeque::new()),
			fallback: Mutex::new(fallback),
			calls: AtomicUsize::new(0),
		}
	}

	pub fn push(&self, reply: Reply<T>) {
		lock(&self.queue).push_back(reply);
	}

	pub fn set_fallback(&self, reply: Reply<T>) {
		*lock(&self.fallback) = reply;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	fn next(&self) -> BoxFuture<'static, ProviderResult<T>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let reply = lock(&self.queue).pop_front().unwrap_or_else(|| lock(&self.fallback).clone());

		Box::pin(async move {
			match reply {
				Reply::Ok(value) => Ok(value),
				Reply::Status(status) => Err(copilot_providers::Error::Status { status }),
				Reply::Transport => Err(copilot_providers::Error::Transport {
					message: "connection refused".to_string(),
				}),
				Reply::Invalid => Err(copilot_providers::Error::invalid_response("Malformed body.")),
				Reply::Delayed(delay, value) => {
					tokio::time::sleep(delay).await;

					Ok(value)
				},
				Reply::Hang => future::pending().await,
			}
		})
	}
}

pub struct FakeOptimizer {
	pub script: Script<OptimizeResponse>,
}
impl FakeOptimizer {
	pub fn new(confidence: f32, queries: &[&str]) -> Self {
		Self { script: Script::new(Reply::Ok(optimize_response(confidence, queries))) }
	}
}

impl Optimizer for FakeOptimizer {
	fn optimize<'a>(
		&'a self,
		_request_id: &'a str,
		_query: &'a str,
		_roles: &'a RoleSet,
	) -> BoxFuture<'a, ProviderResult<OptimizeResponse>> {
		self.script.next()
	}
}

pub fn optimize_response(confidence: f32, queries: &[&str]) -> OptimizeResponse {
	OptimizeResponse {
		optimized_queries: queries.iter().map(|query| query.to_string()).collect(),
		confidence,
		keywords: Vec::new(),
	}
}

pub struct FakeSearcher {
	pub script: Script<Vec<Candidate>>,
}
impl FakeSearcher {
	pub fn new(candidates: Vec<Candidate>) -> Self {
		Self { script: Script::new(Reply::Ok(candidates)) }
	}
}

impl Searcher for FakeSearcher {
	fn search<'a>(
		&'a self,
		_request_id: &'a str,
		_queries: &'a [String],
		_roles: &'a RoleSet,
		_top_k: u32,
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>> {
		self.script.next()
	}
}

#[derive(Clone, Debug)]
pub enum RerankMode {
	/// Returns the input reversed.
	Reverse,
	/// Fails with the given status.
	Fail(u16),
	/// Returns the input plus an extra candidate.
	Inject(Candidate),
}

pub struct FakeReranker {
	mode: Mutex<RerankMode>,
	calls: AtomicUsize,
}
impl FakeReranker {
	pub fn new(mode: RerankMode) -> Self {
		Self { mode: Mutex::new(mode), calls: AtomicUsize::new(0) }
	}

	pub fn set_mode(&self, mode: RerankMode) {
		*lock(&self.mode) = mode;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl Reranker for FakeReranker {
	fn rerank<'a>(
		&'a self,
		_request_id: &'a str,
		_query: &'a str,
		candidates: &'a [Candidate],
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let mode = lock(&self.mode).clone();

		Box::pin(async move {
			match mode {
				RerankMode::Reverse => Ok(candidates.iter().rev().cloned().collect()),
				RerankMode::Fail(status) => Err(copilot_providers::Error::Status { status }),
				RerankMode::Inject(extra) => {
					let mut out = candidates.to_vec();

					out.insert(0, extra);

					Ok(out)
				},
			}
		})
	}
}

/// What a generator call was handed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateCall {
	pub chunk_ids: Vec<String>,
	pub escalate: bool,
}

pub struct FakeGenerator {
	pub script: Script<GenerateResponse>,
	seen: Mutex<Vec<GenerateCall>>,
}
impl FakeGenerator {
	pub fn new(answer: &str) -> Self {
		Self { script: Script::new(Reply::Ok(generate_response(answer))), seen: Mutex::new(Vec::new()) }
	}

	pub fn seen(&self) -> Vec<GenerateCall> {
		lock(&self.seen).clone()
	}
}

impl Generator for FakeGenerator {
	fn generate<'a>(
		&'a self,
		_request_id: &'a str,
		_query: &'a str,
		context: &'a [Candidate],
		_roles: &'a RoleSet,
		escalate: bool,
	) -> BoxFuture<'a, ProviderResult<GenerateResponse>> {
		lock(&self.seen).push(GenerateCall {
			chunk_ids: context.iter().map(|candidate| candidate.chunk_id.clone()).collect(),
			escalate,
		});

		self.script.next()
	}
}

pub fn generate_response(answer: &str) -> GenerateResponse {
	GenerateResponse {
		answer: answer.to_string(),
		token_usage: TokenUsage { prompt_tokens: 100, completion_tokens: 20, total_tokens: 120 },
		model_used: Some("fake".to_string()),
	}
}

/// Keeps every record in memory; optionally fails each write after storing it.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
	records: Mutex<Vec<AuditRecord>>,
	fail: bool,
}
impl RecordingAuditSink {
	pub fn failing() -> Self {
		Self { records: Mutex::new(Vec::new()), fail: true }
	}

	pub fn records(&self) -> Vec<AuditRecord> {
		lock(&self.records).clone()
	}
}

impl AuditSink for RecordingAuditSink {
	fn record<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
		lock(&self.records).push(record.clone());

		let fail = self.fail;

		Box::pin(async move {
			if fail {
				return Err(AuditError::Sink { message: "Audit store unavailable.".to_string() });
			}

			Ok(())
		})
	}
}

/// Fake dependencies wired into an orchestrator built from the sample configuration.
pub struct Harness {
	pub config: copilot_config::Config,
	pub optimizer: Arc<FakeOptimizer>,
	pub searcher: Arc<FakeSearcher>,
	pub reranker: Arc<FakeReranker>,
	pub generator: Arc<FakeGenerator>,
	pub audit: Arc<RecordingAuditSink>,
	pub metrics: Arc<ServiceMetrics>,
}
impl Harness {
	pub fn new(confidence: f32, candidates: Vec<Candidate>) -> Result<Self> {
		let mut config = sample_config()?;

		fast_retries(&mut config);

		Ok(Self {
			config,
			optimizer: Arc::new(FakeOptimizer::new(confidence, &["expanded query", "alternate"])),
			searcher: Arc::new(FakeSearcher::new(candidates)),
			reranker: Arc::new(FakeReranker::new(RerankMode::Reverse)),
			generator: Arc::new(FakeGenerator::new("Generated answer.")),
			audit: Arc::new(RecordingAuditSink::default()),
			metrics: Arc::new(ServiceMetrics::new()),
		})
	}

	pub fn with_audit(mut self, audit: RecordingAuditSink) -> Self {
		self.audit = Arc::new(audit);

		self
	}

	pub fn providers(&self) -> Providers {
		Providers {
			optimizer: self.optimizer.clone(),
			searcher: self.searcher.clone(),
			reranker: self.reranker.clone(),
			generator: self.generator.clone(),
		}
	}

	/// A fresh orchestrator; breakers and cache are not shared with earlier calls.
	pub fn orchestrator(&self) -> Orchestrator {
		Orchestrator::from_config(
			&self.config,
			self.providers(),
			self.audit.clone(),
			self.metrics.clone(),
		)
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
