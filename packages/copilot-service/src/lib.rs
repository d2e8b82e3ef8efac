pub mod audit;
pub mod breaker;
pub mod cache;
pub mod client;
pub mod error;
pub mod metrics;
pub mod orchestrator;

pub use audit::{AuditError, HttpAuditSink, LogAuditSink};
pub use breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use cache::{CacheManager, CacheNamespace, CacheTags};
pub use client::{DependencyId, RetryPolicy, ServiceClient};
pub use error::{Error, Result};
pub use metrics::{MetricsSink, MetricsSnapshot, ServiceMetrics};
pub use orchestrator::{Clients, Orchestrator, OrchestratorSettings};

use std::{future::Future, pin::Pin, sync::Arc};

use copilot_domain::{AuditRecord, Candidate, RoleSet};
use copilot_providers::{
	generate::{self, GenerateResponse},
	optimize::{self, OptimizeResponse},
	rerank, search,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ProviderResult<T> = copilot_providers::Result<T>;

pub trait Optimizer
where
	Self: Send + Sync,
{
	fn optimize<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		roles: &'a RoleSet,
	) -> BoxFuture<'a, ProviderResult<OptimizeResponse>>;
}

pub trait Searcher
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		request_id: &'a str,
		queries: &'a [String],
		roles: &'a RoleSet,
		top_k: u32,
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>>;
}

pub trait Reranker
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		candidates: &'a [Candidate],
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>>;
}

pub trait Generator
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		context: &'a [Candidate],
		roles: &'a RoleSet,
		escalate: bool,
	) -> BoxFuture<'a, ProviderResult<GenerateResponse>>;
}

pub trait AuditSink
where
	Self: Send + Sync,
{
	fn record<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>>;
}

#[derive(Clone)]
pub struct Providers {
	pub optimizer: Arc<dyn Optimizer>,
	pub searcher: Arc<dyn Searcher>,
	pub reranker: Arc<dyn Reranker>,
	pub generator: Arc<dyn Generator>,
}
impl Providers {
	/// HTTP-backed providers for every dependency in `cfg`.
	pub fn http(cfg: &copilot_config::Dependencies) -> Self {
		let providers = Arc::new(HttpProviders { cfg: cfg.clone() });

		Self {
			optimizer: providers.clone(),
			searcher: providers.clone(),
			reranker: providers.clone(),
			generator: providers,
		}
	}
}

struct HttpProviders {
	cfg: copilot_config::Dependencies,
}

impl Optimizer for HttpProviders {
	fn optimize<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		roles: &'a RoleSet,
	) -> BoxFuture<'a, ProviderResult<OptimizeResponse>> {
		Box::pin(optimize::optimize(&self.cfg.optimizer, request_id, query, roles))
	}
}

impl Searcher for HttpProviders {
	fn search<'a>(
		&'a self,
		request_id: &'a str,
		queries: &'a [String],
		roles: &'a RoleSet,
		top_k: u32,
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>> {
		Box::pin(search::search(&self.cfg.search, request_id, queries, roles, top_k))
	}
}

impl Reranker for HttpProviders {
	fn rerank<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		candidates: &'a [Candidate],
	) -> BoxFuture<'a, ProviderResult<Vec<Candidate>>> {
		Box::pin(rerank::rerank(&self.cfg.rerank, request_id, query, candidates))
	}
}

impl Generator for HttpProviders {
	fn generate<'a>(
		&'a self,
		request_id: &'a str,
		query: &'a str,
		context: &'a [Candidate],
		roles: &'a RoleSet,
		escalate: bool,
	) -> BoxFuture<'a, ProviderResult<GenerateResponse>> {
		let cfg = if escalate { &self.cfg.generator_llm } else { &self.cfg.generator_slm };

		Box::pin(generate::generate(cfg, request_id, query, context, roles, escalate))
	}
}
