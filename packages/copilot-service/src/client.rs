use std::{fmt, future::Future, sync::Arc, time::Duration};

use backoff::{ExponentialBackoff, backoff::Backoff};
use serde::Serialize;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
	Error, Result,
	breaker::{BreakerPolicy, CircuitBreaker},
	metrics::{AttemptOutcome, MetricsSink},
};
use copilot_domain::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyId {
	Optimizer,
	Search,
	Rerank,
	GeneratorSlm,
	GeneratorLlm,
}
impl DependencyId {
	pub const ALL: [DependencyId; 5] =
		[Self::Optimizer, Self::Search, Self::Rerank, Self::GeneratorSlm, Self::GeneratorLlm];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Optimizer => "optimizer",
			Self::Search => "search",
			Self::Rerank => "rerank",
			Self::GeneratorSlm => "generator_slm",
			Self::GeneratorLlm => "generator_llm",
		}
	}

	pub fn stage(self) -> Stage {
		match self {
			Self::Optimizer => Stage::Optimize,
			Self::Search => Stage::Retrieve,
			Self::Rerank => Stage::Rerank,
			Self::GeneratorSlm | Self::GeneratorLlm => Stage::Generate,
		}
	}

	pub fn config(self, deps: &copilot_config::Dependencies) -> &copilot_config::DependencyConfig {
		match self {
			Self::Optimizer => &deps.optimizer,
			Self::Search => &deps.search,
			Self::Rerank => &deps.rerank,
			Self::GeneratorSlm => &deps.generator_slm,
			Self::GeneratorLlm => &deps.generator_llm,
		}
	}
}

impl fmt::Display for DependencyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub retryable_statuses: Vec<u16>,
}
impl RetryPolicy {
	/// Deterministic doubling schedule starting at `base_delay`, capped at `max_delay`.
	///
	/// Attempts are bounded by `max_attempts`, never by elapsed time.
	pub fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			current_interval: self.base_delay,
			initial_interval: self.base_delay,
			max_interval: self.max_delay,
			multiplier: 2.0,
			randomization_factor: 0.0,
			max_elapsed_time: None,
			..ExponentialBackoff::default()
		}
	}

	fn is_retryable_status(&self, status: u16) -> bool {
		self.retryable_statuses.contains(&status)
	}
}

impl From<&copilot_config::Retry> for RetryPolicy {
	fn from(cfg: &copilot_config::Retry) -> Self {
		Self {
			max_attempts: cfg.max_attempts,
			base_delay: Duration::from_millis(cfg.base_delay_ms),
			max_delay: Duration::from_millis(cfg.max_delay_ms),
			retryable_statuses: cfg.retryable_statuses.clone(),
		}
	}
}

/// Resilience wrapper around one downstream dependency: breaker admission, per-attempt timeout,
/// retry with exponential backoff and error mapping.
pub struct ServiceClient {
	dependency: DependencyId,
	timeout: Duration,
	retry: RetryPolicy,
	breaker: Arc<CircuitBreaker>,
	metrics: Arc<dyn MetricsSink>,
}
impl ServiceClient {
	pub fn new(
		dependency: DependencyId,
		timeout: Duration,
		retry: RetryPolicy,
		breaker: Arc<CircuitBreaker>,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		Self { dependency, timeout, retry, breaker, metrics }
	}

	pub fn from_config(
		dependency: DependencyId,
		cfg: &copilot_config::DependencyConfig,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		let breaker =
			Arc::new(CircuitBreaker::new(dependency.as_str(), BreakerPolicy::from(&cfg.breaker)));

		Self::new(
			dependency,
			Duration::from_millis(cfg.timeout_ms),
			RetryPolicy::from(&cfg.retry),
			breaker,
			metrics,
		)
	}

	pub fn dependency(&self) -> DependencyId {
		self.dependency
	}

	pub fn breaker(&self) -> &Arc<CircuitBreaker> {
		&self.breaker
	}

	/// Runs `op` under the dependency's resilience policy.
	///
	/// The breaker is consulted before every attempt, so a circuit that opens mid-retry stops
	/// the remaining attempts without touching the network. Once `cancel` fires no new attempt
	/// starts and a pending backoff ends early; an attempt already in flight runs to completion.
	pub async fn call<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = copilot_providers::Result<T>>,
	{
		let mut backoff = self.retry.backoff();
		let mut attempt = 0_u32;

		loop {
			attempt += 1;

			if cancel.is_cancelled() {
				return Err(self.cancelled(attempt));
			}

			let Ok(permit) = self.breaker.try_acquire() else {
				self.metrics.record_short_circuit(self.dependency);

				return Err(Error::CircuitOpen { dependency: self.dependency });
			};
			let started = Instant::now();
			let result = time::timeout(self.timeout, op()).await;
			let latency = started.elapsed();
			let failure = match result {
				Ok(Ok(value)) => {
					permit.success();
					self.record(attempt, AttemptOutcome::Success, latency);

					return Ok(value);
				},
				Ok(Err(err)) => self.classify(err, attempt),
				Err(_) => Failure::Transient(Error::Timeout {
					dependency: self.dependency,
					attempts: attempt,
				}),
			};

			match failure {
				Failure::Transient(err) => {
					permit.failure();

					let outcome = match err {
						Error::Timeout { .. } => AttemptOutcome::Timeout,
						_ => AttemptOutcome::Failure,
					};

					self.record(attempt, outcome, latency);

					if attempt >= self.retry.max_attempts {
						return Err(err);
					}

					let delay = backoff.next_backoff().unwrap_or(self.retry.max_delay);

					tracing::warn!(
						dependency = self.dependency.as_str(),
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %err,
						"Dependency attempt failed; retrying."
					);

					tokio::select! {
						_ = cancel.cancelled() => return Err(self.cancelled(attempt + 1)),
						_ = time::sleep(delay) => {},
					}
				},
				Failure::Malformed(err) => {
					permit.failure();
					self.record(attempt, AttemptOutcome::Failure, latency);

					return Err(err);
				},
				Failure::Rejected(err) => {
					// The dependency answered; a client-side rejection is not a health signal.
					permit.success();
					self.record(attempt, AttemptOutcome::Rejected, latency);

					return Err(err);
				},
				Failure::Local(err) => {
					drop(permit);

					return Err(err);
				},
			}
		}
	}

	fn classify(&self, err: copilot_providers::Error, attempt: u32) -> Failure {
		use copilot_providers::Error as ProviderError;

		let dependency = self.dependency;

		match err {
			ProviderError::Timeout => Failure::Transient(Error::Timeout { dependency, attempts: attempt }),
			ProviderError::Transport { message } =>
				Failure::Transient(Error::Unavailable { dependency, attempts: attempt, message }),
			ProviderError::Status { status } if self.retry.is_retryable_status(status) =>
				Failure::Transient(Error::Unavailable {
					dependency,
					attempts: attempt,
					message: format!("status {status}"),
				}),
			ProviderError::Status { status } => Failure::Rejected(Error::Rejected {
				dependency,
				status: Some(status),
				message: format!("status {status}"),
			}),
			ProviderError::SerdeJson(err) =>
				Failure::Malformed(Error::InvalidResponse { dependency, message: err.to_string() }),
			ProviderError::InvalidResponse { message } =>
				Failure::Malformed(Error::InvalidResponse { dependency, message }),
			err @ (ProviderError::InvalidConfig { .. }
			| ProviderError::InvalidHeaderName(_)
			| ProviderError::InvalidHeaderValue(_)) =>
				Failure::Local(Error::Rejected { dependency, status: None, message: err.to_string() }),
		}
	}

	fn cancelled(&self, attempt: u32) -> Error {
		tracing::debug!(
			dependency = self.dependency.as_str(),
			attempt,
			"Dependency call abandoned before the attempt started."
		);

		Error::Cancelled { dependency: self.dependency }
	}

	fn record(&self, attempt: u32, outcome: AttemptOutcome, latency: Duration) {
		self.metrics.record_attempt(self.dependency, attempt, outcome, latency);
	}
}

enum Failure {
	/// Timeout, transport failure or retryable status; counts against the breaker and retries.
	Transient(Error),
	/// Unusable body; counts against the breaker, not retried.
	Malformed(Error),
	/// Non-retryable status.
	Rejected(Error),
	/// Failed before reaching the dependency.
	Local(Error),
}
