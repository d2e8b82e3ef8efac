use std::{
	collections::VecDeque,
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerPolicy {
	pub failure_threshold: u32,
	pub window: Duration,
	pub open_for: Duration,
}
impl From<&copilot_config::Breaker> for BreakerPolicy {
	fn from(cfg: &copilot_config::Breaker) -> Self {
		Self {
			failure_threshold: cfg.failure_threshold,
			window: Duration::from_millis(cfg.window_ms),
			open_for: Duration::from_millis(cfg.open_ms),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct CircuitSnapshot {
	pub state: CircuitState,
	pub failure_count: u32,
	#[serde(with = "copilot_domain::time_serde::option")]
	pub last_failure_at: Option<OffsetDateTime>,
	#[serde(with = "copilot_domain::time_serde::option")]
	pub open_until: Option<OffsetDateTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Circuit is open.")]
pub struct CircuitOpen;

/// Per-dependency breaker. All transitions happen under one short lock.
#[derive(Debug)]
pub struct CircuitBreaker {
	name: &'static str,
	policy: BreakerPolicy,
	inner: Mutex<Inner>,
}
impl CircuitBreaker {
	pub fn new(name: &'static str, policy: BreakerPolicy) -> Self {
		Self {
			name,
			policy,
			inner: Mutex::new(Inner {
				state: CircuitState::Closed,
				failures: VecDeque::new(),
				last_failure_at: None,
				open_until: None,
				trial_in_flight: false,
			}),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn policy(&self) -> BreakerPolicy {
		self.policy
	}

	/// Admits a call or short-circuits it.
	///
	/// Once the open period has elapsed the first caller becomes the half-open trial; everyone
	/// else is rejected until that trial settles.
	pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
		let now = Instant::now();
		let mut inner = self.lock();

		match inner.state {
			CircuitState::Closed => Ok(Permit::new(self, false)),
			CircuitState::Open => {
				if inner.open_until.is_some_and(|until| now < until) {
					return Err(CircuitOpen);
				}

				inner.state = CircuitState::HalfOpen;
				inner.trial_in_flight = true;

				tracing::info!(dependency = self.name, "Circuit half-open; admitting trial call.");

				Ok(Permit::new(self, true))
			},
			CircuitState::HalfOpen => {
				if inner.trial_in_flight {
					return Err(CircuitOpen);
				}

				inner.trial_in_flight = true;

				Ok(Permit::new(self, true))
			},
		}
	}

	pub fn state(&self) -> CircuitState {
		self.lock().state
	}

	pub fn snapshot(&self) -> CircuitSnapshot {
		let now = Instant::now();
		let wall_now = OffsetDateTime::now_utc();
		let mut inner = self.lock();

		inner.evict_stale(now, self.policy.window);

		let open_until = match inner.state {
			CircuitState::Open => inner
				.open_until
				.map(|until| wall_now + until.saturating_duration_since(now)),
			_ => None,
		};

		CircuitSnapshot {
			state: inner.state,
			failure_count: inner.failures.len() as u32,
			last_failure_at: inner.last_failure_at,
			open_until,
		}
	}

	fn on_success(&self, trial: bool) {
		let mut inner = self.lock();

		match inner.state {
			CircuitState::Closed => inner.failures.clear(),
			CircuitState::HalfOpen if trial => {
				inner.state = CircuitState::Closed;
				inner.failures.clear();
				inner.open_until = None;
				inner.trial_in_flight = false;

				tracing::info!(dependency = self.name, "Circuit closed after successful trial.");
			},
			// A call admitted before the circuit opened says nothing about recovery.
			_ => {},
		}
	}

	fn on_failure(&self, trial: bool) {
		let now = Instant::now();
		let mut inner = self.lock();

		inner.last_failure_at = Some(OffsetDateTime::now_utc());

		match inner.state {
			CircuitState::Closed => {
				inner.failures.push_back(now);
				inner.evict_stale(now, self.policy.window);

				if inner.failures.len() as u32 >= self.policy.failure_threshold {
					inner.open(now, self.policy.open_for);

					tracing::warn!(
						dependency = self.name,
						failures = inner.failures.len(),
						open_ms = self.policy.open_for.as_millis() as u64,
						"Circuit opened."
					);
				}
			},
			CircuitState::HalfOpen if trial => {
				inner.failures.push_back(now);
				inner.open(now, self.policy.open_for);

				tracing::warn!(
					dependency = self.name,
					open_ms = self.policy.open_for.as_millis() as u64,
					"Circuit reopened after failed trial."
				);
			},
			_ => {},
		}
	}

	fn on_abandon(&self, trial: bool) {
		if !trial {
			return;
		}

		let mut inner = self.lock();

		if inner.state == CircuitState::HalfOpen {
			inner.trial_in_flight = false;
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|err| err.into_inner())
	}
}

/// Admission for one call. Settle it with [`Permit::success`] or [`Permit::failure`]; dropping
/// it unsettled frees the half-open trial slot without changing state.
#[derive(Debug)]
pub struct Permit<'a> {
	breaker: &'a CircuitBreaker,
	trial: bool,
	settled: bool,
}
impl<'a> Permit<'a> {
	fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
		Self { breaker, trial, settled: false }
	}

	pub fn is_trial(&self) -> bool {
		self.trial
	}

	pub fn success(mut self) {
		self.settled = true;
		self.breaker.on_success(self.trial);
	}

	pub fn failure(mut self) {
		self.settled = true;
		self.breaker.on_failure(self.trial);
	}
}

impl Drop for Permit<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.breaker.on_abandon(self.trial);
		}
	}
}

#[derive(Debug)]
struct Inner {
	state: CircuitState,
	failures: VecDeque<Instant>,
	last_failure_at: Option<OffsetDateTime>,
	open_until: Option<Instant>,
	trial_in_flight: bool,
}
impl Inner {
	fn open(&mut self, now: Instant, open_for: Duration) {
		self.state = CircuitState::Open;
		self.open_until = Some(now + open_for);
		self.trial_in_flight = false;
	}

	fn evict_stale(&mut self, now: Instant, window: Duration) {
		if self.state != CircuitState::Closed {
			return;
		}

		while let Some(oldest) = self.failures.front()
			&& now.saturating_duration_since(*oldest) > window
		{
			self.failures.pop_front();
		}
	}
}
