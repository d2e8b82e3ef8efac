mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Audit, AuditEndpoint, Breaker, Cache, Config, DependencyConfig, Dependencies, Escalation, Gate,
	Retrieval, Retry, Service, default_retryable_statuses,
};

use std::{fs, path::Path};

/// Role tags accepted in `gate.role_thresholds`.
pub const ROLE_NAMES: [&str; 5] = ["Admin", "HR", "Engineering", "Finance", "Operations"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in
		[("service.http_bind", &cfg.service.http_bind), ("service.admin_bind", &cfg.service.admin_bind)]
	{
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if cfg.service.request_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "service.request_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.service.max_query_chars == 0 {
		return Err(Error::Validation {
			message: "service.max_query_chars must be greater than zero.".to_string(),
		});
	}

	validate_unit_interval("gate.confidence_threshold", cfg.gate.confidence_threshold)?;

	for (role, threshold) in &cfg.gate.role_thresholds {
		if !ROLE_NAMES.contains(&role.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"gate.role_thresholds key {role} must be one of Admin, HR, Engineering, Finance, or Operations."
				),
			});
		}

		validate_unit_interval(&format!("gate.role_thresholds.{role}"), *threshold)?;
	}

	validate_unit_interval("escalation.min_confidence", cfg.escalation.min_confidence)?;

	if cfg.escalation.max_context_chars == 0 {
		return Err(Error::Validation {
			message: "escalation.max_context_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.max_context_candidates == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_context_candidates must be greater than zero.".to_string(),
		});
	}
	if !(1..=100).contains(&cfg.retrieval.top_k) {
		return Err(Error::Validation {
			message: "retrieval.top_k must be in the range 1-100.".to_string(),
		});
	}

	for (label, ttl) in [
		("cache.optimize_ttl_seconds", cfg.cache.optimize_ttl_seconds),
		("cache.search_ttl_seconds", cfg.cache.search_ttl_seconds),
		("cache.generate_ttl_seconds", cfg.cache.generate_ttl_seconds),
		("cache.purge_interval_seconds", cfg.cache.purge_interval_seconds),
	] {
		if ttl == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.cache.max_entries == 0 {
		return Err(Error::Validation {
			message: "cache.max_entries must be greater than zero.".to_string(),
		});
	}

	for (label, dependency) in [
		("optimizer", &cfg.dependencies.optimizer),
		("search", &cfg.dependencies.search),
		("rerank", &cfg.dependencies.rerank),
		("generator_slm", &cfg.dependencies.generator_slm),
		("generator_llm", &cfg.dependencies.generator_llm),
	] {
		validate_dependency(label, dependency)?;
	}

	match cfg.audit.sink.as_str() {
		"log" => {},
		"http" => {
			let Some(endpoint) = cfg.audit.endpoint.as_ref() else {
				return Err(Error::Validation {
					message: "audit.endpoint is required when audit.sink is http.".to_string(),
				});
			};

			if endpoint.api_base.trim().is_empty() {
				return Err(Error::Validation {
					message: "audit.endpoint.api_base must be non-empty.".to_string(),
				});
			}
		},
		_ => {
			return Err(Error::Validation {
				message: "audit.sink must be one of log or http.".to_string(),
			});
		},
	}

	if cfg.audit.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "audit.timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_dependency(label: &str, dependency: &DependencyConfig) -> Result<()> {
	if dependency.api_base.trim().is_empty() {
		return Err(Error::Validation {
			message: format!("dependencies.{label}.api_base must be non-empty."),
		});
	}
	if dependency.timeout_ms == 0 {
		return Err(Error::Validation {
			message: format!("dependencies.{label}.timeout_ms must be greater than zero."),
		});
	}
	if dependency.retry.max_attempts == 0 {
		return Err(Error::Validation {
			message: format!("dependencies.{label}.retry.max_attempts must be greater than zero."),
		});
	}
	if dependency.retry.base_delay_ms > dependency.retry.max_delay_ms {
		return Err(Error::Validation {
			message: format!(
				"dependencies.{label}.retry.base_delay_ms must not exceed retry.max_delay_ms."
			),
		});
	}
	if let Some(status) =
		dependency.retry.retryable_statuses.iter().find(|status| !(400..=599).contains(*status))
	{
		return Err(Error::Validation {
			message: format!(
				"dependencies.{label}.retry.retryable_statuses contains {status}, which is not an HTTP error status."
			),
		});
	}
	if dependency.breaker.failure_threshold == 0 {
		return Err(Error::Validation {
			message: format!(
				"dependencies.{label}.breaker.failure_threshold must be greater than zero."
			),
		});
	}
	if dependency.breaker.window_ms == 0 || dependency.breaker.open_ms == 0 {
		return Err(Error::Validation {
			message: format!(
				"dependencies.{label}.breaker.window_ms and breaker.open_ms must be greater than zero."
			),
		});
	}

	Ok(())
}

fn validate_unit_interval(label: &str, value: f32) -> Result<()> {
	if !value.is_finite() {
		return Err(Error::Validation { message: format!("{label} must be a finite number.") });
	}
	if !(0.0..=1.0).contains(&value) {
		return Err(Error::Validation {
			message: format!("{label} must be in the range 0.0-1.0."),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.audit.sink = cfg.audit.sink.trim().to_ascii_lowercase();

	for dependency in [
		&mut cfg.dependencies.optimizer,
		&mut cfg.dependencies.search,
		&mut cfg.dependencies.rerank,
		&mut cfg.dependencies.generator_slm,
		&mut cfg.dependencies.generator_llm,
	] {
		if dependency.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
			dependency.api_key = None;
		}
	}

	if let Some(endpoint) = cfg.audit.endpoint.as_mut()
		&& endpoint.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false)
	{
		endpoint.api_key = None;
	}
}
