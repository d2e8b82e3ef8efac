use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use copilot_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_value() -> Value {
	toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.")
}

fn table_mut<'a>(value: &'a mut Value, path: &[&str]) -> &'a mut toml::Table {
	let mut current = value.as_table_mut().expect("Sample config must be a table.");

	for key in path {
		current = current
			.get_mut(*key)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Sample config must include [{key}]."));
	}

	current
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("copilot_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_value(value: Value) -> copilot_config::Result<Config> {
	let payload = toml::to_string(&value).expect("Failed to render test config.");
	let path = write_temp_config(payload);
	let result = copilot_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn expect_validation_message(value: Value, expected: &str) {
	let err = load_value(value).expect_err("Expected validation error.");

	assert!(matches!(err, Error::Validation { .. }), "Unexpected error kind: {err:?}");

	let message = err.to_string();

	assert!(message.contains(expected), "Unexpected error message: {message}");
}

#[test]
fn sample_config_loads() {
	let cfg = load_value(sample_value()).expect("Sample config must load.");

	assert_eq!(cfg.gate.confidence_threshold, 0.6);
	assert_eq!(cfg.gate.role_thresholds.get("Engineering"), Some(&0.55));
	assert_eq!(cfg.dependencies.search.retry.retryable_statuses, vec![408, 429, 500, 502, 503, 504]);
	assert_eq!(cfg.audit.sink, "log");
}

#[test]
fn blank_api_keys_are_dropped() {
	let cfg = load_value(sample_value()).expect("Sample config must load.");

	assert!(cfg.dependencies.generator_llm.api_key.is_none());
}

#[test]
fn audit_sink_is_case_insensitive() {
	let mut value = sample_value();

	table_mut(&mut value, &["audit"]).insert("sink".to_string(), Value::String(" LOG ".into()));

	let cfg = load_value(value).expect("Upper-case sink must load.");

	assert_eq!(cfg.audit.sink, "log");
}

#[test]
fn confidence_threshold_must_be_unit_interval() {
	let mut value = sample_value();

	table_mut(&mut value, &["gate"]).insert("confidence_threshold".to_string(), Value::Float(1.5));

	expect_validation_message(value, "gate.confidence_threshold must be in the range 0.0-1.0.");
}

#[test]
fn role_thresholds_reject_unknown_roles() {
	let mut value = sample_value();

	table_mut(&mut value, &["gate", "role_thresholds"])
		.insert("Marketing".to_string(), Value::Float(0.5));

	expect_validation_message(value, "gate.role_thresholds key Marketing must be one of");
}

#[test]
fn http_audit_requires_endpoint() {
	let mut value = sample_value();

	table_mut(&mut value, &["audit"]).insert("sink".to_string(), Value::String("http".into()));

	expect_validation_message(value, "audit.endpoint is required when audit.sink is http.");
}

#[test]
fn retry_delays_must_be_ordered() {
	let mut value = sample_value();

	table_mut(&mut value, &["dependencies", "search", "retry"])
		.insert("base_delay_ms".to_string(), Value::Integer(60_000));

	expect_validation_message(
		value,
		"dependencies.search.retry.base_delay_ms must not exceed retry.max_delay_ms.",
	);
}

#[test]
fn retryable_statuses_must_be_errors() {
	let mut value = sample_value();

	table_mut(&mut value, &["dependencies", "rerank", "retry"]).insert(
		"retryable_statuses".to_string(),
		Value::Array(vec![Value::Integer(503), Value::Integer(200)]),
	);

	expect_validation_message(value, "contains 200, which is not an HTTP error status.");
}

#[test]
fn breaker_threshold_must_be_positive() {
	let mut value = sample_value();

	table_mut(&mut value, &["dependencies", "optimizer", "breaker"])
		.insert("failure_threshold".to_string(), Value::Integer(0));

	expect_validation_message(
		value,
		"dependencies.optimizer.breaker.failure_threshold must be greater than zero.",
	);
}
