pub mod audit;
pub mod error;
pub mod generate;
pub mod optimize;
pub mod rerank;
pub mod search;

pub use error::{Error, Result};

use std::time::Duration as StdDuration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::{Map, Value};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Resolved target for one JSON POST.
#[derive(Debug, Clone)]
pub struct Endpoint<'a> {
	pub url: String,
	pub api_key: Option<&'a str>,
	pub default_headers: &'a Map<String, Value>,
	pub timeout: StdDuration,
}
impl<'a> Endpoint<'a> {
	pub fn dependency(cfg: &'a copilot_config::DependencyConfig) -> Self {
		Self {
			url: format!("{}{}", cfg.api_base, cfg.path),
			api_key: cfg.api_key.as_deref(),
			default_headers: &cfg.default_headers,
			timeout: StdDuration::from_millis(cfg.timeout_ms),
		}
	}

	pub fn audit(cfg: &'a copilot_config::AuditEndpoint, timeout_ms: u64) -> Self {
		Self {
			url: format!("{}{}", cfg.api_base, cfg.path),
			api_key: cfg.api_key.as_deref(),
			default_headers: &cfg.default_headers,
			timeout: StdDuration::from_millis(timeout_ms),
		}
	}
}

pub fn auth_headers(
	api_key: Option<&str>,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(api_key) = api_key {
		headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

pub(crate) async fn post_json(endpoint: &Endpoint<'_>, request_id: &str, body: &Value) -> Result<Value> {
	let client = Client::builder().timeout(endpoint.timeout).build()?;
	let mut headers = auth_headers(endpoint.api_key, endpoint.default_headers)?;

	headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(request_id)?);

	let res = client.post(&endpoint.url).headers(headers).json(body).send().await?;
	let status = res.status();

	if !status.is_success() {
		return Err(Error::Status { status: status.as_u16() });
	}

	let bytes = res.bytes().await?;

	if bytes.is_empty() {
		return Ok(Value::Null);
	}

	Ok(serde_json::from_slice(&bytes)?)
}
