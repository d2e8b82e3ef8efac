use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Endpoint, Result};
use copilot_domain::RoleSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResponse {
	pub optimized_queries: Vec<String>,
	pub confidence: f32,
	#[serde(default)]
	pub keywords: Vec<String>,
}

pub async fn optimize(
	cfg: &copilot_config::DependencyConfig,
	request_id: &str,
	query: &str,
	roles: &RoleSet,
) -> Result<OptimizeResponse> {
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"user_context": format!("User roles: {}", roles.label()),
	});
	let json = crate::post_json(&Endpoint::dependency(cfg), request_id, &body).await?;

	parse_optimize_response(json)
}

fn parse_optimize_response(json: Value) -> Result<OptimizeResponse> {
	let response: OptimizeResponse = serde_json::from_value(json)?;

	if !response.confidence.is_finite() {
		return Err(crate::Error::invalid_response("Optimizer confidence is not a finite number."));
	}

	Ok(response)
}
