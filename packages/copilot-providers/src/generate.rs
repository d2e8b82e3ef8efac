use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Endpoint, Result};
use copilot_domain::{Candidate, RoleSet, TokenUsage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
	pub answer: String,
	#[serde(default)]
	pub token_usage: TokenUsage,
	#[serde(default)]
	pub model_used: Option<String>,
}

pub async fn generate(
	cfg: &copilot_config::DependencyConfig,
	request_id: &str,
	query: &str,
	context: &[Candidate],
	roles: &RoleSet,
	use_llm: bool,
) -> Result<GenerateResponse> {
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"context_documents": context_documents(context),
		"user_role": roles.label(),
		"use_llm": use_llm,
	});
	let json = crate::post_json(&Endpoint::dependency(cfg), request_id, &body).await?;

	Ok(serde_json::from_value(json)?)
}

fn context_documents(context: &[Candidate]) -> Vec<Value> {
	context
		.iter()
		.map(|candidate| {
			serde_json::json!({
				"id": candidate.chunk_id,
				"document_id": candidate.document_id,
				"title": candidate.title,
				"content": candidate.content,
				"score": candidate.score,
			})
		})
		.collect()
}
