use std::collections::BTreeSet;

use serde_json::Value;

use crate::{Endpoint, Error, Result};
use copilot_domain::{Candidate, Role, RoleSet};

/// Access tag the knowledge service uses for documents readable by every role.
pub const PUBLIC_ACCESS_TAG: &str = "all";

pub async fn search(
	cfg: &copilot_config::DependencyConfig,
	request_id: &str,
	queries: &[String],
	roles: &RoleSet,
	top_k: u32,
) -> Result<Vec<Candidate>> {
	let roles: Vec<&str> = roles.iter().map(Role::as_str).collect();
	let body = serde_json::json!({ "queries": queries, "roles": roles, "top_k": top_k });
	let json = crate::post_json(&Endpoint::dependency(cfg), request_id, &body).await?;

	parse_search_response(json)
}

fn parse_search_response(json: Value) -> Result<Vec<Candidate>> {
	let results = json
		.get("results")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Search response is missing results array."))?;

	results.iter().map(parse_candidate).collect()
}

fn parse_candidate(item: &Value) -> Result<Candidate> {
	let chunk_id = item
		.get("id")
		.and_then(|v| v.as_str())
		.ok_or_else(|| Error::invalid_response("Search result missing id."))?;
	let content = item
		.get("content")
		.and_then(|v| v.as_str())
		.ok_or_else(|| Error::invalid_response("Search result missing content."))?;
	let score = item
		.get("score")
		.and_then(|v| v.as_f64())
		.ok_or_else(|| Error::invalid_response("Search result missing score."))? as f32;
	let metadata = item.get("metadata");
	let document_id = metadata
		.and_then(|m| m.get("document_id"))
		.or_else(|| item.get("source"))
		.and_then(|v| v.as_str())
		.unwrap_or(chunk_id);
	let title = metadata
		.and_then(|m| m.get("title").or_else(|| m.get("filename")))
		.and_then(|v| v.as_str())
		.map(str::to_string);
	let access_roles = metadata
		.and_then(|m| m.get("access_roles"))
		.and_then(|v| v.as_array())
		.map(|tags| parse_access_roles(tags.iter().filter_map(|tag| tag.as_str())))
		.unwrap_or_default();

	Ok(Candidate {
		chunk_id: chunk_id.to_string(),
		document_id: document_id.to_string(),
		title,
		content: content.to_string(),
		score,
		access_roles,
	})
}

/// Unknown tags are ignored; a candidate with no recognized tag stays invisible.
fn parse_access_roles<'a>(tags: impl Iterator<Item = &'a str>) -> BTreeSet<Role> {
	let mut roles = BTreeSet::new();

	for tag in tags {
		if tag.eq_ignore_ascii_case(PUBLIC_ACCESS_TAG) {
			roles.extend(Role::ALL);
		} else if let Some(role) = Role::parse(tag) {
			roles.insert(role);
		}
	}

	roles
}
