use serde_json::Value;

use crate::{Endpoint, Error, Result};
use copilot_domain::Candidate;

/// Scores `candidates` against `query` and returns them ordered by relevance, highest first.
pub async fn rerank(
	cfg: &copilot_config::DependencyConfig,
	request_id: &str,
	query: &str,
	candidates: &[Candidate],
) -> Result<Vec<Candidate>> {
	if candidates.is_empty() {
		return Ok(Vec::new());
	}

	let docs: Vec<&str> = candidates.iter().map(|candidate| candidate.content.as_str()).collect();
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let json = crate::post_json(&Endpoint::dependency(cfg), request_id, &body).await?;
	let scores = parse_rerank_response(json, candidates.len())?;

	Ok(apply_scores(candidates, &scores))
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let mut scores = vec![f32::NEG_INFINITY; doc_count];
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Rerank response is missing results array."))?;

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing index."))?
			as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::invalid_response("Rerank result missing score."))?
			as f32;

		if index < scores.len() {
			scores[index] = score;
		}
	}

	Ok(scores)
}

/// Candidates the reranker left unscored keep their relative order at the tail.
fn apply_scores(candidates: &[Candidate], scores: &[f32]) -> Vec<Candidate> {
	let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();

	indexed.sort_by(|(ia, a), (ib, b)| b.total_cmp(a).then(ia.cmp(ib)));

	indexed
		.into_iter()
		.map(|(index, score)| {
			let mut candidate = candidates[index].clone();

			if score.is_finite() {
				candidate.score = score;
			}

			candidate
		})
		.collect()
}
