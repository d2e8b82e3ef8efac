use std::collections::HashSet;

use crate::{candidate::Candidate, identity::RoleSet};

pub fn is_permitted(candidate: &Candidate, roles: &RoleSet) -> bool {
	roles.intersects(&candidate.access_roles)
}

/// Keeps the candidates whose access roles intersect `roles`, preserving input order.
///
/// Candidates without any access role are never visible.
pub fn filter(candidates: Vec<Candidate>, roles: &RoleSet) -> Vec<Candidate> {
	candidates.into_iter().filter(|candidate| is_permitted(candidate, roles)).collect()
}

/// Reorders `permitted` to follow `order` (chunk ids), dropping repeated ids. Permitted
/// candidates missing from `order` are left out, matching a reranker that trims its input.
///
/// Returns `None` when `order` names a chunk outside the permitted set, so a reordering
/// stage can never introduce content the caller cannot access.
pub fn reconcile_order(permitted: &[Candidate], order: &[String]) -> Option<Vec<Candidate>> {
	let mut seen = HashSet::with_capacity(order.len());
	let mut out = Vec::with_capacity(order.len());

	for chunk_id in order {
		let candidate = permitted.iter().find(|candidate| &candidate.chunk_id == chunk_id)?;

		if seen.insert(chunk_id.as_str()) {
			out.push(candidate.clone());
		}
	}

	Some(out)
}
