use std::collections::BTreeSet;

use copilot_domain::{
	Candidate, GateDecision, Pipeline, PipelineState, Role, RoleSet, RoutingDecision, decide,
	filter,
};

fn candidate(id: usize, roles: &[Role]) -> Candidate {
	Candidate {
		chunk_id: format!("chunk-{id}"),
		document_id: format!("doc-{}", id % 3),
		title: Some(format!("Document {id}")),
		content: format!("content for chunk {id}"),
		score: 1.0 - id as f32 * 0.01,
		access_roles: roles.iter().copied().collect::<BTreeSet<_>>(),
	}
}

/// Every non-empty subset of the five roles, encoded as bitmasks 1..32.
fn role_subsets() -> Vec<Vec<Role>> {
	(1_u32..32)
		.map(|mask| {
			Role::ALL
				.iter()
				.enumerate()
				.filter(|(bit, _)| mask & (1 << *bit) != 0)
				.map(|(_, role)| *role)
				.collect()
		})
		.collect()
}

#[test]
fn gate_proceeds_iff_confidence_reaches_threshold() {
	let steps: Vec<f32> = (0..=20).map(|step| step as f32 / 20.0).collect();

	for &confidence in &steps {
		for &threshold in &steps {
			let expected =
				if confidence >= threshold { GateDecision::Proceed } else { GateDecision::Clarify };

			assert_eq!(decide(confidence, threshold), expected, "c={confidence} t={threshold}");
		}
	}

	assert_eq!(decide(0.6, 0.6), GateDecision::Proceed);
	assert_eq!(decide(f32::NAN, 0.0), GateDecision::Clarify);
}

#[test]
fn filter_is_an_order_preserving_intersecting_subset() {
	let subsets = role_subsets();
	let candidates: Vec<Candidate> = subsets
		.iter()
		.enumerate()
		.map(|(id, roles)| candidate(id, roles))
		.chain(std::iter::once(candidate(99, &[])))
		.collect();

	for roles in &subsets {
		let caller = RoleSet::new(roles.iter().copied()).expect("Subset must be non-empty.");
		let out = filter(candidates.clone(), &caller);
		let mut cursor = candidates.iter();

		for survivor in &out {
			assert!(caller.intersects(&survivor.access_roles));
			// Subsequence check: each survivor appears later in the input than the previous one.
			assert!(cursor.any(|original| original == survivor));
		}

		let expected = candidates
			.iter()
			.filter(|candidate| roles.iter().any(|role| candidate.access_roles.contains(role)))
			.count();

		assert_eq!(out.len(), expected);
	}
}

#[test]
fn filter_with_disjoint_roles_is_empty() {
	let candidates = vec![
		candidate(0, &[Role::Engineering]),
		candidate(1, &[Role::Engineering, Role::Operations]),
	];
	let caller = RoleSet::new([Role::Hr, Role::Finance]).expect("Role set must be non-empty.");

	assert!(filter(candidates, &caller).is_empty());
}

#[test]
fn recorded_failure_trace_replays_to_failed() {
	let mut pipeline = Pipeline::new();

	pipeline.advance(PipelineState::Optimizing).expect("Transition must be legal.");
	pipeline.advance(PipelineState::GateEvaluated).expect("Transition must be legal.");
	pipeline.record(RoutingDecision::Gate {
		confidence: 0.9,
		threshold: 0.6,
		outcome: GateDecision::Proceed,
	});
	pipeline.advance(PipelineState::Retrieving).expect("Transition must be legal.");
	pipeline.advance(PipelineState::Failed).expect("Transition must be legal.");

	let trace = pipeline.into_trace();
	let encoded = serde_json::to_string(&trace).expect("Failed to encode trace.");
	let decoded: Vec<RoutingDecision> =
		serde_json::from_str(&encoded).expect("Failed to decode trace.");

	assert_eq!(Pipeline::replay(&decoded), Ok(PipelineState::Failed));
}

#[test]
fn tampered_trace_is_rejected() {
	let trace = vec![
		RoutingDecision::Transition { from: PipelineState::Received, to: PipelineState::Optimizing },
		RoutingDecision::Transition {
			from: PipelineState::GateEvaluated,
			to: PipelineState::Retrieving,
		},
	];

	assert!(Pipeline::replay(&trace).is_err());
}
