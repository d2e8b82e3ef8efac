use std::{future, time::Duration};

use copilot_domain::{
	AuditDecision, Candidate, FailureKind, GateDecision, GenerationRoute, Outcome, Pipeline,
	PipelineState, Query, Role, RoutingDecision, Stage,
};
use copilot_service::CircuitState;
use copilot_testkit::{
	GenerateCall, Harness, RecordingAuditSink, RerankMode, Reply, candidate, identity,
};

fn mixed_candidates() -> Vec<Candidate> {
	vec![
		candidate("c1", "doc-1", &[Role::Hr, Role::Admin]),
		candidate("c2", "doc-2", &[Role::Hr, Role::Admin]),
		candidate("c3", "doc-3", &[Role::Engineering]),
	]
}

fn hr_query(text: &str) -> Query {
	Query::new(text, identity("u-hr", "HR").expect("Expected a valid identity."))
}

fn harness(confidence: f32) -> Harness {
	Harness::new(confidence, mixed_candidates()).expect("Sample config must load.")
}

fn source_ids(outcome: &Outcome) -> Vec<String> {
	match outcome {
		Outcome::Answered { sources, .. } =>
			sources.iter().map(|source| source.chunk_id.clone()).collect(),
		other => panic!("Expected an answer, got {other:?}."),
	}
}

#[tokio::test]
async fn answers_with_permitted_sources_only() {
	let harness = harness(0.85);
	let orchestrator = harness.orchestrator();
	let outcome = orchestrator.handle(hr_query("What is the vacation policy?"), future::pending()).await;

	assert_eq!(source_ids(&outcome), vec!["c2".to_string(), "c1".to_string()]);
	assert_eq!(
		harness.generator.seen(),
		vec![GenerateCall { chunk_ids: vec!["c2".to_string(), "c1".to_string()], escalate: false }]
	);

	let records = harness.audit.records();

	assert_eq!(records.len(), 1);

	let record = &records[0];

	assert_eq!(record.decision, AuditDecision::Answer);
	assert_eq!(record.stage, Stage::Generate);
	assert!(!record.escalated);
	assert!(record.token_usage.is_some());
	assert!(record.trace.contains(&RoutingDecision::Access { retrieved: 3, permitted: 2 }));
	assert!(record.trace.contains(&RoutingDecision::Rerank { applied: true }));
	assert_eq!(Pipeline::replay(&record.trace), Ok(PipelineState::Completed));
}

#[tokio::test]
async fn low_confidence_requests_clarification_without_retrieval() {
	let harness = harness(0.4);
	let outcome = harness.orchestrator().handle(hr_query("policy?"), future::pending()).await;

	match outcome {
		Outcome::ClarificationRequested { confidence, suggestions, .. } => {
			assert_eq!(confidence, 0.4);
			assert_eq!(suggestions, vec!["expanded query".to_string(), "alternate".to_string()]);
		},
		other => panic!("Expected a clarification, got {other:?}."),
	}

	assert_eq!(harness.searcher.script.calls(), 0);
	assert!(harness.generator.seen().is_empty());

	let records = harness.audit.records();

	assert_eq!(records.len(), 1);
	assert_eq!(records[0].stage, Stage::Optimize);
	assert_eq!(records[0].decision, AuditDecision::Clarify);
	assert_eq!(Pipeline::replay(&records[0].trace), Ok(PipelineState::Clarifying));
}

#[tokio::test]
async fn role_threshold_overrides_the_default() {
	let harness = harness(0.58);
	let orchestrator = harness.orchestrator();
	let engineer = Query::new("build steps", identity("u-eng", "Engineering").expect("Valid."));
	let outcome = orchestrator.handle(engineer, future::pending()).await;

	assert!(matches!(outcome, Outcome::Answered { .. }));

	let outcome = orchestrator.handle(hr_query("build steps"), future::pending()).await;

	assert!(matches!(outcome, Outcome::ClarificationRequested { .. }));

	let gates: Vec<GateDecision> = harness
		.audit
		.records()
		.iter()
		.flat_map(|record| record.trace.clone())
		.filter_map(|decision| match decision {
			RoutingDecision::Gate { outcome, .. } => Some(outcome),
			_ => None,
		})
		.collect();

	assert_eq!(gates, vec![GateDecision::Proceed, GateDecision::Clarify]);
}

#[tokio::test]
async fn engineering_only_candidates_yield_empty_context_for_hr() {
	let harness = Harness::new(0.9, vec![candidate("c3", "doc-3", &[Role::Engineering])])
		.expect("Sample config must load.");
	let outcome = harness.orchestrator().handle(hr_query("roadmap"), future::pending()).await;

	assert!(source_ids(&outcome).is_empty());
	assert_eq!(harness.reranker.calls(), 0);
	assert_eq!(harness.generator.seen()[0].chunk_ids, Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn open_search_circuit_short_circuits_later_requests() {
	let harness = harness(0.85);
	let orchestrator = harness.orchestrator();

	harness.searcher.script.set_fallback(Reply::Status(503));

	// Three attempts, then two more before the fifth failure opens the circuit mid-retry.
	let first = orchestrator.handle(hr_query("q"), future::pending()).await;
	let second = orchestrator.handle(hr_query("q"), future::pending()).await;

	assert_eq!(first, Outcome::failed(FailureKind::Unavailable, Stage::Retrieve));
	assert_eq!(second, Outcome::failed(FailureKind::CircuitOpen, Stage::Retrieve));
	assert_eq!(harness.searcher.script.calls(), 5);

	let third = orchestrator.handle(hr_query("q"), future::pending()).await;

	assert_eq!(third, Outcome::failed(FailureKind::CircuitOpen, Stage::Retrieve));
	assert_eq!(harness.searcher.script.calls(), 5);
	assert_eq!(orchestrator.clients().search.breaker().state(), CircuitState::Open);

	let metrics = harness.metrics.snapshot();

	assert_eq!(metrics.dependencies["search"].short_circuits, 2);
	assert!(harness.audit.records().iter().all(|record| record.decision == AuditDecision::Fail));
}

#[tokio::test]
async fn rerank_failure_keeps_filtered_order() {
	let harness = harness(0.85);

	harness.reranker.set_mode(RerankMode::Fail(503));

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(source_ids(&outcome), vec!["c1".to_string(), "c2".to_string()]);
	assert_eq!(harness.reranker.calls(), 1);
	assert!(harness.audit.records()[0].trace.contains(&RoutingDecision::Rerank { applied: false }));
}

#[tokio::test]
async fn reranker_cannot_introduce_forbidden_candidates() {
	let harness = harness(0.85);

	harness.reranker.set_mode(RerankMode::Inject(candidate("c3", "doc-3", &[Role::Engineering])));

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(source_ids(&outcome), vec!["c1".to_string(), "c2".to_string()]);
	assert!(harness.generator.seen()[0].chunk_ids.iter().all(|chunk_id| chunk_id != "c3"));
}

#[tokio::test]
async fn moderate_confidence_escalates_generation() {
	let harness = harness(0.7);
	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert!(matches!(outcome, Outcome::Answered { .. }));
	assert!(harness.generator.seen()[0].escalate);

	let record = &harness.audit.records()[0];

	assert!(record.escalated);
	assert!(record.trace.iter().any(|decision| matches!(
		decision,
		RoutingDecision::Escalation { route: GenerationRoute::LlmEscalated, .. }
	)));
}

#[tokio::test]
async fn escalation_is_audited_when_generation_fails() {
	let harness = harness(0.7);

	harness.generator.script.set_fallback(Reply::Status(400));

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(outcome, Outcome::failed(FailureKind::Rejected, Stage::Generate));
	assert!(harness.generator.seen()[0].escalate);

	let record = &harness.audit.records()[0];

	assert_eq!(record.decision, AuditDecision::Fail);
	assert!(record.escalated);
	assert!(record.token_usage.is_none());
}

#[tokio::test]
async fn request_metrics_follow_branch_escalation_and_tokens() {
	let harness = harness(0.7);
	let orchestrator = harness.orchestrator();

	orchestrator.handle(hr_query("benefits"), future::pending()).await;
	orchestrator.handle(hr_query("benefits"), future::pending()).await;

	let metrics = harness.metrics.snapshot();

	assert_eq!(metrics.requests["answered"].count, 2);
	assert_eq!(metrics.escalations["low_confidence"], 2);
	// The second answer came from the cache and consumed no tokens.
	assert_eq!(metrics.tokens["fake"], 120);

	let clarifying = Harness::new(0.3, mixed_candidates()).expect("Sample config must load.");

	clarifying.orchestrator().handle(hr_query("policy"), future::pending()).await;

	let metrics = clarifying.metrics.snapshot();

	assert_eq!(metrics.requests["clarification_requested"].count, 1);
	assert!(metrics.escalations.is_empty());
	assert!(metrics.tokens.is_empty());
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
	let harness = harness(0.85);
	let orchestrator = harness.orchestrator();
	let first = orchestrator.handle(hr_query("Vacation policy"), future::pending()).await;
	let second = orchestrator.handle(hr_query("  vacation   POLICY "), future::pending()).await;

	assert_eq!(first, second);
	assert_eq!(harness.optimizer.script.calls(), 1);
	assert_eq!(harness.searcher.script.calls(), 1);
	assert_eq!(harness.generator.seen().len(), 1);

	let records = harness.audit.records();
	let cached: Vec<bool> = records[1]
		.stage_latencies
		.iter()
		.filter(|latency| latency.stage != Stage::Rerank)
		.map(|latency| latency.cached)
		.collect();

	assert_eq!(cached, vec![true, true, true]);
	assert_eq!(harness.metrics.snapshot().cache["generate"].hits, 1);
}

#[tokio::test]
async fn document_invalidation_forces_fresh_retrieval() {
	let harness = harness(0.85);
	let orchestrator = harness.orchestrator();

	orchestrator.handle(hr_query("benefits"), future::pending()).await;

	assert!(orchestrator.cache().invalidate_document("doc-1").await >= 2);

	orchestrator.handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(harness.optimizer.script.calls(), 1);
	assert_eq!(harness.searcher.script.calls(), 2);
	assert_eq!(harness.generator.seen().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_fails_at_the_active_stage_and_audits_once() {
	let harness = harness(0.85);

	harness.generator.script.push(Reply::Hang);

	let outcome = harness
		.orchestrator()
		.handle(hr_query("benefits"), tokio::time::sleep(Duration::from_millis(50)))
		.await;

	assert_eq!(outcome, Outcome::failed(FailureKind::Cancelled, Stage::Generate));

	let records = harness.audit.records();

	assert_eq!(records.len(), 1);
	assert_eq!(records[0].decision, AuditDecision::Fail);
	assert_eq!(Pipeline::replay(&records[0].trace), Ok(PipelineState::Failed));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_background_retries() {
	for cache_enabled in [true, false] {
		let mut harness = harness(0.85);

		harness.config.cache.enabled = cache_enabled;
		harness.config.dependencies.search.retry.base_delay_ms = 1_000;
		harness.config.dependencies.search.retry.max_delay_ms = 1_000;
		harness.searcher.script.push(Reply::Status(503));

		let outcome = harness
			.orchestrator()
			.handle(hr_query("benefits"), tokio::time::sleep(Duration::from_millis(10)))
			.await;

		assert_eq!(outcome, Outcome::failed(FailureKind::Cancelled, Stage::Retrieve));
		assert_eq!(harness.searcher.script.calls(), 1);

		// Well past every backoff the retry policy would have scheduled.
		tokio::time::sleep(Duration::from_secs(5)).await;

		assert_eq!(harness.searcher.script.calls(), 1, "cache_enabled = {cache_enabled}");
		assert!(harness.generator.seen().is_empty());
	}
}

#[tokio::test(start_paused = true)]
async fn request_deadline_bounds_a_hanging_dependency() {
	let harness = harness(0.85);

	harness.generator.script.push(Reply::Hang);

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(outcome, Outcome::failed(FailureKind::DeadlineExceeded, Stage::Generate));
	assert_eq!(harness.audit.records().len(), 1);
}

#[tokio::test]
async fn malformed_optimizer_output_is_not_retried() {
	let harness = harness(0.85);

	harness.optimizer.script.push(Reply::Invalid);

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(outcome, Outcome::failed(FailureKind::InvalidResponse, Stage::Optimize));
	assert_eq!(harness.optimizer.script.calls(), 1);
}

#[tokio::test]
async fn generator_rejection_leaves_the_circuit_closed() {
	let harness = harness(0.85);
	let orchestrator = harness.orchestrator();

	harness.generator.script.set_fallback(Reply::Status(400));

	for _ in 0..6 {
		let outcome = orchestrator.handle(hr_query("benefits"), future::pending()).await;

		assert_eq!(outcome, Outcome::failed(FailureKind::Rejected, Stage::Generate));
	}

	assert_eq!(orchestrator.clients().generator_slm.breaker().state(), CircuitState::Closed);
	assert_eq!(harness.generator.seen().len(), 6);
}

#[tokio::test]
async fn audit_failure_does_not_change_the_outcome() {
	let harness = harness(0.85).with_audit(RecordingAuditSink::failing());
	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert!(matches!(outcome, Outcome::Answered { .. }));
	assert_eq!(harness.audit.records().len(), 1);
}

#[tokio::test]
async fn transient_search_failure_is_retried() {
	let harness = harness(0.85);

	harness.searcher.script.push(Reply::Transport);

	let outcome = harness.orchestrator().handle(hr_query("benefits"), future::pending()).await;

	assert_eq!(source_ids(&outcome).len(), 2);
	assert_eq!(harness.searcher.script.calls(), 2);
	assert_eq!(harness.metrics.snapshot().dependencies["search"].failures, 1);
}
