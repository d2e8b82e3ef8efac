use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	identity::Identity,
	outcome::{Outcome, TokenUsage},
	pipeline::{RoutingDecision, Stage},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
	Answer,
	Clarify,
	Fail,
}
impl AuditDecision {
	pub fn for_outcome(outcome: &Outcome) -> Self {
		match outcome {
			Outcome::Answered { .. } => Self::Answer,
			Outcome::ClarificationRequested { .. } => Self::Clarify,
			Outcome::Failed { .. } => Self::Fail,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLatency {
	pub stage: Stage,
	pub latency_ms: u64,
	/// Served from cache without a downstream call.
	pub cached: bool,
}

/// One per request, written once when the request reaches a terminal outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
	pub request_id: Uuid,
	pub identity: Identity,
	pub trace: Vec<RoutingDecision>,
	pub stage_latencies: Vec<StageLatency>,
	pub outcome: Outcome,
	/// Last stage the request reached.
	pub stage: Stage,
	pub decision: AuditDecision,
	pub escalated: bool,
	pub token_usage: Option<TokenUsage>,
	#[serde(with = "crate::time_serde")]
	pub received_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub completed_at: OffsetDateTime,
	pub total_latency_ms: u64,
}
