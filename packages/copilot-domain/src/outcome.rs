use serde::{Deserialize, Serialize};

use crate::{candidate::Candidate, pipeline::Stage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
	pub prompt_tokens: u32,
	pub completion_tokens: u32,
	pub total_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
	pub document_id: String,
	pub chunk_id: String,
	pub title: Option<String>,
	pub score: f32,
}
impl From<&Candidate> for SourceRef {
	fn from(candidate: &Candidate) -> Self {
		Self {
			document_id: candidate.document_id.clone(),
			chunk_id: candidate.chunk_id.clone(),
			title: candidate.title.clone(),
			score: candidate.score,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	/// The dependency's breaker short-circuited the call.
	CircuitOpen,
	/// Every attempt timed out.
	Timeout,
	/// Transport failures or retryable statuses exhausted the retry budget.
	Unavailable,
	/// The dependency answered with a non-retryable status.
	Rejected,
	/// The dependency answered with a body that could not be used.
	InvalidResponse,
	/// The caller went away before the pipeline finished.
	Cancelled,
	/// The global per-request deadline elapsed.
	DeadlineExceeded,
}
impl FailureKind {
	/// Stable code surfaced to API callers.
	pub fn code(self) -> &'static str {
		match self {
			Self::CircuitOpen => "circuit_open",
			Self::Timeout => "dependency_timeout",
			Self::Unavailable => "dependency_unavailable",
			Self::Rejected => "dependency_rejected",
			Self::InvalidResponse => "invalid_response",
			Self::Cancelled => "request_cancelled",
			Self::DeadlineExceeded => "deadline_exceeded",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
	Answered {
		text: String,
		sources: Vec<SourceRef>,
		token_usage: TokenUsage,
	},
	ClarificationRequested {
		reason: String,
		confidence: f32,
		suggestions: Vec<String>,
	},
	Failed {
		kind: FailureKind,
		stage: Stage,
	},
}
impl Outcome {
	pub fn kind(&self) -> OutcomeKind {
		match self {
			Self::Answered { .. } => OutcomeKind::Answered,
			Self::ClarificationRequested { .. } => OutcomeKind::ClarificationRequested,
			Self::Failed { .. } => OutcomeKind::Failed,
		}
	}

	pub fn failed(kind: FailureKind, stage: Stage) -> Self {
		Self::Failed { kind, stage }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
	Answered,
	ClarificationRequested,
	Failed,
}
impl OutcomeKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Answered => "answered",
			Self::ClarificationRequested => "clarification_requested",
			Self::Failed => "failed",
		}
	}
}
