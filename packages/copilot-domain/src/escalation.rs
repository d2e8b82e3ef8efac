use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationRoute {
	SlmOnly,
	LlmEscalated,
}
impl GenerationRoute {
	pub fn is_escalated(self) -> bool {
		matches!(self, Self::LlmEscalated)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::SlmOnly => "slm_only",
			Self::LlmEscalated => "llm_escalated",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
	LowConfidence,
	HighContextComplexity,
}
impl EscalationReason {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::LowConfidence => "low_confidence",
			Self::HighContextComplexity => "high_context_complexity",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
	pub route: GenerationRoute,
	pub reason: Option<EscalationReason>,
}

pub fn decide_escalation(
	cfg: &copilot_config::Escalation,
	confidence: f32,
	context: &[Candidate],
) -> EscalationDecision {
	if !cfg.enabled {
		return EscalationDecision { route: GenerationRoute::SlmOnly, reason: None };
	}
	if confidence < cfg.min_confidence {
		return EscalationDecision {
			route: GenerationRoute::LlmEscalated,
			reason: Some(EscalationReason::LowConfidence),
		};
	}

	let context_chars: usize = context.iter().map(Candidate::content_chars).sum();

	if context_chars > cfg.max_context_chars as usize {
		return EscalationDecision {
			route: GenerationRoute::LlmEscalated,
			reason: Some(EscalationReason::HighContextComplexity),
		};
	}

	EscalationDecision { route: GenerationRoute::SlmOnly, reason: None }
}
