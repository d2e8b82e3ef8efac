use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
	escalation::{EscalationReason, GenerationRoute},
	gate::GateDecision,
	outcome::OutcomeKind,
};

/// Downstream stage a request is in; used to attribute failures and latency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	Optimize,
	Retrieve,
	Rerank,
	Generate,
}
impl Stage {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Optimize => "optimize",
			Self::Retrieve => "retrieve",
			Self::Rerank => "rerank",
			Self::Generate => "generate",
		}
	}
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
	Received,
	Optimizing,
	GateEvaluated,
	Clarifying,
	Retrieving,
	Reranking,
	Generating,
	Completed,
	Failed,
}
impl PipelineState {
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Clarifying | Self::Completed | Self::Failed)
	}

	pub fn can_transition_to(self, next: Self) -> bool {
		if self.is_terminal() {
			return false;
		}
		if next == Self::Failed {
			return true;
		}

		matches!(
			(self, next),
			(Self::Received, Self::Optimizing)
				| (Self::Optimizing, Self::GateEvaluated)
				| (Self::GateEvaluated, Self::Clarifying)
				| (Self::GateEvaluated, Self::Retrieving)
				| (Self::Retrieving, Self::Reranking)
				| (Self::Reranking, Self::Generating)
				| (Self::Generating, Self::Completed)
		)
	}

	/// Outcome kind implied by a terminal state.
	pub fn outcome_kind(self) -> Option<OutcomeKind> {
		match self {
			Self::Completed => Some(OutcomeKind::Answered),
			Self::Clarifying => Some(OutcomeKind::ClarificationRequested),
			Self::Failed => Some(OutcomeKind::Failed),
			_ => None,
		}
	}

	fn stage(self) -> Option<Stage> {
		match self {
			Self::Optimizing | Self::GateEvaluated | Self::Clarifying => Some(Stage::Optimize),
			Self::Retrieving => Some(Stage::Retrieve),
			Self::Reranking => Some(Stage::Rerank),
			Self::Generating | Self::Completed => Some(Stage::Generate),
			Self::Received | Self::Failed => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
	Transition {
		from: PipelineState,
		to: PipelineState,
	},
	Gate {
		confidence: f32,
		threshold: f32,
		outcome: GateDecision,
	},
	Access {
		retrieved: usize,
		permitted: usize,
	},
	Rerank {
		applied: bool,
	},
	Escalation {
		route: GenerationRoute,
		reason: Option<EscalationReason>,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid pipeline transition from {from:?} to {to:?}.")]
pub struct InvalidTransition {
	pub from: PipelineState,
	pub to: PipelineState,
}

/// Request state machine plus its append-only routing trace.
#[derive(Clone, Debug)]
pub struct Pipeline {
	state: PipelineState,
	stage: Stage,
	trace: Vec<RoutingDecision>,
}
impl Pipeline {
	pub fn new() -> Self {
		Self { state: PipelineState::Received, stage: Stage::Optimize, trace: Vec::new() }
	}

	/// Re-runs the transitions of a recorded trace and returns the state it ends in.
	pub fn replay(trace: &[RoutingDecision]) -> Result<PipelineState, InvalidTransition> {
		let mut pipeline = Self::new();

		for decision in trace {
			if let RoutingDecision::Transition { from, to } = decision {
				if *from != pipeline.state {
					return Err(InvalidTransition { from: pipeline.state, to: *to });
				}

				pipeline.advance(*to)?;
			}
		}

		Ok(pipeline.state)
	}

	pub fn state(&self) -> PipelineState {
		self.state
	}

	/// Stage currently in progress, or the stage the request failed in.
	pub fn stage(&self) -> Stage {
		self.stage
	}

	pub fn advance(&mut self, next: PipelineState) -> Result<(), InvalidTransition> {
		if !self.state.can_transition_to(next) {
			return Err(InvalidTransition { from: self.state, to: next });
		}

		self.trace.push(RoutingDecision::Transition { from: self.state, to: next });
		self.state = next;

		if let Some(stage) = next.stage() {
			self.stage = stage;
		}

		Ok(())
	}

	/// Appends a branch decision. Transitions are recorded by [`Pipeline::advance`].
	pub fn record(&mut self, decision: RoutingDecision) {
		self.trace.push(decision);
	}

	pub fn trace(&self) -> &[RoutingDecision] {
		&self.trace
	}

	pub fn into_trace(self) -> Vec<RoutingDecision> {
		self.trace
	}

	pub fn gate_decision(&self) -> Option<GateDecision> {
		self.trace.iter().find_map(|decision| match decision {
			RoutingDecision::Gate { outcome, .. } => Some(*outcome),
			_ => None,
		})
	}

	pub fn route(&self) -> Option<GenerationRoute> {
		self.trace.iter().find_map(|decision| match decision {
			RoutingDecision::Escalation { route, .. } => Some(*route),
			_ => None,
		})
	}
}

impl Default for Pipeline {
	fn default() -> Self {
		Self::new()
	}
}
