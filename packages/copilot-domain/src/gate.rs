use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{Role, RoleSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
	Proceed,
	Clarify,
}
impl GateDecision {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Proceed => "proceed",
			Self::Clarify => "clarify",
		}
	}
}

/// Proceeds iff `confidence >= threshold`. A NaN confidence never proceeds.
pub fn decide(confidence: f32, threshold: f32) -> GateDecision {
	if confidence >= threshold { GateDecision::Proceed } else { GateDecision::Clarify }
}

/// Role to threshold lookup, resolved once per request.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdPolicy {
	default: f32,
	by_role: BTreeMap<Role, f32>,
}
impl ThresholdPolicy {
	pub fn new(default: f32, by_role: BTreeMap<Role, f32>) -> Self {
		Self { default, by_role }
	}

	pub fn uniform(default: f32) -> Self {
		Self { default, by_role: BTreeMap::new() }
	}

	/// Unknown role keys are skipped; configuration validation rejects them up front.
	pub fn from_config(cfg: &copilot_config::Gate) -> Self {
		let by_role = cfg
			.role_thresholds
			.iter()
			.filter_map(|(raw, threshold)| Role::parse(raw).map(|role| (role, *threshold)))
			.collect();

		Self { default: cfg.confidence_threshold, by_role }
	}

	/// With several roles the most permissive (lowest) threshold applies.
	pub fn resolve(&self, roles: &RoleSet) -> f32 {
		roles
			.iter()
			.map(|role| self.by_role.get(&role).copied().unwrap_or(self.default))
			.fold(f32::INFINITY, f32::min)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn boundary_confidence_proceeds() {
		assert_eq!(decide(0.6, 0.6), GateDecision::Proceed);
		assert_eq!(decide(0.599_999, 0.6), GateDecision::Clarify);
		assert_eq!(decide(f32::NAN, 0.0), GateDecision::Clarify);
	}

	#[test]
	fn resolves_lowest_threshold_across_roles() {
		let policy =
			ThresholdPolicy::new(0.6, BTreeMap::from([(Role::Hr, 0.7), (Role::Finance, 0.5)]));

		assert_eq!(policy.resolve(&RoleSet::single(Role::Hr)), 0.7);
		assert_eq!(policy.resolve(&RoleSet::single(Role::Admin)), 0.6);

		let roles = RoleSet::new([Role::Hr, Role::Finance]).expect("Expected a role set.");

		assert_eq!(policy.resolve(&roles), 0.5);
	}
}
