pub mod access;
pub mod audit;
pub mod candidate;
pub mod escalation;
pub mod gate;
pub mod identity;
pub mod input_gate;
pub mod outcome;
pub mod pipeline;
pub mod query;
pub mod time_serde;

pub use access::{filter, is_permitted, reconcile_order};
pub use audit::{AuditDecision, AuditRecord, StageLatency};
pub use candidate::Candidate;
pub use escalation::{EscalationDecision, EscalationReason, GenerationRoute, decide_escalation};
pub use gate::{GateDecision, ThresholdPolicy, decide};
pub use identity::{Identity, Role, RoleSet};
pub use input_gate::{InputRejectReason, input_gate};
pub use outcome::{FailureKind, Outcome, OutcomeKind, SourceRef, TokenUsage};
pub use pipeline::{InvalidTransition, Pipeline, PipelineState, RoutingDecision, Stage};
pub use query::{OptimizedQuery, Query, normalize_query_text};
