use copilot_domain::FailureKind;

use crate::client::DependencyId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("Circuit for {dependency} is open.")]
	CircuitOpen { dependency: DependencyId },
	#[error("{dependency} timed out after {attempts} attempt(s).")]
	Timeout { dependency: DependencyId, attempts: u32 },
	#[error("{dependency} unavailable after {attempts} attempt(s): {message}")]
	Unavailable { dependency: DependencyId, attempts: u32, message: String },
	#[error("{dependency} rejected the request: {message}")]
	Rejected { dependency: DependencyId, status: Option<u16>, message: String },
	#[error("{dependency} returned an invalid response: {message}")]
	InvalidResponse { dependency: DependencyId, message: String },
	#[error("Call to {dependency} was cancelled.")]
	Cancelled { dependency: DependencyId },
	#[error("Cache error: {message}")]
	Cache { message: String },
	#[error("Background task failed: {message}")]
	Task { message: String },
}
impl Error {
	pub fn failure_kind(&self) -> FailureKind {
		match self {
			Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
			Self::Cancelled { .. } => FailureKind::Cancelled,
			Self::Timeout { .. } => FailureKind::Timeout,
			Self::Unavailable { .. } | Self::Task { .. } => FailureKind::Unavailable,
			Self::Rejected { .. } => FailureKind::Rejected,
			Self::InvalidResponse { .. } | Self::Cache { .. } => FailureKind::InvalidResponse,
		}
	}
}
