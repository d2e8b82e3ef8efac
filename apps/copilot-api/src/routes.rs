use std::collections::BTreeMap;

use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::state::AppState;
use copilot_domain::{
	FailureKind, Identity, InputRejectReason, Outcome, Query, RoleSet, SourceRef, Stage,
	TokenUsage, input_gate,
};
use copilot_service::{CircuitSnapshot, MetricsSnapshot};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/query", post(query))
		.route("/v1/query/clarification", post(clarification))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/circuits", get(circuits))
		.route("/v1/admin/metrics", get(metrics))
		.route("/v1/admin/metrics/prometheus", get(prometheus))
		.route("/v1/admin/cache/documents", post(invalidate_document))
		.route("/v1/admin/cache/identities", post(invalidate_identity))
		.route("/v1/admin/cache/purge", post(purge_cache))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
	pub text: String,
}

/// Follow-up to a clarification: a rewritten query, or one of the offered suggestions.
#[derive(Debug, Deserialize)]
pub struct ClarificationReply {
	pub selected_option: Option<String>,
	pub revised_query: Option<String>,
}
impl ClarificationReply {
	/// The revised query wins over the selected suggestion; blank fields count as absent.
	fn text(self) -> String {
		let present = |value: Option<String>| value.filter(|value| !value.trim().is_empty());

		present(self.revised_query).or_else(|| present(self.selected_option)).unwrap_or_default()
	}
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
	Answered {
		request_id: Uuid,
		answer: String,
		sources: Vec<SourceRef>,
		token_usage: TokenUsage,
	},
	Clarification {
		request_id: Uuid,
		reason: String,
		confidence: f32,
		suggestions: Vec<String>,
	},
}

#[derive(Debug, Deserialize)]
pub struct DocumentInvalidation {
	pub document_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentityInvalidation {
	pub roles: RoleSet,
}

#[derive(Debug, Serialize)]
pub struct Removed {
	pub removed: usize,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn query(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
	run_query(&state, &headers, &payload.text).await
}

/// Re-runs the full pipeline, input gate included, with the caller's follow-up text.
async fn clarification(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<ClarificationReply>,
) -> Result<Json<QueryResponse>, ApiError> {
	let text = payload.text();

	run_query(&state, &headers, &text).await
}

async fn run_query(
	state: &AppState,
	headers: &HeaderMap,
	text: &str,
) -> Result<Json<QueryResponse>, ApiError> {
	let request_id = Uuid::new_v4();
	let identity = identity_from_headers(headers, request_id)?;
	let text = input_gate(text, state.max_query_chars)
		.map_err(|reason| rejected_input(reason, request_id, state.max_query_chars))?;
	let mut query = Query::new(text, identity);

	query.request_id = request_id;

	// Dropping this handler (client disconnect) drops `cancel`, which cancels the pipeline while
	// the spawned task still writes the audit record.
	let (cancel, cancelled) = oneshot::channel::<()>();
	let orchestrator = state.orchestrator.clone();
	let handle = tokio::spawn(async move {
		orchestrator
			.handle(query, async move {
				let _ = cancelled.await;
			})
			.await
	});
	let outcome = handle.await.map_err(|err| {
		tracing::error!(request_id = %request_id, error = %err, "Orchestration task failed.");

		ApiError::new(
			StatusCode::INTERNAL_SERVER_ERROR,
			"internal_error",
			"Request processing failed.",
			Some(request_id),
		)
	})?;

	drop(cancel);

	match outcome {
		Outcome::Answered { text, sources, token_usage } =>
			Ok(Json(QueryResponse::Answered { request_id, answer: text, sources, token_usage })),
		Outcome::ClarificationRequested { reason, confidence, suggestions } =>
			Ok(Json(QueryResponse::Clarification { request_id, reason, confidence, suggestions })),
		Outcome::Failed { kind, stage } => Err(failed(kind, stage, request_id)),
	}
}

async fn circuits(State(state): State<AppState>) -> Json<BTreeMap<&'static str, CircuitSnapshot>> {
	Json(state.orchestrator.clients().snapshots())
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
	Json(state.metrics.snapshot())
}

async fn prometheus(State(state): State<AppState>) -> Result<Response, ApiError> {
	let Some(handle) = state.prometheus.as_ref() else {
		return Err(ApiError::new(
			StatusCode::NOT_FOUND,
			"exporter_disabled",
			"No Prometheus recorder is installed.",
			None,
		));
	};

	Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], handle.render()).into_response())
}

async fn invalidate_document(
	State(state): State<AppState>,
	Json(payload): Json<DocumentInvalidation>,
) -> Result<Json<Removed>, ApiError> {
	let document_id = payload.document_id.trim();

	if document_id.is_empty() {
		return Err(ApiError::new(
			StatusCode::BAD_REQUEST,
			"invalid_request",
			"document_id must be non-empty.",
			None,
		));
	}

	let removed = state.orchestrator.cache().invalidate_document(document_id).await;

	tracing::info!(document_id, removed, "Invalidated cache entries for document.");

	Ok(Json(Removed { removed }))
}

async fn invalidate_identity(
	State(state): State<AppState>,
	Json(payload): Json<IdentityInvalidation>,
) -> Json<Removed> {
	let removed = state.orchestrator.cache().invalidate_roles(&payload.roles).await;

	tracing::info!(roles = %payload.roles.label(), removed, "Invalidated cache entries for roles.");

	Json(Removed { removed })
}

async fn purge_cache(State(state): State<AppState>) -> Json<Removed> {
	Json(Removed { removed: state.orchestrator.cache().purge_expired().await })
}

fn identity_from_headers(headers: &HeaderMap, request_id: Uuid) -> Result<Identity, ApiError> {
	let Some(user_id) = header_value(headers, USER_ID_HEADER) else {
		return Err(ApiError::new(
			StatusCode::UNAUTHORIZED,
			"missing_identity",
			format!("{USER_ID_HEADER} header is required."),
			Some(request_id),
		));
	};
	let Some(roles) = header_value(headers, USER_ROLES_HEADER).and_then(RoleSet::parse_list) else {
		return Err(ApiError::new(
			StatusCode::FORBIDDEN,
			"invalid_roles",
			format!("{USER_ROLES_HEADER} must list at least one known role."),
			Some(request_id),
		));
	};

	Ok(Identity::new(user_id, roles))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
}

fn rejected_input(reason: InputRejectReason, request_id: Uuid, max_chars: u32) -> ApiError {
	let message = match reason {
		InputRejectReason::Empty => "Query text must be non-empty.".to_string(),
		InputRejectReason::TooLong => format!("Query text must be at most {max_chars} characters."),
		InputRejectReason::InjectionPattern => "Query text contains a disallowed pattern.".to_string(),
	};

	ApiError::new(StatusCode::BAD_REQUEST, reason.code(), message, Some(request_id))
}

fn failed(kind: FailureKind, stage: Stage, request_id: Uuid) -> ApiError {
	let status = match kind {
		FailureKind::CircuitOpen | FailureKind::Unavailable | FailureKind::Cancelled =>
			StatusCode::SERVICE_UNAVAILABLE,
		FailureKind::Timeout | FailureKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
		FailureKind::Rejected | FailureKind::InvalidResponse => StatusCode::BAD_GATEWAY,
	};

	ApiError::new(status, kind.code(), format!("The {stage} stage failed."), Some(request_id))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error: String,
	message: String,
	request_id: Option<Uuid>,
	#[serde(with = "copilot_domain::time_serde")]
	timestamp: OffsetDateTime,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error: String,
	message: String,
	request_id: Option<Uuid>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error: impl Into<String>,
		message: impl Into<String>,
		request_id: Option<Uuid>,
	) -> Self {
		Self { status, error: error.into(), message: message.into(), request_id }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody {
			error: self.error,
			message: self.message,
			request_id: self.request_id,
			timestamp: OffsetDateTime::now_utc(),
		};

		(self.status, Json(body)).into_response()
	}
}
