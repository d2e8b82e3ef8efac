use std::sync::Arc;

use crate::{AuditSink, BoxFuture};
use copilot_domain::AuditRecord;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
	#[error(transparent)]
	Provider(#[from] copilot_providers::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("{message}")]
	Sink { message: String },
}

/// Emits each record as one structured tracing event.
#[derive(Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
	fn record<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
		Box::pin(async move {
			let payload = serde_json::to_string(record)?;

			tracing::info!(
				target: "copilot::audit",
				request_id = %record.request_id,
				user_id = record.identity.user_id.as_str(),
				decision = ?record.decision,
				stage = record.stage.as_str(),
				escalated = record.escalated,
				total_latency_ms = record.total_latency_ms,
				record = payload.as_str(),
				"Audit record."
			);

			Ok(())
		})
	}
}

/// Posts each record to an external audit service.
#[derive(Debug, Clone)]
pub struct HttpAuditSink {
	endpoint: copilot_config::AuditEndpoint,
	timeout_ms: u64,
}
impl HttpAuditSink {
	pub fn new(endpoint: copilot_config::AuditEndpoint, timeout_ms: u64) -> Self {
		Self { endpoint, timeout_ms }
	}
}

impl AuditSink for HttpAuditSink {
	fn record<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
		Box::pin(async move {
			copilot_providers::audit::record_audit(&self.endpoint, self.timeout_ms, record).await?;

			Ok(())
		})
	}
}

pub fn sink_from_config(cfg: &copilot_config::Audit) -> Result<Arc<dyn AuditSink>, AuditError> {
	match (cfg.sink.as_str(), cfg.endpoint.as_ref()) {
		("log", _) => Ok(Arc::new(LogAuditSink)),
		("http", Some(endpoint)) => Ok(Arc::new(HttpAuditSink::new(endpoint.clone(), cfg.timeout_ms))),
		(sink, _) => Err(AuditError::Sink { message: format!("Unsupported audit sink {sink}.") }),
	}
}
