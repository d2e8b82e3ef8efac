use crate::{Endpoint, Result};
use copilot_domain::AuditRecord;

pub async fn record_audit(
	cfg: &copilot_config::AuditEndpoint,
	timeout_ms: u64,
	record: &AuditRecord,
) -> Result<()> {
	let body = serde_json::to_value(record)?;
	let request_id = record.request_id.to_string();

	crate::post_json(&Endpoint::audit(cfg, timeout_ms), &request_id, &body).await?;

	Ok(())
}
