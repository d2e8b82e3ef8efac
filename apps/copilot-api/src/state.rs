use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use copilot_service::{Orchestrator, Providers, ServiceMetrics, audit};

#[derive(Clone)]
pub struct AppState {
	pub orchestrator: Arc<Orchestrator>,
	pub metrics: Arc<ServiceMetrics>,
	/// Renders the process-wide Prometheus recorder; `None` when no recorder is installed.
	pub prometheus: Option<PrometheusHandle>,
	pub max_query_chars: u32,
}
impl AppState {
	pub fn new(
		config: &copilot_config::Config,
		prometheus: Option<PrometheusHandle>,
	) -> color_eyre::Result<Self> {
		let metrics = Arc::new(ServiceMetrics::new());
		let audit = audit::sink_from_config(&config.audit)?;
		let providers = Providers::http(&config.dependencies);
		let orchestrator = Orchestrator::from_config(config, providers, audit, metrics.clone());

		Ok(Self::from_parts(Arc::new(orchestrator), metrics, config.service.max_query_chars)
			.with_prometheus(prometheus))
	}

	pub fn from_parts(
		orchestrator: Arc<Orchestrator>,
		metrics: Arc<ServiceMetrics>,
		max_query_chars: u32,
	) -> Self {
		Self { orchestrator, metrics, prometheus: None, max_query_chars }
	}

	pub fn with_prometheus(mut self, prometheus: Option<PrometheusHandle>) -> Self {
		self.prometheus = prometheus;

		self
	}
}
