pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use color_eyre::eyre;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use copilot_service::CacheManager;

#[derive(Debug, Parser)]
#[command(
	version = copilot_cli::VERSION,
	rename_all = "kebab",
	styles = copilot_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = copilot_config::load(&args.config)?;

	init_tracing(&config)?;

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let admin_addr: SocketAddr = config.service.admin_bind.parse()?;

	if !admin_addr.ip().is_loopback() {
		return Err(eyre::eyre!("admin_bind must be a loopback address."));
	}

	let purge_interval = Duration::from_secs(config.cache.purge_interval_seconds);
	let prometheus = PrometheusBuilder::new().install_recorder()?;
	let state = AppState::new(&config, Some(prometheus))?;

	if config.cache.enabled {
		tokio::spawn(purge_expired(state.orchestrator.cache().clone(), purge_interval));
	}

	let app = routes::router(state.clone());
	let admin_app = routes::admin_router(state);
	let http_listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	let http_server = axum::serve(http_listener, app);
	let admin_listener = TcpListener::bind(admin_addr).await?;

	tracing::info!(%admin_addr, "Admin server listening.");

	let admin_server = axum::serve(admin_listener, admin_app);

	tokio::try_join!(http_server, admin_server)?;

	Ok(())
}

fn init_tracing(config: &copilot_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	Ok(())
}

async fn purge_expired(cache: CacheManager, every: Duration) {
	let mut ticker = tokio::time::interval(every);

	// The first tick completes immediately.
	ticker.tick().await;

	loop {
		ticker.tick().await;

		let removed = cache.purge_expired().await;

		if removed > 0 {
			let remaining = cache.len().await;

			tracing::debug!(removed, remaining, "Purged expired cache entries.");
		}
	}
}
