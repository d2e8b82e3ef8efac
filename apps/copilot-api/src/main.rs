use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = copilot_api::Args::parse();

	copilot_api::run(args).await
}
