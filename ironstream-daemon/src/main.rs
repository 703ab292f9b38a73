use anyhow::Result;
use clap::Parser;

use ironstream_core::config::IronstreamConfig;
use ironstream_daemon::cli::DaemonCli;
use ironstream_daemon::{Orchestrator, logging, validate_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = IronstreamConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", cli.config.display()))?;
    cli.apply_overrides(&mut config.general);

    if cli.validate {
        let summary = validate_config(&config).await?;
        println!(
            "configuration OK: {} destinations, {} rules, {} attack chains",
            summary.destinations, summary.rules, summary.chains
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "ironstream-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("ironstream-daemon shut down");
    Ok(())
}
