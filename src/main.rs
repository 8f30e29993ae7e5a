//! Solana Event Ingestor
//!
//! Reads its configuration from the environment (see
//! [`IngestorConfig::from_env`]) and runs until Ctrl-C.

use solana_event_ingestor::{Ingestor, IngestorConfig, Result, TelemetryConfig, init_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_telemetry(TelemetryConfig::default());

    let config = IngestorConfig::from_env()?;
    tracing::info!(
        programs = config.program_ids.len(),
        realtime = config.enable_realtime,
        backfill = config.enable_backfill,
        page_size = config.page_size,
        "Configuration loaded"
    );

    let ingestor = Ingestor::new(config).await?;

    let cancel = ingestor.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                cancel.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let stats = ingestor.run().await?;
    tracing::info!(
        ingested = stats.ingested,
        reparsed = stats.reparsed,
        skipped = stats.skipped,
        failed = stats.failed,
        "Ingestor stopped"
    );

    Ok(())
}
