//! Eco Guardian - Main entry point.

use anyhow::Result;
use eco_common::config::Config;
use eco_common::logging::init_logging_with_exclusions;
use eco_guardian::GuardianService;

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = std::time::Instant::now();

    // Load configuration (file, then environment overrides)
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Eco Guardian v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Startup complete"
    );

    let service = GuardianService::new(config);
    service.start().await
}
