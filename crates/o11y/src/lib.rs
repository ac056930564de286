//! Logging, metrics and panic reporting for the relay process.

use tokio_util::sync::CancellationToken;

pub mod logging;
pub mod panic;
pub mod relay_metrics;

#[derive(Clone, Debug, Default)]
pub struct O11yConfig {
    pub logging: logging::Config,
    pub metrics: relay_metrics::Config,
}

/// Logging first so the metrics and panic-hook setup is itself logged.
pub fn init_all(
    cfg: &O11yConfig,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    logging::init(&cfg.logging)?;
    relay_metrics::init(&cfg.metrics, cancel)?;
    panic::install_hook();
    Ok(())
}
