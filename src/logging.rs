use tracing_subscriber::fmt::time::ChronoUtc;

use crate::settings::LoggingSettings;

/// Install the global `tracing` subscriber.
///
/// # Errors
/// Fails if a global subscriber has already been installed.
pub fn configure(settings: LoggingSettings) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_env_filter(settings.filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to setup tracing: {}", err))
}
