use super::config::TelemetryConfig;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TELEMETRY_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Only the first call
/// has an effect; later calls return `false`. A subscriber installed by
/// someone else (a test harness, for example) is left in place.
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let mut installed = false;
    TELEMETRY_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_ansi(config.enable_console_colors);

        installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .is_ok();

        if installed {
            tracing::debug!(service = %config.service_name, "Telemetry initialised");
        }
    });
    installed
}
