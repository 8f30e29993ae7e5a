/// Configuration for the telemetry subsystem.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup span.
    pub service_name: String,
    /// Fallback filter when `RUST_LOG` is unset (e.g. "info", "solana_event_ingestor=debug,warn").
    pub log_filter: String,
    pub enable_console_colors: bool,
    /// Whether to include target module in output.
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "solana-event-ingestor".into(),
            log_filter: "info".into(),
            enable_console_colors: true,
            show_target: true,
            show_thread_ids: false,
        }
    }
}
