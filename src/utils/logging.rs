//! Logging helpers layered over `tracing`.

use solana_sdk::pubkey::Pubkey;

/// Log levels for the ingestor
#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

fn silenced() -> bool {
    std::env::var("INGESTOR_SILENT").is_ok()
}

/// Logs a message
pub fn log(level: LogLevel, message: &str) {
    if silenced() {
        return;
    }

    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
    }
}

/// Masks the value of an `api-key=` query parameter.
#[must_use]
pub fn redact_url(url: &str) -> String {
    match url.find("api-key=") {
        Some(pos) => {
            let before = &url[..pos + 8];
            let after = &url[pos + 8..];
            let end_pos = after.find('&').unwrap_or(after.len());
            format!("{}[REDACTED]{}", before, &after[end_pos..])
        }
        None => url.to_string(),
    }
}

/// Logs ingestor startup information
pub fn log_startup(programs: &[Pubkey], rpc_url: &str, ws_url: Option<&str>, resume: bool) {
    if silenced() {
        return;
    }

    let programs = programs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    tracing::info!(
        programs = %programs,
        rpc_url = %redact_url(rpc_url),
        ws_url = %ws_url.map(redact_url).unwrap_or_else(|| "disabled".to_string()),
        resume = resume,
        "Event ingestor startup"
    );
}

/// Logs a dispatched transaction
pub fn log_transaction(signature: &str, slot: u64, events: usize) {
    tracing::debug!(
        signature = signature,
        slot = slot,
        events = events,
        "Processed transaction"
    );
}

/// Logs an error with context
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context = context, error = error, "Ingestor error");
}
