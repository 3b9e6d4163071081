//! Telemetry initialization.
//!
//! Structured logging via `tracing`. The filter comes from `SKILLVAULT_LOG`
//! (standard env-filter syntax, e.g. `skillvault=debug`); setting
//! `SKILLVAULT_LOG_FORMAT=json` switches to JSON lines on stderr for log
//! shippers. Exporters beyond stderr belong to the embedding process, not
//! the core.
//!
//! Coordinator spans carry the structured fields `operation`, `artifact_id`,
//! `collection`, and `duration_ms`.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "SKILLVAULT_LOG";

/// Environment variable selecting the output format (`json` or text).
pub const LOG_FORMAT_ENV: &str = "SKILLVAULT_LOG_FORMAT";

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops (the first subscriber wins).
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // Err means a subscriber is already installed; that is fine.
    drop(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
