//! Logging configuration and initialization
//!
//! This module sets up the tracing subscriber for structured logging
//! throughout the application.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Normalize a configured log level into a tracing filter directive
///
/// Accepts debug, info, warning/warn, error and critical, case-insensitively.
/// Only the first word is read so trailing comments are tolerated. Anything
/// else falls back to "info".
pub fn parse_level(log_level: &str) -> &'static str {
    let level = log_level
        .split_whitespace()
        .next()
        .unwrap_or("info")
        .to_lowercase();

    match level.as_str() {
        "debug" => "debug",
        "info" => "info",
        "warning" | "warn" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    }
}

/// Initialize the logging system with the specified level
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Arguments
///
/// * `log_level` - The log level string (debug, info, warning, error, critical)
pub fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(log_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), "debug");
        assert_eq!(parse_level("WARNING"), "warn");
        assert_eq!(parse_level("warn"), "warn");
        assert_eq!(parse_level("critical"), "error");
        assert_eq!(parse_level("info  # default"), "info");
    }

    #[test]
    fn test_invalid_level_falls_back_to_info() {
        assert_eq!(parse_level("verbose"), "info");
        assert_eq!(parse_level(""), "info");
    }
}
