//! Tracing initialization.
//!
//! Installs a global `tracing-subscriber` with an `EnvFilter` (honouring
//! `RUST_LOG`) and either JSON or human-readable output.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "tenantry_router=debug,tenantry_storage=debug,info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "text" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Log line format
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("TENANTRY_SERVICE_NAME")
                .unwrap_or_else(|_| "tenantry".to_string()),
            environment: std::env::var("TENANTRY_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            format: std::env::var("TENANTRY_LOG_FORMAT")
                .ok()
                .and_then(|s| LogFormat::parse(&s))
                .unwrap_or(LogFormat::Json),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to init subscriber: {0}")]
    Init(String),
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call fails because a global subscriber is
/// already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_from_env() {
        let _name = EnvVarGuard::set("TENANTRY_SERVICE_NAME", None);
        let _format = EnvVarGuard::set("TENANTRY_LOG_FORMAT", Some("pretty"));
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tenantry");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.default_filter, DEFAULT_FILTER);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" text "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_init_tracing_twice_fails() {
        let config = TelemetryConfig {
            format: LogFormat::Pretty,
            ..Default::default()
        };
        // Another test in this binary may already own the global subscriber, so
        // only the second outcome is certain.
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(TelemetryError::Init(_))));
    }
}
