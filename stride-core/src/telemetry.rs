//! Tracing subscriber bootstrap.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{ConfigError, StrideError, StrideResult};

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: std::env::var("STRIDE_LOG_FILTER")
                .unwrap_or_else(|_| "stride=debug,info".to_string()),
            json: std::env::var("STRIDE_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. Fails if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> StrideResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| {
            StrideError::Config(ConfigError::InvalidValue {
                field: "tracing_subscriber".to_string(),
                value: config.default_filter.clone(),
                reason: format!("Failed to init subscriber: {}", e),
            })
        })?;

    tracing::info!(
        filter = %config.default_filter,
        json = config.json,
        "Tracing initialized"
    );

    Ok(())
}
