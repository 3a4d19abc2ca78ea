//! Tracing subscriber configuration for the host binary
//!
//! The library only emits events and spans; the application decides where they
//! go. Output goes to stderr so stdout stays free for reports. `log` records
//! from the ONNX backend reach the same subscriber through
//! `tracing-subscriber`'s log bridge.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default)
    Console,
    /// Compact output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Take the filter from `RUST_LOG` when it is set
    #[must_use]
    pub fn with_env_override(self) -> Self {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(filter) if !filter.trim().is_empty() => self.with_env_filter(filter),
            _ => self,
        }
    }

    /// Filter directive for the configured verbosity
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// Invalid filter directives, or a subscriber already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_to_filter() {
        let config = TracingConfig::new();
        assert_eq!(config.verbosity_to_filter(), "info");
        assert_eq!(config.with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(5).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = TracingConfig::new()
            .with_format(TracingFormat::Compact)
            .with_env_filter("medseg=debug");
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("medseg=debug"));
    }

    #[test]
    fn test_invalid_filter_fails_init() {
        let result = TracingConfig::new().with_env_filter("medseg=loudest").init();
        assert!(result.is_err());
    }
}
