//! Log output for the startup taint controller.
//!
//! Reconcile and backfill decisions are emitted as `tracing` events. This module only decides which of
//! them are printed and how.
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Layer, Registry,
};

const DEFAULT_TRACING_FILTER_DIRECTIVE: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

/// How each log line is laid out. Read from `LOGGING_FORMATTER`; `json` suits log collectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Full,
    Compact,
    Pretty,
    Json,
}

impl MessageFormat {
    fn parse(formatter: &str) -> Result<Self> {
        serde_plain::from_str(formatter).context(error::LogFormatterEnvSnafu {
            env_value: formatter,
        })
    }
}

/// Output settings for the controller's log lines. Colors stay off unless `LOGGING_ANSI_ENABLED=true`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct LogFormatter {
    message_format: MessageFormat,
    ansi_enabled: bool,
}

impl LogFormatter {
    pub fn try_from_env() -> Result<Self> {
        Self::from_values(
            env::var(LOGGING_FORMATTER_ENV_VAR).ok().as_deref(),
            env::var(LOGGING_ANSI_ENABLED_ENV_VAR).ok().as_deref(),
        )
    }

    fn from_values(formatter: Option<&str>, ansi_enabled: Option<&str>) -> Result<Self> {
        let message_format = formatter
            .map(MessageFormat::parse)
            .transpose()?
            .unwrap_or_default();
        let ansi_enabled = ansi_enabled
            .map(|ansi_enabled| {
                ansi_enabled
                    .to_lowercase()
                    .parse()
                    .context(error::LogAnsiEnvSnafu {
                        env_value: ansi_enabled,
                    })
            })
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            message_format,
            ansi_enabled,
        })
    }

    /// The layer which renders controller events in this format.
    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => layer.boxed(),
            MessageFormat::Compact => layer.compact().boxed(),
            MessageFormat::Pretty => layer.pretty().boxed(),
            MessageFormat::Json => layer.json().boxed(),
        }
    }
}

/// Installs the controller's global subscriber.
///
/// `TRACING_FILTER_DIRECTIVE` selects which events are kept (INFO when unset or unparsable), while
/// `LOGGING_FORMATTER` and `LOGGING_ANSI_ENABLED` control how they are printed.
pub fn init_telemetry_from_env() -> Result<()> {
    let formatter = LogFormatter::try_from_env()?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_TRACING_FILTER_DIRECTIVE.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = Registry::default()
        .with(env_filter)
        .with(formatter.layer());
    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)
}

pub mod error {
    use std::str::ParseBoolError;

    use super::*;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;
