use snafu::{ensure, ResultExt};
use std::env;
use tokio::time::Duration;

// Enables the backfill sweep when set to `1` or `true`.
const BACKFILL_ENV_VAR: &str = "STARTUP_BACKFILL";
// Repeats the backfill sweep at this interval. Unset means the sweep runs once.
const BACKFILL_INTERVAL_ENV_VAR: &str = "STARTUP_BACKFILL_INTERVAL_SECONDS";
// Re-delivers every cached node to the reconciler at this period.
const RESYNC_PERIOD_ENV_VAR: &str = "STARTUP_RESYNC_PERIOD_SECONDS";
const SHUTDOWN_GRACE_PERIOD_ENV_VAR: &str = "SHUTDOWN_GRACE_PERIOD_SECONDS";

const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The module-wide result type.
type Result<T> = std::result::Result<T, config_error::Error>;

/// Runtime settings for the controller binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub backfill_enabled: bool,
    pub backfill_interval: Option<Duration>,
    pub resync_period: Duration,
    pub shutdown_grace_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            backfill_enabled: false,
            backfill_interval: None,
            resync_period: DEFAULT_RESYNC_PERIOD,
            shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
        }
    }
}

impl ControllerConfig {
    pub fn from_environment() -> Result<Self> {
        Self::from_values(
            env::var(BACKFILL_ENV_VAR).ok().as_deref(),
            env::var(BACKFILL_INTERVAL_ENV_VAR).ok().as_deref(),
            env::var(RESYNC_PERIOD_ENV_VAR).ok().as_deref(),
            env::var(SHUTDOWN_GRACE_PERIOD_ENV_VAR).ok().as_deref(),
        )
    }

    fn from_values(
        backfill: Option<&str>,
        backfill_interval: Option<&str>,
        resync_period: Option<&str>,
        shutdown_grace_period: Option<&str>,
    ) -> Result<Self> {
        let backfill_interval = backfill_interval
            .map(|value| parse_interval(BACKFILL_INTERVAL_ENV_VAR, value))
            .transpose()?;

        Ok(ControllerConfig {
            backfill_enabled: backfill.map_or(false, |value| {
                let value = value.trim();
                value == "1" || value.eq_ignore_ascii_case("true")
            }),
            backfill_interval,
            resync_period: resync_period
                .map(|value| parse_interval(RESYNC_PERIOD_ENV_VAR, value))
                .transpose()?
                .unwrap_or(DEFAULT_RESYNC_PERIOD),
            shutdown_grace_period: shutdown_grace_period
                .map(|value| parse_seconds(SHUTDOWN_GRACE_PERIOD_ENV_VAR, value))
                .transpose()?
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_PERIOD),
        })
    }
}

fn parse_seconds(variable: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .context(config_error::ParseSecondsSnafu { variable, value })
}

// Like `parse_seconds`, for periods that drive a loop and so must not be zero.
fn parse_interval(variable: &str, value: &str) -> Result<Duration> {
    let interval = parse_seconds(variable, value)?;
    ensure!(
        !interval.is_zero(),
        config_error::ZeroIntervalSnafu { variable }
    );
    Ok(interval)
}

pub mod config_error {
    use snafu::Snafu;
    use std::num::ParseIntError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "Unable to parse environment variable '{}' value '{}' as seconds: '{}'",
            variable,
            value,
            source
        ))]
        ParseSeconds {
            variable: String,
            value: String,
            source: ParseIntError,
        },

        #[snafu(display("Environment variable '{}' must not be zero", variable))]
        ZeroInterval { variable: String },
    }
}
