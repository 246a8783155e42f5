//! Daemon configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::alarm::AlarmValue;

/// Defaults applied to alarms created without explicit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmDefaults {
    pub snooze_minutes: u32,
    pub pre_alarm_minutes: u32,
    /// Zero keeps alarms ringing until someone reacts.
    pub auto_silence_minutes: u32,
}

impl Default for AlarmDefaults {
    fn default() -> Self {
        Self {
            snooze_minutes: AlarmValue::DEFAULT_SNOOZE_MINUTES,
            pre_alarm_minutes: AlarmValue::DEFAULT_PRE_ALARM_MINUTES,
            auto_silence_minutes: AlarmValue::DEFAULT_AUTO_SILENCE_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub api_addr: SocketAddr,

    /// Directory holding `alarms.json`.
    pub data_dir: PathBuf,

    /// How often the wall clock is compared against monotonic time.
    pub clock_check_interval: Duration,

    /// Wall-clock drift tolerated before it counts as a time change.
    /// Keep above scheduling jitter of the check itself.
    pub clock_jump_tolerance: Duration,

    /// Delay between attempts to re-arm the wake timer after a fault.
    pub fault_retry_interval: Duration,

    pub defaults: AlarmDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 7786)),
            data_dir: PathBuf::from("."),
            clock_check_interval: Duration::from_secs(10),
            clock_jump_tolerance: Duration::from_secs(2),
            fault_retry_interval: Duration::from_secs(30),
            defaults: AlarmDefaults::default(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            api_addr: parse(&lookup, "REVEILLE_API_ADDR")?.unwrap_or(defaults.api_addr),
            data_dir: lookup("REVEILLE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            clock_check_interval: parse(&lookup, "REVEILLE_CLOCK_CHECK_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.clock_check_interval),
            clock_jump_tolerance: parse(&lookup, "REVEILLE_CLOCK_TOLERANCE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.clock_jump_tolerance),
            fault_retry_interval: parse(&lookup, "REVEILLE_RETRY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fault_retry_interval),
            defaults: AlarmDefaults {
                snooze_minutes: parse(&lookup, "REVEILLE_SNOOZE_MINUTES")?
                    .unwrap_or(defaults.defaults.snooze_minutes),
                pre_alarm_minutes: parse(&lookup, "REVEILLE_PRE_ALARM_MINUTES")?
                    .unwrap_or(defaults.defaults.pre_alarm_minutes),
                auto_silence_minutes: parse(&lookup, "REVEILLE_AUTO_SILENCE_MINUTES")?
                    .unwrap_or(defaults.defaults.auto_silence_minutes),
            },
        };

        if config.clock_check_interval.is_zero() {
            bail!("REVEILLE_CLOCK_CHECK_SECS must be positive");
        }
        if config.fault_retry_interval.is_zero() {
            bail!("REVEILLE_RETRY_SECS must be positive");
        }
        if config.defaults.snooze_minutes == 0 {
            bail!("REVEILLE_SNOOZE_MINUTES must be positive");
        }
        if config.defaults.auto_silence_minutes > 24 * 60 {
            bail!("REVEILLE_AUTO_SILENCE_MINUTES must not exceed a day");
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid {key}: {raw:?}"))
        })
        .transpose()
}
