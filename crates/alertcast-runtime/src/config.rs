//! Engine configuration
//!
//! Configuration is read from JSON (file or string) and can be overridden
//! from `ALERTCAST_*` environment variables. Durations are humantime
//! strings such as `"1s"` or `"250ms"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use alertcast_core::{AlertKind, AlertcastError, AlertcastResult, Role, Tier};
use alertcast_time::{Cadence, Interval};

use crate::{LogFormat, LoggingConfig, TierPolicyTable};

pub const ENV_SCHEDULER_MODE: &str = "ALERTCAST_SCHEDULER_MODE";
pub const ENV_TICK_INTERVAL: &str = "ALERTCAST_TICK_INTERVAL";
pub const ENV_BOUNDARY_TOLERANCE: &str = "ALERTCAST_BOUNDARY_TOLERANCE";
pub const ENV_LOG_LEVEL: &str = "ALERTCAST_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "ALERTCAST_LOG_FORMAT";

/// How the driver decides when to look for boundaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Sleep until the next boundary of any interval tier
    Aligned,
    /// Wake every `tick_interval` and test for the boundary second
    Poll,
}

impl std::str::FromStr for SchedulerMode {
    type Err = AlertcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aligned" => Ok(SchedulerMode::Aligned),
            "poll" => Ok(SchedulerMode::Poll),
            other => Err(AlertcastError::InvalidConfig(format!("unknown scheduler mode '{}'", other))),
        }
    }
}

/// Cadence scheduler configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub mode: SchedulerMode,
    /// Poll period in `Poll` mode
    #[serde(with = "humantime_str")]
    pub tick_interval: Duration,
    /// How late an aligned wake-up may be and still flush its boundary
    #[serde(with = "humantime_str")]
    pub boundary_tolerance: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            mode: SchedulerMode::Aligned,
            tick_interval: Duration::from_secs(1),
            boundary_tolerance: Duration::from_secs(1),
        }
    }
}

/// One row of the tier policy table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicyConfig {
    pub tier: Tier,
    pub cadence: Cadence,
    pub allowed_kinds: Vec<AlertKind>,
}

impl TierPolicyConfig {
    pub fn new(tier: Tier, cadence: Cadence, allowed_kinds: Vec<AlertKind>) -> Self {
        TierPolicyConfig {
            tier,
            cadence,
            allowed_kinds,
        }
    }
}

/// Distribution engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub tiers: Vec<TierPolicyConfig>,
    /// Roles that see every routable alert immediately
    pub mirror_roles: Vec<Role>,
    /// Capacity of the inbound command channel
    pub command_buffer: usize,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            scheduler: SchedulerConfig::default(),
            tiers: standard_tiers(),
            mirror_roles: vec![Role::admin()],
            command_buffer: 1024,
            logging: LoggingConfig::default(),
        }
    }
}

/// Free: volume every 15 minutes. Pro: everything every 5 minutes.
/// Elite: everything, immediately.
pub fn standard_tiers() -> Vec<TierPolicyConfig> {
    vec![
        TierPolicyConfig::new(
            Tier::Free,
            Cadence::Interval(Interval::FIFTEEN_MINUTES),
            vec![AlertKind::Volume],
        ),
        TierPolicyConfig::new(
            Tier::Pro,
            Cadence::Interval(Interval::FIVE_MINUTES),
            vec![AlertKind::Volume, AlertKind::OpenInterest],
        ),
        TierPolicyConfig::new(
            Tier::Elite,
            Cadence::Immediate,
            vec![AlertKind::Volume, AlertKind::OpenInterest],
        ),
    ]
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(raw: &str) -> AlertcastResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|e| AlertcastError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> AlertcastResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AlertcastError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Apply `ALERTCAST_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> AlertcastResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> AlertcastResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_SCHEDULER_MODE) {
            self.scheduler.mode = mode.parse()?;
        }
        if let Some(tick) = lookup(ENV_TICK_INTERVAL) {
            self.scheduler.tick_interval = parse_duration(ENV_TICK_INTERVAL, &tick)?;
        }
        if let Some(tolerance) = lookup(ENV_BOUNDARY_TOLERANCE) {
            self.scheduler.boundary_tolerance = parse_duration(ENV_BOUNDARY_TOLERANCE, &tolerance)?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse::<LogFormat>()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> AlertcastResult<()> {
        if self.scheduler.tick_interval.is_zero() {
            return Err(AlertcastError::InvalidConfig("tick interval must be non-zero".into()));
        }
        if self.command_buffer == 0 {
            return Err(AlertcastError::InvalidConfig("command buffer must be non-zero".into()));
        }

        TierPolicyTable::from_config(&self.tiers).map(drop)
    }
}

fn parse_duration(key: &str, raw: &str) -> AlertcastResult<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| AlertcastError::InvalidConfig(format!("{}='{}': {}", key, raw, e)))
}

mod humantime_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
