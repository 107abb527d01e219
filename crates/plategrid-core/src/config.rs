//! Scheduler configuration parsed from TOML.
//!
//! ```toml
//! tick_interval = "50ms"
//! max_active_source_plates = 3
//! max_active_destination_plates = 2
//! hitpick_device_type = "Bumblebee"
//! starvation_threshold = "5m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between plate scheduler passes.
    pub tick_interval: String,
    pub max_active_source_plates: usize,
    pub max_active_destination_plates: usize,
    pub max_active_workflow_plates: usize,
    /// Device type that performs the source/destination hitpick.
    pub hitpick_device_type: String,
    /// Bounded join when stopping the plate scheduler.
    pub plate_stop_timeout: String,
    /// Bounded join when stopping the robot scheduler.
    pub robot_stop_timeout: String,
    /// Report a plate as starved once its task has been unschedulable this long.
    pub starvation_threshold: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: "50ms".to_string(),
            max_active_source_plates: 3,
            max_active_destination_plates: 2,
            max_active_workflow_plates: 1,
            hitpick_device_type: "Bumblebee".to_string(),
            plate_stop_timeout: "1s".to_string(),
            robot_stop_timeout: "5s".to_string(),
            starvation_threshold: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> CoreResult<Self> {
        let config: SchedulerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that every duration string parses.
    pub fn validate(&self) -> CoreResult<()> {
        self.tick_interval()?;
        self.plate_stop_timeout()?;
        self.robot_stop_timeout()?;
        self.starvation_threshold()?;
        Ok(())
    }

    pub fn tick_interval(&self) -> CoreResult<Duration> {
        parse_duration(&self.tick_interval)
    }

    pub fn plate_stop_timeout(&self) -> CoreResult<Duration> {
        parse_duration(&self.plate_stop_timeout)
    }

    pub fn robot_stop_timeout(&self) -> CoreResult<Duration> {
        parse_duration(&self.robot_stop_timeout)
    }

    pub fn starvation_threshold(&self) -> CoreResult<Option<Duration>> {
        self.starvation_threshold
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::InvalidDuration(s.to_string());
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<f64>()
            .ok()
            .and_then(|v| Duration::try_from_secs_f64(v).ok())
            .ok_or_else(invalid)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}
