//! Run configuration for an agrosim simulation.
//!
//! One YAML document describes a complete run: the agro-management
//! calendar, which soil balances to use, the parameter bundle (site,
//! soil library, crop library, overrides), where weather comes from,
//! scheduled operator actions, simulation bounds and logging. Everything
//! except the agro-management block has a default.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use agrosim_kernel::{DEFAULT_RECURSION_LIMIT, ParameterBundle};
use agrosim_soil::SoilModuleConfig;
use agrosim_types::SyntheticWeather;

use crate::actions::ScheduledAction;
use crate::agromanager::AgroManagementConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name.
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Soil campaign and crop calendar.
    pub agromanagement: AgroManagementConfig,

    /// Water and nutrient balance selection.
    #[serde(default)]
    pub soil: SoilModuleConfig,

    /// Site, soil and crop parameters.
    #[serde(default)]
    pub parameters: ParameterBundle,

    /// Simulation bounds.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// Variables reported each day.
    #[serde(default)]
    pub output: OutputConfig,

    /// Weather source.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Operator actions fixed to calendar days.
    #[serde(default)]
    pub actions: Vec<ScheduledAction>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RunConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not a valid run configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not a valid run
    /// configuration.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// First simulated day: the start of the soil campaign.
    pub const fn start_date(&self) -> NaiveDate {
        self.agromanagement.soil_calendar.soil_start_date
    }

    /// Last day the runner will simulate.
    ///
    /// The configured end date if set, otherwise the end of the soil
    /// campaign (on which the simulation terminates anyway).
    pub fn horizon(&self) -> NaiveDate {
        self.simulation
            .end_date
            .unwrap_or(self.agromanagement.soil_calendar.soil_end_date)
    }
}

/// Simulation bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Maximum number of days before the run ends (0 = unlimited).
    #[serde(default)]
    pub max_days: u64,

    /// Last day to simulate; defaults to the end of the soil campaign.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    /// Maximum nesting depth of re-entrant signal dispatch.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for SimulationBoundsConfig {
    fn default() -> Self {
        Self {
            max_days: 0,
            end_date: None,
            recursion_limit: default_recursion_limit(),
        }
    }
}

/// Daily output selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Published variable names copied into every observation.
    #[serde(default = "default_output_variables")]
    pub variables: Vec<String>,

    /// File receiving one JSON line per day; standard output if unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            variables: default_output_variables(),
            file: None,
        }
    }
}

/// Where weather records come from.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WeatherConfig {
    /// YAML or JSON file with a list of daily records.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Synthetic generator used when no file is given.
    #[serde(default)]
    pub synthetic: SyntheticWeather,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_run_name() -> String {
    "agrosim".to_owned()
}

const fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

fn default_output_variables() -> Vec<String> {
    ["DVS", "LAI", "TAGP", "TWSO", "SM", "NAVAIL"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_log_level() -> String {
    "info".to_owned()
}
