//! Error types for the agrosim binary.
//!
//! [`AppError`] is the top-level error type that wraps all possible
//! failure modes during startup, the run itself and writing output.

/// Top-level error for the agrosim binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: agrosim_core::ConfigError,
    },

    /// The weather file could not be loaded.
    #[error("weather error: {source}")]
    Weather {
        /// The underlying weather error.
        #[from]
        source: agrosim_core::WeatherSeriesError,
    },

    /// The engine could not be built.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: agrosim_core::EngineError,
    },

    /// The simulation run failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: agrosim_core::RunnerError,
    },

    /// Writing daily output failed.
    #[error("output error: {source}")]
    Output {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Serialising output failed.
    #[error("serialization error: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The run horizon does not fit a synthetic series.
    #[error("cannot generate weather from {start} to {end}")]
    Horizon {
        /// First simulated day.
        start: chrono::NaiveDate,
        /// Last simulated day.
        end: chrono::NaiveDate,
    },

    /// The blocking run task panicked or was cancelled.
    #[error("run task failed: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },
}
