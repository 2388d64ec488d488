//! Command-line driver for agrosim.
//!
//! Loads a run configuration, prepares the weather, and runs the
//! simulation on a blocking thread while the async side listens for
//! Ctrl-C. Daily observations are written as JSON lines.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, default `config/agrosim.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Load or generate the weather series
//! 4. Create operator state and install the Ctrl-C handler
//! 5. Build the engine and run the simulation loop
//! 6. Write the run summary and log the result

mod error;
mod output;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use agrosim_core::config::LoggingConfig;
use agrosim_core::runner::{self, RunInputs};
use agrosim_core::{Engine, OperatorState, RunConfig, WeatherSeries};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;
use crate::output::JsonLinesOutput;

/// Configuration used when no path is given.
const DEFAULT_CONFIG: &str = "config/agrosim.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = RunConfig::from_file(&config_path).map_err(AppError::from)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        path = %config_path.display(),
        name = config.name,
        start = %config.start_date(),
        horizon = %config.horizon(),
        variant = ?config.agromanagement.variant,
        water = ?config.soil.water,
        nutrients = ?config.soil.nutrients,
        "Configuration loaded"
    );

    // 3. Weather.
    let weather = load_weather(&config)?;
    info!(
        records = weather.len(),
        first = ?weather.first_day(),
        last = ?weather.last_day(),
        "Weather series ready"
    );

    // 4. Operator state.
    let operator = Arc::new(OperatorState::new(&config.simulation));
    let stop = Arc::clone(&operator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current day");
            stop.request_stop();
        }
    });

    // 5. Run on a blocking thread; the engine never leaves it.
    let out = open_output(&config)?;
    let run_operator = Arc::clone(&operator);
    let result = tokio::task::spawn_blocking(move || -> Result<_, AppError> {
        let mut engine = Engine::from_config(&config)?;
        let mut output = JsonLinesOutput::new(out);
        let inputs = RunInputs {
            weather: &weather,
            schedule: &config.actions,
            horizon: config.horizon(),
        };
        let result = runner::run_simulation(&mut engine, &inputs, &run_operator, &mut output)?;
        info!(lines = output.lines(), "Daily output written");
        output.finish(&result.summary)?;
        Ok(result)
    })
    .await
    .map_err(|e| AppError::Task {
        message: e.to_string(),
    })??;

    // 6. Log results.
    runner::log_run_end(&result, &operator);
    if let Some(checksum) = result.summary.water_balance_checksum {
        info!(checksum, "Water balance closed");
    }

    info!(
        run_id = %result.summary.run_id,
        end_reason = result.end_reason.as_str(),
        days_run = result.summary.days_run,
        "agrosim-engine shutdown complete"
    );
    Ok(())
}

/// Human-readable or JSON logs on stderr; `RUST_LOG` wins over the
/// configured level.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Read the weather file, or generate a series covering the horizon.
fn load_weather(config: &RunConfig) -> Result<WeatherSeries, AppError> {
    if let Some(path) = &config.weather.file {
        info!(path = %path.display(), "Loading weather file");
        return Ok(WeatherSeries::from_file(path)?);
    }

    let start = config.start_date();
    let end = config.horizon();
    let days = end
        .signed_duration_since(start)
        .num_days()
        .checked_add(1)
        .and_then(|days| u32::try_from(days).ok())
        .filter(|days| *days > 0)
        .ok_or(AppError::Horizon { start, end })?;
    info!(seed = config.weather.synthetic.seed, days, "Generating synthetic weather");
    Ok(WeatherSeries::from_records(
        config.weather.synthetic.generate(start, days),
    )?)
}

/// Daily output sink: the configured file or standard output.
fn open_output(config: &RunConfig) -> Result<Box<dyn Write + Send>, AppError> {
    match &config.output.file {
        Some(path) => {
            info!(path = %path.display(), "Writing daily output to file");
            Ok(Box::new(BufWriter::new(File::create(path)?)))
        }
        None => {
            if config.output.variables.is_empty() {
                warn!("No output variables configured, daily lines carry only day and stage");
            }
            Ok(Box::new(BufWriter::new(std::io::stdout())))
        }
    }
}
