//! Simulation loop runner with operator controls.
//!
//! [`run_simulation`] drives [`Engine::advance_one_day`] until one of the
//! end conditions holds:
//!
//! - **Termination**: the engine received a `Terminate` signal
//! - **Horizon**: the configured last day has been simulated
//! - **Day limit**: `max_days` days have run
//! - **Weather**: no record exists for the next day
//! - **Operator stop**: requested through the shared [`OperatorState`]
//!
//! Stop requests and limits are checked between days only; a day that has
//! started always completes.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::actions::{ScheduledAction, actions_on};
use crate::engine::{Engine, EngineError, Observation, RunSummary};
use crate::operator::{OperatorState, RunEndReason};
use crate::weather::WeatherSeries;

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A simulated day failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: EngineError,
    },
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct RunResult {
    /// The reason the simulation ended.
    pub end_reason: RunEndReason,
    /// The observation of the last simulated day, if any.
    pub last_observation: Option<Observation>,
    /// End-of-run report from the engine.
    pub summary: RunSummary,
}

/// Callback invoked after each simulated day.
pub trait DayCallback: Send {
    /// Called after a day completes successfully.
    fn on_day(&mut self, observation: &Observation);
}

/// A no-op day callback.
pub struct NoOpCallback;

impl DayCallback for NoOpCallback {
    fn on_day(&mut self, _observation: &Observation) {}
}

/// Inputs of a run besides the engine itself.
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    /// Daily weather.
    pub weather: &'a WeatherSeries,
    /// Operator actions fixed to days.
    pub schedule: &'a [ScheduledAction],
    /// Last day to simulate.
    pub horizon: NaiveDate,
}

/// Why the loop should stop before simulating `day`, if it should.
fn stop_reason(
    engine: &Engine,
    inputs: &RunInputs<'_>,
    operator: &OperatorState,
) -> Option<RunEndReason> {
    let day = engine.day();
    if operator.is_stop_requested() {
        info!(%day, "Operator stop requested");
        return Some(RunEndReason::OperatorStop);
    }
    if operator.day_limit_reached(engine.days_run()) {
        info!(%day, max_days = operator.max_days(), "Day limit reached");
        return Some(RunEndReason::MaxDaysReached);
    }
    if day > inputs.horizon {
        info!(horizon = %inputs.horizon, "Horizon reached");
        return Some(RunEndReason::HorizonReached);
    }
    if inputs.weather.get(day).is_none() {
        warn!(%day, last = ?inputs.weather.last_day(), "No weather for the next day");
        return Some(RunEndReason::WeatherExhausted);
    }
    None
}

/// Run the simulation loop until an end condition is met, then finalize.
///
/// # Errors
///
/// Returns [`RunnerError`] if a day or the final balance checks fail.
pub fn run_simulation(
    engine: &mut Engine,
    inputs: &RunInputs<'_>,
    operator: &OperatorState,
    callback: &mut dyn DayCallback,
) -> Result<RunResult, RunnerError> {
    info!(
        start = %engine.day(),
        horizon = %inputs.horizon,
        max_days = operator.max_days(),
        scheduled_actions = inputs.schedule.len(),
        "Simulation starting"
    );

    let mut last_observation: Option<Observation> = None;
    let end_reason = loop {
        if let Some(reason) = stop_reason(engine, inputs, operator) {
            break reason;
        }
        let day = engine.day();
        let Some(weather) = inputs.weather.get(day) else {
            break RunEndReason::WeatherExhausted;
        };
        let actions = actions_on(inputs.schedule, day);
        let observation = engine.advance_one_day(weather, &actions)?;
        callback.on_day(&observation);

        let terminated = observation.terminated;
        last_observation = Some(observation);
        if terminated {
            break RunEndReason::Terminated;
        }
    };

    let summary = engine.finalize(end_reason)?;
    Ok(RunResult {
        end_reason,
        last_observation,
        summary,
    })
}

/// Log the end of a run.
pub fn log_run_end(result: &RunResult, operator: &OperatorState) {
    info!(
        reason = result.end_reason.as_str(),
        days_run = result.summary.days_run,
        last_day = %result.summary.end,
        elapsed_ms = operator.elapsed_ms(),
        "Simulation ended"
    );

    for crop in &result.summary.crops {
        info!(
            crop = %crop.crop_name,
            variety = %crop.variety,
            finish = ?crop.finish_type.map(agrosim_types::CropEndType::as_str),
            tagp = crop.tagp,
            twso = crop.twso,
            hi = crop.hi,
            "Crop result"
        );
    }
    if result.last_observation.is_none() {
        warn!("Simulation ended with no days executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Days;

    use agrosim_types::SyntheticWeather;

    use super::*;
    use crate::config::{RunConfig, SimulationBoundsConfig};
    use crate::engine::tests::config;

    struct Recorder {
        days: Vec<NaiveDate>,
    }

    impl DayCallback for Recorder {
        fn on_day(&mut self, observation: &Observation) {
            self.days.push(observation.day);
        }
    }

    struct StopAfter {
        remaining: u32,
        operator: Arc<OperatorState>,
    }

    impl DayCallback for StopAfter {
        fn on_day(&mut self, _observation: &Observation) {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.operator.request_stop();
            }
        }
    }

    fn weather(config: &RunConfig, days: u32) -> WeatherSeries {
        WeatherSeries::from_records(SyntheticWeather::default().generate(config.start_date(), days)).unwrap()
    }

    fn without_crop() -> RunConfig {
        let mut config = config();
        config.agromanagement.crop_calendar = None;
        config
    }

    #[test]
    fn runs_to_the_horizon() {
        let config = without_crop();
        let series = weather(&config, 30);
        let inputs = RunInputs {
            weather: &series,
            schedule: &[],
            horizon: config.start_date().checked_add_days(Days::new(9)).unwrap(),
        };
        let mut engine = Engine::from_config(&config).unwrap();
        let operator = OperatorState::new(&config.simulation);
        let mut recorder = Recorder { days: Vec::new() };

        let result = run_simulation(&mut engine, &inputs, &operator, &mut recorder).unwrap();
        assert_eq!(result.end_reason, RunEndReason::HorizonReached);
        assert_eq!(recorder.days.len(), 10);
        assert_eq!(result.summary.days_run, 10);
        assert_eq!(recorder.days.last().copied(), Some(inputs.horizon));
        log_run_end(&result, &operator);
    }

    #[test]
    fn day_limit_stops_the_run() {
        let config = without_crop();
        let series = weather(&config, 30);
        let inputs = RunInputs {
            weather: &series,
            schedule: &[],
            horizon: config.horizon(),
        };
        let mut engine = Engine::from_config(&config).unwrap();
        let operator = OperatorState::new(&SimulationBoundsConfig {
            max_days: 4,
            ..SimulationBoundsConfig::default()
        });
        let result = run_simulation(&mut engine, &inputs, &operator, &mut NoOpCallback).unwrap();
        assert_eq!(result.end_reason, RunEndReason::MaxDaysReached);
        assert_eq!(result.summary.days_run, 4);
    }

    #[test]
    fn missing_weather_ends_the_run() {
        let config = without_crop();
        let series = weather(&config, 3);
        let inputs = RunInputs {
            weather: &series,
            schedule: &[],
            horizon: config.horizon(),
        };
        let mut engine = Engine::from_config(&config).unwrap();
        let operator = OperatorState::new(&config.simulation);
        let result = run_simulation(&mut engine, &inputs, &operator, &mut NoOpCallback).unwrap();
        assert_eq!(result.end_reason, RunEndReason::WeatherExhausted);
        assert_eq!(result.summary.days_run, 3);
    }

    #[test]
    fn operator_stop_is_honoured_between_days() {
        let config = without_crop();
        let series = weather(&config, 30);
        let inputs = RunInputs {
            weather: &series,
            schedule: &[],
            horizon: config.horizon(),
        };
        let mut engine = Engine::from_config(&config).unwrap();
        let operator = Arc::new(OperatorState::new(&config.simulation));
        let mut callback = StopAfter {
            remaining: 5,
            operator: Arc::clone(&operator),
        };
        let result = run_simulation(&mut engine, &inputs, &operator, &mut callback).unwrap();
        assert_eq!(result.end_reason, RunEndReason::OperatorStop);
        assert_eq!(result.summary.days_run, 5);
        assert!(result.last_observation.is_some());
    }

    #[test]
    fn stop_before_the_first_day_runs_nothing() {
        let config = without_crop();
        let series = weather(&config, 3);
        let inputs = RunInputs {
            weather: &series,
            schedule: &[],
            horizon: config.horizon(),
        };
        let mut engine = Engine::from_config(&config).unwrap();
        let operator = OperatorState::new(&config.simulation);
        operator.request_stop();
        let result = run_simulation(&mut engine, &inputs, &operator, &mut NoOpCallback).unwrap();
        assert_eq!(result.summary.days_run, 0);
        assert!(result.last_observation.is_none());
        assert!(result.summary.water_balance_checksum.is_none());
    }
}
