//! The engine: advances the simulated date one day at a time.
//!
//! The engine owns the shared [`Kiosk`], the [`ParameterProvider`], the
//! [`AgroManager`] and whichever soil and crop components currently
//! exist. Lifecycle signals travel through a [`Dispatcher`] whose
//! handlers operate on [`EngineState`]; they record what should change
//! and the engine applies it at fixed points of the day.
//!
//! # Day Sequence
//!
//! 1. Dispatch the external actions issued for the day
//! 2. Run the agro-manager (calendar-driven lifecycle signals)
//! 3. Apply pending lifecycle changes: retire a finished crop, create a
//!    started crop, stop on termination
//! 4. `calc_rates` on the crop, then the soil
//! 5. `integrate` on the crop, then the soil
//! 6. Dispatch the signals the components raised and apply the
//!    lifecycle changes they cause
//! 7. Advance the day

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use agrosim_crop::{CropError, CropModel, CropSummary, Stage};
use agrosim_kernel::{
    DayContext, DispatchError, Dispatcher, Kiosk, KioskError, Outbox, ParameterBundle, ParameterError,
    ParameterProvider, SimulationObject, Value,
};
use agrosim_soil::{SoilError, SoilModule, SoilModuleConfig};
use agrosim_types::{CropEndType, CropStart, Envelope, RunId, Signal, SignalKind, WeatherRecord};

use crate::actions::ExternalAction;
use crate::agromanager::{AgroManagementConfig, AgroManager};
use crate::calendar::CalendarError;
use crate::config::RunConfig;
use crate::operator::RunEndReason;

/// Length of one integration step (days).
const DELT: f64 = 1.0;

/// Errors raised while building or advancing the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The agro-management calendars are invalid.
    #[error("calendar error: {source}")]
    Calendar {
        /// Underlying calendar error.
        #[from]
        source: CalendarError,
    },

    /// The parameter bundle is invalid or an activation failed.
    #[error("parameter error: {source}")]
    Parameter {
        /// Underlying parameter error.
        #[from]
        source: ParameterError,
    },

    /// A registry operation failed.
    #[error("kiosk error: {source}")]
    Kiosk {
        /// Underlying registry error.
        #[from]
        source: KioskError,
    },

    /// The soil failed.
    #[error("soil error: {source}")]
    Soil {
        /// Underlying soil error.
        #[from]
        source: SoilError,
    },

    /// The crop failed.
    #[error("crop error: {source}")]
    Crop {
        /// Underlying crop error.
        #[from]
        source: CropError,
    },

    /// Dispatching a signal failed.
    #[error("dispatch error: {source}")]
    Dispatch {
        /// Underlying dispatch error.
        source: Box<DispatchError<EngineError>>,
    },

    /// A crop start arrived while a crop is still growing.
    #[error("crop start for '{crop_name}' on {day} while crop '{active}' is still active")]
    CropAlreadyActive {
        /// Day of the start signal.
        day: NaiveDate,
        /// Crop that was to be started.
        crop_name: String,
        /// Crop that is still active.
        active: String,
    },

    /// A soil start arrived while a soil is already running.
    #[error("soil start on {day} while a soil is already active")]
    SoilAlreadyActive {
        /// Day of the start signal.
        day: NaiveDate,
    },

    /// The weather record is not for the day being simulated.
    #[error("weather record for {found} supplied on {expected}")]
    WeatherDay {
        /// Day being simulated.
        expected: NaiveDate,
        /// Day of the supplied record.
        found: NaiveDate,
    },

    /// The simulation was asked to advance after it terminated.
    #[error("simulation already terminated, cannot advance to {day}")]
    Terminated {
        /// Day that was requested.
        day: NaiveDate,
    },

    /// Lifecycle changes kept producing new signals.
    #[error("lifecycle changes on {day} did not settle after {rounds} rounds")]
    Unsettled {
        /// Day of the failure.
        day: NaiveDate,
        /// Rounds attempted.
        rounds: usize,
    },

    /// The simulated date left the calendar range.
    #[error("cannot advance past {day}")]
    DateOverflow {
        /// Last representable day.
        day: NaiveDate,
    },
}

impl From<DispatchError<Self>> for EngineError {
    fn from(source: DispatchError<Self>) -> Self {
        Self::Dispatch {
            source: Box::new(source),
        }
    }
}

/// Everything needed to build, and rebuild, an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSetup {
    /// Soil campaign and crop calendar.
    pub agromanagement: AgroManagementConfig,
    /// Water and nutrient balance selection.
    pub soil: SoilModuleConfig,
    /// Site, soil and crop parameters.
    pub parameters: ParameterBundle,
    /// Published variables copied into every observation.
    pub output_variables: Vec<String>,
    /// Maximum nesting depth of re-entrant signal dispatch.
    pub recursion_limit: usize,
}

impl EngineSetup {
    /// Take the engine part of a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            agromanagement: config.agromanagement.clone(),
            soil: config.soil,
            parameters: config.parameters.clone(),
            output_variables: config.output.variables.clone(),
            recursion_limit: config.simulation.recursion_limit,
        }
    }
}

/// What an external caller sees after each day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// The day that was simulated.
    pub day: NaiveDate,
    /// Configured output variables that are currently published.
    pub values: BTreeMap<String, Value>,
    /// Phenological stage, if a crop is growing.
    pub stage: Option<Stage>,
    /// Whether the simulation terminated on this day.
    pub terminated: bool,
}

impl Observation {
    /// Scalar output `name`, if published.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_scalar)
    }
}

/// End-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Identifier of this run.
    pub run_id: RunId,
    /// First simulated day.
    pub start: NaiveDate,
    /// Last simulated day.
    pub end: NaiveDate,
    /// Number of days simulated.
    pub days_run: u64,
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// One entry per crop cycle that finished, in order.
    pub crops: Vec<CropSummary>,
    /// Closing water balance of the soil (cm), if a soil ran.
    pub water_balance_checksum: Option<f64>,
}

/// Components and bookkeeping that signal handlers act on.
#[derive(Debug)]
pub struct EngineState {
    kiosk: Kiosk,
    params: ParameterProvider,
    agromanager: AgroManager,
    soil_config: SoilModuleConfig,
    soil: Option<SoilModule>,
    crop: Option<CropModel>,
    pending_start: Option<CropStart>,
    pending_finish: bool,
    terminated: bool,
    summaries: Vec<CropSummary>,
}

impl EngineState {
    /// The shared variable registry.
    pub const fn kiosk(&self) -> &Kiosk {
        &self.kiosk
    }

    /// The parameter provider.
    pub const fn params(&self) -> &ParameterProvider {
        &self.params
    }

    /// The agro-manager.
    pub const fn agromanager(&self) -> &AgroManager {
        &self.agromanager
    }

    /// The running soil, if any.
    pub const fn soil(&self) -> Option<&SoilModule> {
        self.soil.as_ref()
    }

    /// The growing crop, if any.
    pub const fn crop(&self) -> Option<&CropModel> {
        self.crop.as_ref()
    }

    fn active_crop_name(&self) -> String {
        self.params
            .active_crop()
            .map_or_else(String::new, |(crop, _)| crop.to_owned())
    }

    // -----------------------------------------------------------------------
    // Signal handlers
    // -----------------------------------------------------------------------

    fn on_soil_start(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        let Signal::SoilStart(start) = &envelope.signal else {
            return Ok(());
        };
        let day = envelope.day;
        if self.soil.is_some() {
            return Err(EngineError::SoilAlreadyActive { day });
        }
        self.params.set_active_soil(&start.soil_name, &start.variation)?;
        let soil = SoilModule::initialize(day, &mut self.kiosk, &self.params, self.soil_config)?;
        self.soil = Some(soil);
        self.agromanager.on_soil_start();
        info!(%day, soil = %start.soil_name, variation = %start.variation, water = ?self.soil_config.water, nutrients = ?self.soil_config.nutrients, "Soil started");
        Ok(())
    }

    fn on_soil_finish(&mut self, envelope: &Envelope, outbox: &mut Outbox) -> Result<(), EngineError> {
        self.agromanager.on_soil_finish(envelope.day, outbox);
        Ok(())
    }

    fn on_crop_start(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        let Signal::CropStart(start) = &envelope.signal else {
            return Ok(());
        };
        if self.crop.is_some() || self.pending_start.is_some() {
            return Err(EngineError::CropAlreadyActive {
                day: envelope.day,
                crop_name: start.crop_name.clone(),
                active: self.active_crop_name(),
            });
        }
        debug!(day = %envelope.day, crop = %start.crop_name, "Crop start pending");
        self.pending_start = Some(start.clone());
        self.agromanager.on_crop_start();
        Ok(())
    }

    fn on_crop_finish(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        let Signal::CropFinish { reason } = envelope.signal else {
            return Ok(());
        };
        let day = envelope.day;
        if self.pending_start.take().is_some() {
            info!(%day, reason = reason.as_str(), "Crop finished before it was created");
        } else if let Some(crop) = &mut self.crop {
            crop.on_crop_finish(day, reason);
            self.pending_finish = true;
        } else {
            warn!(%day, reason = reason.as_str(), "Crop finish ignored, no crop is active");
            return Ok(());
        }
        self.agromanager.on_crop_finish();
        if let Some(soil) = &mut self.soil {
            soil.on_crop_finish();
        }
        Ok(())
    }

    fn on_crop_dormant(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        if let Some(crop) = &mut self.crop {
            crop.on_crop_dormant(&mut self.kiosk, envelope.day)?;
        }
        Ok(())
    }

    fn on_irrigate(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        let Signal::Irrigate(irrigation) = envelope.signal else {
            return Ok(());
        };
        match &mut self.soil {
            Some(soil) => {
                info!(day = %envelope.day, amount = irrigation.amount, efficiency = irrigation.efficiency, "Irrigation applied");
                soil.on_irrigate(irrigation);
            }
            None => warn!(day = %envelope.day, "Irrigation ignored, no soil is active"),
        }
        Ok(())
    }

    fn on_apply_nutrients(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        let Signal::ApplyNutrients(application) = &envelope.signal else {
            return Ok(());
        };
        match &mut self.soil {
            Some(soil) => {
                info!(
                    day = %envelope.day,
                    n = application.n_amount,
                    p = application.p_amount,
                    k = application.k_amount,
                    "Nutrients applied"
                );
                soil.on_apply_nutrients(application);
            }
            None => warn!(day = %envelope.day, "Nutrient application ignored, no soil is active"),
        }
        Ok(())
    }

    fn on_terminate(&mut self, envelope: &Envelope, _outbox: &mut Outbox) -> Result<(), EngineError> {
        info!(day = %envelope.day, "Terminate signal received");
        self.terminated = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Whether a retire or create is waiting.
    const fn has_pending_lifecycle(&self) -> bool {
        self.pending_finish || self.pending_start.is_some()
    }

    /// Retire a finished crop, then create a started one.
    fn apply_lifecycle(
        &mut self,
        day: NaiveDate,
        weather: &WeatherRecord,
        outbox: &mut Outbox,
    ) -> Result<(), EngineError> {
        if core::mem::take(&mut self.pending_finish) {
            self.retire_crop(day, outbox)?;
        }
        if let Some(start) = self.pending_start.take() {
            self.create_crop(day, weather, &start, outbox)?;
        }
        Ok(())
    }

    fn create_crop(
        &mut self,
        day: NaiveDate,
        weather: &WeatherRecord,
        start: &CropStart,
        outbox: &mut Outbox,
    ) -> Result<(), EngineError> {
        self.params
            .set_active_crop(&start.crop_name, &start.variety, start.start_type, start.end_type)?;
        if let Some(soil) = &mut self.soil {
            soil.on_crop_start(&self.params)?;
        }
        let variant = self.agromanager.kind().crop_variant();
        let mut ctx = DayContext::new(day, &mut self.kiosk, outbox);
        let crop = CropModel::initialize(&mut ctx, &self.params, variant, weather)?;
        info!(
            %day,
            crop = %start.crop_name,
            variety = %start.variety,
            start_type = start.start_type.as_str(),
            end_type = start.end_type.as_str(),
            "Crop created"
        );
        self.crop = Some(crop);
        Ok(())
    }

    /// Finalize the crop, keep its summary and remove its variables.
    fn retire_crop(&mut self, day: NaiveDate, outbox: &mut Outbox) -> Result<(), EngineError> {
        let Some(mut crop) = self.crop.take() else {
            return Ok(());
        };
        let mut ctx = DayContext::new(day, &mut self.kiosk, outbox);
        crop.finalize(&mut ctx)?;
        let summary = crop.summary();
        let removed = self.kiosk.unpublish(crop.id());
        self.params.clear_active_crop();
        info!(
            %day,
            crop = %summary.crop_name,
            reason = ?summary.finish_type.map(CropEndType::as_str),
            tagp = summary.tagp,
            twso = summary.twso,
            removed,
            "Crop retired"
        );
        self.summaries.push(summary);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Two-phase step
    // -----------------------------------------------------------------------

    fn calc_rates(&mut self, day: NaiveDate, weather: &WeatherRecord, outbox: &mut Outbox) -> Result<(), EngineError> {
        let mut ctx = DayContext::new(day, &mut self.kiosk, outbox);
        if let Some(crop) = &mut self.crop {
            crop.calc_rates(&mut ctx, weather)?;
        }
        if let Some(soil) = &mut self.soil {
            soil.calc_rates(&mut ctx, weather)?;
        }
        Ok(())
    }

    fn integrate(&mut self, day: NaiveDate, outbox: &mut Outbox) -> Result<(), EngineError> {
        let mut ctx = DayContext::new(day, &mut self.kiosk, outbox);
        if let Some(crop) = &mut self.crop {
            crop.integrate(&mut ctx, DELT)?;
        }
        if let Some(soil) = &mut self.soil {
            soil.integrate(&mut ctx, DELT)?;
        }
        Ok(())
    }

    /// Rates on the whole tree, then states on the whole tree.
    fn step(&mut self, day: NaiveDate, weather: &WeatherRecord, outbox: &mut Outbox) -> Result<(), EngineError> {
        self.kiosk.begin_rates();
        let rates = self.calc_rates(day, weather, outbox);
        self.kiosk.end_rates();
        rates?;
        self.integrate(day, outbox)
    }
}

/// Connect the engine's handlers, in the order they run.
fn connect_handlers(dispatcher: &mut Dispatcher<EngineState, EngineError>) {
    dispatcher.connect(SignalKind::SoilStart, EngineState::on_soil_start);
    dispatcher.connect(SignalKind::SoilFinish, EngineState::on_soil_finish);
    dispatcher.connect(SignalKind::CropStart, EngineState::on_crop_start);
    dispatcher.connect(SignalKind::CropFinish, EngineState::on_crop_finish);
    dispatcher.connect(SignalKind::CropDormant, EngineState::on_crop_dormant);
    dispatcher.connect(SignalKind::Irrigate, EngineState::on_irrigate);
    dispatcher.connect(SignalKind::ApplyNutrients, EngineState::on_apply_nutrients);
    dispatcher.connect(SignalKind::Terminate, EngineState::on_terminate);
}

/// The simulation driver.
#[derive(Debug)]
pub struct Engine {
    setup: EngineSetup,
    run_id: RunId,
    dispatcher: Dispatcher<EngineState, EngineError>,
    state: EngineState,
    start: NaiveDate,
    day: NaiveDate,
    days_run: u64,
}

impl Engine {
    /// Validate the calendars and parameters and prepare the first day.
    ///
    /// No component exists yet: the soil is created by the `SoilStart`
    /// signal the agro-manager sends on the first day.
    pub fn new(setup: EngineSetup) -> Result<Self, EngineError> {
        let agromanager = AgroManager::new(&setup.agromanagement)?;
        let params = ParameterProvider::new(setup.parameters.clone())?;
        let start = agromanager.start_date();

        let mut dispatcher = Dispatcher::new(setup.recursion_limit);
        connect_handlers(&mut dispatcher);

        let run_id = RunId::new();
        info!(
            %run_id,
            %start,
            end = %agromanager.end_date(),
            variant = ?agromanager.kind(),
            parameters = params.len(),
            "Engine initialized"
        );

        Ok(Self {
            state: EngineState {
                kiosk: Kiosk::new(),
                params,
                agromanager,
                soil_config: setup.soil,
                soil: None,
                crop: None,
                pending_start: None,
                pending_finish: false,
                terminated: false,
                summaries: Vec::new(),
            },
            setup,
            run_id,
            dispatcher,
            start,
            day: start,
            days_run: 0,
        })
    }

    /// Build an engine from a run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, EngineError> {
        Self::new(EngineSetup::from_config(config))
    }

    /// Identifier of the current run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Next day to simulate.
    pub const fn day(&self) -> NaiveDate {
        self.day
    }

    /// First simulated day.
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Number of days simulated so far.
    pub const fn days_run(&self) -> u64 {
        self.days_run
    }

    /// Whether a `Terminate` signal has been received.
    pub const fn is_terminated(&self) -> bool {
        self.state.terminated
    }

    /// Components and registry.
    pub const fn state(&self) -> &EngineState {
        &self.state
    }

    /// Summaries of the crop cycles that have finished.
    pub fn crop_summaries(&self) -> &[CropSummary] {
        &self.state.summaries
    }

    /// Read-only snapshot of the requested published variables. Names
    /// that are not currently published are omitted.
    pub fn published<S: AsRef<str>>(&self, names: &[S]) -> BTreeMap<String, Value> {
        self.state.kiosk.snapshot(names)
    }

    /// Deliver `signal` now, stamped with the current day.
    pub fn send(&mut self, signal: Signal) -> Result<(), EngineError> {
        let envelope = Envelope::new(self.day, signal);
        self.dispatcher.send(&mut self.state, &envelope)?;
        Ok(())
    }

    fn flush(&mut self, day: NaiveDate, outbox: &mut Outbox) -> Result<(), EngineError> {
        self.dispatcher.flush(&mut self.state, day, outbox)?;
        Ok(())
    }

    /// Turn an operator action into the signal it stands for.
    fn dispatch_action(&mut self, action: ExternalAction) -> Result<(), EngineError> {
        let day = self.day;
        debug!(%day, action = action.name(), "External action");
        let signal = match action {
            ExternalAction::Irrigate(irrigation) => Signal::Irrigate(irrigation),
            ExternalAction::ApplyNutrients(application) => Signal::ApplyNutrients(application),
            ExternalAction::Harvest => {
                if self.state.crop.is_none() {
                    warn!(%day, "Harvest ignored, no crop is active");
                    return Ok(());
                }
                Signal::CropFinish {
                    reason: CropEndType::Harvest,
                }
            }
            ExternalAction::Plant => {
                let Some(signal) = self.state.agromanager.plant_signal() else {
                    warn!(%day, "Plant ignored, no crop calendar is configured");
                    return Ok(());
                };
                signal
            }
        };
        self.send(signal)
    }

    /// Apply lifecycle changes until no handler asks for more.
    fn settle(&mut self, day: NaiveDate, weather: &WeatherRecord) -> Result<(), EngineError> {
        let rounds = self.setup.recursion_limit.max(1);
        for _ in 0..rounds {
            if !self.state.has_pending_lifecycle() {
                return Ok(());
            }
            let mut outbox = Outbox::new();
            self.state.apply_lifecycle(day, weather, &mut outbox)?;
            self.flush(day, &mut outbox)?;
        }
        if self.state.has_pending_lifecycle() {
            return Err(EngineError::Unsettled { day, rounds });
        }
        Ok(())
    }

    /// Simulate the current day and move to the next.
    ///
    /// `actions` are consumed before the agro-manager runs and before any
    /// rates are computed.
    pub fn advance_one_day(
        &mut self,
        weather: &WeatherRecord,
        actions: &[ExternalAction],
    ) -> Result<Observation, EngineError> {
        let day = self.day;
        if self.state.terminated {
            return Err(EngineError::Terminated { day });
        }
        if weather.day != day {
            return Err(EngineError::WeatherDay {
                expected: day,
                found: weather.day,
            });
        }

        for action in actions {
            self.dispatch_action(*action)?;
        }

        let mut outbox = Outbox::new();
        self.state.agromanager.run(day, &mut outbox);
        self.flush(day, &mut outbox)?;
        self.settle(day, weather)?;

        if !self.state.terminated {
            self.state.step(day, weather, &mut outbox)?;
            self.flush(day, &mut outbox)?;
            self.settle(day, weather)?;
        }

        let observation = Observation {
            day,
            values: self.published(self.setup.output_variables.as_slice()),
            stage: self.state.crop.as_ref().map(|crop| crop.phenology().stage()),
            terminated: self.state.terminated,
        };
        self.days_run = self.days_run.saturating_add(1);
        self.day = day
            .checked_add_days(Days::new(1))
            .ok_or(EngineError::DateOverflow { day })?;
        debug!(%day, days_run = self.days_run, "Day finished");
        Ok(observation)
    }

    /// Close the run: retire a still-growing crop, check the soil
    /// balances and report.
    pub fn finalize(&mut self, end_reason: RunEndReason) -> Result<RunSummary, EngineError> {
        let last_day = self.day.pred_opt().filter(|d| *d >= self.start).unwrap_or(self.start);
        let mut outbox = Outbox::new();
        self.state.retire_crop(last_day, &mut outbox)?;

        let state = &mut self.state;
        let mut checksum = None;
        if let Some(soil) = &mut state.soil {
            checksum = Some(soil.water().checksum());
            let mut ctx = DayContext::new(last_day, &mut state.kiosk, &mut outbox);
            soil.finalize(&mut ctx)?;
        }

        let summary = RunSummary {
            run_id: self.run_id,
            start: self.start,
            end: last_day,
            days_run: self.days_run,
            end_reason,
            crops: self.state.summaries.clone(),
            water_balance_checksum: checksum,
        };
        info!(
            run_id = %summary.run_id,
            days_run = summary.days_run,
            end_reason = end_reason.as_str(),
            crops = summary.crops.len(),
            checksum = ?summary.water_balance_checksum,
            "Simulation finalized"
        );
        Ok(summary)
    }

    /// Rebuild the engine from its setup: a fresh run from the first day.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        let fresh = Self::new(self.setup.clone())?;
        info!(previous = %self.run_id, run_id = %fresh.run_id, "Engine reset");
        *self = fresh;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use agrosim_types::{Irrigation, NutrientApplication, SyntheticWeather};

    use super::*;
    use crate::agromanager::AgroManagerKind;

    /// A small but complete configuration: a four-layer loam and an
    /// annual wheat crop.
    pub(crate) const CONFIG: &str = include_str!("../../../config/agrosim.yaml");

    pub(crate) fn config() -> RunConfig {
        RunConfig::parse(CONFIG).unwrap()
    }

    fn dry_weather(config: &RunConfig, days: u32) -> Vec<WeatherRecord> {
        let generator = SyntheticWeather {
            rain_probability: 0.0,
            ..SyntheticWeather::default()
        };
        generator.generate(config.start_date(), days)
    }

    fn run_days(engine: &mut Engine, weather: &[WeatherRecord]) -> Vec<Observation> {
        weather
            .iter()
            .map_while(|w| {
                if engine.is_terminated() {
                    None
                } else {
                    Some(engine.advance_one_day(w, &[]).unwrap())
                }
            })
            .collect()
    }

    #[test]
    fn soil_is_created_on_the_first_day() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        assert!(engine.state().soil().is_none());
        let weather = dry_weather(&config, 1);
        let observation = engine.advance_one_day(weather.first().unwrap(), &[]).unwrap();
        assert!(engine.state().soil().is_some());
        assert!(observation.scalar("SM").is_some());
        assert_eq!(engine.days_run(), 1);
        assert_eq!(engine.day(), config.start_date().succ_opt().unwrap());
    }

    #[test]
    fn weather_for_another_day_is_rejected() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let weather = dry_weather(&config, 2);
        assert!(matches!(
            engine.advance_one_day(weather.last().unwrap(), &[]),
            Err(EngineError::WeatherDay { .. })
        ));
    }

    #[test]
    fn crop_is_created_on_its_start_date_and_publishes() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let start = config.agromanagement.crop_calendar.as_ref().unwrap().crop_start_date;
        let days = u32::try_from((start - config.start_date()).num_days()).unwrap() + 1;
        let observations = run_days(&mut engine, &dry_weather(&config, days));

        assert!(observations.iter().rev().skip(1).all(|o| o.stage.is_none()));
        assert!(observations.last().unwrap().stage.is_some());
        assert!(engine.state().kiosk().contains("DVS"));
        assert!(engine.state().agromanager().crop_in_cycle());
        assert_eq!(engine.state().params().active_crop(), Some(("wheat", "winter")));
    }

    #[test]
    fn external_harvest_retires_the_crop() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let start = config.agromanagement.crop_calendar.as_ref().unwrap().crop_start_date;
        let days = u32::try_from((start - config.start_date()).num_days()).unwrap() + 10;
        let weather = dry_weather(&config, days + 1);
        run_days(&mut engine, weather.get(..usize::try_from(days).unwrap()).unwrap());
        assert!(engine.state().crop().is_some());

        engine
            .advance_one_day(weather.last().unwrap(), &[ExternalAction::Harvest])
            .unwrap();
        assert!(engine.state().crop().is_none());
        assert!(!engine.state().kiosk().contains("DVS"));
        assert!(engine.state().params().active_crop().is_none());
        let summaries = engine.crop_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries.first().unwrap().finish_type, Some(CropEndType::Harvest));
    }

    #[test]
    fn harvest_without_crop_is_ignored() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let weather = dry_weather(&config, 1);
        let observation = engine
            .advance_one_day(weather.first().unwrap(), &[ExternalAction::Harvest])
            .unwrap();
        assert!(!observation.terminated);
        assert!(engine.crop_summaries().is_empty());
    }

    #[test]
    fn planting_twice_is_a_configuration_error() {
        let mut config = config();
        config.agromanagement.variant = AgroManagerKind::Plant;
        let mut engine = Engine::from_config(&config).unwrap();
        let weather = dry_weather(&config, 2);
        engine
            .advance_one_day(weather.first().unwrap(), &[ExternalAction::Plant])
            .unwrap();
        assert!(engine.state().crop().is_some());
        let err = engine
            .advance_one_day(weather.last().unwrap(), &[ExternalAction::Plant])
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Dispatch { ref source } if matches!(**source, DispatchError::Handler {
                source: EngineError::CropAlreadyActive { .. },
                ..
            })
        ));
    }

    #[test]
    fn irrigation_and_fertiliser_reach_the_soil() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let weather = dry_weather(&config, 3);
        let actions = [
            ExternalAction::Irrigate(Irrigation {
                amount: 2.0,
                efficiency: 0.75,
            }),
            ExternalAction::ApplyNutrients(NutrientApplication::nitrogen(50.0, 0.6)),
        ];
        engine.advance_one_day(weather.first().unwrap(), &[]).unwrap();
        engine.advance_one_day(weather.get(1).unwrap(), &actions).unwrap();
        engine.advance_one_day(weather.get(2).unwrap(), &[]).unwrap();

        let values = engine.published(&["TOTIRR", "SURFACE_N"]);
        assert!((values.get("TOTIRR").and_then(Value::as_scalar).unwrap() - 1.5).abs() < 1e-12);
        assert!(values.get("SURFACE_N").and_then(Value::as_scalar).unwrap() > 0.0);
    }

    #[test]
    fn soil_end_terminates_and_blocks_further_days() {
        let mut config = config();
        config.agromanagement.crop_calendar = None;
        config.agromanagement.soil_calendar.soil_end_date =
            config.start_date().checked_add_days(Days::new(5)).unwrap();
        let mut engine = Engine::from_config(&config).unwrap();
        let weather = dry_weather(&config, 10);
        let observations = run_days(&mut engine, &weather);

        assert_eq!(observations.len(), 6);
        assert!(observations.last().unwrap().terminated);
        assert!(engine.is_terminated());
        assert!(matches!(
            engine.advance_one_day(weather.get(6).unwrap(), &[]),
            Err(EngineError::Terminated { .. })
        ));

        let summary = engine.finalize(RunEndReason::Terminated).unwrap();
        assert_eq!(summary.days_run, 6);
        assert!(summary.water_balance_checksum.unwrap().abs() < 1e-4);
        assert!(summary.crops.is_empty());
    }

    #[test]
    fn reset_starts_a_fresh_run() {
        let config = config();
        let mut engine = Engine::from_config(&config).unwrap();
        let first = engine.run_id();
        let weather = dry_weather(&config, 3);
        run_days(&mut engine, &weather);
        engine.reset().unwrap();

        assert_ne!(engine.run_id(), first);
        assert_eq!(engine.days_run(), 0);
        assert_eq!(engine.day(), config.start_date());
        assert!(engine.state().soil().is_none());
        assert!(engine.state().kiosk().is_empty());
        engine.advance_one_day(weather.first().unwrap(), &[]).unwrap();
    }

    #[test]
    fn invalid_calendar_fails_at_construction() {
        let mut config = config();
        config.agromanagement.soil_calendar.soil_end_date = config.start_date();
        assert!(matches!(
            Engine::from_config(&config),
            Err(EngineError::Calendar {
                source: CalendarError::InvalidCalendar { .. }
            })
        ));
    }
}
