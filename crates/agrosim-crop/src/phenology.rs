//! Phenological development.
//!
//! Development stage (DVS) runs from -0.1 at sowing through 0 at
//! emergence and 1 at anthesis to `DVSM` at maturity and `DVSEND` at
//! death. Progress is driven by daily thermal time compared against the
//! per-stage sums `TSUMEM`, `TSUM1`, `TSUM2` and `TSUM3`. During the
//! vegetative stage development can be slowed by day length (`IDSL >= 1`)
//! and by a vernalisation requirement (`IDSL >= 2`).
//!
//! Perennial crops add a dormant stage. Dormancy is entered after `DORM`
//! days without development, after `DCYCLEMAX` days in the cycle, or when
//! the day length drops below `MLDORM`. After `DORMCD` dormant days the
//! crop returns to sowing and starts a new cycle.
//!
//! Stage changes emit `CropEmerged`, `CropFinish` (for the configured end
//! type) and `CropDormant` through the day's outbox.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use agrosim_kernel::{DayContext, Kiosk, Lifecycle, Outbox, ParameterProvider, SimulationObject, VarKind};
use agrosim_types::weather::PHOTOPERIOD_ANGLE;
use agrosim_types::{Afgen, ComponentId, CropEndType, CropStartType, Signal, WeatherRecord, daylength, limit};

use crate::age::AGE;
use crate::error::CropError;
use crate::published::{Field, Published, count, flag};

/// DVS at sowing and after leaving dormancy.
const DVS_SOWING: f64 = -0.1;

/// DVS on the first day of dormancy.
const DVS_DORMANT: f64 = -0.2;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Phenological stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Sown, waiting for enough warm days to germinate.
    Sowing,
    /// Germinated, accumulating thermal time towards emergence.
    Emerging,
    /// Emergence to anthesis.
    Vegetative,
    /// Anthesis to maturity.
    Reproductive,
    /// Maturity to death.
    Mature,
    /// Development has ended.
    Dead,
    /// Perennial rest period.
    Dormant,
}

impl Stage {
    /// Lower-case stage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sowing => "sowing",
            Self::Emerging => "emerging",
            Self::Vegetative => "vegetative",
            Self::Reproductive => "reproductive",
            Self::Mature => "mature",
            Self::Dead => "dead",
            Self::Dormant => "dormant",
        }
    }

    /// Whether the crop has no canopy in this stage.
    pub const fn is_resting(self) -> bool {
        matches!(self, Self::Emerging | Self::Dormant)
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

fn days(params: &ParameterProvider, name: &'static str, default: Option<u32>) -> Result<u32, CropError> {
    if let Some(default) = default {
        if !params.contains(name) {
            return Ok(default);
        }
    }
    let value = params.integer(name)?;
    u32::try_from(value).map_err(|source| CropError::InvalidParameter {
        name,
        reason: format!("{value} is not a day count ({source})"),
    })
}

/// Parameters shared by annual and perennial phenology.
#[derive(Debug, Clone, PartialEq)]
pub struct PhenologyParameters {
    /// Thermal time from sowing to emergence (C day).
    pub tsumem: f64,
    /// Base temperature for emergence (C).
    pub tbasem: f64,
    /// Maximum effective temperature for emergence (C).
    pub teffmx: f64,
    /// Thermal time from emergence to anthesis (C day).
    pub tsum1: f64,
    /// Thermal time from anthesis to maturity (C day).
    pub tsum2: f64,
    /// Thermal time from maturity to death (C day).
    pub tsum3: f64,
    /// Day length sensitivity switch (`IDSL >= 1`).
    pub photoperiod: bool,
    /// Optimum day length for development (h).
    pub dlo: f64,
    /// Critical day length for development (h).
    pub dlc: f64,
    /// DVS at emergence.
    pub dvsi: f64,
    /// DVS at maturity.
    pub dvsm: f64,
    /// DVS at death.
    pub dvsend: f64,
    /// Daily thermal time as a function of temperature.
    pub dtsmtb: Afgen,
    /// Warm days needed to germinate.
    pub dtbem: u32,
    /// How the cycle starts.
    pub start_type: CropStartType,
    /// How the cycle ends.
    pub end_type: CropEndType,
}

impl PhenologyParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        let idsl = params.number("IDSL")?;
        Ok(Self {
            tsumem: params.number("TSUMEM")?,
            tbasem: params.number("TBASEM")?,
            teffmx: params.number("TEFFMX")?,
            tsum1: params.number("TSUM1")?,
            tsum2: params.number("TSUM2")?,
            tsum3: params.number("TSUM3")?,
            photoperiod: idsl >= 1.0,
            dlo: params.number("DLO")?,
            dlc: params.number("DLC")?,
            dvsi: params.number("DVSI")?,
            dvsm: params.number("DVSM")?,
            dvsend: params.number("DVSEND")?,
            dtsmtb: params.table("DTSMTB")?,
            dtbem: days(params, "DTBEM", Some(0))?,
            start_type: params.crop_start_type()?,
            end_type: params.crop_end_type()?,
        })
    }
}

/// Additional parameters of perennial crops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DormancyParameters {
    /// Days without development before dormancy.
    pub dorm: u32,
    /// Minimum days in dormancy.
    pub dormcd: u32,
    /// Crop age at the start of the run (years).
    pub agei: u32,
    /// Maximum days in one cycle before dormancy.
    pub dcyclemax: u32,
    /// Day length below which the crop goes dormant (h).
    pub mldorm: f64,
}

impl DormancyParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        Ok(Self {
            dorm: days(params, "DORM", None)?,
            dormcd: days(params, "DORMCD", None)?,
            agei: days(params, "AGEI", None)?,
            dcyclemax: days(params, "DCYCLEMAX", None)?,
            mldorm: params.number("MLDORM")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Vernalisation
// ---------------------------------------------------------------------------

/// Vernalisation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VernalisationParameters {
    /// Saturated vernalisation requirement (days).
    pub vernsat: f64,
    /// Base vernalisation requirement (days).
    pub vernbase: f64,
    /// DVS after which vernalisation is forced.
    pub verndvs: f64,
    /// Vernalisation rate as a function of temperature.
    pub vernrtb: Afgen,
}

/// Vernalisation state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VernalisationStates {
    /// Accumulated vernalisation days.
    pub vern: f64,
    /// Requirement fulfilled (or forced).
    pub vernalised: bool,
    /// Vernalisation was forced at `VERNDVS`.
    pub forced: bool,
}

/// Vernalisation rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VernalisationRates {
    /// Vernalisation rate (days/day).
    pub vernr: f64,
    /// Reduction factor on development.
    pub vernfac: f64,
    /// `VERNDVS` was passed before the requirement was met.
    pub force: bool,
}

impl Default for VernalisationRates {
    fn default() -> Self {
        Self {
            vernr: 0.0,
            vernfac: 1.0,
            force: false,
        }
    }
}

fn vernalisation_state_fields() -> [Field<VernalisationStates>; 2] {
    [("VERN", |s| s.vern), ("ISVERNALISED", |s| flag(s.vernalised))]
}

fn vernalisation_rate_fields() -> [Field<VernalisationRates>; 2] {
    [("VERNR", |r| r.vernr), ("VERNFAC", |r| r.vernfac)]
}

/// Cold requirement of winter varieties.
#[derive(Debug, Clone)]
pub struct Vernalisation {
    params: VernalisationParameters,
    /// Current state.
    pub states: VernalisationStates,
    /// Rates of the current day.
    pub rates: VernalisationRates,
    published_states: Published<VernalisationStates>,
    published_rates: Published<VernalisationRates>,
}

impl Vernalisation {
    fn initialize(kiosk: &mut Kiosk, owner: ComponentId, params: &ParameterProvider) -> Result<Self, CropError> {
        let params = VernalisationParameters {
            vernsat: params.number("VERNSAT")?,
            vernbase: params.number("VERNBASE")?,
            verndvs: params.number("VERNDVS")?,
            vernrtb: params.table("VERNRTB")?,
        };
        let states = VernalisationStates::default();
        let rates = VernalisationRates::default();
        Ok(Self {
            published_states: Published::publish(
                kiosk,
                owner,
                VarKind::State,
                &vernalisation_state_fields(),
                &states,
            )?,
            published_rates: Published::publish(
                kiosk,
                owner,
                VarKind::Rate,
                &vernalisation_rate_fields(),
                &rates,
            )?,
            params,
            states,
            rates,
        })
    }

    fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, dvs: f64, temp: f64, active: bool) -> Result<f64, CropError> {
        let p = &self.params;
        self.rates = if !active || self.states.vernalised {
            VernalisationRates::default()
        } else if dvs < p.verndvs {
            VernalisationRates {
                vernr: p.vernrtb.eval(temp),
                vernfac: limit(0.0, 1.0, (self.states.vern - p.vernbase) / (p.vernsat - p.vernbase)),
                force: false,
            }
        } else {
            VernalisationRates {
                force: true,
                ..VernalisationRates::default()
            }
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(self.rates.vernfac)
    }

    fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, day: NaiveDate, delt: f64) -> Result<(), CropError> {
        let s = &mut self.states;
        s.vern += self.rates.vernr * delt;
        s.forced |= self.rates.force;
        if s.vern >= self.params.vernsat {
            if !s.vernalised {
                tracing::info!(%day, vern = s.vern, "Vernalisation requirements reached");
            }
            s.vernalised = true;
        } else if s.forced {
            if !s.vernalised {
                tracing::info!(
                    %day,
                    vern = s.vern,
                    "Critical DVS for vernalisation reached, forcing vernalisation"
                );
            }
            s.vernalised = true;
        } else {
            s.vernalised = false;
        }
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    fn reset(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.states = VernalisationStates::default();
        self.rates = VernalisationRates::default();
        self.published_states.write(kiosk, owner, &self.states)?;
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// States and rates
// ---------------------------------------------------------------------------

/// Phenology state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhenologyStates {
    /// Current stage.
    pub stage: Stage,
    /// Development stage.
    pub dvs: f64,
    /// Thermal time since emergence (C day).
    pub tsum: f64,
    /// Thermal time towards emergence (C day).
    pub tsume: f64,
    /// Days with temperature above `TBASEM` while sown.
    pub datbe: u32,
    /// Day of planting.
    pub dop: NaiveDate,
    /// Day of emergence.
    pub doe: Option<NaiveDate>,
    /// Day of anthesis.
    pub doa: Option<NaiveDate>,
    /// Day of maturity.
    pub dom: Option<NaiveDate>,
    /// Days without development (perennial).
    pub dsng: u32,
    /// Days since dormancy started (perennial).
    pub dsd: u32,
    /// Crop age in years (perennial).
    pub age: u32,
    /// Days in the current cycle (perennial).
    pub dcycle: u32,
}

/// Phenology rates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhenologyRates {
    /// Thermal time increase towards emergence (C).
    pub dtsume: f64,
    /// Thermal time increase (C).
    pub dtsum: f64,
    /// Development rate (1/day).
    pub dvr: f64,
    /// Today counts as a warm day for germination.
    pub rdem: bool,
    /// Day length reduction factor.
    pub dvred: f64,
    /// Photoperiodic day length (h).
    pub daylp: f64,
}

fn state_fields() -> [Field<PhenologyStates>; 4] {
    [
        ("DVS", |s| s.dvs),
        ("TSUM", |s| s.tsum),
        ("TSUME", |s| s.tsume),
        ("DATBE", |s| count(s.datbe)),
    ]
}

fn cycle_fields() -> [Field<PhenologyStates>; 4] {
    [
        (AGE, |s| count(s.age)),
        ("DSNG", |s| count(s.dsng)),
        ("DSD", |s| count(s.dsd)),
        ("DCYCLE", |s| count(s.dcycle)),
    ]
}

fn rate_fields() -> [Field<PhenologyRates>; 5] {
    [
        ("DTSUME", |r| r.dtsume),
        ("DTSUM", |r| r.dtsum),
        ("DVR", |r| r.dvr),
        ("RDEM", |r| flag(r.rdem)),
        ("DVRED", |r| r.dvred),
    ]
}

// ---------------------------------------------------------------------------
// Phenology
// ---------------------------------------------------------------------------

/// Phenological development of an annual or perennial crop.
#[derive(Debug, Clone)]
pub struct Phenology {
    id: ComponentId,
    lifecycle: Lifecycle,
    params: PhenologyParameters,
    dormancy: Option<DormancyParameters>,
    vernalisation: Option<Vernalisation>,
    /// Current state.
    pub states: PhenologyStates,
    /// Rates of the current day.
    pub rates: PhenologyRates,
    initial: PhenologyStates,
    published_states: Published<PhenologyStates>,
    published_cycle: Option<Published<PhenologyStates>>,
    published_rates: Published<PhenologyRates>,
}

impl Phenology {
    /// Set the initial stage from the crop start type and publish.
    ///
    /// A crop starting at emergence announces it with `CropEmerged`
    /// right away. `perennial` enables dormancy and the age counters.
    pub fn initialize(
        ctx: &mut DayContext<'_>,
        owner: ComponentId,
        params: &ParameterProvider,
        perennial: bool,
    ) -> Result<Self, CropError> {
        let p = PhenologyParameters::from_parameters(params)?;
        let dormancy = if perennial {
            Some(DormancyParameters::from_parameters(params)?)
        } else {
            None
        };

        let (stage, dvs) = match p.start_type {
            CropStartType::Emergence => (Stage::Vegetative, p.dvsi),
            CropStartType::Sowing => (Stage::Emerging, DVS_SOWING),
            CropStartType::Dormant => (Stage::Sowing, DVS_SOWING),
        };
        if stage == Stage::Vegetative {
            ctx.outbox.send(Signal::CropEmerged);
        }
        let states = PhenologyStates {
            stage,
            dvs,
            tsum: 0.0,
            tsume: 0.0,
            datbe: 0,
            dop: ctx.day,
            doe: (stage == Stage::Vegetative).then_some(ctx.day),
            doa: None,
            dom: None,
            dsng: 0,
            dsd: 0,
            age: dormancy.map_or(0, |d| d.agei),
            dcycle: 0,
        };
        let rates = PhenologyRates::default();

        let kiosk = &mut *ctx.kiosk;
        let published_states = Published::publish(kiosk, owner, VarKind::State, &state_fields(), &states)?;
        let published_cycle = match dormancy {
            Some(_) => Some(Published::publish(kiosk, owner, VarKind::State, &cycle_fields(), &states)?),
            None => None,
        };
        let published_rates = Published::publish(kiosk, owner, VarKind::Rate, &rate_fields(), &rates)?;
        let vernalisation = if params.number("IDSL")? >= 2.0 {
            Some(Vernalisation::initialize(kiosk, owner, params)?)
        } else {
            None
        };

        tracing::info!(
            day = %ctx.day,
            stage = stage.as_str(),
            dvs,
            start_type = p.start_type.as_str(),
            perennial,
            "Phenology initialized"
        );

        Ok(Self {
            id: owner,
            lifecycle: Lifecycle::active("phenology"),
            params: p,
            dormancy,
            vernalisation,
            initial: states.clone(),
            states,
            rates,
            published_states,
            published_cycle,
            published_rates,
        })
    }

    /// Current stage.
    pub const fn stage(&self) -> Stage {
        self.states.stage
    }

    /// Current development stage.
    pub const fn dvs(&self) -> f64 {
        self.states.dvs
    }

    /// Crop age in years; zero for annual crops.
    pub const fn age(&self) -> u32 {
        self.states.age
    }

    /// Whether dormancy is enabled.
    pub const fn is_perennial(&self) -> bool {
        self.dormancy.is_some()
    }

    /// Vernalisation submodel, if the crop has a cold requirement.
    pub const fn vernalisation(&self) -> Option<&Vernalisation> {
        self.vernalisation.as_ref()
    }

    /// Configured end type.
    pub const fn end_type(&self) -> CropEndType {
        self.params.end_type
    }

    /// Clear thermal time and vernalisation when dormancy starts.
    pub fn on_crop_dormant(&mut self, kiosk: &mut Kiosk) -> Result<(), CropError> {
        if let Some(vernalisation) = self.vernalisation.as_mut() {
            vernalisation.reset(kiosk, self.id)?;
        }
        self.states.tsum = 0.0;
        self.states.tsume = 0.0;
        self.rates = PhenologyRates::default();
        self.write_states(kiosk)?;
        self.published_rates.write(kiosk, self.id, &self.rates)?;
        Ok(())
    }

    fn write_states(&self, kiosk: &mut Kiosk) -> Result<(), CropError> {
        self.published_states.write(kiosk, self.id, &self.states)?;
        if let Some(cycle) = &self.published_cycle {
            cycle.write(kiosk, self.id, &self.states)?;
        }
        Ok(())
    }

    /// Move to the next stage and emit the signals attached to it.
    fn next_stage(&mut self, day: NaiveDate, outbox: &mut Outbox) -> Result<(), CropError> {
        let from = self.states.stage;
        let end_type = self.params.end_type;
        let to = match from {
            Stage::Sowing => Stage::Emerging,
            Stage::Emerging => {
                self.states.doe = Some(day);
                outbox.send(Signal::CropEmerged);
                if end_type == CropEndType::Emergence {
                    outbox.send(Signal::CropFinish { reason: end_type });
                }
                Stage::Vegetative
            }
            Stage::Vegetative => {
                self.states.doa = Some(day);
                Stage::Reproductive
            }
            Stage::Reproductive => {
                self.states.dom = Some(day);
                if end_type == CropEndType::Maturity {
                    outbox.send(Signal::CropFinish { reason: end_type });
                }
                Stage::Mature
            }
            Stage::Mature => {
                if end_type == CropEndType::Death {
                    outbox.send(Signal::CropFinish { reason: end_type });
                }
                Stage::Dead
            }
            Stage::Dead | Stage::Dormant => {
                return Err(CropError::Phenology {
                    day,
                    reason: "no next stage after death or from dormancy",
                });
            }
        };
        self.states.stage = to;
        tracing::info!(%day, from = from.as_str(), to = to.as_str(), dvs = self.states.dvs, "Phenological stage changed");
        Ok(())
    }

    fn dormancy_due(&self, dormancy: &DormancyParameters) -> bool {
        self.states.dsng >= dormancy.dorm
            || self.states.dcycle >= dormancy.dcyclemax
            || self.rates.daylp < dormancy.mldorm
    }

    fn enter_dormancy(&mut self, day: NaiveDate) {
        tracing::info!(
            %day,
            from = self.states.stage.as_str(),
            dsng = self.states.dsng,
            dcycle = self.states.dcycle,
            "Crop entering dormancy"
        );
        self.states.stage = Stage::Dormant;
    }

    /// Perennial bookkeeping and transitions.
    fn integrate_cycle(&mut self, day: NaiveDate, dormancy: &DormancyParameters, outbox: &mut Outbox) -> Result<(), CropError> {
        let s = &mut self.states;
        if day != s.dop && day.month() == s.dop.month() && day.day() == s.dop.day() {
            s.age = s.age.saturating_add(1);
            tracing::info!(%day, age = s.age, "Crop age increased");
        }
        if self.rates.dvr <= 0.0 && !matches!(s.stage, Stage::Emerging | Stage::Sowing) {
            s.dsng = s.dsng.saturating_add(1);
        } else {
            s.dsng = 0;
        }
        if !matches!(s.stage, Stage::Sowing | Stage::Dormant) {
            s.dcycle = s.dcycle.saturating_add(1);
        }

        match self.states.stage {
            Stage::Sowing | Stage::Emerging => self.integrate_stage(day, outbox)?,
            Stage::Vegetative | Stage::Reproductive | Stage::Mature => {
                self.integrate_stage(day, outbox)?;
                if self.dormancy_due(dormancy) {
                    self.enter_dormancy(day);
                }
            }
            Stage::Dead => {
                if self.states.dsng >= dormancy.dorm || self.states.dcycle >= dormancy.dcyclemax {
                    self.enter_dormancy(day);
                    self.states.dvs = DVS_SOWING;
                    self.states.dsd = 0;
                }
            }
            Stage::Dormant => {
                let s = &mut self.states;
                if s.dsd >= dormancy.dormcd {
                    s.stage = Stage::Sowing;
                    s.dvs = DVS_SOWING;
                    s.dsd = 0;
                    tracing::info!(%day, age = s.age, "Dormancy ended, new cycle sown");
                } else {
                    if s.dsd == 0 {
                        s.dcycle = 0;
                        s.dvs = DVS_DORMANT;
                        outbox.send(Signal::CropDormant);
                    }
                    s.dsd = s.dsd.saturating_add(1);
                }
            }
        }
        Ok(())
    }

    /// Threshold transitions shared by annual and perennial crops.
    fn integrate_stage(&mut self, day: NaiveDate, outbox: &mut Outbox) -> Result<(), CropError> {
        let (dvsm, dvsend, dtbem) = (self.params.dvsm, self.params.dvsend, self.params.dtbem);
        match self.states.stage {
            Stage::Sowing if self.states.datbe >= dtbem => {
                self.next_stage(day, outbox)?;
                self.states.dvs = DVS_SOWING;
                self.states.datbe = 0;
            }
            Stage::Emerging if self.states.dvs >= 0.0 => {
                self.next_stage(day, outbox)?;
                self.states.dvs = 0.0;
            }
            Stage::Vegetative if self.states.dvs >= 1.0 => {
                self.next_stage(day, outbox)?;
                self.states.dvs = 1.0;
            }
            Stage::Reproductive if self.states.dvs >= dvsm => {
                self.next_stage(day, outbox)?;
                self.states.dvs = dvsm;
            }
            Stage::Mature if self.states.dvs >= dvsend => {
                self.next_stage(day, outbox)?;
                self.states.dvs = dvsend;
            }
            _ => {}
        }
        Ok(())
    }
}

impl SimulationObject for Phenology {
    type Error = CropError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), CropError> {
        self.lifecycle.begin_rates(ctx.day)?;
        let p = &self.params;
        let temp = weather.temp();
        let stage = self.states.stage;

        let daylp = daylength(ctx.day, weather.lat, PHOTOPERIOD_ANGLE);
        let dvred = if p.photoperiod {
            limit(0.0, 1.0, (daylp - p.dlc) / (p.dlo - p.dlc))
        } else {
            1.0
        };
        let vernfac = match self.vernalisation.as_mut() {
            Some(v) => v.calc_rates(ctx.kiosk, self.id, self.states.dvs, temp, stage == Stage::Vegetative)?,
            None => 1.0,
        };

        let idle = PhenologyRates {
            dvred,
            daylp,
            ..PhenologyRates::default()
        };
        self.rates = match stage {
            Stage::Sowing => PhenologyRates {
                rdem: temp > p.tbasem,
                ..idle
            },
            Stage::Emerging => {
                let dtsume = limit(0.0, p.teffmx - p.tbasem, temp - p.tbasem);
                PhenologyRates {
                    dtsume,
                    dvr: 0.1 * dtsume / p.tsumem,
                    ..idle
                }
            }
            Stage::Vegetative => {
                let dtsum = p.dtsmtb.eval(temp) * vernfac * dvred;
                PhenologyRates {
                    dtsum,
                    dvr: dtsum / p.tsum1,
                    ..idle
                }
            }
            Stage::Reproductive => {
                let dtsum = p.dtsmtb.eval(temp);
                PhenologyRates {
                    dtsum,
                    dvr: dtsum / p.tsum2,
                    ..idle
                }
            }
            Stage::Mature => {
                let dtsum = p.dtsmtb.eval(temp);
                PhenologyRates {
                    dtsum,
                    dvr: dtsum / p.tsum3,
                    ..idle
                }
            }
            Stage::Dead | Stage::Dormant => idle,
        };
        self.published_rates.write(ctx.kiosk, self.id, &self.rates)?;
        tracing::trace!(day = %ctx.day, stage = stage.as_str(), dvr = self.rates.dvr, "Phenology rates computed");
        Ok(())
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), CropError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        let day = ctx.day;

        if self.states.stage == Stage::Vegetative {
            if let Some(v) = self.vernalisation.as_mut() {
                v.integrate(ctx.kiosk, self.id, day, delt)?;
            }
        }

        let r = self.rates;
        let s = &mut self.states;
        s.tsume += r.dtsume * delt;
        s.dvs += r.dvr * delt;
        s.tsum += r.dtsum * delt;

        match self.dormancy {
            Some(dormancy) => {
                // Warm days must be consecutive for a perennial to sprout.
                s.datbe = if r.rdem { s.datbe.saturating_add(1) } else { 0 };
                self.integrate_cycle(day, &dormancy, ctx.outbox)?;
            }
            None => {
                if r.rdem {
                    s.datbe = s.datbe.saturating_add(1);
                }
                self.integrate_stage(day, ctx.outbox)?;
            }
        }

        self.write_states(ctx.kiosk)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), CropError> {
        self.lifecycle.finalize()?;
        tracing::debug!(day = %ctx.day, stage = self.states.stage.as_str(), dvs = self.states.dvs, "Phenology finished");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), CropError> {
        self.lifecycle.reset();
        self.states = self.initial.clone();
        self.rates = PhenologyRates::default();
        if let Some(vernalisation) = self.vernalisation.as_mut() {
            vernalisation.reset(ctx.kiosk, self.id)?;
        }
        self.write_states(ctx.kiosk)?;
        self.published_rates.write(ctx.kiosk, self.id, &self.rates)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_kernel::ParamValue;

    use super::*;
    use crate::fixtures::{self, Stepper};

    fn new_crop(crop: &str, start: CropStartType, end: CropEndType, overrides: &[(&str, f64)]) -> (Stepper, Phenology) {
        let mut params = fixtures::provider(crop, start, end);
        for (name, value) in overrides {
            params.set_override(name, ParamValue::Number(*value), false).unwrap();
        }
        let mut stepper = Stepper::new();
        let owner = ComponentId::new();
        let pheno = stepper
            .with_context(|ctx| Phenology::initialize(ctx, owner, &params, crop == fixtures::PERENNIAL))
            .unwrap();
        (stepper, pheno)
    }

    fn run_days(stepper: &mut Stepper, pheno: &mut Phenology, days: u32, temp: f64) -> Vec<(NaiveDate, Stage)> {
        let mut trace = Vec::new();
        for _ in 0..days {
            let weather = fixtures::weather(stepper.day, temp);
            stepper.step(pheno, &weather).unwrap();
            trace.push((weather.day, pheno.stage()));
        }
        trace
    }

    #[test]
    fn emergence_start_announces_emergence() {
        let (stepper, pheno) = new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &[]);
        assert_eq!(pheno.stage(), Stage::Vegetative);
        assert!((pheno.dvs() - 0.0).abs() < f64::EPSILON);
        assert_eq!(stepper.signals, vec![Signal::CropEmerged]);
        assert_eq!(pheno.states.doe, Some(fixtures::start()));
    }

    #[test]
    fn sown_crop_emerges_after_tsumem() {
        let (mut stepper, mut pheno) = new_crop(fixtures::ANNUAL, CropStartType::Sowing, CropEndType::Maturity, &[]);
        assert_eq!(pheno.stage(), Stage::Emerging);
        assert!(stepper.signals.is_empty());

        // TSUMEM 120 at 12 C above TBASEM 0: ten days.
        run_days(&mut stepper, &mut pheno, 9, 12.0);
        assert_eq!(pheno.stage(), Stage::Emerging);
        run_days(&mut stepper, &mut pheno, 2, 12.0);
        assert_eq!(pheno.stage(), Stage::Vegetative);
        assert_eq!(stepper.signals, vec![Signal::CropEmerged]);
        assert!(pheno.states.tsume >= 120.0 - 1e-9);
    }

    #[test]
    fn annual_crop_reaches_maturity_and_finishes() {
        let (mut stepper, mut pheno) = new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &[]);
        stepper.signals.clear();

        // Stop on the day the finish signal goes out; the crop would be
        // removed then and never step into Dead.
        let mut stages = Vec::new();
        for _ in 0..400 {
            stages.extend(run_days(&mut stepper, &mut pheno, 1, 20.0).into_iter().map(|(_, s)| s));
            if !stepper.signals.is_empty() {
                break;
            }
        }
        assert!(stages.contains(&Stage::Reproductive));
        assert!(!stages.contains(&Stage::Dead));
        assert_eq!(pheno.stage(), Stage::Mature);
        assert!((pheno.dvs() - pheno.params.dvsm).abs() < 1e-9);
        assert!(pheno.states.doa.is_some());
        assert!(pheno.states.dom.is_some());
        assert_eq!(
            stepper.signals,
            vec![Signal::CropFinish { reason: CropEndType::Maturity }]
        );
    }

    #[test]
    fn end_type_death_finishes_at_dvsend() {
        let (mut stepper, mut pheno) = new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Death, &[]);
        run_days(&mut stepper, &mut pheno, 400, 20.0);
        assert_eq!(pheno.stage(), Stage::Dead);
        assert!(stepper.signals.contains(&Signal::CropFinish { reason: CropEndType::Death }));
        assert!(!stepper.signals.contains(&Signal::CropFinish { reason: CropEndType::Maturity }));
        let dvs = pheno.dvs();
        run_days(&mut stepper, &mut pheno, 5, 20.0);
        assert!((pheno.dvs() - dvs).abs() < f64::EPSILON);
    }

    #[test]
    fn short_days_slow_development() {
        // Spring photoperiod sits between DLC and DLO.
        let (mut sensitive_stepper, mut sensitive) = new_crop(
            fixtures::ANNUAL,
            CropStartType::Emergence,
            CropEndType::Maturity,
            &[("IDSL", 1.0), ("DLO", 20.0), ("DLC", 6.0)],
        );
        let (mut neutral_stepper, mut neutral) =
            new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &[]);
        run_days(&mut sensitive_stepper, &mut sensitive, 20, 15.0);
        run_days(&mut neutral_stepper, &mut neutral, 20, 15.0);
        assert!(sensitive.rates.dvred < 1.0);
        assert!(sensitive.dvs() < neutral.dvs());
    }

    #[test]
    fn vernalisation_holds_back_development_until_satisfied() {
        let vern = [("IDSL", 2.0), ("VERNSAT", 10.0), ("VERNBASE", 0.0), ("VERNDVS", 0.9)];
        let (mut stepper, mut pheno) =
            new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &vern);
        let (mut plain_stepper, mut plain) =
            new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &[]);

        // VERNRTB gives one vernalisation day per day at 5 C.
        run_days(&mut stepper, &mut pheno, 12, 5.0);
        run_days(&mut plain_stepper, &mut plain, 12, 5.0);
        let v = pheno.vernalisation().unwrap();
        assert!(v.states.vernalised);
        assert!(!v.states.forced);
        assert!(v.states.vern >= 10.0 - 1e-9);
        assert!(pheno.dvs() < plain.dvs());
        assert!((stepper.kiosk.scalar("ISVERNALISED").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn vernalisation_is_forced_past_verndvs() {
        let vern = [("IDSL", 2.0), ("VERNSAT", 50.0), ("VERNBASE", 10.0), ("VERNDVS", 0.0)];
        let (mut stepper, mut pheno) =
            new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &vern);
        run_days(&mut stepper, &mut pheno, 1, 20.0);
        let v = pheno.vernalisation().unwrap();
        assert!(v.states.forced);
        assert!(v.states.vernalised);
        assert!(v.states.vern < 50.0);

        run_days(&mut stepper, &mut pheno, 3, 20.0);
        assert!(pheno.vernalisation().unwrap().states.vernalised);
        assert!((stepper.kiosk.scalar("VERNFAC").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn perennial_goes_dormant_and_starts_a_new_cycle() {
        // MLDORM of 24 h sends the crop dormant on its first active day.
        let (mut stepper, mut pheno) = new_crop(
            fixtures::PERENNIAL,
            CropStartType::Emergence,
            CropEndType::MaxDuration,
            &[("MLDORM", 24.0), ("DORMCD", 3.0), ("DTBEM", 2.0)],
        );
        stepper.signals.clear();

        let trace = run_days(&mut stepper, &mut pheno, 8, 15.0);
        let stages: Vec<Stage> = trace.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Dormant,
                Stage::Dormant,
                Stage::Dormant,
                Stage::Dormant,
                Stage::Sowing,
                Stage::Sowing,
                Stage::Emerging,
                Stage::Emerging,
            ]
        );
        assert_eq!(stepper.signals, vec![Signal::CropDormant]);
        assert_eq!(pheno.states.dsd, 0);
        assert!(pheno.dvs() > DVS_SOWING);
        assert!((stepper.kiosk.scalar("DCYCLE").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn perennial_dormancy_after_days_without_development() {
        // Below the DTSMTB base temperature nothing develops.
        let (mut stepper, mut pheno) = new_crop(
            fixtures::PERENNIAL,
            CropStartType::Emergence,
            CropEndType::MaxDuration,
            &[("DORM", 5.0)],
        );
        run_days(&mut stepper, &mut pheno, 4, -5.0);
        assert_eq!(pheno.stage(), Stage::Vegetative);
        assert_eq!(pheno.states.dsng, 4);
        run_days(&mut stepper, &mut pheno, 1, -5.0);
        assert_eq!(pheno.stage(), Stage::Dormant);
    }

    #[test]
    fn perennial_ages_on_planting_anniversary() {
        let (mut stepper, mut pheno) =
            new_crop(fixtures::PERENNIAL, CropStartType::Emergence, CropEndType::MaxDuration, &[]);
        let agei = pheno.age();
        run_days(&mut stepper, &mut pheno, 365, 15.0);
        assert_eq!(pheno.age(), agei);
        run_days(&mut stepper, &mut pheno, 1, 15.0);
        let next = agei.saturating_add(1);
        assert_eq!(pheno.age(), next);
        assert!((stepper.kiosk.scalar(AGE).unwrap() - f64::from(next)).abs() < f64::EPSILON);
    }

    #[test]
    fn replay_is_deterministic() {
        let run = || {
            let (mut stepper, mut pheno) = new_crop(
                fixtures::PERENNIAL,
                CropStartType::Sowing,
                CropEndType::MaxDuration,
                &[("DCYCLEMAX", 60.0)],
            );
            let weather = agrosim_types::SyntheticWeather::default().generate(stepper.day, 300);
            let mut trace = Vec::new();
            for w in &weather {
                stepper.step(&mut pheno, w).unwrap();
                trace.push((pheno.stage(), pheno.dvs().to_bits()));
            }
            (trace, stepper.signals)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn integrate_twice_is_rejected() {
        let (mut stepper, mut pheno) =
            new_crop(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity, &[]);
        let weather = fixtures::weather(stepper.day, 10.0);
        stepper.step(&mut pheno, &weather).unwrap();
        let result = stepper.with_context(|ctx| pheno.integrate(ctx, 1.0));
        assert!(matches!(result, Err(CropError::Protocol { .. })));
    }
}
