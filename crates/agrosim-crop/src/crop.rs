//! The crop model composite.
//!
//! [`CropModel`] owns every crop submodel and advances them in a fixed
//! order. Rates: phenology, assimilation, evapotranspiration, nutrient
//! stress, respiration, partitioning and the carbon balance, then the
//! organs and finally the crop nutrient balance. States follow the same
//! order after phenology. While the crop is emerging or dormant only
//! phenology runs; the other submodels report zero rates and the soil
//! evaporates as if bare.
//!
//! All submodels publish under the crop's component id, so the engine
//! retires the whole crop with a single `unpublish`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use agrosim_kernel::{DayContext, Kiosk, Lifecycle, ParameterProvider, SimulationObject, VarKind};
use agrosim_types::{ComponentId, CropEndType, WeatherRecord};

use crate::age::AgeCurve;
use crate::assimilation::Assimilation;
use crate::error::CropError;
use crate::evapotranspiration::Evapotranspiration;
use crate::nutrients::{Nutrient, NutrientDrivers, NpkCropDynamics};
use crate::organs::{LeafDynamics, OrganDrivers, RootDynamics, StemDynamics, StorageOrganDynamics};
use crate::partitioning::{Partitioning, PartitioningFactors};
use crate::phenology::{Phenology, Stage};
use crate::published::{Field, Published};
use crate::respiration::{MaintenanceRespiration, OrganWeights};
use crate::stress::NpkStress;

/// Tolerance of the initial biomass and carbon balance checks.
const CHECK_TOLERANCE: f64 = 1e-4;

/// Annual or perennial crop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropVariant {
    /// One cycle from sowing or emergence to the end type.
    #[default]
    Annual,
    /// Repeated cycles separated by dormancy; parameters may vary with age.
    Perennial,
}

impl CropVariant {
    /// Whether dormancy and crop age apply.
    pub const fn is_perennial(self) -> bool {
        matches!(self, Self::Perennial)
    }

    /// Lower-case variant name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Perennial => "perennial",
        }
    }
}

/// Crop totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CropStates {
    /// Total above-ground production, living and dead (kg/ha).
    pub tagp: f64,
    /// Total gross assimilation (kg CH2O/ha).
    pub gasst: f64,
    /// Total maintenance respiration (kg CH2O/ha).
    pub mrest: f64,
    /// Total crop transpiration (cm).
    pub ctrat: f64,
    /// Total soil evaporation under the crop (cm).
    pub cevst: f64,
    /// Harvest index, set at finalize.
    pub hi: f64,
}

/// Carbon flows of the day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CropRates {
    /// Actual gross assimilation (kg CH2O/ha/day).
    pub gass: f64,
    /// Potential gross assimilation (kg CH2O/ha/day).
    pub pgass: f64,
    /// Maintenance respiration (kg CH2O/ha/day).
    pub mres: f64,
    /// Assimilates left for growth (kg CH2O/ha/day).
    pub asrc: f64,
    /// Total dry matter increase (kg/ha/day).
    pub dmi: f64,
    /// Above-ground dry matter increase (kg/ha/day).
    pub admi: f64,
}

fn state_fields() -> [Field<CropStates>; 6] {
    [
        ("TAGP", |s| s.tagp),
        ("GASST", |s| s.gasst),
        ("MREST", |s| s.mrest),
        ("CTRAT", |s| s.ctrat),
        ("CEVST", |s| s.cevst),
        ("HI", |s| s.hi),
    ]
}

fn rate_fields() -> [Field<CropRates>; 6] {
    [
        ("GASS", |r| r.gass),
        ("PGASS", |r| r.pgass),
        ("MRES", |r| r.mres),
        ("ASRC", |r| r.asrc),
        ("DMI", |r| r.dmi),
        ("ADMI", |r| r.admi),
    ]
}

/// Conversion efficiencies of assimilates into organ dry matter.
#[derive(Debug, Clone)]
struct Conversion {
    cvl: AgeCurve,
    cvs: AgeCurve,
    cvo: AgeCurve,
    cvr: AgeCurve,
}

impl Conversion {
    fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        Ok(Self {
            cvl: AgeCurve::read(params, "CVL")?,
            cvs: AgeCurve::read(params, "CVS")?,
            cvo: AgeCurve::read(params, "CVO")?,
            cvr: AgeCurve::read(params, "CVR")?,
        })
    }

    /// kg dry matter per kg CH2O for today's partitioning.
    fn factor(&self, f: &PartitioningFactors, age: u32) -> f64 {
        let above = f.fl / self.cvl.at(age) + f.fs / self.cvs.at(age) + f.fo / self.cvo.at(age);
        1.0 / above.mul_add(1.0 - f.fr, f.fr / self.cvr.at(age))
    }
}

/// Fail when assimilates are not fully accounted for by respiration and growth.
fn check_carbon_balance(
    day: NaiveDate,
    rates: &CropRates,
    cvf: f64,
    factors: &PartitioningFactors,
) -> Result<(), CropError> {
    let allocated = (factors.checksum() + 1.0) * rates.dmi / cvf;
    let checksum = (rates.gass - rates.mres - allocated) / f64::max(CHECK_TOLERANCE, rates.gass);
    if checksum.abs() >= CHECK_TOLERANCE {
        tracing::error!(%day, checksum, gass = rates.gass, mres = rates.mres, dmi = rates.dmi, cvf, "Carbon flows not balanced");
        return Err(CropError::CarbonBalance {
            day,
            checksum,
            gass: rates.gass,
            mres: rates.mres,
        });
    }
    Ok(())
}

/// End-of-cycle report of one crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropSummary {
    /// Crop name in the library.
    pub crop_name: String,
    /// Variety name.
    pub variety: String,
    /// Annual or perennial.
    pub variant: CropVariant,
    /// Stage at the end.
    pub stage: Stage,
    /// Development stage at the end.
    pub dvs: f64,
    /// Day of planting.
    pub dop: NaiveDate,
    /// Day of emergence.
    pub doe: Option<NaiveDate>,
    /// Day of anthesis.
    pub doa: Option<NaiveDate>,
    /// Day of maturity.
    pub dom: Option<NaiveDate>,
    /// Day of finish.
    pub dof: Option<NaiveDate>,
    /// Why the crop finished.
    pub finish_type: Option<CropEndType>,
    /// Total above-ground production (kg/ha).
    pub tagp: f64,
    /// Total storage organ weight (kg/ha).
    pub twso: f64,
    /// Total leaf weight (kg/ha).
    pub twlv: f64,
    /// Total stem weight (kg/ha).
    pub twst: f64,
    /// Total root weight (kg/ha).
    pub twrt: f64,
    /// Highest leaf area index.
    pub laimax: f64,
    /// Rooting depth (cm).
    pub rd: f64,
    /// Harvest index.
    pub hi: f64,
    /// Total gross assimilation (kg CH2O/ha).
    pub gasst: f64,
    /// Total maintenance respiration (kg CH2O/ha).
    pub mrest: f64,
    /// Total transpiration (cm).
    pub ctrat: f64,
    /// Total soil evaporation under the crop (cm).
    pub cevst: f64,
    /// Total N uptake (kg/ha).
    pub n_uptake: f64,
    /// Total P uptake (kg/ha).
    pub p_uptake: f64,
    /// Total K uptake (kg/ha).
    pub k_uptake: f64,
    /// Days with water stress.
    pub idwst: u32,
    /// Days with oxygen stress.
    pub idost: u32,
}

/// A WOFOST-type crop with N/P/K limitation.
#[derive(Debug, Clone)]
pub struct CropModel {
    id: ComponentId,
    lifecycle: Lifecycle,
    variant: CropVariant,
    crop_name: String,
    variety: String,
    tdwi: AgeCurve,
    conversion: Conversion,
    phenology: Phenology,
    partitioning: Partitioning,
    assimilation: Assimilation,
    respiration: MaintenanceRespiration,
    evapotranspiration: Evapotranspiration,
    roots: RootDynamics,
    stems: StemDynamics,
    storage: StorageOrganDynamics,
    leaves: LeafDynamics,
    npk: NpkCropDynamics,
    stress: NpkStress,
    /// Current totals.
    pub states: CropStates,
    /// Carbon flows of the current day.
    pub rates: CropRates,
    /// Only phenology ran in today's rates.
    resting: bool,
    finish: Option<(NaiveDate, CropEndType)>,
    published_states: Published<CropStates>,
    published_rates: Published<CropRates>,
}

impl CropModel {
    /// Build every submodel for the active crop in `params` and publish.
    ///
    /// `weather` is the record of the start day; it sets the initial
    /// bare-soil evaporation rates.
    pub fn initialize(
        ctx: &mut DayContext<'_>,
        params: &ParameterProvider,
        variant: CropVariant,
        weather: &WeatherRecord,
    ) -> Result<Self, CropError> {
        let id = ComponentId::new();
        let day = ctx.day;
        let perennial = variant.is_perennial();
        let (crop_name, variety) = params
            .active_crop()
            .map_or_else(|| (String::new(), String::new()), |(c, v)| (c.to_owned(), v.to_owned()));

        let phenology = Phenology::initialize(ctx, id, params, perennial)?;
        let (dvs, age) = (phenology.dvs(), phenology.age());
        let kiosk = &mut *ctx.kiosk;

        let partitioning = Partitioning::initialize(kiosk, id, params, dvs, age, perennial, day)?;
        let factors = partitioning.factors;
        let roots = RootDynamics::initialize(kiosk, id, params, &factors, age)?;
        let stems = StemDynamics::initialize(kiosk, id, params, &factors, dvs, age)?;
        let storage = StorageOrganDynamics::initialize(kiosk, id, params, &factors, age)?;
        let leaves = LeafDynamics::initialize(
            kiosk,
            id,
            params,
            &factors,
            dvs,
            age,
            stems.states.sai + storage.states.pai,
        )?;
        let weights = OrganWeights {
            wlv: leaves.states.wlv,
            wst: stems.states.wst,
            wrt: roots.states.wrt,
            wso: storage.states.wso,
        };
        let npk = NpkCropDynamics::initialize(kiosk, id, params, dvs, &weights)?;
        let stress = NpkStress::initialize(kiosk, id, params)?;
        let evapotranspiration = Evapotranspiration::initialize(kiosk, id, params, weather)?;

        let tdwi = AgeCurve::read(params, "TDWI")?;
        let states = CropStates {
            tagp: leaves.states.twlv + stems.states.twst + storage.states.twso,
            ..CropStates::default()
        };
        let rates = CropRates::default();
        let checksum = tdwi.at(age) - states.tagp - roots.states.twrt;
        if checksum.abs() > CHECK_TOLERANCE {
            return Err(CropError::InitialBiomass {
                tdwi: tdwi.at(age),
                checksum,
            });
        }

        tracing::info!(
            %day,
            crop = %crop_name,
            %variety,
            variant = variant.as_str(),
            stage = phenology.stage().as_str(),
            tagp = states.tagp,
            "Crop initialized"
        );

        Ok(Self {
            id,
            lifecycle: Lifecycle::active("crop"),
            variant,
            crop_name,
            variety,
            tdwi,
            conversion: Conversion::from_parameters(params)?,
            assimilation: Assimilation::initialize(params)?,
            respiration: MaintenanceRespiration::initialize(params)?,
            published_states: Published::publish(kiosk, id, VarKind::State, &state_fields(), &states)?,
            published_rates: Published::publish(kiosk, id, VarKind::Rate, &rate_fields(), &rates)?,
            phenology,
            partitioning,
            evapotranspiration,
            roots,
            stems,
            storage,
            leaves,
            npk,
            stress,
            states,
            rates,
            resting: false,
            finish: None,
        })
    }

    /// Component id every crop variable is published under.
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Annual or perennial.
    pub const fn variant(&self) -> CropVariant {
        self.variant
    }

    /// Phenology submodel.
    pub const fn phenology(&self) -> &Phenology {
        &self.phenology
    }

    /// Crop nutrient balance.
    pub const fn nutrients(&self) -> &NpkCropDynamics {
        &self.npk
    }

    /// Day and reason of finish, once received.
    pub const fn finish(&self) -> Option<(NaiveDate, CropEndType)> {
        self.finish
    }

    fn weights(&self) -> OrganWeights {
        OrganWeights {
            wlv: self.leaves.states.wlv,
            wst: self.stems.states.wst,
            wrt: self.roots.states.wrt,
            wso: self.storage.states.wso,
        }
    }

    /// Record the day and reason the crop finished.
    pub fn on_crop_finish(&mut self, day: NaiveDate, reason: CropEndType) {
        tracing::info!(%day, crop = %self.crop_name, reason = reason.as_str(), dvs = self.phenology.dvs(), "Crop finished");
        self.finish = Some((day, reason));
    }

    /// Start the dormant period of a perennial crop.
    ///
    /// Leaves, storage organs, partitioning and the nutrient balance go
    /// back to their initial values for the current age; roots and stems
    /// carry over. Totals restart from zero.
    pub fn on_crop_dormant(&mut self, kiosk: &mut Kiosk, day: NaiveDate) -> Result<(), CropError> {
        let id = self.id;
        self.phenology.on_crop_dormant(kiosk)?;
        let (dvs, age) = (self.phenology.dvs(), self.phenology.age());

        self.partitioning.reset(kiosk, id, dvs, age)?;
        let factors = self.partitioning.factors;
        self.roots.touch(kiosk, id)?;
        self.stems.touch(kiosk, id)?;
        self.storage.reset(kiosk, id, &factors, age)?;
        self.leaves
            .reset(kiosk, id, &factors, dvs, age, self.stems.states.sai + self.storage.states.pai)?;
        let weights = self.weights();
        self.npk.reset(kiosk, id, dvs, &weights)?;
        self.stress.clear_rates(kiosk, id)?;
        self.evapotranspiration.reset(kiosk, id)?;
        self.assimilation.reset();

        self.states = CropStates {
            tagp: self.leaves.states.twlv + self.stems.states.twst + self.storage.states.twso,
            ..CropStates::default()
        };
        self.rates = CropRates::default();
        self.finish = None;
        self.published_states.write(kiosk, id, &self.states)?;
        self.published_rates.write(kiosk, id, &self.rates)?;

        let checksum = self.tdwi.at(age) - self.states.tagp - self.roots.states.twrt;
        tracing::info!(%day, age, tagp = self.states.tagp, checksum, "Crop reset for dormancy");
        Ok(())
    }

    /// End-of-cycle report.
    pub fn summary(&self) -> CropSummary {
        let p = &self.phenology.states;
        CropSummary {
            crop_name: self.crop_name.clone(),
            variety: self.variety.clone(),
            variant: self.variant,
            stage: p.stage,
            dvs: p.dvs,
            dop: p.dop,
            doe: p.doe,
            doa: p.doa,
            dom: p.dom,
            dof: self.finish.map(|(day, _)| day),
            finish_type: self.finish.map(|(_, reason)| reason),
            tagp: self.states.tagp,
            twso: self.storage.states.twso,
            twlv: self.leaves.states.twlv,
            twst: self.stems.states.twst,
            twrt: self.roots.states.twrt,
            laimax: self.leaves.states.laimax,
            rd: self.roots.states.rd,
            hi: self.states.hi,
            gasst: self.states.gasst,
            mrest: self.states.mrest,
            ctrat: self.states.ctrat,
            cevst: self.states.cevst,
            n_uptake: self.npk.states(Nutrient::N).uptake_total,
            p_uptake: self.npk.states(Nutrient::P).uptake_total,
            k_uptake: self.npk.states(Nutrient::K).uptake_total,
            idwst: self.evapotranspiration.states.idwst,
            idost: self.evapotranspiration.states.idost,
        }
    }

    /// Zero rates for a day without a canopy.
    fn rest(&mut self, kiosk: &mut Kiosk, weather: &WeatherRecord) -> Result<(), CropError> {
        let id = self.id;
        self.evapotranspiration.bare_soil(kiosk, id, weather)?;
        self.stress.clear_rates(kiosk, id)?;
        self.roots.clear_rates(kiosk, id)?;
        self.stems.clear_rates(kiosk, id)?;
        self.storage.clear_rates(kiosk, id)?;
        self.leaves.clear_rates(kiosk, id)?;
        self.npk.clear_rates(kiosk, id)?;
        self.rates = CropRates::default();
        self.published_rates.write(kiosk, id, &self.rates)?;
        Ok(())
    }

    fn touch(&self, kiosk: &mut Kiosk) -> Result<(), CropError> {
        let id = self.id;
        self.roots.touch(kiosk, id)?;
        self.stems.touch(kiosk, id)?;
        self.storage.touch(kiosk, id)?;
        self.leaves.touch(kiosk, id)?;
        self.npk.touch(kiosk, id)?;
        self.published_states.write(kiosk, id, &self.states)?;
        Ok(())
    }
}

impl SimulationObject for CropModel {
    type Error = CropError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), CropError> {
        self.lifecycle.begin_rates(ctx.day)?;
        let (id, day) = (self.id, ctx.day);

        let stage = self.phenology.stage();
        self.phenology.calc_rates(ctx, weather)?;
        self.resting = stage.is_resting();
        let kiosk = &mut *ctx.kiosk;
        if self.resting {
            return self.rest(kiosk, weather);
        }

        let (dvs, age) = (self.phenology.dvs(), self.phenology.age());
        let lai = self.leaves.states.lai;
        let temp = weather.temp();

        let pgass = self.assimilation.calc_rates(weather, dvs, lai);
        let et = self.evapotranspiration.calc_rates(kiosk, id, weather, dvs, lai)?;
        let weights = self.weights();
        let indices = self.stress.calc_rates(kiosk, id, &self.npk, &weights, dvs)?;
        let gass = pgass * indices.rfnpk.min(et.rftra);
        let mres = gass.min(self.respiration.calc_rates(&weights, dvs, temp, age));
        let asrc = gass - mres;

        let surface_n = kiosk.find_scalar("SURFACE_N").unwrap_or(0.0);
        let factors = self.partitioning.calc_rates(surface_n);
        let cvf = self.conversion.factor(&factors, age);
        let dmi = cvf * asrc;
        self.rates = CropRates {
            gass,
            pgass,
            mres,
            asrc,
            dmi,
            admi: (1.0 - factors.fr) * dmi,
        };
        check_carbon_balance(day, &self.rates, cvf, &factors)?;

        let drivers = OrganDrivers {
            dvs,
            age,
            dmi,
            admi: self.rates.admi,
            factors,
            rftra: et.rftra,
            npki: indices.npki,
            temp,
        };
        self.roots.calc_rates(kiosk, id, &drivers)?;
        self.stems.calc_rates(kiosk, id, &drivers)?;
        self.storage.calc_rates(kiosk, id, &drivers)?;
        self.leaves.calc_rates(kiosk, id, &drivers)?;

        let nutrient_drivers = NutrientDrivers {
            dvs,
            rftra: et.rftra,
            weights,
            drlv: self.leaves.rates.drlv,
            drst: self.stems.rates.drst,
            drrt: self.roots.rates.drrt,
        };
        self.npk.calc_rates(kiosk, id, &nutrient_drivers)?;

        self.published_rates.write(kiosk, id, &self.rates)?;
        tracing::trace!(%day, gass, mres, dmi, rftra = et.rftra, npki = indices.npki, "Crop rates computed");
        Ok(())
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), CropError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        let (id, day) = (self.id, ctx.day);

        self.phenology.integrate(ctx, delt)?;
        let kiosk = &mut *ctx.kiosk;
        if self.resting {
            return self.touch(kiosk);
        }

        let (dvs, age) = (self.phenology.dvs(), self.phenology.age());
        self.assimilation.integrate();
        let rftra = self.evapotranspiration.rates.rftra;
        self.partitioning
            .integrate(kiosk, id, day, dvs, age, rftra, self.stress.rates.nni)?;

        self.roots.integrate(kiosk, id, delt)?;
        self.storage.integrate(kiosk, id, delt)?;
        self.stems.integrate(kiosk, id, dvs, age, delt)?;
        let other_area = self.stems.states.sai + self.storage.states.pai;
        self.leaves.integrate(kiosk, id, other_area, delt)?;
        self.npk.integrate(kiosk, id, delt)?;
        self.evapotranspiration.integrate(kiosk, id)?;

        let evs = kiosk.find_scalar("EVS").unwrap_or(0.0);
        let s = &mut self.states;
        s.tagp = self.leaves.states.twlv + self.stems.states.twst + self.storage.states.twso;
        s.gasst += self.rates.gass * delt;
        s.mrest += self.rates.mres * delt;
        s.ctrat += self.evapotranspiration.rates.tra * delt;
        s.cevst += evs * delt;
        self.published_states.write(kiosk, id, &self.states)?;
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), CropError> {
        self.lifecycle.finalize()?;
        self.phenology.finalize(ctx)?;
        let day = ctx.day;

        self.states.hi = if self.states.tagp > 0.0 {
            self.storage.states.twso / self.states.tagp
        } else {
            tracing::warn!(%day, crop = %self.crop_name, "Cannot calculate harvest index because TAGP is zero");
            -1.0
        };
        self.published_states.write(ctx.kiosk, self.id, &self.states)?;
        self.npk.check_balance(day)?;

        tracing::info!(
            %day,
            crop = %self.crop_name,
            tagp = self.states.tagp,
            twso = self.storage.states.twso,
            hi = self.states.hi,
            laimax = self.leaves.states.laimax,
            "Crop finalized"
        );
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), CropError> {
        self.lifecycle.reset();
        self.phenology.reset(ctx)?;
        let id = self.id;
        let (dvs, age) = (self.phenology.dvs(), self.phenology.age());
        let kiosk = &mut *ctx.kiosk;

        self.partitioning.reset(kiosk, id, dvs, age)?;
        let factors = self.partitioning.factors;
        self.roots.reset(kiosk, id, &factors, age)?;
        self.stems.reset(kiosk, id, &factors, dvs, age)?;
        self.storage.reset(kiosk, id, &factors, age)?;
        self.leaves
            .reset(kiosk, id, &factors, dvs, age, self.stems.states.sai + self.storage.states.pai)?;
        let weights = self.weights();
        self.npk.reset(kiosk, id, dvs, &weights)?;
        self.stress.clear_rates(kiosk, id)?;
        self.evapotranspiration.reset(kiosk, id)?;
        self.assimilation.reset();

        self.states = CropStates {
            tagp: self.leaves.states.twlv + self.stems.states.twst + self.storage.states.twso,
            ..CropStates::default()
        };
        self.rates = CropRates::default();
        self.resting = false;
        self.finish = None;
        self.published_states.write(kiosk, id, &self.states)?;
        self.published_rates.write(kiosk, id, &self.rates)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropStartType, Signal};

    use super::*;
    use crate::fixtures::{self, FakeSoil, Stepper};

    fn start(crop: &str, start_type: CropStartType, variant: CropVariant) -> (Stepper, FakeSoil, CropModel) {
        let mut stepper = Stepper::new();
        let soil = FakeSoil::new(&mut stepper.kiosk);
        let params = fixtures::provider(crop, start_type, CropEndType::Maturity);
        let weather = fixtures::weather(stepper.day, 18.0);
        let crop = stepper
            .with_context(|ctx| CropModel::initialize(ctx, &params, variant, &weather))
            .unwrap();
        (stepper, soil, crop)
    }

    fn run(stepper: &mut Stepper, crop: &mut CropModel, days: u32, temp: f64) {
        for _ in 0..days {
            let weather = fixtures::weather(stepper.day, temp);
            stepper.step(crop, &weather).unwrap();
        }
    }

    #[test]
    fn initial_biomass_is_distributed_over_the_organs() {
        let (stepper, _soil, crop) = start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        let k = &stepper.kiosk;
        let total = k.scalar("TAGP").unwrap() + k.scalar("TWRT").unwrap();
        assert!((total - 210.0).abs() < 1e-9);
        assert!(k.scalar("LAI").unwrap() > 0.0);
        assert_eq!(crop.phenology().stage(), Stage::Vegetative);
        assert!(stepper.signals.contains(&Signal::CropEmerged));
    }

    #[test]
    fn annual_crop_grows_to_maturity() {
        let (mut stepper, _soil, mut crop) = start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        run(&mut stepper, &mut crop, 110, 18.0);

        assert!(stepper.signals.contains(&Signal::CropFinish {
            reason: CropEndType::Maturity
        }));
        let k = &stepper.kiosk;
        assert!(k.scalar("TAGP").unwrap() > 1000.0);
        assert!(k.scalar("TWSO").unwrap() > 0.0);
        assert!(k.scalar("LAIMAX").unwrap() > 1.0);
        assert!(k.scalar("RD").unwrap() > 50.0);
        assert!(k.scalar("GASST").unwrap() > k.scalar("MREST").unwrap());
        assert!(k.scalar("CTRAT").unwrap() > 0.0);
        assert!(crop.nutrients().states(Nutrient::N).uptake_total > 0.0);

        crop.on_crop_finish(stepper.day, CropEndType::Maturity);
        stepper.with_context(|ctx| crop.finalize(ctx)).unwrap();
        let summary = crop.summary();
        assert!(summary.hi > 0.0 && summary.hi < 1.0);
        assert_eq!(summary.finish_type, Some(CropEndType::Maturity));
        assert_eq!(summary.dof, Some(stepper.day));
        assert!(summary.doa.is_some());
        assert_eq!(summary.crop_name, "wheat");
    }

    #[test]
    fn only_phenology_runs_while_emerging() {
        let (mut stepper, _soil, mut crop) = start(fixtures::ANNUAL, CropStartType::Sowing, CropVariant::Annual);
        let tagp = stepper.kiosk.scalar("TAGP").unwrap();
        run(&mut stepper, &mut crop, 3, 15.0);
        assert_eq!(crop.phenology().stage(), Stage::Emerging);
        assert!((stepper.kiosk.scalar("TAGP").unwrap() - tagp).abs() < f64::EPSILON);
        assert!(stepper.kiosk.scalar("TRA").unwrap().abs() < f64::EPSILON);
        assert!(stepper.kiosk.scalar("RNUPTAKE").unwrap().abs() < f64::EPSILON);

        run(&mut stepper, &mut crop, 12, 15.0);
        assert!(stepper.signals.contains(&Signal::CropEmerged));
        assert!(stepper.kiosk.scalar("TAGP").unwrap() > tagp);
    }

    #[test]
    fn rates_leave_states_untouched() {
        let (mut stepper, _soil, mut crop) = start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        run(&mut stepper, &mut crop, 10, 18.0);

        let before = stepper.kiosk.state_snapshot();
        let weather = fixtures::weather(stepper.day, 18.0);
        stepper.kiosk.begin_rates();
        stepper.with_context(|ctx| crop.calc_rates(ctx, &weather)).unwrap();
        stepper.kiosk.end_rates();
        assert_eq!(before, stepper.kiosk.state_snapshot());
    }

    #[test]
    fn dry_soil_reduces_growth() {
        let (mut wet_stepper, _wet_soil, mut wet) =
            start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        let (mut dry_stepper, dry_soil, mut dry) =
            start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        dry_soil.set(&mut dry_stepper.kiosk, "SM", 0.12);
        run(&mut wet_stepper, &mut wet, 30, 18.0);
        run(&mut dry_stepper, &mut dry, 30, 18.0);

        assert!(dry_stepper.kiosk.scalar("TAGP").unwrap() < wet_stepper.kiosk.scalar("TAGP").unwrap());
        assert!(dry.summary().idwst > 0);
        assert_eq!(wet.summary().idwst, 0);
    }

    #[test]
    fn dormancy_resets_leaves_but_keeps_roots() {
        let (mut stepper, _soil, mut crop) =
            start(fixtures::PERENNIAL, CropStartType::Emergence, CropVariant::Perennial);
        run(&mut stepper, &mut crop, 20, 18.0);
        let rd = stepper.kiosk.scalar("RD").unwrap();
        let twrt = stepper.kiosk.scalar("TWRT").unwrap();

        crop.on_crop_dormant(&mut stepper.kiosk, stepper.day).unwrap();
        let k = &stepper.kiosk;
        assert!((k.scalar("RD").unwrap() - rd).abs() < f64::EPSILON);
        assert!((k.scalar("TWRT").unwrap() - twrt).abs() < f64::EPSILON);
        assert!(k.scalar("DWLV").unwrap().abs() < f64::EPSILON);
        assert!(k.scalar("GASST").unwrap().abs() < f64::EPSILON);
        assert!(k.scalar("TSUM").unwrap().abs() < f64::EPSILON);

        // Leaves restart from TDWI at age 3 (160 kg/ha).
        let (fr, fl) = (k.scalar("FR").unwrap(), k.scalar("FL").unwrap());
        let expected = (1.0 - fr) * 160.0 * fl;
        assert!((k.scalar("WLV").unwrap() - expected).abs() < 1e-9);
        let n = crop.nutrients().states(Nutrient::N);
        assert!(n.uptake_total.abs() < f64::EPSILON);
    }

    #[test]
    fn reset_restores_the_start_of_the_cycle() {
        let (mut stepper, _soil, mut crop) = start(fixtures::ANNUAL, CropStartType::Emergence, CropVariant::Annual);
        let initial = stepper.kiosk.state_snapshot();
        run(&mut stepper, &mut crop, 15, 18.0);
        assert_ne!(initial, stepper.kiosk.state_snapshot());

        stepper.with_context(|ctx| crop.reset(ctx)).unwrap();
        let k = &stepper.kiosk;
        assert!((k.scalar("TAGP").unwrap() - initial_value(&initial, "TAGP")).abs() < 1e-9);
        assert!(k.scalar("DVS").unwrap().abs() < f64::EPSILON);
        assert!(k.scalar("GASST").unwrap().abs() < f64::EPSILON);
        run(&mut stepper, &mut crop, 1, 18.0);
    }

    fn initial_value(snapshot: &std::collections::BTreeMap<String, agrosim_kernel::Value>, name: &str) -> f64 {
        match snapshot.get(name) {
            Some(agrosim_kernel::Value::Scalar(v)) => *v,
            _ => f64::NAN,
        }
    }
}
