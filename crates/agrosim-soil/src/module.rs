//! One water balance plus one nutrient balance, advanced together.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use agrosim_kernel::{DayContext, Kiosk, ParameterProvider, SimulationObject};
use agrosim_types::{ComponentId, Irrigation, NutrientApplication, WeatherRecord};

use crate::error::SoilError;
use crate::free_drain::FreeDrainWaterBalance;
use crate::layered::LayeredWaterBalance;
use crate::nutrients::{Nutrient, SoilNutrients};
use crate::potential::PotentialWaterBalance;

/// Which water balance to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaterMode {
    /// Multi-layer solver with inter-layer flow.
    #[default]
    Layered,
    /// Classic root zone plus lower zone with free drainage.
    FreeDrain,
    /// No water limitation.
    Potential,
}

/// Which nutrients limit production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NutrientMode {
    /// N, P and K are all limiting.
    #[default]
    Full,
    /// Only nitrogen is limiting.
    Nitrogen,
    /// No nutrient limitation.
    Potential,
}

impl NutrientMode {
    /// Whether `nutrient` is simulated as a limiting pool.
    pub const fn limits(self, nutrient: Nutrient) -> bool {
        match self {
            Self::Full => true,
            Self::Nitrogen => matches!(nutrient, Nutrient::N),
            Self::Potential => false,
        }
    }
}

/// Soil module selection as written in the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilModuleConfig {
    /// Water balance variant.
    pub water: WaterMode,
    /// Nutrient balance variant.
    pub nutrients: NutrientMode,
}

/// The active water balance.
#[derive(Debug, Clone)]
pub enum WaterBalance {
    /// Multi-layer balance.
    Layered(Box<LayeredWaterBalance>),
    /// Free-drainage balance.
    FreeDrain(Box<FreeDrainWaterBalance>),
    /// Potential balance.
    Potential(PotentialWaterBalance),
}

impl WaterBalance {
    /// Build the balance selected by `mode`.
    pub fn initialize(
        mode: WaterMode,
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
    ) -> Result<Self, SoilError> {
        Ok(match mode {
            WaterMode::Layered => Self::Layered(Box::new(LayeredWaterBalance::initialize(day, kiosk, params)?)),
            WaterMode::FreeDrain => {
                Self::FreeDrain(Box::new(FreeDrainWaterBalance::initialize(day, kiosk, params)?))
            }
            WaterMode::Potential => Self::Potential(PotentialWaterBalance::initialize(day, kiosk, params)?),
        })
    }

    /// Which variant is running.
    pub const fn mode(&self) -> WaterMode {
        match self {
            Self::Layered(_) => WaterMode::Layered,
            Self::FreeDrain(_) => WaterMode::FreeDrain,
            Self::Potential(_) => WaterMode::Potential,
        }
    }

    /// Registry owner id of the running balance.
    pub fn id(&self) -> ComponentId {
        match self {
            Self::Layered(wb) => wb.id(),
            Self::FreeDrain(wb) => wb.id(),
            Self::Potential(wb) => wb.id(),
        }
    }

    /// Queue irrigation.
    pub fn on_irrigate(&mut self, irrigation: Irrigation) {
        match self {
            Self::Layered(wb) => wb.on_irrigate(irrigation.effective()),
            Self::FreeDrain(wb) => wb.on_irrigate(irrigation.amount, irrigation.effective()),
            Self::Potential(_) => {}
        }
    }

    /// A crop cycle starts with `params` holding the crop's parameters.
    pub fn on_crop_start(&mut self, params: &ParameterProvider) -> Result<(), SoilError> {
        match self {
            Self::Layered(wb) => wb.on_crop_start(params),
            Self::FreeDrain(wb) => {
                wb.on_crop_start();
                Ok(())
            }
            Self::Potential(_) => Ok(()),
        }
    }

    /// The crop cycle ended.
    pub fn on_crop_finish(&mut self) {
        if let Self::FreeDrain(wb) = self {
            wb.on_crop_finish();
        }
    }

    /// Closing balance of the whole system (cm).
    pub fn checksum(&self) -> f64 {
        match self {
            Self::Layered(wb) => wb.checksum(),
            Self::FreeDrain(wb) => wb.checksums().1,
            Self::Potential(_) => 0.0,
        }
    }
}

impl SimulationObject for WaterBalance {
    type Error = SoilError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), SoilError> {
        match self {
            Self::Layered(wb) => wb.calc_rates(ctx, weather),
            Self::FreeDrain(wb) => wb.calc_rates(ctx, weather),
            Self::Potential(wb) => wb.calc_rates(ctx, weather),
        }
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        match self {
            Self::Layered(wb) => wb.integrate(ctx, delt),
            Self::FreeDrain(wb) => wb.integrate(ctx, delt),
            Self::Potential(wb) => wb.integrate(ctx, delt),
        }
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        match self {
            Self::Layered(wb) => wb.finalize(ctx),
            Self::FreeDrain(wb) => wb.finalize(ctx),
            Self::Potential(wb) => wb.finalize(ctx),
        }
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        match self {
            Self::Layered(wb) => wb.reset(ctx),
            Self::FreeDrain(wb) => wb.reset(ctx),
            Self::Potential(wb) => wb.reset(ctx),
        }
    }
}

/// Water plus nutrient balance of one soil campaign.
#[derive(Debug, Clone)]
pub struct SoilModule {
    water: WaterBalance,
    nutrients: SoilNutrients,
}

impl SoilModule {
    /// Build both balances from the active soil parameters.
    pub fn initialize(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
        config: SoilModuleConfig,
    ) -> Result<Self, SoilError> {
        let water = WaterBalance::initialize(config.water, day, kiosk, params)?;
        let nutrients = SoilNutrients::initialize(day, kiosk, params, config.nutrients)?;
        Ok(Self { water, nutrients })
    }

    /// The water balance.
    pub const fn water(&self) -> &WaterBalance {
        &self.water
    }

    /// The nutrient balance.
    pub const fn nutrients(&self) -> &SoilNutrients {
        &self.nutrients
    }

    /// Registry owners of both balances, for retiring the soil.
    pub fn owners(&self) -> [ComponentId; 2] {
        [self.water.id(), self.nutrients.id()]
    }

    /// Route an `Irrigate` signal.
    pub fn on_irrigate(&mut self, irrigation: Irrigation) {
        self.water.on_irrigate(irrigation);
    }

    /// Route an `ApplyNutrients` signal.
    pub fn on_apply_nutrients(&mut self, application: &NutrientApplication) {
        self.nutrients.on_apply_nutrients(application);
    }

    /// Route a `CropStart` signal.
    pub fn on_crop_start(&mut self, params: &ParameterProvider) -> Result<(), SoilError> {
        self.water.on_crop_start(params)
    }

    /// Route a `CropFinish` signal.
    pub fn on_crop_finish(&mut self) {
        self.water.on_crop_finish();
    }
}

impl SimulationObject for SoilModule {
    type Error = SoilError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), SoilError> {
        self.water.calc_rates(ctx, weather)?;
        self.nutrients.calc_rates(ctx, weather)
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        self.water.integrate(ctx, delt)?;
        self.nutrients.integrate(ctx, delt)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.water.finalize(ctx)?;
        self.nutrients.finalize(ctx)
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.water.reset(ctx)?;
        self.nutrients.reset(ctx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_kernel::{Outbox, ParameterBundle};

    use super::*;

    const SOIL_YAML: &str = r"
site:
  IFUNRN: 0
  NOTINF: 0.0
  SSI: 0.0
  SSMAX: 0.5
  SMLIM: 0.3
  WAV: 10.0
  SURFACE_RELEASE_FR: 0.2
  NSOILBASE: 60.0
  NSOILBASE_FR: 0.02
  NAVAILI: 15.0
soils:
  loam:
    default:
      THICKNESS: [10.0, 20.0, 30.0, 40.0]
      SMTAB: [-1.0, 0.39, 1.0, 0.38, 2.0, 0.27, 3.0, 0.15, 4.2, 0.08, 6.0, 0.02]
      CONTAB: [-1.0, 1.5, 1.0, 0.7, 2.0, -1.0, 3.0, -3.0, 4.2, -5.8, 6.0, -9.0]
      SURFACE_CONDUCTIVITY: 50.0
    wet:
      THICKNESS: [10.0, 20.0]
      SMTAB: [-1.0, 0.39, 2.0, 0.27, 4.2, 0.08, 6.0, 0.02]
      CONTAB: [-1.0, 1.5, 2.0, -1.0, 4.2, -5.8, 6.0, -9.0]
      SURFACE_CONDUCTIVITY: 50.0
      GROUNDWATER: 1
";

    fn params(variation: &str) -> ParameterProvider {
        let bundle: ParameterBundle = serde_yml::from_str(SOIL_YAML).unwrap();
        let mut provider = ParameterProvider::new(bundle).unwrap();
        provider.set_active_soil("loam", variation).unwrap();
        provider
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 4, 15).unwrap()
    }

    #[test]
    fn layered_module_from_yaml_parameters() {
        let mut kiosk = Kiosk::new();
        let config = SoilModuleConfig {
            water: WaterMode::Layered,
            nutrients: NutrientMode::Nitrogen,
        };
        let mut soil = SoilModule::initialize(start(), &mut kiosk, &params("default"), config).unwrap();
        assert_eq!(soil.water().mode(), WaterMode::Layered);
        assert_eq!(kiosk.profile("SM_LAYERS").unwrap().len(), 4);
        assert!(kiosk.contains("NAVAIL"));

        soil.on_irrigate(Irrigation {
            amount: 2.0,
            efficiency: 0.8,
        });
        let weather = agrosim_types::SyntheticWeather::default().generate(start(), 20);
        for w in &weather {
            let mut outbox = Outbox::new();
            let mut ctx = DayContext::new(w.day, &mut kiosk, &mut outbox);
            soil.calc_rates(&mut ctx, w).unwrap();
            soil.integrate(&mut ctx, 1.0).unwrap();
        }
        assert!((kiosk.scalar("TOTIRR").unwrap() - 1.6).abs() < 1e-12);
        assert!(soil.water().checksum().abs() < 1e-6);

        let mut outbox = Outbox::new();
        let mut ctx = DayContext::new(start(), &mut kiosk, &mut outbox);
        soil.finalize(&mut ctx).unwrap();
    }

    #[test]
    fn groundwater_profiles_are_rejected() {
        let mut kiosk = Kiosk::new();
        assert!(matches!(
            SoilModule::initialize(start(), &mut kiosk, &params("wet"), SoilModuleConfig::default()),
            Err(SoilError::GroundwaterUnsupported)
        ));
    }

    #[test]
    fn config_parses_snake_case_modes() {
        let config: SoilModuleConfig = serde_yml::from_str("water: free_drain\nnutrients: potential\n").unwrap();
        assert_eq!(config.water, WaterMode::FreeDrain);
        assert_eq!(config.nutrients, NutrientMode::Potential);
        assert_eq!(SoilModuleConfig::default().water, WaterMode::Layered);
    }

    #[test]
    fn nitrogen_mode_limits_only_nitrogen() {
        assert!(NutrientMode::Nitrogen.limits(Nutrient::N));
        assert!(!NutrientMode::Nitrogen.limits(Nutrient::K));
        assert!(NutrientMode::Full.limits(Nutrient::P));
        assert!(!NutrientMode::Potential.limits(Nutrient::N));
    }
}
