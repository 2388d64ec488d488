//! Soil N/P/K balance.
//!
//! Each nutrient has three pools:
//!
//! - a soil pool that mineralises a fixed amount per day until empty;
//! - a surface pool that receives fertiliser (amount times recovery) and
//!   releases a fixed fraction of its content per day;
//! - the available pool that the crop takes up from.
//!
//! A nutrient that is not limiting keeps a constant available pool and
//! ignores uptake and fertiliser.

use chrono::NaiveDate;

use agrosim_kernel::{DayContext, Handle, Kiosk, Lifecycle, ParameterProvider, SimulationObject, VarKind};
use agrosim_types::{ComponentId, NutrientApplication, WeatherRecord};

use crate::error::SoilError;
use crate::module::NutrientMode;

const BALANCE_TOLERANCE: f64 = 1e-4;

/// Available amount of a non-limiting nutrient (kg/ha).
pub const UNLIMITED_AVAILABLE: f64 = 100.0;

/// One of the three macro nutrients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nutrient {
    /// Nitrogen.
    N,
    /// Phosphorus.
    P,
    /// Potassium.
    K,
}

impl Nutrient {
    /// All nutrients in N, P, K order.
    pub const ALL: [Self; 3] = [Self::N, Self::P, Self::K];

    /// Chemical symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::N => "N",
            Self::P => "P",
            Self::K => "K",
        }
    }

    const fn available_name(self) -> &'static str {
        match self {
            Self::N => "NAVAIL",
            Self::P => "PAVAIL",
            Self::K => "KAVAIL",
        }
    }

    const fn surface_name(self) -> &'static str {
        match self {
            Self::N => "SURFACE_N",
            Self::P => "SURFACE_P",
            Self::K => "SURFACE_K",
        }
    }

    const fn uptake_name(self) -> &'static str {
        match self {
            Self::N => "RNUPTAKE",
            Self::P => "RPUPTAKE",
            Self::K => "RKUPTAKE",
        }
    }

    const fn applied(self, application: &NutrientApplication) -> f64 {
        match self {
            Self::N => application.n_amount * application.n_recovery,
            Self::P => application.p_amount * application.p_recovery,
            Self::K => application.k_amount * application.k_recovery,
        }
    }
}

/// Parameters of one limiting nutrient.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PoolParameters {
    soil_base: f64,
    soil_base_fr: f64,
    available_initial: f64,
    background_supply: f64,
}

impl PoolParameters {
    fn from_parameters(params: &ParameterProvider, nutrient: Nutrient) -> Result<Self, SoilError> {
        let x = nutrient.symbol();
        Ok(Self {
            soil_base: params.number(&format!("{x}SOILBASE"))?,
            soil_base_fr: params.number(&format!("{x}SOILBASE_FR"))?,
            available_initial: params.number(&format!("{x}AVAILI"))?,
            background_supply: params.number_or(&format!("BG_{x}_SUPPLY"), 0.0)?,
        })
    }
}

/// Pools and totals of one nutrient (kg/ha).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStates {
    /// Mineralisable soil pool.
    pub soil: f64,
    /// Available pool.
    pub available: f64,
    /// Fertiliser on the surface.
    pub surface: f64,
    /// Total fertiliser recovered onto the surface.
    pub total_applied: f64,
    /// Total background supply.
    pub total_background: f64,
    /// Total crop uptake.
    pub total_uptake: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PoolRates {
    mineralised: f64,
    released: f64,
    applied: f64,
    background: f64,
    uptake: f64,
}

#[derive(Debug, Clone)]
struct Pool {
    nutrient: Nutrient,
    /// `None` when the nutrient is not limiting.
    params: Option<PoolParameters>,
    states: PoolStates,
    initial: PoolStates,
    rates: PoolRates,
    pending: f64,
    available: Handle<f64>,
    surface: Handle<f64>,
}

impl Pool {
    fn checksum(&self) -> f64 {
        let (s, i) = (&self.states, &self.initial);
        i.soil + i.available + s.total_applied + s.total_background
            - s.soil
            - s.available
            - s.surface
            - s.total_uptake
    }
}

/// Soil nutrient balance for N, P and K.
#[derive(Debug, Clone)]
pub struct SoilNutrients {
    id: ComponentId,
    lifecycle: Lifecycle,
    mode: NutrientMode,
    surface_release_fr: f64,
    pools: Vec<Pool>,
}

impl SoilNutrients {
    /// Read parameters for the limiting nutrients of `mode` and publish the pools.
    pub fn initialize(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
        mode: NutrientMode,
    ) -> Result<Self, SoilError> {
        let id = ComponentId::new();
        let surface_release_fr = if mode == NutrientMode::Potential {
            0.0
        } else {
            params.number("SURFACE_RELEASE_FR")?
        };

        let mut pools = Vec::with_capacity(Nutrient::ALL.len());
        for nutrient in Nutrient::ALL {
            let params = if mode.limits(nutrient) {
                Some(PoolParameters::from_parameters(params, nutrient)?)
            } else {
                None
            };
            let states = params.map_or(
                PoolStates {
                    available: UNLIMITED_AVAILABLE,
                    ..PoolStates::default()
                },
                |p| PoolStates {
                    soil: p.soil_base,
                    available: p.available_initial,
                    ..PoolStates::default()
                },
            );
            pools.push(Pool {
                nutrient,
                params,
                states,
                initial: states,
                rates: PoolRates::default(),
                pending: 0.0,
                available: kiosk.publish(nutrient.available_name(), states.available, VarKind::State, id)?,
                surface: kiosk.publish(nutrient.surface_name(), 0.0, VarKind::State, id)?,
            });
        }

        tracing::info!(%day, ?mode, "Soil nutrient balance initialized");
        Ok(Self {
            id,
            lifecycle: Lifecycle::active("soil nutrients"),
            mode,
            surface_release_fr,
            pools,
        })
    }

    /// Registry owner id of this balance.
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Which nutrients are limiting.
    pub const fn mode(&self) -> NutrientMode {
        self.mode
    }

    /// Current pools of `nutrient`.
    pub fn pool(&self, nutrient: Nutrient) -> PoolStates {
        self.pools
            .iter()
            .find(|p| p.nutrient == nutrient)
            .map_or_else(PoolStates::default, |p| p.states)
    }

    /// Queue a fertiliser application; non-limiting nutrients ignore it.
    pub fn on_apply_nutrients(&mut self, application: &NutrientApplication) {
        for pool in self.pools.iter_mut().filter(|p| p.params.is_some()) {
            pool.pending += pool.nutrient.applied(application);
        }
    }

    /// Closing balance per nutrient (kg/ha).
    pub fn checksums(&self) -> Vec<(Nutrient, f64)> {
        self.pools.iter().map(|p| (p.nutrient, p.checksum())).collect()
    }

    fn write_states(&self, kiosk: &mut Kiosk) -> Result<(), SoilError> {
        for pool in &self.pools {
            kiosk.set(pool.available, pool.states.available, self.id)?;
            kiosk.set(pool.surface, pool.states.surface, self.id)?;
        }
        Ok(())
    }
}

impl SimulationObject for SoilNutrients {
    type Error = SoilError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, _weather: &WeatherRecord) -> Result<(), SoilError> {
        self.lifecycle.begin_rates(ctx.day)?;
        for pool in &mut self.pools {
            let Some(p) = pool.params else {
                continue;
            };
            let s = &pool.states;
            pool.rates = PoolRates {
                mineralised: (p.soil_base_fr * p.soil_base).min(s.soil).max(0.0),
                released: self.surface_release_fr * s.surface,
                applied: core::mem::take(&mut pool.pending),
                background: p.background_supply,
                uptake: ctx.kiosk.find_scalar(pool.nutrient.uptake_name()).unwrap_or(0.0),
            };
        }
        Ok(())
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        for pool in self.pools.iter_mut().filter(|p| p.params.is_some()) {
            let (r, s) = (pool.rates, &mut pool.states);
            s.soil -= r.mineralised * delt;
            s.surface += (r.applied - r.released) * delt;
            s.available += (r.mineralised + r.released + r.background - r.uptake) * delt;
            s.total_applied += r.applied * delt;
            s.total_background += r.background * delt;
            s.total_uptake += r.uptake * delt;
        }
        self.write_states(ctx.kiosk)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.finalize()?;
        for pool in &self.pools {
            let checksum = pool.checksum();
            if checksum.abs() > BALANCE_TOLERANCE {
                return Err(SoilError::NutrientBalance {
                    nutrient: pool.nutrient.symbol(),
                    day: ctx.day,
                    checksum,
                });
            }
        }
        tracing::info!(day = %ctx.day, "Soil nutrient balance closed");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.reset();
        for pool in &mut self.pools {
            pool.states = pool.initial;
            pool.rates = PoolRates::default();
            pool.pending = 0.0;
        }
        self.write_states(ctx.kiosk)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_kernel::{Outbox, ParamValue, ParameterBundle};

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 4, 1).unwrap()
    }

    fn params() -> ParameterProvider {
        let mut bundle = ParameterBundle::default();
        for (name, value) in [
            ("NSOILBASE", 100.0),
            ("NSOILBASE_FR", 0.025),
            ("NAVAILI", 20.0),
            ("PSOILBASE", 10.0),
            ("PSOILBASE_FR", 0.025),
            ("PAVAILI", 5.0),
            ("KSOILBASE", 80.0),
            ("KSOILBASE_FR", 0.025),
            ("KAVAILI", 30.0),
            ("SURFACE_RELEASE_FR", 0.2),
        ] {
            bundle.site.insert(name.to_owned(), ParamValue::Number(value));
        }
        ParameterProvider::new(bundle).unwrap()
    }

    fn run(soil: &mut SoilNutrients, kiosk: &mut Kiosk, days: usize) {
        let weather = agrosim_types::SyntheticWeather::default().generate(day(), 1);
        let w = weather.first().unwrap();
        for _ in 0..days {
            let mut outbox = Outbox::new();
            let mut ctx = DayContext::new(day(), kiosk, &mut outbox);
            soil.calc_rates(&mut ctx, w).unwrap();
            soil.integrate(&mut ctx, 1.0).unwrap();
        }
    }

    #[test]
    fn mineralisation_stops_when_soil_pool_is_empty() {
        let mut kiosk = Kiosk::new();
        let mut soil = SoilNutrients::initialize(day(), &mut kiosk, &params(), NutrientMode::Full).unwrap();
        run(&mut soil, &mut kiosk, 50);
        let n = soil.pool(Nutrient::N);
        assert!(n.soil.abs() < 1e-9);
        assert!((n.available - 120.0).abs() < 1e-9);
        assert!((kiosk.scalar("NAVAIL").unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn fertiliser_passes_through_surface_pool() {
        let mut kiosk = Kiosk::new();
        let mut soil = SoilNutrients::initialize(day(), &mut kiosk, &params(), NutrientMode::Full).unwrap();
        let crop = ComponentId::new();
        kiosk.publish("RNUPTAKE", 0.5, VarKind::Rate, crop).unwrap();

        soil.on_apply_nutrients(&NutrientApplication::nitrogen(60.0, 0.5));
        run(&mut soil, &mut kiosk, 1);
        assert!((kiosk.scalar("SURFACE_N").unwrap() - 30.0).abs() < 1e-9);
        run(&mut soil, &mut kiosk, 1);
        assert!((soil.pool(Nutrient::N).surface - 24.0).abs() < 1e-9);

        run(&mut soil, &mut kiosk, 10);
        for (nutrient, checksum) in soil.checksums() {
            assert!(checksum.abs() < 1e-9, "{} checksum {checksum}", nutrient.symbol());
        }
        let mut outbox = Outbox::new();
        let mut ctx = DayContext::new(day(), &mut kiosk, &mut outbox);
        soil.finalize(&mut ctx).unwrap();
    }

    #[test]
    fn nitrogen_mode_keeps_p_and_k_constant() {
        let mut kiosk = Kiosk::new();
        let mut soil = SoilNutrients::initialize(day(), &mut kiosk, &params(), NutrientMode::Nitrogen).unwrap();
        let crop = ComponentId::new();
        kiosk.publish("RPUPTAKE", 1.0, VarKind::Rate, crop).unwrap();
        soil.on_apply_nutrients(&NutrientApplication {
            p_amount: 10.0,
            p_recovery: 1.0,
            ..NutrientApplication::default()
        });
        run(&mut soil, &mut kiosk, 5);
        assert!((kiosk.scalar("PAVAIL").unwrap() - UNLIMITED_AVAILABLE).abs() < f64::EPSILON);
        assert!(kiosk.scalar("SURFACE_P").unwrap().abs() < f64::EPSILON);
        assert!(soil.pool(Nutrient::N).available > 20.0);
    }

    #[test]
    fn potential_mode_needs_no_parameters() {
        let mut kiosk = Kiosk::new();
        let empty = ParameterProvider::new(ParameterBundle::default()).unwrap();
        let soil = SoilNutrients::initialize(day(), &mut kiosk, &empty, NutrientMode::Potential).unwrap();
        assert!((kiosk.scalar("KAVAIL").unwrap() - UNLIMITED_AVAILABLE).abs() < f64::EPSILON);
        assert!(soil.checksums().iter().all(|(_, c)| c.abs() < f64::EPSILON));
    }
}
