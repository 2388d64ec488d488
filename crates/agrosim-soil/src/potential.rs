//! Water balance for production without water limitation.
//!
//! The root zone is held at field capacity. Transpiration and
//! evaporation are still summed so the run summary can report them.

use chrono::NaiveDate;

use agrosim_kernel::{DayContext, Handle, Kiosk, Lifecycle, ParameterProvider, SimulationObject, VarKind};
use agrosim_types::{ComponentId, WeatherRecord};

use crate::error::SoilError;

/// Summed fluxes of the potential balance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PotentialStates {
    /// Total transpiration (cm).
    pub wtrat: f64,
    /// Total soil evaporation (cm).
    pub evst: f64,
    /// Total open water evaporation (cm).
    pub evwt: f64,
}

/// Daily fluxes of the potential balance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PotentialRates {
    /// Transpiration (cm/day).
    pub wtra: f64,
    /// Soil evaporation (cm/day).
    pub evs: f64,
    /// Open water evaporation (cm/day).
    pub evw: f64,
}

/// Water balance that keeps the soil at field capacity.
#[derive(Debug, Clone)]
pub struct PotentialWaterBalance {
    id: ComponentId,
    lifecycle: Lifecycle,
    /// Summed fluxes.
    pub states: PotentialStates,
    /// Fluxes of the current day.
    pub rates: PotentialRates,
    wtrat: Handle<f64>,
    evst: Handle<f64>,
    evwt: Handle<f64>,
    wtra: Handle<f64>,
    evs: Handle<f64>,
}

impl PotentialWaterBalance {
    /// Publish the soil constants and zeroed totals.
    ///
    /// `SMFCF`, `SMW` and `SM0` are read from the parameters.
    pub fn initialize(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
    ) -> Result<Self, SoilError> {
        let smfcf = params.number("SMFCF")?;
        let id = ComponentId::new();
        for (name, value) in [
            ("SM", smfcf),
            ("SMFCF", smfcf),
            ("SMW", params.number("SMW")?),
            ("SM0", params.number("SM0")?),
        ] {
            kiosk.publish(name, value, VarKind::State, id)?;
        }
        tracing::info!(%day, smfcf, "Potential water balance initialized");

        Ok(Self {
            id,
            lifecycle: Lifecycle::active("potential water balance"),
            states: PotentialStates::default(),
            rates: PotentialRates::default(),
            wtrat: kiosk.publish("WTRAT", 0.0, VarKind::State, id)?,
            evst: kiosk.publish("EVST", 0.0, VarKind::State, id)?,
            evwt: kiosk.publish("EVWT", 0.0, VarKind::State, id)?,
            wtra: kiosk.publish("WTRA", 0.0, VarKind::Rate, id)?,
            evs: kiosk.publish("EVS", 0.0, VarKind::Rate, id)?,
        })
    }

    /// Registry owner id of this balance.
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    fn write_states(&self, kiosk: &mut Kiosk) -> Result<(), SoilError> {
        kiosk.set(self.wtrat, self.states.wtrat, self.id)?;
        kiosk.set(self.evst, self.states.evst, self.id)?;
        kiosk.set(self.evwt, self.states.evwt, self.id)?;
        Ok(())
    }
}

impl SimulationObject for PotentialWaterBalance {
    type Error = SoilError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), SoilError> {
        self.lifecycle.begin_rates(ctx.day)?;
        self.rates = match ctx.kiosk.find_scalar("TRA") {
            Some(tra) => PotentialRates {
                wtra: tra,
                evs: ctx.kiosk.scalar("EVSMX")?,
                evw: 0.0,
            },
            None => PotentialRates {
                wtra: 0.0,
                evs: weather.es0,
                evw: 0.0,
            },
        };
        ctx.kiosk.set(self.wtra, self.rates.wtra, self.id)?;
        ctx.kiosk.set(self.evs, self.rates.evs, self.id)?;
        Ok(())
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        self.states.wtrat += self.rates.wtra * delt;
        self.states.evst += self.rates.evs * delt;
        self.states.evwt += self.rates.evw * delt;
        self.write_states(ctx.kiosk)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.finalize()?;
        tracing::info!(day = %ctx.day, wtrat = self.states.wtrat, "Potential water balance finished");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.reset();
        self.states = PotentialStates::default();
        self.rates = PotentialRates::default();
        self.write_states(ctx.kiosk)
    }
}
