//! Potential and actual crop water use.
//!
//! The canopy intercepts part of the evaporative demand: bare-soil and
//! open-water evaporation under the canopy decline exponentially with
//! LAI, the remainder drives maximum transpiration `TRAMX`. Actual
//! transpiration is reduced when root-zone moisture drops below the
//! critical point given by the crop's depletion group `DEPNR`, and
//! optionally when the soil is close to saturation (`IOX = 1`).

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{Afgen, ComponentId, WeatherRecord, limit};

use crate::error::CropError;
use crate::published::{Field, Published, count};

/// Ratio of the global radiation to the diffuse light extinction.
const KGLOB_FACTOR: f64 = 0.75;

/// Lower bound of the maximum transpiration (cm/day).
const MIN_TRAMX: f64 = 0.000_001;

/// Water-logging days after which oxygen stress is complete.
const DSOS_FULL: f64 = 4.0;

/// Fraction of easily available soil water between field capacity and
/// wilting point.
///
/// Follows the depletion-group approach of Doorenbos et al. (1978):
/// `et0` is the potential transpiration in cm/day and `depnr` the crop
/// group number (1 sensitive to 5 drought tolerant).
pub fn sweaf(et0: f64, depnr: f64) -> f64 {
    const A: f64 = 0.76;
    const B: f64 = 1.5;
    let mut sweaf = 1.0 / B.mul_add(et0, A) - (5.0 - depnr) * 0.10;
    if depnr < 3.0 {
        sweaf += (et0 - 0.6) / (depnr * (depnr + 3.0));
    }
    limit(0.10, 0.95, sweaf)
}

/// Evapotranspiration parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EvapotranspirationParameters {
    /// Correction of the reference transpiration.
    pub cfet: f64,
    /// Crop depletion group.
    pub depnr: f64,
    /// Extinction coefficient for diffuse light by DVS.
    pub kdiftb: Afgen,
    /// Oxygen stress is simulated (`IOX = 1`, no air ducts).
    pub oxygen_stress: bool,
    /// Critical air content for root aeration (cm3/cm3).
    pub crairc: f64,
    /// Transpiration reduction by CO2, with the concentration.
    pub co2: Option<(f64, Afgen)>,
}

impl EvapotranspirationParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        let oxygen_stress = params.flag("IOX")? && !params.flag("IAIRDU")?;
        let co2 = if params.contains("CO2") {
            Some((params.number("CO2")?, params.table("CO2TRATB")?))
        } else {
            None
        };
        Ok(Self {
            cfet: params.number("CFET")?,
            depnr: params.number("DEPNR")?,
            kdiftb: params.table("KDIFTB")?,
            oxygen_stress,
            crairc: if oxygen_stress { params.number("CRAIRC")? } else { 0.0 },
            co2,
        })
    }
}

/// Daily water use rates (cm/day unless noted).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvapotranspirationRates {
    /// Maximum evaporation from a water surface under the canopy.
    pub evwmx: f64,
    /// Maximum evaporation from the soil under the canopy.
    pub evsmx: f64,
    /// Maximum transpiration.
    pub tramx: f64,
    /// Actual transpiration.
    pub tra: f64,
    /// Reduction factor for water stress.
    pub rfws: f64,
    /// Reduction factor for oxygen stress.
    pub rfos: f64,
    /// Combined transpiration reduction factor.
    pub rftra: f64,
}

impl EvapotranspirationRates {
    /// No transpiration; the soil evaporates as if bare.
    pub const fn bare_soil(weather: &WeatherRecord) -> Self {
        Self {
            evwmx: weather.e0,
            evsmx: weather.es0,
            tramx: 0.0,
            tra: 0.0,
            rfws: 1.0,
            rfos: 1.0,
            rftra: 1.0,
        }
    }
}

/// Stress day counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StressDays {
    /// Days with water stress.
    pub idwst: u32,
    /// Days with oxygen stress.
    pub idost: u32,
}

fn rate_fields() -> [Field<EvapotranspirationRates>; 7] {
    [
        ("EVWMX", |r| r.evwmx),
        ("EVSMX", |r| r.evsmx),
        ("TRAMX", |r| r.tramx),
        ("TRA", |r| r.tra),
        ("RFWS", |r| r.rfws),
        ("RFOS", |r| r.rfos),
        ("RFTRA", |r| r.rftra),
    ]
}

fn state_fields() -> [Field<StressDays>; 2] {
    [("IDWST", |s| count(s.idwst)), ("IDOST", |s| count(s.idost))]
}

/// Crop evapotranspiration and water stress.
#[derive(Debug, Clone)]
pub struct Evapotranspiration {
    params: EvapotranspirationParameters,
    /// Rates of the current day.
    pub rates: EvapotranspirationRates,
    /// Stress day counters.
    pub states: StressDays,
    published_rates: Published<EvapotranspirationRates>,
    published_states: Published<StressDays>,
}

impl Evapotranspiration {
    /// Read the parameters and publish with bare-soil rates.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        weather: &WeatherRecord,
    ) -> Result<Self, CropError> {
        let rates = EvapotranspirationRates::bare_soil(weather);
        let states = StressDays::default();
        Ok(Self {
            params: EvapotranspirationParameters::from_parameters(params)?,
            published_rates: Published::publish(kiosk, owner, VarKind::Rate, &rate_fields(), &rates)?,
            published_states: Published::publish(kiosk, owner, VarKind::State, &state_fields(), &states)?,
            rates,
            states,
        })
    }

    /// Compute today's rates from the root-zone moisture in the kiosk.
    pub fn calc_rates(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        weather: &WeatherRecord,
        dvs: f64,
        lai: f64,
    ) -> Result<EvapotranspirationRates, CropError> {
        let p = &self.params;
        let sm = kiosk.scalar("SM")?;
        let smw = kiosk.scalar("SMW")?;
        let smfcf = kiosk.scalar("SMFCF")?;
        let sm0 = kiosk.scalar("SM0")?;

        let kglob = KGLOB_FACTOR * p.kdiftb.eval(dvs);
        let ekl = (-kglob * lai).exp();
        let co2_tra = p.co2.as_ref().map_or(1.0, |(co2, table)| table.eval(*co2));
        let evwmx = weather.e0 * ekl;
        let evsmx = f64::max(0.0, weather.es0 * ekl);
        let tramx = f64::max(MIN_TRAMX, weather.et0 * p.cfet * (1.0 - ekl) * co2_tra);

        let swdep = sweaf(weather.et0 * p.cfet, p.depnr);
        let smcr = (1.0 - swdep).mul_add(smfcf - smw, smw);
        let rfws = limit(0.0, 1.0, (sm - smw) / (smcr - smw));

        let rfos = if p.oxygen_stress && lai > 0.0 {
            let dsos = kiosk.find_scalar("DSOS").unwrap_or(0.0);
            let rfosmx = limit(0.0, 1.0, (sm0 - sm) / p.crairc);
            (1.0 - f64::min(dsos, DSOS_FULL) / DSOS_FULL).mul_add(1.0 - rfosmx, rfosmx)
        } else {
            1.0
        };

        let rftra = rfws * rfos;
        self.rates = EvapotranspirationRates {
            evwmx,
            evsmx,
            tramx,
            tra: tramx * rftra,
            rfws,
            rfos,
            rftra,
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(self.rates)
    }

    /// Rates of a day without a canopy.
    pub fn bare_soil(&mut self, kiosk: &mut Kiosk, owner: ComponentId, weather: &WeatherRecord) -> Result<(), CropError> {
        self.rates = EvapotranspirationRates::bare_soil(weather);
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Count stress days.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        if self.rates.rfws < 1.0 {
            self.states.idwst = self.states.idwst.saturating_add(1);
        }
        if self.rates.rfos < 1.0 {
            self.states.idost = self.states.idost.saturating_add(1);
        }
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Clear the counters.
    pub fn reset(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.states = StressDays::default();
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }
}
