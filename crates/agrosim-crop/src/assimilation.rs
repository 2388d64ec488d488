//! Canopy gross CO2 assimilation.
//!
//! Daily gross assimilation is integrated with a three-point Gaussian
//! quadrature over the daylight period and, for each of those moments,
//! over three canopy depths. Sunlit and shaded leaves are treated
//! separately, each following an exponential light response with maximum
//! `AMAX` and initial slope `EFF`. Low night temperatures reduce the daily
//! total through `TMNFTB`, applied to the 7-day running mean of `TMIN`.

use std::collections::VecDeque;

use agrosim_kernel::ParameterProvider;
use agrosim_types::{Afgen, WeatherRecord, astro};

use crate::error::CropError;

/// Gaussian points on [0, 1].
const XGAUSS: [f64; 3] = [0.112_701_7, 0.5, 0.887_298_3];

/// Gaussian weights.
const WGAUSS: [f64; 3] = [0.277_777_8, 0.444_444_4, 0.277_777_8];

/// Scattering coefficient of leaves for visible light.
const SCV: f64 = 0.2;

/// Days in the running minimum temperature.
const TMIN_WINDOW: usize = 7;

/// kg CO2 to kg CH2O.
const CO2_TO_CH2O: f64 = 30.0 / 44.0;

/// Atmospheric CO2 effect on assimilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbonDioxide {
    /// Atmospheric concentration (ppm).
    pub co2: f64,
    /// AMAX multiplier by concentration.
    pub amax: Afgen,
    /// EFF multiplier by concentration.
    pub eff: Afgen,
}

/// Assimilation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AssimilationParameters {
    /// Maximum leaf assimilation by DVS (kg CO2/ha leaf/h).
    pub amaxtb: Afgen,
    /// AMAX reduction by daytime temperature.
    pub tmpftb: Afgen,
    /// Light use efficiency by daytime temperature.
    pub efftb: Afgen,
    /// Extinction coefficient for diffuse light by DVS.
    pub kdiftb: Afgen,
    /// Reduction by 7-day mean minimum temperature.
    pub tmnftb: Afgen,
    /// Optional CO2 response.
    pub co2: Option<CarbonDioxide>,
}

impl AssimilationParameters {
    /// Read from the parameter provider. The CO2 response is used when
    /// `CO2` is given.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        let co2 = if params.contains("CO2") {
            Some(CarbonDioxide {
                co2: params.number("CO2")?,
                amax: params.table("CO2AMAXTB")?,
                eff: params.table("CO2EFFTB")?,
            })
        } else {
            None
        };
        Ok(Self {
            amaxtb: params.table("AMAXTB")?,
            tmpftb: params.table("TMPFTB")?,
            efftb: params.table("EFFTB")?,
            kdiftb: params.table("KDIFTB")?,
            tmnftb: params.table("TMNFTB")?,
            co2,
        })
    }
}

/// Instantaneous gross assimilation of the whole canopy (kg CO2/ha/h).
fn assim(amax: f64, eff: f64, lai: f64, kdif: f64, sinb: f64, pardir: f64, pardif: f64) -> f64 {
    let sqv = (1.0 - SCV).sqrt();
    let refh = (1.0 - sqv) / (1.0 + sqv);
    let refs = refh * 2.0 / 1.6f64.mul_add(sinb, 1.0);
    let kdirbl = (0.5 / sinb) * kdif / (0.8 * sqv);
    let kdirt = kdirbl * sqv;
    let amax_eff = f64::max(2.0, amax);

    let mut fgros = 0.0;
    for (x, w) in XGAUSS.iter().zip(WGAUSS) {
        let laic = lai * x;
        let visdf = (1.0 - refs) * pardif * kdif * (-kdif * laic).exp();
        let vist = (1.0 - refs) * pardir * kdirt * (-kdirt * laic).exp();
        let visd = (1.0 - SCV) * pardir * kdirbl * (-kdirbl * laic).exp();
        let visshd = visdf + vist - visd;
        let fgrsh = amax * (1.0 - (-visshd * eff / amax_eff).exp());

        let vispp = (1.0 - SCV) * pardir * kdirbl;
        let fgrsun = if vispp <= 0.0 {
            fgrsh
        } else {
            amax * (1.0 - (amax - fgrsh) * (1.0 - (-vispp * eff / amax_eff).exp()) / (eff * vispp))
        };

        let fslla = (-kdirbl * laic).exp();
        let fgl = fslla.mul_add(fgrsun, (1.0 - fslla) * fgrsh);
        fgros += fgl * w;
    }
    fgros * lai
}

/// Daily total gross assimilation (kg CO2/ha/day).
pub fn totass(
    weather: &WeatherRecord,
    amax: f64,
    eff: f64,
    lai: f64,
    kdif: f64,
) -> f64 {
    let a = astro(weather.day, weather.lat, weather.irrad);
    if amax <= 0.0 || lai <= 0.0 || a.dayl <= 0.0 || a.dsinbe <= 0.0 {
        return 0.0;
    }
    let mut dtga = 0.0;
    for (x, w) in XGAUSS.iter().zip(WGAUSS) {
        let hour = (0.5 * a.dayl).mul_add(*x, 12.0);
        let sinb = f64::max(
            0.0,
            a.cosld
                .mul_add((2.0 * core::f64::consts::PI * (hour + 12.0) / 24.0).cos(), a.sinld),
        );
        if sinb <= 0.0 {
            continue;
        }
        let par = 0.5 * weather.irrad * sinb * 0.4f64.mul_add(sinb, 1.0) / a.dsinbe;
        let pardif = f64::min(par, sinb * a.difpp);
        let pardir = par - pardif;
        dtga += assim(amax, eff, lai, kdif, sinb, pardir, pardif) * w;
    }
    dtga * a.dayl
}

/// Potential gross assimilation of the canopy.
#[derive(Debug, Clone)]
pub struct Assimilation {
    params: AssimilationParameters,
    tmin: VecDeque<f64>,
    /// Today's `TMIN`, appended to the record on integrate.
    tmin_today: Option<f64>,
}

impl Assimilation {
    /// Read the parameters; the minimum temperature record starts empty.
    pub fn initialize(params: &ParameterProvider) -> Result<Self, CropError> {
        Ok(Self {
            params: AssimilationParameters::from_parameters(params)?,
            tmin: VecDeque::with_capacity(TMIN_WINDOW),
            tmin_today: None,
        })
    }

    /// Running mean of `TMIN` over the past six days and today.
    fn mean_tmin(&self, today: f64) -> f64 {
        let past = self.tmin.iter().rev().take(TMIN_WINDOW.saturating_sub(1));
        let (sum, n) = past.fold((today, 1.0), |(sum, n), t| (sum + t, n + 1.0));
        sum / n
    }

    /// Potential gross assimilation (kg CH2O/ha/day).
    pub fn calc_rates(&mut self, weather: &WeatherRecord, dvs: f64, lai: f64) -> f64 {
        self.tmin_today = Some(weather.tmin);
        let p = &self.params;
        let dtemp = weather.dtemp();
        let (co2_amax, co2_eff) = p
            .co2
            .as_ref()
            .map_or((1.0, 1.0), |c| (c.amax.eval(c.co2), c.eff.eval(c.co2)));
        let amax = p.amaxtb.eval(dvs) * co2_amax * p.tmpftb.eval(dtemp);
        let eff = p.efftb.eval(dtemp) * co2_eff;
        let kdif = p.kdiftb.eval(dvs);

        let dtga = totass(weather, amax, eff, lai, kdif) * p.tmnftb.eval(self.mean_tmin(weather.tmin));
        dtga * CO2_TO_CH2O
    }

    /// Add the minimum temperature seen by today's rates to the record.
    pub fn integrate(&mut self) {
        let Some(tmin) = self.tmin_today.take() else {
            return;
        };
        if self.tmin.len() >= TMIN_WINDOW {
            self.tmin.pop_front();
        }
        self.tmin.push_back(tmin);
    }

    /// Forget the temperature record.
    pub fn reset(&mut self) {
        self.tmin.clear();
        self.tmin_today = None;
    }
}
