//! Classic free-drainage water balance.
//!
//! The soil is two compartments: the root zone, whose depth follows the
//! crop's `RD`, and the lower zone down to the maximum rootable depth.
//! Water percolates from the root zone to the lower zone and leaves the
//! lower zone at a rate bounded by the subsoil conductivity. When roots
//! grow or retreat, water is moved between the compartments.

use chrono::NaiveDate;

use agrosim_kernel::{DayContext, Handle, Kiosk, Lifecycle, ParameterProvider, SimulationObject, VarKind};
use agrosim_types::{Afgen, ComponentId, WeatherRecord, limit};

use crate::error::SoilError;
use crate::layered::DEFAULT_RD;

const BALANCE_TOLERANCE: f64 = 1e-4;
const NINFTB: [f64; 6] = [0.0, 0.0, 0.5, 0.0, 1.5, 1.0];

/// Parameters of the free-drainage balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeDrainParameters {
    /// Moisture content at field capacity.
    pub smfcf: f64,
    /// Moisture content at saturation.
    pub sm0: f64,
    /// Moisture content at wilting point.
    pub smw: f64,
    /// Critical air content for oxygen stress.
    pub crairc: f64,
    /// Maximum percolation rate of the root zone (cm/day).
    pub sope: f64,
    /// Maximum percolation rate of the subsoil (cm/day).
    pub ksub: f64,
    /// Maximum rootable depth of the soil (cm).
    pub rdmsol: f64,
    /// Maximum initial moisture content of the root zone.
    pub smlim: f64,
    /// Non-infiltrating fraction depends on storm size.
    pub ifunrn: bool,
    /// Maximum surface storage (cm).
    pub ssmax: f64,
    /// Initial surface storage (cm).
    pub ssi: f64,
    /// Initial available water in the profile (cm).
    pub wav: f64,
    /// Maximum non-infiltrating fraction of rain.
    pub notinf: f64,
}

impl FreeDrainParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, SoilError> {
        let p = Self {
            smfcf: params.number("SMFCF")?,
            sm0: params.number("SM0")?,
            smw: params.number("SMW")?,
            crairc: params.number("CRAIRC")?,
            sope: params.number("SOPE")?,
            ksub: params.number("KSUB")?,
            rdmsol: params.number("RDMSOL")?,
            smlim: params.number("SMLIM")?,
            ifunrn: params.flag("IFUNRN")?,
            ssmax: params.number("SSMAX")?,
            ssi: params.number("SSI")?,
            wav: params.number("WAV")?,
            notinf: params.number("NOTINF")?,
        };
        if !(p.sm0 > p.smfcf && p.smfcf > p.smw && p.smw >= 0.0) {
            return Err(SoilError::InvalidProfile {
                reason: format!(
                    "moisture contents must satisfy SM0 > SMFCF > SMW >= 0, got {}, {}, {}",
                    p.sm0, p.smfcf, p.smw
                ),
            });
        }
        Ok(p)
    }
}

/// State variables of the free-drainage balance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreeDrainStates {
    /// Mean moisture content of the root zone.
    pub sm: f64,
    /// Surface storage (cm).
    pub ss: f64,
    /// Water in the root zone (cm).
    pub wc: f64,
    /// Initial water in the root zone (cm).
    pub wi: f64,
    /// Water in the lower zone (cm).
    pub wlow: f64,
    /// Initial water in the lower zone (cm).
    pub wlowi: f64,
    /// Water in the whole rootable zone (cm).
    pub wwlow: f64,
    /// Total transpiration (cm).
    pub wtrat: f64,
    /// Total soil evaporation (cm).
    pub evst: f64,
    /// Total open water evaporation (cm).
    pub evwt: f64,
    /// Total surface runoff (cm).
    pub tsr: f64,
    /// Total rainfall (cm).
    pub raint: f64,
    /// Total water moved into the root zone by root growth (cm).
    pub wart: f64,
    /// Total infiltration (cm).
    pub totinf: f64,
    /// Total effective irrigation (cm).
    pub totirr: f64,
    /// Total gross irrigation (cm).
    pub totirrig: f64,
    /// Total percolation out of the root zone (cm).
    pub perct: f64,
    /// Total loss below the rootable zone (cm).
    pub losst: f64,
    /// Consecutive days with oxygen stress.
    pub dsos: f64,
}

/// Rate variables of the free-drainage balance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FreeDrainRates {
    /// Soil evaporation (cm/day).
    pub evs: f64,
    /// Open water evaporation (cm/day).
    pub evw: f64,
    /// Transpiration (cm/day).
    pub wtra: f64,
    /// Infiltration (cm/day).
    pub rin: f64,
    /// Effective irrigation (cm/day).
    pub rirr: f64,
    /// Percolation out of the root zone (cm/day).
    pub perc: f64,
    /// Loss below the rootable zone (cm/day).
    pub loss: f64,
    /// Change of root zone water (cm/day).
    pub dw: f64,
    /// Change of lower zone water (cm/day).
    pub dwlow: f64,
    /// Surface runoff (cm/day).
    pub dtsr: f64,
    /// Change of surface storage (cm/day).
    pub dss: f64,
    /// Rainfall (cm/day).
    pub draint: f64,
}

type StateField = fn(&FreeDrainStates) -> f64;
type RateField = fn(&FreeDrainRates) -> f64;

fn state_fields() -> [(&'static str, StateField); 16] {
    [
        ("SM", |s| s.sm),
        ("SS", |s| s.ss),
        ("WC", |s| s.wc),
        ("WLOW", |s| s.wlow),
        ("WWLOW", |s| s.wwlow),
        ("WTRAT", |s| s.wtrat),
        ("EVST", |s| s.evst),
        ("EVWT", |s| s.evwt),
        ("TSR", |s| s.tsr),
        ("RAINT", |s| s.raint),
        ("WART", |s| s.wart),
        ("TOTINF", |s| s.totinf),
        ("TOTIRR", |s| s.totirr),
        ("TOTIRRIG", |s| s.totirrig),
        ("PERCT", |s| s.perct),
        ("LOSST", |s| s.losst),
    ]
}

fn rate_fields() -> [(&'static str, RateField); 7] {
    [
        ("EVS", |r| r.evs),
        ("EVW", |r| r.evw),
        ("WTRA", |r| r.wtra),
        ("RIN", |r| r.rin),
        ("RIRR", |r| r.rirr),
        ("PERC", |r| r.perc),
        ("LOSS", |r| r.loss),
    ]
}

/// Free-drainage water balance.
#[derive(Debug, Clone)]
pub struct FreeDrainWaterBalance {
    id: ComponentId,
    lifecycle: Lifecycle,
    params: FreeDrainParameters,
    /// Current state.
    pub states: FreeDrainStates,
    /// Rates of the current day.
    pub rates: FreeDrainRates,
    initial: FreeDrainStates,
    ninftb: Afgen,
    rdm: f64,
    rd_old: f64,
    dslr: f64,
    dslr_initial: f64,
    rin_old: f64,
    in_crop_cycle: bool,
    pending_irrigation: f64,
    state_handles: Vec<(Handle<f64>, StateField)>,
    rate_handles: Vec<(Handle<f64>, RateField)>,
    dsos: Handle<f64>,
}

impl FreeDrainWaterBalance {
    /// Read parameters, set initial contents and publish.
    pub fn initialize(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: &ParameterProvider,
    ) -> Result<Self, SoilError> {
        Self::with_parameters(day, kiosk, FreeDrainParameters::from_parameters(params)?)
    }

    /// Initialize from explicit parameters.
    pub fn with_parameters(
        day: NaiveDate,
        kiosk: &mut Kiosk,
        params: FreeDrainParameters,
    ) -> Result<Self, SoilError> {
        let p = &params;
        let rd = DEFAULT_RD;
        let rdm = rd.max(p.rdmsol);
        let smlim = limit(p.smw, p.sm0, p.smlim);

        let sm = limit(p.smw, smlim, p.smw + p.wav / rd);
        let wc = sm * rd;
        let wlow = limit(0.0, p.sm0 * (rdm - rd), rdm.mul_add(p.smw, p.wav) - wc);
        let states = FreeDrainStates {
            sm,
            ss: p.ssi,
            wc,
            wi: wc,
            wlow,
            wlowi: wlow,
            wwlow: wc + wlow,
            ..FreeDrainStates::default()
        };
        let dslr = if sm >= 0.5f64.mul_add(p.smfcf - p.smw, p.smw) { 1.0 } else { 5.0 };

        let id = ComponentId::new();
        let state_handles = state_fields()
            .into_iter()
            .map(|(name, field)| Ok((kiosk.publish(name, field(&states), VarKind::State, id)?, field)))
            .collect::<Result<Vec<_>, SoilError>>()?;
        let rate_handles = rate_fields()
            .into_iter()
            .map(|(name, field)| Ok((kiosk.publish(name, 0.0, VarKind::Rate, id)?, field)))
            .collect::<Result<Vec<_>, SoilError>>()?;
        let dsos = kiosk.publish("DSOS", 0.0, VarKind::State, id)?;
        for (name, value) in [("SMW", p.smw), ("SMFCF", p.smfcf), ("SM0", p.sm0)] {
            kiosk.publish(name, value, VarKind::State, id)?;
        }

        tracing::info!(%day, rdm, root_zone_water = wc, lower_zone_water = wlow, "Free-drainage water balance initialized");

        Ok(Self {
            id,
            lifecycle: Lifecycle::active("free-drainage water balance"),
            params,
            initial: states.clone(),
            states,
            rates: FreeDrainRates::default(),
            ninftb: Afgen::new(&NINFTB)?,
            rdm,
            rd_old: rd,
            dslr,
            dslr_initial: dslr,
            rin_old: 0.0,
            in_crop_cycle: false,
            pending_irrigation: 0.0,
            state_handles,
            rate_handles,
            dsos,
        })
    }

    /// Registry owner id of this balance.
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Queue irrigation; `gross` is booked in `TOTIRRIG`, `effective` enters the soil.
    pub fn on_irrigate(&mut self, gross: f64, effective: f64) {
        self.states.totirrig += gross;
        self.pending_irrigation += effective;
    }

    /// A crop cycle started; oxygen stress days are counted from now on.
    pub const fn on_crop_start(&mut self) {
        self.in_crop_cycle = true;
    }

    /// The crop cycle ended.
    pub const fn on_crop_finish(&mut self) {
        self.in_crop_cycle = false;
    }

    /// Root zone checksum and whole-system checksum (cm).
    pub fn checksums(&self) -> (f64, f64) {
        let s = &self.states;
        let root_zone = s.totinf + s.wi + s.wart - s.evst - s.wtrat - s.perct - s.wc;
        let total = self.params.ssi + s.raint + s.totirr + s.wi - s.wc + s.wlowi - s.wlow
            - s.wtrat
            - s.evwt
            - s.evst
            - s.tsr
            - s.losst
            - s.ss;
        (root_zone, total)
    }

    /// Move water between the root zone and lower zone after a rooting depth change.
    fn redistribute(&mut self, rd_change: f64) {
        let s = &mut self.states;
        let moved = if rd_change > 0.001 {
            let remaining = self.rdm - self.rd_old;
            if remaining > 0.0 {
                s.wlow.min(s.wlow * rd_change / remaining)
            } else {
                s.wlow
            }
        } else if self.rd_old > 0.0 {
            s.wc * rd_change / self.rd_old
        } else {
            0.0
        };
        if moved != 0.0 {
            s.wlow -= moved;
            s.wc += moved;
            s.wart += moved;
        }
    }

    fn write_states(&self, kiosk: &mut Kiosk) -> Result<(), SoilError> {
        for (handle, field) in &self.state_handles {
            kiosk.set(*handle, field(&self.states), self.id)?;
        }
        kiosk.set(self.dsos, self.states.dsos, self.id)?;
        Ok(())
    }
}

impl SimulationObject for FreeDrainWaterBalance {
    type Error = SoilError;

    fn calc_rates(&mut self, ctx: &mut DayContext<'_>, weather: &WeatherRecord) -> Result<(), SoilError> {
        self.lifecycle.begin_rates(ctx.day)?;
        let p = self.params;
        let s = &self.states;
        let mut r = FreeDrainRates {
            rirr: core::mem::take(&mut self.pending_irrigation),
            draint: weather.rain,
            ..FreeDrainRates::default()
        };

        let (evwmx, evsmx) = match ctx.kiosk.find_scalar("TRA") {
            Some(tra) => {
                r.wtra = tra;
                (ctx.kiosk.scalar("EVWMX")?, ctx.kiosk.scalar("EVSMX")?)
            }
            None => (weather.e0, weather.es0),
        };

        if s.ss > 1.0 {
            r.evw = evwmx;
        } else if self.rin_old >= 1.0 {
            r.evs = evsmx;
            self.dslr = 1.0;
        } else {
            let evsmxt = evsmx * ((self.dslr + 1.0).sqrt() - self.dslr.sqrt());
            r.evs = evsmx.min(evsmxt + self.rin_old);
            self.dslr += 1.0;
        }

        let mut rinpre = if p.ifunrn {
            p.notinf.mul_add(-self.ninftb.eval(weather.rain), 1.0) * weather.rain
        } else {
            (1.0 - p.notinf) * weather.rain
        };
        rinpre += r.rirr + s.ss;
        if s.ss > 0.1 {
            rinpre = p.sope.min(rinpre - r.evw);
        }

        let rd = ctx.kiosk.find_scalar("RD").unwrap_or(DEFAULT_RD);
        let perc1 = limit(0.0, p.sope, s.wc - p.smfcf * rd - r.wtra - r.evs);
        r.loss = limit(0.0, p.ksub, s.wlow - p.smfcf * (self.rdm - rd) + perc1);
        let perc2 = (self.rdm - rd).mul_add(p.sm0, -s.wlow) + r.loss;
        r.perc = perc1.min(perc2);

        r.rin = rinpre.min((p.sm0 - s.sm).mul_add(rd, r.wtra + r.evs + r.perc));
        self.rin_old = r.rin;

        r.dw = r.rin - r.wtra - r.evs - r.perc;
        r.dwlow = r.perc - r.loss;

        // Soil evaporation gives way so the root zone never goes negative.
        let wtmp = s.wc + r.dw;
        if wtmp < 0.0 {
            r.evs += wtmp;
            r.dw = -s.wc;
        }

        let sstmp = weather.rain + r.rirr - r.evw - r.rin;
        r.dss = sstmp.min(p.ssmax - s.ss);
        r.dtsr = sstmp - r.dss;

        self.rates = r;
        for (handle, field) in &self.rate_handles {
            ctx.kiosk.set(*handle, field(&self.rates), self.id)?;
        }
        Ok(())
    }

    fn integrate(&mut self, ctx: &mut DayContext<'_>, delt: f64) -> Result<(), SoilError> {
        self.lifecycle.begin_integrate(ctx.day)?;
        let r = self.rates;
        let p = self.params;
        {
            let s = &mut self.states;
            s.wtrat += r.wtra * delt;
            s.evwt += r.evw * delt;
            s.evst += r.evs * delt;
            s.raint += r.draint * delt;
            s.totinf += r.rin * delt;
            s.totirr += r.rirr * delt;
            s.ss += r.dss * delt;
            s.tsr += r.dtsr * delt;
            s.wc += r.dw * delt;
            s.perct += r.perc * delt;
            s.losst += r.loss * delt;
            s.wlow += r.dwlow * delt;
        }

        let rd = ctx.kiosk.find_scalar("RD").unwrap_or(DEFAULT_RD);
        self.redistribute(rd - self.rd_old);
        self.rd_old = rd;

        let s = &mut self.states;
        s.wwlow = s.wc + s.wlow;
        s.sm = if rd > 0.0 { s.wc / rd } else { 0.0 };
        if s.sm >= p.sm0 - p.crairc && self.in_crop_cycle {
            s.dsos += 1.0;
        } else {
            s.dsos = 0.0;
        }

        self.write_states(ctx.kiosk)
    }

    fn finalize(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.finalize()?;
        let (root_zone, total) = self.checksums();
        if root_zone.abs() > BALANCE_TOLERANCE {
            return Err(SoilError::WaterBalance {
                scope: "root zone",
                day: ctx.day,
                checksum: root_zone,
            });
        }
        if total.abs() > BALANCE_TOLERANCE {
            return Err(SoilError::WaterBalance {
                scope: "whole profile",
                day: ctx.day,
                checksum: total,
            });
        }
        tracing::info!(day = %ctx.day, root_zone, total, "Free-drainage water balance closed");
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DayContext<'_>) -> Result<(), SoilError> {
        self.lifecycle.reset();
        self.states = self.initial.clone();
        self.rates = FreeDrainRates::default();
        self.rd_old = DEFAULT_RD;
        self.dslr = self.dslr_initial;
        self.rin_old = 0.0;
        self.in_crop_cycle = false;
        self.pending_irrigation = 0.0;
        self.write_states(ctx.kiosk)
    }
}
