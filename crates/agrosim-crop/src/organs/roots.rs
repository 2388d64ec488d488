//! Root biomass and rooting depth.
//!
//! Roots grow down at `RRI` cm/day from `RDI` until the maximum depth
//! `RDM`, which is the smaller of the crop limit `RDMCR` and the soil
//! limit `RDMSOL` but never less than `RDI`. Root growth in depth stops
//! once no assimilates are allocated below ground.

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{AgeTables, ComponentId};

use super::OrganDrivers;
use crate::age::AgeCurve;
use crate::error::CropError;
use crate::partitioning::PartitioningFactors;
use crate::published::{Field, Published};

/// Root parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RootParameters {
    /// Initial rooting depth (cm).
    pub rdi: f64,
    /// Daily increase in rooting depth (cm/day).
    pub rri: f64,
    /// Maximum rooting depth of the crop (cm).
    pub rdmcr: f64,
    /// Maximum rooting depth allowed by the soil (cm).
    pub rdmsol: f64,
    /// Relative death rate of roots by DVS (1/day).
    pub rdrrtb: AgeTables,
    /// Total initial dry weight (kg/ha).
    pub tdwi: AgeCurve,
}

/// Root states.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RootStates {
    /// Rooting depth (cm).
    pub rd: f64,
    /// Maximum rooting depth (cm).
    pub rdm: f64,
    /// Living root weight (kg/ha).
    pub wrt: f64,
    /// Dead root weight (kg/ha).
    pub dwrt: f64,
    /// Total root weight (kg/ha).
    pub twrt: f64,
}

/// Root rates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RootRates {
    /// Root depth growth (cm/day).
    pub rr: f64,
    /// Root growth (kg/ha/day).
    pub grrt: f64,
    /// Root death (kg/ha/day).
    pub drrt: f64,
    /// Net root weight change (kg/ha/day).
    pub gwrt: f64,
}

fn state_fields() -> [Field<RootStates>; 5] {
    [
        ("RD", |s| s.rd),
        ("RDM", |s| s.rdm),
        ("WRT", |s| s.wrt),
        ("DWRT", |s| s.dwrt),
        ("TWRT", |s| s.twrt),
    ]
}

fn rate_fields() -> [Field<RootRates>; 4] {
    [
        ("RR", |r| r.rr),
        ("GRRT", |r| r.grrt),
        ("DRRT", |r| r.drrt),
        ("GWRT", |r| r.gwrt),
    ]
}

/// Root dynamics.
#[derive(Debug, Clone)]
pub struct RootDynamics {
    params: RootParameters,
    /// Current state.
    pub states: RootStates,
    /// Rates of the current day.
    pub rates: RootRates,
    published_states: Published<RootStates>,
    published_rates: Published<RootRates>,
}

impl RootDynamics {
    /// Read parameters and publish the initial roots.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        factors: &PartitioningFactors,
        age: u32,
    ) -> Result<Self, CropError> {
        let rdmcr = params.number("RDMCR")?;
        let params = RootParameters {
            rdi: params.number("RDI")?,
            rri: params.number("RRI")?,
            rdmcr,
            rdmsol: params.number_or("RDMSOL", rdmcr)?,
            rdrrtb: params.age_tables("RDRRTB")?,
            tdwi: AgeCurve::read(params, "TDWI")?,
        };
        let states = Self::initial_states(&params, factors, age);
        let rates = RootRates::default();
        tracing::debug!(rd = states.rd, rdm = states.rdm, wrt = states.wrt, "Roots initialized");
        Ok(Self {
            published_states: Published::publish(kiosk, owner, VarKind::State, &state_fields(), &states)?,
            published_rates: Published::publish(kiosk, owner, VarKind::Rate, &rate_fields(), &rates)?,
            params,
            states,
            rates,
        })
    }

    fn initial_states(p: &RootParameters, factors: &PartitioningFactors, age: u32) -> RootStates {
        let rdm = f64::max(p.rdi, f64::min(p.rdmcr, p.rdmsol));
        let wrt = factors.fr * p.tdwi.at(age);
        RootStates {
            rd: p.rdi,
            rdm,
            wrt,
            dwrt: 0.0,
            twrt: wrt,
        }
    }

    /// Growth, death and deepening of the roots.
    pub fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, d: &OrganDrivers) -> Result<(), CropError> {
        let s = &self.states;
        let grrt = d.factors.fr * d.dmi;
        let drrt = s.wrt * self.params.rdrrtb.eval(d.age, d.dvs);
        let rr = if d.factors.fr > 0.0 {
            f64::max(0.0, f64::min(s.rdm - s.rd, self.params.rri))
        } else {
            0.0
        };
        self.rates = RootRates {
            rr,
            grrt,
            drrt,
            gwrt: grrt - drrt,
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Zero rates on days the crop does not grow.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.rates = RootRates::default();
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Apply the rates.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, delt: f64) -> Result<(), CropError> {
        let r = &self.rates;
        let s = &mut self.states;
        s.wrt += r.gwrt * delt;
        s.dwrt += r.drrt * delt;
        s.twrt = s.wrt + s.dwrt;
        s.rd += r.rr * delt;
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Republish the current states unchanged.
    pub fn touch(&self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Back to the initial roots.
    pub fn reset(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        factors: &PartitioningFactors,
        age: u32,
    ) -> Result<(), CropError> {
        self.states = Self::initial_states(&self.params, factors, age);
        self.rates = RootRates::default();
        self.published_states.write(kiosk, owner, &self.states)?;
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }
}
