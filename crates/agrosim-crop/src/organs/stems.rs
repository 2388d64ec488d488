//! Stem biomass and stem area index.

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{AgeTables, ComponentId};

use super::{OrganDrivers, initial_weights};
use crate::age::AgeCurve;
use crate::error::CropError;
use crate::partitioning::PartitioningFactors;
use crate::published::{Field, Published};

/// Stem states.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StemStates {
    /// Living stem weight (kg/ha).
    pub wst: f64,
    /// Dead stem weight (kg/ha).
    pub dwst: f64,
    /// Total stem weight (kg/ha).
    pub twst: f64,
    /// Stem area index (ha/ha).
    pub sai: f64,
}

/// Stem rates (kg/ha/day).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StemRates {
    /// Growth.
    pub grst: f64,
    /// Death.
    pub drst: f64,
    /// Net change.
    pub gwst: f64,
}

fn state_fields() -> [Field<StemStates>; 4] {
    [
        ("WST", |s| s.wst),
        ("DWST", |s| s.dwst),
        ("TWST", |s| s.twst),
        ("SAI", |s| s.sai),
    ]
}

fn rate_fields() -> [Field<StemRates>; 3] {
    [("GRST", |r| r.grst), ("DRST", |r| r.drst), ("GWST", |r| r.gwst)]
}

/// Stem dynamics.
#[derive(Debug, Clone)]
pub struct StemDynamics {
    tdwi: AgeCurve,
    rdrstb: AgeTables,
    ssatb: AgeTables,
    /// Current state.
    pub states: StemStates,
    /// Rates of the current day.
    pub rates: StemRates,
    published_states: Published<StemStates>,
    published_rates: Published<StemRates>,
}

impl StemDynamics {
    /// Read parameters and publish the initial stems.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        factors: &PartitioningFactors,
        dvs: f64,
        age: u32,
    ) -> Result<Self, CropError> {
        let mut stems = Self {
            tdwi: AgeCurve::read(params, "TDWI")?,
            rdrstb: params.age_tables("RDRSTB")?,
            ssatb: params.age_tables("SSATB")?,
            states: StemStates::default(),
            rates: StemRates::default(),
            published_states: Published::publish(
                kiosk,
                owner,
                VarKind::State,
                &state_fields(),
                &StemStates::default(),
            )?,
            published_rates: Published::publish(
                kiosk,
                owner,
                VarKind::Rate,
                &rate_fields(),
                &StemRates::default(),
            )?,
        };
        stems.reset(kiosk, owner, factors, dvs, age)?;
        Ok(stems)
    }

    /// Growth and death of the stems.
    pub fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, d: &OrganDrivers) -> Result<(), CropError> {
        let grst = d.admi * d.factors.fs;
        let drst = self.rdrstb.eval(d.age, d.dvs) * self.states.wst;
        self.rates = StemRates {
            grst,
            drst,
            gwst: grst - drst,
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Zero rates on days the crop does not grow.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.rates = StemRates::default();
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Apply the rates; the stem area follows the new weight.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, dvs: f64, age: u32, delt: f64) -> Result<(), CropError> {
        let r = &self.rates;
        let s = &mut self.states;
        s.wst += r.gwst * delt;
        s.dwst += r.drst * delt;
        s.twst = s.wst + s.dwst;
        s.sai = s.wst * self.ssatb.eval(age, dvs);
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Republish the current states unchanged.
    pub fn touch(&self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Back to the initial stems.
    pub fn reset(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        factors: &PartitioningFactors,
        dvs: f64,
        age: u32,
    ) -> Result<(), CropError> {
        let (_, wst, _, _) = initial_weights(self.tdwi.at(age), factors);
        self.states = StemStates {
            wst,
            dwst: 0.0,
            twst: wst,
            sai: wst * self.ssatb.eval(age, dvs),
        };
        self.rates = StemRates::default();
        self.published_states.write(kiosk, owner, &self.states)?;
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;
    use crate::fixtures;

    #[test]
    fn stems_grow_and_die_after_flowering() {
        let params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let factors = PartitioningFactors {
            fr: 0.5,
            fl: 0.65,
            fs: 0.35,
            fo: 0.0,
        };
        let mut stems = StemDynamics::initialize(&mut kiosk, owner, &params, &factors, 0.0, 0).unwrap();
        assert!((stems.states.wst - 36.75).abs() < 1e-9);

        let mut d = OrganDrivers {
            dvs: 0.5,
            age: 0,
            dmi: 200.0,
            admi: 100.0,
            factors,
            rftra: 1.0,
            npki: 1.0,
            temp: 15.0,
        };
        stems.calc_rates(&mut kiosk, owner, &d).unwrap();
        stems.integrate(&mut kiosk, owner, 0.5, 0, 1.0).unwrap();
        assert!((stems.states.wst - 71.75).abs() < 1e-9);
        assert!(stems.states.dwst.abs() < f64::EPSILON);

        d.dvs = 1.8;
        d.admi = 0.0;
        stems.calc_rates(&mut kiosk, owner, &d).unwrap();
        assert!((stems.rates.drst - 0.02 * 71.75).abs() < 1e-9);
        stems.integrate(&mut kiosk, owner, 1.8, 0, 1.0).unwrap();
        assert!((stems.states.twst - 71.75).abs() < 1e-9);
        assert!((kiosk.scalar("DWST").unwrap() - 1.435).abs() < 1e-9);
    }
}
