//! Storage organ biomass (grains, tubers, fruits) and pod area index.

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::ComponentId;

use super::{OrganDrivers, initial_weights};
use crate::age::AgeCurve;
use crate::error::CropError;
use crate::partitioning::PartitioningFactors;
use crate::published::{Field, Published};

/// Storage organ states.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageStates {
    /// Living storage organ weight (kg/ha).
    pub wso: f64,
    /// Dead storage organ weight (kg/ha).
    pub dwso: f64,
    /// Total storage organ weight (kg/ha).
    pub twso: f64,
    /// Pod area index (ha/ha).
    pub pai: f64,
}

/// Storage organ rates (kg/ha/day).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageRates {
    /// Growth.
    pub grso: f64,
    /// Death.
    pub drso: f64,
    /// Net change.
    pub gwso: f64,
}

fn state_fields() -> [Field<StorageStates>; 4] {
    [
        ("WSO", |s| s.wso),
        ("DWSO", |s| s.dwso),
        ("TWSO", |s| s.twso),
        ("PAI", |s| s.pai),
    ]
}

fn rate_fields() -> [Field<StorageRates>; 3] {
    [("GRSO", |r| r.grso), ("DRSO", |r| r.drso), ("GWSO", |r| r.gwso)]
}

/// Storage organ dynamics. Storage organs do not die.
#[derive(Debug, Clone)]
pub struct StorageOrganDynamics {
    tdwi: AgeCurve,
    spa: AgeCurve,
    age: u32,
    /// Current state.
    pub states: StorageStates,
    /// Rates of the current day.
    pub rates: StorageRates,
    published_states: Published<StorageStates>,
    published_rates: Published<StorageRates>,
}

impl StorageOrganDynamics {
    /// Read parameters and publish the initial storage organs.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        factors: &PartitioningFactors,
        age: u32,
    ) -> Result<Self, CropError> {
        let mut storage = Self {
            tdwi: AgeCurve::read(params, "TDWI")?,
            spa: AgeCurve::read(params, "SPA")?,
            age,
            states: StorageStates::default(),
            rates: StorageRates::default(),
            published_states: Published::publish(
                kiosk,
                owner,
                VarKind::State,
                &state_fields(),
                &StorageStates::default(),
            )?,
            published_rates: Published::publish(
                kiosk,
                owner,
                VarKind::Rate,
                &rate_fields(),
                &StorageRates::default(),
            )?,
        };
        storage.reset(kiosk, owner, factors, age)?;
        Ok(storage)
    }

    /// Growth of the storage organs.
    pub fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, d: &OrganDrivers) -> Result<(), CropError> {
        let grso = d.admi * d.factors.fo;
        self.age = d.age;
        self.rates = StorageRates {
            grso,
            drso: 0.0,
            gwso: grso,
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Zero rates on days the crop does not grow.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.rates = StorageRates::default();
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Apply the rates.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, delt: f64) -> Result<(), CropError> {
        let r = &self.rates;
        let s = &mut self.states;
        s.wso += r.gwso * delt;
        s.dwso += r.drso * delt;
        s.twso = s.wso + s.dwso;
        s.pai = s.wso * self.spa.at(self.age);
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Republish the current states unchanged.
    pub fn touch(&self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Back to the initial storage organs.
    pub fn reset(&mut self, kiosk: &mut Kiosk, owner: ComponentId, factors: &PartitioningFactors, age: u32) -> Result<(), CropError> {
        let (_, _, _, wso) = initial_weights(self.tdwi.at(age), factors);
        self.age = age;
        self.states = StorageStates {
            wso,
            dwso: 0.0,
            twso: wso,
            pai: wso * self.spa.at(age),
        };
        self.rates = StorageRates::default();
        self.published_states.write(kiosk, owner, &self.states)?;
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_kernel::ParamValue;
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;
    use crate::fixtures;

    #[test]
    fn grains_fill_from_their_share_and_carry_pod_area() {
        let mut params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        params.set_override("SPA", ParamValue::Number(0.001), true).unwrap();
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let factors = PartitioningFactors {
            fr: 0.0,
            fl: 0.0,
            fs: 0.2,
            fo: 0.8,
        };
        let mut storage = StorageOrganDynamics::initialize(&mut kiosk, owner, &params, &factors, 0).unwrap();
        assert!((storage.states.wso - 168.0).abs() < 1e-9);

        let d = OrganDrivers {
            dvs: 1.5,
            age: 0,
            dmi: 100.0,
            admi: 100.0,
            factors,
            rftra: 1.0,
            npki: 1.0,
            temp: 18.0,
        };
        storage.calc_rates(&mut kiosk, owner, &d).unwrap();
        storage.integrate(&mut kiosk, owner, 1.0).unwrap();
        assert!((storage.states.twso - 248.0).abs() < 1e-9);
        assert!((kiosk.scalar("PAI").unwrap() - 0.248).abs() < 1e-9);
    }
}
