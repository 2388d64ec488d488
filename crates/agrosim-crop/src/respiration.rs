//! Maintenance respiration.
//!
//! Potential maintenance respiration is the organ dry weights weighted by
//! their relative respiration rates, scaled by `RFSETB(DVS)` for
//! senescence and by a Q10 temperature response around 25 C.

use agrosim_kernel::ParameterProvider;
use agrosim_types::Afgen;

use crate::age::AgeCurve;
use crate::error::CropError;

/// Reference temperature of the respiration coefficients (C).
const REFERENCE_TEMP: f64 = 25.0;

/// Organ dry weights the respiration is computed from (kg/ha).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrganWeights {
    /// Living leaves.
    pub wlv: f64,
    /// Living stems.
    pub wst: f64,
    /// Living roots.
    pub wrt: f64,
    /// Living storage organs.
    pub wso: f64,
}

/// Potential maintenance respiration.
#[derive(Debug, Clone)]
pub struct MaintenanceRespiration {
    q10: f64,
    rmr: AgeCurve,
    rml: AgeCurve,
    rms: AgeCurve,
    rmo: AgeCurve,
    rfsetb: Afgen,
}

impl MaintenanceRespiration {
    /// Read the coefficients; perennial crops may give them by age.
    pub fn initialize(params: &ParameterProvider) -> Result<Self, CropError> {
        Ok(Self {
            q10: params.number("Q10")?,
            rmr: AgeCurve::read(params, "RMR")?,
            rml: AgeCurve::read(params, "RML")?,
            rms: AgeCurve::read(params, "RMS")?,
            rmo: AgeCurve::read(params, "RMO")?,
            rfsetb: params.table("RFSETB")?,
        })
    }

    /// Potential maintenance respiration (kg CH2O/ha/day).
    pub fn calc_rates(&self, weights: &OrganWeights, dvs: f64, temp: f64, age: u32) -> f64 {
        let rmres = self.rmo.at(age).mul_add(
            weights.wso,
            self.rms.at(age).mul_add(
                weights.wst,
                self.rmr.at(age).mul_add(weights.wrt, self.rml.at(age) * weights.wlv),
            ),
        );
        let teff = self.q10.powf((temp - REFERENCE_TEMP) / 10.0);
        rmres * self.rfsetb.eval(dvs) * teff
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;
    use crate::fixtures;

    const WEIGHTS: OrganWeights = OrganWeights {
        wlv: 1000.0,
        wst: 2000.0,
        wrt: 500.0,
        wso: 0.0,
    };

    #[test]
    fn respiration_at_reference_temperature() {
        let params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        let mres = MaintenanceRespiration::initialize(&params).unwrap();
        // 0.03*1000 + 0.015*2000 + 0.015*500
        let pmres = mres.calc_rates(&WEIGHTS, 1.0, 25.0, 0);
        assert!((pmres - 67.5).abs() < 1e-9);
    }

    #[test]
    fn q10_doubles_per_ten_degrees() {
        let params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        let mres = MaintenanceRespiration::initialize(&params).unwrap();
        let at25 = mres.calc_rates(&WEIGHTS, 1.0, 25.0, 0);
        let at15 = mres.calc_rates(&WEIGHTS, 1.0, 15.0, 0);
        assert!((at25 / at15 - 2.0).abs() < 1e-9);
    }
}
