//! Nutrient nutrition indices and the growth reduction they cause.
//!
//! Each index compares the concentration in the living leaves and stems
//! with the residual (index near zero) and critical (index one)
//! concentrations. The most limiting nutrient sets `NPKI`, which reduces
//! light use efficiency quadratically through `NLUE_NPK`.

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{ComponentId, limit};

use crate::error::CropError;
use crate::nutrients::{CropNutrientStates, Nutrient, NutrientParameters, NpkCropDynamics};
use crate::published::{Field, Published};
use crate::respiration::OrganWeights;

/// Lowest value a nutrition index can take.
const MIN_INDEX: f64 = 0.001;

/// Nutrition indices of the current day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutrientIndices {
    /// Nitrogen nutrition index.
    pub nni: f64,
    /// Phosphorus nutrition index.
    pub pni: f64,
    /// Potassium nutrition index.
    pub kni: f64,
    /// Index of the most limiting nutrient.
    pub npki: f64,
    /// Reduction factor of light use efficiency.
    pub rfnpk: f64,
}

impl Default for NutrientIndices {
    fn default() -> Self {
        Self {
            nni: 1.0,
            pni: 1.0,
            kni: 1.0,
            npki: 1.0,
            rfnpk: 1.0,
        }
    }
}

fn rate_fields() -> [Field<NutrientIndices>; 5] {
    [
        ("NNI", |r| r.nni),
        ("PNI", |r| r.pni),
        ("KNI", |r| r.kni),
        ("NPKI", |r| r.npki),
        ("RFNPK", |r| r.rfnpk),
    ]
}

/// Nutrition index of one nutrient in the vegetative biomass.
pub fn nutrition_index(
    p: &NutrientParameters,
    s: &CropNutrientStates,
    weights: &OrganWeights,
    dvs: f64,
) -> f64 {
    let vbm = weights.wlv + weights.wst;
    if vbm <= 0.0 {
        return 1.0;
    }
    let (max_lv, max_st, _) = p.max_concentrations(dvs);
    let max_veg = max_lv.mul_add(weights.wlv, max_st * weights.wst) / vbm;
    let crit = p.crit_fr * max_veg;
    let resid = p.residlv.mul_add(weights.wlv, p.residst * weights.wst) / vbm;
    if crit <= resid {
        return 1.0;
    }
    let conc = (s.lv + s.st) / vbm;
    limit(MIN_INDEX, 1.0, (conc - resid) / (crit - resid))
}

/// Daily nutrient stress.
#[derive(Debug, Clone)]
pub struct NpkStress {
    nlue_npk: f64,
    /// Indices of the current day.
    pub rates: NutrientIndices,
    published: Published<NutrientIndices>,
}

impl NpkStress {
    /// Read `NLUE_NPK` and publish unstressed indices.
    pub fn initialize(kiosk: &mut Kiosk, owner: ComponentId, params: &ParameterProvider) -> Result<Self, CropError> {
        let rates = NutrientIndices::default();
        Ok(Self {
            nlue_npk: params.number("NLUE_NPK")?,
            published: Published::publish(kiosk, owner, VarKind::Rate, &rate_fields(), &rates)?,
            rates,
        })
    }

    /// Indices from the current nutrient amounts and organ weights.
    pub fn calc_rates(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        npk: &NpkCropDynamics,
        weights: &OrganWeights,
        dvs: f64,
    ) -> Result<NutrientIndices, CropError> {
        let mut indices = NutrientIndices::default();
        for (nutrient, params, states) in npk.pools() {
            let index = nutrition_index(params, states, weights, dvs);
            match nutrient {
                Nutrient::N => indices.nni = index,
                Nutrient::P => indices.pni = index,
                Nutrient::K => indices.kni = index,
            }
        }
        indices.npki = indices.nni.min(indices.pni).min(indices.kni);
        let shortage = 1.0001 - indices.npki;
        indices.rfnpk = limit(0.0, 1.0, (self.nlue_npk * shortage).mul_add(-shortage, 1.0));
        self.rates = indices;
        self.published.write(kiosk, owner, &self.rates)?;
        Ok(indices)
    }

    /// No stress on days the crop does not grow.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.rates = NutrientIndices::default();
        self.published.write(kiosk, owner, &self.rates)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;
    use crate::fixtures;

    const INITIAL: OrganWeights = OrganWeights {
        wlv: 68.25,
        wst: 36.75,
        wrt: 105.0,
        wso: 0.0,
    };

    fn setup() -> (Kiosk, ComponentId, NpkCropDynamics, NpkStress) {
        let params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let npk = NpkCropDynamics::initialize(&mut kiosk, owner, &params, 0.0, &INITIAL).unwrap();
        let stress = NpkStress::initialize(&mut kiosk, owner, &params).unwrap();
        (kiosk, owner, npk, stress)
    }

    #[test]
    fn well_supplied_crop_is_not_stressed() {
        let (mut kiosk, owner, npk, mut stress) = setup();
        let indices = stress.calc_rates(&mut kiosk, owner, &npk, &INITIAL, 0.0).unwrap();
        assert!((indices.npki - 1.0).abs() < 1e-9);
        assert!(indices.rfnpk > 0.999_999);
        assert!((kiosk.scalar("NNI").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn diluted_nutrients_reduce_growth() {
        let (mut kiosk, owner, npk, mut stress) = setup();
        let grown = OrganWeights { wlv: 200.0, ..INITIAL };
        let indices = stress.calc_rates(&mut kiosk, owner, &npk, &grown, 0.0).unwrap();
        assert!((indices.nni - 0.3536).abs() < 1e-3);
        assert!((indices.kni - 0.3473).abs() < 1e-3);
        assert!((indices.npki - indices.kni).abs() < f64::EPSILON);
        let shortage = 1.0001 - indices.npki;
        assert!((indices.rfnpk - (1.0 - 1.1 * shortage * shortage)).abs() < 1e-9);
        assert!((kiosk.scalar("RFNPK").unwrap() - indices.rfnpk).abs() < f64::EPSILON);
    }

    #[test]
    fn cleared_rates_report_no_stress() {
        let (mut kiosk, owner, npk, mut stress) = setup();
        let grown = OrganWeights { wlv: 200.0, ..INITIAL };
        stress.calc_rates(&mut kiosk, owner, &npk, &grown, 0.0).unwrap();
        stress.clear_rates(&mut kiosk, owner).unwrap();
        assert!((kiosk.scalar("NPKI").unwrap() - 1.0).abs() < f64::EPSILON);
    }
}
