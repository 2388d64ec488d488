//! Leaf biomass and leaf area, tracked as age cohorts.
//!
//! Every day of growth adds one cohort holding the new leaf weight, its
//! specific leaf area and a physiological age. Cohorts older than the
//! life span `SPAN` die; water stress, self-shading and nutrient
//! shortage kill leaves from the oldest cohort onwards. While the canopy
//! is small, leaf area grows exponentially with temperature and is
//! limited by the assimilates available.

use std::collections::VecDeque;

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{AgeTables, Afgen, ComponentId, limit};

use super::{OrganDrivers, initial_weights};
use crate::age::AgeCurve;
use crate::error::CropError;
use crate::partitioning::PartitioningFactors;
use crate::published::{Field, Published};

/// Upper temperature of the physiological ageing scale (C).
const AGEING_TEMP_MAX: f64 = 35.0;

/// Exponential growth stops above this leaf area index.
const LAI_EXP_LIMIT: f64 = 6.0;

/// Critical leaf area index times the extinction coefficient.
const LAI_CRITICAL_KDIF: f64 = 3.2;

/// Maximum relative death rate by self-shading (1/day).
const MAX_SHADING_DEATH: f64 = 0.03;

/// Leaf cohort formed on one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafCohort {
    /// Dry weight (kg/ha).
    pub weight: f64,
    /// Specific leaf area (ha/kg).
    pub sla: f64,
    /// Physiological age (days).
    pub age: f64,
}

/// Leaf parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafParameters {
    /// Maximum relative increase in LAI (ha/ha/day/C).
    pub rgrlai: f64,
    /// Specific leaf area by DVS.
    pub slatb: AgeTables,
    /// Life span of leaves at 35 C (days).
    pub span: AgeCurve,
    /// Lower threshold temperature of leaf ageing (C).
    pub tbase: f64,
    /// Maximum relative death rate due to water stress.
    pub perdl: f64,
    /// Extinction coefficient for diffuse light by DVS.
    pub kdiftb: Afgen,
    /// Total initial dry weight (kg/ha).
    pub tdwi: AgeCurve,
    /// Maximum relative death rate due to nutrient stress.
    pub rdrlv_npk: f64,
    /// Reduction of specific leaf area by nutrient stress.
    pub nsla_npk: f64,
    /// Reduction of early leaf area growth by nutrient stress.
    pub nlai_npk: f64,
}

impl LeafParameters {
    /// Read from the parameter provider.
    pub fn from_parameters(params: &ParameterProvider) -> Result<Self, CropError> {
        Ok(Self {
            rgrlai: params.number("RGRLAI")?,
            slatb: params.age_tables("SLATB")?,
            span: AgeCurve::read(params, "SPAN")?,
            tbase: params.number("TBASE")?,
            perdl: params.number("PERDL")?,
            kdiftb: params.table("KDIFTB")?,
            tdwi: AgeCurve::read(params, "TDWI")?,
            rdrlv_npk: params.number_or("RDRLV_NPK", 0.0)?,
            nsla_npk: params.number_or("NSLA_NPK", 0.0)?,
            nlai_npk: params.number_or("NLAI_NPK", 0.0)?,
        })
    }
}

/// Leaf states.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeafStates {
    /// Leaf area index at emergence.
    pub laiem: f64,
    /// Area of all leaf cohorts.
    pub lasum: f64,
    /// Leaf area index under unrestricted exponential growth.
    pub laiexp: f64,
    /// Highest LAI reached.
    pub laimax: f64,
    /// Leaf area index including stem and pod area.
    pub lai: f64,
    /// Living leaf weight (kg/ha).
    pub wlv: f64,
    /// Dead leaf weight (kg/ha).
    pub dwlv: f64,
    /// Total leaf weight (kg/ha).
    pub twlv: f64,
}

/// Leaf rates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeafRates {
    /// Leaf growth (kg/ha/day).
    pub grlv: f64,
    /// Death by water stress.
    pub dslv1: f64,
    /// Death by self-shading.
    pub dslv2: f64,
    /// Death by nutrient stress.
    pub dslv3: f64,
    /// Largest of the stress death rates.
    pub dslv: f64,
    /// Death by ageing.
    pub dalv: f64,
    /// Total leaf death.
    pub drlv: f64,
    /// Specific leaf area of the new cohort.
    pub slat: f64,
    /// Physiological ageing (days/day).
    pub fysage: f64,
    /// Exponential leaf area growth.
    pub glaiex: f64,
    /// Assimilate-limited leaf area growth.
    pub glasol: f64,
}

fn state_fields() -> [Field<LeafStates>; 8] {
    [
        ("LAIEM", |s| s.laiem),
        ("LASUM", |s| s.lasum),
        ("LAIEXP", |s| s.laiexp),
        ("LAIMAX", |s| s.laimax),
        ("LAI", |s| s.lai),
        ("WLV", |s| s.wlv),
        ("DWLV", |s| s.dwlv),
        ("TWLV", |s| s.twlv),
    ]
}

fn rate_fields() -> [Field<LeafRates>; 11] {
    [
        ("GRLV", |r| r.grlv),
        ("DSLV1", |r| r.dslv1),
        ("DSLV2", |r| r.dslv2),
        ("DSLV3", |r| r.dslv3),
        ("DSLV", |r| r.dslv),
        ("DALV", |r| r.dalv),
        ("DRLV", |r| r.drlv),
        ("SLAT", |r| r.slat),
        ("FYSAGE", |r| r.fysage),
        ("GLAIEX", |r| r.glaiex),
        ("GLASOL", |r| r.glasol),
    ]
}

/// Leaf dynamics.
#[derive(Debug, Clone)]
pub struct LeafDynamics {
    params: LeafParameters,
    /// Living cohorts, newest first.
    pub cohorts: VecDeque<LeafCohort>,
    /// Current state.
    pub states: LeafStates,
    /// Rates of the current day.
    pub rates: LeafRates,
    published_states: Published<LeafStates>,
    published_rates: Published<LeafRates>,
}

impl LeafDynamics {
    /// Read parameters and publish the initial canopy.
    ///
    /// `other_area` is the stem and pod area added to the leaf area index.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        factors: &PartitioningFactors,
        dvs: f64,
        age: u32,
        other_area: f64,
    ) -> Result<Self, CropError> {
        let mut leaves = Self {
            params: LeafParameters::from_parameters(params)?,
            cohorts: VecDeque::new(),
            states: LeafStates::default(),
            rates: LeafRates::default(),
            published_states: Published::publish(
                kiosk,
                owner,
                VarKind::State,
                &state_fields(),
                &LeafStates::default(),
            )?,
            published_rates: Published::publish(
                kiosk,
                owner,
                VarKind::Rate,
                &rate_fields(),
                &LeafRates::default(),
            )?,
        };
        leaves.reset(kiosk, owner, factors, dvs, age, other_area)?;
        tracing::debug!(wlv = leaves.states.wlv, lai = leaves.states.lai, "Leaves initialized");
        Ok(leaves)
    }

    /// Growth, ageing and death of the leaves.
    pub fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, d: &OrganDrivers) -> Result<(), CropError> {
        let p = &self.params;
        let s = &self.states;
        let span = p.span.at(d.age);
        let npk_shortage = 1.0 - d.npki;

        let grlv = d.admi * d.factors.fl;

        let dslv1 = s.wlv * (1.0 - d.rftra) * p.perdl;
        let laicr = LAI_CRITICAL_KDIF / p.kdiftb.eval(d.dvs);
        let dslv2 = s.wlv * limit(0.0, MAX_SHADING_DEATH, MAX_SHADING_DEATH * (s.lai - laicr) / laicr);
        let dslv3 = s.wlv * p.rdrlv_npk * npk_shortage;
        let dslv = dslv1.max(dslv2).max(dslv3);

        let dalv: f64 = self
            .cohorts
            .iter()
            .filter(|c| c.age > span)
            .map(|c| c.weight)
            .sum();
        let drlv = dslv.max(dalv);

        let fysage = f64::max(0.0, (d.temp - p.tbase) / (AGEING_TEMP_MAX - p.tbase));
        let mut slat = p.slatb.eval(d.age, d.dvs) * (-p.nsla_npk * npk_shortage).exp();

        let mut glaiex = 0.0;
        let mut glasol = 0.0;
        if s.laiexp < LAI_EXP_LIMIT {
            let dteff = f64::max(0.0, d.temp - p.tbase);
            let early_stress = if d.dvs < 0.2 && s.lai < 0.75 {
                (-p.nlai_npk * npk_shortage).exp()
            } else {
                1.0
            };
            glaiex = s.laiexp * p.rgrlai * dteff * early_stress;
            glasol = grlv * slat;
            let gla = f64::min(glaiex, glasol);
            if grlv > 0.0 {
                slat = gla / grlv;
            }
        }

        self.rates = LeafRates {
            grlv,
            dslv1,
            dslv2,
            dslv3,
            dslv,
            dalv,
            drlv,
            slat,
            fysage,
            glaiex,
            glasol,
        };
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Zero rates on days the crop does not grow.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.rates = LeafRates::default();
        self.published_rates.write(kiosk, owner, &self.rates)?;
        Ok(())
    }

    /// Remove dead leaves, age the cohorts and add today's cohort.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, other_area: f64, delt: f64) -> Result<(), CropError> {
        let r = self.rates;

        let mut dying = r.drlv * delt;
        while dying > 0.0 {
            let Some(oldest) = self.cohorts.back_mut() else {
                break;
            };
            if dying >= oldest.weight {
                dying -= oldest.weight;
                self.cohorts.pop_back();
            } else {
                oldest.weight -= dying;
                dying = 0.0;
            }
        }

        for cohort in &mut self.cohorts {
            cohort.age += r.fysage * delt;
        }
        self.cohorts.push_front(LeafCohort {
            weight: r.grlv * delt,
            sla: r.slat,
            age: 0.0,
        });

        let s = &mut self.states;
        s.lasum = self.cohorts.iter().map(|c| c.weight * c.sla).sum();
        s.lai = s.lasum + other_area;
        s.laimax = s.laimax.max(s.lai);
        s.laiexp += r.glaiex * delt;
        s.wlv = self.cohorts.iter().map(|c| c.weight).sum();
        s.dwlv += r.drlv * delt;
        s.twlv = s.wlv + s.dwlv;
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Republish the current states unchanged.
    pub fn touch(&self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        self.published_states.write(kiosk, owner, &self.states)?;
        Ok(())
    }

    /// Back to a single cohort holding the initial leaf weight.
    #[allow(clippy::too_many_arguments)]
    pub fn reset(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        factors: &PartitioningFactors,
        dvs: f64,
        age: u32,
        other_area: f64,
    ) -> Result<(), CropError> {
        let (wlv, _, _, _) = initial_weights(self.params.tdwi.at(age), factors);
        let sla = self.params.slatb.eval(age, dvs);
        self.cohorts = VecDeque::from([LeafCohort {
            weight: wlv,
            sla,
            age: 0.0,
        }]);
        let laiem = wlv * sla;
        let lai = laiem + other_area;
        self.states = LeafStates {
            laiem,
            lasum: laiem,
            laiexp: laiem,
            laimax: lai,
            lai,
            wlv,
            dwlv: 0.0,
            twlv: wlv,
        };
        self.rates = LeafRates::default();
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

    const FACTORS: PartitioningFactors = PartitioningFactors {
        fr: 0.5,
        fl: 0.65,
        fs: 0.35,
        fo: 0.0,
    };

    fn drivers(admi: f64, temp: f64) -> OrganDrivers {
        OrganDrivers {
            dvs: 0.1,
            age: 0,
            dmi: admi * 2.0,
            admi,
            factors: FACTORS,
            rftra: 1.0,
            npki: 1.0,
            temp,
        }
    }

    fn leaves(overrides: &[(&str, f64)]) -> (Kiosk, ComponentId, LeafDynamics) {
        let mut params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        for (name, value) in overrides {
            params.set_override(name, ParamValue::Number(*value), false).unwrap();
        }
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let leaves = LeafDynamics::initialize(&mut kiosk, owner, &params, &FACTORS, 0.0, 0, 0.0).unwrap();
        (kiosk, owner, leaves)
    }

    #[test]
    fn initial_canopy_is_one_cohort() {
        let (kiosk, _, leaves) = leaves(&[]);
        assert_eq!(leaves.cohorts.len(), 1);
        assert!((leaves.states.wlv - 68.25).abs() < 1e-9);
        assert!((leaves.states.lai - 68.25 * 0.00212).abs() < 1e-12);
        assert!((kiosk.scalar("LAIEM").unwrap() - leaves.states.lai).abs() < 1e-12);
    }

    #[test]
    fn young_canopy_grows_exponentially() {
        let (mut kiosk, owner, mut leaves) = leaves(&[]);
        let lai0 = leaves.states.lai;
        leaves.calc_rates(&mut kiosk, owner, &drivers(100.0, 15.0)).unwrap();
        let expected = lai0 * 0.0082 * 15.0;
        assert!((leaves.rates.glaiex - expected).abs() < 1e-12);
        // Plenty of assimilates: area growth is temperature limited.
        assert!(leaves.rates.slat < 0.00212);

        leaves.integrate(&mut kiosk, owner, 0.0, 1.0).unwrap();
        assert_eq!(leaves.cohorts.len(), 2);
        assert!((leaves.states.lasum - (lai0 + expected)).abs() < 1e-9);
        assert!((leaves.states.wlv - (68.25 + 65.0)).abs() < 1e-9);
    }

    #[test]
    fn leaves_older_than_their_span_die() {
        let (mut kiosk, owner, mut leaves) = leaves(&[("SPAN", 2.0)]);
        // At 35 C leaves age one day per day.
        for _ in 0..3 {
            leaves.calc_rates(&mut kiosk, owner, &drivers(1.0, 35.0)).unwrap();
            assert!(leaves.rates.dalv.abs() < f64::EPSILON);
            leaves.integrate(&mut kiosk, owner, 0.0, 1.0).unwrap();
        }
        leaves.calc_rates(&mut kiosk, owner, &drivers(1.0, 35.0)).unwrap();
        assert!((leaves.rates.dalv - 68.25).abs() < 1e-9);
        leaves.integrate(&mut kiosk, owner, 0.0, 1.0).unwrap();
        assert_eq!(leaves.cohorts.len(), 4);
        assert!((leaves.states.dwlv - 68.25).abs() < 1e-9);
        assert!((leaves.states.twlv - (68.25 + 4.0 * 0.65)).abs() < 1e-9);
    }

    #[test]
    fn water_stress_kills_the_oldest_leaves() {
        let (mut kiosk, owner, mut leaves) = leaves(&[]);
        let mut d = drivers(0.0, 15.0);
        d.rftra = 0.5;
        leaves.calc_rates(&mut kiosk, owner, &d).unwrap();
        let dslv1 = 68.25 * 0.5 * 0.03;
        assert!((leaves.rates.dslv1 - dslv1).abs() < 1e-12);
        assert!((leaves.rates.drlv - dslv1).abs() < 1e-12);
        leaves.integrate(&mut kiosk, owner, 0.0, 1.0).unwrap();
        assert!((leaves.states.wlv - (68.25 - dslv1)).abs() < 1e-9);
        assert!((kiosk.scalar("DWLV").unwrap() - dslv1).abs() < 1e-12);
    }

    #[test]
    fn stem_and_pod_area_add_to_lai() {
        let (mut kiosk, owner, mut leaves) = leaves(&[]);
        leaves.clear_rates(&mut kiosk, owner).unwrap();
        leaves.integrate(&mut kiosk, owner, 0.5, 1.0).unwrap();
        assert!((leaves.states.lai - (leaves.states.lasum + 0.5)).abs() < 1e-12);
        assert!(leaves.states.laimax >= leaves.states.lai);
    }
}
