//! Crop N/P/K balance.
//!
//! For every nutrient the crop tracks the amount held in leaves, stems,
//! roots and storage organs. Vegetative organs demand the difference
//! between their maximum concentration and what they hold; the soil
//! supplies that demand up to the available amount and a daily maximum
//! until `DVS_NPK_STOP`. From `DVS_NPK_TRANSL` onwards the storage organs
//! are filled by translocation from the vegetative organs. Dying tissue
//! takes its residual concentration with it.
//!
//! The uptake rates `RNUPTAKE`, `RPUPTAKE` and `RKUPTAKE` are published
//! for the soil nutrient balance to withdraw.

use chrono::NaiveDate;

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{Afgen, ComponentId};

use crate::error::CropError;
use crate::published::{Field, Published};
use crate::respiration::OrganWeights;

const BALANCE_TOLERANCE: f64 = 1e-4;

/// Uptake stops below this transpiration reduction factor.
const MIN_RFTRA_UPTAKE: f64 = 0.01;

/// One of the three macro nutrients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nutrient {
    /// Nitrogen.
    N,
    /// Phosphorus.
    P,
    /// Potassium.
    K,
}

/// Kiosk names of one nutrient's variables.
struct Names {
    amount_lv: &'static str,
    amount_st: &'static str,
    amount_rt: &'static str,
    amount_so: &'static str,
    uptake_total: &'static str,
    fixation_total: &'static str,
    losses_total: &'static str,
    uptake: &'static str,
    fixation: &'static str,
    translocation: &'static str,
    death: &'static str,
    demand: &'static str,
}

impl Nutrient {
    /// All nutrients in N, P, K order.
    pub const ALL: [Self; 3] = [Self::N, Self::P, Self::K];

    /// Chemical symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::N => "N",
            Self::P => "P",
            Self::K => "K",
        }
    }

    /// Name of the soil's available pool.
    pub const fn available_name(self) -> &'static str {
        match self {
            Self::N => "NAVAIL",
            Self::P => "PAVAIL",
            Self::K => "KAVAIL",
        }
    }

    const fn names(self) -> Names {
        match self {
            Self::N => Names {
                amount_lv: "NamountLV",
                amount_st: "NamountST",
                amount_rt: "NamountRT",
                amount_so: "NamountSO",
                uptake_total: "NuptakeTotal",
                fixation_total: "NfixationTotal",
                losses_total: "NlossesTotal",
                uptake: "RNUPTAKE",
                fixation: "RNFIXATION",
                translocation: "RNTRANSLOCATION",
                death: "RNDEATH",
                demand: "NdemandTotal",
            },
            Self::P => Names {
                amount_lv: "PamountLV",
                amount_st: "PamountST",
                amount_rt: "PamountRT",
                amount_so: "PamountSO",
                uptake_total: "PuptakeTotal",
                fixation_total: "PfixationTotal",
                losses_total: "PlossesTotal",
                uptake: "RPUPTAKE",
                fixation: "RPFIXATION",
                translocation: "RPTRANSLOCATION",
                death: "RPDEATH",
                demand: "PdemandTotal",
            },
            Self::K => Names {
                amount_lv: "KamountLV",
                amount_st: "KamountST",
                amount_rt: "KamountRT",
                amount_so: "KamountSO",
                uptake_total: "KuptakeTotal",
                fixation_total: "KfixationTotal",
                losses_total: "KlossesTotal",
                uptake: "RKUPTAKE",
                fixation: "RKFIXATION",
                translocation: "RKTRANSLOCATION",
                death: "RKDEATH",
                demand: "KdemandTotal",
            },
        }
    }
}

/// Concentration parameters of one nutrient (kg/kg).
#[derive(Debug, Clone, PartialEq)]
pub struct NutrientParameters {
    /// Maximum concentration in leaves by DVS.
    pub maxlv: Afgen,
    /// Maximum stem concentration as a fraction of the leaf maximum.
    pub maxst_fr: f64,
    /// Maximum root concentration as a fraction of the leaf maximum.
    pub maxrt_fr: f64,
    /// Maximum concentration in storage organs.
    pub maxso: f64,
    /// Residual concentration in leaves.
    pub residlv: f64,
    /// Residual concentration in stems.
    pub residst: f64,
    /// Residual concentration in roots.
    pub residrt: f64,
    /// Critical concentration as a fraction of the maximum.
    pub crit_fr: f64,
    /// Time coefficient of translocation to storage organs (days).
    pub tc: f64,
    /// Maximum uptake rate (kg/ha/day).
    pub uptake_max: f64,
    /// Fraction of the demand met by biological fixation.
    pub fix_fr: f64,
}

impl NutrientParameters {
    /// Read the parameters of `nutrient`.
    pub fn from_parameters(params: &ParameterProvider, nutrient: Nutrient) -> Result<Self, CropError> {
        let x = nutrient.symbol();
        let tc = params.number(&format!("TC{x}T"))?;
        if tc <= 0.0 {
            return Err(CropError::InvalidParameter {
                name: "TCxT",
                reason: format!("TC{x}T must be positive, got {tc}"),
            });
        }
        Ok(Self {
            maxlv: params.table(&format!("{x}MAXLV_TB"))?,
            maxst_fr: params.number(&format!("{x}MAXST_FR"))?,
            maxrt_fr: params.number(&format!("{x}MAXRT_FR"))?,
            maxso: params.number(&format!("{x}MAXSO"))?,
            residlv: params.number(&format!("{x}RESIDLV"))?,
            residst: params.number(&format!("{x}RESIDST"))?,
            residrt: params.number(&format!("{x}RESIDRT"))?,
            crit_fr: params.number(&format!("{x}CRIT_FR"))?,
            tc,
            uptake_max: params.number(&format!("R{x}UPTAKEMAX"))?,
            fix_fr: match nutrient {
                Nutrient::N => params.number_or("NFIX_FR", 0.0)?,
                Nutrient::P | Nutrient::K => 0.0,
            },
        })
    }

    /// Maximum concentrations in leaves, stems and roots at `dvs`.
    pub fn max_concentrations(&self, dvs: f64) -> (f64, f64, f64) {
        let lv = self.maxlv.eval(dvs);
        (lv, lv * self.maxst_fr, lv * self.maxrt_fr)
    }
}

/// Amounts of one nutrient in the crop (kg/ha).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CropNutrientStates {
    /// In living leaves.
    pub lv: f64,
    /// In living stems.
    pub st: f64,
    /// In living roots.
    pub rt: f64,
    /// In storage organs.
    pub so: f64,
    /// Taken up from the soil so far.
    pub uptake_total: f64,
    /// Fixed from the air so far.
    pub fixation_total: f64,
    /// Lost with dead tissue so far.
    pub losses_total: f64,
}

impl CropNutrientStates {
    /// Amount in living vegetative organs and storage organs.
    pub fn in_crop(&self) -> f64 {
        self.lv + self.st + self.rt + self.so
    }
}

/// Daily flows of one nutrient (kg/ha/day).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CropNutrientRates {
    /// Demand of the vegetative organs.
    pub demand: f64,
    /// Demand of the storage organs.
    pub demand_so: f64,
    /// Uptake from the soil.
    pub uptake: f64,
    /// Biological fixation.
    pub fixation: f64,
    /// Translocation to the storage organs.
    pub translocation: f64,
    /// Loss with dying leaves, stems and roots.
    pub death: f64,
    /// Net change in the leaves.
    pub d_lv: f64,
    /// Net change in the stems.
    pub d_st: f64,
    /// Net change in the roots.
    pub d_rt: f64,
    /// Net change in the storage organs.
    pub d_so: f64,
}

/// What the nutrient balance needs from the rest of the crop for one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutrientDrivers {
    /// Development stage.
    pub dvs: f64,
    /// Transpiration reduction factor.
    pub rftra: f64,
    /// Living organ weights (kg/ha).
    pub weights: OrganWeights,
    /// Leaf death (kg/ha/day).
    pub drlv: f64,
    /// Stem death (kg/ha/day).
    pub drst: f64,
    /// Root death (kg/ha/day).
    pub drrt: f64,
}

/// Development stage thresholds and root translocation shared by all nutrients.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Timing {
    dvs_stop: f64,
    dvs_transl: f64,
    translrt_fr: f64,
}

fn state_fields(n: &Names) -> [Field<CropNutrientStates>; 7] {
    [
        (n.amount_lv, |s| s.lv),
        (n.amount_st, |s| s.st),
        (n.amount_rt, |s| s.rt),
        (n.amount_so, |s| s.so),
        (n.uptake_total, |s| s.uptake_total),
        (n.fixation_total, |s| s.fixation_total),
        (n.losses_total, |s| s.losses_total),
    ]
}

fn rate_fields(n: &Names) -> [Field<CropNutrientRates>; 5] {
    [
        (n.uptake, |r| r.uptake),
        (n.fixation, |r| r.fixation),
        (n.translocation, |r| r.translocation),
        (n.death, |r| r.death),
        (n.demand, |r| r.demand),
    ]
}

#[derive(Debug, Clone)]
struct Pool {
    nutrient: Nutrient,
    params: NutrientParameters,
    states: CropNutrientStates,
    rates: CropNutrientRates,
    initial: f64,
    published_states: Published<CropNutrientStates>,
    published_rates: Published<CropNutrientRates>,
}

impl Pool {
    fn initial_states(&self, dvs: f64, w: &OrganWeights) -> CropNutrientStates {
        let (lv, st, rt) = self.params.max_concentrations(dvs);
        CropNutrientStates {
            lv: w.wlv * lv,
            st: w.wst * st,
            rt: w.wrt * rt,
            so: w.wso * self.params.maxso,
            ..CropNutrientStates::default()
        }
    }

    fn flows(&self, d: &NutrientDrivers, available: f64, t: Timing) -> CropNutrientRates {
        let (p, s, w) = (&self.params, &self.states, &d.weights);
        let (max_lv, max_st, max_rt) = p.max_concentrations(d.dvs);

        let demand_lv = f64::max(max_lv.mul_add(w.wlv, -s.lv), 0.0);
        let demand_st = f64::max(max_st.mul_add(w.wst, -s.st), 0.0);
        let demand_rt = f64::max(max_rt.mul_add(w.wrt, -s.rt), 0.0);
        let demand = demand_lv + demand_st + demand_rt;
        let demand_so = f64::max(p.maxso.mul_add(w.wso, -s.so), 0.0) / p.tc;

        let mobile_lv = f64::max(0.0, w.wlv.mul_add(-p.residlv, s.lv));
        let mobile_st = f64::max(0.0, w.wst.mul_add(-p.residst, s.st));
        let mobile_rt = f64::min(
            (mobile_lv + mobile_st) * t.translrt_fr,
            f64::max(0.0, w.wrt.mul_add(-p.residrt, s.rt)),
        );
        let mobile = mobile_lv + mobile_st + mobile_rt;
        let translocation = if d.dvs >= t.dvs_transl {
            f64::min(demand_so, mobile)
        } else {
            0.0
        };
        let moved = |part: f64| {
            if mobile > 0.0 {
                translocation * part / mobile
            } else {
                0.0
            }
        };

        let (uptake, fixation) = if d.dvs < t.dvs_stop && d.rftra > MIN_RFTRA_UPTAKE {
            let fixation = f64::max(0.0, p.fix_fr * demand);
            let uptake = f64::max(0.0, (demand - fixation).min(available).min(p.uptake_max));
            (uptake, fixation)
        } else {
            (0.0, 0.0)
        };
        let supplied = |part: f64| {
            if demand > 0.0 {
                (uptake + fixation) * part / demand
            } else {
                0.0
            }
        };

        let death_lv = p.residlv * d.drlv;
        let death_st = p.residst * d.drst;
        let death_rt = p.residrt * d.drrt;

        CropNutrientRates {
            demand,
            demand_so,
            uptake,
            fixation,
            translocation,
            death: death_lv + death_st + death_rt,
            d_lv: supplied(demand_lv) - moved(mobile_lv) - death_lv,
            d_st: supplied(demand_st) - moved(mobile_st) - death_st,
            d_rt: supplied(demand_rt) - moved(mobile_rt) - death_rt,
            d_so: translocation,
        }
    }

    fn checksum(&self) -> f64 {
        let s = &self.states;
        self.initial + s.uptake_total + s.fixation_total - s.in_crop() - s.losses_total
    }
}

/// N/P/K balance of the crop.
#[derive(Debug, Clone)]
pub struct NpkCropDynamics {
    timing: Timing,
    pools: Vec<Pool>,
}

impl NpkCropDynamics {
    /// Fill the initial organs at their maximum concentration.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        dvs: f64,
        weights: &OrganWeights,
    ) -> Result<Self, CropError> {
        let timing = Timing {
            dvs_stop: params.number("DVS_NPK_STOP")?,
            dvs_transl: params.number("DVS_NPK_TRANSL")?,
            translrt_fr: params.number("NPK_TRANSLRT_FR")?,
        };
        let mut pools = Vec::with_capacity(Nutrient::ALL.len());
        for nutrient in Nutrient::ALL {
            let names = nutrient.names();
            pools.push(Pool {
                nutrient,
                params: NutrientParameters::from_parameters(params, nutrient)?,
                states: CropNutrientStates::default(),
                rates: CropNutrientRates::default(),
                initial: 0.0,
                published_states: Published::publish(
                    kiosk,
                    owner,
                    VarKind::State,
                    &state_fields(&names),
                    &CropNutrientStates::default(),
                )?,
                published_rates: Published::publish(
                    kiosk,
                    owner,
                    VarKind::Rate,
                    &rate_fields(&names),
                    &CropNutrientRates::default(),
                )?,
            });
        }
        let mut npk = Self { timing, pools };
        npk.reset(kiosk, owner, dvs, weights)?;
        Ok(npk)
    }

    /// Demand, uptake, translocation and losses of every nutrient.
    ///
    /// The available amounts are read from the soil's `NAVAIL`, `PAVAIL`
    /// and `KAVAIL`.
    pub fn calc_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId, d: &NutrientDrivers) -> Result<(), CropError> {
        for pool in &mut self.pools {
            let available = kiosk.scalar(pool.nutrient.available_name())?;
            pool.rates = pool.flows(d, available, self.timing);
            pool.published_rates.write(kiosk, owner, &pool.rates)?;
        }
        Ok(())
    }

    /// Zero every flow; no uptake is requested from the soil.
    pub fn clear_rates(&mut self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        for pool in &mut self.pools {
            pool.rates = CropNutrientRates::default();
            pool.published_rates.write(kiosk, owner, &pool.rates)?;
        }
        Ok(())
    }

    /// Apply the flows to the organ amounts.
    pub fn integrate(&mut self, kiosk: &mut Kiosk, owner: ComponentId, delt: f64) -> Result<(), CropError> {
        for pool in &mut self.pools {
            let (r, s) = (pool.rates, &mut pool.states);
            s.lv += r.d_lv * delt;
            s.st += r.d_st * delt;
            s.rt += r.d_rt * delt;
            s.so += r.d_so * delt;
            s.uptake_total += r.uptake * delt;
            s.fixation_total += r.fixation * delt;
            s.losses_total += r.death * delt;
            pool.published_states.write(kiosk, owner, &pool.states)?;
        }
        Ok(())
    }

    /// Republish the current states unchanged.
    pub fn touch(&self, kiosk: &mut Kiosk, owner: ComponentId) -> Result<(), CropError> {
        for pool in &self.pools {
            pool.published_states.write(kiosk, owner, &pool.states)?;
        }
        Ok(())
    }

    /// Refill the organs of `weights` at maximum concentration and clear the totals.
    pub fn reset(&mut self, kiosk: &mut Kiosk, owner: ComponentId, dvs: f64, weights: &OrganWeights) -> Result<(), CropError> {
        for pool in &mut self.pools {
            pool.states = pool.initial_states(dvs, weights);
            pool.initial = pool.states.in_crop();
            pool.rates = CropNutrientRates::default();
            pool.published_states.write(kiosk, owner, &pool.states)?;
            pool.published_rates.write(kiosk, owner, &pool.rates)?;
        }
        Ok(())
    }

    /// Fail if any nutrient's in-crop amounts do not match its flows.
    pub fn check_balance(&self, day: NaiveDate) -> Result<(), CropError> {
        for pool in &self.pools {
            let checksum = pool.checksum();
            if checksum.abs() >= BALANCE_TOLERANCE {
                return Err(CropError::NutrientBalance {
                    nutrient: pool.nutrient.symbol(),
                    day,
                    checksum,
                });
            }
        }
        Ok(())
    }

    /// Current amounts of `nutrient`.
    pub fn states(&self, nutrient: Nutrient) -> CropNutrientStates {
        self.pools
            .iter()
            .find(|p| p.nutrient == nutrient)
            .map_or_else(CropNutrientStates::default, |p| p.states)
    }

    /// Today's flows of `nutrient`.
    pub fn rates(&self, nutrient: Nutrient) -> CropNutrientRates {
        self.pools
            .iter()
            .find(|p| p.nutrient == nutrient)
            .map_or_else(CropNutrientRates::default, |p| p.rates)
    }

    /// Parameters and amounts of every nutrient, in N, P, K order.
    pub fn pools(&self) -> impl Iterator<Item = (Nutrient, &NutrientParameters, &CropNutrientStates)> {
        self.pools.iter().map(|p| (p.nutrient, &p.params, &p.states))
    }
}
