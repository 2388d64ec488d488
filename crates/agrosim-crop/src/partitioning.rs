//! Dry matter partitioning.
//!
//! Assimilates are split into a below-ground fraction `FR` and an
//! above-ground remainder, which is split again over leaves (`FL`), stems
//! (`FS`) and storage organs (`FO`). The fractions come from tables of DVS
//! (one table per age class for perennial crops) and are modified by
//! stress:
//!
//! - water stress more severe than nitrogen stress (`RFTRA < NNI`) shifts
//!   assimilates to the roots;
//! - nitrogen stress shifts assimilates from leaves to stems (`NPART`);
//! - surface nitrogen above `NTHRESH` shifts assimilates from storage
//!   organs to leaves.
//!
//! The fractions depend on states only and are therefore states
//! themselves, updated during `integrate`.

use chrono::NaiveDate;

use agrosim_kernel::{Kiosk, ParameterProvider, VarKind};
use agrosim_types::{AgeTables, ComponentId, limit};

use crate::error::CropError;
use crate::published::{Field, Published};

/// Largest root fraction under water stress.
const MAX_STRESSED_FR: f64 = 0.6;

/// Partitioning fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartitioningFactors {
    /// Fraction of dry matter to roots.
    pub fr: f64,
    /// Fraction of above-ground dry matter to leaves.
    pub fl: f64,
    /// Fraction of above-ground dry matter to stems.
    pub fs: f64,
    /// Fraction of above-ground dry matter to storage organs.
    pub fo: f64,
}

impl PartitioningFactors {
    /// Deviation from a complete split; zero when the fractions add up.
    pub fn checksum(&self) -> f64 {
        (self.fl + self.fs + self.fo).mul_add(1.0 - self.fr, self.fr) - 1.0
    }

    /// Fail when the fractions do not add up to one.
    pub fn check(&self, day: NaiveDate) -> Result<(), CropError> {
        let checksum = self.checksum();
        if checksum.abs() >= 1e-4 {
            tracing::error!(%day, checksum, fr = self.fr, fl = self.fl, fs = self.fs, fo = self.fo, "Partitioning error");
            return Err(CropError::Partitioning {
                day,
                checksum,
                fr: self.fr,
                fl: self.fl,
                fs: self.fs,
                fo: self.fo,
            });
        }
        Ok(())
    }
}

fn fields() -> [Field<PartitioningFactors>; 4] {
    [("FR", |f| f.fr), ("FL", |f| f.fl), ("FS", |f| f.fs), ("FO", |f| f.fo)]
}

/// Partitioning tables and stress coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitioningParameters {
    /// Root fraction by DVS.
    pub frtb: AgeTables,
    /// Leaf fraction by DVS.
    pub fltb: AgeTables,
    /// Stem fraction by DVS.
    pub fstb: AgeTables,
    /// Storage organ fraction by DVS.
    pub fotb: AgeTables,
    /// Effect of nitrogen stress on leaf allocation.
    pub npart: f64,
    /// Surface nitrogen above which excess N alters allocation (kg/ha).
    pub nthresh: f64,
}

/// Dry matter partitioning over the organs.
#[derive(Debug, Clone)]
pub struct Partitioning {
    params: PartitioningParameters,
    perennial: bool,
    /// Current fractions.
    pub factors: PartitioningFactors,
    excess_n: Option<f64>,
    published: Published<PartitioningFactors>,
}

impl Partitioning {
    /// Set the fractions from the tables at the current DVS and publish.
    pub fn initialize(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        params: &ParameterProvider,
        dvs: f64,
        age: u32,
        perennial: bool,
        day: NaiveDate,
    ) -> Result<Self, CropError> {
        let params = PartitioningParameters {
            frtb: params.age_tables("FRTB")?,
            fltb: params.age_tables("FLTB")?,
            fstb: params.age_tables("FSTB")?,
            fotb: params.age_tables("FOTB")?,
            npart: params.number("NPART")?,
            nthresh: params.number("NTHRESH")?,
        };
        let factors = Self::from_tables(&params, dvs, age);
        factors.check(day)?;
        Ok(Self {
            published: Published::publish(kiosk, owner, VarKind::State, &fields(), &factors)?,
            params,
            perennial,
            factors,
            excess_n: None,
        })
    }

    fn from_tables(p: &PartitioningParameters, dvs: f64, age: u32) -> PartitioningFactors {
        PartitioningFactors {
            fr: p.frtb.eval(age, dvs),
            fl: p.fltb.eval(age, dvs),
            fs: p.fstb.eval(age, dvs),
            fo: p.fotb.eval(age, dvs),
        }
    }

    /// Record whether surface nitrogen exceeds the threshold today.
    pub fn calc_rates(&mut self, surface_n: f64) -> PartitioningFactors {
        self.excess_n = (surface_n > self.params.nthresh).then_some(surface_n);
        self.factors
    }

    /// Update the fractions for the new DVS and today's stress levels.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &mut self,
        kiosk: &mut Kiosk,
        owner: ComponentId,
        day: NaiveDate,
        dvs: f64,
        age: u32,
        rftra: f64,
        nni: f64,
    ) -> Result<(), CropError> {
        let p = &self.params;
        let base = Self::from_tables(p, dvs, age);
        let mut f = if rftra < nni {
            let frtmod = f64::max(1.0, 1.0 / (rftra + 0.5));
            PartitioningFactors {
                fr: f64::min(MAX_STRESSED_FR, base.fr * frtmod),
                ..base
            }
        } else {
            let flvmod = (-p.npart * (1.0 - nni)).exp();
            let fl = base.fl * flvmod;
            PartitioningFactors {
                fl,
                fs: base.fs + base.fl - fl,
                ..base
            }
        };

        if let Some(surface_n) = self.excess_n {
            let mut ratio = surface_n / p.nthresh;
            if self.perennial {
                ratio = limit(1.0, 10.0, ratio);
            }
            let fomod = 1.0 / (-p.npart * (1.0 - ratio)).exp();
            let fo = base.fo * fomod;
            f = PartitioningFactors {
                fr: base.fr,
                fl: base.fl + base.fo - fo,
                fs: base.fs,
                fo,
            };
            tracing::debug!(%day, surface_n, fo, "Excess surface nitrogen shifts allocation to leaves");
        }

        f.check(day)?;
        self.factors = f;
        self.published.write(kiosk, owner, &self.factors)?;
        Ok(())
    }

    /// Reset the fractions from the tables, as after dormancy.
    pub fn reset(&mut self, kiosk: &mut Kiosk, owner: ComponentId, dvs: f64, age: u32) -> Result<(), CropError> {
        self.factors = Self::from_tables(&self.params, dvs, age);
        self.excess_n = None;
        self.published.write(kiosk, owner, &self.factors)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agrosim_types::{CropEndType, CropStartType};

    use super::*;
    use crate::fixtures;

    fn partitioning(crop: &str, kiosk: &mut Kiosk, dvs: f64, age: u32) -> (ComponentId, Partitioning) {
        let params = fixtures::provider(crop, CropStartType::Emergence, CropEndType::Maturity);
        let owner = ComponentId::new();
        let part = Partitioning::initialize(
            kiosk,
            owner,
            &params,
            dvs,
            age,
            crop == fixtures::PERENNIAL,
            fixtures::start(),
        )
        .unwrap();
        (owner, part)
    }

    #[test]
    fn unstressed_fractions_follow_tables() {
        let mut kiosk = Kiosk::new();
        let (owner, mut part) = partitioning(fixtures::ANNUAL, &mut kiosk, 0.0, 0);
        assert!((part.factors.fr - 0.5).abs() < 1e-9);
        assert!((part.factors.fl - 0.65).abs() < 1e-9);
        assert!((kiosk.scalar("FS").unwrap() - 0.35).abs() < 1e-9);

        part.calc_rates(0.0);
        part.integrate(&mut kiosk, owner, fixtures::start(), 1.0, 0, 1.0, 1.0).unwrap();
        assert!((part.factors.fo - 1.0).abs() < 1e-9);
        assert!((part.factors.fr - 0.02).abs() < 1e-9);
        assert!(part.factors.checksum().abs() < 1e-9);
    }

    #[test]
    fn water_stress_favours_roots() {
        let mut kiosk = Kiosk::new();
        let (owner, mut part) = partitioning(fixtures::ANNUAL, &mut kiosk, 0.3, 0);
        let unstressed = part.factors.fr;
        part.calc_rates(0.0);
        part.integrate(&mut kiosk, owner, fixtures::start(), 0.3, 0, 0.2, 1.0).unwrap();
        assert!(part.factors.fr > unstressed);
        assert!(part.factors.fr <= MAX_STRESSED_FR);
    }

    #[test]
    fn nitrogen_stress_moves_leaf_share_to_stems() {
        let mut kiosk = Kiosk::new();
        let (owner, mut part) = partitioning(fixtures::ANNUAL, &mut kiosk, 0.3, 0);
        let before = part.factors;
        part.calc_rates(0.0);
        part.integrate(&mut kiosk, owner, fixtures::start(), 0.3, 0, 1.0, 0.5).unwrap();
        assert!(part.factors.fl < before.fl);
        assert!(part.factors.fs > before.fs);
        assert!((part.factors.fl + part.factors.fs - before.fl - before.fs).abs() < 1e-9);
    }

    #[test]
    fn excess_surface_nitrogen_moves_storage_share_to_leaves() {
        let mut kiosk = Kiosk::new();
        let (owner, mut part) = partitioning(fixtures::ANNUAL, &mut kiosk, 1.2, 0);
        let before = part.factors;
        part.calc_rates(200.0);
        part.integrate(&mut kiosk, owner, fixtures::start(), 1.2, 0, 1.0, 1.0).unwrap();
        assert!(part.factors.fo < before.fo);
        assert!(part.factors.fl > before.fl);
        assert!(part.factors.checksum().abs() < 1e-9);
    }

    #[test]
    fn perennial_tables_are_chosen_by_age() {
        let mut kiosk = Kiosk::new();
        let (_, young) = partitioning(fixtures::PERENNIAL, &mut kiosk, 1.0, 0);
        let mut other = Kiosk::new();
        let (_, old) = partitioning(fixtures::PERENNIAL, &mut other, 1.0, 5);
        assert!((young.factors.fr - 0.3).abs() < 1e-9);
        assert!((old.factors.fr - 0.2).abs() < 1e-9);
    }

    #[test]
    fn broken_tables_are_rejected() {
        let mut params = fixtures::provider(fixtures::ANNUAL, CropStartType::Emergence, CropEndType::Maturity);
        params
            .set_override("FOTB", agrosim_kernel::ParamValue::Table(vec![0.0, 0.5, 2.0, 0.5]), true)
            .unwrap();
        let mut kiosk = Kiosk::new();
        let result = Partitioning::initialize(&mut kiosk, ComponentId::new(), &params, 0.0, 0, false, fixtures::start());
        assert!(matches!(result, Err(CropError::Partitioning { .. })));
    }
}
