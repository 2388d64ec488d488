//! Organ dry matter dynamics.
//!
//! Each organ pool (leaves, stems, roots, storage organs) grows from its
//! share of the converted assimilates and loses weight through death.
//! Dead weight is kept so the total production of every organ can be
//! reported. Initial weights come from the total initial dry weight
//! `TDWI`, split with the partitioning fractions at the start.

pub mod leaves;
pub mod roots;
pub mod stems;
pub mod storage;

pub use leaves::{LeafCohort, LeafDynamics};
pub use roots::RootDynamics;
pub use stems::StemDynamics;
pub use storage::StorageOrganDynamics;

use crate::partitioning::PartitioningFactors;

/// Everything an organ needs from the rest of the crop for one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrganDrivers {
    /// Development stage.
    pub dvs: f64,
    /// Crop age class in years.
    pub age: u32,
    /// Total dry matter increase (kg/ha/day).
    pub dmi: f64,
    /// Above-ground dry matter increase (kg/ha/day).
    pub admi: f64,
    /// Partitioning fractions.
    pub factors: PartitioningFactors,
    /// Transpiration reduction factor.
    pub rftra: f64,
    /// Combined NPK index.
    pub npki: f64,
    /// Daily mean temperature (C).
    pub temp: f64,
}

/// Initial dry weight of each organ from `tdwi`.
pub(crate) fn initial_weights(tdwi: f64, f: &PartitioningFactors) -> (f64, f64, f64, f64) {
    let above = (1.0 - f.fr) * tdwi;
    (above * f.fl, above * f.fs, f.fr * tdwi, above * f.fo)
}
