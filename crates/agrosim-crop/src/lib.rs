//! Crop growth submodels for agrosim.
//!
//! A crop cycle is represented by a [`crop::CropModel`]: a composite that
//! owns phenology, partitioning, assimilation, respiration,
//! evapotranspiration, four organ pools and the crop nutrient balance,
//! and advances them in a fixed order through the two-phase protocol.
//! Submodels exchange values only through the kiosk, all under the
//! component id of the owning crop, so retiring the crop removes every
//! variable it published.
//!
//! Annual and perennial crops share the same submodels. Perennial
//! behaviour (dormancy, age-indexed parameter tables) is selected by
//! [`crop::CropVariant`].
//!
//! # Modules
//!
//! - [`error`] -- Crop error taxonomy
//! - [`age`] -- Parameters that vary with crop age
//! - [`phenology`] -- Development stages, vernalisation and dormancy
//! - [`partitioning`] -- Dry matter partitioning over organs
//! - [`assimilation`] -- Canopy gross assimilation
//! - [`respiration`] -- Maintenance respiration
//! - [`evapotranspiration`] -- Potential and actual crop water use
//! - [`organs`] -- Leaf, stem, root and storage organ dynamics
//! - [`nutrients`] -- Crop N/P/K demand, uptake and translocation
//! - [`stress`] -- Nutrient nutrition indices and growth reduction
//! - [`crop`] -- The crop model composite

pub mod age;
pub mod assimilation;
pub mod crop;
pub mod error;
pub mod evapotranspiration;
pub mod nutrients;
pub mod organs;
pub mod partitioning;
pub mod phenology;
pub mod respiration;
pub mod stress;

mod published;

#[cfg(test)]
pub(crate) mod fixtures;

pub use crop::{CropModel, CropSummary, CropVariant};
pub use error::CropError;
pub use phenology::{Phenology, Stage};
